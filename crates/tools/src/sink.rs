//! Where partial output goes once it is accumulated.

use parking_lot::Mutex;
use protocol::{ContextItem, PartialOutput, Router, ToolCallPartialOutput};
use tracing::warn;

/// Receives each accepted batch of fragments, in accumulator order.
///
/// Called while the call's accumulator is locked, so implementations must
/// not block.
pub trait PartialOutputSink: Send + Sync {
    fn publish(&self, tool_call_id: &str, items: &[ContextItem]);
}

/// Broadcast to the webview as `toolCallPartialOutput`.
impl PartialOutputSink for Router {
    fn publish(&self, tool_call_id: &str, items: &[ContextItem]) {
        let params = PartialOutput {
            tool_call_id: tool_call_id.to_string(),
            context_items: items.to_vec(),
        };
        if let Err(e) = self.notify::<ToolCallPartialOutput>(params) {
            warn!(tool_call_id, error = %e, "partial output not delivered");
        }
    }
}

/// Keeps every published batch.
#[derive(Debug, Default)]
pub struct RecordingSink {
    published: Mutex<Vec<PartialOutput>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<PartialOutput> {
        self.published.lock().clone()
    }

    /// Every item published for one call, flattened in order.
    pub fn items_for(&self, tool_call_id: &str) -> Vec<ContextItem> {
        self.published
            .lock()
            .iter()
            .filter(|batch| batch.tool_call_id == tool_call_id)
            .flat_map(|batch| batch.context_items.iter().cloned())
            .collect()
    }
}

impl PartialOutputSink for RecordingSink {
    fn publish(&self, tool_call_id: &str, items: &[ContextItem]) {
        self.published.lock().push(PartialOutput {
            tool_call_id: tool_call_id.to_string(),
            context_items: items.to_vec(),
        });
    }
}
