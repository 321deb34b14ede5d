//! IDE-backed tool handler.

use std::time::Duration;

use async_trait::async_trait;
use protocol::{CancelToolCall, ExecuteTool, ExecuteToolParams, Router, ToolCallRef};
use serde_json::{Value, json};
use tools::{HandlerError, ToolContext, ToolHandler, ToolInvocation};
use tracing::{debug, warn};

/// Default window the IDE gets to finish one execution.
pub const DEFAULT_EXECUTE_TIMEOUT: Duration = Duration::from_secs(120);

/// Executes tool calls by forwarding them to the IDE as `tools/execute`.
///
/// Progress the IDE reports for the call arrives separately as
/// `toolCallPartialOutput` and is appended by the runtime. Cancellation is
/// forwarded as `tools/cancel`.
pub struct IdeToolHandler {
    ide: Router,
    timeout: Duration,
}

impl IdeToolHandler {
    pub fn new(ide: Router, timeout: Duration) -> Self {
        Self { ide, timeout }
    }
}

#[async_trait]
impl ToolHandler for IdeToolHandler {
    async fn run(&self, invocation: ToolInvocation, ctx: ToolContext) -> Result<Value, HandlerError> {
        let tool_call_id = invocation.tool_call_id.clone();
        let params = ExecuteToolParams {
            tool_call_id: invocation.tool_call_id,
            tool_name: invocation.tool_name,
            arguments: invocation.arguments,
        };

        tokio::select! {
            result = self.ide.request_with_timeout::<ExecuteTool>(params, self.timeout) => {
                result.map_err(execution_error)
            }
            _ = ctx.cancelled() => {
                debug!(tool_call_id = %tool_call_id, "forwarding cancellation to IDE");
                let target = ToolCallRef { tool_call_id };
                if let Err(e) = self.ide.notify::<CancelToolCall>(target) {
                    warn!(error = %e, "could not forward cancellation");
                }
                Err(HandlerError::new("cancelled"))
            }
        }
    }
}

fn execution_error(error: protocol::Error) -> HandlerError {
    match error {
        protocol::Error::Remote(remote) => HandlerError::new(remote.message.clone())
            .with_details(json!({ "code": remote.code, "data": remote.data })),
        other => HandlerError::new(format!("IDE execution failed: {other}")),
    }
}
