//! Display state for one tool call, as the webview folds it.

use protocol::{ContextItem, PartialOutput, ToolCallResult, ToolFailure, ToolOutcome};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Running,
    Success,
    Error,
    /// Neutral end state after cancellation.
    Stopped,
}

impl Indicator {
    pub fn as_str(self) -> &'static str {
        match self {
            Indicator::Running => "running",
            Indicator::Success => "success",
            Indicator::Error => "error",
            Indicator::Stopped => "stopped",
        }
    }
}

/// Folds `toolCallPartialOutput` notifications and the terminal result of
/// one call into what the progress region shows.
#[derive(Debug, Clone)]
pub struct ToolCallView {
    tool_call_id: String,
    items: Vec<ContextItem>,
    indicator: Indicator,
    show_line_count: bool,
    output: Option<Value>,
    failure: Option<ToolFailure>,
}

impl ToolCallView {
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            items: Vec::new(),
            indicator: Indicator::Running,
            show_line_count: true,
            output: None,
            failure: None,
        }
    }

    /// Show the plain "Generating" label instead of a line count.
    pub fn without_line_count(mut self) -> Self {
        self.show_line_count = false;
        self
    }

    pub fn tool_call_id(&self) -> &str {
        &self.tool_call_id
    }

    /// Fold one notification. Returns `false` if it was ignored: another
    /// call's output, or output arriving after the call ended.
    pub fn apply_partial(&mut self, partial: &PartialOutput) -> bool {
        if partial.tool_call_id != self.tool_call_id || self.is_finished() {
            return false;
        }
        self.items.extend(partial.context_items.iter().cloned());
        true
    }

    /// Finalize with the terminal result.
    ///
    /// Already displayed output is kept; the result's items replace it only
    /// when they extend it (a view that missed notifications catches up).
    pub fn finish(&mut self, result: &ToolCallResult) -> bool {
        if result.tool_call_id != self.tool_call_id || self.is_finished() {
            return false;
        }
        if result.context_items.starts_with(&self.items) {
            self.items = result.context_items.clone();
        }
        match &result.outcome {
            ToolOutcome::Succeeded { output } => {
                self.indicator = Indicator::Success;
                self.output = Some(output.clone());
            }
            ToolOutcome::Failed { error } => {
                self.indicator = Indicator::Error;
                self.failure = Some(error.clone());
            }
            ToolOutcome::Cancelled => self.indicator = Indicator::Stopped,
        }
        true
    }

    pub fn is_finished(&self) -> bool {
        self.indicator != Indicator::Running
    }

    pub fn indicator(&self) -> Indicator {
        self.indicator
    }

    pub fn items(&self) -> &[ContextItem] {
        &self.items
    }

    /// The live region: the most recently appended item.
    pub fn last_item(&self) -> Option<&ContextItem> {
        self.items.last()
    }

    /// Lines in the live region. An empty region still counts one line.
    pub fn line_count(&self) -> usize {
        self.last_item()
            .map_or(1, |item| item.display_text().split('\n').count())
    }

    /// Fragments received so far.
    pub fn step_count(&self) -> usize {
        self.items.len()
    }

    pub fn progress_label(&self) -> String {
        if !self.show_line_count {
            return "Generating".to_string();
        }
        match self.line_count() {
            1 => "1 line generated".to_string(),
            n => format!("{n} lines generated"),
        }
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn failure(&self) -> Option<&ToolFailure> {
        self.failure.as_ref()
    }
}
