use protocol::RemoteError;
use serde_json::json;
use thiserror::Error;

use crate::engine::ToolCallState;

/// Errors raised by the registry and the invocation engine.
///
/// These reject a call before it starts or refuse an illegal operation on
/// a live one. Failures *inside* a started call are reported through
/// [`protocol::ToolOutcome::Failed`] instead.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// No tool is registered under this name.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// Arguments do not satisfy the tool's parameter schema.
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A tool with this name is already registered.
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    /// The tool's parameter schema is not a valid JSON schema.
    #[error("invalid parameter schema for {tool}: {reason}")]
    InvalidSchema { tool: String, reason: String },

    /// A live call already uses this id.
    #[error("tool call id already in use: {0}")]
    DuplicateCallId(String),

    /// No live call has this id.
    #[error("no live tool call with id {0}")]
    UnknownCall(String),

    /// The call is no longer accepting output.
    #[error("tool call {tool_call_id} is {state}")]
    CallClosed {
        tool_call_id: String,
        state: ToolCallState,
    },

    #[error("illegal transition {from} -> {to}")]
    InvalidTransition {
        from: ToolCallState,
        to: ToolCallState,
    },
}

impl ToolError {
    /// The error as it travels back to the caller of `tools/call`.
    pub fn to_remote(&self) -> RemoteError {
        let message = self.to_string();
        match self {
            ToolError::UnknownTool(tool) => RemoteError::new(RemoteError::UNKNOWN_TOOL, message)
                .with_data(json!({ "toolName": tool })),
            ToolError::InvalidArguments { tool, reason } => {
                RemoteError::new(RemoteError::INVALID_ARGUMENTS, message)
                    .with_data(json!({ "toolName": tool, "reason": reason }))
            }
            ToolError::DuplicateCallId(id) => RemoteError::new(RemoteError::DUPLICATE_CALL, message)
                .with_data(json!({ "toolCallId": id })),
            _ => RemoteError::internal(message),
        }
    }
}

pub type Result<T> = std::result::Result<T, ToolError>;
