//! Tool registry and invocation engine.
//!
//! The registry holds the ordered, validated set of tools offered to the
//! reasoning process. The engine runs individual calls through their
//! lifecycle and streams partial output to a [`PartialOutputSink`].

pub mod catalog;
mod engine;
mod error;
mod handler;
mod registry;
mod sink;
pub mod view;

pub use catalog::{BuiltinTool, standard_registry};
pub use engine::{
    DEFAULT_CANCEL_GRACE, EngineConfig, ToolCallSnapshot, ToolCallState, ToolContext, ToolEngine,
};
pub use error::{Result, ToolError};
pub use handler::{FnHandler, HandlerError, ToolHandler, ToolInvocation, handler_fn};
pub use registry::{RegisteredTool, ToolRegistry};
pub use sink::{PartialOutputSink, RecordingSink};
pub use view::{Indicator, ToolCallView};
