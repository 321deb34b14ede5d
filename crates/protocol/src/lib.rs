//! Typed message protocol between the core, the IDE and the webview.
//!
//! This crate provides the wire envelope, the directional schema registry,
//! and a [`Router`] that turns one ordered duplex channel into typed
//! requests, responses and notifications.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use protocol::{Party, Ping, Router, RouterConfig, SchemaRegistry, Transport};
//!
//! # async fn example() -> protocol::Result<()> {
//! let registry = Arc::new(SchemaRegistry::standard()?);
//! let webview = Router::spawn(
//!     Transport::stdio(),
//!     registry,
//!     Party::Webview,
//!     Party::Core,
//!     RouterConfig::default(),
//! )?;
//!
//! let pong = webview.request::<Ping>("hello".to_string()).await?;
//! println!("core speaks protocol v{}", pong.protocol_version);
//! # Ok(())
//! # }
//! ```

mod envelope;
mod error;
pub mod messages;
mod router;
pub mod schema;
mod transport;

pub use envelope::{
    CorrelationId, Envelope, NotificationEnvelope, RemoteError, RequestEnvelope, ResponseEnvelope,
};
pub use error::{Error, Result};
pub use messages::{
    AvailableProfiles, CallTool, CallToolParams, CancelToolCall, ConfigError, ConfigErrorNotice,
    ContextItem, DidChangeAvailableProfiles, DidChangeSelectedOrg, DidChangeSelectedProfile,
    ExecuteTool, ExecuteToolParams, FailureKind, ListTools, Message, Notification,
    PROTOCOL_VERSION, PartialOutput, Ping, Pong, ProfileDescription, Request, SelectedOrg,
    SelectedProfile, ToolCallPartialOutput, ToolCallRef, ToolCallResult, ToolDefinition,
    ToolFailure, ToolOutcome,
};
pub use router::{DEFAULT_TIMEOUT, Router, RouterConfig};
pub use schema::{Direction, MessageKind, MessageSpec, Party, Schema, SchemaRegistry};
pub use transport::{FrameReader, FrameWriter, MAX_FRAME_SIZE, ProcessConfig, Transport};
