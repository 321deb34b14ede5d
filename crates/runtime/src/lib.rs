//! Conduit runtime: the core party.
//!
//! [`CoreRuntime`] speaks to the webview and to the IDE over two
//! independent channels. It serves tool listing and invocation to both,
//! executes every builtin tool by delegating to the IDE
//! ([`IdeToolHandler`]), streams the IDE's progress to the webview, and
//! relays profile selection.
//!
//! # Example
//!
//! ```no_run
//! use protocol::Transport;
//! use runtime::{CoreRuntime, RuntimeConfig};
//!
//! # async fn example(ide: Transport) -> runtime::Result<()> {
//! let core = CoreRuntime::start(ide, Transport::stdio(), RuntimeConfig::default())?;
//! core.closed().await;
//! # Ok(())
//! # }
//! ```

mod core;
mod error;
mod ide;
mod profiles;

pub use crate::core::{CoreRuntime, RuntimeConfig};
pub use error::{Error, Result};
pub use ide::{DEFAULT_EXECUTE_TIMEOUT, IdeToolHandler};
pub use profiles::ProfileState;
