//! Protocol error types.

use std::time::Duration;

use crate::envelope::RemoteError;
use crate::schema::Direction;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("unknown message '{name}' for {direction}")]
    UnknownMessage { direction: Direction, name: String },

    #[error("message '{name}' is declared as a {declared} for {direction}")]
    KindMismatch {
        direction: Direction,
        name: String,
        declared: &'static str,
    },

    #[error("timeout after {after:?} waiting for response to '{name}'")]
    Timeout { name: String, after: Duration },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("channel closed")]
    ChannelClosed,

    #[error("failed to encode or decode payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("message '{name}' declared twice with different payload types")]
    SchemaConflict { name: String },

    #[error("no channel between {from} and {to}")]
    NoRoute {
        from: crate::schema::Party,
        to: crate::schema::Party,
    },
}

impl Error {
    /// Whether the failure leaves the channel usable.
    ///
    /// Schema mismatches and transport failures are fatal to the channel;
    /// timeouts and remote domain errors are for the caller to handle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Remote(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
