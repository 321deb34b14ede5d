//! Tool handler trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::engine::ToolContext;

/// One validated invocation, as handed to a handler.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// A domain failure reported by a handler.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Executes tool calls.
///
/// This is the boundary between the invocation engine and side effects.
/// Handlers stream fragments through [`ToolContext::emit`] and should
/// return promptly once [`ToolContext::cancelled`] resolves.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn run(&self, invocation: ToolInvocation, ctx: ToolContext) -> Result<Value, HandlerError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolInvocation, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn run(&self, invocation: ToolInvocation, ctx: ToolContext) -> Result<Value, HandlerError> {
        (self.0)(invocation, ctx).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolInvocation, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
