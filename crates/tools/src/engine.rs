//! Tool invocation engine.
//!
//! Resolves a call against the registry, validates its arguments, runs the
//! handler on its own task and drives the call through
//! `Pending -> Running -> {Succeeded, Failed, Cancelled}`. Partial output is
//! accumulated per call and forwarded to a [`PartialOutputSink`] in append
//! order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use protocol::{
    CallToolParams, ContextItem, FailureKind, ToolCallResult, ToolFailure, ToolOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ToolError};
use crate::handler::{HandlerError, ToolInvocation};
use crate::registry::ToolRegistry;
use crate::sink::PartialOutputSink;

/// Default time a cancelled handler gets to return before it is aborted.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ToolCallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallState::Succeeded | ToolCallState::Failed | ToolCallState::Cancelled
        )
    }

    pub fn can_transition(self, to: ToolCallState) -> bool {
        matches!(
            (self, to),
            (ToolCallState::Pending, ToolCallState::Running)
                | (
                    ToolCallState::Running,
                    ToolCallState::Succeeded | ToolCallState::Failed | ToolCallState::Cancelled
                )
        )
    }

    pub fn transition(self, to: ToolCallState) -> Result<ToolCallState> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ToolError::InvalidTransition { from: self, to })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ToolCallState::Pending => "pending",
            ToolCallState::Running => "running",
            ToolCallState::Succeeded => "succeeded",
            ToolCallState::Failed => "failed",
            ToolCallState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Overall limit for one call. `None` lets handlers run indefinitely.
    pub call_timeout: Option<Duration>,
    pub cancel_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Point-in-time view of one live call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSnapshot {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolCallState,
    pub context_items: Vec<ContextItem>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct Accumulator {
    state: ToolCallState,
    items: Vec<ContextItem>,
    finished_at: Option<DateTime<Utc>>,
}

/// One call's state and partial output. Shared by the engine and the
/// handler's [`ToolContext`].
struct CallEntry {
    tool_call_id: String,
    tool_name: String,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
    acc: Mutex<Accumulator>,
}

impl CallEntry {
    fn new(tool_call_id: String, tool_name: String) -> Self {
        Self {
            tool_call_id,
            tool_name,
            started_at: Utc::now(),
            cancel: CancellationToken::new(),
            acc: Mutex::new(Accumulator {
                state: ToolCallState::Pending,
                items: Vec::new(),
                finished_at: None,
            }),
        }
    }

    fn state(&self) -> ToolCallState {
        self.acc.lock().state
    }

    fn transition(&self, to: ToolCallState) -> Result<()> {
        let mut acc = self.acc.lock();
        acc.state = acc.state.transition(to)?;
        if to.is_terminal() {
            acc.finished_at = Some(Utc::now());
        }
        debug!(tool_call_id = %self.tool_call_id, state = %to, "tool call transition");
        Ok(())
    }

    /// Append and publish under one lock so the sink sees accumulator order.
    fn append(&self, items: Vec<ContextItem>, sink: &dyn PartialOutputSink) -> Result<()> {
        let mut acc = self.acc.lock();
        if acc.state != ToolCallState::Running {
            debug!(
                tool_call_id = %self.tool_call_id,
                state = %acc.state,
                "partial output rejected"
            );
            return Err(ToolError::CallClosed {
                tool_call_id: self.tool_call_id.clone(),
                state: acc.state,
            });
        }
        if items.is_empty() {
            return Ok(());
        }
        sink.publish(&self.tool_call_id, &items);
        acc.items.extend(items);
        Ok(())
    }

    fn snapshot(&self) -> ToolCallSnapshot {
        let acc = self.acc.lock();
        ToolCallSnapshot {
            tool_call_id: self.tool_call_id.clone(),
            tool_name: self.tool_name.clone(),
            state: acc.state,
            context_items: acc.items.clone(),
            started_at: self.started_at,
            finished_at: acc.finished_at,
        }
    }

    fn items(&self) -> Vec<ContextItem> {
        self.acc.lock().items.clone()
    }
}

/// Handle given to a running handler.
#[derive(Clone)]
pub struct ToolContext {
    entry: Arc<CallEntry>,
    sink: Arc<dyn PartialOutputSink>,
}

impl ToolContext {
    pub fn tool_call_id(&self) -> &str {
        &self.entry.tool_call_id
    }

    pub fn tool_name(&self) -> &str {
        &self.entry.tool_name
    }

    /// Append one fragment to the call's output. Fails once the call has
    /// ended.
    pub fn emit(&self, item: ContextItem) -> Result<()> {
        self.entry.append(vec![item], self.sink.as_ref())
    }

    pub fn emit_all(&self, items: Vec<ContextItem>) -> Result<()> {
        self.entry.append(items, self.sink.as_ref())
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.cancel.is_cancelled()
    }

    /// Resolves once the call is cancelled or timed out.
    pub async fn cancelled(&self) {
        self.entry.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.entry.cancel.clone()
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("tool_call_id", &self.entry.tool_call_id)
            .field("tool_name", &self.entry.tool_name)
            .finish_non_exhaustive()
    }
}

enum Finished {
    Joined(std::result::Result<std::result::Result<Value, HandlerError>, JoinError>),
    Cancelled,
    TimedOut(Duration),
}

pub struct ToolEngine {
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn PartialOutputSink>,
    config: EngineConfig,
    calls: Mutex<HashMap<String, Arc<CallEntry>>>,
}

impl ToolEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        sink: Arc<dyn PartialOutputSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run one tool call to its terminal outcome.
    ///
    /// Unknown tools, schema violations and ids already in use are rejected
    /// before the call exists. Everything that happens after the handler
    /// starts, including panics and timeouts, is reported in the returned
    /// [`ToolCallResult`].
    pub async fn invoke(&self, params: CallToolParams) -> Result<ToolCallResult> {
        let tool = self.registry.resolve(&params.tool_name)?;
        tool.validate(&params.arguments)?;

        let tool_call_id = params
            .tool_call_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let entry = Arc::new(CallEntry::new(
            tool_call_id.clone(),
            params.tool_name.clone(),
        ));
        entry.transition(ToolCallState::Running)?;

        {
            let mut calls = self.calls.lock();
            if calls.contains_key(&tool_call_id) {
                return Err(ToolError::DuplicateCallId(tool_call_id));
            }
            calls.insert(tool_call_id.clone(), Arc::clone(&entry));
        }
        info!(tool_call_id = %tool_call_id, tool = %params.tool_name, "tool call started");

        let handler = tool.handler();
        let invocation = ToolInvocation {
            tool_call_id: tool_call_id.clone(),
            tool_name: params.tool_name.clone(),
            arguments: params.arguments,
        };
        let ctx = ToolContext {
            entry: Arc::clone(&entry),
            sink: Arc::clone(&self.sink),
        };
        let task = tokio::spawn(async move { handler.run(invocation, ctx).await });

        let outcome = self.supervise(&entry, task).await;
        self.calls.lock().remove(&tool_call_id);

        info!(
            tool_call_id = %tool_call_id,
            state = %entry.state(),
            "tool call finished"
        );
        Ok(ToolCallResult {
            tool_call_id,
            tool_name: params.tool_name,
            outcome,
            context_items: entry.items(),
        })
    }

    async fn supervise(
        &self,
        entry: &CallEntry,
        mut task: JoinHandle<std::result::Result<Value, HandlerError>>,
    ) -> ToolOutcome {
        let finished = tokio::select! {
            joined = &mut task => Finished::Joined(joined),
            _ = entry.cancel.cancelled() => Finished::Cancelled,
            window = deadline(self.config.call_timeout) => Finished::TimedOut(window),
        };

        let outcome = match finished {
            Finished::Joined(Ok(Ok(output))) => ToolOutcome::Succeeded { output },
            Finished::Joined(Ok(Err(e))) => ToolOutcome::Failed {
                error: ToolFailure {
                    kind: FailureKind::Handler,
                    message: e.message,
                    details: e.details,
                },
            },
            Finished::Joined(Err(e)) if e.is_panic() => {
                warn!(tool_call_id = %entry.tool_call_id, "tool handler panicked");
                ToolOutcome::Failed {
                    error: ToolFailure::new(FailureKind::Panicked, panic_message(e)),
                }
            }
            Finished::Joined(Err(_)) => ToolOutcome::Cancelled,
            Finished::Cancelled => {
                self.wind_down(entry, task).await;
                ToolOutcome::Cancelled
            }
            Finished::TimedOut(window) => {
                warn!(tool_call_id = %entry.tool_call_id, ?window, "tool call timed out");
                // Closed before winding down so late output is refused.
                let failed = entry.transition(ToolCallState::Failed).is_ok();
                entry.cancel.cancel();
                self.wind_down(entry, task).await;
                return if failed {
                    ToolOutcome::Failed {
                        error: ToolFailure::new(
                            FailureKind::Timeout,
                            format!("tool call timed out after {}ms", window.as_millis()),
                        ),
                    }
                } else {
                    ToolOutcome::Cancelled
                };
            }
        };

        // A concurrent cancel may already have closed the call.
        let target = match &outcome {
            ToolOutcome::Succeeded { .. } => ToolCallState::Succeeded,
            ToolOutcome::Failed { .. } => ToolCallState::Failed,
            ToolOutcome::Cancelled => ToolCallState::Cancelled,
        };
        match entry.transition(target) {
            Ok(()) => outcome,
            Err(_) if entry.state() == ToolCallState::Cancelled => ToolOutcome::Cancelled,
            Err(e) => {
                warn!(tool_call_id = %entry.tool_call_id, error = %e, "unexpected transition");
                outcome
            }
        }
    }

    /// Give a signalled handler `cancel_grace` to return, then abort it.
    async fn wind_down(
        &self,
        entry: &CallEntry,
        mut task: JoinHandle<std::result::Result<Value, HandlerError>>,
    ) {
        if tokio::time::timeout(self.config.cancel_grace, &mut task)
            .await
            .is_err()
        {
            debug!(tool_call_id = %entry.tool_call_id, "aborting unresponsive handler");
            task.abort();
        }
    }

    /// Request cancellation of a running call.
    ///
    /// The call moves to Cancelled immediately and accepts no further
    /// output; its handler is signalled to stop. Returns `false` if no live
    /// call has this id or it already reached a terminal state.
    pub fn cancel(&self, tool_call_id: &str) -> bool {
        let Some(entry) = self.calls.lock().get(tool_call_id).cloned() else {
            debug!(tool_call_id, "cancel for unknown or finished call");
            return false;
        };
        let closed = entry.transition(ToolCallState::Cancelled).is_ok();
        entry.cancel.cancel();
        if closed {
            info!(tool_call_id, "tool call cancelled");
        }
        closed
    }

    /// Cancel every live call. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<String> = self.calls.lock().keys().cloned().collect();
        ids.iter().filter(|id| self.cancel(id)).count()
    }

    /// Append progress reported from outside the handler (for example by
    /// the IDE executing the call).
    pub fn append_partial(&self, tool_call_id: &str, items: Vec<ContextItem>) -> Result<()> {
        let entry = self.calls.lock().get(tool_call_id).cloned();
        match entry {
            Some(entry) => entry.append(items, self.sink.as_ref()),
            None => Err(ToolError::UnknownCall(tool_call_id.to_string())),
        }
    }

    pub fn snapshot(&self, tool_call_id: &str) -> Option<ToolCallSnapshot> {
        self.calls
            .lock()
            .get(tool_call_id)
            .map(|entry| entry.snapshot())
    }

    /// Ids of every live call.
    pub fn active(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.calls.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for ToolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolEngine")
            .field("tools", &self.registry.len())
            .field("active", &self.calls.lock().len())
            .field("config", &self.config)
            .finish()
    }
}

async fn deadline(window: Option<Duration>) -> Duration {
    match window {
        Some(window) => {
            tokio::time::sleep(window).await;
            window
        }
        None => std::future::pending().await,
    }
}

fn panic_message(error: JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("tool handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("tool handler panicked: {message}")
    } else {
        "tool handler panicked".to_string()
    }
}
