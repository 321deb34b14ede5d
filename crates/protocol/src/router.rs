//! Message router: typed request/response and notifications over one channel.
//!
//! A [`Router`] owns both halves of a [`Transport`]. A dispatch task reads
//! frames and either resolves a waiting request by its correlation id or
//! hands the message to the registered handler; a writer task drains an
//! ordered outbox so that sending never waits on the remote.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::envelope::{
    CorrelationId, Envelope, NotificationEnvelope, RemoteError, RequestEnvelope,
    ResponseEnvelope,
};
use crate::error::{Error, Result};
use crate::messages::{Notification, Request};
use crate::schema::{Direction, MessageKind, Party, SchemaRegistry};
use crate::transport::{FrameReader, FrameWriter, Transport};

/// Default window a request waits for its response.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub request_timeout: Duration,
    /// Tear the channel down when the remote sends a name outside the schema.
    pub close_on_unknown_message: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_TIMEOUT,
            close_on_unknown_message: true,
        }
    }
}

type RequestHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, RemoteError>> + Send + Sync>;
type NotificationHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;
type Waiter = oneshot::Sender<std::result::Result<Value, RemoteError>>;
type CloseHook = Box<dyn FnOnce() + Send>;

struct Inner {
    local: Party,
    remote: Party,
    outbound: Direction,
    inbound: Direction,
    registry: Arc<SchemaRegistry>,
    config: RouterConfig,
    outbox: mpsc::UnboundedSender<String>,
    pending: Mutex<HashMap<CorrelationId, Waiter>>,
    request_handlers: RwLock<HashMap<&'static str, RequestHandler>>,
    notification_handlers: RwLock<HashMap<&'static str, NotificationHandler>>,
    next_id: AtomicI64,
    closed: CancellationToken,
    /// Set by the first `close`; teardown runs once.
    closing: AtomicBool,
    close_hooks: Mutex<Vec<CloseHook>>,
    child: Mutex<Option<Child>>,
}

/// One end of a channel between two parties. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    /// Start routing over `transport` as `local`, talking to `remote`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        transport: Transport,
        registry: Arc<SchemaRegistry>,
        local: Party,
        remote: Party,
        config: RouterConfig,
    ) -> Result<Self> {
        let outbound =
            Direction::between(local, remote).ok_or(Error::NoRoute { from: local, to: remote })?;
        let (reader, writer, child) = transport.into_parts();
        let (outbox, queued) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        let inner = Arc::new(Inner {
            local,
            remote,
            outbound,
            inbound: outbound.reverse(),
            registry,
            config,
            outbox,
            pending: Mutex::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            closed: closed.clone(),
            closing: AtomicBool::new(false),
            close_hooks: Mutex::new(Vec::new()),
            child: Mutex::new(child),
        });

        tokio::spawn(write_loop(writer, queued, closed));
        tokio::spawn(dispatch_loop(Arc::clone(&inner), reader));

        info!(local = %local, remote = %remote, "channel open");
        Ok(Self { inner })
    }

    pub fn local(&self) -> Party {
        self.inner.local
    }

    pub fn remote(&self) -> Party {
        self.inner.remote
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.inner.registry
    }

    /// Send a request and wait for its response within the configured window.
    pub async fn request<M: Request>(&self, params: M::Params) -> Result<M::Result> {
        self.request_with_timeout::<M>(params, self.inner.config.request_timeout)
            .await
    }

    /// Send a request and wait at most `window` for its response.
    ///
    /// A timeout only releases this caller; a response arriving later is
    /// discarded.
    pub async fn request_with_timeout<M: Request>(
        &self,
        params: M::Params,
        window: Duration,
    ) -> Result<M::Result> {
        let inner = &self.inner;
        inner.expect_kind(inner.outbound, M::NAME, MessageKind::Request)?;

        let id = CorrelationId::Number(inner.next_id.fetch_add(1, Ordering::SeqCst));
        let envelope = RequestEnvelope::new(id.clone(), M::NAME, serde_json::to_value(params)?);

        let (tx, rx) = oneshot::channel();
        inner.pending.lock().insert(id.clone(), tx);
        if inner.closed.is_cancelled() {
            inner.pending.lock().remove(&id);
            return Err(Error::ChannelClosed);
        }
        if let Err(e) = inner.enqueue(&envelope) {
            inner.pending.lock().remove(&id);
            return Err(e);
        }
        trace!(id = %id, name = M::NAME, "request sent");

        let outcome = match timeout(window, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => return Err(Error::ChannelClosed),
            Err(_) => {
                inner.pending.lock().remove(&id);
                debug!(id = %id, name = M::NAME, "request timed out");
                return Err(Error::Timeout {
                    name: M::NAME.to_string(),
                    after: window,
                });
            }
        };

        let value = outcome?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a one-way message. Returns once it is queued for the transport.
    pub fn notify<N: Notification>(&self, params: N::Params) -> Result<()> {
        let inner = &self.inner;
        inner.expect_kind(inner.outbound, N::NAME, MessageKind::Notification)?;

        let envelope = NotificationEnvelope::new(N::NAME, serde_json::to_value(params)?);
        inner.enqueue(&envelope)?;
        trace!(name = N::NAME, "notification sent");
        Ok(())
    }

    /// Register the handler for requests named `M::NAME` from the remote.
    ///
    /// Each request runs on its own task. Re-registering replaces the
    /// previous handler.
    pub fn on_request<M, F, Fut>(&self, handler: F) -> Result<()>
    where
        M: Request,
        F: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<M::Result, RemoteError>> + Send + 'static,
    {
        let inner = &self.inner;
        inner.expect_kind(inner.inbound, M::NAME, MessageKind::Request)?;

        let handler = Arc::new(handler);
        let erased: RequestHandler = Arc::new(move |params: Value| {
            let handler = Arc::clone(&handler);
            async move {
                let params: M::Params = serde_json::from_value(params)
                    .map_err(|e| RemoteError::invalid_params(M::NAME, e))?;
                let result = handler(params).await?;
                serde_json::to_value(result).map_err(|e| RemoteError::internal(e.to_string()))
            }
            .boxed()
        });

        if inner.request_handlers.write().insert(M::NAME, erased).is_some() {
            debug!(name = M::NAME, "request handler replaced");
        }
        Ok(())
    }

    /// Register the handler for notifications named `N::NAME` from the remote.
    ///
    /// Notifications are handled one at a time in arrival order. A
    /// notification handler must not wait on a request over this same
    /// router: responses are read by the loop that is running it.
    pub fn on_notify<N, F, Fut>(&self, handler: F) -> Result<()>
    where
        N: Notification,
        F: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let inner = &self.inner;
        inner.expect_kind(inner.inbound, N::NAME, MessageKind::Notification)?;

        let handler = Arc::new(handler);
        let erased: NotificationHandler = Arc::new(move |params: Value| {
            let handler = Arc::clone(&handler);
            async move {
                match serde_json::from_value::<N::Params>(params) {
                    Ok(params) => handler(params).await,
                    Err(e) => warn!(name = N::NAME, error = %e, "dropping malformed notification"),
                }
            }
            .boxed()
        });

        if inner
            .notification_handlers
            .write()
            .insert(N::NAME, erased)
            .is_some()
        {
            debug!(name = N::NAME, "notification handler replaced");
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the channel is torn down, from either side.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    /// Run `hook` once when the channel closes, before waiting callers are
    /// released. Runs immediately if teardown has already begun.
    pub fn on_close(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.inner.close_hooks.lock();
        if !self.inner.closing.load(Ordering::SeqCst) {
            hooks.push(Box::new(hook));
            return;
        }
        drop(hooks);
        hook();
    }

    /// Close the channel. Queued frames are flushed; waiting callers fail
    /// with [`Error::ChannelClosed`].
    pub fn shutdown(&self) {
        self.inner.close();
    }

    /// Requests still waiting for a response.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().len()
    }
}

impl Inner {
    fn expect_kind(&self, direction: Direction, name: &str, kind: MessageKind) -> Result<()> {
        let spec = self.registry.lookup(direction, name)?;
        if spec.kind() != kind {
            return Err(Error::KindMismatch {
                direction,
                name: name.to_string(),
                declared: spec.kind().as_str(),
            });
        }
        Ok(())
    }

    fn enqueue<T: serde::Serialize>(&self, frame: &T) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(Error::ChannelClosed);
        }
        let line = serde_json::to_string(frame)?;
        self.outbox.send(line).map_err(|_| Error::ChannelClosed)
    }

    fn reply(&self, response: ResponseEnvelope) {
        if let Err(e) = self.enqueue(&response) {
            debug!(id = %response.id, error = %e, "response dropped");
        }
    }

    fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        for hook in hooks {
            hook();
        }
        self.closed.cancel();

        // Dropping the senders fails every waiting caller with ChannelClosed.
        let dropped = std::mem::take(&mut *self.pending.lock());
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "failing in-flight requests");
        }
        drop(self.child.lock().take());

        // Handlers often hold clones of their own router.
        self.request_handlers.write().clear();
        self.notification_handlers.write().clear();
        info!(local = %self.local, remote = %self.remote, "channel closed");
    }

    /// Route one inbound frame. Returns `false` when the channel must close.
    async fn dispatch(self: &Arc<Self>, frame: Value) -> bool {
        match Envelope::classify(frame) {
            Ok(Envelope::Response(response)) => {
                self.resolve(response);
                true
            }
            Ok(Envelope::Request(request)) => self.handle_request(request),
            Ok(Envelope::Notification(notification)) => {
                self.handle_notification(notification).await
            }
            Err(e) => {
                warn!(error = %e, "dropping unclassifiable frame");
                true
            }
        }
    }

    fn resolve(&self, response: ResponseEnvelope) {
        let waiter = self.pending.lock().remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response.into_result());
            }
            None => debug!(id = %response.id, "unsolicited response discarded"),
        }
    }

    fn handle_request(self: &Arc<Self>, request: RequestEnvelope) -> bool {
        let RequestEnvelope {
            id, method, params, ..
        } = request;

        let spec = match self.registry.lookup(self.inbound, &method) {
            Ok(spec) => spec,
            Err(_) => {
                warn!(name = %method, direction = %self.inbound, "unknown request");
                self.reply(ResponseEnvelope::failure(
                    id,
                    RemoteError::unknown_message(&method),
                ));
                return !self.config.close_on_unknown_message;
            }
        };

        if spec.kind() != MessageKind::Request {
            self.reply(ResponseEnvelope::failure(
                id,
                RemoteError::new(
                    RemoteError::INVALID_REQUEST,
                    format!("{method} is a notification"),
                ),
            ));
            return true;
        }

        let params = params.unwrap_or(Value::Null);
        if let Err(reason) = spec.check_params(&params) {
            self.reply(ResponseEnvelope::failure(
                id,
                RemoteError::invalid_params(&method, reason),
            ));
            return true;
        }

        let handler = self.request_handlers.read().get(method.as_str()).cloned();
        let Some(handler) = handler else {
            self.reply(ResponseEnvelope::failure(
                id,
                RemoteError::new(RemoteError::NO_HANDLER, format!("no handler for {method}")),
            ));
            return true;
        };

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler(params)).catch_unwind().await;
            let response = match outcome {
                Ok(Ok(result)) => ResponseEnvelope::success(id, result),
                Ok(Err(error)) => ResponseEnvelope::failure(id, error),
                Err(_) => {
                    warn!(name = %method, "request handler panicked");
                    ResponseEnvelope::failure(
                        id,
                        RemoteError::internal(format!("handler for {method} panicked")),
                    )
                }
            };
            inner.reply(response);
        });
        true
    }

    async fn handle_notification(&self, notification: NotificationEnvelope) -> bool {
        let NotificationEnvelope { method, params, .. } = notification;

        let spec = match self.registry.lookup(self.inbound, &method) {
            Ok(spec) => spec,
            Err(_) => {
                warn!(name = %method, direction = %self.inbound, "unknown notification");
                return !self.config.close_on_unknown_message;
            }
        };

        if spec.kind() != MessageKind::Notification {
            warn!(name = %method, "request sent without an id, dropping");
            return true;
        }

        let params = params.unwrap_or(Value::Null);
        if let Err(reason) = spec.check_params(&params) {
            warn!(name = %method, %reason, "dropping malformed notification");
            return true;
        }

        let handler = self
            .notification_handlers
            .read()
            .get(method.as_str())
            .cloned();
        match handler {
            Some(handler) => handler(params).await,
            None => debug!(name = %method, "no handler, notification dropped"),
        }
        true
    }
}

async fn dispatch_loop(inner: Arc<Inner>, mut reader: FrameReader) {
    loop {
        let frame = tokio::select! {
            _ = inner.closed.cancelled() => break,
            frame = reader.next_frame() => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                if !inner.dispatch(frame).await {
                    warn!(remote = %inner.remote, "protocol mismatch, closing channel");
                    break;
                }
            }
            Ok(None) => {
                debug!(remote = %inner.remote, "remote closed the channel");
                break;
            }
            Err(Error::Serialize(e)) => {
                warn!(error = %e, "dropping malformed frame");
            }
            Err(e) => {
                warn!(error = %e, "transport failed");
                break;
            }
        }
    }
    inner.close();
}

async fn write_loop(
    mut writer: FrameWriter,
    mut queued: mpsc::UnboundedReceiver<String>,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            line = queued.recv() => {
                let Some(line) = line else { break };
                if let Err(e) = writer.send_line(&line).await {
                    warn!(error = %e, "write failed");
                    closed.cancel();
                    return;
                }
            }
            _ = closed.cancelled() => {
                while let Ok(line) = queued.try_recv() {
                    if writer.send_line(&line).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{
        CallTool, CallToolParams, ConfigError, ConfigErrorNotice, ContextItem, ExecuteTool,
        ExecuteToolParams, ListTools, PROTOCOL_VERSION, PartialOutput, Ping, Pong,
        ToolCallPartialOutput, ToolDefinition,
    };
    use serde_json::json;

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry::standard().unwrap())
    }

    fn connect(local: Party, remote: Party) -> (Router, Router) {
        let registry = registry();
        let (left, right) = Transport::pair();
        let near = Router::spawn(left, registry.clone(), local, remote, RouterConfig::default())
            .unwrap();
        let far = Router::spawn(right, registry, remote, local, RouterConfig::default()).unwrap();
        (near, far)
    }

    /// A router facing a scripted peer that speaks raw frames.
    fn scripted(local: Party, remote: Party, config: RouterConfig) -> (Router, FrameReader, FrameWriter) {
        let (left, right) = Transport::pair();
        let router = Router::spawn(left, registry(), local, remote, config).unwrap();
        let (reader, writer, _) = right.into_parts();
        (router, reader, writer)
    }

    fn explode() -> Vec<ToolDefinition> {
        panic!("boom")
    }

    fn pong(message: &str) -> Pong {
        Pong {
            message: message.to_string(),
            protocol_version: PROTOCOL_VERSION,
        }
    }

    #[tokio::test]
    async fn request_round_trip() {
        let (core, webview) = connect(Party::Core, Party::Webview);
        core.on_request::<Ping, _, _>(|message| async move { Ok(pong(&message)) })
            .unwrap();

        let reply = webview.request::<Ping>("hello".into()).await.unwrap();
        assert_eq!(reply, pong("hello"));
        assert_eq!(webview.in_flight(), 0);
    }

    #[tokio::test]
    async fn responses_matched_by_correlation_id_not_arrival_order() {
        let (core, mut ide_reader, mut ide_writer) =
            scripted(Party::Core, Party::Ide, RouterConfig::default());

        let calls: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|message| {
                let core = core.clone();
                tokio::spawn(async move { core.request::<Ping>(message.to_string()).await })
            })
            .collect();

        let mut received = Vec::new();
        for _ in 0..3 {
            received.push(ide_reader.next_frame().await.unwrap().unwrap());
        }
        // Answer in reverse order of arrival.
        for frame in received.iter().rev() {
            let response = json!({
                "jsonrpc": "2.0",
                "id": frame["id"],
                "result": {"message": frame["params"], "protocolVersion": 1},
            });
            ide_writer.send(&response).await.unwrap();
        }

        for (call, expected) in calls.into_iter().zip(["a", "b", "c"]) {
            assert_eq!(call.await.unwrap().unwrap(), pong(expected));
        }
    }

    #[tokio::test]
    async fn timeout_releases_caller_and_late_response_is_discarded() {
        let (core, mut ide_reader, mut ide_writer) =
            scripted(Party::Core, Party::Ide, RouterConfig::default());

        let err = core
            .request_with_timeout::<Ping>("slow".into(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout { ref name, .. } if name == "ping"));
        assert!(err.is_recoverable());
        assert_eq!(core.in_flight(), 0);

        let late = ide_reader.next_frame().await.unwrap().unwrap();
        ide_writer
            .send(&json!({"jsonrpc": "2.0", "id": late["id"], "result": {"message": "slow", "protocolVersion": 1}}))
            .await
            .unwrap();

        // The channel survives: a fresh request still resolves.
        let next = {
            let core = core.clone();
            tokio::spawn(async move { core.request::<Ping>("again".into()).await })
        };
        let frame = ide_reader.next_frame().await.unwrap().unwrap();
        assert_ne!(frame["id"], late["id"]);
        ide_writer
            .send(&json!({"jsonrpc": "2.0", "id": frame["id"], "result": {"message": "again", "protocolVersion": 1}}))
            .await
            .unwrap();
        assert_eq!(next.await.unwrap().unwrap(), pong("again"));
        assert!(!core.is_closed());
    }

    #[tokio::test]
    async fn remote_error_is_structured() {
        let (core, webview) = connect(Party::Core, Party::Webview);
        core.on_request::<CallTool, _, _>(|params: CallToolParams| async move {
            Err(RemoteError::new(RemoteError::UNKNOWN_TOOL, "unknown tool")
                .with_data(json!({"toolName": params.tool_name})))
        })
        .unwrap();

        let err = webview
            .request::<CallTool>(CallToolParams {
                tool_call_id: None,
                tool_name: "nope".into(),
                arguments: json!({}),
            })
            .await
            .unwrap_err();
        let Error::Remote(remote) = err else {
            panic!("expected remote error, got {err:?}");
        };
        assert_eq!(remote.code, RemoteError::UNKNOWN_TOOL);
        assert_eq!(remote.data, Some(json!({"toolName": "nope"})));
    }

    #[tokio::test]
    async fn sending_undeclared_name_fails_locally() {
        let (_core, webview) = connect(Party::Core, Party::Webview);
        let err = webview
            .request::<ExecuteTool>(ExecuteToolParams {
                tool_call_id: "c".into(),
                tool_name: "read-file".into(),
                arguments: json!({}),
            })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownMessage { direction: Direction::WebviewToCore, .. }
        ));
        assert!(!err.is_recoverable());

        let err = webview
            .on_request::<ListTools, _, _>(|_| async { Ok(vec![]) })
            .unwrap_err();
        assert!(matches!(err, Error::UnknownMessage { direction: Direction::CoreToWebview, .. }));
    }

    #[tokio::test]
    async fn unknown_inbound_request_is_answered_then_channel_closes() {
        let (core, mut reader, mut writer) =
            scripted(Party::Core, Party::Webview, RouterConfig::default());

        writer
            .send(&json!({"jsonrpc": "2.0", "id": 9, "method": "bogus"}))
            .await
            .unwrap();
        let reply = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(reply["id"], 9);
        assert_eq!(reply["error"]["code"], RemoteError::UNKNOWN_MESSAGE);

        core.closed().await;
        assert!(core.is_closed());
        assert!(matches!(
            core.notify::<ConfigError>(ConfigErrorNotice { message: "x".into() }),
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn unknown_inbound_tolerated_when_configured() {
        let config = RouterConfig {
            close_on_unknown_message: false,
            ..RouterConfig::default()
        };
        let (core, mut reader, mut writer) = scripted(Party::Core, Party::Webview, config);
        core.on_request::<Ping, _, _>(|message| async move { Ok(pong(&message)) })
            .unwrap();

        writer
            .send(&json!({"jsonrpc": "2.0", "method": "bogus/notify"}))
            .await
            .unwrap();
        writer
            .send(&json!({"jsonrpc": "2.0", "id": "x", "method": "ping", "params": "still here"}))
            .await
            .unwrap();
        let reply = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(reply["id"], "x");
        assert_eq!(reply["result"]["message"], "still here");
        assert!(!core.is_closed());
    }

    #[tokio::test]
    async fn malformed_params_rejected_before_handler() {
        let (core, mut reader, mut writer) =
            scripted(Party::Core, Party::Webview, RouterConfig::default());
        core.on_request::<CallTool, _, _>(|_| async {
            Err(RemoteError::internal("handler must not run"))
        })
        .unwrap();

        writer
            .send(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/call", "params": {"toolName": 5}}))
            .await
            .unwrap();
        let reply = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(reply["error"]["code"], RemoteError::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn missing_handler_and_panicking_handler() {
        let (core, mut reader, mut writer) =
            scripted(Party::Core, Party::Webview, RouterConfig::default());

        writer
            .send(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
            .await
            .unwrap();
        let reply = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(reply["error"]["code"], RemoteError::NO_HANDLER);

        core.on_request::<ListTools, _, _>(|_| async { Ok(explode()) })
            .unwrap();
        writer
            .send(&json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}))
            .await
            .unwrap();
        let reply = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["error"]["code"], RemoteError::INTERNAL);
        assert!(!core.is_closed());
    }

    #[tokio::test]
    async fn notifications_arrive_in_send_order() {
        let (core, webview) = connect(Party::Core, Party::Webview);
        let (tx, mut rx) = mpsc::unbounded_channel();
        webview
            .on_notify::<ToolCallPartialOutput, _, _>(move |partial: PartialOutput| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(partial.context_items);
                }
            })
            .unwrap();

        for n in 0..50 {
            core.notify::<ToolCallPartialOutput>(PartialOutput {
                tool_call_id: "call".into(),
                context_items: vec![ContextItem::text(n.to_string())],
            })
            .unwrap();
        }

        for n in 0..50 {
            let items = rx.recv().await.unwrap();
            assert_eq!(items, vec![ContextItem::text(n.to_string())]);
        }
    }

    #[tokio::test]
    async fn teardown_fails_waiting_callers() {
        let (core, reader, writer) = scripted(Party::Core, Party::Ide, RouterConfig::default());

        let call = {
            let core = core.clone();
            tokio::spawn(async move { core.request::<Ping>("anyone?".into()).await })
        };
        tokio::task::yield_now().await;
        drop((reader, writer));

        assert!(matches!(call.await.unwrap(), Err(Error::ChannelClosed)));
        core.closed().await;
        assert!(matches!(
            core.request::<Ping>("late".into()).await,
            Err(Error::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn close_hooks_run_before_waiters_are_released() {
        let (core, _reader, _writer) = scripted(Party::Core, Party::Ide, RouterConfig::default());
        let (seen_tx, seen_rx) = oneshot::channel();
        let observer = core.clone();
        core.on_close(move || {
            let _ = seen_tx.send(observer.in_flight());
        });

        let call = {
            let core = core.clone();
            tokio::spawn(async move { core.request::<Ping>("pending".into()).await })
        };
        while core.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        core.shutdown();

        assert_eq!(seen_rx.await.unwrap(), 1);
        assert!(matches!(call.await.unwrap(), Err(Error::ChannelClosed)));

        let (late_tx, late_rx) = oneshot::channel();
        core.on_close(move || {
            let _ = late_tx.send(());
        });
        assert!(late_rx.await.is_ok());
    }

    #[tokio::test]
    async fn write_failure_runs_full_teardown() {
        let (inbound, _remote_writer) = tokio::io::duplex(1024);
        let (outbound, remote_reader) = tokio::io::duplex(1024);
        drop(remote_reader);
        let core = Router::spawn(
            Transport::new(inbound, outbound),
            registry(),
            Party::Core,
            Party::Webview,
            RouterConfig::default(),
        )
        .unwrap();

        // The handler keeps its own router alive until teardown drops it.
        let (guard, released) = oneshot::channel::<()>();
        let this = core.clone();
        core.on_request::<Ping, _, _>(move |message| {
            let _held = (&guard, &this);
            async move { Ok(pong(&message)) }
        })
        .unwrap();
        let (hook_tx, hook_ran) = oneshot::channel();
        core.on_close(move || {
            let _ = hook_tx.send(());
        });

        core.notify::<ConfigError>(ConfigErrorNotice { message: "x".into() })
            .unwrap();
        core.closed().await;
        hook_ran.await.unwrap();
        let released = tokio::time::timeout(Duration::from_secs(1), released).await;
        assert!(matches!(released, Ok(Err(_))));
    }

    #[tokio::test]
    async fn handler_reregistration_replaces() {
        let (core, webview) = connect(Party::Core, Party::Webview);
        core.on_request::<Ping, _, _>(|_| async { Ok(pong("first")) })
            .unwrap();
        core.on_request::<Ping, _, _>(|_| async { Ok(pong("second")) })
            .unwrap();
        assert_eq!(
            webview.request::<Ping>(String::new()).await.unwrap(),
            pong("second")
        );
    }

    #[test]
    fn parties_without_a_channel() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (left, _right) = Transport::pair();
            let err = Router::spawn(left, registry(), Party::Ide, Party::Webview, RouterConfig::default())
                .err()
                .unwrap();
            assert!(matches!(err, Error::NoRoute { .. }));
        });
    }
}
