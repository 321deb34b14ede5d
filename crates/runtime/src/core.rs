//! The core party: one channel to the IDE, one to the webview, one engine.

use std::sync::Arc;
use std::time::Duration;

use protocol::{
    CallTool, CancelToolCall, ConfigError, ConfigErrorNotice, DidChangeAvailableProfiles,
    DidChangeSelectedOrg, DidChangeSelectedProfile, ListTools, PROTOCOL_VERSION, Party,
    PartialOutput, Ping, Pong, ProfileDescription, Router, RouterConfig, SchemaRegistry,
    SelectedOrg, SelectedProfile, ToolCallPartialOutput, ToolCallRef, Transport,
};
use tools::{EngineConfig, PartialOutputSink, ToolEngine, ToolHandler, standard_registry};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ide::{DEFAULT_EXECUTE_TIMEOUT, IdeToolHandler};
use crate::profiles::ProfileState;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub router: RouterConfig,
    pub engine: EngineConfig,
    /// Window the IDE gets for one `tools/execute`.
    pub execute_timeout: Duration,
    pub profiles: Vec<ProfileDescription>,
    pub selected_profile: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            engine: EngineConfig::default(),
            execute_timeout: DEFAULT_EXECUTE_TIMEOUT,
            profiles: Vec::new(),
            selected_profile: None,
        }
    }
}

/// Serves the webview and the IDE, executing tool calls through the IDE.
///
/// When the webview channel closes every live call is cancelled and the IDE
/// channel is shut down. When the IDE channel closes live calls are
/// cancelled; the webview stays connected.
#[derive(Clone)]
pub struct CoreRuntime {
    ide: Router,
    webview: Router,
    engine: Arc<ToolEngine>,
    profiles: Arc<ProfileState>,
    cancel_grace: Duration,
}

impl CoreRuntime {
    /// Open both channels and register every handler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(ide: Transport, webview: Transport, config: RuntimeConfig) -> Result<Self> {
        let schemas = Arc::new(SchemaRegistry::standard()?);
        let ide = Router::spawn(
            ide,
            Arc::clone(&schemas),
            Party::Core,
            Party::Ide,
            config.router.clone(),
        )?;
        let webview = Router::spawn(
            webview,
            schemas,
            Party::Core,
            Party::Webview,
            config.router.clone(),
        )?;

        let handler: Arc<dyn ToolHandler> =
            Arc::new(IdeToolHandler::new(ide.clone(), config.execute_timeout));
        let sink: Arc<dyn PartialOutputSink> = Arc::new(webview.clone());
        let engine = Arc::new(ToolEngine::new(
            Arc::new(standard_registry(handler)?),
            sink,
            config.engine.clone(),
        ));

        let runtime = Self {
            ide,
            webview,
            engine,
            profiles: Arc::new(ProfileState::new(config.profiles, config.selected_profile)),
            cancel_grace: config.engine.cancel_grace,
        };

        runtime.serve_shared(&runtime.webview)?;
        runtime.serve_shared(&runtime.ide)?;
        runtime.serve_webview()?;
        runtime.serve_ide()?;
        runtime.watch_teardown();

        info!(tools = runtime.engine.registry().len(), "core runtime started");
        Ok(runtime)
    }

    pub fn ide(&self) -> &Router {
        &self.ide
    }

    pub fn webview(&self) -> &Router {
        &self.webview
    }

    pub fn engine(&self) -> &Arc<ToolEngine> {
        &self.engine
    }

    pub fn profiles(&self) -> &Arc<ProfileState> {
        &self.profiles
    }

    /// Replace the available profiles and tell the webview.
    pub fn set_profiles(&self, profiles: Vec<ProfileDescription>) -> Result<()> {
        let update = self.profiles.replace(profiles);
        self.webview.notify::<DidChangeAvailableProfiles>(update)?;
        Ok(())
    }

    /// Surface a configuration problem in the webview.
    pub fn report_config_error(&self, message: impl Into<String>) -> Result<()> {
        self.webview.notify::<ConfigError>(ConfigErrorNotice {
            message: message.into(),
        })?;
        Ok(())
    }

    /// Resolves once the webview channel is gone and teardown has finished.
    pub async fn closed(&self) {
        self.webview.closed().await;
        self.ide.closed().await;
    }

    pub fn shutdown(&self) {
        self.webview.shutdown();
    }

    /// Requests both surfaces may send.
    fn serve_shared(&self, router: &Router) -> Result<()> {
        router.on_request::<Ping, _, _>(|message| async move {
            Ok(Pong {
                message,
                protocol_version: PROTOCOL_VERSION,
            })
        })?;

        let engine = Arc::clone(&self.engine);
        router.on_request::<ListTools, _, _>(move |()| {
            let engine = Arc::clone(&engine);
            async move { Ok(engine.registry().definitions()) }
        })?;

        let engine = Arc::clone(&self.engine);
        router.on_request::<CallTool, _, _>(move |params| {
            let engine = Arc::clone(&engine);
            async move {
                engine.invoke(params).await.map_err(|e| {
                    debug!(error = %e, "tool call rejected");
                    e.to_remote()
                })
            }
        })?;

        let engine = Arc::clone(&self.engine);
        router.on_notify::<CancelToolCall, _, _>(move |target: ToolCallRef| {
            engine.cancel(&target.tool_call_id);
            async {}
        })?;

        Ok(())
    }

    fn serve_webview(&self) -> Result<()> {
        let profiles = Arc::clone(&self.profiles);
        let webview = self.webview.clone();
        self.webview
            .on_notify::<DidChangeSelectedProfile, _, _>(move |selected: SelectedProfile| {
                broadcast(&webview, profiles.select_profile(selected.id));
                async {}
            })?;

        let profiles = Arc::clone(&self.profiles);
        let webview = self.webview.clone();
        self.webview
            .on_notify::<DidChangeSelectedOrg, _, _>(move |org: SelectedOrg| {
                broadcast(&webview, profiles.select_org(org));
                async {}
            })?;

        Ok(())
    }

    fn serve_ide(&self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        self.ide
            .on_notify::<ToolCallPartialOutput, _, _>(move |partial: PartialOutput| {
                if let Err(e) = engine.append_partial(&partial.tool_call_id, partial.context_items)
                {
                    debug!(error = %e, "IDE progress ignored");
                }
                async {}
            })?;

        // Runs before pending `tools/execute` requests fail, so calls the
        // IDE was executing end Cancelled.
        let engine = Arc::downgrade(&self.engine);
        self.ide.on_close(move || {
            if let Some(engine) = engine.upgrade() {
                let cancelled = engine.cancel_all();
                if cancelled > 0 {
                    warn!(cancelled, "IDE disconnected, tool calls cancelled");
                }
            }
        });
        Ok(())
    }

    fn watch_teardown(&self) {
        let runtime = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = runtime.webview.closed() => {
                    info!("webview disconnected, shutting down");
                    runtime.cancel_and_drain().await;
                    runtime.ide.shutdown();
                }
                _ = runtime.ide.closed() => {
                    warn!("IDE disconnected");
                    runtime.cancel_and_drain().await;
                    runtime.webview.closed().await;
                }
            }
        });
    }

    /// Cancel every live call and wait for their handlers to wind down.
    async fn cancel_and_drain(&self) {
        let cancelled = self.engine.cancel_all();
        if self.engine.active().is_empty() {
            return;
        }
        debug!(cancelled, "waiting for cancelled calls");
        let drained = tokio::time::timeout(self.cancel_grace, async {
            while !self.engine.active().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.engine.active().len(),
                "tool calls still winding down"
            );
        }
    }
}

fn broadcast(webview: &Router, update: protocol::AvailableProfiles) {
    if let Err(e) = webview.notify::<DidChangeAvailableProfiles>(update) {
        warn!(error = %e, "profile update not delivered");
    }
}
