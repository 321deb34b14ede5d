//! Drives a core runtime with scripted IDE and webview peers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use protocol::{
    AvailableProfiles, CallTool, CallToolParams, CancelToolCall, ConfigError, ContextItem,
    DidChangeAvailableProfiles, DidChangeSelectedOrg, DidChangeSelectedProfile, ExecuteTool,
    ExecuteToolParams, FailureKind, ListTools, PROTOCOL_VERSION, Party, PartialOutput, Ping,
    ProfileDescription, RemoteError, Router, RouterConfig, SchemaRegistry, SelectedOrg,
    SelectedProfile, ToolCallPartialOutput, ToolCallRef, ToolOutcome, Transport,
};
use runtime::{CoreRuntime, RuntimeConfig};
use serde_json::{Value, json};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

struct Harness {
    core: CoreRuntime,
    ide: Router,
    webview: Router,
    partials: UnboundedReceiver<PartialOutput>,
    profiles: UnboundedReceiver<AvailableProfiles>,
    config_errors: UnboundedReceiver<String>,
    ide_cancels: UnboundedReceiver<String>,
}

fn start(config: RuntimeConfig) -> Harness {
    let schemas = Arc::new(SchemaRegistry::standard().unwrap());
    let (core_ide, ide_end) = Transport::pair();
    let (core_webview, webview_end) = Transport::pair();

    let core = CoreRuntime::start(core_ide, core_webview, config).unwrap();
    let ide = Router::spawn(
        ide_end,
        schemas.clone(),
        Party::Ide,
        Party::Core,
        RouterConfig::default(),
    )
    .unwrap();
    let webview = Router::spawn(
        webview_end,
        schemas,
        Party::Webview,
        Party::Core,
        RouterConfig::default(),
    )
    .unwrap();

    let (tx, partials) = unbounded_channel();
    webview
        .on_notify::<ToolCallPartialOutput, _, _>(move |partial| {
            tx.send(partial).ok();
            async {}
        })
        .unwrap();

    let (tx, profiles) = unbounded_channel();
    webview
        .on_notify::<DidChangeAvailableProfiles, _, _>(move |update| {
            tx.send(update).ok();
            async {}
        })
        .unwrap();

    let (tx, config_errors) = unbounded_channel();
    webview
        .on_notify::<ConfigError, _, _>(move |notice| {
            tx.send(notice.message).ok();
            async {}
        })
        .unwrap();

    let (tx, ide_cancels) = unbounded_channel();
    ide.on_notify::<CancelToolCall, _, _>(move |target: ToolCallRef| {
        tx.send(target.tool_call_id).ok();
        async {}
    })
    .unwrap();

    Harness {
        core,
        ide,
        webview,
        partials,
        profiles,
        config_errors,
        ide_cancels,
    }
}

async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}

fn call(id: &str, tool: &str, arguments: Value) -> CallToolParams {
    CallToolParams {
        tool_call_id: Some(id.to_string()),
        tool_name: tool.to_string(),
        arguments,
    }
}

/// IDE that never finishes, reporting each started call id.
fn stalling_ide(h: &Harness) -> UnboundedReceiver<String> {
    let (tx, started) = unbounded_channel();
    h.ide
        .on_request::<ExecuteTool, _, _>(move |params: ExecuteToolParams| {
            let tx = tx.clone();
            async move {
                tx.send(params.tool_call_id).ok();
                std::future::pending::<()>().await;
                Ok::<Value, RemoteError>(Value::Null)
            }
        })
        .unwrap();
    started
}

#[tokio::test]
async fn ping_from_both_surfaces() {
    let h = start(RuntimeConfig::default());

    let pong = within(h.webview.request::<Ping>("hello".into())).await.unwrap();
    assert_eq!(pong.message, "hello");
    assert_eq!(pong.protocol_version, PROTOCOL_VERSION);

    let pong = within(h.ide.request::<Ping>("ide".into())).await.unwrap();
    assert_eq!(pong.message, "ide");
}

#[tokio::test]
async fn lists_builtin_catalog_in_order() {
    let h = start(RuntimeConfig::default());

    let tools = within(h.webview.request::<ListTools>(())).await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names.len(), 10);
    assert_eq!(names.first(), Some(&"read-file"));
    assert_eq!(names.last(), Some(&"read-currently-open-file"));
}

#[tokio::test]
async fn read_file_streams_through_to_webview() {
    let mut h = start(RuntimeConfig::default());

    let ide = h.ide.clone();
    h.ide
        .on_request::<ExecuteTool, _, _>(move |params: ExecuteToolParams| {
            let ide = ide.clone();
            async move {
                assert_eq!(params.tool_name, "read-file");
                assert_eq!(params.arguments, json!({"path": "a.txt"}));
                ide.notify::<ToolCallPartialOutput>(PartialOutput {
                    tool_call_id: params.tool_call_id,
                    context_items: vec![ContextItem::text("line1")],
                })
                .map_err(|e| RemoteError::internal(e.to_string()))?;
                Ok::<_, RemoteError>(json!({"content": "line1\n"}))
            }
        })
        .unwrap();

    let result = within(
        h.webview
            .request::<CallTool>(call("call-1", "read-file", json!({"path": "a.txt"}))),
    )
    .await
    .unwrap();

    assert_eq!(result.tool_call_id, "call-1");
    assert_eq!(
        result.outcome,
        ToolOutcome::Succeeded {
            output: json!({"content": "line1\n"})
        }
    );
    assert_eq!(result.context_items, vec![ContextItem::text("line1")]);

    let partial = h.partials.try_recv().unwrap();
    assert_eq!(partial.tool_call_id, "call-1");
    assert_eq!(partial.context_items, vec![ContextItem::text("line1")]);
    assert!(h.core.engine().active().is_empty());
}

#[tokio::test]
async fn malformed_call_never_reaches_ide() {
    let h = start(RuntimeConfig::default());

    let executed = Arc::new(AtomicUsize::new(0));
    let counter = executed.clone();
    h.ide
        .on_request::<ExecuteTool, _, _>(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<Value, RemoteError>(Value::Null) }
        })
        .unwrap();

    let err = within(
        h.webview
            .request::<CallTool>(call("call-1", "edit-file", json!({"path": "a.rs"}))),
    )
    .await
    .unwrap_err();
    let protocol::Error::Remote(remote) = err else {
        panic!("expected remote error, got {err}");
    };
    assert_eq!(remote.code, RemoteError::INVALID_ARGUMENTS);

    let err = within(h.webview.request::<CallTool>(call("call-2", "rm-rf", json!({}))))
        .await
        .unwrap_err();
    assert!(matches!(err, protocol::Error::Remote(e) if e.code == RemoteError::UNKNOWN_TOOL));

    assert_eq!(executed.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ide_error_becomes_failed_outcome() {
    let h = start(RuntimeConfig::default());
    h.ide
        .on_request::<ExecuteTool, _, _>(|_| async {
            Err::<Value, _>(RemoteError::new(1, "file not found: a.txt"))
        })
        .unwrap();

    let result = within(
        h.webview
            .request::<CallTool>(call("call-1", "read-file", json!({"path": "a.txt"}))),
    )
    .await
    .unwrap();

    let ToolOutcome::Failed { error } = result.outcome else {
        panic!("expected failure");
    };
    assert_eq!(error.kind, FailureKind::Handler);
    assert_eq!(error.message, "file not found: a.txt");
}

#[tokio::test]
async fn webview_cancel_is_forwarded_to_ide() {
    let mut h = start(RuntimeConfig::default());
    let mut started = stalling_ide(&h);

    let webview = h.webview.clone();
    let running = tokio::spawn(async move {
        webview
            .request::<CallTool>(call("call-1", "run-terminal-command", json!({"command": "sleep 60"})))
            .await
    });

    assert_eq!(within(started.recv()).await.as_deref(), Some("call-1"));
    h.webview
        .notify::<CancelToolCall>(ToolCallRef {
            tool_call_id: "call-1".into(),
        })
        .unwrap();

    let result = within(running).await.unwrap().unwrap();
    assert_eq!(result.outcome, ToolOutcome::Cancelled);
    assert_eq!(within(h.ide_cancels.recv()).await.as_deref(), Some("call-1"));
}

#[tokio::test]
async fn webview_teardown_cancels_live_calls() {
    let mut h = start(RuntimeConfig::default());
    let mut started = stalling_ide(&h);

    let webview = h.webview.clone();
    tokio::spawn(async move {
        let _ = webview
            .request::<CallTool>(call("call-1", "exact-search", json!({"query": "todo"})))
            .await;
    });
    assert_eq!(within(started.recv()).await.as_deref(), Some("call-1"));

    h.webview.shutdown();

    assert_eq!(within(h.ide_cancels.recv()).await.as_deref(), Some("call-1"));
    within(h.core.closed()).await;
    assert!(h.core.engine().active().is_empty());
}

#[tokio::test]
async fn ide_teardown_cancels_live_calls() {
    for _ in 0..20 {
        let h = start(RuntimeConfig::default());
        let mut started = stalling_ide(&h);

        let webview = h.webview.clone();
        let running = tokio::spawn(async move {
            webview
                .request::<CallTool>(call("call-1", "view-diff", json!({})))
                .await
        });
        assert_eq!(within(started.recv()).await.as_deref(), Some("call-1"));

        h.ide.shutdown();

        let result = within(running).await.unwrap().unwrap();
        assert_eq!(result.outcome, ToolOutcome::Cancelled);
        within(h.core.ide().closed()).await;
        assert!(!h.core.webview().is_closed());
        assert!(h.core.engine().active().is_empty());

        let pong = within(h.webview.request::<Ping>("still here".into()))
            .await
            .unwrap();
        assert_eq!(pong.message, "still here");
    }
}

#[tokio::test]
async fn interleaved_progress_keeps_per_call_order() {
    let mut h = start(RuntimeConfig::default());

    let ide = h.ide.clone();
    h.ide
        .on_request::<ExecuteTool, _, _>(move |params: ExecuteToolParams| {
            let ide = ide.clone();
            async move {
                for n in 0..20 {
                    ide.notify::<ToolCallPartialOutput>(PartialOutput {
                        tool_call_id: params.tool_call_id.clone(),
                        context_items: vec![ContextItem::text(format!(
                            "{}:{n}",
                            params.tool_call_id
                        ))],
                    })
                    .map_err(|e| RemoteError::internal(e.to_string()))?;
                    tokio::task::yield_now().await;
                }
                Ok::<_, RemoteError>(Value::Null)
            }
        })
        .unwrap();

    let (a, b) = within(async {
        tokio::join!(
            h.webview
                .request::<CallTool>(call("a", "exact-search", json!({"query": "x"}))),
            h.webview
                .request::<CallTool>(call("b", "exact-search", json!({"query": "y"}))),
        )
    })
    .await;
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut received = Vec::new();
    while let Ok(partial) = h.partials.try_recv() {
        received.push(partial);
    }

    for result in [a, b] {
        let id = result.tool_call_id.clone();
        let expected: Vec<_> = (0..20)
            .map(|n| ContextItem::text(format!("{id}:{n}")))
            .collect();
        assert_eq!(result.context_items, expected);

        let streamed: Vec<_> = received
            .iter()
            .filter(|p| p.tool_call_id == id)
            .flat_map(|p| p.context_items.clone())
            .collect();
        assert_eq!(streamed, expected);
    }
}

#[tokio::test]
async fn profile_selection_is_broadcast() {
    let mut h = start(RuntimeConfig {
        profiles: vec![
            ProfileDescription::new("local", "Local"),
            ProfileDescription::new("work", "Work"),
        ],
        ..RuntimeConfig::default()
    });

    h.webview
        .notify::<DidChangeSelectedProfile>(SelectedProfile {
            id: Some("work".into()),
        })
        .unwrap();
    let update = within(h.profiles.recv()).await.unwrap();
    assert_eq!(update.selected_profile_id.as_deref(), Some("work"));
    assert_eq!(update.profiles.len(), 2);

    h.webview
        .notify::<DidChangeSelectedOrg>(SelectedOrg {
            id: Some("acme".into()),
            profile_id: Some(None),
        })
        .unwrap();
    let update = within(h.profiles.recv()).await.unwrap();
    assert_eq!(update.selected_profile_id, None);
    assert_eq!(h.core.profiles().selected_org().as_deref(), Some("acme"));

    h.core
        .set_profiles(vec![ProfileDescription::new("home", "Home")])
        .unwrap();
    let update = within(h.profiles.recv()).await.unwrap();
    assert_eq!(update.selected_profile_id.as_deref(), Some("home"));
}

#[tokio::test]
async fn config_errors_reach_webview() {
    let mut h = start(RuntimeConfig::default());
    h.core.report_config_error("profile \"work\" is missing a model").unwrap();
    assert_eq!(
        within(h.config_errors.recv()).await.as_deref(),
        Some("profile \"work\" is missing a model")
    );
}
