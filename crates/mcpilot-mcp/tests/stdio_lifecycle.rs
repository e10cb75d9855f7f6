#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end tests against the bundled fixture server.
//!
//! Covers: ProcessConnection, ServerManager, MultiServerAggregator,
//! ToolFacade and ControlPlane over real child processes.

use async_trait::async_trait;
use mcpilot_core::{ConnectionError, McpilotError};
use mcpilot_mcp::launcher::LaunchedProcess;
use mcpilot_mcp::{
    ConnectionConfig, ConnectionState, ControlPlane, FacadeConfig, Interpreters, LaunchTarget,
    Launcher,
    MultiServerAggregator, ProcessConnection, ProcessSupport, RuntimeKind, ServerDescriptor,
    ServerManager, ServerRegistry, ServerStatus, SharedRegistry, TokioLauncher, ToolFacade,
    ToolSelection, ToolSource,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mcpilot-fixture-server"))
}

fn fixture_target(args: &[&str]) -> LaunchTarget {
    LaunchTarget::with_runtime(
        fixture_path(),
        args.iter().map(|a| a.to_string()).collect(),
        RuntimeKind::Native,
    )
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        max_retries: 0,
        retry_backoff_ms: 10,
        ..ConnectionConfig::default()
    }
}

/// Counts launches and delegates to the real launcher.
#[derive(Default)]
struct CountingLauncher {
    inner: TokioLauncher,
    launches: AtomicUsize,
}

impl CountingLauncher {
    fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for CountingLauncher {
    async fn launch(&self, target: &LaunchTarget) -> Result<LaunchedProcess, ConnectionError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.inner.launch(target).await
    }
}

fn connection(config: ConnectionConfig) -> (Arc<ProcessConnection>, Arc<CountingLauncher>) {
    let launcher = Arc::new(CountingLauncher::default());
    let conn = Arc::new(ProcessConnection::new(
        "fixture",
        config,
        launcher.clone(),
        ProcessSupport::Available,
    ));
    (conn, launcher)
}

fn fixture_descriptor(name: &str, args: &[&str]) -> ServerDescriptor {
    let mut desc = ServerDescriptor::new(name, fixture_path());
    desc.runtime = RuntimeKind::Native;
    desc.args = args.iter().map(|a| a.to_string()).collect();
    desc
}

fn registry_with(dir: &tempfile::TempDir, servers: Vec<ServerDescriptor>) -> SharedRegistry {
    let mut registry = ServerRegistry::new(dir.path(), dir.path().join("servers.json"));
    for server in servers {
        registry.register(server);
    }
    registry.into_shared()
}

// ---------------------------------------------------------------------------
// 1. ProcessConnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_connect_lists_tools_and_reports_server_info() {
    let (conn, _) = connection(fast_config());
    let tools = conn.connect(fixture_target(&["--name", "db"])).await.unwrap();

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["list_tables", "describe_table", "insert_rows", "slow_echo"]);
    assert!(conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.server_info().unwrap().name, "db");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_second_connect_to_same_target_does_not_spawn() {
    let (conn, launcher) = connection(fast_config());
    let target = fixture_target(&[]);

    let first = conn.connect(target.clone()).await.unwrap();
    let second = conn.connect(target).await.unwrap();

    assert_eq!(launcher.launches(), 1);
    assert_eq!(first, second);
    assert!(conn.is_connected());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connect_to_different_target_replaces_link() {
    let (conn, launcher) = connection(fast_config());
    conn.connect(fixture_target(&["--name", "a"])).await.unwrap();
    conn.connect(fixture_target(&["--name", "b"])).await.unwrap();

    assert_eq!(launcher.launches(), 2);
    assert_eq!(conn.server_info().unwrap().name, "b");
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_call_tool_success_and_server_side_error() {
    let (conn, _) = connection(fast_config());
    conn.connect(fixture_target(&[])).await.unwrap();

    let outcome = conn.call_tool("list_tables", json!({})).await.unwrap();
    assert!(!outcome.is_error);
    assert_eq!(outcome.joined_text(), r#"["orders","users"]"#);

    let outcome = conn
        .call_tool("describe_table", json!({"table": "ghosts"}))
        .await
        .unwrap();
    assert!(outcome.is_error);

    // The connection survives a failing tool.
    assert!(conn.is_connected());
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_calls_fail_afterwards() {
    let (conn, _) = connection(fast_config());
    conn.connect(fixture_target(&[])).await.unwrap();

    conn.close().await.unwrap();
    conn.close().await.unwrap();

    assert!(!conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    let err = conn.call_tool("list_tables", json!({})).await.unwrap_err();
    assert!(matches!(err, McpilotError::NotConnected(_)));
}

#[tokio::test]
async fn test_close_fails_in_flight_call_with_disconnected() {
    let (conn, _) = connection(fast_config());
    conn.connect(fixture_target(&[])).await.unwrap();

    let call = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.call_tool("slow_echo", json!({"text": "late", "delay_ms": 5000}))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    conn.close().await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(3), call)
        .await
        .expect("in-flight call must not hang")
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, McpilotError::Disconnected(_)), "got {err}");
}

#[tokio::test]
async fn test_call_timeout_is_a_tool_error() {
    let (conn, _) = connection(ConnectionConfig {
        call_timeout_secs: Some(1),
        ..fast_config()
    });
    conn.connect(fixture_target(&[])).await.unwrap();

    let err = conn
        .call_tool("slow_echo", json!({"text": "x", "delay_ms": 3000}))
        .await
        .unwrap_err();
    assert!(matches!(err, McpilotError::Tool(_)));
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_handshake_failure_is_retried_then_reported() {
    let (conn, launcher) = connection(ConnectionConfig {
        max_retries: 2,
        retry_backoff_ms: 10,
        ..ConnectionConfig::default()
    });
    let err = conn
        .connect(fixture_target(&["--fail-initialize"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        McpilotError::Connection(ConnectionError::Handshake(_))
    ));
    assert_eq!(launcher.launches(), 3);
    assert!(!conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Error);
}

#[tokio::test]
async fn test_unsupported_backend_never_spawns() {
    let launcher = Arc::new(CountingLauncher::default());
    let conn = ProcessConnection::new(
        "nowhere",
        ConnectionConfig::default(),
        launcher.clone(),
        ProcessSupport::Unavailable("process driver disabled".into()),
    );
    let err = conn.connect(fixture_target(&[])).await.unwrap_err();
    assert!(matches!(
        err,
        McpilotError::Connection(ConnectionError::Unsupported(_))
    ));
    assert_eq!(launcher.launches(), 0);
}

// ---------------------------------------------------------------------------
// 2. ServerManager
// ---------------------------------------------------------------------------

fn manager(registry: SharedRegistry) -> Arc<ServerManager> {
    let (conn, _) = connection(fast_config());
    Arc::new(ServerManager::new(registry, conn))
}

#[tokio::test]
async fn test_auto_connect_skips_failing_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let mut broken = ServerDescriptor::new("sqlite-broken", "/nonexistent/sqlite-broken");
    broken.auto_connect = true;
    broken.priority = 1;
    let mut good = fixture_descriptor("notes", &["--name", "notes"]);
    good.auto_connect = true;
    good.priority = 5;
    let manager = manager(registry_with(&dir, vec![broken, good]));

    let chosen = manager.auto_connect_best().await.unwrap();
    assert_eq!(chosen, "notes");
    assert_eq!(manager.current_server().as_deref(), Some("notes"));

    let registry = manager.registry().read();
    assert_eq!(registry.get("sqlite-broken").unwrap().status, ServerStatus::Error);
    let notes = registry.get("notes").unwrap();
    assert_eq!(notes.status, ServerStatus::Connected);
    assert_eq!(notes.tools_count, 4);
    assert!(notes.last_connected.is_some());
    drop(registry);

    // Already connected: short-circuits.
    assert_eq!(manager.auto_connect_best().await.unwrap(), "notes");
    manager.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_connect_by_name_switches_current_server() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(registry_with(
        &dir,
        vec![
            fixture_descriptor("alpha", &["--name", "alpha"]),
            fixture_descriptor("beta", &["--name", "beta"]),
        ],
    ));

    manager.connect_by_name("alpha").await.unwrap();
    manager.connect_by_name("beta").await.unwrap();

    assert_eq!(manager.current_server().as_deref(), Some("beta"));
    assert_eq!(manager.connection().server_info().unwrap().name, "beta");
    let registry = manager.registry().read();
    assert_eq!(registry.get("alpha").unwrap().status, ServerStatus::Available);
    assert_eq!(registry.get("beta").unwrap().status, ServerStatus::Connected);
    drop(registry);
    manager.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disabling_active_server_disconnects_it() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(registry_with(&dir, vec![fixture_descriptor("db", &[])]));
    manager.connect_by_name("db").await.unwrap();
    assert!(manager.connection().is_connected());

    manager.disable("db").await.unwrap();

    assert!(!manager.connection().is_connected());
    assert!(manager.current_server().is_none());
    let listed = manager.list_servers();
    assert_eq!(listed[0].status, ServerStatus::Disabled);

    let err = manager.connect_by_name("db").await.unwrap_err();
    assert!(matches!(err, McpilotError::Registry(_)));
}

#[tokio::test]
async fn test_reset_tears_down_until_ready_again() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = fixture_descriptor("db", &["--name", "db"]);
    db.auto_connect = true;
    let manager = manager(registry_with(&dir, vec![db]));

    manager.ensure_ready().await.unwrap();
    assert!(manager.is_ready());

    manager.reset().await.unwrap();
    assert!(!manager.is_ready());
    assert!(manager.current_server().is_none());
    assert_eq!(manager.list_servers()[0].status, ServerStatus::Available);

    manager.ensure_ready().await.unwrap();
    assert_eq!(manager.current_server().as_deref(), Some("db"));
    manager.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disable_disconnects_even_when_persist_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("blocker"), "not a directory").unwrap();
    let mut registry = ServerRegistry::new(dir.path(), dir.path().join("blocker").join("servers.json"));
    registry.register(fixture_descriptor("db", &[]));
    let manager = manager(registry.into_shared());
    manager.connect_by_name("db").await.unwrap();

    let err = manager.disable("db").await.unwrap_err();
    assert!(matches!(err, McpilotError::Io(_)), "{err}");

    assert!(!manager.connection().is_connected());
    assert!(manager.current_server().is_none());
    assert_eq!(manager.list_servers()[0].status, ServerStatus::Disabled);
}

#[tokio::test]
async fn test_manager_state_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let registry = registry_with(&dir, vec![fixture_descriptor("db", &[])]);
    let manager = manager(registry);
    manager.connect_by_name("db").await.unwrap();
    manager.set_priority("db", 3).unwrap();

    let mut reloaded = ServerRegistry::new(dir.path(), dir.path().join("servers.json"));
    reloaded.load().unwrap();
    let db = reloaded.get("db").unwrap();
    assert_eq!(db.priority, 3);
    assert_eq!(db.tools_count, 4);
    // A restart never believes it is still connected.
    assert_eq!(db.status, ServerStatus::Available);
    manager.disconnect().await.unwrap();
}

// ---------------------------------------------------------------------------
// 3. MultiServerAggregator
// ---------------------------------------------------------------------------

fn aggregator(registry: SharedRegistry) -> MultiServerAggregator {
    MultiServerAggregator::new(
        registry,
        fast_config(),
        Arc::new(TokioLauncher::default()),
        ProcessSupport::Available,
    )
}

#[tokio::test]
async fn test_one_failing_server_does_not_block_others() {
    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(registry_with(
        &dir,
        vec![
            ServerDescriptor::new("a-broken", "/nonexistent/a-broken"),
            fixture_descriptor("b", &["--name", "b"]),
        ],
    ));

    assert!(agg.connect_all().await);

    let tools = agg.get_tools().await;
    assert_eq!(tools.len(), 4);
    assert!(tools.iter().any(|t| t.name == "list_tables"));
    assert_eq!(agg.connected_servers(), vec!["b"]);

    let outcomes = agg.outcomes();
    assert!(!outcomes["a-broken"].connected);
    assert!(outcomes["a-broken"].error.is_some());
    assert!(outcomes["b"].connected);

    let outcome = agg.call_tool("list_tables", json!({})).await.unwrap();
    assert_eq!(outcome.joined_text(), r#"["orders","users"]"#);

    assert!(agg.close().await.is_empty());
}

#[tokio::test]
async fn test_all_servers_failing_returns_false() {
    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(registry_with(
        &dir,
        vec![ServerDescriptor::new("x", "/nonexistent/x")],
    ));
    assert!(!agg.connect_all().await);
    assert!(agg.get_tools().await.is_empty());
    let err = agg.ensure_ready().await.unwrap_err();
    assert!(matches!(err, McpilotError::NotConnected(_)));
}

#[tokio::test]
async fn test_colliding_tool_names_are_namespaced() {
    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(registry_with(
        &dir,
        vec![
            fixture_descriptor("left", &["--name", "left"]),
            fixture_descriptor("right", &["--name", "right"]),
        ],
    ));
    assert!(agg.connect_all().await);

    let tools = agg.get_tools().await;
    assert_eq!(tools.len(), 8);
    assert!(tools.iter().all(|t| t.name.contains("__")));
    assert_eq!(agg.route_of("right__list_tables").as_deref(), Some("right"));

    let err = agg.call_tool("list_tables", json!({})).await.unwrap_err();
    assert!(matches!(err, McpilotError::Tool(_)));
    agg.call_tool("left__describe_table", json!({"table": "users"}))
        .await
        .unwrap();

    agg.close().await;
    assert!(agg.connected_servers().is_empty());
}

#[tokio::test]
async fn test_unknown_tool_fails() {
    let dir = tempfile::tempdir().unwrap();
    let agg = aggregator(registry_with(&dir, vec![fixture_descriptor("only", &[])]));
    agg.connect_all().await;
    let err = agg.call_tool("launch_rockets", json!({})).await.unwrap_err();
    assert!(err.to_string().contains("launch_rockets"));
    agg.close().await;
}

// ---------------------------------------------------------------------------
// 4. Façade and control plane over a live server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_facade_repairs_fixture_schema_and_normalizes_result() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(registry_with(&dir, vec![fixture_descriptor("db", &[])]));
    manager.connect_by_name("db").await.unwrap();
    let facade = ToolFacade::new(manager.clone(), FacadeConfig::default());

    let tools = facade.get_tools_for_model(&ToolSelection::All).await.unwrap();
    assert_eq!(tools[0].function.name, "list_tables");
    assert_eq!(tools.last().unwrap().function.name, "insert_rows");
    let insert = tools.iter().find(|t| t.function.name == "insert_rows").unwrap();
    assert_eq!(
        insert.function.parameters["properties"]["rows"]["items"],
        json!({"type": "object"})
    );

    let output = facade
        .call_tool("describe_table", json!({"table": "users"}), &ToolSelection::All)
        .await
        .unwrap();
    assert_eq!(output.data["columns"], json!(["id", "name", "email"]));
    manager.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_control_plane_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(registry_with(&dir, vec![fixture_descriptor("db", &[])]));
    let facade = Arc::new(ToolFacade::new(manager.clone(), FacadeConfig::default()));
    let control = ControlPlane::new(manager, facade);

    let resp = control.list_tools().await;
    assert!(!resp.success);

    let resp = control.connect_by_name("db").await;
    assert!(resp.success, "{}", resp.message);
    assert_eq!(resp.payload.unwrap()["tools_count"], 4);

    let resp = control.status();
    assert!(resp.success);
    assert_eq!(resp.payload.as_ref().unwrap()["connected"], true);
    assert_eq!(resp.message, "connected to 'db'");

    let resp = control.call_tool("list_tables", json!({})).await;
    assert!(resp.success);
    assert_eq!(resp.payload.unwrap()["data"], json!(["orders", "users"]));

    let resp = control.call_tool("describe_table", json!({"table": "nope"})).await;
    assert!(!resp.success);
    assert!(resp.message.contains("no such table"));

    let resp = control.disable("db").await;
    assert!(resp.success);
    let resp = control.status();
    assert_eq!(resp.payload.unwrap()["connected"], false);

    let resp = control.list_servers();
    assert_eq!(resp.payload.unwrap()[0]["status"], "disabled");

    let resp = control.enable("db");
    assert!(resp.success);
}

#[tokio::test]
async fn test_discovered_server_auto_connects_once_opted_in() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("sqlite").join("main.py");
    std::fs::create_dir_all(script.parent().unwrap()).unwrap();
    std::fs::write(&script, "from mcp.server.fastmcp import FastMCP\n").unwrap();

    let mut registry = ServerRegistry::new(dir.path(), dir.path().join("servers.json"));
    let report = registry.discover();
    assert_eq!(report.discovered, vec!["sqlite"]);
    assert!(!registry.get("sqlite").unwrap().auto_connect);

    // The fixture stands in for the interpreter and ignores the script argument.
    let interpreters = Interpreters {
        python: fixture_path().to_string_lossy().into_owned(),
        ..Interpreters::default()
    };
    let conn = Arc::new(ProcessConnection::new(
        "primary",
        fast_config(),
        Arc::new(TokioLauncher::new(interpreters)),
        ProcessSupport::Available,
    ));
    let manager = Arc::new(ServerManager::new(registry.into_shared(), conn));
    let facade = Arc::new(ToolFacade::new(manager.clone(), FacadeConfig::default()));
    let control = ControlPlane::new(manager.clone(), facade);

    let resp = control.auto_connect().await;
    assert!(!resp.success);

    let resp = control.set_auto_connect("sqlite", true);
    assert!(resp.success, "{}", resp.message);
    let resp = control.auto_connect().await;
    assert!(resp.success, "{}", resp.message);
    assert_eq!(manager.current_server().as_deref(), Some("sqlite"));

    let resp = control.list_tools().await;
    assert!(resp.success);
    assert_eq!(resp.payload.unwrap().as_array().unwrap().len(), 4);

    let resp = control.set_auto_connect("ghost", true);
    assert!(!resp.success);
    manager.disconnect().await.unwrap();
}
