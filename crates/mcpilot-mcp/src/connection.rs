//! A managed link to one tool-server process.
//!
//! [`ProcessConnection`] walks the lifecycle
//! `Disconnected → Connecting → Handshaking → Ready`, bounding every step with
//! its own timeout and retrying transient failures with a short backoff.
//! Connect and close are serialized per connection; tool calls on a ready
//! link run concurrently with them.

use crate::launcher::{LaunchTarget, LaunchedProcess, Launcher, ProcessSupport};
use crate::protocol::{InitializeResult, ServerInfo, ToolCallOutcome, ToolDescriptor, PROTOCOL_VERSION};
use crate::transport::RpcSession;
use mcpilot_core::{ConnectionError, McpilotError, McpilotResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Timeouts and retry policy for one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Deadline for starting the child process.
    #[serde(default = "default_spawn_timeout")]
    pub spawn_timeout_secs: u64,
    /// Deadline for finalizing the session after the handshake.
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Deadline for the `initialize` exchange.
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout_secs: u64,
    /// Deadline for `tools/list`.
    #[serde(default = "default_list_tools_timeout")]
    pub list_tools_timeout_secs: u64,
    /// Deadline for one `tools/call`; `None` waits indefinitely.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: Option<u64>,
    /// Extra connect attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between connect attempts.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

fn default_spawn_timeout() -> u64 {
    30
}
fn default_session_timeout() -> u64 {
    15
}
fn default_initialize_timeout() -> u64 {
    10
}
fn default_list_tools_timeout() -> u64 {
    10
}
fn default_call_timeout() -> Option<u64> {
    Some(60)
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff() -> u64 {
    1000
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            spawn_timeout_secs: default_spawn_timeout(),
            session_timeout_secs: default_session_timeout(),
            initialize_timeout_secs: default_initialize_timeout(),
            list_tools_timeout_secs: default_list_tools_timeout(),
            call_timeout_secs: default_call_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

/// Lifecycle state of a [`ProcessConnection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No link.
    #[default]
    Disconnected,
    /// Spawning the child process.
    Connecting,
    /// Performing the initialize handshake and self-test.
    Handshaking,
    /// Usable.
    Ready,
    /// The last connect failed, or the server went away.
    Error,
}

#[derive(Default)]
struct Link {
    state: ConnectionState,
    target: Option<LaunchTarget>,
    process: Option<Child>,
    session: Option<Arc<RpcSession>>,
    server: Option<InitializeResult>,
    tools: Vec<ToolDescriptor>,
}

impl Link {
    fn is_live(&self) -> bool {
        self.state == ConnectionState::Ready
            && self.process.is_some()
            && self.server.is_some()
            && self.session.as_ref().is_some_and(|s| s.is_open())
    }
}

/// Owns at most one live tool-server process.
pub struct ProcessConnection {
    label: String,
    config: ConnectionConfig,
    launcher: Arc<dyn Launcher>,
    support: ProcessSupport,
    lifecycle: tokio::sync::Mutex<()>,
    link: RwLock<Link>,
}

impl ProcessConnection {
    /// Creates a disconnected connection.
    pub fn new(
        label: impl Into<String>,
        config: ConnectionConfig,
        launcher: Arc<dyn Launcher>,
        support: ProcessSupport,
    ) -> Self {
        Self {
            label: label.into(),
            config,
            launcher,
            support,
            lifecycle: tokio::sync::Mutex::new(()),
            link: RwLock::new(Link::default()),
        }
    }

    /// Name used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Connects to `target`, returning its tool catalog.
    ///
    /// A connect to the target that is already live returns the cached
    /// catalog without spawning anything. A different target replaces the
    /// current one.
    pub async fn connect(&self, target: LaunchTarget) -> McpilotResult<Vec<ToolDescriptor>> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let link = self.link.read();
            if link.is_live() && link.target.as_ref() == Some(&target) {
                debug!(server = %self.label, target = %target, "already connected");
                return Ok(link.tools.clone());
            }
        }

        if let Err(e) = self.teardown().await {
            warn!(server = %self.label, error = %e, "previous link did not close cleanly");
        }

        if let Err(e) = self.support.check() {
            self.link.write().state = ConnectionState::Error;
            return Err(e.into());
        }

        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.establish(&target).await {
                Ok(tools) => {
                    info!(
                        server = %self.label,
                        target = %target,
                        tools = tools.len(),
                        attempt,
                        "tool server connected"
                    );
                    return Ok(tools);
                }
                Err(e) => {
                    if let Err(close_err) = self.teardown().await {
                        debug!(server = %self.label, error = %close_err, "cleanup after failed attempt");
                    }
                    if !e.is_retryable() || attempt >= attempts {
                        warn!(server = %self.label, attempt, error = %e, "giving up on tool server");
                        self.link.write().state = ConnectionState::Error;
                        return Err(e.into());
                    }
                    warn!(server = %self.label, attempt, error = %e, "connect attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
            }
        }
    }

    async fn establish(&self, target: &LaunchTarget) -> Result<Vec<ToolDescriptor>, ConnectionError> {
        self.link.write().state = ConnectionState::Connecting;

        let LaunchedProcess {
            child,
            stdin,
            stdout,
        } = bounded("spawn", self.config.spawn_timeout_secs, self.launcher.launch(target)).await??;

        let session = RpcSession::start(self.label.clone(), stdout, stdin);
        {
            let mut link = self.link.write();
            link.process = Some(child);
            link.session = Some(session.clone());
            link.target = Some(target.clone());
            link.state = ConnectionState::Handshaking;
        }

        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "mcpilot",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let response = bounded(
            "initialize",
            self.config.initialize_timeout_secs,
            session.request("initialize", Some(params)),
        )
        .await?
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        let result = response
            .into_result()
            .map_err(|e| ConnectionError::Handshake(format!("server rejected initialize: {e}")))?;
        let server: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ConnectionError::Handshake(format!("malformed initialize result: {e}")))?;
        if server.protocol_version != PROTOCOL_VERSION {
            debug!(server = %self.label, version = %server.protocol_version, "server negotiated a different protocol revision");
        }

        bounded(
            "session",
            self.config.session_timeout_secs,
            session.notify("notifications/initialized", None),
        )
        .await?
        .map_err(|e| ConnectionError::Handshake(e.to_string()))?;

        let tools = bounded(
            "list_tools",
            self.config.list_tools_timeout_secs,
            fetch_tools(&session),
        )
        .await?
        .map_err(|e| ConnectionError::Handshake(format!("tool listing self-test failed: {e}")))?;

        let mut link = self.link.write();
        link.server = Some(server);
        link.tools = tools.clone();
        link.state = ConnectionState::Ready;
        Ok(tools)
    }

    /// Lists the server's tools and refreshes the cached catalog.
    pub async fn list_tools(&self) -> McpilotResult<Vec<ToolDescriptor>> {
        let session = self.active_session("tools/list")?;
        let tools = bounded(
            "list_tools",
            self.config.list_tools_timeout_secs,
            fetch_tools(&session),
        )
        .await??;
        self.link.write().tools = tools.clone();
        Ok(tools)
    }

    /// Invokes one tool.
    ///
    /// Failures are returned to the caller; the connection stays usable.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpilotResult<ToolCallOutcome> {
        let session = self.active_session("tools/call")?;
        let params = serde_json::json!({ "name": name, "arguments": arguments });

        let request = session.request("tools/call", Some(params));
        let response = match self.config.call_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), request)
                .await
                .map_err(|_| McpilotError::Tool(format!("tool '{name}' timed out after {secs}s")))??,
            None => request.await?,
        };

        let result = response
            .into_result()
            .map_err(|e| McpilotError::Tool(format!("tool '{name}' failed: {e}")))?;
        serde_json::from_value(result)
            .map_err(|e| McpilotError::Tool(format!("tool '{name}' returned a malformed result: {e}")))
    }

    /// Tears the link down. Safe to call repeatedly.
    ///
    /// The connection reads as disconnected afterwards even when a teardown
    /// step fails; the first such failure is returned.
    pub async fn close(&self) -> McpilotResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let result = self.teardown().await;
        info!(server = %self.label, "tool server disconnected");
        result
    }

    async fn teardown(&self) -> McpilotResult<()> {
        let (session, process) = {
            let mut link = self.link.write();
            let taken = (link.session.take(), link.process.take());
            *link = Link::default();
            taken
        };

        let mut first_error = None;
        if let Some(session) = session {
            if let Err(e) = session.close().await {
                warn!(server = %self.label, error = %e, "failed to close session");
                first_error.get_or_insert(e);
            }
        }
        if let Some(mut child) = process {
            let exited = matches!(child.try_wait(), Ok(Some(_)));
            if !exited {
                if let Err(e) = child.kill().await {
                    warn!(server = %self.label, error = %e, "failed to stop tool server process");
                    first_error.get_or_insert(e.into());
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn active_session(&self, method: &str) -> McpilotResult<Arc<RpcSession>> {
        let link = self.link.read();
        match &link.session {
            Some(session) if link.state == ConnectionState::Ready && session.is_open() => {
                Ok(session.clone())
            }
            _ => Err(McpilotError::NotConnected(format!(
                "{}: no active session for '{method}'",
                self.label
            ))),
        }
    }

    /// Whether process, session, and handshake are all present and live.
    pub fn is_connected(&self) -> bool {
        self.link.read().is_live()
    }

    /// Current lifecycle state.
    ///
    /// A ready link whose server has gone away reads as `Error`.
    pub fn state(&self) -> ConnectionState {
        let link = self.link.read();
        if link.state == ConnectionState::Ready && !link.is_live() {
            ConnectionState::Error
        } else {
            link.state
        }
    }

    /// The target of the current link.
    pub fn target(&self) -> Option<LaunchTarget> {
        self.link.read().target.clone()
    }

    /// Identity reported by the server during the handshake.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.link
            .read()
            .server
            .as_ref()
            .and_then(|s| s.server_info.clone())
    }

    /// The catalog from the most recent listing.
    pub fn cached_tools(&self) -> Vec<ToolDescriptor> {
        self.link.read().tools.clone()
    }
}

async fn fetch_tools(session: &RpcSession) -> McpilotResult<Vec<ToolDescriptor>> {
    let result = session
        .request("tools/list", None)
        .await?
        .into_result()
        .map_err(|e| McpilotError::Tool(format!("tools/list failed: {e}")))?;
    let tools = result
        .get("tools")
        .cloned()
        .unwrap_or_else(|| serde_json::json!([]));
    Ok(serde_json::from_value(tools)?)
}

async fn bounded<F: Future>(step: &'static str, secs: u64, fut: F) -> Result<F::Output, ConnectionError> {
    tokio::time::timeout(Duration::from_secs(secs), fut)
        .await
        .map_err(|_| ConnectionError::Timeout { step, secs })
}
