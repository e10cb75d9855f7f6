//! Single-server selection: auto-connect ordering and the current-server pointer.

use crate::connection::{ConnectionState, ProcessConnection};
use crate::launcher::LaunchTarget;
use crate::protocol::{ServerInfo, ToolCallOutcome, ToolDescriptor};
use crate::registry::{ServerDescriptor, ServerStatus, SharedRegistry};
use crate::source::ToolSource;
use async_trait::async_trait;
use mcpilot_core::{McpilotError, McpilotResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Servers whose name contains this keyword are tried first.
pub const DEFAULT_BOOST_KEYWORD: &str = "sqlite";

/// Snapshot of the manager for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    /// Name of the current server.
    pub current_server: Option<String>,
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Whether tools can be called.
    pub connected: bool,
    /// Number of tools in the cached catalog.
    pub tools_count: usize,
    /// Identity reported by the server.
    pub server_info: Option<ServerInfo>,
}

/// Keeps exactly one tool server connected, chosen from the registry.
pub struct ServerManager {
    registry: SharedRegistry,
    connection: Arc<ProcessConnection>,
    current: RwLock<Option<String>>,
    boost_keyword: String,
}

impl ServerManager {
    /// Creates a manager over a registry and a connection.
    pub fn new(registry: SharedRegistry, connection: Arc<ProcessConnection>) -> Self {
        Self {
            registry,
            connection,
            current: RwLock::new(None),
            boost_keyword: DEFAULT_BOOST_KEYWORD.to_string(),
        }
    }

    /// Overrides the category keyword boosted by auto-connect.
    ///
    /// Matching is case-insensitive.
    pub fn with_boost_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.boost_keyword = keyword.into().to_lowercase();
        self
    }

    /// The underlying registry.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<ProcessConnection> {
        &self.connection
    }

    /// Name of the server currently connected.
    pub fn current_server(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Auto-connect candidates in the order they will be tried.
    pub fn auto_connect_candidates(&self) -> Vec<ServerDescriptor> {
        let mut candidates: Vec<ServerDescriptor> = self
            .registry
            .read()
            .list()
            .into_iter()
            .filter(|d| d.status == ServerStatus::Available && d.auto_connect)
            .collect();
        candidates.sort_by_key(|d| {
            let boost = if d.name.to_lowercase().contains(&self.boost_keyword) {
                0
            } else {
                1
            };
            (boost, d.priority, d.name.clone())
        });
        candidates
    }

    /// Connects to the best auto-connect server, returning its name.
    ///
    /// Returns immediately when a server is already connected.
    pub async fn auto_connect_best(&self) -> McpilotResult<String> {
        if let Some(current) = self.current_server() {
            if self.connection.is_connected() {
                return Ok(current);
            }
        }

        let candidates = self.auto_connect_candidates();
        if candidates.is_empty() {
            return Err(McpilotError::NotConnected(
                "no server is available for auto-connect".into(),
            ));
        }

        let mut last_error = None;
        for candidate in &candidates {
            info!(server = %candidate.name, priority = candidate.priority, "auto-connect trying server");
            match self.connect_descriptor(candidate).await {
                Ok(_) => return Ok(candidate.name.clone()),
                Err(e) => {
                    warn!(server = %candidate.name, error = %e, "auto-connect candidate failed");
                    last_error = Some(e);
                }
            }
        }

        Err(McpilotError::NotConnected(format!(
            "all {} auto-connect candidates failed; last error: {}",
            candidates.len(),
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Connects to a named server, replacing any other current server.
    pub async fn connect_by_name(&self, name: &str) -> McpilotResult<usize> {
        let descriptor = self
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpilotError::Registry(format!("unknown server '{name}'")))?;
        if !descriptor.is_enabled() {
            return Err(McpilotError::Registry(format!("server '{name}' is disabled")));
        }

        if let Some(current) = self.current_server() {
            if current != name {
                if let Err(e) = self.disconnect().await {
                    warn!(server = %current, error = %e, "previous server did not disconnect cleanly");
                }
            }
        }
        self.connect_descriptor(&descriptor).await
    }

    /// Connects to a script path directly.
    ///
    /// If the path belongs to a registered server that server becomes current;
    /// otherwise the file stem names the connection.
    pub async fn connect_path(&self, path: &Path, args: Vec<String>) -> McpilotResult<usize> {
        let known = self.registry.read().find_by_path(path).cloned();
        if let Some(mut descriptor) = known {
            if !args.is_empty() {
                descriptor.args = args;
            }
            return self.connect_descriptor(&descriptor).await;
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("server")
            .to_string();
        let tools = self.connection.connect(LaunchTarget::new(path, args)).await?;
        *self.current.write() = Some(name.clone());
        info!(server = %name, tools = tools.len(), "connected to unregistered server");
        Ok(tools.len())
    }

    async fn connect_descriptor(&self, descriptor: &ServerDescriptor) -> McpilotResult<usize> {
        match self.connection.connect(descriptor.launch_target()).await {
            Ok(tools) => {
                {
                    let mut registry = self.registry.write();
                    registry.mark_connected(&descriptor.name, tools.len());
                    if let Err(e) = registry.persist() {
                        warn!(error = %e, "failed to persist server registry");
                    }
                }
                *self.current.write() = Some(descriptor.name.clone());
                Ok(tools.len())
            }
            Err(e) => {
                let mut registry = self.registry.write();
                registry.mark_error(&descriptor.name, e.to_string());
                if let Err(persist_err) = registry.persist() {
                    warn!(error = %persist_err, "failed to persist server registry");
                }
                Err(e)
            }
        }
    }

    /// Disconnects the current server.
    pub async fn disconnect(&self) -> McpilotResult<()> {
        let previous = self.current.write().take();
        let result = self.connection.close().await;
        if let Some(name) = previous {
            let mut registry = self.registry.write();
            registry.mark_available(&name);
            if let Err(e) = registry.persist() {
                warn!(error = %e, "failed to persist server registry");
            }
        }
        result
    }

    /// Re-enables a server.
    pub fn enable(&self, name: &str) -> McpilotResult<()> {
        self.registry.write().enable(name)
    }

    /// Disables a server, disconnecting it if it is current.
    ///
    /// The disconnect happens even when persisting the change fails; that
    /// error is returned afterwards.
    pub async fn disable(&self, name: &str) -> McpilotResult<()> {
        let persisted = self.registry.write().disable(name);
        let disabled = self
            .registry
            .read()
            .get(name)
            .is_some_and(|d| d.status == ServerStatus::Disabled);
        if disabled && self.current_server().as_deref() == Some(name) {
            if let Err(e) = self.disconnect().await {
                warn!(server = %name, error = %e, "disabled server did not disconnect cleanly");
            }
        }
        persisted
    }

    /// Lets auto-connect pick a server, or stops it from doing so.
    pub fn set_auto_connect(&self, name: &str, auto_connect: bool) -> McpilotResult<()> {
        self.registry.write().set_auto_connect(name, auto_connect)
    }

    /// Changes a server's priority.
    pub fn set_priority(&self, name: &str, priority: u32) -> McpilotResult<()> {
        self.registry.write().set_priority(name, priority)
    }

    /// All known servers.
    pub fn list_servers(&self) -> Vec<ServerDescriptor> {
        self.registry.read().list()
    }

    /// Current status snapshot.
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            current_server: self.current_server(),
            state: self.connection.state(),
            connected: self.connection.is_connected(),
            tools_count: self.connection.cached_tools().len(),
            server_info: self.connection.server_info(),
        }
    }
}

#[async_trait]
impl ToolSource for ServerManager {
    async fn ensure_ready(&self) -> McpilotResult<()> {
        self.auto_connect_best().await.map(|_| ())
    }

    fn is_ready(&self) -> bool {
        self.connection.is_connected()
    }

    async fn reset(&self) -> McpilotResult<()> {
        self.disconnect().await
    }

    async fn list_tools(&self) -> McpilotResult<Vec<ToolDescriptor>> {
        self.connection.list_tools().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpilotResult<ToolCallOutcome> {
        self.connection.call_tool(name, arguments).await
    }
}
