//! Operator-facing control operations.
//!
//! Every operation returns a [`ControlResponse`] and never an error, so a
//! front end can relay the result as-is.

use crate::facade::ToolFacade;
use crate::manager::ServerManager;
use crate::selection::ToolSelection;
use mcpilot_core::{ControlResponse, McpilotError};
use std::path::Path;
use std::sync::Arc;

/// Control surface over the single-server manager.
pub struct ControlPlane {
    manager: Arc<ServerManager>,
    facade: Arc<ToolFacade>,
}

impl ControlPlane {
    /// Creates a control plane. `facade` must wrap `manager`.
    pub fn new(manager: Arc<ServerManager>, facade: Arc<ToolFacade>) -> Self {
        Self { manager, facade }
    }

    /// Connects to a script path.
    pub async fn connect(&self, path: &Path, args: Vec<String>) -> ControlResponse {
        ControlResponse::from_result(
            self.manager
                .connect_path(path, args)
                .await
                .map(|tools| serde_json::json!({"tools_count": tools})),
            format!("connected to {}", path.display()),
        )
    }

    /// Connects to the best auto-connect server.
    pub async fn auto_connect(&self) -> ControlResponse {
        match self.manager.auto_connect_best().await {
            Ok(name) => ControlResponse::with_payload(
                format!("connected to '{name}'"),
                serde_json::json!({"server": name}),
            ),
            Err(e) => ControlResponse::failure(e.to_string()),
        }
    }

    /// Connects to a named server.
    pub async fn connect_by_name(&self, name: &str) -> ControlResponse {
        ControlResponse::from_result(
            self.manager
                .connect_by_name(name)
                .await
                .map(|tools| serde_json::json!({"server": name, "tools_count": tools})),
            format!("connected to '{name}'"),
        )
    }

    /// Lists every known server.
    pub fn list_servers(&self) -> ControlResponse {
        let servers = self.manager.list_servers();
        let count = servers.len();
        ControlResponse::from_result(Ok(servers), format!("{count} servers"))
    }

    /// Re-enables a server.
    pub fn enable(&self, name: &str) -> ControlResponse {
        ControlResponse::from_result(self.manager.enable(name), format!("server '{name}' enabled"))
    }

    /// Disables a server, disconnecting it if current.
    pub async fn disable(&self, name: &str) -> ControlResponse {
        ControlResponse::from_result(
            self.manager.disable(name).await,
            format!("server '{name}' disabled"),
        )
    }

    /// Sets a server's priority.
    pub fn set_priority(&self, name: &str, priority: u32) -> ControlResponse {
        ControlResponse::from_result(
            self.manager.set_priority(name, priority),
            format!("server '{name}' priority set to {priority}"),
        )
    }

    /// Turns auto-connect on or off for a server.
    pub fn set_auto_connect(&self, name: &str, auto_connect: bool) -> ControlResponse {
        let state = if auto_connect { "on" } else { "off" };
        ControlResponse::from_result(
            self.manager.set_auto_connect(name, auto_connect),
            format!("auto-connect {state} for server '{name}'"),
        )
    }

    /// Rescans the server directory.
    pub fn refresh(&self) -> ControlResponse {
        let report = self.manager.registry().write().refresh();
        let message = format!(
            "{} added, {} missing, {} unreadable",
            report.added.len(),
            report.missing.len(),
            report.issues.len()
        );
        if let Err(e) = self.manager.registry().read().persist() {
            return ControlResponse::failure(e.to_string());
        }
        ControlResponse::from_result(Ok(report), message)
    }

    /// Lists the model-facing tools of the current server.
    pub async fn list_tools(&self) -> ControlResponse {
        if !self.manager.connection().is_connected() {
            return ControlResponse::failure(
                McpilotError::NotConnected("no server is connected".into()).to_string(),
            );
        }
        match self.facade.get_tools_for_model(&ToolSelection::All).await {
            Ok(tools) => {
                let count = tools.len();
                ControlResponse::from_result(Ok(tools), format!("{count} tools"))
            }
            Err(e) => ControlResponse::failure(e.to_string()),
        }
    }

    /// Calls a tool on the current server.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ControlResponse {
        ControlResponse::from_result(
            self.facade
                .call_tool(name, arguments, &ToolSelection::All)
                .await,
            format!("tool '{name}' executed"),
        )
    }

    /// Reports the connection status.
    pub fn status(&self) -> ControlResponse {
        let status = self.manager.status();
        let message = match &status.current_server {
            Some(name) if status.connected => format!("connected to '{name}'"),
            _ => "not connected".to_string(),
        };
        ControlResponse::from_result(Ok(status), message)
    }

    /// Disconnects the current server.
    pub async fn disconnect(&self) -> ControlResponse {
        ControlResponse::from_result(self.manager.disconnect().await, "disconnected")
    }
}
