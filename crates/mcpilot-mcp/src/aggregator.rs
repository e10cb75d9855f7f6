//! Connects to every enabled server at once and merges their catalogs.
//!
//! A tool name offered by exactly one server is exposed as-is. When two or
//! more servers offer the same name, each copy is exposed as
//! `<server>__<tool>` so calls always reach an unambiguous target.

use crate::connection::{ConnectionConfig, ProcessConnection};
use crate::launcher::{Launcher, ProcessSupport};
use crate::protocol::{ToolCallOutcome, ToolDescriptor};
use crate::registry::SharedRegistry;
use crate::source::ToolSource;
use async_trait::async_trait;
use futures_util::future::join_all;
use mcpilot_core::{McpilotError, McpilotResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

/// Separator between server and tool in namespaced names.
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Result of the last connect attempt for one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerOutcome {
    /// Whether the server is connected.
    pub connected: bool,
    /// Number of tools it exposes.
    pub tools_count: usize,
    /// Why it failed, if it did.
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
struct Route {
    server: String,
    tool: String,
}

/// Fan-out over all enabled tool servers.
pub struct MultiServerAggregator {
    registry: SharedRegistry,
    config: ConnectionConfig,
    launcher: Arc<dyn Launcher>,
    support: ProcessSupport,
    connections: RwLock<BTreeMap<String, Arc<ProcessConnection>>>,
    outcomes: RwLock<BTreeMap<String, ServerOutcome>>,
    routes: RwLock<HashMap<String, Route>>,
    catalog: RwLock<Vec<ToolDescriptor>>,
}

impl MultiServerAggregator {
    /// Creates an aggregator; nothing is connected yet.
    pub fn new(
        registry: SharedRegistry,
        config: ConnectionConfig,
        launcher: Arc<dyn Launcher>,
        support: ProcessSupport,
    ) -> Self {
        Self {
            registry,
            config,
            launcher,
            support,
            connections: RwLock::new(BTreeMap::new()),
            outcomes: RwLock::new(BTreeMap::new()),
            routes: RwLock::new(HashMap::new()),
            catalog: RwLock::new(Vec::new()),
        }
    }

    fn connection_for(&self, name: &str) -> Arc<ProcessConnection> {
        self.connections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(ProcessConnection::new(
                    name,
                    self.config.clone(),
                    self.launcher.clone(),
                    self.support.clone(),
                ))
            })
            .clone()
    }

    /// Connects every enabled server concurrently.
    ///
    /// Failures are recorded per server and never block the others.
    /// Returns true if at least one server is connected afterwards.
    pub async fn connect_all(&self) -> bool {
        let targets = self.registry.read().enabled();
        let attempts = targets.into_iter().map(|descriptor| {
            let connection = self.connection_for(&descriptor.name);
            async move {
                let result = connection.connect(descriptor.launch_target()).await;
                (descriptor.name, result)
            }
        });
        let results = join_all(attempts).await;

        {
            let mut registry = self.registry.write();
            let mut outcomes = self.outcomes.write();
            for (name, result) in results {
                let outcome = match result {
                    Ok(tools) => {
                        registry.record_connected(&name, tools.len());
                        ServerOutcome {
                            connected: true,
                            tools_count: tools.len(),
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!(server = %name, error = %e, "server failed to connect");
                        registry.mark_error(&name, e.to_string());
                        ServerOutcome {
                            connected: false,
                            tools_count: 0,
                            error: Some(e.to_string()),
                        }
                    }
                };
                outcomes.insert(name, outcome);
            }
            if let Err(e) = registry.persist() {
                warn!(error = %e, "failed to persist server registry");
            }
        }

        self.rebuild_routes();
        let connected = self.connected_servers();
        info!(
            connected = connected.len(),
            tools = self.catalog.read().len(),
            "multi-server connect finished"
        );
        !connected.is_empty()
    }

    /// Names of the servers that are currently connected.
    pub fn connected_servers(&self) -> Vec<String> {
        self.connections
            .read()
            .iter()
            .filter(|(_, c)| c.is_connected())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Per-server results of the last connect round.
    pub fn outcomes(&self) -> BTreeMap<String, ServerOutcome> {
        self.outcomes.read().clone()
    }

    fn live_connections(&self) -> Vec<(String, Arc<ProcessConnection>)> {
        self.connections
            .read()
            .iter()
            .filter(|(_, c)| c.is_connected())
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect()
    }

    /// Merged catalog, re-listing every live server.
    ///
    /// A server whose listing fails keeps its previously cached tools.
    pub async fn get_tools(&self) -> Vec<ToolDescriptor> {
        let live = self.live_connections();
        let listings = join_all(live.iter().map(|(name, connection)| async move {
            if let Err(e) = connection.list_tools().await {
                warn!(server = %name, error = %e, "tool listing failed; using cached catalog");
            }
        }));
        listings.await;
        self.rebuild_routes();
        self.catalog.read().clone()
    }

    fn rebuild_routes(&self) {
        let live = self.live_connections();

        let mut owners: HashMap<String, usize> = HashMap::new();
        let per_server: Vec<(String, Vec<ToolDescriptor>)> = live
            .into_iter()
            .map(|(name, connection)| (name, connection.cached_tools()))
            .collect();
        for (_, tools) in &per_server {
            for tool in tools {
                *owners.entry(tool.name.clone()).or_default() += 1;
            }
        }

        let mut routes = HashMap::new();
        let mut catalog = Vec::new();
        for (server, tools) in per_server {
            for tool in tools {
                let exposed = if owners.get(&tool.name).copied().unwrap_or(0) > 1 {
                    warn!(server = %server, tool = %tool.name, "tool name collision; namespacing");
                    format!("{server}{NAMESPACE_SEPARATOR}{}", tool.name)
                } else {
                    tool.name.clone()
                };
                routes.insert(
                    exposed.clone(),
                    Route {
                        server: server.clone(),
                        tool: tool.name.clone(),
                    },
                );
                catalog.push(ToolDescriptor {
                    name: exposed,
                    ..tool
                });
            }
        }

        *self.routes.write() = routes;
        *self.catalog.write() = catalog;
    }

    /// Server that currently owns an exposed tool name.
    pub fn route_of(&self, tool: &str) -> Option<String> {
        self.routes.read().get(tool).map(|r| r.server.clone())
    }

    /// Routes a call to whichever server exposes `name`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpilotResult<ToolCallOutcome> {
        let route = self
            .routes
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpilotError::Tool(format!("no connected server exposes tool '{name}'")))?;
        let connection = self
            .connections
            .read()
            .get(&route.server)
            .cloned()
            .ok_or_else(|| McpilotError::NotConnected(format!("server '{}' is gone", route.server)))?;
        connection.call_tool(&route.tool, arguments).await
    }

    /// Closes every connection; failures are collected per server.
    pub async fn close(&self) -> Vec<(String, McpilotError)> {
        let connections: Vec<(String, Arc<ProcessConnection>)> = self
            .connections
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.clone()))
            .collect();

        let results = join_all(connections.into_iter().map(|(name, connection)| async move {
            (name, connection.close().await)
        }))
        .await;

        let mut failures = Vec::new();
        {
            let mut registry = self.registry.write();
            for (name, result) in results {
                registry.mark_available(&name);
                if let Err(e) = result {
                    warn!(server = %name, error = %e, "server did not close cleanly");
                    failures.push((name, e));
                }
            }
            if let Err(e) = registry.persist() {
                warn!(error = %e, "failed to persist server registry");
            }
        }
        self.routes.write().clear();
        self.catalog.write().clear();
        failures
    }
}

#[async_trait]
impl ToolSource for MultiServerAggregator {
    async fn ensure_ready(&self) -> McpilotResult<()> {
        if self.is_ready() || self.connect_all().await {
            Ok(())
        } else {
            Err(McpilotError::NotConnected(
                "no tool server could be connected".into(),
            ))
        }
    }

    fn is_ready(&self) -> bool {
        !self.connected_servers().is_empty()
    }

    async fn reset(&self) -> McpilotResult<()> {
        match self.close().await.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    async fn list_tools(&self) -> McpilotResult<Vec<ToolDescriptor>> {
        Ok(self.get_tools().await)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpilotResult<ToolCallOutcome> {
        MultiServerAggregator::call_tool(self, name, arguments).await
    }
}
