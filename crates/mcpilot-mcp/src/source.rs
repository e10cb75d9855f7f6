//! The tool-source seam shared by single- and multi-server modes.

use crate::protocol::{ToolCallOutcome, ToolDescriptor};
use async_trait::async_trait;
use mcpilot_core::McpilotResult;

/// Anything that can list and invoke tools.
///
/// Implemented by the single-server [`ServerManager`](crate::ServerManager)
/// and by the [`MultiServerAggregator`](crate::MultiServerAggregator).
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Brings the source to a usable state (connecting if needed).
    async fn ensure_ready(&self) -> McpilotResult<()>;

    /// Whether tools can be called right now.
    fn is_ready(&self) -> bool;

    /// Drops every live connection so the next `ensure_ready` starts over.
    async fn reset(&self) -> McpilotResult<()> {
        Ok(())
    }

    /// The current tool catalog.
    async fn list_tools(&self) -> McpilotResult<Vec<ToolDescriptor>>;

    /// Invokes a tool by its catalog name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> McpilotResult<ToolCallOutcome>;
}
