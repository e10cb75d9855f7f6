//! Tool-server plumbing for mcpilot.
//!
//! This crate discovers MCP tool servers, keeps stdio connections to them,
//! and presents their tools through one model-facing façade.
//!
//! # Main types
//!
//! - [`ServerRegistry`]: Discovered servers plus persisted operator settings.
//! - [`ProcessConnection`]: One managed stdio link with timeouts and retries.
//! - [`ServerManager`]: Picks and holds the single best server.
//! - [`MultiServerAggregator`]: Connects everything and routes by tool name.
//! - [`ToolFacade`]: Schema repair, argument repair, result normalization.
//! - [`ControlPlane`]: Operator operations returning `ControlResponse`.

/// Multi-server fan-out and routing.
pub mod aggregator;
/// Managed stdio connection to one server.
pub mod connection;
/// Operator control operations.
pub mod control;
/// Model-facing tool catalog and calls.
pub mod facade;
/// Child-process launching.
pub mod launcher;
/// Single-server selection.
pub mod manager;
/// MCP JSON-RPC message types.
pub mod protocol;
/// Server discovery and persistence.
pub mod registry;
/// Schema repair.
pub mod schema;
/// Tool selection config.
pub mod selection;
/// The tool source abstraction.
pub mod source;
/// JSON-RPC session over byte streams.
pub mod transport;

pub use aggregator::{MultiServerAggregator, ServerOutcome};
pub use connection::{ConnectionConfig, ConnectionState, ProcessConnection};
pub use control::ControlPlane;
pub use facade::{render_catalog, FacadeConfig, FunctionTool, ToolFacade, ToolOutput};
pub use launcher::{Interpreters, LaunchTarget, Launcher, ProcessSupport, RuntimeKind, TokioLauncher};
pub use manager::{ManagerStatus, ServerManager};
pub use protocol::{ToolCallOutcome, ToolDescriptor};
pub use registry::{ServerDescriptor, ServerRegistry, ServerStatus, SharedRegistry};
pub use selection::ToolSelection;
pub use source::ToolSource;
