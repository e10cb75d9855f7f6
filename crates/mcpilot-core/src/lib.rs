//! Core types and error definitions for mcpilot.
//!
//! This crate holds the types shared by the tool-server layer, the reasoning
//! loop and the command-line front end.
//!
//! # Main types
//!
//! - [`McpilotError`]: Unified error enum for every subsystem.
//! - [`ConnectionError`]: Failures while bringing a tool-server link up.
//! - [`McpilotResult`]: Convenience alias for `Result<T, McpilotError>`.
//! - [`Role`] / [`Message`]: Role-tagged conversation messages.
//! - [`ToolCall`] / [`ToolResult`]: A tool invocation and its outcome.
//! - [`ControlResponse`]: The `{success, message, payload}` envelope returned
//!   by every operator-facing control operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// --- Error types ---

/// Top-level error type.
///
/// Each variant corresponds to a class of failure with its own recovery rule:
/// discovery and tool failures are local, model failures end a turn, and
/// connection failures are retried unless the platform cannot spawn processes.
#[derive(Debug, thiserror::Error)]
pub enum McpilotError {
    /// A candidate server definition could not be analyzed.
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Bringing up a tool-server connection failed.
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// An operation needed a live tool-server session and there was none.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The connection was torn down while a request was in flight.
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// A tool call was rejected or failed on the server side.
    #[error("Tool error: {0}")]
    Tool(String),

    /// The language model call failed or timed out.
    #[error("Model error: {0}")]
    Model(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Server registry lookup or persistence failed.
    #[error("Registry error: {0}")]
    Registry(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// The turn was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while establishing a link to a tool-server process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// A lifecycle step exceeded its deadline.
    #[error("{step} timed out after {secs}s")]
    Timeout {
        /// The step that timed out (spawn, session, initialize, list_tools).
        step: &'static str,
        /// The configured deadline in seconds.
        secs: u64,
    },

    /// The child process could not be started.
    #[error("failed to spawn '{command}': {reason}")]
    Spawn {
        /// Program that was launched.
        command: String,
        /// Underlying OS error text.
        reason: String,
    },

    /// The server started but the initialize exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The execution backend cannot create child processes at all.
    #[error("subprocess creation is not supported: {0}")]
    Unsupported(String),
}

impl ConnectionError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Unsupported(_))
    }
}

/// A convenience `Result` alias using [`McpilotError`].
pub type McpilotResult<T> = Result<T, McpilotError>;

// --- Message types ---

/// The role of the participant that authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human end-user.
    User,
    /// The language model.
    Assistant,
    /// A system-level instruction or prompt.
    System,
    /// Output produced by a tool invocation.
    Tool,
}

/// A single role-tagged message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for this message.
    pub id: Uuid,
    /// The role of the message author.
    pub role: Role,
    /// The textual content of the message.
    pub content: String,
    /// UTC timestamp of when the message was created.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary key-value metadata attached to the message.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Creates a new message with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Creates a new message with [`Role::User`].
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Creates a new message with [`Role::Assistant`].
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Creates a new message with [`Role::System`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a new message with [`Role::Tool`].
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Attaches a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// --- Tool types ---

/// A request from the model to invoke a specific tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier of this invocation within a turn.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// JSON arguments to pass to the tool.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a call with a fresh identifier.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }
    }
}

/// The result returned after executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The ID of the [`ToolCall`] this result corresponds to.
    pub call_id: String,
    /// The textual output produced by the tool.
    pub content: String,
    /// Whether the tool execution ended in an error.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful tool result.
    pub fn success(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Creates an error tool result.
    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

// --- Control surface ---

/// Structured result of an operator-facing control operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable summary.
    pub message: String,
    /// Operation-specific data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ControlResponse {
    /// A successful response without payload.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload: None,
        }
    }

    /// A successful response carrying a payload.
    pub fn with_payload(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            success: true,
            message: message.into(),
            payload: Some(payload),
        }
    }

    /// A failed response.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            payload: None,
        }
    }

    /// Maps an operation result onto the envelope.
    pub fn from_result<T: Serialize>(
        result: McpilotResult<T>,
        success_message: impl Into<String>,
    ) -> Self {
        match result {
            Ok(value) => match serde_json::to_value(value) {
                Ok(serde_json::Value::Null) => Self::ok(success_message),
                Ok(payload) => Self::with_payload(success_message, payload),
                Err(e) => Self::failure(format!("failed to encode payload: {e}")),
            },
            Err(e) => Self::failure(e.to_string()),
        }
    }
}
