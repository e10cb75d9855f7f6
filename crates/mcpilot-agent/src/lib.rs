//! Model side of mcpilot: backends, tool-call extraction and the
//! reasoning loop that ties a model to the tool façade.

/// Model provider backends.
pub mod backends;
/// Model and conversation settings.
pub mod config;
/// Request/response and streaming entry points.
pub mod conversation;
/// Tool-call extraction from model text.
pub mod extract;
/// Provider-agnostic model client.
pub mod llm;
/// System prompt assembly.
pub mod prompt;
/// The reasoning loop.
pub mod runner;
/// Turn progress events.
pub mod stream;

pub use backends::LlmBackend;
pub use config::{AgentConfig, LlmProvider, ModelConfig};
pub use conversation::{ChatReply, ChatRequest, ConversationService, McpStatus};
pub use extract::{Extraction, ToolCallExtractor, ToolCallStrategy};
pub use llm::LlmClient;
pub use prompt::Persona;
pub use runner::{LoopConfig, ReasoningLoop, StopReason, ToolExchange, TurnOutcome};
pub use stream::{EventKind, StreamEvent};
