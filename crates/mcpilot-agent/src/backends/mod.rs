/// OpenAI-compatible chat completions.
pub mod openai;

use async_trait::async_trait;
use mcpilot_core::{McpilotResult, Message};
use mcpilot_mcp::FunctionTool;

/// A chat-completions provider.
///
/// Backends return the assistant's text. Providers that answer with native
/// tool calls render them as a fenced `{"tool", "arguments"}` block so the
/// reasoning loop extracts every call the same way.
///
/// To add a provider: implement this trait in `backends/` and wire it up in
/// `LlmClient::new()`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Non-streaming chat completion.
    ///
    /// `tools` is empty unless native tool calling is enabled.
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[FunctionTool],
    ) -> McpilotResult<String>;
}
