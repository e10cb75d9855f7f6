use crate::backends::openai::OpenAiBackend;
use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use mcpilot_core::{McpilotResult, Message};
use mcpilot_mcp::FunctionTool;

/// LLM client that dispatches to the correct provider backend.
pub struct LlmClient {
    backend: Box<dyn LlmBackend>,
}

impl LlmClient {
    /// Builds the backend for `config.provider`.
    pub fn new(config: ModelConfig) -> McpilotResult<Self> {
        let backend: Box<dyn LlmBackend> = match config.provider {
            LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq | LlmProvider::Ollama => {
                Box::new(OpenAiBackend::new(config)?)
            }
        };
        Ok(Self { backend })
    }

    /// Create from a pre-built backend (for custom providers and tests).
    pub fn from_backend(backend: Box<dyn LlmBackend>) -> Self {
        Self { backend }
    }

    /// Non-streaming chat completion.
    pub async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[FunctionTool],
    ) -> McpilotResult<String> {
        self.backend.chat(system_prompt, messages, tools).await
    }
}
