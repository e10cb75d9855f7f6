use crate::prompt::Persona;
use mcpilot_mcp::ToolSelection;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI-compatible chat-completions providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// api.openai.com
    OpenAi,
    /// OpenRouter; sends the attribution headers it asks for.
    OpenRouter,
    /// Groq cloud inference.
    Groq,
    /// A local Ollama daemon. No API key needed.
    Ollama,
}

/// Which model to talk to and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider, used for the default base URL and extra headers.
    pub provider: LlmProvider,
    /// Model identifier sent with every request.
    pub model_id: String,
    /// Bearer token. Empty means no `Authorization` header.
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default base URL.
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Completion token limit.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on one model call, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Send the catalog as native `tools` instead of relying on the prompt.
    #[serde(default)]
    pub native_tools: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_request_timeout() -> u64 {
    120
}

impl ModelConfig {
    /// A config with defaults for everything but provider and model.
    pub fn new(provider: LlmProvider, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: String::new(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            native_tools: false,
        }
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::OpenRouter => "https://openrouter.ai/api",
                LlmProvider::Groq => "https://api.groq.com/openai",
                LlmProvider::Ollama => "http://localhost:11434",
            }
        }
    }

    /// Per-call timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Conversation-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model round trips allowed per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Default persona for requests that bring none.
    #[serde(default)]
    pub persona: Persona,
    /// Default tool selection for requests that bring none.
    #[serde(default)]
    pub tools: ToolSelection,
}

fn default_max_iterations() -> u32 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            persona: Persona::default(),
            tools: ToolSelection::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_defaults_and_override() {
        let mut config = ModelConfig::new(LlmProvider::Groq, "llama-3.1-8b-instant");
        assert_eq!(config.base_url(), "https://api.groq.com/openai");
        config.api_base_url = Some("http://127.0.0.1:9000/".into());
        assert_eq!(config.base_url(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_model_config_defaults_from_json() {
        let config: ModelConfig =
            serde_json::from_str(r#"{"provider": "ollama", "model_id": "qwen2.5"}"#).unwrap();
        assert_eq!(config.provider, LlmProvider::Ollama);
        assert!(config.api_key.is_empty());
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert!(!config.native_tools);
    }

    #[test]
    fn test_agent_config_tool_selection_forms() {
        let config: AgentConfig = serde_json::from_str(r#"{"tools": false}"#).unwrap();
        assert_eq!(config.max_iterations, 5);
        assert!(config.tools.is_disabled());

        let config: AgentConfig = serde_json::from_str(r#"{"tools": ["list_tables"]}"#).unwrap();
        assert!(config.tools.allows("list_tables"));
        assert!(!config.tools.allows("drop_table"));
    }
}
