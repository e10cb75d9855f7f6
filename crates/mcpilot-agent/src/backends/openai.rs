//! Chat-completions backend for OpenAI-compatible providers.

use super::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use async_trait::async_trait;
use mcpilot_core::{McpilotError, McpilotResult, Message, Role};
use mcpilot_mcp::FunctionTool;

/// OpenAI-compatible API backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the chat completions API.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    /// Creates a backend whose HTTP client enforces the configured timeout.
    pub fn new(config: ModelConfig) -> McpilotResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| McpilotError::Http(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn build_messages(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::new();

        if let Some(sys) = system_prompt {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in messages {
            let role = match m.role {
                // The caller's system prompt is authoritative.
                Role::System => continue,
                // Tool results go back as user turns; not every provider
                // accepts a bare `tool` role without a native call id.
                Role::User | Role::Tool => "user",
                Role::Assistant => "assistant",
            };
            api_messages.push(serde_json::json!({
                "role": role,
                "content": m.content
            }));
        }

        api_messages
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        if self.config.provider == LlmProvider::OpenRouter {
            request
                .header("HTTP-Referer", "https://github.com/mcpilot/mcpilot")
                .header("X-Title", "mcpilot")
        } else {
            request
        }
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(
        &self,
        system_prompt: Option<&str>,
        messages: &[Message],
        tools: &[FunctionTool],
    ) -> McpilotResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());

        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": self.build_messages(system_prompt, messages),
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(tools)?;
        }

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    McpilotError::Model(format!(
                        "model call timed out after {}s",
                        self.config.request_timeout_secs
                    ))
                } else {
                    McpilotError::Http(e.to_string())
                }
            })?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| McpilotError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(McpilotError::Model(format!(
                "{} API error {status}: {resp_body}",
                self.config.model_id
            )));
        }

        parse_openai_response(&resp_body)
    }
}

/// Extracts the assistant text from a chat-completions response.
///
/// A native tool call is rendered as a fenced block after any text content;
/// only the first call is kept since the loop runs one tool at a time.
pub fn parse_openai_response(body: &serde_json::Value) -> McpilotResult<String> {
    let message = body["choices"]
        .get(0)
        .map(|choice| &choice["message"])
        .ok_or_else(|| McpilotError::Model(format!("response has no choices: {body}")))?;
    let content = message["content"].as_str().unwrap_or_default().trim().to_string();

    let first_call = message["tool_calls"]
        .as_array()
        .and_then(|calls| calls.first())
        .and_then(|tc| {
            let name = tc["function"]["name"].as_str()?;
            let arguments = match &tc["function"]["arguments"] {
                serde_json::Value::String(raw) => {
                    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
                }
                other if other.is_object() => other.clone(),
                _ => serde_json::json!({}),
            };
            Some(serde_json::json!({"tool": name, "arguments": arguments}))
        });

    Ok(match first_call {
        Some(call) if content.is_empty() => format!("```json\n{call}\n```"),
        Some(call) => format!("{content}\n\n```json\n{call}\n```"),
        None => content,
    })
}
