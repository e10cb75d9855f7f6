//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};

/// Protocol revision announced in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlation id echoed back by the server.
    pub id: u64,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Builds a request with the given id.
    pub fn new(id: u64, method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Notification name.
    pub method: String,
    /// Notification parameters.
    pub params: serde_json::Value,
}

impl JsonRpcNotification {
    /// Builds a notification; missing params become an empty object.
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params: params.unwrap_or_else(|| serde_json::json!({})),
        }
    }
}

/// A JSON-RPC 2.0 message received from the server.
///
/// Responses carry `id` and one of `result`/`error`. Server-initiated
/// requests and notifications carry `method` instead and are not routed.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol marker sent by the server.
    #[serde(default)]
    pub jsonrpc: String,
    /// Correlation id of the request being answered.
    #[serde(default)]
    pub id: Option<u64>,
    /// Present on server-initiated messages.
    #[serde(default)]
    pub method: Option<String>,
    /// Success payload.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Failure payload.
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Splits the response into its success or error payload.
    ///
    /// A response with neither is read as an empty result.
    pub fn into_result(self) -> Result<serde_json::Value, JsonRpcError> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(serde_json::Value::Null),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// A tool advertised by a server in its `tools/list` response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolDescriptor {
    /// Tool name, unique within one server.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the argument object.
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// Result of a `tools/call` request.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolCallOutcome {
    /// Content blocks produced by the tool.
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Whether the server reports the call as failed.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallOutcome {
    /// Concatenates all content into one string.
    ///
    /// Text blocks contribute their text; any other block is rendered as JSON.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(ContentBlock::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One MCP content block (`text`, `image`, `resource`, ...).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContentBlock {
    /// Block kind.
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text payload for `text` blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Remaining fields of non-text blocks.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentBlock {
    /// A plain text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".into(),
            text: Some(text.into()),
            extra: serde_json::Map::new(),
        }
    }

    fn render(&self) -> String {
        match &self.text {
            Some(text) => text.clone(),
            None => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerCapabilities {
    /// Tool capability block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Resource capability block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<serde_json::Value>,
    /// Prompt capability block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<serde_json::Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitializeResult {
    /// Protocol revision chosen by the server.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Self-reported server identity.
    #[serde(default, rename = "serverInfo", skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
}

/// Name and version a server reports about itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,
    /// Server version.
    #[serde(default)]
    pub version: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_missing_params() {
        let req = JsonRpcRequest::new(2, "tools/list", None);
        let parsed = serde_json::to_value(&req).unwrap();
        assert_eq!(parsed["jsonrpc"], "2.0");
        assert_eq!(parsed["id"], 2);
        assert!(parsed.get("params").is_none());
    }

    #[test]
    fn test_notification_defaults_params_to_object() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let parsed = serde_json::to_value(&note).unwrap();
        assert!(parsed.get("id").is_none());
        assert_eq!(parsed["params"], serde_json::json!({}));
    }

    #[test]
    fn test_error_response_into_result() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, -32601);
        assert_eq!(err.to_string(), "Method not found (code -32601)");
    }

    #[test]
    fn test_server_request_is_recognized() {
        let json = r#"{"jsonrpc":"2.0","id":7,"method":"roots/list"}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.method.as_deref(), Some("roots/list"));
    }

    #[test]
    fn test_tool_descriptor_default_schema() {
        let tool: ToolDescriptor = serde_json::from_str(r#"{"name":"list_tables"}"#).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.description.is_empty());
    }

    #[test]
    fn test_outcome_joins_text_and_renders_other_blocks() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "text", "text": "second"}
            ]
        }"#;
        let outcome: ToolCallOutcome = serde_json::from_str(json).unwrap();
        assert!(!outcome.is_error);
        let joined = outcome.joined_text();
        let lines: Vec<&str> = joined.lines().collect();
        assert_eq!(lines[0], "first");
        assert!(lines[1].contains("\"mimeType\":\"image/png\""));
        assert_eq!(lines[2], "second");
    }

    #[test]
    fn test_initialize_result_parse() {
        let json = r#"{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sqlite","version":"1.2"}}"#;
        let result: InitializeResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.protocol_version, PROTOCOL_VERSION);
        assert!(result.capabilities.tools.is_some());
        assert_eq!(result.server_info.unwrap().name, "sqlite");
    }
}
