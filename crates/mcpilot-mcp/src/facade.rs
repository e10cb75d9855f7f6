//! Model-facing view of the tool catalog.
//!
//! The façade sits between the reasoning loop and a [`ToolSource`]. Outgoing
//! catalogs are repaired and ordered; incoming calls get their arguments
//! patched and their results normalized.

use crate::protocol::{ToolCallOutcome, ToolDescriptor};
use crate::schema::{collapse_type_unions, declared_type, repair_schema};
use crate::selection::ToolSelection;
use crate::source::ToolSource;
use mcpilot_core::{McpilotError, McpilotResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const DISCOVERY_WORDS: &[&str] = &["list", "describe", "show", "schema", "info"];
const MUTATING_WORDS: &[&str] = &[
    "create", "insert", "update", "delete", "write", "drop", "post", "publish", "remove",
];

/// A tool in the `{type: "function", function: {...}}` wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The function definition.
    pub function: FunctionSpec,
}

/// Name, description and parameter schema of a [`FunctionTool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// Repaired JSON schema of the arguments.
    pub parameters: serde_json::Value,
}

impl FunctionTool {
    fn from_descriptor(tool: ToolDescriptor, parameters: serde_json::Value) -> Self {
        Self {
            kind: "function".into(),
            function: FunctionSpec {
                name: tool.name,
                description: tool.description,
                parameters,
            },
        }
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        &self.function.name
    }
}

/// Normalized result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    /// Always true; failed calls are returned as errors.
    pub success: bool,
    /// Parsed JSON when the content is JSON, otherwise the text itself.
    pub data: serde_json::Value,
    /// The joined text content as returned by the server.
    pub raw_content: String,
}

impl ToolOutput {
    fn from_outcome(outcome: &ToolCallOutcome) -> Self {
        let raw_content = outcome.joined_text();
        let data = serde_json::from_str(raw_content.trim())
            .unwrap_or_else(|_| serde_json::Value::String(raw_content.clone()));
        Self {
            success: true,
            data,
            raw_content,
        }
    }
}

/// Tuning for the façade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacadeConfig {
    /// Collapse list-valued `type`s for providers that reject them.
    #[serde(default = "default_true")]
    pub collapse_type_unions: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FacadeConfig {
    fn default() -> Self {
        Self {
            collapse_type_unions: true,
        }
    }
}

/// Ordering rank: discovery tools, then neutral ones, then mutating ones.
pub fn tool_rank(name: &str) -> u8 {
    let lower = name.to_lowercase();
    let words: Vec<&str> = lower.split(|c: char| !c.is_ascii_alphanumeric()).collect();
    let has = |set: &[&str]| words.iter().any(|w| set.contains(w));
    if has(DISCOVERY_WORDS) {
        0
    } else if has(MUTATING_WORDS) {
        2
    } else {
        1
    }
}

/// Repairs structured values sent where the schema expects a string.
///
/// Models often pass `{"rows": [..]}` for a parameter documented as a
/// JSON-encoded string; such values are serialized. An argument payload
/// that is itself a JSON string is parsed first.
pub fn repair_arguments(schema: &serde_json::Value, arguments: serde_json::Value) -> serde_json::Value {
    let mut arguments = match arguments {
        serde_json::Value::String(s) => match serde_json::from_str(&s) {
            Ok(parsed @ serde_json::Value::Object(_)) => parsed,
            _ => serde_json::Value::String(s),
        },
        serde_json::Value::Null => serde_json::json!({}),
        other => other,
    };

    let Some(props) = schema.get("properties") else {
        return arguments;
    };
    if let Some(args) = arguments.as_object_mut() {
        for (key, value) in args.iter_mut() {
            let expects_string = props.get(key).and_then(declared_type) == Some("string");
            if expects_string && (value.is_object() || value.is_array()) {
                debug!(param = %key, "serializing structured value for string parameter");
                *value = serde_json::Value::String(value.to_string());
            }
        }
    }
    arguments
}

/// Loose primitive check. Structured values pass for strings since
/// [`repair_arguments`] serializes them before the call.
fn value_fits(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        _ if value.is_null() => true,
        "string" => value.is_string() || value.is_object() || value.is_array(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

/// Stable function-calling contract over a [`ToolSource`].
pub struct ToolFacade {
    source: Arc<dyn ToolSource>,
    config: FacadeConfig,
    schemas: RwLock<HashMap<String, serde_json::Value>>,
}

impl ToolFacade {
    /// Wraps a tool source.
    pub fn new(source: Arc<dyn ToolSource>, config: FacadeConfig) -> Self {
        Self {
            source,
            config,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// The wrapped source.
    pub fn source(&self) -> &Arc<dyn ToolSource> {
        &self.source
    }

    /// The live catalog, repaired, filtered and ordered for the model.
    pub async fn get_tools_for_model(
        &self,
        selection: &ToolSelection,
    ) -> McpilotResult<Vec<FunctionTool>> {
        if selection.is_disabled() {
            return Ok(Vec::new());
        }
        let tools = self.source.list_tools().await?;

        let mut schemas = HashMap::with_capacity(tools.len());
        let mut catalog: Vec<FunctionTool> = tools
            .into_iter()
            .filter(|t| selection.allows(&t.name))
            .map(|tool| {
                let mut parameters = repair_schema(&tool.input_schema);
                if self.config.collapse_type_unions {
                    parameters = collapse_type_unions(&parameters);
                }
                schemas.insert(tool.name.clone(), parameters.clone());
                FunctionTool::from_descriptor(tool, parameters)
            })
            .collect();
        catalog.sort_by_key(|t| tool_rank(t.name()));

        *self.schemas.write() = schemas;
        Ok(catalog)
    }

    /// Checks required parameters against the cached schema.
    ///
    /// Unknown tools pass; the server has the final word.
    pub fn validate_arguments(&self, name: &str, arguments: &serde_json::Value) -> Result<(), String> {
        let schemas = self.schemas.read();
        let Some(schema) = schemas.get(name) else {
            return Ok(());
        };
        let Some(args) = arguments.as_object() else {
            return Err(format!("arguments for '{name}' must be a JSON object"));
        };
        let required = schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        for param in required {
            if !args.contains_key(param) {
                return Err(format!("missing required parameter '{param}' for '{name}'"));
            }
        }
        if let Some(props) = schema.get("properties") {
            for (key, value) in args {
                let Some(expected) = props.get(key).and_then(declared_type) else {
                    continue;
                };
                if !value_fits(expected, value) {
                    return Err(format!(
                        "parameter '{key}' for '{name}' must be of type {expected}"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Invokes a tool and normalizes its result.
    ///
    /// A result the server flags as an error is returned as
    /// [`McpilotError::Tool`] carrying the server's text.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        selection: &ToolSelection,
    ) -> McpilotResult<ToolOutput> {
        if !selection.allows(name) {
            return Err(McpilotError::Tool(format!(
                "tool '{name}' is not enabled for this conversation"
            )));
        }
        if !self.schemas.read().contains_key(name) {
            // Populate the schema cache so argument repair has something to go on.
            if let Err(e) = self.get_tools_for_model(&ToolSelection::All).await {
                warn!(tool = %name, error = %e, "could not refresh tool schemas");
            }
        }
        let schema = self
            .schemas
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        let arguments = repair_arguments(&schema, arguments);

        let outcome = self.source.call_tool(name, arguments).await?;
        if outcome.is_error {
            return Err(McpilotError::Tool(outcome.joined_text()));
        }
        Ok(ToolOutput::from_outcome(&outcome))
    }
}

/// Renders a catalog as a bullet list for a system prompt.
pub fn render_catalog(tools: &[FunctionTool]) -> String {
    tools
        .iter()
        .map(|tool| {
            let params = tool
                .function
                .parameters
                .get("properties")
                .and_then(|p| p.as_object())
                .map(|props| {
                    let required: Vec<&str> = tool
                        .function
                        .parameters
                        .get("required")
                        .and_then(|r| r.as_array())
                        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
                        .unwrap_or_default();
                    props
                        .iter()
                        .map(|(name, schema)| {
                            let ty = declared_type(schema).unwrap_or("any");
                            let marker = if required.contains(&name.as_str()) { "" } else { "?" };
                            format!("{name}{marker}: {ty}")
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            let description = if tool.function.description.is_empty() {
                "(no description)"
            } else {
                tool.function.description.as_str()
            };
            format!("- {}({params}): {description}", tool.function.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
