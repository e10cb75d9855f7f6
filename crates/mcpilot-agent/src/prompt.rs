//! System prompt assembly.

use mcpilot_mcp::{render_catalog, FunctionTool};
use serde::{Deserialize, Serialize};

/// Who the assistant is for a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Display name.
    #[serde(default = "default_name")]
    pub name: String,
    /// Free-form behavior instructions.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Extra background appended under its own heading.
    #[serde(default)]
    pub context: Option<String>,
}

fn default_name() -> String {
    "mcpilot".to_string()
}

fn default_instructions() -> String {
    "You are a helpful assistant. Use the available tools to look things up \
     instead of guessing, and answer concisely."
        .to_string()
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: default_name(),
            instructions: default_instructions(),
            context: None,
        }
    }
}

const TOOL_PROTOCOL: &str = "To call a tool, reply with exactly one fenced block and nothing after it:\n\
\n\
```json\n\
{\"tool\": \"<tool name>\", \"arguments\": {\"<parameter>\": <value>}}\n\
```\n\
\n\
Rules:\n\
- Call one tool at a time and wait for its result.\n\
- Only use tools from the list above, with the parameters they declare.\n\
- Never announce that you will use a tool without including the block.\n\
- When you have enough information, answer in plain text with no tool block.";

/// Builds the system prompt for one turn.
///
/// The tool section is omitted entirely when `tools` is empty.
pub fn build_system_prompt(persona: &Persona, tools: &[FunctionTool]) -> String {
    let mut prompt = format!("You are {}.\n\n{}", persona.name, persona.instructions.trim());

    if let Some(context) = persona.context.as_deref().filter(|c| !c.trim().is_empty()) {
        prompt.push_str("\n\n## Context\n");
        prompt.push_str(context.trim());
    }

    if !tools.is_empty() {
        prompt.push_str("\n\n## Tools\n");
        prompt.push_str(&render_catalog(tools));
        prompt.push_str("\n\n");
        prompt.push_str(TOOL_PROTOCOL);
    }
    prompt
}
