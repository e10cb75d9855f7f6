//! Pulling tool calls out of free-form model text.
//!
//! Models are asked to answer with a fenced JSON block, but they drift: some
//! drop the fence, some write `describe_table({"table": "users"})`, some use
//! the `Action:` / `Action Input:` convention. Each habit is one
//! [`ToolCallStrategy`]; the [`ToolCallExtractor`] tries them in order and
//! the first syntactically valid call wins.

use mcpilot_core::ToolCall;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Keys naming the tool, with whether an argument key must accompany them.
const NAME_KEYS: &[(&str, bool)] = &[("tool", false), ("tool_name", false), ("name", true)];
const ARGUMENT_KEYS: &[&str] = &["arguments", "args", "parameters", "tool_args", "input"];

// Literal patterns; the unit tests exercise every one of them.
#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid built-in pattern")
}

static FENCED_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?s)```[ \t]*([A-Za-z_]*)[ \t]*\r?\n?(.*?)```"));
static CALL_SYNTAX_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"([A-Za-z_][A-Za-z0-9_.\-]*)\s*\("));
static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(r"(?mi)^\s*Action\s*:\s*`?([A-Za-z_][A-Za-z0-9_.\-]*)`?\s*$"));
static ACTION_INPUT_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"(?i)Action\s+Input\s*:"));
static PROMISE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\b(i\s*(will|'ll|’ll|am going to|shall)|let\s+me|i\s+need\s+to|i\s+should|first,?\s+i('ll| will))\s+(now\s+|first\s+|quickly\s+)?(use|call|invoke|run|query|check|look\s+up|fetch|execute|search)\b",
        r"(?i)\b(using|calling|invoking)\s+the\s+`?[A-Za-z0-9_\-]+`?\s+tool\b",
        r"(?i)\bwait(ing)?\s+for\s+the\s+(tool|result)",
        r"(我将|我会|让我|我来|我需要|我先)(先|现在|马上)?(调用|使用|查询|执行|查看|获取)",
    ]
    .iter()
    .map(|p| compile(p))
    .collect()
});

/// Reads a `{tool/name/tool_name, arguments/args/...}` object as a call.
fn call_from_value(value: &Value) -> Option<ToolCall> {
    let object = value.as_object()?;
    let (name, args_required) = NAME_KEYS.iter().find_map(|(key, args_required)| {
        object
            .get(*key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(|n| (n, *args_required))
    })?;

    let raw_args = ARGUMENT_KEYS.iter().find_map(|key| object.get(*key));
    if args_required && raw_args.is_none() {
        return None;
    }
    let arguments = match raw_args {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(Value::Object(map)) => Value::Object(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => return None,
        },
        Some(_) => return None,
    };
    Some(ToolCall::new(name, arguments))
}

/// Returns the balanced `{...}` starting at byte `start`, if it closes.
///
/// Braces inside JSON strings are ignored.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    let tail = text.get(start..)?;
    if !tail.starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in tail.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&tail[..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Every parseable top-level JSON object in `text`, in order.
fn json_objects(text: &str) -> impl Iterator<Item = Value> + '_ {
    let mut cursor = 0;
    std::iter::from_fn(move || {
        while let Some(found) = text.get(cursor..)?.find('{') {
            let start = cursor + found;
            match balanced_object(text, start) {
                Some(candidate) => match serde_json::from_str::<Value>(candidate) {
                    Ok(value) => {
                        cursor = start + candidate.len();
                        return Some(value);
                    }
                    Err(_) => cursor = start + 1,
                },
                None => cursor = start + 1,
            }
        }
        None
    })
}

/// One way of recognizing a tool call in model text.
pub trait ToolCallStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// The first call this strategy recognizes, if any.
    ///
    /// `known_tools` is the catalog offered to the model this turn.
    fn extract(&self, text: &str, known_tools: &[String]) -> Option<ToolCall>;
}

/// A fenced code block holding a call object.
///
/// The fence is an explicit request, so the tool name is not checked
/// against the catalog here; an unknown name fails at call time and the
/// model is told so.
pub struct FencedBlockStrategy;

impl ToolCallStrategy for FencedBlockStrategy {
    fn name(&self) -> &'static str {
        "fenced_block"
    }

    fn extract(&self, text: &str, _known_tools: &[String]) -> Option<ToolCall> {
        FENCED_RE.captures_iter(text).find_map(|caps| {
            let lang = caps.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase();
            if !matches!(lang.as_str(), "" | "json" | "tool" | "tool_call" | "tool_code") {
                return None;
            }
            let body = caps.get(2)?.as_str().trim();
            serde_json::from_str::<Value>(body)
                .ok()
                .and_then(|value| call_from_value(&value))
                .or_else(|| json_objects(body).find_map(|value| call_from_value(&value)))
        })
    }
}

/// A call object written inline, without a fence.
pub struct BareObjectStrategy;

impl ToolCallStrategy for BareObjectStrategy {
    fn name(&self) -> &'static str {
        "bare_object"
    }

    fn extract(&self, text: &str, known_tools: &[String]) -> Option<ToolCall> {
        json_objects(text)
            .filter_map(|value| call_from_value(&value))
            .find(|call| known_tools.contains(&call.name))
    }
}

/// Function-call syntax or the `Action:` / `Action Input:` form in prose.
///
/// Only catalog names are accepted; ordinary words followed by a
/// parenthesis are never mistaken for calls.
pub struct ProseStrategy;

impl ProseStrategy {
    fn action_form(text: &str, known_tools: &[String]) -> Option<ToolCall> {
        let caps = ACTION_RE.captures(text)?;
        let name = caps.get(1)?.as_str();
        if !known_tools.iter().any(|t| t == name) {
            return None;
        }
        let after_action = caps.get(0)?.end();
        let arguments = match ACTION_INPUT_RE.find_at(text, after_action) {
            Some(input) => {
                let brace = text[input.end()..].find('{').map(|i| input.end() + i);
                match brace.and_then(|start| balanced_object(text, start)) {
                    Some(raw) => serde_json::from_str::<Value>(raw).ok().filter(Value::is_object)?,
                    None => Value::Object(Default::default()),
                }
            }
            None => Value::Object(Default::default()),
        };
        Some(ToolCall::new(name, arguments))
    }

    fn call_syntax(text: &str, known_tools: &[String]) -> Option<ToolCall> {
        CALL_SYNTAX_RE.captures_iter(text).find_map(|caps| {
            let name = caps.get(1)?.as_str();
            if !known_tools.iter().any(|t| t == name) {
                return None;
            }
            let open = caps.get(0)?.end();
            let rest = text[open..].trim_start();
            let inner_start = text.len() - rest.len();
            if rest.starts_with(')') {
                return Some(ToolCall::new(name, Value::Object(Default::default())));
            }
            let raw = balanced_object(text, inner_start)?;
            let arguments = serde_json::from_str::<Value>(raw).ok().filter(Value::is_object)?;
            Some(ToolCall::new(name, arguments))
        })
    }
}

impl ToolCallStrategy for ProseStrategy {
    fn name(&self) -> &'static str {
        "prose"
    }

    fn extract(&self, text: &str, known_tools: &[String]) -> Option<ToolCall> {
        Self::action_form(text, known_tools).or_else(|| Self::call_syntax(text, known_tools))
    }
}

/// Whether `text` announces a tool call it does not make.
pub fn promises_tool_use(text: &str) -> bool {
    PROMISE_RES.iter().any(|re| re.is_match(text))
}

/// What a model reply amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// A tool call to execute.
    Call {
        /// The call.
        call: ToolCall,
        /// Strategy that found it.
        strategy: &'static str,
    },
    /// The text promises tool use without a call; it is treated as final.
    NarratedPromise,
    /// A plain answer.
    Answer,
}

/// Ordered list of strategies plus the hallucination guard.
pub struct ToolCallExtractor {
    strategies: Vec<Box<dyn ToolCallStrategy>>,
}

impl Default for ToolCallExtractor {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(FencedBlockStrategy),
                Box::new(BareObjectStrategy),
                Box::new(ProseStrategy),
            ],
        }
    }
}

impl ToolCallExtractor {
    /// An extractor with a custom strategy order.
    pub fn with_strategies(strategies: Vec<Box<dyn ToolCallStrategy>>) -> Self {
        Self { strategies }
    }

    /// The first call any strategy finds.
    pub fn extract(&self, text: &str, known_tools: &[String]) -> Option<(ToolCall, &'static str)> {
        self.strategies
            .iter()
            .find_map(|s| s.extract(text, known_tools).map(|call| (call, s.name())))
    }

    /// Classifies a model reply.
    pub fn analyze(&self, text: &str, known_tools: &[String]) -> Extraction {
        match self.extract(text, known_tools) {
            Some((call, strategy)) => Extraction::Call { call, strategy },
            None if promises_tool_use(text) => Extraction::NarratedPromise,
            None => Extraction::Answer,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn known() -> Vec<String> {
        vec!["list_tables".into(), "describe_table".into()]
    }

    fn call(text: &str) -> Option<(String, Value, &'static str)> {
        ToolCallExtractor::default()
            .extract(text, &known())
            .map(|(c, s)| (c.name, c.arguments, s))
    }

    #[test]
    fn test_fenced_block() {
        let text = "Let me check.\n```json\n{\"tool\": \"describe_table\", \"arguments\": {\"table\": \"users\"}}\n```";
        let (name, args, strategy) = call(text).unwrap();
        assert_eq!(name, "describe_table");
        assert_eq!(args, json!({"table": "users"}));
        assert_eq!(strategy, "fenced_block");
    }

    #[test]
    fn test_fenced_block_alternate_shapes() {
        let (name, args, _) = call("```\n{\"name\": \"describe_table\", \"parameters\": {\"table\": \"t\"}}\n```").unwrap();
        assert_eq!((name.as_str(), args), ("describe_table", json!({"table": "t"})));

        let (name, args, _) =
            call("```tool_call\n{\"tool_name\": \"list_tables\", \"tool_args\": \"{}\"}\n```").unwrap();
        assert_eq!((name.as_str(), args), ("list_tables", json!({})));
    }

    #[test]
    fn test_fenced_code_in_other_language_is_not_a_fence_call() {
        // Falls through to the bare-object scan, which checks the catalog.
        let (_, _, strategy) = call("```python\n{\"tool\": \"list_tables\"}\n```").unwrap();
        assert_eq!(strategy, "bare_object");
        assert!(call("```python\n{\"tool\": \"shutil_rmtree\"}\n```").is_none());
    }

    #[test]
    fn test_name_shape_needs_arguments() {
        // A JSON answer that happens to have a "name" field is not a call.
        assert!(call("```json\n{\"name\": \"list_tables\"}\n```").is_none());
    }

    #[test]
    fn test_bare_object_requires_known_tool() {
        let (name, _, strategy) =
            call("Sure: {\"tool\": \"list_tables\", \"arguments\": {}} is what I need.").unwrap();
        assert_eq!(name, "list_tables");
        assert_eq!(strategy, "bare_object");

        assert!(call("{\"tool\": \"rm_rf\", \"arguments\": {}}").is_none());
    }

    #[test]
    fn test_balanced_scan_ignores_braces_in_strings() {
        let text = r#"{"tool": "describe_table", "arguments": {"table": "we}ird{"}}"#;
        let (_, args, _) = call(text).unwrap();
        assert_eq!(args, json!({"table": "we}ird{"}));
    }

    #[test]
    fn test_prose_call_syntax() {
        let (name, args, strategy) = call("I'd run describe_table({\"table\": \"orders\"}) next").unwrap();
        assert_eq!(name, "describe_table");
        assert_eq!(args, json!({"table": "orders"}));
        assert_eq!(strategy, "prose");

        let (name, args, _) = call("Calling list_tables() now").unwrap();
        assert_eq!((name.as_str(), args), ("list_tables", json!({})));
    }

    #[test]
    fn test_prose_action_form() {
        let text = "Thought: need schema\nAction: describe_table\nAction Input: {\"table\": \"users\"}";
        let (name, args, strategy) = call(text).unwrap();
        assert_eq!(name, "describe_table");
        assert_eq!(args, json!({"table": "users"}));
        assert_eq!(strategy, "prose");
    }

    #[test]
    fn test_unknown_prose_names_are_ignored() {
        assert!(call("The result (see above) is print(42).").is_none());
    }

    #[test]
    fn test_fenced_block_beats_prose() {
        let text = "I could call list_tables() but instead:\n```json\n{\"tool\": \"describe_table\", \"arguments\": {\"table\": \"users\"}}\n```";
        let (name, _, strategy) = call(text).unwrap();
        assert_eq!(name, "describe_table");
        assert_eq!(strategy, "fenced_block");
    }

    #[test]
    fn test_promise_detection() {
        assert!(promises_tool_use("I will use the list_tables tool to find out."));
        assert!(promises_tool_use("Let me query the database for you."));
        assert!(promises_tool_use("I'll check that now."));
        assert!(promises_tool_use("我将调用工具查询数据库"));
        assert!(!promises_tool_use("There are two tables: orders and users."));
    }

    #[test]
    fn test_analyze_classification() {
        let extractor = ToolCallExtractor::default();
        assert_eq!(
            extractor.analyze("I will use the list_tables tool.", &known()),
            Extraction::NarratedPromise
        );
        assert_eq!(extractor.analyze("Two tables.", &known()), Extraction::Answer);
        assert!(matches!(
            extractor.analyze("list_tables()", &known()),
            Extraction::Call { strategy: "prose", .. }
        ));
    }
}
