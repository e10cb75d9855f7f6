//! Repairs for tool parameter schemas before they reach a model provider.
//!
//! Servers in the wild publish schemas that strict function-calling
//! providers reject: arrays without `items`, or `type` given as a list.

use serde_json::{Map, Value};

/// Keywords whose value is a single subschema.
const SCHEMA_KEYWORDS: &[&str] = &["items", "additionalProperties", "not", "contains"];
/// Keywords whose value is a list of subschemas.
const SCHEMA_LIST_KEYWORDS: &[&str] = &["anyOf", "oneOf", "allOf", "prefixItems"];
/// Keywords whose value maps names to subschemas.
const SCHEMA_MAP_KEYWORDS: &[&str] = &["properties", "patternProperties", "$defs", "definitions"];
/// Any of these makes an `items` schema typed.
const TYPE_KEYWORDS: &[&str] = &["type", "$ref", "anyOf", "oneOf", "allOf", "enum", "const"];

/// Item schema given to arrays that do not declare one.
pub fn default_items() -> Value {
    serde_json::json!({"type": "object"})
}

/// Returns a copy of `schema` where every array declares an item type.
///
/// Only array nodes change; every other node is copied untouched.
pub fn repair_schema(schema: &Value) -> Value {
    let mut repaired = schema.clone();
    repair_arrays(&mut repaired);
    repaired
}

fn repair_arrays(node: &mut Value) {
    let Value::Object(map) = node else { return };

    if is_array_typed(map) {
        match map.get_mut("items") {
            None => {
                map.insert("items".into(), default_items());
            }
            Some(Value::Object(items)) if !has_type(items) => {
                items.insert("type".into(), Value::String("object".into()));
            }
            _ => {}
        }
    }

    for_each_subschema(map, repair_arrays);
}

fn is_array_typed(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(t)) => t == "array",
        Some(Value::Array(types)) => types.iter().any(|t| t == "array"),
        _ => false,
    }
}

fn has_type(map: &Map<String, Value>) -> bool {
    TYPE_KEYWORDS.iter().any(|k| map.contains_key(*k))
}

fn for_each_subschema(map: &mut Map<String, Value>, f: fn(&mut Value)) {
    for (key, value) in map.iter_mut() {
        let key = key.as_str();
        if SCHEMA_KEYWORDS.contains(&key) {
            match value {
                // Tuple-style `items: [..]`.
                Value::Array(list) => list.iter_mut().for_each(f),
                other => f(other),
            }
        } else if SCHEMA_LIST_KEYWORDS.contains(&key) {
            if let Value::Array(list) = value {
                list.iter_mut().for_each(f);
            }
        } else if SCHEMA_MAP_KEYWORDS.contains(&key) {
            if let Value::Object(children) = value {
                children.values_mut().for_each(f);
            }
        }
    }
}

/// Returns a copy of `schema` where list-valued `type`s are collapsed.
///
/// The first non-`null` entry wins; a list of only `null` keeps `null`.
pub fn collapse_type_unions(schema: &Value) -> Value {
    let mut collapsed = schema.clone();
    collapse(&mut collapsed);
    collapsed
}

fn collapse(node: &mut Value) {
    let Value::Object(map) = node else { return };
    if let Some(Value::Array(types)) = map.get("type") {
        let chosen = types
            .iter()
            .find(|t| *t != "null")
            .or_else(|| types.first())
            .cloned();
        match chosen {
            Some(t) => {
                map.insert("type".into(), t);
            }
            None => {
                map.remove("type");
            }
        }
    }
    for_each_subschema(map, collapse);
}

/// Declared JSON type of a schema node, if it has exactly one.
pub fn declared_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types.iter().filter_map(Value::as_str).find(|t| *t != "null"),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_top_level_array_gains_items() {
        let repaired = repair_schema(&json!({"type": "array"}));
        assert_eq!(repaired, json!({"type": "array", "items": {"type": "object"}}));
    }

    #[test]
    fn test_nested_arrays_are_repaired_recursively() {
        let schema = json!({
            "type": "object",
            "properties": {
                "rows": {"type": "array"},
                "matrix": {"type": "array", "items": {"type": "array"}},
                "filter": {
                    "anyOf": [
                        {"type": "array"},
                        {"type": "string"}
                    ]
                },
                "nested": {
                    "type": "object",
                    "properties": {"tags": {"type": "array", "items": {}}}
                }
            }
        });
        let repaired = repair_schema(&schema);
        let props = &repaired["properties"];
        assert_eq!(props["rows"]["items"], json!({"type": "object"}));
        assert_eq!(props["matrix"]["items"]["items"], json!({"type": "object"}));
        assert_eq!(props["filter"]["anyOf"][0]["items"], json!({"type": "object"}));
        assert_eq!(props["nested"]["properties"]["tags"]["items"], json!({"type": "object"}));
    }

    #[test]
    fn test_non_array_fields_unchanged() {
        let schema = json!({
            "type": "object",
            "required": ["table"],
            "properties": {
                "table": {"type": "string", "description": "Table name"},
                "limit": {"type": "integer", "minimum": 1},
                "columns": {"type": "array", "items": {"type": "string"}},
                "options": {"type": ["object", "null"]}
            }
        });
        let repaired = repair_schema(&schema);
        assert_eq!(repaired, schema);
    }

    #[test]
    fn test_typed_items_left_alone() {
        let schema = json!({"type": "array", "items": {"$ref": "#/$defs/Row"}});
        assert_eq!(repair_schema(&schema), schema);
    }

    #[test]
    fn test_union_type_with_array_is_repaired() {
        let repaired = repair_schema(&json!({"type": ["array", "null"]}));
        assert_eq!(repaired["items"], json!({"type": "object"}));
    }

    #[test]
    fn test_enum_values_are_not_treated_as_schemas() {
        let schema = json!({"type": "string", "enum": [{"type": "array"}]});
        assert_eq!(repair_schema(&schema), schema);
    }

    #[test]
    fn test_collapse_type_unions() {
        let schema = json!({
            "type": "object",
            "properties": {
                "a": {"type": ["null", "string"]},
                "b": {"type": ["integer", "string"]},
                "c": {"type": ["null"]},
                "d": {"type": "boolean"}
            }
        });
        let collapsed = collapse_type_unions(&schema);
        let props = &collapsed["properties"];
        assert_eq!(props["a"]["type"], "string");
        assert_eq!(props["b"]["type"], "integer");
        assert_eq!(props["c"]["type"], "null");
        assert_eq!(props["d"]["type"], "boolean");
    }

    #[test]
    fn test_declared_type() {
        assert_eq!(declared_type(&json!({"type": "string"})), Some("string"));
        assert_eq!(declared_type(&json!({"type": ["null", "object"]})), Some("object"));
        assert_eq!(declared_type(&json!({"description": "x"})), None);
    }
}
