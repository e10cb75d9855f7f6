//! Per-conversation tool selection and its accepted config shapes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Which catalog tools a conversation may use.
///
/// Config accepts several shapes, resolved once here:
///
/// | input                     | selection               |
/// |---------------------------|-------------------------|
/// | absent, `true`, `"*"`     | [`All`](Self::All)      |
/// | `false`, `null`, `[]`     | [`Disabled`](Self::Disabled) |
/// | `"name"`                  | [`SingleTool`](Self::SingleTool) |
/// | `["a", "b"]`              | [`ToolSet`](Self::ToolSet) |
/// | `{"a": true, "b": false}` | [`ToolSet`](Self::ToolSet) of the `true` keys |
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolSelection {
    /// Every tool in the catalog.
    #[default]
    All,
    /// No tools; the model answers directly.
    Disabled,
    /// Exactly one tool.
    SingleTool(String),
    /// A fixed set of tools.
    ToolSet(BTreeSet<String>),
}

impl ToolSelection {
    /// Whether `tool` may be used.
    pub fn allows(&self, tool: &str) -> bool {
        match self {
            Self::All => true,
            Self::Disabled => false,
            Self::SingleTool(name) => name == tool,
            Self::ToolSet(names) => names.contains(tool),
        }
    }

    /// Whether no tool may be used.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Disabled)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSelection {
    Flag(bool),
    Name(String),
    Names(Vec<String>),
    Toggles(BTreeMap<String, bool>),
    Null(()),
}

impl From<RawSelection> for ToolSelection {
    fn from(raw: RawSelection) -> Self {
        let set = |names: BTreeSet<String>| {
            if names.is_empty() {
                Self::Disabled
            } else {
                Self::ToolSet(names)
            }
        };
        match raw {
            RawSelection::Flag(true) => Self::All,
            RawSelection::Flag(false) | RawSelection::Null(()) => Self::Disabled,
            RawSelection::Name(name) if name == "*" => Self::All,
            RawSelection::Name(name) if name.trim().is_empty() => Self::Disabled,
            RawSelection::Name(name) => Self::SingleTool(name),
            RawSelection::Names(names) => set(names.into_iter().collect()),
            RawSelection::Toggles(toggles) => set(
                toggles
                    .into_iter()
                    .filter_map(|(name, on)| on.then_some(name))
                    .collect(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for ToolSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawSelection::deserialize(deserializer).map(Self::from)
    }
}

impl Serialize for ToolSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_bool(true),
            Self::Disabled => serializer.serialize_bool(false),
            Self::SingleTool(name) => serializer.serialize_str(name),
            Self::ToolSet(names) => names.serialize(serializer),
        }
    }
}
