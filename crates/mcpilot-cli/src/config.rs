//! `mcpilot.toml` layout and loading.

use anyhow::Context;
use mcpilot_agent::{AgentConfig, ModelConfig};
use mcpilot_mcp::{ConnectionConfig, FacadeConfig, Interpreters};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Overrides `[model].api_key` when set and non-empty.
pub const API_KEY_ENV: &str = "MCPILOT_API_KEY";

#[derive(Debug, Default, Deserialize)]
pub struct McpilotConfig {
    /// Required by `chat` only.
    #[serde(default)]
    pub model: Option<ModelConfig>,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// One best server, or every enabled server at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Single,
    Multi,
}

#[derive(Debug, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_servers_dir")]
    pub servers_dir: PathBuf,
    #[serde(default = "default_registry_file")]
    pub registry_file: PathBuf,
    #[serde(default)]
    pub interpreters: Interpreters,
    #[serde(default = "default_boost_keyword")]
    pub boost_keyword: String,
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub facade: FacadeConfig,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers_dir: default_servers_dir(),
            registry_file: default_registry_file(),
            interpreters: Interpreters::default(),
            boost_keyword: default_boost_keyword(),
            mode: ServerMode::default(),
            connection: ConnectionConfig::default(),
            facade: FacadeConfig::default(),
        }
    }
}

fn default_servers_dir() -> PathBuf {
    PathBuf::from("mcp")
}
fn default_registry_file() -> PathBuf {
    PathBuf::from("mcp/servers_config.json")
}
fn default_boost_keyword() -> String {
    "sqlite".to_string()
}

impl McpilotConfig {
    /// Parses a TOML document.
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Reads `path`; a missing file yields the defaults.
    ///
    /// Relative server paths are resolved against the file's directory.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
            Self::parse(&text)
                .with_context(|| format!("Invalid config file '{}'", path.display()))?
        } else {
            info!(path = %path.display(), "No config file; using defaults");
            Self::default()
        };

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.mcp.resolve_paths(base);
        config.apply_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    /// Replaces the model key with `key` when it is non-empty.
    pub fn apply_api_key(&mut self, key: Option<String>) {
        let Some(key) = key.filter(|k| !k.trim().is_empty()) else {
            return;
        };
        if let Some(model) = self.model.as_mut() {
            model.api_key = key;
        }
    }
}

impl McpConfig {
    fn resolve_paths(&mut self, base: &Path) {
        if self.servers_dir.is_relative() {
            self.servers_dir = base.join(&self.servers_dir);
        }
        if self.registry_file.is_relative() {
            self.registry_file = base.join(&self.registry_file);
        }
    }
}
