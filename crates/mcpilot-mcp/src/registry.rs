//! Server registry: discovery, operator preferences, and persistence.
//!
//! Discovery scans a directory for tool-server definitions and classifies
//! them by content. Operator-set fields (priority, auto-connect, disabled)
//! live in a JSON file and always win over what discovery finds.

use crate::launcher::{LaunchTarget, RuntimeKind};
use chrono::{DateTime, Utc};
use mcpilot_core::{McpilotError, McpilotResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A registry shared between the manager, the aggregator and the control plane.
pub type SharedRegistry = Arc<RwLock<ServerRegistry>>;

const DEFAULT_PRIORITY: u32 = 99;
const DEFAULT_DESCRIPTION: &str = "MCP server";
const DESCRIPTION_SCAN_LINES: usize = 20;
const DESCRIPTION_MAX_LINES: usize = 10;
const DESCRIPTION_MAX_CHARS: usize = 200;
const SKIPPED_DIRS: &[&str] = &[".venv", "venv", "site-packages", "node_modules", "__pycache__"];

/// Status of a server as seen by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Never examined.
    #[default]
    Unknown,
    /// Discovered and eligible for connection.
    Available,
    /// Currently connected.
    Connected,
    /// The last connection attempt failed.
    Error,
    /// Turned off by the operator.
    Disabled,
}

/// Everything known about one tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique server name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Script or executable to launch.
    pub script_path: PathBuf,
    /// How the script is executed.
    pub runtime: RuntimeKind,
    /// Extra launch arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Current status.
    pub status: ServerStatus,
    /// Number of tools seen on the last successful connect.
    pub tools_count: usize,
    /// Time of the last successful connect.
    pub last_connected: Option<DateTime<Utc>>,
    /// Error from the last failed connect.
    pub error_message: Option<String>,
    /// Whether auto-connect may pick this server.
    pub auto_connect: bool,
    /// Lower is preferred.
    pub priority: u32,
}

impl ServerDescriptor {
    /// A new descriptor with registry defaults.
    pub fn new(name: impl Into<String>, script_path: impl Into<PathBuf>) -> Self {
        let script_path = script_path.into();
        Self {
            name: name.into(),
            description: DEFAULT_DESCRIPTION.to_string(),
            runtime: RuntimeKind::from_path(&script_path),
            script_path,
            args: Vec::new(),
            status: ServerStatus::Available,
            tools_count: 0,
            last_connected: None,
            error_message: None,
            auto_connect: false,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// What to launch for this server.
    pub fn launch_target(&self) -> LaunchTarget {
        LaunchTarget::with_runtime(self.script_path.clone(), self.args.clone(), self.runtime)
    }

    /// Whether the operator has left this server switched on.
    pub fn is_enabled(&self) -> bool {
        self.status != ServerStatus::Disabled
    }
}

/// On-disk form of one registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedServer {
    #[serde(default)]
    auto_connect: bool,
    #[serde(default = "default_priority")]
    priority: u32,
    #[serde(default)]
    description: String,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    tools_count: usize,
    #[serde(default)]
    last_connected: Option<DateTime<Utc>>,
    #[serde(default)]
    status: ServerStatus,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    script_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    runtime: Option<RuntimeKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

impl PersistedServer {
    fn from_descriptor(desc: &ServerDescriptor) -> Self {
        Self {
            auto_connect: desc.auto_connect,
            priority: desc.priority,
            description: desc.description.clone(),
            disabled: desc.status == ServerStatus::Disabled,
            tools_count: desc.tools_count,
            last_connected: desc.last_connected,
            status: desc.status,
            error_message: desc.error_message.clone(),
            script_path: Some(desc.script_path.clone()),
            runtime: Some(desc.runtime),
            args: desc.args.clone(),
        }
    }

    /// Status after a restart: nothing is connected yet.
    fn restored_status(&self) -> ServerStatus {
        if self.disabled {
            return ServerStatus::Disabled;
        }
        match self.status {
            ServerStatus::Connected | ServerStatus::Unknown => ServerStatus::Available,
            other => other,
        }
    }

    fn apply_operator_fields(&self, desc: &mut ServerDescriptor) {
        desc.auto_connect = self.auto_connect;
        desc.priority = self.priority;
        desc.tools_count = self.tools_count;
        desc.last_connected = self.last_connected;
        desc.error_message = self.error_message.clone();
        desc.status = self.restored_status();
        if !self.args.is_empty() {
            desc.args = self.args.clone();
        }
    }
}

/// A candidate that could not be analyzed.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryIssue {
    /// File that failed.
    pub path: PathBuf,
    /// Why it failed.
    pub error: String,
}

/// Outcome of one discovery scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    /// Servers found in this scan.
    pub discovered: Vec<String>,
    /// Servers that were not known before this scan.
    pub added: Vec<String>,
    /// Candidates that failed analysis.
    pub issues: Vec<DiscoveryIssue>,
}

/// Outcome of [`ServerRegistry::refresh`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    /// Servers that appeared.
    pub added: Vec<String>,
    /// Servers whose script is gone; they are kept and marked as errored.
    pub missing: Vec<String>,
    /// Candidates that failed analysis.
    pub issues: Vec<DiscoveryIssue>,
}

/// Registry of known tool servers.
pub struct ServerRegistry {
    directory: PathBuf,
    config_path: PathBuf,
    servers: BTreeMap<String, ServerDescriptor>,
    persisted: HashMap<String, PersistedServer>,
}

impl ServerRegistry {
    /// An empty registry over `directory`, persisting to `config_path`.
    pub fn new(directory: impl Into<PathBuf>, config_path: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            config_path: config_path.into(),
            servers: BTreeMap::new(),
            persisted: HashMap::new(),
        }
    }

    /// Loads persisted settings, then discovers servers.
    pub fn open(
        directory: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
    ) -> McpilotResult<(Self, DiscoveryReport)> {
        let mut registry = Self::new(directory, config_path);
        registry.load()?;
        let report = registry.discover();
        Ok((registry, report))
    }

    /// Wraps the registry for sharing.
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    /// Directory scanned by discovery.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Reads persisted settings. A missing file is not an error.
    ///
    /// Entries that carry a script path are restored as descriptors right
    /// away; the rest only contribute operator fields to later discovery.
    pub fn load(&mut self) -> McpilotResult<usize> {
        let raw = match std::fs::read_to_string(&self.config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.config_path.display(), "no server registry file yet");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };
        let entries: BTreeMap<String, PersistedServer> = serde_json::from_str(&raw)
            .map_err(|e| McpilotError::Registry(format!("invalid registry file: {e}")))?;

        for (name, entry) in &entries {
            if let Some(desc) = self.servers.get_mut(name) {
                entry.apply_operator_fields(desc);
            } else if let Some(script) = &entry.script_path {
                let mut desc = ServerDescriptor::new(name.clone(), script.clone());
                if let Some(runtime) = entry.runtime {
                    desc.runtime = runtime;
                }
                if !entry.description.is_empty() {
                    desc.description = entry.description.clone();
                }
                entry.apply_operator_fields(&mut desc);
                self.servers.insert(name.clone(), desc);
            }
        }
        let count = entries.len();
        self.persisted = entries.into_iter().collect();
        info!(path = %self.config_path.display(), servers = count, "server registry loaded");
        Ok(count)
    }

    /// Writes the registry atomically.
    pub fn persist(&self) -> McpilotResult<()> {
        let entries: BTreeMap<&str, PersistedServer> = self
            .servers
            .iter()
            .map(|(name, desc)| (name.as_str(), PersistedServer::from_descriptor(desc)))
            .collect();
        let json = serde_json::to_string_pretty(&entries)?;

        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.config_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.config_path)?;
        debug!(path = %self.config_path.display(), servers = entries.len(), "server registry saved");
        Ok(())
    }

    /// Scans the directory for server definitions.
    ///
    /// Structural fields of known servers are refreshed; their operator
    /// fields are left alone. A candidate that cannot be read is reported and
    /// skipped.
    pub fn discover(&mut self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        if !self.directory.is_dir() {
            warn!(directory = %self.directory.display(), "server directory does not exist");
            return report;
        }

        let mut candidates = Vec::new();
        collect_candidates(&self.directory, &self.directory, &mut candidates, &mut report.issues);

        for candidate in candidates {
            let content = match std::fs::read_to_string(&candidate.path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %candidate.path.display(), error = %e, "cannot analyze server candidate");
                    report.issues.push(DiscoveryIssue {
                        path: candidate.path,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            let runtime = RuntimeKind::from_path(&candidate.path);
            if !looks_like_server(runtime, &content) {
                continue;
            }
            let description = extract_description(&content);
            self.merge_discovered(&candidate.name, candidate.path, runtime, description, &mut report);
            report.discovered.push(candidate.name);
        }

        info!(
            directory = %self.directory.display(),
            discovered = report.discovered.len(),
            added = report.added.len(),
            issues = report.issues.len(),
            "server discovery finished"
        );
        report
    }

    fn merge_discovered(
        &mut self,
        name: &str,
        path: PathBuf,
        runtime: RuntimeKind,
        description: Option<String>,
        report: &mut DiscoveryReport,
    ) {
        if let Some(existing) = self.servers.get_mut(name) {
            existing.script_path = path;
            existing.runtime = runtime;
            if let Some(description) = description {
                existing.description = description;
            }
            if existing.status == ServerStatus::Unknown {
                existing.status = ServerStatus::Available;
            }
            return;
        }

        let mut desc = ServerDescriptor::new(name, path);
        desc.runtime = runtime;
        if let Some(saved) = self.persisted.get(name) {
            saved.apply_operator_fields(&mut desc);
            if !saved.description.is_empty() {
                desc.description = saved.description.clone();
            }
        }
        if let Some(description) = description {
            desc.description = description;
        }
        debug!(server = %name, path = %desc.script_path.display(), "discovered tool server");
        report.added.push(name.to_string());
        self.servers.insert(name.to_string(), desc);
    }

    /// Rescans the directory.
    pub fn refresh(&mut self) -> RefreshReport {
        let scan = self.discover();
        let mut missing = Vec::new();
        for desc in self.servers.values_mut() {
            if !desc.script_path.exists() && desc.status != ServerStatus::Disabled {
                desc.status = ServerStatus::Error;
                desc.error_message = Some(format!(
                    "script not found: {}",
                    desc.script_path.display()
                ));
                missing.push(desc.name.clone());
            }
        }
        RefreshReport {
            added: scan.added,
            missing,
            issues: scan.issues,
        }
    }

    /// Adds or replaces a server registered by the operator.
    pub fn register(&mut self, descriptor: ServerDescriptor) {
        info!(server = %descriptor.name, path = %descriptor.script_path.display(), "server registered");
        self.servers.insert(descriptor.name.clone(), descriptor);
    }

    /// Looks a server up by name.
    pub fn get(&self, name: &str) -> Option<&ServerDescriptor> {
        self.servers.get(name)
    }

    /// All servers, by priority then name.
    pub fn list(&self) -> Vec<ServerDescriptor> {
        let mut servers: Vec<_> = self.servers.values().cloned().collect();
        servers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        servers
    }

    /// Servers that are not disabled.
    pub fn enabled(&self) -> Vec<ServerDescriptor> {
        self.servers
            .values()
            .filter(|d| d.is_enabled())
            .cloned()
            .collect()
    }

    /// Finds a server by its script path.
    pub fn find_by_path(&self, path: &Path) -> Option<&ServerDescriptor> {
        self.servers.values().find(|d| d.script_path == path)
    }

    /// Number of known servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether no servers are known.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    fn entry(&mut self, name: &str) -> McpilotResult<&mut ServerDescriptor> {
        self.servers
            .get_mut(name)
            .ok_or_else(|| McpilotError::Registry(format!("unknown server '{name}'")))
    }

    /// Re-enables a server and persists.
    pub fn enable(&mut self, name: &str) -> McpilotResult<()> {
        let desc = self.entry(name)?;
        if desc.status == ServerStatus::Disabled || desc.status == ServerStatus::Error {
            desc.status = ServerStatus::Available;
            desc.error_message = None;
        }
        info!(server = %name, "server enabled");
        self.persist()
    }

    /// Disables a server and persists. Disconnecting it is the caller's job.
    pub fn disable(&mut self, name: &str) -> McpilotResult<()> {
        self.entry(name)?.status = ServerStatus::Disabled;
        info!(server = %name, "server disabled");
        self.persist()
    }

    /// Sets a server's priority and persists.
    pub fn set_priority(&mut self, name: &str, priority: u32) -> McpilotResult<()> {
        self.entry(name)?.priority = priority;
        self.persist()
    }

    /// Sets a server's auto-connect flag and persists.
    pub fn set_auto_connect(&mut self, name: &str, auto_connect: bool) -> McpilotResult<()> {
        self.entry(name)?.auto_connect = auto_connect;
        self.persist()
    }

    /// Records a successful connect without touching other servers.
    pub fn record_connected(&mut self, name: &str, tools_count: usize) {
        if let Some(desc) = self.servers.get_mut(name) {
            desc.status = ServerStatus::Connected;
            desc.tools_count = tools_count;
            desc.last_connected = Some(Utc::now());
            desc.error_message = None;
        }
    }

    /// Records `name` as the only connected server.
    pub fn mark_connected(&mut self, name: &str, tools_count: usize) {
        for desc in self.servers.values_mut() {
            if desc.name != name && desc.status == ServerStatus::Connected {
                desc.status = ServerStatus::Available;
            }
        }
        self.record_connected(name, tools_count);
    }

    /// Records a failed connect.
    pub fn mark_error(&mut self, name: &str, error: impl Into<String>) {
        if let Some(desc) = self.servers.get_mut(name) {
            if desc.status != ServerStatus::Disabled {
                desc.status = ServerStatus::Error;
            }
            desc.error_message = Some(error.into());
        }
    }

    /// Returns a connected server to available; disabled servers stay disabled.
    pub fn mark_available(&mut self, name: &str) {
        if let Some(desc) = self.servers.get_mut(name) {
            if desc.status == ServerStatus::Connected {
                desc.status = ServerStatus::Available;
            }
        }
    }
}

struct Candidate {
    name: String,
    path: PathBuf,
}

/// Collects `main.py`/`index.js` in any subdirectory and top-level scripts.
fn collect_candidates(
    root: &Path,
    dir: &Path,
    out: &mut Vec<Candidate>,
    issues: &mut Vec<DiscoveryIssue>,
) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            issues.push(DiscoveryIssue {
                path: dir.to_path_buf(),
                error: e.to_string(),
            });
            return;
        }
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    for path in paths {
        // Only components below the scan root are checked.
        if is_skipped(path.strip_prefix(root).unwrap_or(&path)) {
            continue;
        }
        if path.is_dir() {
            collect_candidates(root, &path, out, issues);
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_entry_point = file_name == "main.py" || file_name == "index.js";
        let name = if is_entry_point {
            dir.file_name().and_then(|n| n.to_str()).map(str::to_string)
        } else if dir == root && is_script(&path) {
            path.file_stem().and_then(|n| n.to_str()).map(str::to_string)
        } else {
            None
        };
        if let Some(name) = name {
            out.push(Candidate { name, path });
        }
    }
}

fn is_script(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("py" | "js" | "mjs" | "cjs")
    )
}

/// Virtualenvs, package caches and dunder files are never servers.
pub fn is_skipped(path: &Path) -> bool {
    let dunder = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("__"));
    dunder
        || path.components().any(|c| {
            c.as_os_str()
                .to_str()
                .is_some_and(|part| SKIPPED_DIRS.contains(&part))
        })
}

/// Content heuristic for "this file starts an MCP server".
pub fn looks_like_server(runtime: RuntimeKind, content: &str) -> bool {
    match runtime {
        RuntimeKind::Python => {
            content.contains("mcp.server") || content.contains("FastMCP") || content.contains("Server(")
        }
        RuntimeKind::JavaScript => {
            content.contains("@modelcontextprotocol") || content.to_lowercase().contains("mcp")
        }
        RuntimeKind::Native => false,
    }
}

/// Pulls a description from a leading docstring or comment.
pub fn extract_description(content: &str) -> Option<String> {
    let head: Vec<&str> = content.lines().take(DESCRIPTION_SCAN_LINES).collect();

    for (i, line) in head.iter().enumerate() {
        let trimmed = line.trim();
        let quote = if trimmed.starts_with("\"\"\"") {
            "\"\"\""
        } else if trimmed.starts_with("'''") {
            "'''"
        } else {
            continue;
        };

        let first = &trimmed[quote.len()..];
        let text = if let Some(end) = first.find(quote) {
            first[..end].trim().to_string()
        } else {
            let mut parts = vec![first.trim()];
            for next in head.iter().skip(i + 1).take(DESCRIPTION_MAX_LINES) {
                let next = next.trim();
                if let Some(end) = next.find(quote) {
                    parts.push(next[..end].trim());
                    break;
                }
                parts.push(next);
            }
            parts
                .into_iter()
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        };
        return non_empty(truncate(&text));
    }

    for line in &head {
        let trimmed = line.trim();
        let comment = trimmed
            .strip_prefix("//")
            .or_else(|| trimmed.strip_prefix("/*"))
            .map(|c| c.trim_end_matches("*/").trim_start_matches('*').trim());
        if let Some(comment) = comment.filter(|c| !c.is_empty()) {
            return non_empty(truncate(comment));
        }
    }
    None
}

fn truncate(text: &str) -> String {
    text.chars().take(DESCRIPTION_MAX_CHARS).collect()
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const FASTMCP_SERVER: &str = r#""""SQLite explorer.

Lists tables and runs read-only queries.
"""
from mcp.server.fastmcp import FastMCP

mcp = FastMCP("sqlite")
"#;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_docstring_description_joins_lines() {
        let desc = extract_description(FASTMCP_SERVER).unwrap();
        assert_eq!(desc, "SQLite explorer. Lists tables and runs read-only queries.");
    }

    #[test]
    fn test_single_line_docstring() {
        let desc = extract_description("'''Weather lookups.'''\nimport mcp.server\n").unwrap();
        assert_eq!(desc, "Weather lookups.");
    }

    #[test]
    fn test_js_comment_description() {
        let src = "// Filesystem bridge for notes\nimport { Server } from '@modelcontextprotocol/sdk';\n";
        assert_eq!(extract_description(src).unwrap(), "Filesystem bridge for notes");
        let block = "/* Calendar tools */\nconst mcp = 1;\n";
        assert_eq!(extract_description(block).unwrap(), "Calendar tools");
    }

    #[test]
    fn test_description_truncated() {
        let long = format!("\"\"\"{}\"\"\"", "x".repeat(500));
        assert_eq!(extract_description(&long).unwrap().chars().count(), 200);
    }

    #[test]
    fn test_server_heuristics() {
        assert!(looks_like_server(RuntimeKind::Python, "server = Server(\"x\")"));
        assert!(looks_like_server(RuntimeKind::Python, FASTMCP_SERVER));
        assert!(!looks_like_server(RuntimeKind::Python, "print('hello')"));
        assert!(looks_like_server(RuntimeKind::JavaScript, "require('@modelcontextprotocol/sdk')"));
        assert!(!looks_like_server(RuntimeKind::JavaScript, "console.log(1)"));
    }

    #[test]
    fn test_skipped_paths() {
        assert!(is_skipped(Path::new("servers/.venv/lib/main.py")));
        assert!(is_skipped(Path::new("servers/web/node_modules/x/index.js")));
        assert!(is_skipped(Path::new("servers/__init__.py")));
        assert!(!is_skipped(Path::new("servers/sqlite/main.py")));
    }

    #[test]
    fn test_discover_names_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sqlite/main.py", FASTMCP_SERVER);
        write(dir.path(), "weather.py", "from mcp.server import Server\n");
        write(dir.path(), "notes.js", "// Notes\nimport '@modelcontextprotocol/sdk';\n");
        write(dir.path(), "helper.py", "def helper(): pass\n");
        write(dir.path(), "sqlite/.venv/lib/main.py", FASTMCP_SERVER);
        write(dir.path(), "nested/deep/util.py", "from mcp.server import Server\n");

        let mut registry = ServerRegistry::new(dir.path(), dir.path().join("servers.json"));
        let report = registry.discover();

        let mut found = report.discovered.clone();
        found.sort();
        assert_eq!(found, vec!["notes", "sqlite", "weather"]);
        assert!(report.issues.is_empty());

        let sqlite = registry.get("sqlite").unwrap();
        assert_eq!(sqlite.runtime, RuntimeKind::Python);
        assert_eq!(sqlite.priority, 99);
        assert!(!sqlite.auto_connect);
        assert_eq!(sqlite.status, ServerStatus::Available);
        assert_eq!(registry.get("notes").unwrap().runtime, RuntimeKind::JavaScript);
    }

    #[test]
    fn test_discover_under_skip_named_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("venv").join("servers");
        write(&root, "sqlite/main.py", FASTMCP_SERVER);
        write(&root, "node_modules/pkg/index.js", "import '@modelcontextprotocol/sdk';\n");

        let mut registry = ServerRegistry::new(&root, dir.path().join("servers.json"));
        let report = registry.discover();

        assert_eq!(report.discovered, vec!["sqlite"]);
    }

    #[test]
    fn test_discover_commonjs_script() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "files.cjs", "const { Server } = require('@modelcontextprotocol/sdk');\n");

        let mut registry = ServerRegistry::new(dir.path(), dir.path().join("servers.json"));
        let report = registry.discover();

        assert_eq!(report.discovered, vec!["files"]);
        assert_eq!(registry.get("files").unwrap().runtime, RuntimeKind::JavaScript);
    }

    #[test]
    fn test_discovery_keeps_operator_fields() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "sqlite/main.py", FASTMCP_SERVER);
        let config = dir.path().join("servers.json");
        std::fs::write(
            &config,
            r#"{"sqlite": {"auto_connect": true, "priority": 1, "description": "db",
                 "disabled": false, "tools_count": 4, "status": "connected"}}"#,
        )
        .unwrap();

        let (registry, report) = ServerRegistry::open(dir.path(), &config).unwrap();
        assert_eq!(report.added, vec!["sqlite"]);
        let sqlite = registry.get("sqlite").unwrap();
        assert!(sqlite.auto_connect);
        assert_eq!(sqlite.priority, 1);
        assert_eq!(sqlite.tools_count, 4);
        assert_eq!(sqlite.status, ServerStatus::Available);
        assert_eq!(sqlite.description, "SQLite explorer. Lists tables and runs read-only queries.");
    }

    #[test]
    fn test_connected_status_restored_as_available() {
        let dir = tempfile::tempdir().unwrap();
        let script = write(dir.path(), "srv/main.py", FASTMCP_SERVER);
        let config = dir.path().join("state/servers.json");

        let mut registry = ServerRegistry::new(dir.path(), &config);
        registry.discover();
        registry.mark_connected("srv", 3);
        registry.set_auto_connect("srv", true).unwrap();
        assert_eq!(registry.get("srv").unwrap().status, ServerStatus::Connected);

        let mut reloaded = ServerRegistry::new(dir.path().join("elsewhere"), &config);
        reloaded.load().unwrap();
        let srv = reloaded.get("srv").unwrap();
        assert_eq!(srv.status, ServerStatus::Available);
        assert_eq!(srv.script_path, script);
        assert_eq!(srv.tools_count, 3);
        assert!(srv.auto_connect);
        assert!(srv.last_connected.is_some());
    }

    #[test]
    fn test_disabled_survives_rediscovery() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "srv/main.py", FASTMCP_SERVER);
        let config = dir.path().join("servers.json");

        let (mut registry, _) = ServerRegistry::open(dir.path(), &config).unwrap();
        registry.disable("srv").unwrap();

        let (registry, _) = ServerRegistry::open(dir.path(), &config).unwrap();
        assert_eq!(registry.get("srv").unwrap().status, ServerStatus::Disabled);
        assert!(registry.enabled().is_empty());
    }

    #[test]
    fn test_unknown_server_operations_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ServerRegistry::new(dir.path(), dir.path().join("s.json"));
        assert!(matches!(registry.enable("ghost"), Err(McpilotError::Registry(_))));
        assert!(matches!(registry.set_priority("ghost", 1), Err(McpilotError::Registry(_))));
    }

    #[test]
    fn test_mark_connected_demotes_previous() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ServerRegistry::new(dir.path(), dir.path().join("s.json"));
        registry.register(ServerDescriptor::new("a", "/srv/a.py"));
        registry.register(ServerDescriptor::new("b", "/srv/b.py"));
        registry.mark_connected("a", 1);
        registry.mark_connected("b", 2);
        assert_eq!(registry.get("a").unwrap().status, ServerStatus::Available);
        assert_eq!(registry.get("b").unwrap().status, ServerStatus::Connected);
    }

    #[test]
    fn test_refresh_flags_missing_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let script = write(dir.path(), "gone/main.py", FASTMCP_SERVER);
        let (mut registry, _) = ServerRegistry::open(dir.path(), dir.path().join("s.json")).unwrap();
        std::fs::remove_file(script).unwrap();
        write(dir.path(), "fresh/main.py", FASTMCP_SERVER);

        let report = registry.refresh();
        assert_eq!(report.added, vec!["fresh"]);
        assert_eq!(report.missing, vec!["gone"]);
        let gone = registry.get("gone").unwrap();
        assert_eq!(gone.status, ServerStatus::Error);
        assert_eq!(registry.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_candidate_does_not_abort_scan() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good/main.py", FASTMCP_SERVER);
        // Invalid UTF-8 cannot be read into a String.
        let bad = dir.path().join("bad");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("main.py"), [0xff, 0xfe, 0x00, 0xc3]).unwrap();

        let mut registry = ServerRegistry::new(dir.path(), dir.path().join("s.json"));
        let report = registry.discover();
        assert_eq!(report.discovered, vec!["good"]);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].path.ends_with("bad/main.py"));
    }
}
