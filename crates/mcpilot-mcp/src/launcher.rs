//! Launching tool-server child processes.
//!
//! A [`LaunchTarget`] names a script plus its arguments; the [`Launcher`]
//! turns it into a running child with piped stdio. Whether the host can spawn
//! processes at all is checked once at startup with [`ProcessSupport::detect`].

use async_trait::async_trait;
use mcpilot_core::ConnectionError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// How a server definition is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Run with the configured Python interpreter.
    Python,
    /// Run with the configured Node.js command.
    JavaScript,
    /// Execute the file directly.
    Native,
}

impl RuntimeKind {
    /// Infers the runtime from a file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("py") => Self::Python,
            Some("js" | "mjs" | "cjs") => Self::JavaScript,
            _ => Self::Native,
        }
    }
}

/// A fully resolved thing to launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchTarget {
    /// Script or executable path.
    pub script: PathBuf,
    /// Extra arguments appended after the script.
    pub args: Vec<String>,
    /// Runtime used to execute the script.
    pub runtime: RuntimeKind,
}

impl LaunchTarget {
    /// Builds a target, inferring the runtime from the extension.
    pub fn new(script: impl Into<PathBuf>, args: Vec<String>) -> Self {
        let script = script.into();
        let runtime = RuntimeKind::from_path(&script);
        Self {
            script,
            args,
            runtime,
        }
    }

    /// Builds a target with an explicit runtime.
    pub fn with_runtime(script: impl Into<PathBuf>, args: Vec<String>, runtime: RuntimeKind) -> Self {
        Self {
            script: script.into(),
            args,
            runtime,
        }
    }

    /// Resolves the program and argv to execute.
    pub fn command_line(&self, interpreters: &Interpreters) -> (String, Vec<String>) {
        let script = self.script.to_string_lossy().into_owned();
        let (program, mut argv) = match self.runtime {
            RuntimeKind::Python => (interpreters.python.clone(), vec![script]),
            RuntimeKind::JavaScript => (interpreters.node.clone(), vec![script]),
            RuntimeKind::Native => (script, Vec::new()),
        };
        argv.extend(self.args.iter().cloned());
        (program, argv)
    }
}

impl std::fmt::Display for LaunchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.script.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Interpreter commands for script runtimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interpreters {
    /// Python interpreter (default `python3`).
    #[serde(default = "default_python")]
    pub python: String,
    /// Node.js command (default `node`).
    #[serde(default = "default_node")]
    pub node: String,
}

fn default_python() -> String {
    "python3".to_string()
}
fn default_node() -> String {
    "node".to_string()
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
        }
    }
}

/// Whether the execution backend can create child processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessSupport {
    /// Processes can be spawned.
    Available,
    /// Processes cannot be spawned; the reason is reported on every connect.
    Unavailable(String),
}

impl ProcessSupport {
    /// Probes the current execution backend.
    ///
    /// Must be called from inside the runtime that will own the connections.
    pub fn detect() -> Self {
        if cfg!(target_family = "wasm") {
            return Self::Unavailable("wasm targets cannot create child processes".into());
        }
        match tokio::runtime::Handle::try_current() {
            Ok(_) => Self::Available,
            Err(_) => Self::Unavailable(
                "no Tokio runtime with a process driver is running on this thread".into(),
            ),
        }
    }

    /// Returns the unsupported-error, if any.
    pub fn check(&self) -> Result<(), ConnectionError> {
        match self {
            Self::Available => Ok(()),
            Self::Unavailable(reason) => Err(ConnectionError::Unsupported(reason.clone())),
        }
    }
}

/// A freshly spawned child and its protocol streams.
pub struct LaunchedProcess {
    /// The child handle, used for teardown.
    pub child: Child,
    /// Requests are written here.
    pub stdin: ChildStdin,
    /// Responses are read from here.
    pub stdout: ChildStdout,
}

/// Spawns tool-server processes.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Starts `target` with piped stdin/stdout.
    async fn launch(&self, target: &LaunchTarget) -> Result<LaunchedProcess, ConnectionError>;
}

/// The default launcher backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioLauncher {
    interpreters: Interpreters,
}

impl TokioLauncher {
    /// Creates a launcher using the given interpreter commands.
    pub fn new(interpreters: Interpreters) -> Self {
        Self { interpreters }
    }
}

#[async_trait]
impl Launcher for TokioLauncher {
    async fn launch(&self, target: &LaunchTarget) -> Result<LaunchedProcess, ConnectionError> {
        let (program, argv) = target.command_line(&self.interpreters);
        let mut cmd = Command::new(&program);
        cmd.args(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::Unsupported {
                ConnectionError::Unsupported(e.to_string())
            } else {
                ConnectionError::Spawn {
                    command: program.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| ConnectionError::Spawn {
            command: program.clone(),
            reason: "stdin not available".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ConnectionError::Spawn {
            command: program.clone(),
            reason: "stdout not available".into(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            let label = target.script.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %label, "{line}");
                }
            });
        }

        debug!(program = %program, args = ?argv, "tool server spawned");
        Ok(LaunchedProcess {
            child,
            stdin,
            stdout,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_from_extension() {
        assert_eq!(RuntimeKind::from_path(Path::new("srv/main.py")), RuntimeKind::Python);
        assert_eq!(RuntimeKind::from_path(Path::new("index.mjs")), RuntimeKind::JavaScript);
        assert_eq!(RuntimeKind::from_path(Path::new("/usr/bin/srv")), RuntimeKind::Native);
    }

    #[test]
    fn test_python_command_line() {
        let target = LaunchTarget::new("servers/sqlite/main.py", vec!["--db".into(), "a.db".into()]);
        let (program, argv) = target.command_line(&Interpreters::default());
        assert_eq!(program, "python3");
        assert_eq!(argv, vec!["servers/sqlite/main.py", "--db", "a.db"]);
    }

    #[test]
    fn test_native_command_line_runs_script_directly() {
        let target = LaunchTarget::new("/opt/tools/server", vec!["--stdio".into()]);
        let (program, argv) = target.command_line(&Interpreters::default());
        assert_eq!(program, "/opt/tools/server");
        assert_eq!(argv, vec!["--stdio"]);
    }

    #[test]
    fn test_detect_outside_runtime_is_unavailable() {
        let support = ProcessSupport::detect();
        assert!(matches!(support, ProcessSupport::Unavailable(_)));
        assert!(!support.check().unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_detect_inside_runtime_is_available() {
        assert_eq!(ProcessSupport::detect(), ProcessSupport::Available);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let launcher = TokioLauncher::default();
        let target = LaunchTarget::new("/definitely/not/here/server-bin", vec![]);
        let err = launcher.launch(&target).await.err().unwrap();
        assert!(matches!(err, ConnectionError::Spawn { .. }));
    }
}
