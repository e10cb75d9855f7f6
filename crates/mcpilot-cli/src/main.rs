mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{McpilotConfig, ServerMode};
use futures_util::StreamExt;
use mcpilot_agent::{ChatRequest, ConversationService, LlmClient, LoopConfig, ReasoningLoop};
use mcpilot_core::ControlResponse;
use mcpilot_mcp::{
    ControlPlane, Launcher, MultiServerAggregator, ProcessConnection, ProcessSupport,
    ServerManager, ServerRegistry, TokioLauncher, ToolFacade, ToolSelection, ToolSource,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcpilot", about = "mcpilot: chat with a model that can call MCP tools")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "mcpilot.toml")]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage tool servers
    Servers {
        #[command(subcommand)]
        action: ServerAction,
    },
    /// Connect to one server by name
    Connect { name: String },
    /// List the tools offered to the model
    Tools,
    /// Call one tool with JSON arguments
    Call {
        /// Tool name
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Show connection status
    Status,
    /// Run one conversation turn
    Chat {
        /// What to ask
        message: String,
        /// Print events as they happen, one JSON object per line
        #[arg(long)]
        stream: bool,
    },
}

#[derive(Subcommand)]
enum ServerAction {
    /// List known servers
    List,
    /// Enable a server
    Enable { name: String },
    /// Disable a server
    Disable { name: String },
    /// Set a server's priority (lower connects first)
    Priority { name: String, priority: u32 },
    /// Let auto-connect pick a server, or stop it from doing so
    AutoConnect {
        name: String,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Rescan the servers directory
    Refresh,
}

/// Everything tool-related, wired from config.
struct Tooling {
    mode: ServerMode,
    control: ControlPlane,
    aggregator: Option<Arc<MultiServerAggregator>>,
    source: Arc<dyn ToolSource>,
    facade: Arc<ToolFacade>,
}

impl Tooling {
    fn build(config: &McpilotConfig) -> anyhow::Result<Self> {
        let support = ProcessSupport::detect();
        if let ProcessSupport::Unavailable(reason) = &support {
            warn!(%reason, "Tool servers cannot be started on this platform");
        }

        let (registry, report) =
            ServerRegistry::open(&config.mcp.servers_dir, &config.mcp.registry_file)
                .context("Failed to open the server registry")?;
        info!(
            dir = %config.mcp.servers_dir.display(),
            discovered = report.discovered.len(),
            added = report.added.len(),
            "Server discovery finished"
        );
        for issue in &report.issues {
            warn!(path = %issue.path.display(), error = %issue.error, "Skipped server candidate");
        }
        if let Err(e) = registry.persist() {
            warn!(error = %e, "Could not persist server registry");
        }
        let registry = registry.into_shared();

        let launcher: Arc<dyn Launcher> =
            Arc::new(TokioLauncher::new(config.mcp.interpreters.clone()));
        let connection = Arc::new(ProcessConnection::new(
            "primary",
            config.mcp.connection.clone(),
            launcher.clone(),
            support.clone(),
        ));
        let manager = Arc::new(
            ServerManager::new(registry.clone(), connection)
                .with_boost_keyword(config.mcp.boost_keyword.clone()),
        );
        let manager_facade = Arc::new(ToolFacade::new(manager.clone(), config.mcp.facade.clone()));
        let control = ControlPlane::new(manager.clone(), manager_facade.clone());

        let (aggregator, source, facade) = match config.mcp.mode {
            ServerMode::Single => (None, manager as Arc<dyn ToolSource>, manager_facade),
            ServerMode::Multi => {
                let aggregator = Arc::new(MultiServerAggregator::new(
                    registry,
                    config.mcp.connection.clone(),
                    launcher,
                    support,
                ));
                let facade = Arc::new(ToolFacade::new(aggregator.clone(), config.mcp.facade.clone()));
                (Some(aggregator.clone()), aggregator as Arc<dyn ToolSource>, facade)
            }
        };

        Ok(Self {
            mode: config.mcp.mode,
            control,
            aggregator,
            source,
            facade,
        })
    }

    async fn connect(&self) -> Option<ControlResponse> {
        match self.source.ensure_ready().await {
            Ok(()) => None,
            Err(e) => Some(ControlResponse::failure(e.to_string())),
        }
    }

    async fn tools(&self) -> ControlResponse {
        if let Some(failed) = self.connect().await {
            return failed;
        }
        match self.mode {
            ServerMode::Single => self.control.list_tools().await,
            ServerMode::Multi => match self.facade.get_tools_for_model(&ToolSelection::All).await {
                Ok(tools) => {
                    let count = tools.len();
                    ControlResponse::from_result(Ok(tools), format!("{count} tools"))
                }
                Err(e) => ControlResponse::failure(e.to_string()),
            },
        }
    }

    async fn call(&self, tool: &str, arguments: serde_json::Value) -> ControlResponse {
        if let Some(failed) = self.connect().await {
            return failed;
        }
        match self.mode {
            ServerMode::Single => self.control.call_tool(tool, arguments).await,
            ServerMode::Multi => ControlResponse::from_result(
                self.facade.call_tool(tool, arguments, &ToolSelection::All).await,
                format!("tool '{tool}' executed"),
            ),
        }
    }

    async fn status(&self) -> ControlResponse {
        if let Err(e) = self.source.ensure_ready().await {
            warn!(error = %e, "No tool server could be connected");
        }
        match &self.aggregator {
            None => self.control.status(),
            Some(aggregator) => {
                let connected = aggregator.connected_servers();
                let message = format!("{} servers connected", connected.len());
                ControlResponse::from_result(
                    Ok(serde_json::json!({
                        "connected": connected,
                        "servers": aggregator.outcomes(),
                    })),
                    message,
                )
            }
        }
    }

    async fn shutdown(&self) {
        let response = self.control.disconnect().await;
        if !response.success {
            warn!(error = %response.message, "Disconnect failed");
        }
        if let Some(aggregator) = &self.aggregator {
            for (server, e) in aggregator.close().await {
                warn!(%server, error = %e, "Close failed");
            }
        }
    }
}

async fn chat(
    config: &McpilotConfig,
    tooling: &Tooling,
    message: String,
    stream: bool,
) -> anyhow::Result<ControlResponse> {
    let model = config
        .model
        .clone()
        .context("`chat` needs a [model] section in the config file")?;
    let loop_config = LoopConfig {
        max_iterations: config.agent.max_iterations,
        model_timeout: model.request_timeout(),
        native_tools: model.native_tools,
    };
    info!(provider = ?model.provider, model = %model.model_id, "Using model");
    let llm = Arc::new(LlmClient::new(model)?);
    let runner = ReasoningLoop::new(llm, tooling.facade.clone(), loop_config);
    let service = Arc::new(ConversationService::new(runner, config.agent.clone()));
    let request = ChatRequest::new(message);

    if !stream {
        return Ok(ControlResponse::from_result(
            service.chat(request).await,
            "turn complete",
        ));
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let (mut events, handle) = service.chat_stream(request, cancel);
    while let Some(event) = events.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(ControlResponse::from_result(handle.await?, "turn complete"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.pretty {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    }

    let config = McpilotConfig::load(&cli.config).await?;
    let tooling = Tooling::build(&config)?;

    let response = match cli.command {
        Commands::Servers { action } => match action {
            ServerAction::List => tooling.control.list_servers(),
            ServerAction::Enable { name } => tooling.control.enable(&name),
            ServerAction::Disable { name } => tooling.control.disable(&name).await,
            ServerAction::Priority { name, priority } => {
                tooling.control.set_priority(&name, priority)
            }
            ServerAction::AutoConnect { name, enabled } => {
                tooling.control.set_auto_connect(&name, enabled)
            }
            ServerAction::Refresh => tooling.control.refresh(),
        },
        Commands::Connect { name } => tooling.control.connect_by_name(&name).await,
        Commands::Tools => tooling.tools().await,
        Commands::Call { tool, arguments } => {
            let arguments: serde_json::Value = serde_json::from_str(&arguments)
                .with_context(|| format!("Arguments for '{tool}' are not valid JSON"))?;
            tooling.call(&tool, arguments).await
        }
        Commands::Status => tooling.status().await,
        Commands::Chat { message, stream } => chat(&config, &tooling, message, stream).await?,
    };

    tooling.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        std::process::exit(1);
    }
    Ok(())
}
