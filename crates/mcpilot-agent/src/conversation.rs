//! One-call entry points over the reasoning loop.

use crate::config::AgentConfig;
use crate::prompt::Persona;
use crate::runner::{ReasoningLoop, StopReason, TurnOutcome};
use crate::stream::StreamEvent;
use mcpilot_core::{McpilotResult, Message};
use mcpilot_mcp::{FunctionTool, ToolSelection};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const EVENT_BUFFER: usize = 64;

/// Input of one conversation turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// What the user said.
    pub input: String,
    /// Earlier messages of the conversation.
    pub history: Vec<Message>,
    /// Overrides the service's default persona.
    pub persona: Option<Persona>,
    /// Overrides the service's default tool selection.
    pub tools: Option<ToolSelection>,
}

impl ChatRequest {
    /// A request with no history and default persona and tools.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    /// Sets the conversation history.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Sets the persona.
    pub fn with_persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// Sets the tool selection.
    pub fn with_tools(mut self, tools: ToolSelection) -> Self {
        self.tools = Some(tools);
        self
    }
}

/// Result of [`ConversationService::chat`].
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    /// Text for the user.
    pub answer: String,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
    /// Model round trips used.
    pub iterations: u32,
    /// Names of the tools called, in order.
    pub tools_used: Vec<String>,
    /// Every event of the turn.
    pub events: Vec<StreamEvent>,
}

/// Tool connectivity as seen by the conversation layer.
#[derive(Debug, Clone, Serialize)]
pub struct McpStatus {
    /// Whether tools can be called.
    pub connected: bool,
    /// The model-facing catalog under the default selection.
    pub tools: Vec<FunctionTool>,
}

/// Wires tool connectivity and the reasoning loop into single calls.
pub struct ConversationService {
    runner: ReasoningLoop,
    defaults: AgentConfig,
    tools_attempted: Mutex<bool>,
}

impl ConversationService {
    /// Creates the service. Tool servers are connected on first use.
    pub fn new(runner: ReasoningLoop, defaults: AgentConfig) -> Self {
        Self {
            runner,
            defaults,
            tools_attempted: Mutex::new(false),
        }
    }

    /// Connects the tool source once per service.
    ///
    /// A failure is logged, not returned; the turn then runs without tools.
    async fn ensure_tools(&self) {
        let mut attempted = self.tools_attempted.lock().await;
        if *attempted {
            return;
        }
        *attempted = true;
        let source = self.runner.facade().source();
        if source.is_ready() {
            return;
        }
        match source.ensure_ready().await {
            Ok(()) => info!("tool servers connected"),
            Err(e) => warn!(error = %e, "tool servers unavailable; continuing without tools"),
        }
    }

    async fn run(
        &self,
        request: ChatRequest,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> McpilotResult<TurnOutcome> {
        self.ensure_tools().await;
        let persona = request.persona.as_ref().unwrap_or(&self.defaults.persona);
        let selection = request.tools.as_ref().unwrap_or(&self.defaults.tools);
        self.runner
            .run_turn(&request.history, &request.input, persona, selection, events, cancel)
            .await
    }

    /// Runs one turn to completion and returns the answer with its events.
    pub async fn chat(&self, request: ChatRequest) -> McpilotResult<ChatReply> {
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let turn = async move {
            let outcome = self.run(request, &tx, &cancel).await;
            drop(tx);
            outcome
        };
        let collect = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        let (outcome, events) = tokio::join!(turn, collect);
        let outcome = outcome?;

        Ok(ChatReply {
            tools_used: outcome.exchanges.iter().map(|x| x.call.name.clone()).collect(),
            answer: outcome.answer,
            stop_reason: outcome.stop_reason,
            iterations: outcome.iterations,
            events,
        })
    }

    /// Runs one turn in the background, streaming its events.
    ///
    /// Dropping the stream stops the turn at its next event. Firing
    /// `cancel` stops it at the next suspension point.
    pub fn chat_stream(
        self: &Arc<Self>,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> (
        ReceiverStream<StreamEvent>,
        JoinHandle<McpilotResult<TurnOutcome>>,
    ) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move { service.run(request, &tx, &cancel).await });
        (ReceiverStream::new(rx), handle)
    }

    /// Connectivity plus the model-facing catalog.
    pub async fn mcp_status(&self) -> McpStatus {
        let facade = self.runner.facade();
        let connected = facade.source().is_ready();
        let tools = if connected {
            match facade.get_tools_for_model(&self.defaults.tools).await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(error = %e, "could not list tools for status");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        McpStatus { connected, tools }
    }

    /// Tears down the tool connections and connects again.
    ///
    /// A failed teardown is logged; the fresh connection attempt still runs.
    pub async fn reconnect(&self) -> McpilotResult<bool> {
        let mut attempted = self.tools_attempted.lock().await;
        *attempted = true;
        let source = self.runner.facade().source();
        if let Err(e) = source.reset().await {
            warn!(error = %e, "tool source did not shut down cleanly");
        }
        source.ensure_ready().await?;
        Ok(source.is_ready())
    }
}
