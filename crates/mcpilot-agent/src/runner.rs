//! The reasoning loop: model calls, tool execution and progress events.

use crate::extract::{Extraction, ToolCallExtractor};
use crate::llm::LlmClient;
use crate::prompt::{build_system_prompt, Persona};
use crate::stream::{EventKind, StreamEvent};
use mcpilot_core::{McpilotError, McpilotResult, Message, ToolCall, ToolResult};
use mcpilot_mcp::{FunctionTool, ToolFacade, ToolSelection};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Limits of one reasoning turn.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Model round trips allowed per turn.
    pub max_iterations: u32,
    /// Upper bound on one model call.
    pub model_timeout: Duration,
    /// Pass the catalog to the backend as native tools.
    pub native_tools: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            model_timeout: Duration::from_secs(120),
            native_tools: false,
        }
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model produced an answer.
    FinalAnswer,
    /// The iteration cap was hit.
    MaxIterations,
}

/// A tool call and what came back.
#[derive(Debug, Clone, Serialize)]
pub struct ToolExchange {
    /// The call as extracted.
    pub call: ToolCall,
    /// Its outcome.
    pub result: ToolResult,
}

/// Result of a completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// Text for the user.
    pub answer: String,
    /// Why the loop stopped.
    pub stop_reason: StopReason,
    /// Model round trips used.
    pub iterations: u32,
    /// Tool calls made, in order.
    pub exchanges: Vec<ToolExchange>,
}

/// Sends events for one turn; stops the turn once it is cancelled or
/// nobody is listening any more.
struct Emitter<'a> {
    events: &'a mpsc::Sender<StreamEvent>,
    cancel: &'a CancellationToken,
}

impl Emitter<'_> {
    async fn emit(&self, kind: EventKind) -> McpilotResult<()> {
        if self.cancel.is_cancelled() {
            return Err(McpilotError::Cancelled);
        }
        self.events
            .send(StreamEvent::now(kind))
            .await
            .map_err(|_| McpilotError::Cancelled)
    }
}

/// The bounded model ↔ tool loop.
///
/// Prompt → model → extract call → execute through the façade → feed the
/// result back → repeat, until the model answers or the cap is hit.
pub struct ReasoningLoop {
    llm: Arc<LlmClient>,
    facade: Arc<ToolFacade>,
    extractor: ToolCallExtractor,
    config: LoopConfig,
}

impl ReasoningLoop {
    /// Creates a loop with the default extractor.
    pub fn new(llm: Arc<LlmClient>, facade: Arc<ToolFacade>, config: LoopConfig) -> Self {
        Self {
            llm,
            facade,
            extractor: ToolCallExtractor::default(),
            config,
        }
    }

    /// Replaces the extractor.
    pub fn with_extractor(mut self, extractor: ToolCallExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// The tool façade the loop calls through.
    pub fn facade(&self) -> &Arc<ToolFacade> {
        &self.facade
    }

    /// The loop limits.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    async fn catalog(&self, selection: &ToolSelection) -> Vec<FunctionTool> {
        if selection.is_disabled() {
            return Vec::new();
        }
        match self.facade.get_tools_for_model(selection).await {
            Ok(tools) => tools,
            Err(e) => {
                warn!(error = %e, "tool catalog unavailable; answering without tools");
                Vec::new()
            }
        }
    }

    async fn ask_model(
        &self,
        system_prompt: &str,
        messages: &[Message],
        tools: &[FunctionTool],
        cancel: &CancellationToken,
    ) -> McpilotResult<String> {
        let native: &[FunctionTool] = if self.config.native_tools { tools } else { &[] };
        let call = tokio::time::timeout(
            self.config.model_timeout,
            self.llm.chat(Some(system_prompt), messages, native),
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpilotError::Cancelled),
            reply = call => match reply {
                Ok(result) => result,
                Err(_) => Err(McpilotError::Model(format!(
                    "model call timed out after {}s",
                    self.config.model_timeout.as_secs()
                ))),
            },
        }
    }

    async fn run_tool(
        &self,
        call: &ToolCall,
        selection: &ToolSelection,
        cancel: &CancellationToken,
    ) -> McpilotResult<mcpilot_mcp::ToolOutput> {
        if let Err(problem) = self.facade.validate_arguments(&call.name, &call.arguments) {
            return Err(McpilotError::Tool(problem));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(McpilotError::Cancelled),
            result = self.facade.call_tool(&call.name, call.arguments.clone(), selection) => result,
        }
    }

    /// Runs one turn, streaming progress into `events`.
    ///
    /// `history` is the caller's prior conversation; it is not modified.
    /// Model failures end the turn with an `error` event; tool failures are
    /// reported to the model and the loop continues. After `cancel` fires no
    /// further events are sent and `Cancelled` is returned.
    pub async fn run_turn(
        &self,
        history: &[Message],
        input: &str,
        persona: &Persona,
        selection: &ToolSelection,
        events: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> McpilotResult<TurnOutcome> {
        let out = Emitter { events, cancel };
        out.emit(EventKind::Start {
            input: input.to_string(),
        })
        .await?;

        let tools = self.catalog(selection).await;
        let known: Vec<String> = tools.iter().map(|t| t.name().to_string()).collect();
        let system_prompt = build_system_prompt(persona, &tools);

        let mut messages: Vec<Message> = history.to_vec();
        messages.push(Message::user(input));
        let mut exchanges: Vec<ToolExchange> = Vec::new();

        info!(tools = tools.len(), max_iterations = self.config.max_iterations, "Starting reasoning turn");

        for iteration in 1..=self.config.max_iterations {
            out.emit(EventKind::Thinking { iteration }).await?;

            let reply = match self.ask_model(&system_prompt, &messages, &tools, cancel).await {
                Ok(reply) => reply,
                Err(McpilotError::Cancelled) => return Err(McpilotError::Cancelled),
                Err(e) => {
                    error!(iteration, error = %e, "Model call failed");
                    let reported = out
                        .emit(EventKind::Error {
                            message: e.to_string(),
                        })
                        .await;
                    if reported.is_err() {
                        debug!(iteration, "error event not delivered; receiver is gone");
                    }
                    return Err(e);
                }
            };
            if cancel.is_cancelled() {
                return Err(McpilotError::Cancelled);
            }

            let extraction = if known.is_empty() {
                Extraction::Answer
            } else {
                self.extractor.analyze(&reply, &known)
            };

            let (call, strategy) = match extraction {
                Extraction::Call { call, strategy } => (call, strategy),
                other => {
                    let narrated = other == Extraction::NarratedPromise;
                    if narrated {
                        warn!(iteration, "Model promised a tool call without making one; treating reply as final");
                    }
                    out.emit(EventKind::FinalAnswer {
                        content: reply.clone(),
                        narrated_tool_use: narrated,
                    })
                    .await?;
                    out.emit(EventKind::Complete {
                        iterations: iteration,
                        tool_calls: exchanges.len(),
                    })
                    .await?;
                    info!(iterations = iteration, tool_calls = exchanges.len(), "Reasoning turn completed");
                    return Ok(TurnOutcome {
                        answer: reply,
                        stop_reason: StopReason::FinalAnswer,
                        iterations: iteration,
                        exchanges,
                    });
                }
            };

            info!(iteration, tool = %call.name, strategy, call_id = %call.id, "Executing tool call");
            out.emit(EventKind::ToolCall {
                iteration,
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await?;
            messages.push(Message::assistant(&reply));

            match self.run_tool(&call, selection, cancel).await {
                Ok(output) => {
                    debug!(tool = %call.name, bytes = output.raw_content.len(), "Tool returned");
                    out.emit(EventKind::ToolResult {
                        iteration,
                        name: call.name.clone(),
                        content: output.data.clone(),
                    })
                    .await?;
                    messages.push(
                        Message::tool(format!(
                            "Tool '{}' returned:\n{}\n\nUse this result to continue. \
                             Call another tool only if you still need more information.",
                            call.name, output.raw_content
                        ))
                        .with_metadata("tool_call_id", serde_json::json!(call.id)),
                    );
                    let result = ToolResult::success(&call.id, output.raw_content);
                    exchanges.push(ToolExchange { call, result });
                }
                Err(McpilotError::Cancelled) => return Err(McpilotError::Cancelled),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool execution failed");
                    out.emit(EventKind::ToolError {
                        iteration,
                        name: call.name.clone(),
                        error: e.to_string(),
                    })
                    .await?;
                    messages.push(
                        Message::tool(format!(
                            "Tool '{}' failed: {e}\n\nDo not retry the same call blindly. \
                             Fix the arguments, choose a different tool, or answer with \
                             what you already know.",
                            call.name
                        ))
                        .with_metadata("tool_call_id", serde_json::json!(call.id)),
                    );
                    let result = ToolResult::error(&call.id, e.to_string());
                    exchanges.push(ToolExchange { call, result });
                }
            }
        }

        let iterations = self.config.max_iterations;
        warn!(max_iterations = iterations, "Reasoning turn reached max iterations");
        out.emit(EventKind::MaxIterations { iterations }).await?;
        out.emit(EventKind::Complete {
            iterations,
            tool_calls: exchanges.len(),
        })
        .await?;
        Ok(TurnOutcome {
            answer: format!(
                "I could not reach a final answer within {iterations} reasoning steps."
            ),
            stop_reason: StopReason::MaxIterations,
            iterations,
            exchanges,
        })
    }
}
