//! Progress events streamed during a turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One progress event of a reasoning turn.
///
/// Serializes flat: `{"type": "tool_call", "timestamp": "...", "iteration": 1, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl StreamEvent {
    /// Stamps `kind` with the current time.
    pub fn now(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }

    /// The `type` tag, e.g. `"final_answer"`.
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete { .. } | EventKind::Error { .. })
    }
}

/// Payload of a [`StreamEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The turn has started.
    Start {
        /// The user input being answered.
        input: String,
    },
    /// The model is being asked.
    Thinking {
        /// 1-based iteration number.
        iteration: u32,
    },
    /// A tool call was extracted and is about to run.
    ToolCall {
        /// Iteration that produced the call.
        iteration: u32,
        /// Tool name.
        name: String,
        /// Arguments as extracted.
        arguments: serde_json::Value,
    },
    /// A tool call succeeded.
    ToolResult {
        /// Iteration of the call.
        iteration: u32,
        /// Tool name.
        name: String,
        /// Normalized result data.
        content: serde_json::Value,
    },
    /// A tool call failed; the loop goes on.
    ToolError {
        /// Iteration of the call.
        iteration: u32,
        /// Tool name.
        name: String,
        /// What went wrong.
        error: String,
    },
    /// The model answered without calling a tool.
    FinalAnswer {
        /// Answer text.
        content: String,
        /// The text promised a tool call that was never made.
        #[serde(default)]
        narrated_tool_use: bool,
    },
    /// The iteration cap was reached.
    MaxIterations {
        /// The cap.
        iterations: u32,
    },
    /// The turn is over.
    Complete {
        /// Model round trips used.
        iterations: u32,
        /// Tool calls attempted.
        tool_calls: usize,
    },
    /// The turn failed.
    Error {
        /// What went wrong.
        message: String,
    },
}

impl EventKind {
    /// The serialized `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::FinalAnswer { .. } => "final_answer",
            Self::MaxIterations { .. } => "max_iterations",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }
}
