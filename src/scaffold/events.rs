//! Tool-call lifecycle values and the events a run emits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent_loop::RunState;

/// Status of one tool invocation. Only ever moves forward from `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Done,
    Error,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallStatus::Running)
    }
}

/// One invocation as seen by observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Uuid,
    pub name: String,
    /// Short human-readable description of the arguments.
    pub arguments: String,
    pub status: ToolCallStatus,
    pub output: Option<String>,
}

/// Receives every tool-call event of a context.
pub type ToolEventSink = std::sync::Arc<dyn Fn(&ToolCall) + Send + Sync>;

/// Emits the `Running` event on creation and exactly one completion event.
///
/// `finish` consumes the tracker, so a call cannot complete twice.
pub struct ToolCallTracker<'a> {
    call: ToolCall,
    emit: &'a (dyn Fn(&ToolCall) + Sync),
}

impl<'a> ToolCallTracker<'a> {
    pub fn start(
        name: impl Into<String>,
        arguments: impl Into<String>,
        emit: &'a (dyn Fn(&ToolCall) + Sync),
    ) -> Self {
        let call = ToolCall {
            id: Uuid::new_v4(),
            name: name.into(),
            arguments: arguments.into(),
            status: ToolCallStatus::Running,
            output: None,
        };
        emit(&call);
        Self { call, emit }
    }

    pub fn id(&self) -> Uuid {
        self.call.id
    }

    pub fn finish(mut self, status: ToolCallStatus, output: impl Into<String>) -> ToolCall {
        debug_assert!(status.is_terminal());
        self.call.status = status;
        self.call.output = Some(output.into());
        (self.emit)(&self.call);
        self.call
    }
}

/// Items produced by one orchestration run, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A new turn is starting.
    TurnStarted,
    /// An incremental text fragment from the model.
    Text(String),
    /// A tool-call lifecycle update.
    ToolCall(ToolCall),
    /// The run ended in this state.
    Finished(RunState),
}
