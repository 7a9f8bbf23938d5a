//! Streaming orchestration loop.
//!
//! One run drives the model until it answers without tool calls:
//! 1. Send the thread (plus system prompt and tool definitions)
//! 2. Forward text deltas to the caller as they arrive
//! 3. Dispatch the requested tool calls through the registry
//! 4. Append the results to the thread and ask again
//!
//! Every run ends with a context reset, so the next run gets a fresh
//! cancellation token whatever happened before.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use super::context::AgentContext;
use super::events::{AgentEvent, ToolCall};
use super::prompts::{build_system_prompt, TOOL_ROUND_LIMIT_PROMPT};
use super::thread::ConversationThread;
use super::tools::ToolRegistry;
use crate::error::{ContextError, LlmError};
use crate::llm::{GenerationRequest, LlmProvider, Message, StreamEvent, ToolCallInfo};

/// Errors that can occur during agent execution.
#[derive(Debug, Error)]
pub enum AgentError {
    /// LLM provider error.
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    /// The agent context could not be prepared.
    #[error("Context error: {0}")]
    ContextError(#[from] ContextError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use for LLM requests.
    pub model: String,
    /// Temperature for LLM sampling.
    pub temperature: f64,
    /// Maximum tokens for LLM response.
    pub max_tokens: u32,
    /// Tool-call rounds allowed in one run before the model must answer.
    pub max_tool_rounds: usize,
    /// Runs allowed in `run_until_stopped`.
    pub max_turns: usize,
    /// Appended to the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: String::new(), // Use LLM provider's default
            temperature: 0.2,
            max_tokens: 4096,
            max_tool_rounds: 50,
            max_turns: 20,
            system_prompt: None,
        }
    }
}

impl AgentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Where the loop is in its current or last run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// `Completed` or `Cancelled`; failures are returned as errors.
    pub state: RunState,
    /// All assistant text produced during the run.
    pub text: String,
    /// Model requests issued.
    pub rounds: usize,
    /// Tool calls dispatched.
    pub tool_calls: usize,
    /// The model called `stop` during this run.
    pub stop_requested: bool,
}

/// Progress of a run, shared between the driver and the report.
#[derive(Default)]
struct RunProgress {
    text: String,
    rounds: usize,
    tool_calls: usize,
}

/// Main agent execution loop.
pub struct AgentLoop {
    llm_client: Arc<dyn LlmProvider>,
    tool_registry: ToolRegistry,
    context: Arc<AgentContext>,
    config: AgentConfig,
    system_prompt: String,
    thread: ConversationThread,
    state: RunState,
}

impl AgentLoop {
    pub fn new(
        llm_client: Arc<dyn LlmProvider>,
        tool_registry: ToolRegistry,
        context: Arc<AgentContext>,
        config: AgentConfig,
    ) -> Self {
        let system_prompt = build_system_prompt(config.system_prompt.as_deref());
        Self {
            llm_client,
            tool_registry,
            context,
            config,
            system_prompt,
            thread: ConversationThread::new(),
            state: RunState::Idle,
        }
    }

    pub fn context(&self) -> &Arc<AgentContext> {
        &self.context
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn thread(&self) -> &ConversationThread {
        &self.thread
    }

    /// Serialize the conversation for persistence.
    pub fn export_thread(&self) -> Result<String, AgentError> {
        Ok(self.thread.export()?)
    }

    /// Replace the conversation with persisted state, or a fresh thread if
    /// the state is unusable.
    pub fn restore_thread(&mut self, serialized: &str) {
        self.thread = ConversationThread::restore(serialized);
    }

    /// Run one turn. An empty `input` continues the thread as it is.
    ///
    /// Events are sent in order: `TurnStarted`, then text fragments and
    /// tool-call updates as they happen, then `Finished`. Cancellation through
    /// the context ends the run with [`RunState::Cancelled`].
    pub async fn run(
        &mut self,
        input: &str,
        events: &UnboundedSender<AgentEvent>,
    ) -> Result<RunReport, AgentError> {
        self.context.init()?;
        let _ = events.send(AgentEvent::TurnStarted);

        let forward = events.clone();
        let subscription = self.context.subscribe(Arc::new(move |call: &ToolCall| {
            let _ = forward.send(AgentEvent::ToolCall(call.clone()));
        }));

        if !input.is_empty() {
            self.thread.push(Message::user(input));
        }
        self.state = RunState::Streaming;
        tracing::info!(
            agent_id = %self.context.agent_id(),
            messages = self.thread.len(),
            "Starting run"
        );

        let token = self.context.cancellation_token();
        self.context.set_run_active(true);
        let mut progress = RunProgress::default();
        let outcome = self.drive(&token, events, &mut progress).await;
        self.context.set_run_active(false);

        self.context.unsubscribe(subscription);
        let stop_requested = self.context.stop_requested();
        self.context.reset().await;

        let result = match outcome {
            Ok(state) => Ok(RunReport {
                state,
                text: progress.text,
                rounds: progress.rounds,
                tool_calls: progress.tool_calls,
                stop_requested,
            }),
            Err(e) => {
                tracing::error!(agent_id = %self.context.agent_id(), error = %e, "Run failed");
                Err(e)
            }
        };

        self.state = match &result {
            Ok(report) => report.state,
            Err(_) => RunState::Failed,
        };
        tracing::info!(
            agent_id = %self.context.agent_id(),
            state = ?self.state,
            rounds = progress.rounds,
            "Run finished"
        );
        let _ = events.send(AgentEvent::Finished(self.state));
        result
    }

    /// Keep running with empty input until the model calls `stop`, a run is
    /// cancelled, or `max_turns` runs have happened.
    pub async fn run_until_stopped(
        &mut self,
        input: &str,
        events: &UnboundedSender<AgentEvent>,
    ) -> Result<Vec<RunReport>, AgentError> {
        let mut reports = Vec::new();
        let mut input = input;

        while reports.len() < self.config.max_turns {
            let report = self.run(input, events).await?;
            let finished = report.stop_requested || report.state == RunState::Cancelled;
            reports.push(report);
            if finished {
                return Ok(reports);
            }
            input = "";
        }

        tracing::warn!(
            agent_id = %self.context.agent_id(),
            max_turns = self.config.max_turns,
            "Turn limit reached without a stop request"
        );
        Ok(reports)
    }

    async fn drive(
        &mut self,
        token: &CancellationToken,
        events: &UnboundedSender<AgentEvent>,
        progress: &mut RunProgress,
    ) -> Result<RunState, AgentError> {
        loop {
            let limit_reached = progress.rounds >= self.config.max_tool_rounds;
            let request = self.build_request(limit_reached);
            progress.rounds += 1;

            let stream = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(RunState::Cancelled),
                stream = self.llm_client.stream(request) => stream?,
            };
            let (text, calls, cancelled) = self.consume(stream, token, events).await?;
            progress.text.push_str(&text);

            if cancelled {
                if !text.is_empty() {
                    self.thread.push(Message::assistant(text));
                }
                return Ok(RunState::Cancelled);
            }

            if calls.is_empty() || limit_reached {
                if !calls.is_empty() {
                    tracing::warn!(
                        ignored = calls.len(),
                        "Tool round limit reached, ignoring further tool calls"
                    );
                }
                self.thread.push(Message::assistant(text));
                return Ok(RunState::Completed);
            }

            self.thread
                .push(Message::assistant_with_tool_calls(text, calls.clone()));
            for call in &calls {
                // Every call gets a result message, even after cancellation.
                let result = self.tool_registry.dispatch_call(call, &self.context).await;
                progress.tool_calls += 1;
                self.thread.push(Message::tool_result(&call.id, result.output));
            }

            if self.context.stop_requested() {
                return Ok(RunState::Completed);
            }
            if token.is_cancelled() {
                return Ok(RunState::Cancelled);
            }
        }
    }

    /// Read one streamed completion. Returns the text, the tool calls and
    /// whether the stream was cut short by cancellation.
    async fn consume(
        &self,
        mut stream: crate::llm::CompletionStream,
        token: &CancellationToken,
        events: &UnboundedSender<AgentEvent>,
    ) -> Result<(String, Vec<ToolCallInfo>, bool), AgentError> {
        let mut text = String::new();
        let mut calls = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok((text, calls, true)),
                next = stream.next() => next,
            };
            match next {
                None => break,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(StreamEvent::TextDelta(delta))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    let _ = events.send(AgentEvent::Text(delta));
                }
                Some(Ok(StreamEvent::ToolCalls(batch))) => calls.extend(batch),
                Some(Ok(StreamEvent::Finished {
                    finish_reason,
                    usage,
                })) => {
                    tracing::debug!(?finish_reason, ?usage, "Completion finished");
                }
            }
        }
        Ok((text, calls, false))
    }

    fn build_request(&self, limit_reached: bool) -> GenerationRequest {
        let mut messages = Vec::with_capacity(self.thread.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(self.thread.messages.iter().cloned());

        let tools = if limit_reached {
            messages.push(Message::user(TOOL_ROUND_LIMIT_PROMPT));
            Vec::new()
        } else {
            self.tool_registry.definitions()
        };

        GenerationRequest::new(self.config.model.clone(), messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_tools(tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_config_default() {
        let config = AgentConfig::default();
        assert!(config.model.is_empty());
        assert!((config.temperature - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.max_tool_rounds, 50);
        assert_eq!(config.max_turns, 20);
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn test_agent_config_builder() {
        let config = AgentConfig::new()
            .with_model("gpt-4")
            .with_temperature(0.5)
            .with_max_tokens(8192)
            .with_max_tool_rounds(3)
            .with_max_turns(2)
            .with_system_prompt("Be brief.");

        assert_eq!(config.model, "gpt-4");
        assert!((config.temperature - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.max_tokens, 8192);
        assert_eq!(config.max_tool_rounds, 3);
        assert_eq!(config.max_turns, 2);
        assert_eq!(config.system_prompt.as_deref(), Some("Be brief."));
    }

    #[test]
    fn test_run_state_serialization() {
        assert_eq!(
            serde_json::to_string(&RunState::Cancelled).expect("serialize"),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_run_report_serialization() {
        let report = RunReport {
            state: RunState::Completed,
            text: "Done".to_string(),
            rounds: 2,
            tool_calls: 1,
            stop_requested: false,
        };

        let json = serde_json::to_string(&report).expect("serialize");
        let parsed: RunReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, report);
    }
}
