//! Scripted provider for driving the agent loop without a network.

use async_trait::async_trait;
use futures::stream::StreamExt;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::litellm::{
    Choice, CompletionStream, GenerationRequest, GenerationResponse, LlmProvider, Message,
    StreamEvent, ToolCallInfo, Usage,
};
use crate::error::LlmError;

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Emit these events, then finish.
    Events(Vec<StreamEvent>),
    /// Emit these events, then never finish.
    Hang(Vec<StreamEvent>),
    /// Fail the request.
    Fail(String),
}

impl MockTurn {
    /// A plain text answer.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Events(vec![
            StreamEvent::TextDelta(text.into()),
            finished("stop"),
        ])
    }

    /// A text answer delivered in several deltas.
    pub fn chunks(parts: &[&str]) -> Self {
        let mut events: Vec<StreamEvent> = parts
            .iter()
            .map(|p| StreamEvent::TextDelta((*p).to_string()))
            .collect();
        events.push(finished("stop"));
        Self::Events(events)
    }

    /// A single tool call with JSON arguments.
    pub fn tool_call(id: &str, name: &str, arguments: Value) -> Self {
        Self::tool_calls(vec![ToolCallInfo::new(id, name, arguments.to_string())])
    }

    /// Several tool calls in one turn.
    pub fn tool_calls(calls: Vec<ToolCallInfo>) -> Self {
        Self::Events(vec![StreamEvent::ToolCalls(calls), finished("tool_calls")])
    }
}

fn finished(reason: &str) -> StreamEvent {
    StreamEvent::Finished {
        finish_reason: Some(reason.to_string()),
        usage: None,
    }
}

/// Provider that replays [`MockTurn`]s in order and records every request.
#[derive(Debug, Default)]
pub struct MockProvider {
    turns: Mutex<VecDeque<MockTurn>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_turn(self, turn: MockTurn) -> Self {
        self.push_turn(turn);
        self
    }

    pub fn push_turn(&self, turn: MockTurn) {
        if let Ok(mut turns) = self.turns.lock() {
            turns.push_back(turn);
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Scripted turns not yet consumed.
    pub fn remaining(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }

    fn next_turn(&self, request: GenerationRequest) -> Result<MockTurn, LlmError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        self.turns
            .lock()
            .ok()
            .and_then(|mut t| t.pop_front())
            .ok_or_else(|| LlmError::RequestFailed("mock script exhausted".to_string()))
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let events = match self.next_turn(request)? {
            MockTurn::Events(events) => events,
            MockTurn::Hang(_) => futures::future::pending().await,
            MockTurn::Fail(message) => return Err(LlmError::RequestFailed(message)),
        };

        let mut content = String::new();
        let mut tool_calls = None;
        let mut finish_reason = None;
        for event in events {
            match event {
                StreamEvent::TextDelta(text) => content.push_str(&text),
                StreamEvent::ToolCalls(calls) => tool_calls = Some(calls),
                StreamEvent::Finished {
                    finish_reason: reason,
                    ..
                } => finish_reason = reason,
            }
        }

        let message = match tool_calls {
            Some(calls) => Message::assistant_with_tool_calls(content, calls),
            None => Message::assistant(content),
        };
        Ok(GenerationResponse {
            id: "mock".to_string(),
            model: "mock".to_string(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason,
            }],
            usage: Usage::default(),
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<CompletionStream, LlmError> {
        match self.next_turn(request)? {
            MockTurn::Events(events) => Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed()),
            MockTurn::Hang(events) => Ok(futures::stream::iter(events.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            MockTurn::Fail(message) => Err(LlmError::RequestFailed(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_replays_turns_in_order() {
        let provider = MockProvider::new()
            .with_turn(MockTurn::tool_call("c1", "list_directory", json!({"path": "."})))
            .with_turn(MockTurn::text("done"));

        let first = provider
            .generate(GenerationRequest::new("m", vec![Message::user("go")]))
            .await
            .expect("first turn");
        assert_eq!(first.first_tool_calls().len(), 1);

        let events: Vec<_> = provider
            .stream(GenerationRequest::new("m", vec![]))
            .await
            .expect("second turn")
            .collect()
            .await;
        assert!(matches!(&events[0], Ok(StreamEvent::TextDelta(t)) if t == "done"));

        assert_eq!(provider.requests().len(), 2);
        assert_eq!(provider.remaining(), 0);
        assert!(provider
            .generate(GenerationRequest::new("m", vec![]))
            .await
            .is_err());
    }
}
