//! Server-sent event decoding for streamed chat completions.
//!
//! [`SseDecoder`] turns arbitrary byte chunks into `data:` payloads, and
//! [`ToolCallAccumulator`] stitches tool-call fragments back together by index.

use serde::Deserialize;

use super::litellm::{ToolCallInfo, Usage};

/// Incremental decoder for a `text/event-stream` body.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Feed a chunk and return every complete `data:` payload it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    payloads.push(data.to_string());
                }
            }
        }
        payloads
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiStreamChunk {
    #[serde(default)]
    pub choices: Vec<ApiStreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiStreamChoice {
    #[serde(default)]
    pub delta: ApiDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ApiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<ApiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments.
///
/// The first fragment for an index carries the id and name; later ones only
/// append argument text.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PartialToolCall>,
}

impl ToolCallAccumulator {
    pub(crate) fn apply(&mut self, deltas: &[ApiToolCallDelta]) {
        for delta in deltas {
            if self.calls.len() <= delta.index {
                self.calls.resize_with(delta.index + 1, PartialToolCall::default);
            }
            let call = &mut self.calls[delta.index];

            if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
                call.id = id.to_string();
            }
            if let Some(function) = &delta.function {
                if let Some(name) = function.name.as_deref().filter(|n| !n.is_empty()) {
                    call.name = name.to_string();
                }
                if let Some(arguments) = &function.arguments {
                    call.arguments.push_str(arguments);
                }
            }
        }
    }

    /// Finished calls in index order. Fragments that never received a name are dropped.
    pub fn finish(self) -> Vec<ToolCallInfo> {
        self.calls
            .into_iter()
            .enumerate()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id
                };
                ToolCallInfo::new(id, call.name, call.arguments)
            })
            .collect()
    }
}
