//! Serializable conversation state.
//!
//! A thread outlives individual runs. It is exported as JSON for the caller
//! to persist; restoring malformed state yields a fresh thread instead of an
//! error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Message;

/// Format version written into exported threads.
pub const THREAD_FORMAT_VERSION: u32 = 1;

/// Messages exchanged with the model, excluding the system prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationThread {
    pub fn new() -> Self {
        Self {
            version: THREAD_FORMAT_VERSION,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Serialize the thread for persistence.
    pub fn export(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse exported state, or start over when it cannot be used.
    pub fn restore(serialized: &str) -> Self {
        match serde_json::from_str::<ConversationThread>(serialized) {
            Ok(thread) if thread.version == THREAD_FORMAT_VERSION => thread,
            Ok(thread) => {
                tracing::warn!(
                    version = thread.version,
                    expected = THREAD_FORMAT_VERSION,
                    "Unsupported thread version, starting a new thread"
                );
                Self::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed thread state, starting a new thread");
                Self::new()
            }
        }
    }
}

impl Default for ConversationThread {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallInfo;

    #[test]
    fn test_export_then_restore_keeps_messages() {
        let mut thread = ConversationThread::new();
        thread.push(Message::user("list files"));
        thread.push(Message::assistant_with_tool_calls(
            "",
            vec![ToolCallInfo::new("call_1", "list_directory", r#"{"path":"./"}"#)],
        ));
        thread.push(Message::tool_result("call_1", "[]"));

        let exported = thread.export().expect("export");
        let restored = ConversationThread::restore(&exported);
        assert_eq!(restored, thread);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn test_restore_malformed_starts_fresh() {
        for input in ["", "not json", "{\"messages\": 3}", "[]"] {
            let thread = ConversationThread::restore(input);
            assert!(thread.is_empty(), "input {input:?} should give a fresh thread");
            assert_eq!(thread.version, THREAD_FORMAT_VERSION);
        }
    }

    #[test]
    fn test_restore_unknown_version_starts_fresh() {
        let mut thread = ConversationThread::new();
        thread.push(Message::user("hi"));
        thread.version = THREAD_FORMAT_VERSION + 1;

        let exported = thread.export().expect("export");
        assert!(ConversationThread::restore(&exported).is_empty());
    }
}
