//! LLM integration for agent-sandbox.
//!
//! Provides the chat-completion types, the [`LlmProvider`] trait with both
//! one-shot and streaming generation, a client for LiteLLM / OpenAI-compatible
//! endpoints and a scripted [`MockProvider`] for offline runs and tests.
//!
//! ```ignore
//! use agent_sandbox::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new("", vec![Message::user("Hello!")]);
//! let mut stream = client.stream(request).await?;
//! ```

pub mod litellm;
pub mod mock;
pub mod sse;

pub use litellm::{
    response_into_stream, Choice, CompletionStream, FunctionCall, FunctionDefinition,
    GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, StreamEvent,
    ToolCallInfo, ToolChoice, ToolDefinition, Usage, DEFAULT_MODEL,
};
pub use mock::{MockProvider, MockTurn};
