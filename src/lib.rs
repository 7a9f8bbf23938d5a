//! agent-sandbox: sandboxed tool-execution runtime for LLM agents.
//!
//! This library confines an agent's filesystem tools to a per-agent
//! directory, drives a persistent shell as request/response commands and
//! runs a cancellable streaming conversation loop around them.

// Core modules
pub mod cli;
pub mod error;
pub mod llm;
pub mod pdf;
pub mod sandbox;
pub mod scaffold;
pub mod web;

// Re-export commonly used error types
pub use error::{ContextError, LlmError, PdfError, SandboxError, TerminalError, WebError};
