//! Error types for agent-sandbox operations.
//!
//! Defines error types for the subsystems that back the tool runtime:
//! - Sandbox path resolution
//! - Terminal session management
//! - Agent context lifecycle
//! - LLM API interactions
//! - Web search and scraping
//! - PDF extraction and rendering

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while resolving a path inside the sandbox root.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Path '{0}' is absolute; only paths relative to the sandbox root are accepted")]
    AbsolutePath(String),

    #[error("Path '{path}' resolves outside of the sandbox root '{base}'")]
    Escape { path: String, base: PathBuf },

    #[error("Path contains an invalid null character")]
    NullByte,

    #[error("Sandbox root '{0}' must be an absolute path")]
    RelativeBase(PathBuf),
}

/// Errors that can occur while driving the persistent shell.
#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("Failed to spawn shell '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    #[error("Shell process exited before the command completed")]
    ProcessExited,

    #[error("Command wait was cancelled")]
    Cancelled,

    #[error("I/O error while talking to the shell: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while managing an agent context.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Failed to create sandbox directory '{path}': {source}")]
    SandboxCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No active terminal session.")]
    NoTerminal,

    #[error("Terminal error: {0}")]
    Terminal(#[from] TerminalError),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Stream interrupted: {0}")]
    StreamError(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while searching or scraping the web.
#[derive(Debug, Error)]
pub enum WebError {
    #[error("Invalid URL provided.")]
    InvalidUrl(String),

    #[error("Web search is not configured: {0} environment variable not set")]
    MissingCredentials(&'static str),

    #[error("Failed to download content from {url}. Status: {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Specifying a page number with '#page=N' is only supported for PDF files.")]
    PageFragmentOnHtml,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search response: {0}")]
    ParseError(String),

    #[error("{0}")]
    Pdf(#[from] PdfError),
}

/// Errors that can occur during PDF extraction and rendering.
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Failed to parse PDF document: {0}")]
    Parse(#[from] lopdf::Error),

    #[error("Page {page} not found. The PDF only has {total} pages.")]
    PageNotFound { page: u32, total: usize },

    #[error("Failed to render PDF: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
