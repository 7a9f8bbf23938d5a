//! Tool definitions and registry for the agent runtime.
//!
//! Every tool is a named operation with a JSON argument schema. The registry
//! owns dispatch: it emits the `Running` event, races the tool against the
//! run's cancellation token and emits exactly one completion event. Tool
//! failures never escape as errors; they come back as a failed [`ToolResult`]
//! whose text is shown to the model.

pub mod control;
pub mod fs;
pub mod pdf;
pub mod shell;
pub mod web;

pub use control::StopTool;
pub use fs::{CreateDirectoryTool, ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use pdf::CreatePdfTool;
pub use shell::{ExecuteCommandTool, SendInputTool};
pub use web::{WebScrapeTool, WebSearchTool};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use super::context::AgentContext;
use super::events::{ToolCall, ToolCallStatus, ToolCallTracker};
use crate::error::{ContextError, TerminalError};
use crate::llm::{ToolCallInfo, ToolDefinition};
use crate::pdf::PdfRenderer;
use crate::sandbox;
use crate::web::WebClient;

/// Errors that can occur during tool execution.
///
/// The display text is what the model sees.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// A required argument is absent or empty.
    #[error("Error: '{0}' argument is missing or empty.")]
    ArgumentMissing(&'static str),

    /// The path resolves outside the sandbox root.
    #[error("Error: Access outside of the agent's working directory is not allowed.")]
    SandboxViolation,

    #[error("Error: {kind} not found at '{path}'.")]
    NotFound { kind: &'static str, path: String },

    /// The parent directory of a file to create is missing.
    #[error("Error: The directory for path '{0}' does not exist. Please create it first using the 'create_directory' tool.")]
    PrerequisiteMissing(String),

    /// Shell, filesystem, PDF or network failure.
    #[error("Error {action}: {message}")]
    ProcessFailure { action: String, message: String },

    #[error("Error: The operation was cancelled.")]
    Cancelled,

    #[error("Error: Unknown tool '{0}'.")]
    UnknownTool(String),

    #[error("Error: Invalid arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn failure(action: impl Into<String>, message: impl ToString) -> Self {
        Self::ProcessFailure {
            action: action.into(),
            message: message.to_string(),
        }
    }

    /// Map a context failure, keeping cancellation distinct.
    pub(crate) fn from_context(action: &str, error: ContextError) -> Self {
        match error {
            ContextError::Terminal(TerminalError::Cancelled) => Self::Cancelled,
            other => Self::failure(action, other),
        }
    }
}

/// Outcome of one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Tool output on success, the error text on failure.
    pub output: String,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(error: &ToolError) -> Self {
        Self {
            success: false,
            output: error.to_string(),
        }
    }
}

/// A required, non-blank string argument.
pub(crate) fn required_str<'a>(args: &'a Value, field: &'static str) -> Result<&'a str, ToolError> {
    match args.get(field).and_then(Value::as_str) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ToolError::ArgumentMissing(field)),
    }
}

/// A required string argument that may be empty.
pub(crate) fn present_str<'a>(args: &'a Value, field: &'static str) -> Result<&'a str, ToolError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or(ToolError::ArgumentMissing(field))
}

/// Summary text for an optional string argument.
pub(crate) fn summary_arg(args: &Value, field: &str) -> String {
    args.get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Resolve a caller path inside the context's sandbox.
pub(crate) fn sandbox_path(ctx: &AgentContext, relative: &str) -> Result<PathBuf, ToolError> {
    let root = ctx
        .init()
        .map_err(|e| ToolError::failure("preparing the sandbox", e))?;
    sandbox::resolve(root, relative).map_err(|e| {
        tracing::warn!(agent_id = %ctx.agent_id(), error = %e, "Rejected path outside sandbox");
        ToolError::SandboxViolation
    })
}

/// Trait for tools that can be executed by the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Short description of the arguments for progress events.
    fn summarize(&self, _args: &Value) -> String {
        String::new()
    }

    /// Execute the tool with the given arguments and context.
    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError>;
}

/// Registry for managing available tools.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Create a registry with the full tool set.
    pub fn with_default_tools(web: Arc<dyn WebClient>, pdf: Arc<dyn PdfRenderer>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CreateDirectoryTool));
        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(ListDirectoryTool));
        registry.register(Arc::new(ExecuteCommandTool));
        registry.register(Arc::new(SendInputTool));
        registry.register(Arc::new(WebSearchTool::new(Arc::clone(&web))));
        registry.register(Arc::new(WebScrapeTool::new(web)));
        registry.register(Arc::new(CreatePdfTool::new(pdf)));
        registry.register(Arc::new(StopTool));
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list_tools(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Function definitions offered to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| {
                ToolDefinition::function(tool.name(), tool.description(), tool.parameters_schema())
            })
            .collect()
    }

    /// Run one call by name, reporting its lifecycle to the context's observers.
    pub async fn dispatch(&self, name: &str, args: &Value, ctx: &AgentContext) -> ToolResult {
        let emit = |call: &ToolCall| ctx.emit(call);

        let Some(tool) = self.get(name) else {
            let tracker = ToolCallTracker::start(name, "", &emit);
            let error = ToolError::UnknownTool(name.to_string());
            tracker.finish(ToolCallStatus::Error, error.to_string());
            return ToolResult::failure(&error);
        };

        let tracker = ToolCallTracker::start(name, tool.summarize(args), &emit);
        let call_id = tracker.id();
        tracing::info!(agent_id = %ctx.agent_id(), tool = name, call_id = %call_id, "Dispatching tool");

        let token = ctx.cancellation_token();
        let outcome = if token.is_cancelled() {
            Err(ToolError::Cancelled)
        } else {
            tokio::select! {
                biased;
                result = tool.execute(args, ctx) => result,
                _ = token.cancelled() => Err(ToolError::Cancelled),
            }
        };

        match outcome {
            Ok(output) => {
                tracing::debug!(tool = name, call_id = %call_id, "Tool completed");
                tracker.finish(ToolCallStatus::Done, output.clone());
                ToolResult::success(output)
            }
            Err(error) => {
                tracing::warn!(tool = name, call_id = %call_id, error = %error, "Tool failed");
                tracker.finish(ToolCallStatus::Error, error.to_string());
                ToolResult::failure(&error)
            }
        }
    }

    /// Dispatch a call as requested by the model, with raw JSON arguments.
    pub async fn dispatch_call(&self, call: &ToolCallInfo, ctx: &AgentContext) -> ToolResult {
        let name = call.function.name.as_str();
        match call.parsed_arguments() {
            Ok(args) => self.dispatch(name, &args, ctx).await,
            Err(e) => {
                let emit = |call: &ToolCall| ctx.emit(call);
                let tracker = ToolCallTracker::start(name, "", &emit);
                let error = ToolError::InvalidArguments(e.to_string());
                tracing::warn!(tool = name, call_id = %tracker.id(), error = %e, "Malformed tool arguments");
                tracker.finish(ToolCallStatus::Error, error.to_string());
                ToolResult::failure(&error)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebError;
    use crate::pdf::MarkdownPdfRenderer;
    use crate::web::SearchResult;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct OfflineWeb;

    #[async_trait]
    impl WebClient for OfflineWeb {
        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, WebError> {
            Ok(Vec::new())
        }

        async fn scrape(&self, url: &str) -> Result<String, WebError> {
            Err(WebError::InvalidUrl(url.to_string()))
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::with_default_tools(Arc::new(OfflineWeb), Arc::new(MarkdownPdfRenderer))
    }

    fn recorded(ctx: &AgentContext) -> Arc<Mutex<Vec<ToolCall>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctx.subscribe(Arc::new(move |call: &ToolCall| {
            sink.lock().expect("lock").push(call.clone());
        }));
        seen
    }

    #[test]
    fn test_default_registry_has_every_tool() {
        let registry = registry();
        assert_eq!(
            registry.list_tools(),
            vec![
                "create_directory",
                "create_pdf",
                "execute_command",
                "list_directory",
                "read_file",
                "send_input",
                "stop",
                "web_scrape",
                "web_search",
                "write_file",
            ]
        );

        for definition in registry.definitions() {
            assert_eq!(definition.tool_type, "function");
            assert_eq!(definition.function.parameters["type"], "object");
            assert!(!definition.function.description.is_empty());
        }
    }

    #[test]
    fn test_required_str() {
        let args = json!({"path": "a.txt", "blank": "  ", "number": 3});
        assert_eq!(required_str(&args, "path"), Ok("a.txt"));
        assert_eq!(
            required_str(&args, "blank"),
            Err(ToolError::ArgumentMissing("blank"))
        );
        assert_eq!(
            required_str(&args, "number"),
            Err(ToolError::ArgumentMissing("number"))
        );
        assert_eq!(present_str(&json!({"content": ""}), "content"), Ok(""));
    }

    #[tokio::test]
    async fn test_dispatch_emits_running_then_done() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let seen = recorded(&ctx);

        let result = registry()
            .dispatch("list_directory", &json!({"path": "./"}), &ctx)
            .await;
        assert_eq!(result, ToolResult::success("[]"));

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].status, ToolCallStatus::Running);
        assert_eq!(seen[0].arguments, "./");
        assert_eq!(seen[1].status, ToolCallStatus::Done);
        assert_eq!(seen[1].id, seen[0].id);
        assert_eq!(seen[1].output.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_dispatch_reports_errors_as_results() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let seen = recorded(&ctx);
        let registry = registry();

        let escape = registry
            .dispatch("read_file", &json!({"path": "../../etc/passwd"}), &ctx)
            .await;
        assert!(!escape.success);
        assert_eq!(
            escape.output,
            "Error: Access outside of the agent's working directory is not allowed."
        );

        let missing = registry.dispatch("write_file", &json!({}), &ctx).await;
        assert_eq!(missing.output, "Error: 'path' argument is missing or empty.");

        let unknown = registry.dispatch("teleport", &json!({}), &ctx).await;
        assert_eq!(unknown.output, "Error: Unknown tool 'teleport'.");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 6);
        assert!(seen
            .iter()
            .skip(1)
            .step_by(2)
            .all(|c| c.status == ToolCallStatus::Error));
    }

    #[tokio::test]
    async fn test_dispatch_call_rejects_malformed_arguments() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let seen = recorded(&ctx);
        let registry = registry();

        let result = registry
            .dispatch_call(&ToolCallInfo::new("c1", "read_file", "{\"path\":"), &ctx)
            .await;
        assert!(!result.success);
        assert!(result.output.starts_with("Error: Invalid arguments:"));

        let blank = registry
            .dispatch_call(&ToolCallInfo::new("c2", "list_directory", "  "), &ctx)
            .await;
        assert_eq!(blank.output, "Error: 'path' argument is missing or empty.");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[1].status, ToolCallStatus::Error);
    }

    #[tokio::test]
    async fn test_dispatch_after_cancel_is_cancelled() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        ctx.cancel();

        let result = registry()
            .dispatch("create_directory", &json!({"path": "x"}), &ctx)
            .await;
        assert_eq!(result, ToolResult::failure(&ToolError::Cancelled));
        assert!(!dir
            .path()
            .join(ctx.agent_id().to_string())
            .join("x")
            .exists());
    }
}
