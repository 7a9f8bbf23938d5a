//! Sandboxed tool-execution runtime.
//!
//! The scaffold gives the model its tools and drives the conversation:
//! 1. `AgentContext` owns the sandbox root, cancellation and the terminal
//! 2. `ToolRegistry` dispatches model tool calls and reports their lifecycle
//! 3. `TerminalSession` turns a persistent shell into request/response calls
//! 4. `AgentLoop` streams turns and feeds tool results back to the model
//!
//! # Example
//!
//! ```ignore
//! use agent_sandbox::scaffold::{AgentConfig, AgentContext, AgentLoop, ToolRegistry};
//! use agent_sandbox::llm::LiteLlmClient;
//!
//! let context = Arc::new(AgentContext::new(Uuid::new_v4(), "agents"));
//! let registry = ToolRegistry::with_default_tools(web, pdf);
//! let mut agent = AgentLoop::new(Arc::new(LiteLlmClient::from_env()?), registry, context, AgentConfig::default());
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let report = agent.run("Create hello.txt", &tx).await?;
//! ```

pub mod agent_loop;
pub mod context;
pub mod events;
pub mod prompts;
pub mod terminal;
pub mod thread;
pub mod tools;

pub use agent_loop::{AgentConfig, AgentError, AgentLoop, RunReport, RunState};
pub use context::{AgentContext, SubscriptionId};
pub use events::{AgentEvent, ToolCall, ToolCallStatus, ToolCallTracker, ToolEventSink};
pub use prompts::{build_system_prompt, AGENT_SYSTEM_PROMPT};
pub use terminal::{CommandOutput, ShellConfig, TerminalSession, SENTINEL_MARKER};
pub use thread::{ConversationThread, THREAD_FORMAT_VERSION};
pub use tools::{Tool, ToolError, ToolRegistry, ToolResult};
