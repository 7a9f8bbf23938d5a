//! Tools backed by the agent's persistent terminal.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{present_str, required_str, summary_arg, Tool, ToolError};
use crate::scaffold::context::AgentContext;

/// Runs a command in the persistent shell and returns its combined output.
///
/// The shell keeps its working directory and environment between calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExecuteCommandTool;

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Executes a shell command and returns its standard output and error streams. The command runs inside the agent's sandboxed working directory; the shell keeps its state between calls."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command line to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn summarize(&self, args: &Value) -> String {
        match summary_arg(args, "command") {
            command if command.is_empty() => "command not provided".to_string(),
            command => command,
        }
    }

    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        let command = required_str(args, "command")?;
        let output = ctx
            .execute_command(command)
            .await
            .map_err(|e| ToolError::from_context("executing command", e))?;
        Ok(output.to_string())
    }
}

/// Writes one line to the running terminal, for interactive programs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendInputTool;

#[async_trait]
impl Tool for SendInputTool {
    fn name(&self) -> &str {
        "send_input"
    }

    fn description(&self) -> &str {
        "Sends a line of input to the current interactive terminal session."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The text to send, without a trailing newline"
                }
            },
            "required": ["input"]
        })
    }

    fn summarize(&self, args: &Value) -> String {
        format!("Sending: {}", summary_arg(args, "input"))
    }

    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        let input = present_str(args, "input")?;
        ctx.send_input(input)
            .await
            .map_err(|e| ToolError::from_context("sending input", e))?;
        Ok("Input sent to terminal.".to_string())
    }
}
