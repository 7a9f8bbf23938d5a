//! Loop control.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolError};
use crate::scaffold::context::AgentContext;

/// Ends the agent loop once the model decides its task is done.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopTool;

#[async_trait]
impl Tool for StopTool {
    fn name(&self) -> &str {
        "stop"
    }

    fn description(&self) -> &str {
        "Stops the agent loop. Call this when you decide your task is done."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        tracing::info!(agent_id = %ctx.agent_id(), "Stop requested by the model");
        ctx.request_stop();
        Ok("Loop stopped.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaffold::tools::{ToolRegistry, ToolResult};
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_stop_sets_flag_and_reports_success() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StopTool));

        let result = registry.dispatch("stop", &json!({}), &ctx).await;
        assert_eq!(result, ToolResult::success("Loop stopped."));
        assert!(ctx.stop_requested());
        assert!(ctx.cancellation_token().is_cancelled());
    }
}
