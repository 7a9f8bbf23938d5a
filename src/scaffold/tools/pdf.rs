//! Markdown to PDF tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use super::fs::require_parent_dir;
use super::{required_str, sandbox_path, summary_arg, Tool, ToolError};
use crate::pdf::PdfRenderer;
use crate::scaffold::context::AgentContext;

/// Renders markdown into a PDF file inside the sandbox.
pub struct CreatePdfTool {
    renderer: Arc<dyn PdfRenderer>,
}

impl CreatePdfTool {
    pub fn new(renderer: Arc<dyn PdfRenderer>) -> Self {
        Self { renderer }
    }
}

fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial PDF");
        }
    }
}

/// Models often send escaped newlines and tabs inside JSON strings.
fn unescape_markdown(content: &str) -> String {
    content.replace("\\n", "\n").replace("\\t", "\t")
}

#[async_trait]
impl Tool for CreatePdfTool {
    fn name(&self) -> &str {
        "create_pdf"
    }

    fn description(&self) -> &str {
        "Creates a PDF file from a markdown string. Supports headings, paragraphs, lists and code blocks. Accepts only relative paths; the directory must already exist."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path of the PDF to create"
                },
                "content": {
                    "type": "string",
                    "description": "Markdown content to convert into the PDF"
                }
            },
            "required": ["path", "content"]
        })
    }

    fn summarize(&self, args: &Value) -> String {
        match summary_arg(args, "path") {
            path if path.is_empty() => "Path: not provided".to_string(),
            path => format!("Path: {}", path),
        }
    }

    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        let relative = required_str(args, "path")?;
        // An absent body renders an empty document.
        let content = args.get("content").and_then(Value::as_str).unwrap_or_default();
        let resolved = sandbox_path(ctx, relative)?;
        require_parent_dir(&resolved, relative).await?;

        let file_name = resolved
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| ToolError::failure("writing to file", "Path does not name a file"))?;
        let staging = resolved.with_file_name(format!(
            ".{}.{}.partial",
            file_name,
            Uuid::new_v4().simple()
        ));

        // The blocking job outlives this future when the run is cancelled, so it
        // owns both the rename and the cleanup.
        let renderer = Arc::clone(&self.renderer);
        let markdown = unescape_markdown(content);
        let token = ctx.cancellation_token();
        let rendered = tokio::task::spawn_blocking(move || {
            let outcome = match renderer.render(&markdown, &staging) {
                Ok(()) if token.is_cancelled() => Err("The operation was cancelled.".to_string()),
                Ok(()) => std::fs::rename(&staging, &resolved).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if outcome.is_err() {
                discard_partial(&staging);
            }
            outcome
        })
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r);

        if let Err(message) = rendered {
            return Err(ToolError::failure("writing to file", message));
        }

        Ok(format!(
            "Successfully wrote {} characters to '{}'.",
            content.chars().count(),
            relative
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PdfError;
    use crate::pdf::{extract_text, MarkdownPdfRenderer};
    use tempfile::TempDir;

    /// Writes a few bytes, then fails.
    struct BrokenRenderer;

    impl PdfRenderer for BrokenRenderer {
        fn render(&self, _markdown: &str, output: &Path) -> Result<(), PdfError> {
            std::fs::write(output, b"%PDF-1.5 partial")?;
            Err(PdfError::Render("out of paper".to_string()))
        }
    }

    #[test]
    fn test_unescape_markdown() {
        assert_eq!(unescape_markdown("# T\\n\\n-\\tx"), "# T\n\n-\tx");
        assert_eq!(unescape_markdown("plain"), "plain");
    }

    #[tokio::test]
    async fn test_create_pdf_writes_readable_document() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let tool = CreatePdfTool::new(Arc::new(MarkdownPdfRenderer));
        let content = "# Summary\\n\\nAll tests pass.";

        let output = tool
            .execute(&json!({"path": "summary.pdf", "content": content}), &ctx)
            .await
            .expect("create pdf");
        assert_eq!(
            output,
            format!("Successfully wrote {} characters to 'summary.pdf'.", content.chars().count())
        );

        let root = ctx.sandbox_root().expect("initialized");
        let text = extract_text(&root.join("summary.pdf")).expect("extract");
        assert_eq!(text, "Summary\nAll tests pass.");
    }

    #[tokio::test]
    async fn test_failed_render_removes_partial_file() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let tool = CreatePdfTool::new(Arc::new(BrokenRenderer));

        let err = tool
            .execute(&json!({"path": "broken.pdf", "content": "x"}), &ctx)
            .await
            .expect_err("render fails");
        assert_eq!(
            err.to_string(),
            "Error writing to file: Failed to render PDF: out of paper"
        );

        let root = ctx.sandbox_root().expect("initialized");
        assert!(!root.join("broken.pdf").exists());
        assert_eq!(std::fs::read_dir(root).expect("read dir").count(), 0);
    }

    #[tokio::test]
    async fn test_create_pdf_requires_parent_directory() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = AgentContext::new(Uuid::new_v4(), dir.path());
        let tool = CreatePdfTool::new(Arc::new(MarkdownPdfRenderer));

        let err = tool
            .execute(&json!({"path": "out/doc.pdf", "content": "x"}), &ctx)
            .await
            .expect_err("missing parent");
        assert_eq!(err, ToolError::PrerequisiteMissing("out/doc.pdf".to_string()));
    }
}
