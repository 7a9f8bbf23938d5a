//! Filesystem tools confined to the agent's sandbox.
//!
//! - `CreateDirectoryTool`: create a directory and any missing parents
//! - `ReadFileTool`: read a text file, or the extracted text of a PDF
//! - `WriteFileTool`: create or overwrite a file in an existing directory
//! - `ListDirectoryTool`: names of a directory's direct children

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::Path;

use super::{present_str, required_str, sandbox_path, summary_arg, Tool, ToolError};
use crate::pdf;
use crate::scaffold::context::AgentContext;

fn path_summary(args: &Value) -> String {
    match summary_arg(args, "path") {
        path if path.is_empty() => "path not provided".to_string(),
        path => path,
    }
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": {
                "type": "string",
                "description": description
            }
        },
        "required": ["path"]
    })
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Fail with `PrerequisiteMissing` unless the parent directory exists.
pub(crate) async fn require_parent_dir(resolved: &Path, relative: &str) -> Result<(), ToolError> {
    let parent_exists = match resolved.parent() {
        Some(parent) => tokio::fs::metadata(parent)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false),
        None => false,
    };
    if parent_exists {
        Ok(())
    } else {
        Err(ToolError::PrerequisiteMissing(relative.to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CreateDirectoryTool;

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Creates a new directory, including missing parent directories. Accepts only relative paths."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Relative path of the directory to create")
    }

    fn summarize(&self, args: &Value) -> String {
        path_summary(args)
    }

    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        let relative = required_str(args, "path")?;
        let resolved = sandbox_path(ctx, relative)?;

        tokio::fs::create_dir_all(&resolved)
            .await
            .map_err(|e| ToolError::failure("creating directory", e))?;
        Ok(format!("Successfully created directory at '{}'.", relative))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads the entire content of a specified file. PDF files are returned as extracted text. Accepts only relative paths."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Relative path of the file to read")
    }

    fn summarize(&self, args: &Value) -> String {
        path_summary(args)
    }

    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        let relative = required_str(args, "path")?;
        let resolved = sandbox_path(ctx, relative)?;

        let is_file = tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ToolError::NotFound {
                kind: "File",
                path: relative.to_string(),
            });
        }

        if is_pdf(&resolved) {
            return tokio::task::spawn_blocking(move || pdf::extract_text(&resolved))
                .await
                .map_err(|e| ToolError::failure("reading file", e))?
                .map_err(|e| ToolError::failure("reading file", e));
        }

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(|e| ToolError::failure("reading file", e))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes or overwrites content to a specified file. Accepts only relative paths. Will create the file if it does not exist, but not the directory."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Relative path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full content of the file"
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
        let content = present_str(args, "content")?;
        let resolved = sandbox_path(ctx, relative)?;
        require_parent_dir(&resolved, relative).await?;

        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::failure("writing to file", e))?;
        Ok(format!(
            "Successfully wrote {} characters to '{}'.",
            content.chars().count(),
            relative
        ))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "Lists the names of the files and directories directly inside a directory. Accepts only relative paths; use './' for the working directory."
    }

    fn parameters_schema(&self) -> Value {
        path_schema("Relative path of the directory to list")
    }

    fn summarize(&self, args: &Value) -> String {
        path_summary(args)
    }

    async fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<String, ToolError> {
        let relative = required_str(args, "path")?;
        let resolved = sandbox_path(ctx, relative)?;

        let mut entries = match tokio::fs::read_dir(&resolved).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::NotFound {
                    kind: "Directory",
                    path: relative.to_string(),
                });
            }
            Err(e) => return Err(ToolError::failure("listing directory", e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ToolError::failure("listing directory", e))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        serde_json::to_string(&names).map_err(|e| ToolError::failure("listing directory", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn context(dir: &TempDir) -> AgentContext {
        AgentContext::new(Uuid::new_v4(), dir.path())
    }

    #[tokio::test]
    async fn test_create_write_read_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let created = CreateDirectoryTool
            .execute(&json!({"path": "./a/b"}), &ctx)
            .await
            .expect("create");
        assert_eq!(created, "Successfully created directory at './a/b'.");

        let written = WriteFileTool
            .execute(&json!({"path": "./a/b/c.txt", "content": "hi"}), &ctx)
            .await
            .expect("write");
        assert_eq!(written, "Successfully wrote 2 characters to './a/b/c.txt'.");

        let read = ReadFileTool
            .execute(&json!({"path": "./a/b/c.txt"}), &ctx)
            .await
            .expect("read");
        assert_eq!(read, "hi");
    }

    #[tokio::test]
    async fn test_write_requires_existing_parent() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let err = WriteFileTool
            .execute(&json!({"path": "missing/file.txt", "content": "x"}), &ctx)
            .await
            .expect_err("parent is missing");
        assert_eq!(err, ToolError::PrerequisiteMissing("missing/file.txt".to_string()));

        let root = ctx.sandbox_root().expect("initialized");
        assert!(!root.join("missing").exists());
    }

    #[tokio::test]
    async fn test_list_directory_sorted_and_non_recursive() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let empty = ListDirectoryTool
            .execute(&json!({"path": "./"}), &ctx)
            .await
            .expect("list");
        assert_eq!(empty, "[]");

        let root = ctx.sandbox_root().expect("initialized");
        std::fs::create_dir_all(root.join("sub/deeper")).expect("mkdir");
        std::fs::write(root.join("b.txt"), "b").expect("write");
        std::fs::write(root.join("a.txt"), "a").expect("write");

        let listing = ListDirectoryTool
            .execute(&json!({"path": "."}), &ctx)
            .await
            .expect("list");
        let names: Vec<String> = serde_json::from_str(&listing).expect("json array");
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_missing_targets_are_not_found() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        let read = ReadFileTool
            .execute(&json!({"path": "nope.txt"}), &ctx)
            .await
            .expect_err("missing file");
        assert_eq!(read.to_string(), "Error: File not found at 'nope.txt'.");

        let list = ListDirectoryTool
            .execute(&json!({"path": "nope"}), &ctx)
            .await
            .expect_err("missing dir");
        assert!(matches!(list, ToolError::NotFound { kind: "Directory", .. }));
    }

    #[tokio::test]
    async fn test_escapes_are_rejected_before_touching_disk() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);

        for args in [
            json!({"path": "../outside.txt", "content": "x"}),
            json!({"path": "a/../../outside.txt", "content": "x"}),
        ] {
            let err = WriteFileTool.execute(&args, &ctx).await.expect_err("escape");
            assert_eq!(err, ToolError::SandboxViolation);
        }
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[tokio::test]
    async fn test_read_pdf_returns_extracted_text() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);
        let root = ctx.init().expect("init").to_path_buf();

        let bytes = pdf::render_markdown_to_bytes("# Notes\n\nRemember the milk.").expect("render");
        std::fs::write(root.join("notes.PDF"), bytes).expect("write pdf");

        let text = ReadFileTool
            .execute(&json!({"path": "notes.PDF"}), &ctx)
            .await
            .expect("read pdf");
        assert_eq!(text, "Notes\nRemember the milk.");
    }

    #[test]
    fn test_summaries() {
        assert_eq!(ReadFileTool.summarize(&json!({"path": "x.txt"})), "x.txt");
        assert_eq!(ReadFileTool.summarize(&json!({})), "path not provided");
        assert_eq!(WriteFileTool.summarize(&json!({"path": "x.txt"})), "Path: x.txt");
        assert_eq!(WriteFileTool.summarize(&json!({})), "Path: not provided");
    }
}
