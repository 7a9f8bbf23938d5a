//! Web search and scraping tools.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{required_str, summary_arg, Tool, ToolError};
use crate::scaffold::context::AgentContext;
use crate::web::{render_search_results, WebClient};

/// Searches the web and returns the ranked hits as text.
pub struct WebSearchTool {
    client: Arc<dyn WebClient>,
}

impl WebSearchTool {
    pub fn new(client: Arc<dyn WebClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches for a query on Google. Returns the top 10 results with snippets and links."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The query to search for on the web"
                }
            },
            "required": ["query"]
        })
    }

    fn summarize(&self, args: &Value) -> String {
        format!("Searching: {}", summary_arg(args, "query"))
    }

    async fn execute(&self, args: &Value, _ctx: &AgentContext) -> Result<String, ToolError> {
        let query = required_str(args, "query")?;
        let results = self
            .client
            .search(query)
            .await
            .map_err(|e| ToolError::failure("searching the web", e))?;
        Ok(render_search_results(&results))
    }
}

/// Downloads a page or PDF and returns its readable text.
pub struct WebScrapeTool {
    client: Arc<dyn WebClient>,
}

impl WebScrapeTool {
    pub fn new(client: Arc<dyn WebClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for WebScrapeTool {
    fn name(&self) -> &str {
        "web_scrape"
    }

    fn description(&self) -> &str {
        "Scrapes the text of a webpage or PDF from a URL. Append '#page=N' to a PDF URL to read a single page. Use web_search to find URLs before scraping; don't guess links."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL of the webpage or PDF to scrape text from"
                }
            },
            "required": ["url"]
        })
    }

    fn summarize(&self, args: &Value) -> String {
        format!("Scraping: {}", summary_arg(args, "url"))
    }

    async fn execute(&self, args: &Value, _ctx: &AgentContext) -> Result<String, ToolError> {
        let url = required_str(args, "url")?;
        self.client
            .scrape(url)
            .await
            .map_err(|e| ToolError::failure(format!("scraping {}", url), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WebError;
    use crate::web::SearchResult;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[derive(Default)]
    struct StubWeb {
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WebClient for StubWeb {
        async fn search(&self, query: &str) -> Result<Vec<SearchResult>, WebError> {
            self.queries.lock().expect("lock").push(query.to_string());
            Ok(vec![SearchResult {
                title: "Rust".to_string(),
                link: "https://www.rust-lang.org".to_string(),
                snippet: "A language empowering everyone".to_string(),
            }])
        }

        async fn scrape(&self, url: &str) -> Result<String, WebError> {
            match url {
                "https://example.com/" => Ok("Example Domain".to_string()),
                _ => Err(WebError::HttpStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn context(dir: &TempDir) -> AgentContext {
        AgentContext::new(Uuid::new_v4(), dir.path())
    }

    #[tokio::test]
    async fn test_search_renders_hits() {
        let dir = TempDir::new().expect("tempdir");
        let web = Arc::new(StubWeb::default());
        let tool = WebSearchTool::new(web.clone());

        let output = tool
            .execute(&json!({"query": "rust"}), &context(&dir))
            .await
            .expect("search");
        assert_eq!(
            output,
            "1. Rust\n\tLink: https://www.rust-lang.org\n\tSnippet: A language empowering everyone"
        );
        assert_eq!(*web.queries.lock().expect("lock"), vec!["rust"]);
    }

    #[tokio::test]
    async fn test_scrape_passes_text_and_reports_failures() {
        let dir = TempDir::new().expect("tempdir");
        let ctx = context(&dir);
        let tool = WebScrapeTool::new(Arc::new(StubWeb::default()));

        let text = tool
            .execute(&json!({"url": "https://example.com/"}), &ctx)
            .await
            .expect("scrape");
        assert_eq!(text, "Example Domain");

        let err = tool
            .execute(&json!({"url": "https://example.com/gone"}), &ctx)
            .await
            .expect_err("404");
        assert_eq!(
            err.to_string(),
            "Error scraping https://example.com/gone: Failed to download content from https://example.com/gone. Status: 404"
        );
    }

    #[test]
    fn test_summaries() {
        let web: Arc<dyn WebClient> = Arc::new(StubWeb::default());
        assert_eq!(
            WebSearchTool::new(web.clone()).summarize(&json!({"query": "tokio"})),
            "Searching: tokio"
        );
        assert_eq!(
            WebScrapeTool::new(web).summarize(&json!({"url": "https://a.b"})),
            "Scraping: https://a.b"
        );
    }
}
