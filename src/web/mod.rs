//! Web search and page scraping.
//!
//! [`WebClient`] is the narrow interface the tools depend on; [`HttpWebClient`]
//! implements it with Google Custom Search and plain HTTP downloads. Scraped
//! pages are reduced to text: HTML through [`html::extract_visible_text`], PDF
//! through [`crate::pdf`], optionally restricted to one page with `#page=N`.

pub mod html;

pub use html::extract_visible_text;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::WebError;
use crate::pdf;

/// Sent with every request; some sites refuse unknown clients.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Render hits as a numbered list for the model.
pub fn render_search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No search results found.".to_string();
    }

    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "{}. {}\n\tLink: {}\n\tSnippet: {}",
                i + 1,
                r.title,
                r.link,
                r.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
pub trait WebClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, WebError>;

    /// Download `url` and return its readable text.
    async fn scrape(&self, url: &str) -> Result<String, WebError>;
}

/// Parse a scrape target, splitting off an optional `#page=N` fragment.
///
/// A fragment that is not a valid page number is ignored.
pub fn parse_scrape_target(raw: &str) -> Result<(Url, Option<u32>), WebError> {
    let raw = raw.trim();
    let invalid = || WebError::InvalidUrl(raw.to_string());
    if raw.is_empty() {
        return Err(invalid());
    }

    let mut url = Url::parse(raw).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }

    let page = url
        .fragment()
        .and_then(|f| f.strip_prefix("page="))
        .and_then(|n| n.parse().ok());
    url.set_fragment(None);
    Ok((url, page))
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

/// HTTP implementation of [`WebClient`].
pub struct HttpWebClient {
    http_client: Client,
    api_key: Option<String>,
    search_engine_id: Option<String>,
    search_endpoint: String,
}

impl HttpWebClient {
    pub fn new(api_key: Option<String>, search_engine_id: Option<String>) -> Result<Self, WebError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("text/html, application/pdf, */*"));

        let http_client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| WebError::RequestFailed(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key,
            search_engine_id,
            search_endpoint: SEARCH_ENDPOINT.to_string(),
        })
    }

    /// Reads `GOOGLE_API_KEY` and `GOOGLE_SEARCH_ENGINE_ID`. Both are optional
    /// here; `search` reports the missing one when it is called.
    pub fn from_env() -> Result<Self, WebError> {
        Self::new(
            env::var("GOOGLE_API_KEY").ok(),
            env::var("GOOGLE_SEARCH_ENGINE_ID").ok(),
        )
    }

    pub fn with_search_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.search_endpoint = endpoint.into();
        self
    }

    pub fn has_search_credentials(&self) -> bool {
        self.api_key.is_some() && self.search_engine_id.is_some()
    }

    fn search_url(&self, query: &str) -> Result<String, WebError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(WebError::MissingCredentials("GOOGLE_API_KEY"))?;
        let engine_id = self
            .search_engine_id
            .as_deref()
            .ok_or(WebError::MissingCredentials("GOOGLE_SEARCH_ENGINE_ID"))?;

        Ok(format!(
            "{}?key={}&cx={}&q={}",
            self.search_endpoint,
            urlencoding::encode(api_key),
            urlencoding::encode(engine_id),
            urlencoding::encode(query)
        ))
    }
}

#[async_trait]
impl WebClient for HttpWebClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, WebError> {
        let url = self.search_url(query)?;
        tracing::debug!(query, "Running web search");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| WebError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebError::HttpStatus {
                url: self.search_endpoint.clone(),
                status: status.as_u16(),
            });
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| WebError::ParseError(e.to_string()))?;
        Ok(body.items)
    }

    async fn scrape(&self, raw_url: &str) -> Result<String, WebError> {
        let (url, page) = parse_scrape_target(raw_url)?;
        tracing::debug!(url = %url, page = ?page, "Scraping page");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| WebError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebError::HttpStatus {
                url: raw_url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        if content_type.contains("application/pdf") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| WebError::RequestFailed(e.to_string()))?;
            let text = tokio::task::spawn_blocking(move || {
                let pages = pdf::extract_pages_from_bytes(&bytes)?;
                pdf::select_pages(&pages, page)
            })
            .await
            .map_err(|e| WebError::RequestFailed(e.to_string()))??;
            return Ok(text);
        }

        let body = response
            .text()
            .await
            .map_err(|e| WebError::RequestFailed(e.to_string()))?;

        if content_type.contains("text/html") {
            if page.is_some() {
                return Err(WebError::PageFragmentOnHtml);
            }
            return Ok(extract_visible_text(&body));
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_search_results() {
        assert_eq!(render_search_results(&[]), "No search results found.");

        let results = vec![
            SearchResult {
                title: "Rust".to_string(),
                link: "https://www.rust-lang.org".to_string(),
                snippet: "A language empowering everyone".to_string(),
            },
            SearchResult {
                title: "Tokio".to_string(),
                link: "https://tokio.rs".to_string(),
                snippet: "An asynchronous runtime".to_string(),
            },
        ];
        assert_eq!(
            render_search_results(&results),
            "1. Rust\n\tLink: https://www.rust-lang.org\n\tSnippet: A language empowering everyone\n\
             2. Tokio\n\tLink: https://tokio.rs\n\tSnippet: An asynchronous runtime"
        );
    }

    #[test]
    fn test_parse_scrape_target_page_fragment() {
        let (url, page) =
            parse_scrape_target("https://example.com/paper.pdf#page=3").expect("valid url");
        assert_eq!(url.as_str(), "https://example.com/paper.pdf");
        assert_eq!(page, Some(3));

        let (_, page) = parse_scrape_target("https://example.com/#intro").expect("valid url");
        assert_eq!(page, None);

        let (_, page) =
            parse_scrape_target("https://example.com/a.pdf#page=abc").expect("valid url");
        assert_eq!(page, None);
    }

    #[test]
    fn test_parse_scrape_target_rejects_invalid() {
        for raw in ["", "   ", "not a url", "ftp://example.com/file", "file:///etc/passwd"] {
            let err = parse_scrape_target(raw).expect_err("should be rejected");
            assert_eq!(err.to_string(), "Invalid URL provided.");
        }
    }

    #[test]
    fn test_search_requires_credentials() {
        let client = HttpWebClient::new(None, Some("engine".to_string())).expect("client");
        assert!(!client.has_search_credentials());
        assert!(matches!(
            client.search_url("rust"),
            Err(WebError::MissingCredentials("GOOGLE_API_KEY"))
        ));

        let client = HttpWebClient::new(Some("key".to_string()), Some("engine".to_string()))
            .expect("client")
            .with_search_endpoint("http://localhost:9/search");
        assert_eq!(
            client.search_url("rust async").expect("url"),
            "http://localhost:9/search?key=key&cx=engine&q=rust%20async"
        );
    }

    #[tokio::test]
    async fn test_scrape_invalid_url_does_not_hit_network() {
        let client = HttpWebClient::new(None, None).expect("client");
        let err = client.scrape("nonsense").await.expect_err("invalid");
        assert!(matches!(err, WebError::InvalidUrl(_)));
    }
}
