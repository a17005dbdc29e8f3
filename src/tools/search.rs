//! google_search 工具：Google Custom Search JSON API
//!
//! 直接绑定的网页搜索能力（不经过 MCP）；需要 GOOGLE_CSE_API_KEY 与搜索引擎 id。
//! 结果压成「标题 / 链接 / 摘要」纯文本，超过 max_result_chars 时截断并追加 ...[truncated]。

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::Tool;

pub const GOOGLE_SEARCH_TOOL: &str = "google_search";
const CSE_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
}

/// Search 工具：按查询词返回前若干条结果
pub struct GoogleSearchTool {
    client: Client,
    api_key: String,
    engine_id: String,
    max_result_chars: usize,
    endpoint: String,
}

impl GoogleSearchTool {
    pub fn new(api_key: impl Into<String>, engine_id: impl Into<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: api_key.into(),
            engine_id: engine_id.into(),
            max_result_chars,
            endpoint: CSE_ENDPOINT.to_string(),
        }
    }

    /// 覆盖 API 地址（自建代理或测试）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", query),
            ])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: SearchResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid search response: {}", e))?;
        Ok(truncate(&format_items(&body.items), self.max_result_chars))
    }
}

fn format_items(items: &[SearchItem]) -> String {
    if items.is_empty() {
        return "No good Google Search Result was found".to_string();
    }
    items
        .iter()
        .map(|i| format!("{}\n{}\n{}", i.title, i.link, i.snippet.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Tool for GoogleSearchTool {
    fn name(&self) -> &str {
        GOOGLE_SEARCH_TOOL
    }

    fn description(&self) -> &str {
        "Search Google for recent results. Args: {\"query\": \"search terms\"}"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .or_else(|| args.get("q"))
            .and_then(|v| v.as_str())
            .or_else(|| args.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(query = %query, "google search");
        self.search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_items() {
        let items = vec![SearchItem {
            title: "Rust".into(),
            link: "https://www.rust-lang.org".into(),
            snippet: " A language ".into(),
        }];
        assert_eq!(format_items(&items), "Rust\nhttps://www.rust-lang.org\nA language");
        assert!(format_items(&[]).starts_with("No good"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc\n...[truncated]");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_missing_query_rejected() {
        let tool = GoogleSearchTool::new("k", "cx", 1, 100);
        assert_eq!(tool.execute(serde_json::json!({})).await.unwrap_err(), "Missing query");
    }
}
