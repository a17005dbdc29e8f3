//! 广告中继客户端
//!
//! 三个调用：打开流会话、逐块处理、结束会话；另有一次性的非流式 integrate。
//! 每个调用都有固定超时（默认 5 秒，配置值限制在 1..=5 秒）。失败统一返回 AgentError::AdRelay，由调用方退化为直通。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AdsSection;
use crate::core::AgentError;

const API_KEY_HEADER: &str = "x-api-key";
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_RELAY_TIMEOUT_SECS: u64 = 1;
const MAX_RELAY_TIMEOUT_SECS: u64 = 5;

/// 广告中继协议
#[async_trait]
pub trait AdRelay: Send + Sync {
    /// 打开会话，返回 stream_id
    async fn open_stream(&self) -> Result<String, AgentError>;

    async fn process_chunk(&self, stream_id: &str, chunk: &ChunkRequest) -> Result<ChunkReply, AgentError>;

    async fn finalize_stream(&self, stream_id: &str, summary: &FinalizeRequest) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, Serialize)]
struct OpenStreamRequest<'a> {
    content_type: &'a str,
    language: &'a str,
    settings: StreamSettings<'a>,
}

#[derive(Debug, Clone, Serialize)]
struct StreamSettings<'a> {
    ad_frequency: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenStreamReply {
    #[serde(default)]
    stream_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRequest {
    pub content: String,
    pub sequence: u64,
    pub total_length_so_far: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkReply {
    #[serde(default)]
    pub processed_content: Option<String>,
    #[serde(default)]
    pub ads_added: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeRequest {
    pub total_chunks: u64,
    pub final_word_count: usize,
}

/// HTTP 实现
#[derive(Debug, Clone)]
pub struct AdRelayClient {
    http: reqwest::Client,
    timeout: Duration,
    base_url: String,
    api_key: String,
    content_type: String,
    language: String,
    ad_frequency: String,
}

impl AdRelayClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: build_http(DEFAULT_RELAY_TIMEOUT),
            timeout: DEFAULT_RELAY_TIMEOUT,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            content_type: "chat".to_string(),
            language: "en".to_string(),
            ad_frequency: "moderate".to_string(),
        }
    }

    pub fn from_config(ads: &AdsSection) -> Self {
        Self::new(ads.base_url.clone().unwrap_or_default(), ads.api_key.clone().unwrap_or_default())
            .with_timeout(Duration::from_secs(
                ads.timeout_secs.clamp(MIN_RELAY_TIMEOUT_SECS, MAX_RELAY_TIMEOUT_SECS),
            ))
            .with_stream_settings(&ads.content_type, &ads.language, &ads.ad_frequency)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = build_http(timeout);
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_stream_settings(mut self, content_type: &str, language: &str, ad_frequency: &str) -> Self {
        self.content_type = content_type.to_string();
        self.language = language.to_string();
        self.ad_frequency = ad_frequency.to_string();
        self
    }

    /// base_url 与 api_key 都设置了才会发请求
    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, AgentError> {
        if !self.is_configured() {
            return Err(AgentError::AdRelay("ad relay not configured".to_string()));
        }
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::AdRelay(format!("{path}: {e}")))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(AgentError::AdRelay(format!("{path}: HTTP {}", response.status())));
        }
        Ok(response)
    }

    /// 非流式广告整合：POST /api/ads/integrate {text}，返回中继的原始 JSON
    pub async fn integrate(&self, text: &str) -> Result<Value, AgentError> {
        let response = self.post_json("/api/ads/integrate", &serde_json::json!({ "text": text })).await?;
        response
            .json()
            .await
            .map_err(|e| AgentError::AdRelay(format!("integrate: invalid body: {e}")))
    }
}

fn build_http(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder().timeout(timeout).build().unwrap_or_default()
}

#[async_trait]
impl AdRelay for AdRelayClient {
    async fn open_stream(&self) -> Result<String, AgentError> {
        let body = OpenStreamRequest {
            content_type: &self.content_type,
            language: &self.language,
            settings: StreamSettings {
                ad_frequency: &self.ad_frequency,
            },
        };
        let reply: OpenStreamReply = self
            .post_json("/api/v1/streams", &body)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::AdRelay(format!("open stream: invalid body: {e}")))?;
        reply
            .stream_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AgentError::AdRelay("open stream: no stream_id in reply".to_string()))
    }

    async fn process_chunk(&self, stream_id: &str, chunk: &ChunkRequest) -> Result<ChunkReply, AgentError> {
        self.post_json(&format!("/api/v1/streams/{stream_id}/chunks"), chunk)
            .await?
            .json()
            .await
            .map_err(|e| AgentError::AdRelay(format!("chunk {}: invalid body: {e}", chunk.sequence)))
    }

    async fn finalize_stream(&self, stream_id: &str, summary: &FinalizeRequest) -> Result<(), AgentError> {
        self.post_json(&format!("/api/v1/streams/{stream_id}/finalize"), summary)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bodies_are_snake_case() {
        let chunk = serde_json::to_value(ChunkRequest {
            content: "hi".into(),
            sequence: 1,
            total_length_so_far: 2,
        })
        .unwrap();
        assert_eq!(chunk["total_length_so_far"], 2);
        let fin = serde_json::to_value(FinalizeRequest {
            total_chunks: 3,
            final_word_count: 7,
        })
        .unwrap();
        assert_eq!(fin["final_word_count"], 7);
        let reply: ChunkReply = serde_json::from_str(r#"{"ads_added": []}"#).unwrap();
        assert!(reply.processed_content.is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_client_never_sends() {
        let client = AdRelayClient::new("", "");
        assert!(!client.is_configured());
        assert!(matches!(client.open_stream().await, Err(AgentError::AdRelay(_))));
        assert!(client.integrate("text").await.is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = AdRelayClient::new("https://ads.example/", "k");
        assert_eq!(client.base_url, "https://ads.example");
    }

    #[test]
    fn test_config_timeout_is_clamped() {
        let client_for = |secs| {
            AdRelayClient::from_config(&AdsSection {
                timeout_secs: secs,
                ..AdsSection::default()
            })
        };
        assert_eq!(client_for(60).timeout(), Duration::from_secs(5));
        assert_eq!(client_for(0).timeout(), Duration::from_secs(1));
        assert_eq!(client_for(3).timeout(), Duration::from_secs(3));
        assert_eq!(AdRelayClient::new("https://ads.example", "k").timeout(), DEFAULT_RELAY_TIMEOUT);
    }
}
