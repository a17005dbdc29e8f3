//! 非流式广告整合：对一段完整文本做一次 integrate 调用
//!
//! 中继返回 JSON，取其中的 `data` 字符串作为新文本；任何失败或缺字段都保留原文。

use crate::ads::AdRelayClient;

pub async fn integrate_ads(client: &AdRelayClient, text: &str) -> String {
    if !client.is_configured() {
        return text.to_string();
    }
    match client.integrate(text).await {
        Ok(body) => match body.get("data").and_then(|v| v.as_str()) {
            Some(data) => data.to_string(),
            None => {
                tracing::debug!("integrate reply has no data field, keeping original text");
                text.to_string()
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "ad integration failed, keeping original text");
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_returns_original() {
        let client = AdRelayClient::new("", "");
        assert_eq!(integrate_ads(&client, "plain answer").await, "plain answer");
    }

    #[tokio::test]
    async fn test_unreachable_relay_returns_original() {
        let client = AdRelayClient::new("http://127.0.0.1:9", "key").with_timeout(std::time::Duration::from_millis(500));
        assert_eq!(integrate_ads(&client, "plain answer").await, "plain answer");
    }
}
