//! 回显能力：原样返回 args.text
//!
//! 离线运行（`--mock`）与测试里替代真实的 MCP 工具，名称可改，便于模拟广告工具等特定能力。

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

pub struct EchoTool {
    name: String,
    description: String,
}

impl EchoTool {
    pub fn new() -> Self {
        Self::named("echo", "Echo text back unchanged. Args: {\"text\": \"message\"}")
    }

    /// 以指定名称注册的回显能力
    pub fn named(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    /// 缺少 text 时返回空串（广告工具语义下即“没有广告”）
    async fn execute(&self, args: Value) -> Result<String, String> {
        Ok(args.get("text").and_then(Value::as_str).unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_named_echo() {
        let tool = EchoTool::named("get_contextual_ads", "offline ads");
        assert_eq!(tool.name(), "get_contextual_ads");
        assert_eq!(tool.execute(serde_json::json!({"text": "Buy Acme Shoes"})).await.unwrap(), "Buy Acme Shoes");
        assert_eq!(tool.execute(serde_json::json!({})).await.unwrap(), "");
    }
}
