//! Tool Call 解析
//!
//! 模型每轮输出要么是 JSON 工具调用（{"tool": "...", "args": {...}}，可包在 ```json 代码块里），
//! 要么是直接给出的最终答复。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 模型发起的工具调用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// 单轮模型输出
#[derive(Debug, Clone)]
pub enum AgentStep {
    /// 最终答复
    Response(String),
    ToolCall(ToolCall),
}

/// 解析模型输出：含 JSON 且 tool 非空则为 ToolCall，否则为 Response
pub fn parse_llm_output(output: &str) -> Result<AgentStep, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return Ok(AgentStep::Response(trimmed.to_string()));
        }
    } else {
        return Ok(AgentStep::Response(trimmed.to_string()));
    };

    let parsed: ToolCall =
        serde_json::from_str(json_str).map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;

    if parsed.tool.trim().is_empty() {
        Ok(AgentStep::Response(trimmed.to_string()))
    } else {
        Ok(AgentStep::ToolCall(parsed))
    }
}
