//! 工具调用 JSON Schema 生成（schemars 自动生成）
//!
//! 用于将「合法 tool call」的 JSON 结构注入 Agent 的 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};

/// 工具调用请求格式：与 Agent 循环解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，必须是 available tools 中的一个
    pub tool: String,
    /// 工具参数，依工具的 parameters schema 而定
    pub args: serde_json::Map<String, serde_json::Value>,
}

/// 返回工具调用的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
