//! Agent 错误类型
//!
//! 各节点（Planner / Executor / Finalizer）在自身边界内吸收这些错误；
//! 只有引擎自身的簿记失败才会以终止快照的形式暴露给调用方。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（LLM、工具、MCP、配置、广告中继等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Hallucinated tool: {0}")]
    HallucinatedTool(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("MCP server {server}: {message}")]
    McpError { server: String, message: String },

    #[error("Ad relay error: {0}")]
    AdRelay(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 节点内部 panic 越过了节点自身的失败边界，由引擎捕获并路由到错误处理
    #[error("Node panicked: {0}")]
    NodePanic(String),
}
