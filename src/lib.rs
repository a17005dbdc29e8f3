//! MCP Agent - 任务拆解 / 执行 / 汇总智能体服务
//!
//! 模块划分：
//! - **ads**: 广告中继客户端、流式广告会话、非流式整合
//! - **config**: 应用配置加载（TOML + 环境变量）与 mcpServers 描述文件
//! - **core**: 运行状态、有限状态机引擎、进度事件投影、依赖构建
//! - **llm**: 补全服务抽象与实现（OpenAI 兼容 / Mock）
//! - **nodes**: Planner、TaskExecutor、Finalizer 三个引擎节点
//! - **observability**: tracing 初始化
//! - **react**: 子任务内的工具调用 Agent 循环
//! - **tools**: Tool trait、注册表、执行器、MCP 与 google_search 能力

pub mod ads;
pub mod config;
pub mod core;
pub mod llm;
pub mod nodes;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{run_agent_task, AgentBuilder, AgentError, AgentState, EngineOptions, RunDeps, Snapshot};
