//! 认知层：工具调用解析与 Agent 主循环

pub mod loop_;
pub mod tool_call;

pub use loop_::{AgentLoop, AgentLoopConfig, AgentOutcome, Observation, DEFAULT_MAX_ITERATIONS, ITERATION_LIMIT_OUTPUT};
pub use tool_call::{parse_llm_output, AgentStep, ToolCall};
