//! 工具调用 Agent 主循环
//!
//! Think -> Act (Tool) -> Observe -> 下一轮，直到模型给出最终答复或达到最大轮数。
//! 每次工具调用的原始输出都记录在 AgentOutcome.observations 里，供上层提取广告等负载。
//! 网页搜索在一次运行内最多真正执行一次，之后的调用直接得到额度用尽的 Observation。

use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::react::{parse_llm_output, AgentStep};
use crate::tools::ToolExecutor;

/// 达到最大轮数时返回的输出
pub const ITERATION_LIMIT_OUTPUT: &str = "Agent stopped due to iteration limit or time limit.";
pub const DEFAULT_MAX_ITERATIONS: usize = 15;
/// 日志中 Observation 预览的最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

const FORMAT_RETRY_PROMPT: &str = "Your last reply was not valid. To call a tool, reply with a single JSON object \
{\"tool\": \"<name>\", \"args\": {...}}. To finish, reply with the final answer as plain text without JSON.";

/// 循环参数
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub max_iterations: usize,
    /// 受一次性额度限制的搜索工具名
    pub search_tool_name: String,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            search_tool_name: crate::tools::GOOGLE_SEARCH_TOOL.to_string(),
        }
    }
}

/// 一次工具调用的原始输出
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub tool: String,
    pub output: String,
}

#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// 最终答复（或达到轮数上限时的固定文本）
    pub output: String,
    /// 按调用顺序记录的全部成功工具输出
    pub observations: Vec<Observation>,
}

/// 单个子任务的 Agent 循环
pub struct AgentLoop<'a> {
    llm: &'a dyn LlmClient,
    executor: &'a ToolExecutor,
    config: &'a AgentLoopConfig,
}

impl<'a> AgentLoop<'a> {
    pub fn new(llm: &'a dyn LlmClient, executor: &'a ToolExecutor, config: &'a AgentLoopConfig) -> Self {
        Self { llm, executor, config }
    }

    /// 运行循环。search_used 在整个运行内共享，一旦置位后续搜索不再执行。
    /// 补全失败与工具失败直接返回 Err，由调用方决定如何吸收。
    pub async fn run(&self, system_prompt: &str, input: &str, search_used: &mut bool) -> Result<AgentOutcome, AgentError> {
        let mut messages = vec![Message::system(system_prompt), Message::user(input)];
        let mut observations = Vec::new();

        for step in 0..self.config.max_iterations {
            let output = self.llm.complete(&messages).await.map_err(AgentError::LlmError)?;

            let call = match parse_llm_output(&output) {
                Ok(AgentStep::Response(resp)) => {
                    tracing::debug!(step, "agent loop finished");
                    return Ok(AgentOutcome {
                        output: resp,
                        observations,
                    });
                }
                Ok(AgentStep::ToolCall(tc)) => tc,
                Err(e) => {
                    tracing::warn!(step, error = %e, "unparseable agent output, asking for a retry");
                    messages.push(Message::assistant(output));
                    messages.push(Message::user(FORMAT_RETRY_PROMPT));
                    continue;
                }
            };

            let is_search = call.tool == self.config.search_tool_name;
            let observation = if is_search && *search_used {
                format!(
                    "{} has already been used for this task and may not be called again. \
                     Continue with the information you already have.",
                    call.tool
                )
            } else {
                if is_search {
                    *search_used = true;
                }
                match self.executor.execute(&call.tool, call.args.clone()).await {
                    Ok(out) => {
                        observations.push(Observation {
                            tool: call.tool.clone(),
                            output: out.clone(),
                        });
                        out
                    }
                    Err(AgentError::HallucinatedTool(name)) => format!(
                        "{} is not a valid tool, try one of [{}].",
                        name,
                        self.executor.tool_names().join(", ")
                    ),
                    Err(e) => return Err(e),
                }
            };

            tracing::debug!(
                step,
                tool = %call.tool,
                observation = %observation.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>(),
                "observation"
            );
            messages.push(Message::assistant(output));
            messages.push(Message::user(format!("Observation from {}: {}", call.tool, observation)));
        }

        tracing::warn!(max = self.config.max_iterations, "agent loop hit iteration limit");
        Ok(AgentOutcome {
            output: ITERATION_LIMIT_OUTPUT.to_string(),
            observations,
        })
    }
}
