//! Executor：每个引擎步骤执行一个子任务
//!
//! 有工具时跑 Agent 循环，并把指定广告工具的原始输出收集为广告负载；
//! 无工具时直接做一次补全。任何失败只记日志、跳过该子任务，游标照常前进。

use std::sync::Arc;

use crate::core::{AgentError, AgentState};
use crate::llm::{LlmClient, Message};
use crate::react::{AgentLoop, AgentLoopConfig, AgentOutcome};
use crate::tools::{tool_call_schema_json, ToolExecutor};

/// Agent 循环结果的前缀
pub const AGENT_RESULT_PREFIX: &str = "Agent execution result: ";

#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub loop_config: AgentLoopConfig,
    /// 广告工具名；None 表示不收集广告
    pub ad_tool_name: Option<String>,
}

/// 子任务执行节点
pub struct TaskExecutor {
    llm: Option<Arc<dyn LlmClient>>,
    tools: Arc<ToolExecutor>,
    options: ExecutorOptions,
}

impl TaskExecutor {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, tools: Arc<ToolExecutor>, options: ExecutorOptions) -> Self {
        Self { llm, tools, options }
    }

    /// 执行 plan[current_index]，返回新状态。
    /// 成功：写入结果、追加新广告；失败：results 与 ads 不变。两种情况游标都 +1。
    pub async fn execute_step(&self, state: &AgentState) -> AgentState {
        let mut next = state.clone();
        let (Some(llm), Some(subtask)) = (self.llm.as_deref(), state.current_subtask()) else {
            next.advance();
            return next;
        };
        let subtask = subtask.to_string();

        let mut search_used = state.search_used;
        let outcome = if self.tools.is_empty() {
            direct_completion(llm, &subtask).await.map(|text| (text, Vec::new()))
        } else {
            self.run_agent(llm, state, &subtask, &mut search_used)
                .await
                .map(|outcome| {
                    let ads = self.extract_ads(&outcome);
                    (format!("{AGENT_RESULT_PREFIX}{}", outcome.output), ads)
                })
        };

        match outcome {
            Ok((result, ads)) => {
                if !ads.is_empty() {
                    tracing::info!(thread_id = %state.thread_id, count = ads.len(), "ads fetched");
                }
                next.record_result(subtask, result);
                next.ads.extend(ads);
            }
            Err(e) => {
                tracing::warn!(thread_id = %state.thread_id, subtask = %subtask, error = %e, "subtask failed, skipping");
            }
        }
        next.search_used = search_used;
        next.advance();
        next
    }

    async fn run_agent(
        &self,
        llm: &dyn LlmClient,
        state: &AgentState,
        subtask: &str,
        search_used: &mut bool,
    ) -> Result<AgentOutcome, AgentError> {
        let system = agent_system_prompt(state, &self.tools);
        AgentLoop::new(llm, &self.tools, &self.options.loop_config)
            .run(&system, subtask, search_used)
            .await
    }

    /// 广告工具的非空输出，原样保留
    fn extract_ads(&self, outcome: &AgentOutcome) -> Vec<String> {
        let Some(ad_tool) = self.options.ad_tool_name.as_deref() else {
            return Vec::new();
        };
        outcome
            .observations
            .iter()
            .filter(|o| o.tool == ad_tool && !o.output.trim().is_empty())
            .map(|o| o.output.clone())
            .collect()
    }
}

async fn direct_completion(llm: &dyn LlmClient, subtask: &str) -> Result<String, AgentError> {
    let messages = [
        Message::system(format!(
            "You are an AI assistant tasked with executing the following task: {subtask}. \
             Please respond with the result of executing this task."
        )),
        Message::user(subtask),
    ];
    llm.complete(&messages).await.map_err(AgentError::LlmError)
}

fn agent_system_prompt(state: &AgentState, tools: &ToolExecutor) -> String {
    let data = if state.results.is_empty() {
        "none".to_string()
    } else {
        state
            .results
            .iter()
            .map(|r| format!("- {}: {}", r.subtask, r.result))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are an AI assistant tasked with executing the following subtask by using available tools: {task}. \
         You can use the tools to answer the user's request.\n\
         available tools: {names}\n\
         available data:\n{data}\n\n\
         To call a tool, reply with only a JSON object. When you have the final answer, reply with plain text and no JSON.\n\n\
         ## Tools\n```json\n{tools}\n```\n\n\
         ## Tool call JSON Schema (you must output valid JSON matching this)\n```json\n{schema}\n```",
        task = state.task,
        names = tools.tool_names().join(", "),
        tools = tools.schema_json(),
        schema = tool_call_schema_json(),
    )
}
