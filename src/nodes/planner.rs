//! Planner：把高层任务拆成有序子任务
//!
//! 一次补全调用，回复按行解析：只保留以列表符号开头的行并去掉符号。
//! 解析不出任何子任务、或调用失败时退化为单一子任务 `Execute the task: <task>`，从不向外报错。

use std::sync::Arc;

use crate::core::{AgentState, ToolDescriptor};
use crate::llm::{LlmClient, Message};

const FALLBACK_PREFIX: &str = "Execute the task: ";

/// 规划 prompt：任务、能力清单与「网页搜索只用一次」的约束
pub fn planning_prompt(task: &str, tools: &[ToolDescriptor], search_tool: &str) -> String {
    let tool_descriptions = if tools.is_empty() {
        "No tools available.".to_string()
    } else {
        tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are a planning assistant.\n\
         Given the high-level task: '{task}'\n\n\
         You have access to the following tools:\n{tool_descriptions}\n\n\
         You can search the web using the {search_tool} tool.\n\
         You can only use the {search_tool} tool once in the entire plan.\n\n\
         Break down the high-level task into a series of clear, executable subtasks, considering the capabilities of the available tools.\n\
         If a subtask requires a tool, make sure to include that in the plan description.\n\n\
         Respond with a list of subtasks, one per line, prefixed with a hyphen.\n"
    )
}

/// 解析列表行；空行与非列表行忽略
pub fn parse_plan(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(strip_marker)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// `-` 后可直接跟文字；`*` 与 `•` 后必须有空白，避免把 **粗体** 行当成子任务
fn strip_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix('-') {
        return Some(rest.trim_start_matches('-'));
    }
    ['*', '•']
        .iter()
        .find_map(|m| line.strip_prefix(*m))
        .filter(|rest| rest.starts_with(char::is_whitespace))
}

pub fn fallback_plan(task: &str) -> Vec<String> {
    vec![format!("{FALLBACK_PREFIX}{task}")]
}

/// Planner 节点
pub struct Planner {
    llm: Option<Arc<dyn LlmClient>>,
    search_tool: String,
}

impl Planner {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, search_tool: impl Into<String>) -> Self {
        Self {
            llm,
            search_tool: search_tool.into(),
        }
    }

    /// 生成计划；任何失败都落到 fallback_plan
    pub async fn plan(&self, task: &str, tools: &[ToolDescriptor]) -> Vec<String> {
        let Some(llm) = self.llm.as_ref() else {
            return fallback_plan(task);
        };
        let messages = [
            Message::system(planning_prompt(task, tools, &self.search_tool)),
            Message::user(task),
        ];
        match llm.complete(&messages).await {
            Ok(text) => {
                let subtasks = parse_plan(&text);
                if subtasks.is_empty() {
                    tracing::warn!("planner reply had no list items, using fallback plan");
                    fallback_plan(task)
                } else {
                    subtasks
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "planning call failed, using fallback plan");
                fallback_plan(task)
            }
        }
    }

    /// 引擎步骤：写入 plan，游标归零
    pub async fn plan_step(&self, mut state: AgentState) -> AgentState {
        let plan = self.plan(&state.task, &state.tools).await;
        tracing::info!(thread_id = %state.thread_id, subtasks = plan.len(), "plan ready");
        state.plan = Some(plan);
        state.current_index = 0;
        state
    }
}
