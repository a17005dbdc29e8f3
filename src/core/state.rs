//! 运行状态：AgentState 与对外快照 Snapshot
//!
//! AgentState 是贯穿引擎各步骤的唯一记录，每次任务提交创建一个，不在并发运行间共享。
//! 每完成一步，引擎把当时的 AgentState 连同 step / is_final 打包为 Snapshot 交给消费者。

use serde::Serialize;

/// 能力快照中的一项：名称与描述（供 Planner / Agent prompt 使用）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
}

/// 单个子任务的结果（按执行顺序保存）
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubtaskResult {
    pub subtask: String,
    pub result: String,
}

/// 引擎状态记录
#[derive(Clone, Debug, Serialize)]
pub struct AgentState {
    /// 原始任务，创建后不变
    pub task: String,
    /// 运行标识（调用方提供或自动生成）
    pub thread_id: String,
    /// 子任务列表，Planner 写入一次
    pub plan: Option<Vec<String>>,
    /// 指向 plan 的游标，只增不减，不超过 plan 长度
    pub current_index: usize,
    /// 子任务结果，插入顺序即执行顺序
    pub results: Vec<SubtaskResult>,
    /// 工具原样返回的广告文本，只追加
    pub ads: Vec<String>,
    pub final_result: Option<String>,
    /// 最近一次失败；ErrorHandler 会清空
    pub error: Option<String>,
    /// 本次运行的能力快照
    pub tools: Vec<ToolDescriptor>,
    /// 本次运行是否已经用掉唯一一次网页搜索
    pub search_used: bool,
}

impl AgentState {
    pub fn new(task: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            thread_id: thread_id.into(),
            plan: None,
            current_index: 0,
            results: Vec::new(),
            ads: Vec::new(),
            final_result: None,
            error: None,
            tools: Vec::new(),
            search_used: false,
        }
    }

    pub fn plan_len(&self) -> usize {
        self.plan.as_ref().map(|p| p.len()).unwrap_or(0)
    }

    /// 当前待执行的子任务；plan 缺失或已耗尽时为 None
    pub fn current_subtask(&self) -> Option<&str> {
        self.plan
            .as_ref()
            .and_then(|p| p.get(self.current_index))
            .map(String::as_str)
    }

    /// 写入子任务结果。同名子任务重复执行时覆盖旧值并保留原位置。
    pub fn record_result(&mut self, subtask: impl Into<String>, result: impl Into<String>) {
        let subtask = subtask.into();
        let result = result.into();
        match self.results.iter_mut().find(|r| r.subtask == subtask) {
            Some(existing) => existing.result = result,
            None => self.results.push(SubtaskResult { subtask, result }),
        }
    }

    pub fn result_for(&self, subtask: &str) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.subtask == subtask)
            .map(|r| r.result.as_str())
    }

    /// 最近写入的结果 (subtask, result)
    pub fn last_result(&self) -> Option<&SubtaskResult> {
        self.results.last()
    }

    /// 前进一个子任务，不越过 plan 末尾
    pub(crate) fn advance(&mut self) {
        if self.current_index < self.plan_len() {
            self.current_index += 1;
        }
    }
}

/// 引擎每一步产出的快照
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    #[serde(flatten)]
    pub state: AgentState,
    /// 从 1 开始单调递增
    pub step: usize,
    /// 仅终止快照为 true
    pub is_final: bool,
}

impl Snapshot {
    pub fn has_error(&self) -> bool {
        self.state.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_defaults() {
        let state = AgentState::new("task", "t1");
        assert!(state.plan.is_none());
        assert_eq!(state.current_index, 0);
        assert!(state.results.is_empty());
        assert!(state.ads.is_empty());
        assert!(state.final_result.is_none());
        assert!(state.error.is_none());
        assert!(state.current_subtask().is_none());
    }

    #[test]
    fn test_record_result_overwrites_in_place() {
        let mut state = AgentState::new("task", "t1");
        state.record_result("a", "1");
        state.record_result("b", "2");
        state.record_result("a", "3");
        assert_eq!(state.results.len(), 2);
        assert_eq!(state.results[0].subtask, "a");
        assert_eq!(state.result_for("a"), Some("3"));
        assert_eq!(state.last_result().map(|r| r.subtask.as_str()), Some("b"));
    }

    #[test]
    fn test_advance_never_passes_plan_end() {
        let mut state = AgentState::new("task", "t1");
        state.advance();
        assert_eq!(state.current_index, 0);
        state.plan = Some(vec!["only".into()]);
        state.advance();
        state.advance();
        assert_eq!(state.current_index, 1);
    }
}
