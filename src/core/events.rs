//! 进度事件投影：把引擎快照映射为对外可见的 update 事件
//!
//! 去重规则：只有 current_index 前进、快照为终止快照或携带错误时才产出事件，
//! 同一个 index 的多次快照只发一次。

use serde::Serialize;

use crate::core::Snapshot;

/// 对外状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Success,
    Error,
}

/// SSE `update` 事件负载
#[derive(Debug, Clone, Serialize)]
pub struct UpdateEvent {
    pub status: RunStatus,
    /// 最近完成的子任务描述（无结果时为空串）
    pub step: String,
    /// 最近完成的子任务结果
    pub result: String,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 有状态投影器：记住上次发出事件时的 index
#[derive(Debug, Default)]
pub struct EventProjector {
    last_index: Option<usize>,
}

impl EventProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回 None 表示该快照不需要发给客户端
    pub fn project(&mut self, snapshot: &Snapshot) -> Option<UpdateEvent> {
        let index = snapshot.state.current_index;
        let advanced = self.last_index.map_or(true, |last| index > last);
        if !(advanced || snapshot.is_final || snapshot.has_error()) {
            return None;
        }
        self.last_index = Some(index);

        let status = if snapshot.has_error() {
            RunStatus::Error
        } else if snapshot.is_final {
            RunStatus::Success
        } else {
            RunStatus::InProgress
        };
        let (step, result) = snapshot
            .state
            .last_result()
            .map(|r| (r.subtask.clone(), r.result.clone()))
            .unwrap_or_default();

        Some(UpdateEvent {
            status,
            step,
            result,
            is_final: snapshot.is_final,
            final_result: snapshot.state.final_result.clone(),
            error: snapshot.state.error.clone(),
        })
    }
}
