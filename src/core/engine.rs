//! 编排引擎：Planning -> Executing(循环) -> Finalizing -> Terminated 的有限状态机
//!
//! 对外只有 run_agent_task，返回一个按需拉取的快照流：消费者每 poll 一次才推进一步，
//! 消费者不再 poll（断开）时不会再发起任何步骤。能力集在第一步之前获取，
//! 在 Finalizing 中显式释放；流被提前丢弃时由 CapabilityGuard 在后台释放。
//!
//! Executor 自身吸收一切失败；越过其边界的 panic 会被捕获，写入 error 并路由到 HandleError，
//! HandleError 清空 error、游标 +1 后继续。Planning / Finalizing 中的 panic 视为引擎级失败，
//! 以携带 error 的终止快照结束。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use futures_util::FutureExt;

use crate::core::{AgentError, AgentState, Snapshot};
use crate::llm::LlmClient;
use crate::nodes::{ExecutorOptions, Finalizer, Planner, TaskExecutor};
use crate::react::{AgentLoopConfig, DEFAULT_MAX_ITERATIONS};
use crate::tools::{CapabilityProvider, CapabilitySet, GOOGLE_SEARCH_TOOL};

const NO_FINAL_STATE: &str = "No final state captured";

/// 引擎参数
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 单个子任务内 Agent 循环的最大轮数
    pub max_agent_iterations: usize,
    /// 输出被当作广告负载收集的工具名
    pub ad_tool_name: Option<String>,
    /// 受一次性额度限制的搜索工具名
    pub search_tool_name: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_agent_iterations: DEFAULT_MAX_ITERATIONS,
            ad_tool_name: None,
            search_tool_name: GOOGLE_SEARCH_TOOL.to_string(),
        }
    }
}

/// 一次运行的依赖，显式传入
pub struct RunDeps {
    /// 补全服务；None 时各节点走各自的兜底路径
    pub llm: Option<Arc<dyn LlmClient>>,
    pub capabilities: Arc<dyn CapabilityProvider>,
    pub options: EngineOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Acquiring,
    Planning,
    Executing,
    Finalizing,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Execute,
    HandleError,
    Finalize,
}

/// 路由：有 error 走 HandleError；plan 存在且未耗尽走 Execute；否则 Finalize
pub fn route(state: &AgentState) -> Route {
    if state.error.is_some() {
        Route::HandleError
    } else if state.plan.is_some() && state.current_index < state.plan_len() {
        Route::Execute
    } else {
        Route::Finalize
    }
}

/// ErrorHandler：清空 error 并跳过当前子任务
pub fn handle_error(mut state: AgentState) -> AgentState {
    if let Some(err) = state.error.take() {
        tracing::warn!(thread_id = %state.thread_id, index = state.current_index, error = %err, "skipping failed subtask");
    }
    state.advance();
    state
}

/// 运行结束前未显式释放的能力集，在 Drop 时交给后台任务释放
struct CapabilityGuard(Option<CapabilitySet>);

impl CapabilityGuard {
    async fn release(&mut self) {
        if let Some(set) = self.0.take() {
            set.release().await;
        }
    }
}

impl Drop for CapabilityGuard {
    fn drop(&mut self) {
        let Some(set) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("run abandoned, releasing capabilities in background");
                handle.spawn(set.release());
            }
            Err(_) => tracing::warn!("run abandoned outside a runtime, capabilities not released"),
        }
    }
}

struct Nodes {
    planner: Planner,
    executor: TaskExecutor,
    finalizer: Finalizer,
}

struct EngineRun {
    phase: Phase,
    state: AgentState,
    step: usize,
    deps: RunDeps,
    nodes: Option<Nodes>,
    guard: CapabilityGuard,
    final_emitted: bool,
}

impl EngineRun {
    fn new(task: &str, thread_id: String, deps: RunDeps) -> Self {
        Self {
            phase: Phase::Acquiring,
            state: AgentState::new(task, thread_id),
            step: 0,
            deps,
            nodes: None,
            guard: CapabilityGuard(None),
            final_emitted: false,
        }
    }

    fn snapshot(&mut self, is_final: bool) -> Snapshot {
        self.step += 1;
        if is_final {
            self.final_emitted = true;
        }
        Snapshot {
            state: self.state.clone(),
            step: self.step,
            is_final,
        }
    }

    /// 以携带 error 的终止快照结束运行
    async fn fail(&mut self, error: AgentError) -> Snapshot {
        tracing::error!(thread_id = %self.state.thread_id, error = %error, "run failed");
        self.guard.release().await;
        self.state.error = Some(error.to_string());
        self.phase = Phase::Terminated;
        self.snapshot(true)
    }

    fn build_nodes(&self, capabilities: &CapabilitySet) -> Nodes {
        let llm = self.deps.llm.clone();
        let options = &self.deps.options;
        Nodes {
            planner: Planner::new(llm.clone(), options.search_tool_name.clone()),
            executor: TaskExecutor::new(
                llm.clone(),
                capabilities.executor(),
                ExecutorOptions {
                    loop_config: AgentLoopConfig {
                        max_iterations: options.max_agent_iterations,
                        search_tool_name: options.search_tool_name.clone(),
                    },
                    ad_tool_name: options.ad_tool_name.clone(),
                },
            ),
            finalizer: Finalizer::new(llm),
        }
    }

    /// 推进到下一个要交付的快照；None 表示流结束
    async fn advance(&mut self) -> Option<Snapshot> {
        loop {
            match self.phase {
                Phase::Acquiring => match self.deps.capabilities.acquire().await {
                    Ok(set) => {
                        self.state.tools = set.descriptors();
                        self.nodes = Some(self.build_nodes(&set));
                        self.guard.0 = Some(set);
                        self.phase = Phase::Planning;
                        tracing::info!(thread_id = %self.state.thread_id, tools = self.state.tools.len(), "run started");
                    }
                    Err(e) => return Some(self.fail(e).await),
                },
                Phase::Planning => {
                    let nodes = self.nodes.as_ref()?;
                    let planned = AssertUnwindSafe(nodes.planner.plan_step(self.state.clone()))
                        .catch_unwind()
                        .await;
                    match planned {
                        Ok(state) => {
                            self.state = state;
                            self.phase = Phase::Executing;
                            return Some(self.snapshot(false));
                        }
                        Err(panic) => return Some(self.fail(AgentError::NodePanic(panic_message(panic))).await),
                    }
                }
                Phase::Executing => match route(&self.state) {
                    Route::Execute => {
                        let nodes = self.nodes.as_ref()?;
                        let executed = AssertUnwindSafe(nodes.executor.execute_step(&self.state))
                            .catch_unwind()
                            .await;
                        match executed {
                            Ok(state) => {
                                self.state = state;
                                return Some(self.snapshot(false));
                            }
                            // 不交付失败步骤的快照，下一轮路由到 HandleError
                            Err(panic) => {
                                let err = AgentError::NodePanic(panic_message(panic));
                                self.state.error = Some(err.to_string());
                            }
                        }
                    }
                    Route::HandleError => {
                        self.state = handle_error(self.state.clone());
                        return Some(self.snapshot(false));
                    }
                    Route::Finalize => self.phase = Phase::Finalizing,
                },
                Phase::Finalizing => {
                    let nodes = self.nodes.as_ref()?;
                    let finalized = AssertUnwindSafe(nodes.finalizer.finalize(self.state.clone()))
                        .catch_unwind()
                        .await;
                    match finalized {
                        Ok(state) => {
                            self.state = state;
                            self.guard.release().await;
                            self.phase = Phase::Terminated;
                            tracing::info!(thread_id = %self.state.thread_id, step = self.step + 1, "run finished");
                            return Some(self.snapshot(true));
                        }
                        Err(panic) => return Some(self.fail(AgentError::NodePanic(panic_message(panic))).await),
                    }
                }
                Phase::Terminated => {
                    if self.final_emitted {
                        return None;
                    }
                    self.state.error = Some(NO_FINAL_STATE.to_string());
                    return Some(self.snapshot(true));
                }
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// 运行一个任务，返回快照流。thread_id 缺省时生成 uuid。
pub fn run_agent_task(task: &str, thread_id: Option<String>, deps: RunDeps) -> BoxStream<'static, Snapshot> {
    let thread_id = thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let run = EngineRun::new(task, thread_id, deps);
    stream::unfold(run, |mut run| async move {
        let snapshot = run.advance().await?;
        Some((snapshot, run))
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route() {
        let mut state = AgentState::new("t", "t1");
        assert_eq!(route(&state), Route::Finalize);
        state.plan = Some(vec!["a".into()]);
        assert_eq!(route(&state), Route::Execute);
        state.error = Some("boom".into());
        assert_eq!(route(&state), Route::HandleError);
        state.error = None;
        state.current_index = 1;
        assert_eq!(route(&state), Route::Finalize);
    }

    #[test]
    fn test_handle_error_clears_and_advances() {
        let mut state = AgentState::new("t", "t1");
        state.plan = Some(vec!["a".into(), "b".into()]);
        state.error = Some("boom".into());
        let next = handle_error(state);
        assert!(next.error.is_none());
        assert_eq!(next.current_index, 1);
        assert_eq!(route(&next), Route::Execute);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(42u8)), "unknown panic");
    }
}
