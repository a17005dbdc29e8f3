//! 引擎端到端场景：脚本化补全服务 + 假工具，驱动完整的 Planning -> Executing -> Finalizing

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;

use mcp_agent::core::{EventProjector, RunStatus};
use mcp_agent::llm::{LlmClient, Message, MockLlmClient, Role, TokenStream};
use mcp_agent::tools::{CapabilityProvider, CapabilitySet, StaticCapabilities, Tool};
use mcp_agent::{run_agent_task, AgentError, EngineOptions, RunDeps, Snapshot};

async fn collect(task: &str, deps: RunDeps) -> Vec<Snapshot> {
    run_agent_task(task, Some("thread-1".into()), deps).collect().await
}

fn deps(llm: Arc<dyn LlmClient>, capabilities: impl CapabilityProvider + 'static) -> RunDeps {
    RunDeps {
        llm: Some(llm),
        capabilities: Arc::new(capabilities),
        options: EngineOptions::default(),
    }
}

fn indices(snapshots: &[Snapshot]) -> Vec<usize> {
    snapshots.iter().map(|s| s.state.current_index).collect()
}

fn assert_well_formed(snapshots: &[Snapshot]) {
    let idx = indices(snapshots);
    assert!(idx.windows(2).all(|w| w[0] <= w[1]), "index went backwards: {idx:?}");
    for pair in snapshots.windows(2) {
        assert!(pair[1].state.ads.starts_with(&pair[0].state.ads), "ads lost a prefix");
        assert_eq!(pair[1].step, pair[0].step + 1);
    }
    let finals: Vec<_> = snapshots.iter().filter(|s| s.is_final).collect();
    assert_eq!(finals.len(), 1);
    assert!(snapshots.last().map(|s| s.is_final).unwrap_or(false));
}

/// 总是失败的工具
struct FlakyTool;

#[async_trait]
impl Tool for FlakyTool {
    fn name(&self) -> &str {
        "flaky"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Err("upstream returned 502".into())
    }
}

/// 按顺序返回预置输出的广告工具
struct ScriptedAdTool {
    outputs: Mutex<VecDeque<String>>,
}

impl ScriptedAdTool {
    fn new(outputs: &[&str]) -> Self {
        Self {
            outputs: Mutex::new(outputs.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl Tool for ScriptedAdTool {
    fn name(&self) -> &str {
        "get_contextual_ads"
    }

    fn description(&self) -> &str {
        "Fetch ads relevant to the conversation"
    }

    async fn execute(&self, _args: Value) -> Result<String, String> {
        Ok(self.outputs.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[tokio::test]
async fn test_no_capabilities_falls_back_to_single_subtask() {
    let mock = Arc::new(MockLlmClient::scripted(vec![
        Ok("I would simply look outside.".into()),
        Ok("Sunny, 21C".into()),
        Ok("Today is sunny at 21C.".into()),
    ]));
    let snapshots = collect(
        "Summarize today's weather",
        deps(mock.clone() as Arc<dyn LlmClient>, StaticCapabilities::none()),
    )
    .await;
    assert_well_formed(&snapshots);

    let last = &snapshots.last().unwrap().state;
    assert_eq!(
        last.plan.as_deref(),
        Some(&["Execute the task: Summarize today's weather".to_string()][..])
    );
    assert_eq!(last.results.len(), 1);
    assert_eq!(last.result_for("Execute the task: Summarize today's weather"), Some("Sunny, 21C"));
    assert_eq!(last.final_result.as_deref(), Some("Today is sunny at 21C."));
    assert!(last.error.is_none());

    // 汇总 prompt 引用了唯一的结果
    let calls = mock.calls();
    assert_eq!(calls.len(), 3);
    let finalize_prompt = &calls[2].last().unwrap().content;
    assert!(finalize_prompt.contains("- Execute the task: Summarize today's weather: Sunny, 21C"));

    let mut projector = EventProjector::new();
    let events: Vec<_> = snapshots.iter().filter_map(|s| projector.project(s)).collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events.last().unwrap().status, RunStatus::Success);
}

#[tokio::test]
async fn test_failed_subtask_is_skipped() {
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::scripted(vec![
        Ok("- gather data\n- call the flaky service\n- write summary".into()),
        Ok("data gathered".into()),
        Ok(r#"{"tool": "flaky", "args": {}}"#.into()),
        Ok("summary written".into()),
        Ok("All done.".into()),
    ]));
    let caps = StaticCapabilities::new(5).with_tool(FlakyTool);
    let snapshots = collect("build a report", deps(llm, caps)).await;
    assert_well_formed(&snapshots);

    assert_eq!(indices(&snapshots), vec![0, 1, 2, 3, 3]);
    let last = &snapshots.last().unwrap().state;
    assert_eq!(last.results.len(), 2);
    assert_eq!(last.result_for("gather data"), Some("Agent execution result: data gathered"));
    assert!(last.result_for("call the flaky service").is_none());
    assert_eq!(last.result_for("write summary"), Some("Agent execution result: summary written"));
    assert_eq!(last.final_result.as_deref(), Some("All done."));
    assert!(snapshots.iter().all(|s| s.state.error.is_none()));
}

#[tokio::test]
async fn test_ads_collected_and_blank_output_discarded() {
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::scripted(vec![
        Ok("- find running shoes\n- compare prices".into()),
        Ok(r#"{"tool": "get_contextual_ads", "args": {"query": "running shoes"}}"#.into()),
        Ok("Found three pairs".into()),
        Ok(r#"{"tool": "get_contextual_ads", "args": {"query": "prices"}}"#.into()),
        Ok("Cheapest is $80".into()),
        Ok("Try [Buy Acme Shoes](https://acme.example/shoes) (Sponsored) or [Zoom Kicks](https://zoom.example) (Sponsored).".into()),
    ]));
    let caps = StaticCapabilities::new(5).with_tool(ScriptedAdTool::new(&["Buy Acme Shoes", ""]));
    let mut run_deps = deps(llm, caps);
    run_deps.options.ad_tool_name = Some("get_contextual_ads".into());

    let snapshots = collect("buy running shoes", run_deps).await;
    assert_well_formed(&snapshots);

    let last = &snapshots.last().unwrap().state;
    assert_eq!(last.ads, vec!["Buy Acme Shoes".to_string()]);
    let final_result = last.final_result.as_deref().unwrap();
    assert!(final_result.contains("[Buy Acme Shoes](https://acme.example/shoes) (Sponsored)"));
    assert!(!final_result.contains("[Zoom Kicks]"));
    assert!(final_result.contains("Zoom Kicks"));
}

#[tokio::test]
async fn test_n_successful_subtasks_yield_n_plus_two_events() {
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::scripted(vec![
        Ok("- one\n- two\n- three".into()),
        Ok("1".into()),
        Ok("2".into()),
        Ok("3".into()),
        Ok("done".into()),
    ]));
    let snapshots = collect("count", deps(llm, StaticCapabilities::none())).await;
    let mut projector = EventProjector::new();
    let events: Vec<_> = snapshots.iter().filter_map(|s| projector.project(s)).collect();
    assert_eq!(events.len(), 5);
    assert!(events[..4].iter().all(|e| e.status == RunStatus::InProgress && !e.is_final));
    assert_eq!(events[1].step, "one");
    assert_eq!(events[3].result, "3");
    assert_eq!(events[4].final_result.as_deref(), Some("done"));
}

struct FailingProvider;

#[async_trait]
impl CapabilityProvider for FailingProvider {
    async fn acquire(&self) -> Result<CapabilitySet, AgentError> {
        Err(AgentError::McpError {
            server: "madgic-mcp".into(),
            message: "connection refused".into(),
        })
    }
}

#[tokio::test]
async fn test_acquire_failure_ends_with_error_snapshot() {
    let mock = Arc::new(MockLlmClient::new());
    let snapshots = collect("anything", deps(mock.clone() as Arc<dyn LlmClient>, FailingProvider)).await;
    assert_eq!(snapshots.len(), 1);
    let only = &snapshots[0];
    assert!(only.is_final);
    assert!(only.state.error.as_deref().unwrap().contains("madgic-mcp"));
    assert_eq!(mock.call_count(), 0);

    let event = EventProjector::new().project(only).unwrap();
    assert_eq!(event.status, RunStatus::Error);
    assert!(event.is_final);
}

/// 遇到名为 "boom" 的子任务时 panic 的补全服务
struct PanickyLlm;

#[async_trait]
impl LlmClient for PanickyLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_default();
        match last_user.as_str() {
            "plan it" => Ok("- first\n- boom\n- third".into()),
            "boom" => panic!("completion backend crashed"),
            "first" | "third" => Ok(format!("did {last_user}")),
            _ => Ok("final answer".into()),
        }
    }

    async fn complete_stream(&self, _messages: &[Message]) -> Result<TokenStream, String> {
        Err("not supported".into())
    }
}

#[tokio::test]
async fn test_executor_panic_routes_through_error_handler() {
    let snapshots = collect("plan it", deps(Arc::new(PanickyLlm), StaticCapabilities::none())).await;
    assert_well_formed(&snapshots);
    assert_eq!(indices(&snapshots), vec![0, 1, 2, 3, 3]);

    let last = &snapshots.last().unwrap().state;
    assert_eq!(last.results.len(), 2);
    assert!(last.result_for("boom").is_none());
    assert!(last.error.is_none());
    assert_eq!(last.final_result.as_deref(), Some("final answer"));
}

#[tokio::test]
async fn test_dropping_stream_stops_the_run() {
    let mock = Arc::new(MockLlmClient::scripted(vec![Ok("- a\n- b\n- c".into())]));
    let mut stream = run_agent_task(
        "stop early",
        None,
        deps(mock.clone() as Arc<dyn LlmClient>, StaticCapabilities::none()),
    );
    let first = stream.next().await.unwrap();
    assert_eq!(first.state.plan_len(), 3);
    assert!(!first.state.thread_id.is_empty());
    drop(stream);

    tokio::task::yield_now().await;
    assert_eq!(mock.call_count(), 1);
}

/// 记录能力集释放次数的来源
struct RecordingProvider {
    inner: StaticCapabilities,
    released: Arc<AtomicUsize>,
}

impl RecordingProvider {
    fn new(inner: StaticCapabilities) -> (Self, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let provider = Self {
            inner,
            released: Arc::clone(&released),
        };
        (provider, released)
    }
}

#[async_trait]
impl CapabilityProvider for RecordingProvider {
    async fn acquire(&self) -> Result<CapabilitySet, AgentError> {
        let released = Arc::clone(&self.released);
        let set = self.inner.acquire().await?;
        Ok(set.on_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

#[tokio::test]
async fn test_capabilities_released_after_full_run() {
    let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::scripted(vec![
        Ok("- one\n- two".into()),
        Ok("1".into()),
        Ok("2".into()),
        Ok("done".into()),
    ]));
    let (provider, released) = RecordingProvider::new(StaticCapabilities::none());
    let snapshots = collect("count", deps(llm, provider)).await;
    assert_well_formed(&snapshots);
    assert_eq!(snapshots.last().unwrap().state.final_result.as_deref(), Some("done"));
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_capabilities_released_when_stream_dropped() {
    let mock = Arc::new(MockLlmClient::scripted(vec![Ok("- a\n- b\n- c".into())]));
    let (provider, released) = RecordingProvider::new(StaticCapabilities::new(5).with_tool(FlakyTool));
    let mut stream = run_agent_task("stop early", None, deps(mock.clone() as Arc<dyn LlmClient>, provider));
    let first = stream.next().await.unwrap();
    assert_eq!(first.state.plan_len(), 3);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    drop(stream);

    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(mock.call_count(), 1);
}
