//! mcp-agent 命令行执行器
//!
//! 用法：`mcp-agent [--mock] [--thread <id>] [--config <path>] <任务...>`
//! 运行一次任务，逐个打印快照进度，结束时输出最终回复。`--mock` 不访问任何外部服务。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use futures_util::StreamExt;
use mcp_agent::config::load_config;
use mcp_agent::core::{AgentBuilder, EventProjector, RunDeps};
use mcp_agent::llm::{LlmClient, MockLlmClient};
use mcp_agent::observability;
use mcp_agent::run_agent_task;
use mcp_agent::tools::{EchoTool, StaticCapabilities};

#[derive(Parser, Debug)]
#[command(name = "mcp-agent")]
#[command(about = "Plan, execute and summarize a task with MCP capabilities")]
struct CliArgs {
    /// 使用 Mock 补全服务与 echo 工具，不访问外部服务
    #[arg(long, default_value_t = false)]
    mock: bool,
    /// 运行的 thread_id，缺省时生成 uuid
    #[arg(long = "thread")]
    thread_id: Option<String>,
    /// 额外的 TOML 配置文件
    #[arg(long, env = "MCP_AGENT_CONFIG")]
    config: Option<PathBuf>,
    /// 任务描述
    #[arg(required = true)]
    task: Vec<String>,
}

impl CliArgs {
    fn task(&self) -> String {
        self.task.join(" ").trim().to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cli = CliArgs::parse();
    let task = cli.task();
    if task.is_empty() {
        bail!("task must not be blank");
    }
    let config = load_config(cli.config.clone()).context("Failed to load config")?;
    let builder = AgentBuilder::new(config);

    let deps = if cli.mock {
        RunDeps {
            llm: Some(Arc::new(MockLlmClient::new()) as Arc<dyn LlmClient>),
            capabilities: Arc::new(StaticCapabilities::none().with_tool(EchoTool::new())),
            options: builder.engine_options(),
        }
    } else {
        let capabilities = builder.build_capabilities().context("Failed to load capability servers")?;
        builder.run_deps(capabilities).context("Failed to build completion service")?
    };

    let mut stream = run_agent_task(&task, cli.thread_id, deps);
    let mut projector = EventProjector::new();
    let mut last = None;
    while let Some(snapshot) = stream.next().await {
        if let Some(event) = projector.project(&snapshot) {
            tracing::info!(
                step = snapshot.step,
                index = snapshot.state.current_index,
                status = ?event.status,
                subtask = %event.step,
                "progress"
            );
        }
        last = Some(snapshot);
    }

    let snapshot = last.context("run produced no snapshots")?;
    if let Some(err) = &snapshot.state.error {
        bail!("run failed: {err}");
    }
    println!("{}", snapshot.state.final_result.unwrap_or_default());
    Ok(())
}
