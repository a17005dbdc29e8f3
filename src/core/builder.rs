//! 运行依赖构建器：从 AppConfig 统一构建补全服务、能力来源、广告中继与引擎参数
//!
//! CLI 与 Web 共用同一套构建逻辑。

use std::sync::Arc;

use crate::ads::AdRelayClient;
use crate::config::{load_mcp_servers, AppConfig};
use crate::core::{AgentError, EngineOptions, RunDeps};
use crate::llm::{LlmClient, OpenAiClient, GEMINI_BASE_URL};
use crate::tools::{CapabilityProvider, GoogleSearchTool, McpCapabilityProvider};

pub struct AgentBuilder {
    config: AppConfig,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 补全服务；model / temperature 可按请求覆盖。缺少凭据时报错。
    pub fn build_llm(&self, model: Option<&str>, temperature: Option<f32>) -> Result<Arc<dyn LlmClient>, AgentError> {
        let llm = &self.config.llm;
        let api_key = self.config.require_api_key()?;
        let base_url = llm.base_url.as_deref().unwrap_or(GEMINI_BASE_URL);
        let model = model
            .map(|m| m.trim_start_matches("models/"))
            .filter(|m| !m.is_empty())
            .unwrap_or(&llm.model);
        let client = OpenAiClient::new(Some(base_url), model, api_key)
            .with_temperature(temperature.unwrap_or(llm.temperature))
            .with_timeout(llm.request_timeout_secs);
        Ok(Arc::new(client))
    }

    /// MCP 服务器（config.json）+ 搜索凭据齐全时的 google_search
    pub fn build_capabilities(&self) -> Result<Arc<dyn CapabilityProvider>, AgentError> {
        let servers = load_mcp_servers(&self.config.mcp.servers_file, self.config.ads.api_key.as_deref())?;
        let tools = &self.config.tools;
        let mut provider = McpCapabilityProvider::new(servers, tools.tool_timeout_secs)
            .with_connect_timeout(self.config.mcp.connect_timeout_secs);
        match self.config.search_credentials() {
            Some((key, engine_id)) => {
                provider = provider.with_search(GoogleSearchTool::new(
                    key,
                    engine_id,
                    tools.search.timeout_secs,
                    tools.search.max_result_chars,
                ));
            }
            None => tracing::warn!("GOOGLE_CSE_API_KEY / GOOGLE_CSE_ID not set, google_search disabled"),
        }
        tracing::info!(servers = provider.server_count(), "capability provider ready");
        Ok(Arc::new(provider))
    }

    pub fn build_ad_relay(&self) -> AdRelayClient {
        let relay = AdRelayClient::from_config(&self.config.ads);
        if !relay.is_configured() {
            tracing::warn!("ADSERVER_URL / MADGIC_API_KEY not set, ad injection disabled");
        }
        relay
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_agent_iterations: self.config.llm.max_agent_iterations,
            ad_tool_name: self.config.ads.ad_tool_name.clone(),
            ..EngineOptions::default()
        }
    }

    /// 为一次运行组装依赖
    pub fn run_deps(&self, capabilities: Arc<dyn CapabilityProvider>) -> Result<RunDeps, AgentError> {
        Ok(RunDeps {
            llm: Some(self.build_llm(None, None)?),
            capabilities,
            options: self.engine_options(),
        })
    }
}
