//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MCP_AGENT__*` 覆盖（双下划线表示嵌套，如 `MCP_AGENT__LLM__MODEL=gemini-2.5-pro`）。
//! 部署沿用的几个裸环境变量（GOOGLE_API_KEY、ADSERVER_URL、MADGIC_API_KEY、ALLOWED_ORIGINS、GOOGLE_CSE_*）
//! 在对应字段为空时补上。能力服务器列表单独放在 config.json 的 mcpServers 里。

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::AgentError;
use crate::tools::McpServerConfig;

pub const ENV_PREFIX: &str = "MCP_AGENT";
const BEARER_PREFIX: &str = "Authorization: Bearer ";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub ads: AdsSection,
    pub tools: ToolsSection,
    pub server: ServerSection,
    pub mcp: McpSection,
}

/// [llm] 段：OpenAI 兼容端点（默认 Gemini）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub base_url: Option<String>,
    pub model: String,
    /// 补全服务凭据；为空时读 GOOGLE_API_KEY
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    /// 单个子任务内 Agent 循环的最大轮数
    pub max_agent_iterations: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: crate::llm::GEMINI_FLASH.to_string(),
            api_key: None,
            temperature: 0.3,
            request_timeout_secs: 60,
            max_agent_iterations: crate::react::DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// [ads] 段：广告中继
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdsSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 每次中继调用的超时（秒），生效值限制在 1..=5
    pub timeout_secs: u64,
    pub content_type: String,
    pub language: String,
    pub ad_frequency: String,
    /// 其输出被当作广告负载的工具名
    pub ad_tool_name: Option<String>,
}

impl Default for AdsSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 5,
            content_type: "chat".to_string(),
            language: "en".to_string(),
            ad_frequency: "moderate".to_string(),
            ad_tool_name: Some("get_contextual_ads".to_string()),
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段：Google Custom Search
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub api_key: Option<String>,
    pub engine_id: Option<String>,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key: None,
            engine_id: None,
            timeout_secs: 15,
            max_result_chars: 8000,
        }
    }
}

/// [server] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// 允许的跨域来源；包含 "*" 时放开全部
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

/// [mcp] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct McpSection {
    /// mcpServers 描述文件
    pub servers_file: PathBuf,
    pub connect_timeout_secs: u64,
}

impl Default for McpSection {
    fn default() -> Self {
        Self {
            servers_file: PathBuf::from("config.json"),
            connect_timeout_secs: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 MCP_AGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 MCP_AGENT__*（双下划线表示嵌套键）
/// 4. 用裸环境变量补齐仍为空的字段
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_env(|key| std::env::var(key).ok());
    Ok(cfg)
}

impl AppConfig {
    /// 用部署环境变量补齐空字段；lookup 便于测试注入
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        fill(&mut self.llm.api_key, non_empty("GOOGLE_API_KEY"));
        fill(&mut self.ads.base_url, non_empty("ADSERVER_URL"));
        fill(&mut self.ads.api_key, non_empty("MADGIC_API_KEY"));
        fill(&mut self.tools.search.api_key, non_empty("GOOGLE_CSE_API_KEY"));
        fill(&mut self.tools.search.engine_id, non_empty("GOOGLE_CSE_ID"));
        if let Some(origins) = non_empty("ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
    }

    /// 补全服务凭据；缺失时启动失败
    pub fn require_api_key(&self) -> Result<&str, AgentError> {
        self.llm
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                AgentError::ConfigError(
                    "GOOGLE_API_KEY not found in environment variables. Please set it in your .env file.".to_string(),
                )
            })
    }

    /// 搜索凭据齐全时返回 (api_key, engine_id)
    pub fn search_credentials(&self) -> Option<(&str, &str)> {
        let search = &self.tools.search;
        Some((search.api_key.as_deref()?, search.engine_id.as_deref()?))
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().map_or(true, |s| s.trim().is_empty()) {
        if let Some(v) = value {
            *slot = Some(v);
        }
    }
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    transport: Option<String>,
}

/// 读取 mcpServers 描述文件。文件不存在返回空列表。
/// `Authorization: Bearer <占位符>` 形式的参数与 Authorization 头都会替换成 bearer_key。
pub fn load_mcp_servers(path: &Path, bearer_key: Option<&str>) -> Result<Vec<McpServerConfig>, AgentError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "mcp servers file not found, no remote capabilities");
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AgentError::ConfigError(format!("{}: {}", path.display(), e)))?;
    parse_mcp_servers(&raw, bearer_key)
}

pub fn parse_mcp_servers(raw: &str, bearer_key: Option<&str>) -> Result<Vec<McpServerConfig>, AgentError> {
    let file: ServersFile =
        serde_json::from_str(raw).map_err(|e| AgentError::ConfigError(format!("invalid mcp servers file: {e}")))?;
    let bearer_key = bearer_key.filter(|k| !k.is_empty());

    let mut servers = Vec::new();
    for (name, entry) in file.mcp_servers {
        let url = entry
            .url
            .or_else(|| entry.args.iter().find(|a| a.starts_with("http://") || a.starts_with("https://")).cloned());
        let Some(url) = url else {
            tracing::warn!(server = %name, transport = ?entry.transport, "mcp server has no HTTP url, skipped");
            continue;
        };

        let mut headers = entry.headers;
        for arg in entry.args.iter().filter(|a| !a.contains("://")) {
            if let Some((key, value)) = arg.split_once(':') {
                let key = key.trim();
                if !key.is_empty() && !key.contains('/') && !key.starts_with('-') {
                    headers.insert(key.to_string(), value.trim().to_string());
                }
            }
        }
        if let Some(key) = bearer_key {
            for (header, value) in headers.iter_mut() {
                let line = format!("{header}: {value}");
                if line.starts_with(BEARER_PREFIX) {
                    *value = format!("Bearer {key}");
                }
            }
        }

        servers.push(McpServerConfig { name, url, headers });
    }
    Ok(servers)
}
