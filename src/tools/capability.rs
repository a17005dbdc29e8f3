//! 能力集的获取与释放
//!
//! 每次运行开始前由 CapabilityProvider 获取一份 CapabilitySet（工具执行器 + 打开的 MCP 连接），
//! 运行结束、失败或消费者断开时调用 release 关闭连接。能力集只属于一次运行，不跨运行共享。
//! acquire 本身被取消时，已打开的连接同样会被关闭。

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{AgentError, ToolDescriptor};
use crate::tools::{GoogleSearchTool, McpConnection, McpServerConfig, Tool, ToolExecutor, ToolRegistry};

/// 能力来源：每次运行调用一次 acquire
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn acquire(&self) -> Result<CapabilitySet, AgentError>;
}

/// 释放完成后调用的回调
type ReleaseHook = Box<dyn FnOnce() + Send>;

/// 一次运行持有的能力集
pub struct CapabilitySet {
    executor: Arc<ToolExecutor>,
    connections: Vec<Arc<McpConnection>>,
    on_release: Option<ReleaseHook>,
}

impl CapabilitySet {
    pub fn new(executor: ToolExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            connections: Vec::new(),
            on_release: None,
        }
    }

    /// 没有任何工具的能力集（Executor 走直接补全分支）
    pub fn empty() -> Self {
        Self::new(ToolExecutor::new(ToolRegistry::new(), 30))
    }

    pub fn with_connections(mut self, connections: Vec<Arc<McpConnection>>) -> Self {
        self.connections = connections;
        self
    }

    /// 注册释放回调：连接全部关闭后调用一次
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn executor(&self) -> Arc<ToolExecutor> {
        Arc::clone(&self.executor)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.executor.descriptors()
    }

    pub fn is_empty(&self) -> bool {
        self.executor.is_empty()
    }

    /// 关闭本次运行打开的所有远端连接
    pub async fn release(self) {
        for conn in &self.connections {
            conn.close().await;
        }
        tracing::debug!(connections = self.connections.len(), "capability set released");
        if let Some(hook) = self.on_release {
            hook();
        }
    }
}

/// 固定工具列表（CLI 离线模式与测试）
pub struct StaticCapabilities {
    tools: Vec<Arc<dyn Tool>>,
    timeout_secs: u64,
}

impl StaticCapabilities {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            tools: Vec::new(),
            timeout_secs,
        }
    }

    /// 不提供任何工具
    pub fn none() -> Self {
        Self::new(30)
    }

    pub fn with_tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }
}

#[async_trait]
impl CapabilityProvider for StaticCapabilities {
    async fn acquire(&self) -> Result<CapabilitySet, AgentError> {
        let mut registry = ToolRegistry::new();
        for tool in &self.tools {
            registry.register_arc(Arc::clone(tool));
        }
        Ok(CapabilitySet::new(ToolExecutor::new(registry, self.timeout_secs)))
    }
}

/// 从配置的 MCP 服务器发现工具，并附加直接绑定的 google_search
pub struct McpCapabilityProvider {
    servers: Vec<McpServerConfig>,
    search: Option<Arc<GoogleSearchTool>>,
    tool_timeout_secs: u64,
    connect_timeout_secs: u64,
}

impl McpCapabilityProvider {
    pub fn new(servers: Vec<McpServerConfig>, tool_timeout_secs: u64) -> Self {
        Self {
            servers,
            search: None,
            tool_timeout_secs,
            connect_timeout_secs: tool_timeout_secs,
        }
    }

    pub fn with_search(mut self, search: GoogleSearchTool) -> Self {
        self.search = Some(Arc::new(search));
        self
    }

    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

/// acquire 过程中已打开的连接；未交出前被 drop（获取被取消）时在后台关闭
struct PendingConnections(Vec<Arc<McpConnection>>);

impl PendingConnections {
    async fn close_all(&mut self) {
        for conn in &self.0 {
            conn.close().await;
        }
        self.0.clear();
    }

    fn into_inner(mut self) -> Vec<Arc<McpConnection>> {
        std::mem::take(&mut self.0)
    }
}

impl Drop for PendingConnections {
    fn drop(&mut self) {
        if self.0.is_empty() {
            return;
        }
        let connections = std::mem::take(&mut self.0);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(connections = connections.len(), "acquire cancelled, closing opened connections");
                handle.spawn(async move {
                    for conn in connections {
                        conn.close().await;
                    }
                });
            }
            Err(_) => tracing::warn!("acquire cancelled outside a runtime, connections not closed"),
        }
    }
}

#[async_trait]
impl CapabilityProvider for McpCapabilityProvider {
    async fn acquire(&self) -> Result<CapabilitySet, AgentError> {
        let mut registry = ToolRegistry::new();
        let mut pending = PendingConnections(Vec::with_capacity(self.servers.len()));

        for server in &self.servers {
            let discovered = match McpConnection::connect(server, self.connect_timeout_secs).await {
                Ok(conn) => {
                    pending.0.push(Arc::clone(&conn));
                    conn.list_tools().await
                }
                Err(e) => Err(e),
            };
            match discovered {
                Ok(tools) => {
                    tracing::info!(server = %server.name, tools = tools.len(), "mcp tools discovered");
                    for tool in tools {
                        registry.register(tool);
                    }
                }
                Err(e) => {
                    // 已打开的连接要先关掉，再把失败交给引擎
                    pending.close_all().await;
                    return Err(e);
                }
            }
        }

        if let Some(search) = &self.search {
            registry.register_arc(Arc::clone(search) as Arc<dyn Tool>);
        }

        Ok(CapabilitySet::new(ToolExecutor::new(registry, self.tool_timeout_secs)).with_connections(pending.into_inner()))
    }
}
