//! MCP 能力：通过 JSON-RPC over HTTP 连接远端 MCP 服务器
//!
//! 连接时发送 initialize + notifications/initialized，记录服务端下发的 mcp-session-id；
//! tools/list 得到的每个工具包装为 McpTool（实现 Tool），调用走 tools/call；
//! 释放时对带 session 的连接发送 DELETE。响应既可能是 JSON 也可能是单事件 SSE。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::AgentError;
use crate::tools::Tool;

const SESSION_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION: &str = "2025-03-26";

/// 单个 MCP 服务器的连接参数
#[derive(Debug, Clone, Default)]
pub struct McpServerConfig {
    pub name: String,
    pub url: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolInfo {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentItem>,
    #[serde(default)]
    is_error: bool,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// 到一个 MCP 服务器的连接，整个运行期间由该服务器的所有 McpTool 共享
pub struct McpConnection {
    name: String,
    url: String,
    http: reqwest::Client,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl McpConnection {
    /// 建立连接并完成 initialize 握手
    pub async fn connect(config: &McpServerConfig, timeout_secs: u64) -> Result<Arc<Self>, AgentError> {
        let mut headers = HeaderMap::new();
        for (k, v) in &config.headers {
            let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| mcp_error(&config.name, e))?;
            let value = HeaderValue::from_str(v).map_err(|e| mcp_error(&config.name, e))?;
            headers.insert(name, value);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| mcp_error(&config.name, e))?;

        let conn = Arc::new(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            http,
            headers,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        });

        conn.request(
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION")
                }
            })),
        )
        .await?;
        conn.notify("notifications/initialized").await?;
        tracing::info!(server = %conn.name, "mcp server connected");
        Ok(conn)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// tools/list，并把每个工具包装为 McpTool
    pub async fn list_tools(self: &Arc<Self>) -> Result<Vec<McpTool>, AgentError> {
        let result = self.request("tools/list", Some(json!({}))).await?;
        let list: ToolsListResult =
            serde_json::from_value(result).map_err(|e| mcp_error(&self.name, format!("invalid tools/list: {e}")))?;
        Ok(list
            .tools
            .into_iter()
            .map(|t| McpTool {
                conn: Arc::clone(self),
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            })
            .collect())
    }

    /// tools/call：拼接所有 text 内容；isError 时返回 Err
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, String> {
        let arguments = if arguments.is_object() { arguments } else { json!({}) };
        let result = self
            .request("tools/call", Some(json!({ "name": tool, "arguments": arguments })))
            .await
            .map_err(|e| e.to_string())?;
        let parsed: CallToolResult =
            serde_json::from_value(result).map_err(|e| format!("invalid tools/call result: {e}"))?;
        let text = parsed
            .content
            .iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        if parsed.is_error {
            Err(text)
        } else {
            Ok(text)
        }
    }

    /// 释放服务端 session；失败只记日志
    pub async fn close(&self) {
        let session = self.session_id.lock().ok().and_then(|s| s.clone());
        let Some(session) = session else {
            return;
        };
        let res = self
            .http
            .delete(&self.url)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .send()
            .await;
        if let Err(e) = res {
            tracing::debug!(server = %self.name, error = %e, "mcp session close failed");
        }
    }

    fn post(&self, body: &JsonRpcRequest<'_>) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.session_id.lock().ok().and_then(|s| s.clone()) {
            req = req.header(SESSION_HEADER, session);
        }
        req
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        };
        let response = self
            .post(&body)
            .send()
            .await
            .map_err(|e| mcp_error(&self.name, format!("{method} request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(mcp_error(&self.name, format!("{method}: HTTP {}", response.status())));
        }
        if let Some(session) = response.headers().get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(session.to_string());
            }
        }
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let text = response
            .text()
            .await
            .map_err(|e| mcp_error(&self.name, format!("{method} read body: {e}")))?;

        let rpc = parse_rpc_body(&text, is_sse).map_err(|e| mcp_error(&self.name, format!("{method}: {e}")))?;
        if let Some(err) = rpc.error {
            return Err(mcp_error(&self.name, format!("{method}: {}", err.message)));
        }
        rpc.result
            .ok_or_else(|| mcp_error(&self.name, format!("{method}: no result in response")))
    }

    async fn notify(&self, method: &str) -> Result<(), AgentError> {
        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id: None,
            method,
            params: None,
        };
        self.post(&body)
            .send()
            .await
            .map_err(|e| mcp_error(&self.name, format!("{method} failed: {e}")))?;
        Ok(())
    }
}

fn mcp_error(server: &str, e: impl std::fmt::Display) -> AgentError {
    AgentError::McpError {
        server: server.to_string(),
        message: e.to_string(),
    }
}

/// 解析 JSON-RPC 响应体；SSE 时取最后一个能解析为响应的 data 行
fn parse_rpc_body(body: &str, is_sse: bool) -> Result<JsonRpcResponse, String> {
    if !is_sse {
        return serde_json::from_str(body).map_err(|e| format!("invalid JSON-RPC body: {e}"));
    }
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .filter_map(|data| serde_json::from_str::<JsonRpcResponse>(data.trim()).ok())
        .filter(|r| r.result.is_some() || r.error.is_some())
        .last()
        .ok_or_else(|| "no JSON-RPC response in event stream".to_string())
}

/// 远端 MCP 工具
pub struct McpTool {
    conn: Arc<McpConnection>,
    name: String,
    description: String,
    input_schema: Option<Value>,
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.input_schema
            .clone()
            .unwrap_or_else(|| json!({"type": "object", "properties": {}, "required": []}))
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        tracing::info!(server = %self.conn.name(), tool = %self.name, "mcp tool invoke");
        self.conn.call_tool(&self.name, args).await
    }
}
