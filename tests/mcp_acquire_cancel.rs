//! MCP 能力获取中途失败或被取消时，已打开的 session 都会被 DELETE 关闭

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mcp_agent::tools::{CapabilityProvider, McpCapabilityProvider, McpServerConfig};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 假服务器对 tools/list 的反应
#[derive(Clone, Copy)]
enum ListBehavior {
    Hang,
    Fail,
}

/// 读取一个 HTTP 请求，返回 (请求行, body)；连接关闭时返回 None
async fn read_request(socket: &mut TcpStream, buf: &mut Vec<u8>) -> Option<(String, Vec<u8>)> {
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = buf[header_end..header_end + content_length].to_vec();
    buf.drain(..header_end + content_length);
    let request_line = head.lines().next().unwrap_or_default().to_string();
    Some((request_line, body))
}

async fn serve(mut socket: TcpStream, behavior: ListBehavior, deletes: Arc<AtomicUsize>) {
    let mut buf = Vec::new();
    while let Some((request_line, body)) = read_request(&mut socket, &mut buf).await {
        if request_line.starts_with("DELETE") {
            deletes.fetch_add(1, Ordering::SeqCst);
            let _ = socket.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n").await;
            continue;
        }
        let rpc: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        let response = match rpc["method"].as_str().unwrap_or_default() {
            "initialize" => {
                let payload = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": rpc["id"],
                    "result": {"protocolVersion": "2025-03-26", "capabilities": {}, "serverInfo": {"name": "fake", "version": "0"}}
                })
                .to_string();
                format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nmcp-session-id: s-1\r\ncontent-length: {}\r\n\r\n{}",
                    payload.len(),
                    payload
                )
            }
            "tools/list" => match behavior {
                ListBehavior::Hang => {
                    std::future::pending::<()>().await;
                    return;
                }
                ListBehavior::Fail => "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n".to_string(),
            },
            _ => "HTTP/1.1 202 Accepted\r\ncontent-length: 0\r\n\r\n".to_string(),
        };
        if socket.write_all(response.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// 启动假 MCP 服务器；返回服务器配置与收到的 DELETE 次数
async fn fake_server(behavior: ListBehavior) -> (McpServerConfig, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let deletes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deletes);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket, behavior, Arc::clone(&counter)));
        }
    });
    let config = McpServerConfig {
        name: "fake-mcp".into(),
        url: format!("http://{addr}/mcp"),
        headers: Default::default(),
    };
    (config, deletes)
}

async fn wait_for(counter: &AtomicUsize, expected: usize) -> usize {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    counter.load(Ordering::SeqCst)
}

#[tokio::test]
async fn test_failed_discovery_closes_opened_session() {
    let (server, deletes) = fake_server(ListBehavior::Fail).await;
    let err = McpCapabilityProvider::new(vec![server], 5).acquire().await.err().unwrap();
    assert!(err.to_string().contains("fake-mcp"));
    assert_eq!(wait_for(&deletes, 1).await, 1);
}

#[tokio::test]
async fn test_cancelled_acquire_closes_opened_session() {
    let (server, deletes) = fake_server(ListBehavior::Hang).await;
    let provider = McpCapabilityProvider::new(vec![server], 5);

    let attempt = tokio::time::timeout(Duration::from_millis(300), provider.acquire()).await;
    assert!(attempt.is_err(), "acquire should still be waiting on tools/list");
    assert_eq!(wait_for(&deletes, 1).await, 1);
}
