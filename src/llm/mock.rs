//! Mock LLM 客户端（离线运行与测试用，无需 API）
//!
//! 预置回复队列按调用顺序依次返回；队列耗尽后回显最后一条 User 消息。
//! 每次调用的消息都会被记录，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, Message, Role, TokenStream};

/// Mock 客户端：脚本化回复 + 调用记录
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<Message>>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定回复（Err 表示该次调用失败）
    pub fn scripted(replies: Vec<Result<String, String>>) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条成功回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply.into()));
        }
    }

    /// 已记录的全部调用（每次调用的完整消息列表）
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(messages.to_vec());
        }
        if let Some(reply) = self.script.lock().ok().and_then(|mut s| s.pop_front()) {
            return reply;
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(format!("Echo from Mock: {}", last_user))
    }

    /// 流式：把完整回复按空白切成若干片段（保留空白），模拟逐段输出
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let content = self.complete(messages).await?;
        let mut pieces = Vec::new();
        let mut current = String::new();
        for c in content.chars() {
            current.push(c);
            if c.is_whitespace() {
                pieces.push(Ok(std::mem::take(&mut current)));
            }
        }
        if !current.is_empty() {
            pieces.push(Ok(current));
        }
        Ok(Box::pin(stream::iter(pieces)))
    }
}
