//! 补全服务抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式片段）。
//! 引擎、各节点与 HTTP 层只依赖该 trait，具体实例由调用方显式传入。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;

use crate::llm::Message;

/// 流式补全返回的片段流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回片段流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 流式完成，返回片段流
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String>;
}
