//! 流式广告会话
//!
//! 按发出顺序把生成的文本块逐个交给中继，维护 sequence（从 1 开始）、累计长度与块数。
//! 没有 session_id（打开失败、未配置、某次调用失败后关闭）时所有操作都是原样直通。
//! finalize 只真正执行一次；未 finalize 就被丢弃时在后台补发。

use std::sync::Arc;

use crate::ads::{AdRelay, ChunkRequest, FinalizeRequest};

pub struct StreamingAdSession {
    relay: Arc<dyn AdRelay>,
    session_id: Option<String>,
    sequence: u64,
    total_length: usize,
    total_chunks: u64,
    word_count: usize,
    in_word: bool,
    finalized: Option<bool>,
}

impl StreamingAdSession {
    pub fn new(relay: Arc<dyn AdRelay>) -> Self {
        Self {
            relay,
            session_id: None,
            sequence: 1,
            total_length: 0,
            total_chunks: 0,
            word_count: 0,
            in_word: false,
            finalized: None,
        }
    }

    /// 打开会话；失败不上抛，只是进入直通模式
    pub async fn initialize(&mut self) -> bool {
        match self.relay.open_stream().await {
            Ok(id) => {
                tracing::debug!(stream_id = %id, "ad stream opened");
                self.session_id = Some(id);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "ad stream unavailable, passing content through");
                self.session_id = None;
                false
            }
        }
    }

    /// 处理一个文本块，返回中继处理后的内容（缺省为原文）
    pub async fn process_chunk(&mut self, content: &str) -> String {
        let Some(stream_id) = self.session_id.clone() else {
            return content.to_string();
        };
        self.total_length += content.chars().count();
        self.total_chunks += 1;
        self.count_words(content);

        let request = ChunkRequest {
            content: content.to_string(),
            sequence: self.sequence,
            total_length_so_far: self.total_length,
        };
        let reply = self.relay.process_chunk(&stream_id, &request).await;
        self.sequence += 1;

        match reply {
            Ok(reply) => {
                if !reply.ads_added.is_empty() {
                    tracing::debug!(stream_id = %stream_id, sequence = request.sequence, ads = reply.ads_added.len(), "ads injected");
                }
                reply.processed_content.unwrap_or(request.content)
            }
            Err(e) => {
                // 中继出错后本会话视为关闭，后续块与 finalize 都直通
                tracing::warn!(stream_id = %stream_id, sequence = request.sequence, error = %e, "ad relay chunk failed, closing session");
                self.session_id = None;
                request.content
            }
        }
    }

    /// 上报块数与词数并关闭会话；重复调用返回第一次的结果
    pub async fn finalize(&mut self) -> bool {
        if let Some(done) = self.finalized {
            return done;
        }
        let ok = match self.session_id.as_deref() {
            None => true,
            Some(stream_id) => match self.relay.finalize_stream(stream_id, &self.summary()).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(stream_id = %stream_id, error = %e, "ad stream finalize failed");
                    false
                }
            },
        };
        self.finalized = Some(ok);
        ok
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn total_length(&self) -> usize {
        self.total_length
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    fn summary(&self) -> FinalizeRequest {
        FinalizeRequest {
            total_chunks: self.total_chunks,
            final_word_count: self.word_count,
        }
    }

    /// 跨块边界的词数统计：只在空白到非空白的跳变处计数
    fn count_words(&mut self, content: &str) {
        for c in content.chars() {
            if c.is_whitespace() {
                self.in_word = false;
            } else if !self.in_word {
                self.in_word = true;
                self.word_count += 1;
            }
        }
    }
}

impl Drop for StreamingAdSession {
    fn drop(&mut self) {
        if self.finalized.is_some() {
            return;
        }
        let Some(stream_id) = self.session_id.take() else {
            return;
        };
        tracing::warn!(stream_id = %stream_id, "ad session dropped without finalize, finalizing in background");
        let relay = Arc::clone(&self.relay);
        let summary = self.summary();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = relay.finalize_stream(&stream_id, &summary).await {
                        tracing::warn!(stream_id = %stream_id, error = %e, "background finalize failed");
                    }
                });
            }
            Err(_) => tracing::error!(stream_id = %stream_id, "no runtime to finalize ad session"),
        }
    }
}
