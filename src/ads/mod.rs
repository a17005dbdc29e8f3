//! 广告注入：中继客户端、流式会话、非流式整合

pub mod client;
pub mod integrate;
pub mod session;

pub use client::{AdRelay, AdRelayClient, ChunkReply, ChunkRequest, FinalizeRequest, DEFAULT_RELAY_TIMEOUT};
pub use integrate::integrate_ads;
pub use session::StreamingAdSession;
