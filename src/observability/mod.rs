//! 可观测性：tracing 订阅器初始化
//!
//! 默认级别 info，RUST_LOG 可覆盖（如 `RUST_LOG=mcp_agent=debug`）。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 测试或多次调用时已存在全局订阅器，忽略即可
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
