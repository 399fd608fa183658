//! 日志初始化：EnvFilter（默认 info，可用 RUST_LOG 覆盖）+ fmt 输出
//!
//! 只由二进制入口调用，库代码不安装 subscriber。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化（如测试中）时忽略
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init();
}
