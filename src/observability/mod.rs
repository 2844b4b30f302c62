//! 可观测性：tracing 订阅器初始化（默认 info，RUST_LOG 覆盖）

use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

pub fn init() {
    init_with_default(LevelFilter::INFO);
}

/// 日志写到 stderr，stdout 留给最终结果
pub fn init_with_default(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
