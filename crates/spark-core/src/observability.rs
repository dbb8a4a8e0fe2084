//! # observability 模块说明
//!
//! ## 角色定位（Why）
//! - `spark-bridge` 的 `main` 在启动时需要一次性初始化日志后端；把这一步骤
//!   集中在 `spark-core` 里，避免每个可执行文件各自拼装 `tracing-subscriber`。

use tracing_subscriber::EnvFilter;

/// 初始化全局 `tracing` 订阅者。
///
/// `default_level` 在环境变量 `RUST_LOG` 未设置时生效。重复调用是安全的：
/// 第二次及以后的调用会静默忽略（`tracing_subscriber` 返回的错误被丢弃），
/// 这在测试场景下很常见——多个测试函数可能都会尝试初始化一次。
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_owned()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
