//! # spark-core
//!
//! ## 定位与职责（Why）
//! - 作为 MNCC↔SIP 呼叫桥接服务的最底层依赖，集中提供三类跨 crate 共享的契约：
//!   稳定的错误类型、分层配置加载、以及基于 `tracing` 的可观测性初始化；
//! - 业务状态机（`spark-switch`）与两个协议适配器（`spark-mncc`、
//!   `spark-sip-gateway`）都只依赖这里定义的 `SparkError`，不重复定义各自的
//!   根错误类型。
//!
//! ## 架构嵌入（Where）
//! - `error` 暴露 [`SparkError`]，各 crate 的领域错误通过 `From` 转换汇入；
//! - `configuration` 负责把 TOML 文件与环境变量覆盖合并为 [`configuration::BridgeConfig`]；
//! - `observability` 提供一次性的 `tracing-subscriber` 初始化入口。
//!
//! ## Feature 策略（Trade-offs）
//! - 这是一个有意瘦身过的 crate：上游 `spark-core` 曾是一个完整的协议无关通信
//!   框架（Pipeline/Router/Cluster/Security/Audit 等），但呼叫桥接这个 CORE
//!   用不到绝大部分契约，继续携带它们只会让阅读者迷失在与本仓库无关的抽象里。
//!   因此这里只保留被 `spark-switch`/`spark-mncc`/`spark-sip-gateway` 实际使用
//!   的三块内容，其余部分未被移植。

pub mod configuration;
pub mod error;
pub mod observability;

pub use configuration::{BridgeConfig, ConfigError, SipConfig};
pub use error::SparkError;
