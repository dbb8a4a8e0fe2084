//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为呼叫桥接核心对外暴露的错误语义提供集中定义，确保与 `spark-core::SparkError` 对齐；
//! - 归档呼叫/呼叫腿调度、适配器失败等不同类别，方便运维与观测。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error` 以兼容 `std::error::Error`；
//! - 保留细粒度枚举以支撑精确的告警与重试策略。

use spark_core::SparkError;
use thiserror::Error;

use crate::call::LegPosition;

/// 呼叫桥接核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合呼叫/呼叫腿生命周期中的异常，统一转换为 [`SparkError`]。
/// - **契约 (What)**：所有变体均实现 `Send + Sync + 'static`，可安全跨线程传播；通过
///   `From<SwitchError> for SparkError` 自动转换，`?` 运算符可直接传播到 `spark-bridge`。
/// - **执行逻辑 (How)**：每个变体携带可读上下文（呼叫 id、呼叫腿位置等）。
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum SwitchError {
    /// 访问了不存在的呼叫。
    #[error("call `{call_id}` is not registered")]
    CallNotFound { call_id: u64 },

    /// 呼叫存在但所需的呼叫腿（`initial`/`remote`）尚未建立。
    #[error("call `{call_id}` has no leg at position {position:?}")]
    LegNotFound { call_id: u64, position: LegPosition },

    /// 桥接策略要求 `remote` 腿尚未建立，但发现其已存在。
    #[error("call `{call_id}` already has a remote leg")]
    RemoteLegAlreadyPresent { call_id: u64 },

    /// 呼叫腿已经处于 `in_release`，拒绝重复下发本地释放指令。
    #[error("call `{call_id}` leg at position {position:?} is already releasing")]
    AlreadyReleasing { call_id: u64, position: LegPosition },

    /// 外部协议适配器（MNCC 套接字、SIP 用户代理）报告的失败。
    #[error("adapter failure during `{context}`: {detail}")]
    AdapterFailure { context: String, detail: String },

    /// 无法归类的内部异常，作为兜底以避免 panic。
    #[error("internal switch failure: {detail}")]
    Internal { detail: String },
}

impl From<SwitchError> for SparkError {
    /// 将呼叫桥接错误转换为统一的领域错误。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：`spark-bridge` 顶层需要统一日志/退出码，通过 `From` 使 `?` 直接生效。
    /// - **执行 (How)**：依据错误类别选择稳定错误码前缀 `switch.*`，并拼装带上下文的描述。
    fn from(value: SwitchError) -> Self {
        match value {
            SwitchError::CallNotFound { call_id } => {
                SparkError::new("switch.call.missing", format!("call `{call_id}` is not registered"))
            }
            SwitchError::LegNotFound { call_id, position } => SparkError::new(
                "switch.leg.missing",
                format!("call `{call_id}` has no leg at position {position:?}"),
            ),
            SwitchError::RemoteLegAlreadyPresent { call_id } => SparkError::new(
                "switch.leg.remote_exists",
                format!("call `{call_id}` already has a remote leg"),
            ),
            SwitchError::AlreadyReleasing { call_id, position } => SparkError::new(
                "switch.leg.already_releasing",
                format!("call `{call_id}` leg at position {position:?} is already releasing"),
            ),
            SwitchError::AdapterFailure { context, detail } => SparkError::new(
                "switch.adapter.failure",
                format!("adapter failure during `{context}`: {detail}"),
            ),
            SwitchError::Internal { detail } => {
                SparkError::new("switch.internal", format!("internal failure: {detail}"))
            }
        }
    }
}
