//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为桥接服务提供统一的最终错误形态，使各 crate 的领域错误（如
//!   `spark-switch::SwitchError`）可以通过 `?` 自然汇聚到同一种可打印、可分类
//!   的类型上，便于日志与上层 `main` 做统一处理。
//!
//! ## 设计要求（What）
//! - 携带稳定的 `code`（`<域>.<语义>` 约定）与人类可读的 `message`；
//! - 可选携带底层原因（`source`），兼容 `std::error::Error`。

use std::fmt;

/// 桥接服务的统一错误类型。
///
/// - **契约 (What)**：`code` 建议遵循 `<crate>.<reason>` 命名，`message` 面向
///   排障人员；`source` 记录底层原因（如 `std::io::Error`）。
#[derive(Debug)]
pub struct SparkError {
    code: &'static str,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl SparkError {
    /// 构造一个不携带底层原因的错误。
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// 附加底层原因并返回新的错误值。
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// 稳定错误码，供日志与指标聚合使用。
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// 人类可读描述。
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SparkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for SparkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = SparkError::new("bridge.mncc.timeout", "no RTP_CREATE response");
        assert_eq!(
            err.to_string(),
            "[bridge.mncc.timeout] no RTP_CREATE response"
        );
    }

    #[test]
    fn source_round_trips() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = SparkError::new("bridge.io", "socket failure").with_source(io_err);
        assert!(std::error::Error::source(&err).is_some());
    }
}
