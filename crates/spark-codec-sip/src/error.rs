//! 解析与格式化错误类型。

use std::fmt;

/// SIP 报文解析错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SipParseError {
    /// 输入在找到期望的分隔符之前耗尽。
    #[error("unexpected end of input")]
    UnexpectedEof,
    /// 起始行不是合法的请求行。
    #[error("malformed request line")]
    InvalidRequestLine,
    /// 起始行不是合法的状态行。
    #[error("malformed status line")]
    InvalidStatusLine,
    /// 版本字段不是 `SIP/2.0`。
    #[error("unsupported SIP version")]
    UnsupportedVersion,
    /// 状态码不是三位数字。
    #[error("malformed status code")]
    InvalidStatusCode,
    /// 头部字段值不是合法 UTF-8 或格式错误。
    #[error("invalid header value")]
    InvalidHeaderValue,
    /// URI 缺少必要的 scheme。
    #[error("malformed SIP URI")]
    InvalidUri,
}

/// SIP 报文序列化错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SipFormatError {
    /// 写入底层缓冲区失败。
    #[error("formatter write failure")]
    Write,
    /// body 不是合法 UTF-8。
    #[error("body is not valid UTF-8")]
    NonUtf8Body,
}

impl From<fmt::Error> for SipFormatError {
    fn from(_: fmt::Error) -> Self {
        Self::Write
    }
}
