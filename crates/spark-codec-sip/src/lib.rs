#![warn(missing_docs)]

//! # spark-codec-sip
//!
//! Session Initiation Protocol 文本报文的解析与生成。呼叫桥接服务的两条腿
//! 之一（`spark-sip-gateway`）在此基础上构造 `INVITE`/`ACK`/`CANCEL`/`BYE`
//! 并解析 `180`/`200`/`>=300` 响应；本 crate 本身不持有任何事务状态或套接
//! 字，只做文本 <-> 结构体的双向转换。
//!
//! ## 模块划分
//! - [`types`]：零拷贝基础类型与头部模型；
//! - [`parse`]：请求/响应起始行与核心头部解析，处理大小写无关匹配；
//! - [`fmt`]：对应的序列化能力；
//! - [`error`]：解析/格式化错误的统一枚举。

pub mod error;
pub mod fmt;
pub mod parse;
pub mod types;

pub use crate::error::{SipFormatError, SipParseError};
pub use crate::fmt::request::{render_request, write_request, RequestParts};
pub use crate::fmt::response::{write_response, write_status_line};
pub use crate::parse::{parse_request, parse_response};
pub use crate::types::{
    CSeqHeader, ContactHeader, Header, HeaderName, Method, NameAddr, RequestLine, SipMessage,
    SipScheme, SipUri, StartLine, StatusLine, ViaHeader,
};
