//! 基础类型定义模块。
//!
//! ## 模块目标（Why）
//! - 为解析与序列化提供统一的零拷贝数据模型，覆盖桥接器实际用到的方法与头部
//!   （`INVITE`/`ACK`/`CANCEL`/`BYE` 与 `Via`/`From`/`To`/`Call-ID`/`CSeq`/`Contact`）。
//!
//! ## 结构概览（What）
//! - [`Method`]：请求方法，覆盖标准集合并为未知 token 保留 `Extension`；
//! - [`SipUri`] / [`NameAddr`]：URI 与带显示名的地址段；
//! - [`RequestLine`] / [`StatusLine`]：起始行；
//! - [`Header`]：核心头部的统一表示，未识别的头部原样保存在 `Extension` 中；
//! - [`SipMessage`]：组合起始行、头部与 body 的零拷贝报文结构。

use std::fmt;

/// SIP 方法枚举，保留常见标准方法并支持自定义扩展。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method<'a> {
    /// `INVITE`。
    Invite,
    /// `ACK`。
    Ack,
    /// `BYE`。
    Bye,
    /// `CANCEL`。
    Cancel,
    /// `OPTIONS`。
    Options,
    /// `REGISTER`。
    Register,
    /// 未被标准枚举覆盖的其它方法，使用原始 token。
    Extension(&'a str),
}

impl<'a> Method<'a> {
    /// 根据输入 token 构造方法枚举。
    pub fn from_token(token: &'a str) -> Self {
        match token {
            "INVITE" => Self::Invite,
            "ACK" => Self::Ack,
            "BYE" => Self::Bye,
            "CANCEL" => Self::Cancel,
            "OPTIONS" => Self::Options,
            "REGISTER" => Self::Register,
            other => Self::Extension(other),
        }
    }

    /// 将方法枚举转换回文本表示。
    pub fn as_str(self) -> &'a str {
        match self {
            Self::Invite => "INVITE",
            Self::Ack => "ACK",
            Self::Bye => "BYE",
            Self::Cancel => "CANCEL",
            Self::Options => "OPTIONS",
            Self::Register => "REGISTER",
            Self::Extension(token) => token,
        }
    }
}

/// SIP URI scheme。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipScheme {
    /// 非加密 `sip:`。
    Sip,
    /// 加密 `sips:`。
    Sips,
}

impl fmt::Display for SipScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sip => f.write_str("sip"),
            Self::Sips => f.write_str("sips"),
        }
    }
}

/// SIP URI，根据 RFC 3261 §19 解析后的零拷贝结构。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SipUri<'a> {
    /// scheme 信息。
    pub scheme: SipScheme,
    /// `userinfo`（可包含用户名），若缺失则为 `None`。
    pub userinfo: Option<&'a str>,
    /// 主机或 IP 字面量。
    pub host: &'a str,
    /// 端口号，可选。
    pub port: Option<u16>,
    /// URI 参数（含分号前缀），原文保留。
    pub params: Option<&'a str>,
}

/// 带显示名的地址（适用于 From/To/Contact）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameAddr<'a> {
    /// 可选显示名。
    pub display_name: Option<&'a str>,
    /// 地址部分的 URI。
    pub uri: SipUri<'a>,
    /// 附加参数（例如 `;tag=`），原文切片，不含前导分号。
    pub params: Option<&'a str>,
}

/// 请求起始行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    /// 请求方法。
    pub method: Method<'a>,
    /// 请求目标 URI 原文（保留未解析形式，便于透传 `;transport=` 等参数）。
    pub uri: &'a str,
    /// 协议版本文本（固定为 `SIP/2.0`）。
    pub version: &'a str,
}

/// 响应起始行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine<'a> {
    /// 协议版本。
    pub version: &'a str,
    /// 三位状态码。
    pub status_code: u16,
    /// 原因短语。
    pub reason: &'a str,
}

/// `Via` 头的核心字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViaHeader<'a> {
    /// `SIP/2.0/UDP` 等 sent-protocol 字段。
    pub sent_protocol: &'a str,
    /// `sent-by` 主机。
    pub host: &'a str,
    /// 可选端口。
    pub port: Option<u16>,
    /// `branch` 参数。
    pub branch: Option<&'a str>,
}

/// `CSeq` 头。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CSeqHeader<'a> {
    /// 序列号。
    pub sequence: u32,
    /// 方法。
    pub method: Method<'a>,
}

/// `Contact` 头。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactHeader<'a> {
    /// 地址信息。
    pub address: NameAddr<'a>,
}

/// Header 名称，供未识别扩展头原样保存。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderName<'a> {
    /// 报文中出现的原始大小写形式。
    pub raw: &'a str,
}

/// Header 枚举，覆盖桥接器需要读写的核心头部。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header<'a> {
    /// `Via`。
    Via(ViaHeader<'a>),
    /// `From`。
    From(NameAddr<'a>),
    /// `To`。
    To(NameAddr<'a>),
    /// `Call-ID`。
    CallId(&'a str),
    /// `CSeq`。
    CSeq(CSeqHeader<'a>),
    /// `Max-Forwards`。
    MaxForwards(u32),
    /// `Contact`。
    Contact(ContactHeader<'a>),
    /// 未解析的扩展头，保留原名与原值（包括 `Content-Type`/`Content-Length`）。
    Extension {
        /// 扩展头名称。
        name: HeaderName<'a>,
        /// 扩展头值。
        value: &'a str,
    },
}

/// 起始行的联合表示。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartLine<'a> {
    /// 请求。
    Request(RequestLine<'a>),
    /// 响应。
    Response(StatusLine<'a>),
}

/// SIP 报文的统一表示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage<'a> {
    /// 起始行。
    pub start_line: StartLine<'a>,
    /// 解析出的头部集合，按出现顺序排列。
    pub headers: Vec<Header<'a>>,
    /// 报文主体，原始字节切片。
    pub body: &'a [u8],
}

impl<'a> SipMessage<'a> {
    /// 查找第一个匹配的 `Via` 头。
    pub fn via(&self) -> Option<&ViaHeader<'a>> {
        self.headers.iter().find_map(|h| match h {
            Header::Via(v) => Some(v),
            _ => None,
        })
    }

    /// 查找 `Call-ID` 值。
    pub fn call_id(&self) -> Option<&'a str> {
        self.headers.iter().find_map(|h| match h {
            Header::CallId(v) => Some(*v),
            _ => None,
        })
    }

    /// 查找 `CSeq` 头。
    pub fn cseq(&self) -> Option<CSeqHeader<'a>> {
        self.headers.iter().find_map(|h| match h {
            Header::CSeq(v) => Some(*v),
            _ => None,
        })
    }

    /// 按原始名称（大小写不敏感）查找扩展头的值。
    pub fn extension(&self, name: &str) -> Option<&'a str> {
        self.headers.iter().find_map(|h| match h {
            Header::Extension { name: n, value } if n.raw.eq_ignore_ascii_case(name) => {
                Some(*value)
            }
            _ => None,
        })
    }
}
