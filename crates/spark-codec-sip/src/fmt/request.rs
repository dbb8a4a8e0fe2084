//! 出站请求渲染：`INVITE`/`ACK`/`CANCEL`/`BYE`。
//!
//! 这个 crate 不维护事务状态（那是 `spark-sip-gateway` 的职责），只负责把
//! 调用方已经决定好的起始行、头部字段与可选 body 拼装成合法的 SIP 报文。

use std::fmt;

use crate::{
    error::SipFormatError,
    fmt::headers::{write_header, write_uri},
    types::{CSeqHeader, ContactHeader, Header, Method, NameAddr, SipUri},
};

/// 渲染一个请求所需的最小字段集合。
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    /// 方法。
    pub method: Method<'a>,
    /// 请求目标 URI。
    pub request_uri: SipUri<'a>,
    /// `Via` 的 sent-by 主机（通常是本地 SIP 网关地址）。
    pub via_host: &'a str,
    /// `Via` 的 sent-by 端口。
    pub via_port: u16,
    /// `Via` 的 `branch` 参数，必须以 `z9hG4bK` 开头才符合 RFC 3261 的 magic cookie。
    pub branch: &'a str,
    /// `From` 地址，`params` 应携带 `tag=`。
    pub from: NameAddr<'a>,
    /// `To` 地址；INVITE 出站时通常没有 `tag`，ACK/BYE/CANCEL 需要携带对端分配的 `tag`。
    pub to: NameAddr<'a>,
    /// `Call-ID`。
    pub call_id: &'a str,
    /// `CSeq` 序号。
    pub cseq: u32,
    /// 可选 `Contact`（仅 INVITE 需要，供对端构造后续请求的目标）。
    pub contact: Option<NameAddr<'a>>,
    /// 可选 body 的 MIME 类型（例如 `application/sdp`）。
    pub content_type: Option<&'a str>,
}

/// 渲染完整请求文本。`body` 为空切片时不会输出 `Content-Type`。
pub fn write_request<W: fmt::Write>(
    writer: &mut W,
    parts: &RequestParts<'_>,
    body: &str,
) -> Result<(), SipFormatError> {
    write!(writer, "{} ", parts.method.as_str())?;
    write_uri(writer, &parts.request_uri)?;
    writer.write_str(" SIP/2.0\r\n")?;

    write_header(
        writer,
        &Header::Via(crate::types::ViaHeader {
            sent_protocol: "SIP/2.0/UDP",
            host: parts.via_host,
            port: Some(parts.via_port),
            branch: Some(parts.branch),
        }),
    )?;
    writer.write_str("\r\n")?;

    write_header(writer, &Header::MaxForwards(70))?;
    writer.write_str("\r\n")?;

    write_header(writer, &Header::From(parts.from))?;
    writer.write_str("\r\n")?;

    write_header(writer, &Header::To(parts.to))?;
    writer.write_str("\r\n")?;

    write_header(writer, &Header::CallId(parts.call_id))?;
    writer.write_str("\r\n")?;

    write_header(
        writer,
        &Header::CSeq(CSeqHeader {
            sequence: parts.cseq,
            method: parts.method,
        }),
    )?;
    writer.write_str("\r\n")?;

    if let Some(contact) = parts.contact {
        write_header(writer, &Header::Contact(ContactHeader { address: contact }))?;
        writer.write_str("\r\n")?;
    }

    if !body.is_empty() {
        if let Some(content_type) = parts.content_type {
            write!(writer, "Content-Type: {content_type}\r\n")?;
        }
        write!(writer, "Content-Length: {}\r\n", body.len())?;
        writer.write_str("\r\n")?;
        writer.write_str(body)?;
    } else {
        writer.write_str("Content-Length: 0\r\n")?;
        writer.write_str("\r\n")?;
    }

    Ok(())
}

/// 便捷封装：渲染到新分配的 `String`。
pub fn render_request(parts: &RequestParts<'_>, body: &str) -> Result<String, SipFormatError> {
    let mut out = String::new();
    write_request(&mut out, parts, body)?;
    Ok(out)
}
