//! 请求解析逻辑。
//!
//! 将 RFC 3261 §7.1 描述的请求行与后续头部解析为零拷贝结构，供 SIP 适配器
//! 读取入站的 `ACK`/`BYE`/`CANCEL` 以及测试场景中回放的报文。

use crate::{
    error::SipParseError,
    types::{Method, RequestLine, SipMessage, StartLine},
};

use super::common::{split_first_line, split_headers_body};
use super::headers::parse_headers;

/// 解析 SIP 请求文本。
pub fn parse_request<'a>(input: &'a str) -> Result<SipMessage<'a>, SipParseError> {
    let (line, rest) = split_first_line(input)?;
    let request_line = parse_request_line(line)?;
    let (header_block, body_block) = split_headers_body(rest)?;
    let headers = parse_headers(header_block)?;
    Ok(SipMessage {
        start_line: StartLine::Request(request_line),
        headers,
        body: body_block.as_bytes(),
    })
}

fn parse_request_line<'a>(line: &'a str) -> Result<RequestLine<'a>, SipParseError> {
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or(SipParseError::InvalidRequestLine)?;
    let uri = parts.next().ok_or(SipParseError::InvalidRequestLine)?;
    let version = parts.next().ok_or(SipParseError::InvalidRequestLine)?;

    if !version.eq_ignore_ascii_case("SIP/2.0") {
        return Err(SipParseError::UnsupportedVersion);
    }
    if parts.next().is_some() {
        return Err(SipParseError::InvalidRequestLine);
    }

    Ok(RequestLine {
        method: Method::from_token(method),
        uri,
        version,
    })
}
