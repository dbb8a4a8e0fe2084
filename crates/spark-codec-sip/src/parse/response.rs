//! 响应解析逻辑：起始状态行与核心头部。

use crate::{
    error::SipParseError,
    types::{SipMessage, StartLine, StatusLine},
};

use super::common::{split_first_line, split_headers_body};
use super::headers::parse_headers;

/// 解析 SIP 响应文本（provisional 180、final 200、错误 >=300 均走这一入口）。
pub fn parse_response<'a>(input: &'a str) -> Result<SipMessage<'a>, SipParseError> {
    let (line, rest) = split_first_line(input)?;
    let status_line = parse_status_line(line)?;
    let (header_block, body_block) = split_headers_body(rest)?;
    let headers = parse_headers(header_block)?;
    Ok(SipMessage {
        start_line: StartLine::Response(status_line),
        headers,
        body: body_block.as_bytes(),
    })
}

fn parse_status_line<'a>(line: &'a str) -> Result<StatusLine<'a>, SipParseError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().ok_or(SipParseError::InvalidStatusLine)?;
    let code_text = parts.next().ok_or(SipParseError::InvalidStatusLine)?;
    let reason = parts.next().unwrap_or("");

    if !version.eq_ignore_ascii_case("SIP/2.0") {
        return Err(SipParseError::UnsupportedVersion);
    }
    let status_code = code_text
        .parse::<u16>()
        .map_err(|_| SipParseError::InvalidStatusCode)?;

    Ok(StatusLine {
        version,
        status_code,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_200_ok_with_body() {
        let resp = "SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bK-1\r\n\
To: <sip:101@10.0.0.1:5060>;tag=xyz\r\n\
From: <sip:200@10.0.0.2:5060>;tag=abc\r\n\
Call-ID: a84b4c76e66710\r\n\
CSeq: 1 INVITE\r\n\
Contact: <sip:101@10.0.0.1:5060>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\r\n\
body";

        let message = parse_response(resp).expect("200 OK should parse");
        match message.start_line {
            StartLine::Response(line) => assert_eq!(line.status_code, 200),
            other => panic!("expected response, got {other:?}"),
        }
        assert_eq!(message.body, b"body");
        assert_eq!(message.cseq().unwrap().sequence, 1);
    }

    #[test]
    fn parses_error_status_without_reason() {
        let resp = "SIP/2.0 486 Busy Here\r\nCall-ID: x\r\nCSeq: 1 INVITE\r\n\r\n";
        let message = parse_response(resp).unwrap();
        match message.start_line {
            StartLine::Response(line) => {
                assert_eq!(line.status_code, 486);
                assert_eq!(line.reason, "Busy Here");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }
}
