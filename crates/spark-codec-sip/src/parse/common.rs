//! 解析过程中共享的小工具：行折叠、URI 解析。

use crate::{
    error::SipParseError,
    types::{SipScheme, SipUri},
};

/// 切出首行，返回 `(首行, 其余文本)`，首行不含结尾的 CRLF。
pub(crate) fn split_first_line(input: &str) -> Result<(&str, &str), SipParseError> {
    let idx = input.find("\r\n").ok_or(SipParseError::UnexpectedEof)?;
    Ok((&input[..idx], &input[idx + 2..]))
}

/// 以 `\r\n\r\n` 切分 header 区块与 body，body 为空串时仍然合法。
pub(crate) fn split_headers_body(input: &str) -> Result<(&str, &str), SipParseError> {
    match input.find("\r\n\r\n") {
        Some(idx) => Ok((&input[..idx + 2], &input[idx + 4..])),
        None => {
            // 允许报文恰好以单个空行结束、body 为空的情况。
            if input == "\r\n" {
                Ok(("", ""))
            } else {
                Err(SipParseError::UnexpectedEof)
            }
        }
    }
}

/// 解析形如 `sip:user@host:port;params` 的 URI，`;params` 原样保留。
pub(crate) fn parse_sip_uri(text: &str) -> Result<SipUri<'_>, SipParseError> {
    let text = text.trim();
    let (scheme, rest) = if let Some(rest) = text.strip_prefix("sips:") {
        (SipScheme::Sips, rest)
    } else if let Some(rest) = text.strip_prefix("sip:") {
        (SipScheme::Sip, rest)
    } else {
        return Err(SipParseError::InvalidUri);
    };

    let (authority, params) = match rest.find(';') {
        Some(idx) => (&rest[..idx], Some(&rest[idx..])),
        None => (rest, None),
    };

    let (userinfo, hostport) = match authority.rfind('@') {
        Some(idx) => (Some(&authority[..idx]), &authority[idx + 1..]),
        None => (None, authority),
    };

    let (host, port) = match hostport.rfind(':') {
        Some(idx) if hostport[idx + 1..].bytes().all(|b| b.is_ascii_digit()) => {
            let port = hostport[idx + 1..]
                .parse::<u16>()
                .map_err(|_| SipParseError::InvalidUri)?;
            (&hostport[..idx], Some(port))
        }
        _ => (hostport, None),
    };

    if host.is_empty() {
        return Err(SipParseError::InvalidUri);
    }

    Ok(SipUri {
        scheme,
        userinfo,
        host,
        port,
        params,
    })
}
