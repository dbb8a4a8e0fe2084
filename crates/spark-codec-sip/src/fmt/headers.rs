//! Header 序列化实现。

use std::fmt;

use crate::{
    error::SipFormatError,
    types::{Header, HeaderName, NameAddr, SipUri},
};

/// 写出一组头部，每个头部自带结尾 `\r\n`。
pub fn write_headers<W: fmt::Write>(
    writer: &mut W,
    headers: &[Header<'_>],
) -> Result<(), SipFormatError> {
    for header in headers {
        write_header(writer, header)?;
        writer.write_str("\r\n")?;
    }
    Ok(())
}

/// 写出单个头部（不含结尾 CRLF）。
pub fn write_header<W: fmt::Write>(
    writer: &mut W,
    header: &Header<'_>,
) -> Result<(), SipFormatError> {
    match header {
        Header::Via(via) => {
            writer.write_str("Via: ")?;
            writer.write_str(via.sent_protocol)?;
            writer.write_char(' ')?;
            writer.write_str(via.host)?;
            if let Some(port) = via.port {
                write!(writer, ":{port}")?;
            }
            if let Some(branch) = via.branch {
                write!(writer, ";branch={branch}")?;
            }
        }
        Header::From(name) => {
            writer.write_str("From: ")?;
            write_name_addr(writer, name)?;
        }
        Header::To(name) => {
            writer.write_str("To: ")?;
            write_name_addr(writer, name)?;
        }
        Header::CallId(id) => {
            write!(writer, "Call-ID: {id}")?;
        }
        Header::CSeq(cseq) => {
            write!(writer, "CSeq: {} {}", cseq.sequence, cseq.method.as_str())?;
        }
        Header::MaxForwards(hops) => {
            write!(writer, "Max-Forwards: {hops}")?;
        }
        Header::Contact(contact) => {
            writer.write_str("Contact: ")?;
            write_name_addr(writer, &contact.address)?;
        }
        Header::Extension { name, value } => {
            write_extension(writer, name, value)?;
        }
    }
    Ok(())
}

fn write_extension<W: fmt::Write>(
    writer: &mut W,
    name: &HeaderName<'_>,
    value: &str,
) -> Result<(), SipFormatError> {
    writer.write_str(name.raw)?;
    writer.write_str(": ")?;
    writer.write_str(value)?;
    Ok(())
}

fn write_name_addr<W: fmt::Write>(
    writer: &mut W,
    name: &NameAddr<'_>,
) -> Result<(), SipFormatError> {
    if let Some(display) = name.display_name {
        write!(writer, "\"{display}\" ")?;
    }
    writer.write_char('<')?;
    write_uri(writer, &name.uri)?;
    writer.write_char('>')?;
    if let Some(params) = name.params {
        writer.write_char(';')?;
        writer.write_str(params)?;
    }
    Ok(())
}

pub(crate) fn write_uri<W: fmt::Write>(
    writer: &mut W,
    uri: &SipUri<'_>,
) -> Result<(), SipFormatError> {
    write!(writer, "{}:", uri.scheme)?;
    if let Some(userinfo) = uri.userinfo {
        write!(writer, "{userinfo}@")?;
    }
    writer.write_str(uri.host)?;
    if let Some(port) = uri.port {
        write!(writer, ":{port}")?;
    }
    if let Some(params) = uri.params {
        writer.write_str(params)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CSeqHeader, Method, SipScheme};

    #[test]
    fn writes_cseq_header() {
        let mut out = String::new();
        write_header(
            &mut out,
            &Header::CSeq(CSeqHeader {
                sequence: 1,
                method: Method::Invite,
            }),
        )
        .unwrap();
        assert_eq!(out, "CSeq: 1 INVITE");
    }

    #[test]
    fn writes_name_addr_with_tag() {
        let mut out = String::new();
        write_name_addr(
            &mut out,
            &NameAddr {
                display_name: None,
                uri: SipUri {
                    scheme: SipScheme::Sip,
                    userinfo: Some("200"),
                    host: "10.0.0.2",
                    port: Some(5060),
                    params: None,
                },
                params: Some("tag=abc"),
            },
        )
        .unwrap();
        assert_eq!(out, "<sip:200@10.0.0.2:5060>;tag=abc");
    }
}
