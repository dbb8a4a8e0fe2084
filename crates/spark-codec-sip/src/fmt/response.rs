//! 响应报文序列化。
//!
//! 生产代码中桥接器只读取响应（180/200/>=300），不生成响应；这里保留写出
//! 能力是为了测试里搭建的模拟 SIP 对端可以回放报文。

use std::fmt;
use std::str;

use crate::{
    error::SipFormatError,
    fmt::headers::write_headers,
    types::{Header, StatusLine},
};

/// 写出完整响应报文。
pub fn write_response<W: fmt::Write>(
    writer: &mut W,
    line: &StatusLine<'_>,
    headers: &[Header<'_>],
    body: &[u8],
) -> Result<(), SipFormatError> {
    write_status_line(writer, line)?;
    writer.write_str("\r\n")?;
    write_headers(writer, headers)?;
    writer.write_str("\r\n")?;
    write_body(writer, body)?;
    Ok(())
}

/// 写出响应状态行。
pub fn write_status_line<W: fmt::Write>(
    writer: &mut W,
    line: &StatusLine<'_>,
) -> Result<(), SipFormatError> {
    if line.reason.is_empty() {
        write!(writer, "{} {}", line.version, line.status_code)?;
    } else {
        write!(
            writer,
            "{} {} {}",
            line.version, line.status_code, line.reason
        )?;
    }
    Ok(())
}

fn write_body<W: fmt::Write>(writer: &mut W, body: &[u8]) -> Result<(), SipFormatError> {
    if body.is_empty() {
        return Ok(());
    }
    let text = str::from_utf8(body).map_err(|_| SipFormatError::NonUtf8Body)?;
    writer.write_str(text)?;
    Ok(())
}
