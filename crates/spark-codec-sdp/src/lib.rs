#![warn(missing_docs)]

//! # spark-codec-sdp
//!
//! Session Description Protocol support for the MNCC<->SIP call bridge. The
//! SIP adapter (`spark-sip-gateway`) uses this crate for two things only:
//!
//! - rendering an offer that embeds the *other* leg's already-known RTP
//!   endpoint (§6 of the call-bridge design), and
//! - parsing a `200 OK` answer to recover the first IPv4 `c=` line and the
//!   first `audio`/`RTP/AVP` media whose `rtpmap` encoding matches the
//!   configured codec name (§4.7).
//!
//! Everything else in SDP (bandwidth lines, ICE candidates, multiple media
//! streams) is out of scope: the call bridge negotiates exactly one audio
//! codec per leg and never renegotiates mid-call.

use std::fmt;

/// SDP parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpParseError {
    /// Missing `v=` line.
    MissingVersion,
    /// Missing `o=` line.
    MissingOrigin,
    /// `o=` line has too few fields.
    InvalidOrigin,
    /// Missing `s=` line.
    MissingSessionName,
    /// Missing `t=` line.
    MissingTiming,
    /// `t=` line has too few fields.
    InvalidTiming,
    /// `c=` line has too few fields.
    InvalidConnection,
    /// `m=` line has too few fields.
    InvalidMedia,
}

impl fmt::Display for SdpParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVersion => write!(f, "SDP is missing the v= version line"),
            Self::MissingOrigin => write!(f, "SDP is missing the o= origin line"),
            Self::InvalidOrigin => write!(f, "o= line needs 6 fields"),
            Self::MissingSessionName => write!(f, "SDP is missing the s= session name line"),
            Self::MissingTiming => write!(f, "SDP is missing the t= timing line"),
            Self::InvalidTiming => write!(f, "t= line needs a start and stop time"),
            Self::InvalidConnection => write!(f, "c= line needs net type, addr type and address"),
            Self::InvalidMedia => write!(f, "m= line needs media, port, proto and a format"),
        }
    }
}

impl std::error::Error for SdpParseError {}

/// `o=` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin<'a> {
    /// Originator username, usually `-`.
    pub username: &'a str,
    /// Session id.
    pub session_id: &'a str,
    /// Session version.
    pub session_version: &'a str,
    /// Network type, e.g. `IN`.
    pub net_type: &'a str,
    /// Address type, e.g. `IP4`.
    pub addr_type: &'a str,
    /// Address.
    pub address: &'a str,
}

/// `c=` line, usable at session or media level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection<'a> {
    /// Network type.
    pub net_type: &'a str,
    /// Address type.
    pub addr_type: &'a str,
    /// Address.
    pub address: &'a str,
}

/// `t=` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing<'a> {
    /// Start time.
    pub start: &'a str,
    /// Stop time.
    pub stop: &'a str,
}

/// `a=` line (`a=key` or `a=key:value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute<'a> {
    /// Attribute key.
    pub key: &'a str,
    /// Attribute value, if any.
    pub value: Option<&'a str>,
}

/// `m=` line plus the `c=`/`a=` lines that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDesc<'a> {
    /// Media type, e.g. `audio`.
    pub media: &'a str,
    /// Port as it appeared in the line.
    pub port: &'a str,
    /// Transport, e.g. `RTP/AVP`.
    pub proto: &'a str,
    /// Payload type tokens.
    pub formats: Vec<&'a str>,
    /// Media-level connection, if present.
    pub connection: Option<Connection<'a>>,
    /// Media-level attributes.
    pub attributes: Vec<Attribute<'a>>,
}

/// Full session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDesc<'a> {
    /// `v=` value.
    pub version: &'a str,
    /// `o=` line.
    pub origin: Origin<'a>,
    /// `s=` value.
    pub session_name: &'a str,
    /// Session-level `c=`, if present.
    pub connection: Option<Connection<'a>>,
    /// `t=` line.
    pub timing: Timing<'a>,
    /// Session-level attributes.
    pub attributes: Vec<Attribute<'a>>,
    /// Media blocks, in order.
    pub media: Vec<MediaDesc<'a>>,
}

/// Parse SDP text. Unknown/unsupported line types (`b=`, `k=`, `r=`, ...)
/// are ignored, matching §5's "ignore unknown lines" tolerance.
pub fn parse_sdp(input: &str) -> Result<SessionDesc<'_>, SdpParseError> {
    let mut version = None;
    let mut origin = None;
    let mut session_name = None;
    let mut session_connection = None;
    let mut timing = None;
    let mut session_attributes = Vec::new();
    let mut media_list: Vec<MediaDesc<'_>> = Vec::new();
    let mut current_media_index = None;

    for raw_line in input.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.len() < 2 || line.as_bytes()[1] != b'=' {
            continue;
        }

        match line.as_bytes()[0] {
            b'v' => version = Some(line[2..].trim()),
            b'o' => origin = Some(parse_origin(line[2..].trim())?),
            b's' => session_name = Some(line[2..].trim()),
            b'c' => {
                let connection = parse_connection(line[2..].trim())?;
                if let Some(index) = current_media_index {
                    if let Some(media) = media_list.get_mut(index) {
                        media.connection = Some(connection);
                    }
                } else {
                    session_connection = Some(connection);
                }
            }
            b't' => timing = Some(parse_timing(line[2..].trim())?),
            b'm' => {
                let media = parse_media(line[2..].trim())?;
                media_list.push(media);
                current_media_index = Some(media_list.len() - 1);
            }
            b'a' => {
                let attribute = parse_attribute(line[2..].trim());
                if let Some(index) = current_media_index {
                    if let Some(media) = media_list.get_mut(index) {
                        media.attributes.push(attribute);
                    }
                } else {
                    session_attributes.push(attribute);
                }
            }
            _ => {}
        }
    }

    Ok(SessionDesc {
        version: version.ok_or(SdpParseError::MissingVersion)?,
        origin: origin.ok_or(SdpParseError::MissingOrigin)?,
        session_name: session_name.ok_or(SdpParseError::MissingSessionName)?,
        connection: session_connection,
        timing: timing.ok_or(SdpParseError::MissingTiming)?,
        attributes: session_attributes,
        media: media_list,
    })
}

/// Render a session description back to CRLF-terminated SDP text.
pub fn format_sdp(desc: &SessionDesc<'_>) -> String {
    let mut out = String::new();
    push_line(&mut out, "v=", desc.version);
    push_origin(&mut out, &desc.origin);
    push_line(&mut out, "s=", desc.session_name);
    if let Some(connection) = &desc.connection {
        push_connection(&mut out, connection);
    }
    push_timing(&mut out, &desc.timing);
    for attribute in &desc.attributes {
        push_attribute(&mut out, attribute);
    }
    for media in &desc.media {
        push_media(&mut out, media);
    }
    out
}

fn push_line(buf: &mut String, prefix: &str, content: &str) {
    buf.push_str(prefix);
    buf.push_str(content);
    buf.push_str("\r\n");
}

fn push_origin(buf: &mut String, origin: &Origin<'_>) {
    buf.push_str("o=");
    buf.push_str(origin.username);
    buf.push(' ');
    buf.push_str(origin.session_id);
    buf.push(' ');
    buf.push_str(origin.session_version);
    buf.push(' ');
    buf.push_str(origin.net_type);
    buf.push(' ');
    buf.push_str(origin.addr_type);
    buf.push(' ');
    buf.push_str(origin.address);
    buf.push_str("\r\n");
}

fn push_connection(buf: &mut String, connection: &Connection<'_>) {
    buf.push_str("c=");
    buf.push_str(connection.net_type);
    buf.push(' ');
    buf.push_str(connection.addr_type);
    buf.push(' ');
    buf.push_str(connection.address);
    buf.push_str("\r\n");
}

fn push_timing(buf: &mut String, timing: &Timing<'_>) {
    buf.push_str("t=");
    buf.push_str(timing.start);
    buf.push(' ');
    buf.push_str(timing.stop);
    buf.push_str("\r\n");
}

fn push_attribute(buf: &mut String, attribute: &Attribute<'_>) {
    buf.push_str("a=");
    buf.push_str(attribute.key);
    if let Some(value) = attribute.value {
        buf.push(':');
        buf.push_str(value);
    }
    buf.push_str("\r\n");
}

fn push_media(buf: &mut String, media: &MediaDesc<'_>) {
    buf.push_str("m=");
    buf.push_str(media.media);
    buf.push(' ');
    buf.push_str(media.port);
    buf.push(' ');
    buf.push_str(media.proto);
    for format in &media.formats {
        buf.push(' ');
        buf.push_str(format);
    }
    buf.push_str("\r\n");
    if let Some(connection) = &media.connection {
        push_connection(buf, connection);
    }
    for attribute in &media.attributes {
        push_attribute(buf, attribute);
    }
}

fn parse_origin(value: &str) -> Result<Origin<'_>, SdpParseError> {
    let mut parts = value.split_whitespace();
    let (username, session_id, session_version, net_type, addr_type, address) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    );
    match (username, session_id, session_version, net_type, addr_type, address) {
        (Some(username), Some(session_id), Some(session_version), Some(net_type), Some(addr_type), Some(address)) => {
            Ok(Origin {
                username,
                session_id,
                session_version,
                net_type,
                addr_type,
                address,
            })
        }
        _ => Err(SdpParseError::InvalidOrigin),
    }
}

fn parse_connection(value: &str) -> Result<Connection<'_>, SdpParseError> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(net_type), Some(addr_type), Some(address)) => Ok(Connection {
            net_type,
            addr_type,
            address,
        }),
        _ => Err(SdpParseError::InvalidConnection),
    }
}

fn parse_timing(value: &str) -> Result<Timing<'_>, SdpParseError> {
    let mut parts = value.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(start), Some(stop)) => Ok(Timing { start, stop }),
        _ => Err(SdpParseError::InvalidTiming),
    }
}

fn parse_media(value: &str) -> Result<MediaDesc<'_>, SdpParseError> {
    let mut parts = value.split_whitespace();
    let media = parts.next();
    let port = parts.next();
    let proto = parts.next();
    let formats: Vec<&str> = parts.collect();
    match (media, port, proto) {
        (Some(media), Some(port), Some(proto)) if !formats.is_empty() => Ok(MediaDesc {
            media,
            port,
            proto,
            formats,
            connection: None,
            attributes: Vec::new(),
        }),
        _ => Err(SdpParseError::InvalidMedia),
    }
}

fn parse_attribute(value: &str) -> Attribute<'_> {
    match value.split_once(':') {
        Some((key, val)) => Attribute {
            key,
            value: Some(val),
        },
        None => Attribute { key: value, value: None },
    }
}

/// The one audio media we ever negotiate, as recovered from a `200 OK` answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedAudio {
    /// Peer's IPv4 address, from the first IPv4 `c=` line.
    pub address: std::net::Ipv4Addr,
    /// Peer's RTP port, from the matching `m=audio` line.
    pub port: u16,
    /// Payload type, from the matching `a=rtpmap:<pt> <codec>/8000` line.
    pub payload_type: u8,
}

/// Scan a parsed SDP answer for the first IPv4 connection address and the
/// first `audio`/`RTP/AVP` media whose rtpmap encoding matches
/// `wanted_codec` case-insensitively (§4.7). Both extractions must succeed;
/// this is the only negotiation rule the call bridge implements (§1
/// Non-goals: no codec negotiation beyond this single match).
pub fn negotiate_answer(desc: &SessionDesc<'_>, wanted_codec: &str) -> Option<NegotiatedAudio> {
    let address = first_ipv4_address(desc)?;

    for media in &desc.media {
        if media.media != "audio" || media.proto != "RTP/AVP" {
            continue;
        }
        let Some(payload_type) = matching_payload_type(media, wanted_codec) else {
            continue;
        };
        let port: u16 = media.port.parse().ok()?;
        return Some(NegotiatedAudio {
            address,
            port,
            payload_type,
        });
    }
    None
}

fn first_ipv4_address(desc: &SessionDesc<'_>) -> Option<std::net::Ipv4Addr> {
    if let Some(connection) = &desc.connection {
        if connection.addr_type == "IP4" {
            if let Ok(addr) = connection.address.parse() {
                return Some(addr);
            }
        }
    }
    for media in &desc.media {
        if let Some(connection) = &media.connection {
            if connection.addr_type == "IP4" {
                if let Ok(addr) = connection.address.parse() {
                    return Some(addr);
                }
            }
        }
    }
    None
}

fn matching_payload_type(media: &MediaDesc<'_>, wanted_codec: &str) -> Option<u8> {
    for attribute in &media.attributes {
        if !attribute.key.eq_ignore_ascii_case("rtpmap") {
            continue;
        }
        let value = attribute.value?;
        let (pt_token, rest) = value.split_once(char::is_whitespace)?;
        let encoding = rest.split('/').next()?;
        if encoding.eq_ignore_ascii_case(wanted_codec) {
            let pt: u8 = pt_token.parse().ok()?;
            if media.formats.iter().any(|f| *f == pt_token) {
                return Some(pt);
            }
        }
    }
    None
}

/// Render the offer template from §6: one audio media carrying the peer
/// leg's already-known endpoint and a single payload type/codec pair.
pub fn render_offer(
    product: &str,
    local_addr: std::net::Ipv4Addr,
    media_port: u16,
    payload_type: u8,
    codec: &str,
) -> String {
    format!(
        "v=0\r\n\
o={product} 0 0 IN IP4 {local_addr}\r\n\
s=GSM Call\r\n\
c=IN IP4 {local_addr}\r\n\
t=0 0\r\n\
m=audio {media_port} RTP/AVP {payload_type}\r\n\
a=rtpmap:{payload_type} {codec}/8000\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn parse_and_format_round_trip() {
        let text = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=Test\r\nc=IN IP4 0.0.0.0\r\nt=0 0\r\nm=audio 49170 RTP/AVP 8\r\na=rtpmap:8 PCMA/8000\r\n";
        let parsed = parse_sdp(text).expect("should parse");
        assert_eq!(parsed.media[0].formats, vec!["8"]);
        let formatted = format_sdp(&parsed);
        assert!(formatted.contains("m=audio 49170 RTP/AVP 8\r\n"));
    }

    #[test]
    fn negotiate_answer_matches_requested_codec() {
        let text = "v=0\r\no=- 0 0 IN IP4 10.0.0.2\r\ns=GSM Call\r\nc=IN IP4 10.0.0.2\r\nt=0 0\r\nm=audio 20000 RTP/AVP 0 8\r\na=rtpmap:0 PCMU/8000\r\na=rtpmap:8 PCMA/8000\r\n";
        let desc = parse_sdp(text).unwrap();
        let negotiated = negotiate_answer(&desc, "PCMA").expect("PCMA should match");
        assert_eq!(negotiated.address, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(negotiated.port, 20000);
        assert_eq!(negotiated.payload_type, 8);
    }

    #[test]
    fn negotiate_answer_rejects_missing_codec() {
        let text = "v=0\r\no=- 0 0 IN IP4 10.0.0.2\r\ns=GSM Call\r\nc=IN IP4 10.0.0.2\r\nt=0 0\r\nm=audio 20000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\n";
        let desc = parse_sdp(text).unwrap();
        assert!(negotiate_answer(&desc, "PCMA").is_none());
    }

    #[test]
    fn render_offer_matches_template() {
        let text = render_offer("spark-bridge", Ipv4Addr::new(10, 0, 0, 1), 16384, 8, "PCMA");
        assert!(text.starts_with("v=0\r\n"));
        assert!(text.contains("m=audio 16384 RTP/AVP 8\r\n"));
        assert!(text.contains("a=rtpmap:8 PCMA/8000\r\n"));
    }
}
