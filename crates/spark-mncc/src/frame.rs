//! MNCC 线格式：固定大小的二进制控制帧（§6）。
//!
//! 三种帧形状：一般控制帧（对应原始实现的 `gsm_mncc`）、RTP 控制帧
//! （`gsm_mncc_rtp`）与握手帧（`gsm_mncc_hello`）。每种帧的首 32 位都是消息
//! 类型；接收方按"收到的字节数严格等于该消息类型对应结构体大小"校验，任何
//! 不一致都关闭连接（§4.2/§6）。
//!
//! 上游 Osmocom 协议头（`mncc_protocol.h`）未出现在本仓库的检索素材中
//! （见 SPEC_FULL §3），这里的字段偏移、消息类型常量值是本仓库自行约定的
//! 线格式，不追求与任何既有 ABI 二进制兼容——这符合 §1 把"低层 MNCC 协议头"
//! 列为外部协作者、本仓库只需对等地实现同一组消息语义的范围。

use bytes::{Buf, BufMut, BytesMut};

/// 被叫/主叫号码字段在线上的固定宽度（字节），含截断，仿照原始实现的
/// `%.32s` 格式化宽度。
pub const ADDRESS_NUMBER_LEN: usize = 32;
/// IMSI 字段在线上的固定宽度。
pub const IMSI_LEN: usize = 16;

/// ISDN 编号计划常量（§6）。
pub const PLAN_ISDN: u8 = 1;

/// `fields` 位图：CALLED 子记录是否存在（§6）。
pub const FIELD_CALLED: u32 = 1 << 0;
/// `fields` 位图：CALLING 子记录是否存在。
pub const FIELD_CALLING: u32 = 1 << 1;
/// `fields` 位图：KEYPAD（DTMF）子记录是否存在。
pub const FIELD_KEYPAD: u32 = 1 << 2;
/// `fields` 位图：PROGRESS 子记录是否存在。
pub const FIELD_PROGRESS: u32 = 1 << 3;

/// 握手消息类型，WAIT_VERSION 状态下唯一接受的帧。
pub const MSG_SOCKET_HELLO: u32 = 0x0001;
/// SETUP_REQ：MT 呼叫建立请求（§6）。
pub const MSG_SETUP_REQ: u32 = 0x0101;
/// SETUP_IND：MO 呼叫建立通知（§6）。
pub const MSG_SETUP_IND: u32 = 0x0102;
/// SETUP_RSP：MT 侧受理呼叫的响应。
pub const MSG_SETUP_RSP: u32 = 0x0103;
/// SETUP_COMPL_REQ：MT 侧呼叫建立完成请求。
pub const MSG_SETUP_COMPL_REQ: u32 = 0x0104;
/// SETUP_COMPL_IND：MO 侧呼叫建立完成通知。
pub const MSG_SETUP_COMPL_IND: u32 = 0x0105;
/// SETUP_CNF：MO 呼叫建立确认。
pub const MSG_SETUP_CNF: u32 = 0x0107;
/// CALL_CONF_IND：MT 侧呼叫已确认（§4.4a）。
pub const MSG_CALL_CONF_IND: u32 = 0x0108;
/// CALL_PROC_REQ：呼叫处理中请求。
pub const MSG_CALL_PROC_REQ: u32 = 0x0109;
/// ALERT_REQ：振铃请求。
pub const MSG_ALERT_REQ: u32 = 0x010a;
/// ALERT_IND：振铃通知。
pub const MSG_ALERT_IND: u32 = 0x010b;
/// DISC_REQ：拆线请求。
pub const MSG_DISC_REQ: u32 = 0x010e;
/// DISC_IND：拆线通知。
pub const MSG_DISC_IND: u32 = 0x010f;
/// REL_REQ：释放请求。
pub const MSG_REL_REQ: u32 = 0x0110;
/// REL_IND：释放通知。
pub const MSG_REL_IND: u32 = 0x0111;
/// REL_CNF：释放确认。
pub const MSG_REL_CNF: u32 = 0x0112;
/// REJ_REQ：拒绝请求。
pub const MSG_REJ_REQ: u32 = 0x0113;
/// REJ_IND：拒绝通知。
pub const MSG_REJ_IND: u32 = 0x0114;
/// HOLD_IND：保持请求通知，本仓库一律以 `HOLD_REJ` 拒绝（§4.8a Non-goal）。
pub const MSG_HOLD_IND: u32 = 0x0120;
/// HOLD_REJ：保持请求的拒绝响应。
pub const MSG_HOLD_REJ: u32 = 0x0121;
/// START_DTMF_IND：DTMF 按键开始通知。
pub const MSG_START_DTMF_IND: u32 = 0x0130;
/// START_DTMF_RSP：DTMF 按键开始响应。
pub const MSG_START_DTMF_RSP: u32 = 0x0131;
/// STOP_DTMF_IND：DTMF 按键结束通知。
pub const MSG_STOP_DTMF_IND: u32 = 0x0132;
/// STOP_DTMF_RSP：DTMF 按键结束响应。
pub const MSG_STOP_DTMF_RSP: u32 = 0x0133;
/// RTP_CREATE：为一条呼叫腿分配本地 RTP 端点。
pub const MSG_RTP_CREATE: u32 = 0x0200;
/// RTP_CONNECT：把对端 RTP 端点绑定到本地呼叫腿（§4.2 开放问题：全零即失败）。
pub const MSG_RTP_CONNECT: u32 = 0x0201;

/// 编译期协商的协议版本，由 `SOCKET_HELLO` 帧校验（§4.1）。
pub const MNCC_SOCK_VERSION: u32 = 1;

/// 错误：帧解码失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// 收到的字节数与该消息类型期望的帧大小不一致（§6）。
    #[error("frame of {got} bytes does not match the expected size {expected}")]
    LengthMismatch { expected: usize, got: usize },
}

/// 地址子记录：编号计划、类型与号码串（§6）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressField {
    /// 编号计划（`PLAN_ISDN` 等）。
    pub plan: u8,
    /// 编号类型。
    pub number_type: u8,
    /// 号码串，线上按 `ADDRESS_NUMBER_LEN` 定宽截断。
    pub number: String,
}

impl AddressField {
    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(self.plan);
        out.put_u8(self.number_type);
        write_fixed_str(out, &self.number, ADDRESS_NUMBER_LEN);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        let plan = buf.get_u8();
        let number_type = buf.get_u8();
        let number = read_fixed_str(buf, ADDRESS_NUMBER_LEN);
        AddressField { plan, number_type, number }
    }
}

/// `MNCC_F_PROGRESS` 子记录（GSM 04.08 10.5.4.21）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// 编码标准。
    pub coding: u8,
    /// 位置。
    pub location: u8,
    /// 进度描述符。
    pub descriptor: u8,
}

/// 一般控制帧：承载呼叫建立/释放/振铃/DTMF 等所有非 RTP 信令（§6）。
///
/// 原始实现里这是一个携带所有子记录的定长结构体，`fields` 位图只是决定
/// 哪些子记录"有意义"，并不改变帧的线上大小——这里保留同样的设计：
/// `called`/`calling`/`keypad`/`progress` 总是按固定宽度编解码，调用方据
/// `fields` 判断是否采信。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    /// 消息类型（`MSG_*` 常量之一）。
    pub msg_type: u32,
    /// MNCC 侧关联 id。
    pub callref: u32,
    /// 子记录存在性位图（`FIELD_*`）。
    pub fields: u32,
    /// 被叫地址子记录，是否采信取决于 `fields`。
    pub called: AddressField,
    /// 主叫地址子记录，是否采信取决于 `fields`。
    pub calling: AddressField,
    /// IMSI，定宽 `IMSI_LEN` 截断。
    pub imsi: String,
    /// DTMF 按键字符。
    pub keypad: u8,
    /// 进度子记录。
    pub progress: Progress,
}

impl ControlFrame {
    /// 线上固定长度：12（头部）+ 35*2（地址）+ 16（IMSI）+ 1（keypad）+ 3（progress）。
    pub const WIRE_LEN: usize = 4 + 4 + 4 + (2 + ADDRESS_NUMBER_LEN) * 2 + IMSI_LEN + 1 + 3;

    /// 构造一个除 `msg_type`/`callref` 外全零的最小控制帧，用于纯通知类报文
    /// （`CALL_PROC_REQ`、`REL_REQ`、`HOLD_REJ` 等不需要携带子记录的场景）。
    pub fn bare(msg_type: u32, callref: u32) -> Self {
        ControlFrame {
            msg_type,
            callref,
            fields: 0,
            called: AddressField { plan: 0, number_type: 0, number: String::new() },
            calling: AddressField { plan: 0, number_type: 0, number: String::new() },
            imsi: String::new(),
            keypad: 0,
            progress: Progress { coding: 0, location: 0, descriptor: 0 },
        }
    }

    /// `fields` 位图是否标记了被叫地址子记录。
    pub fn has_called(&self) -> bool {
        self.fields & FIELD_CALLED != 0
    }

    /// `fields` 位图是否标记了主叫地址子记录。
    pub fn has_calling(&self) -> bool {
        self.fields & FIELD_CALLING != 0
    }

    /// 编码为线上字节序列。
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(Self::WIRE_LEN);
        out.put_u32(self.msg_type);
        out.put_u32(self.callref);
        out.put_u32(self.fields);
        self.called.encode(&mut out);
        self.calling.encode(&mut out);
        write_fixed_str(&mut out, &self.imsi, IMSI_LEN);
        out.put_u8(self.keypad);
        out.put_u8(self.progress.coding);
        out.put_u8(self.progress.location);
        out.put_u8(self.progress.descriptor);
        out
    }

    /// 从线上字节序列解码，长度不匹配即失败。
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != Self::WIRE_LEN {
            return Err(FrameError::LengthMismatch { expected: Self::WIRE_LEN, got: buf.len() });
        }
        let mut cursor = buf;
        let msg_type = cursor.get_u32();
        let callref = cursor.get_u32();
        let fields = cursor.get_u32();
        let called = AddressField::decode(&mut cursor);
        let calling = AddressField::decode(&mut cursor);
        let imsi = read_fixed_str(&mut cursor, IMSI_LEN);
        let keypad = cursor.get_u8();
        let progress = Progress {
            coding: cursor.get_u8(),
            location: cursor.get_u8(),
            descriptor: cursor.get_u8(),
        };
        Ok(ControlFrame { msg_type, callref, fields, called, calling, imsi, keypad, progress })
    }
}

/// RTP 控制帧：`RTP_CREATE`/`RTP_CONNECT` 的请求与响应共用这一形状（§6）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RtpFrame {
    /// 消息类型（`MSG_RTP_CREATE`/`MSG_RTP_CONNECT`）。
    pub msg_type: u32,
    /// MNCC 侧关联 id。
    pub callref: u32,
    /// RTP 端点 IPv4 地址，网络字节序整数。
    pub ip: u32,
    /// RTP 端点端口。
    pub port: u16,
    /// SDP 负载类型号。
    pub payload_type: u8,
    /// 编码表查找用的内部消息类型（§3 补充）。
    pub payload_msg_type: u8,
}

impl RtpFrame {
    /// 线上固定长度。
    pub const WIRE_LEN: usize = 4 + 4 + 4 + 2 + 1 + 1;

    /// `RTP_CONNECT` 失败判定：ip/port/pt 全零即失败（§4.2 开放问题）。
    pub fn is_all_zero(&self) -> bool {
        self.ip == 0 && self.port == 0 && self.payload_type == 0
    }

    /// 编码为线上字节序列。
    pub fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(Self::WIRE_LEN);
        out.put_u32(self.msg_type);
        out.put_u32(self.callref);
        out.put_u32(self.ip);
        out.put_u16(self.port);
        out.put_u8(self.payload_type);
        out.put_u8(self.payload_msg_type);
        out
    }

    /// 从线上字节序列解码，长度不匹配即失败。
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != Self::WIRE_LEN {
            return Err(FrameError::LengthMismatch { expected: Self::WIRE_LEN, got: buf.len() });
        }
        let mut cursor = buf;
        Ok(RtpFrame {
            msg_type: cursor.get_u32(),
            callref: cursor.get_u32(),
            ip: cursor.get_u32(),
            port: cursor.get_u16(),
            payload_type: cursor.get_u8(),
            payload_msg_type: cursor.get_u8(),
        })
    }
}

/// 握手帧：仅 WAIT_VERSION 状态下接受（§4.1）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloFrame {
    /// 恒为 `MSG_SOCKET_HELLO`。
    pub msg_type: u32,
    /// 对端声明的协议版本，须与 `MNCC_SOCK_VERSION` 一致。
    pub version: u32,
}

impl HelloFrame {
    /// 线上固定长度。
    pub const WIRE_LEN: usize = 4 + 4;

    /// 从线上字节序列解码，长度不匹配即失败。
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() != Self::WIRE_LEN {
            return Err(FrameError::LengthMismatch { expected: Self::WIRE_LEN, got: buf.len() });
        }
        let mut cursor = buf;
        Ok(HelloFrame { msg_type: cursor.get_u32(), version: cursor.get_u32() })
    }
}

/// 读取前 4 字节消息类型而不消费缓冲区，供分发表在解码前选择帧形状。
pub fn peek_msg_type(buf: &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

fn write_fixed_str(out: &mut BytesMut, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let take = bytes.len().min(width);
    out.put_slice(&bytes[..take]);
    out.put_bytes(0, width - take);
}

fn read_fixed_str(buf: &mut impl Buf, width: usize) -> String {
    let mut raw = vec![0u8; width];
    buf.copy_to_slice(&mut raw);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frame_round_trips() {
        let frame = ControlFrame {
            msg_type: MSG_SETUP_IND,
            callref: 42,
            fields: FIELD_CALLED | FIELD_CALLING,
            called: AddressField { plan: PLAN_ISDN, number_type: 0, number: "101".into() },
            calling: AddressField { plan: PLAN_ISDN, number_type: 0, number: "200".into() },
            imsi: "111222333444555".into(),
            keypad: 0,
            progress: Progress { coding: 0, location: 0, descriptor: 0 },
        };
        let wire = frame.encode();
        assert_eq!(wire.len(), ControlFrame::WIRE_LEN);
        let decoded = ControlFrame::decode(&wire).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_frame_rejects_wrong_length() {
        let err = ControlFrame::decode(&[0u8; 4]).unwrap_err();
        assert_eq!(err, FrameError::LengthMismatch { expected: ControlFrame::WIRE_LEN, got: 4 });
    }

    #[test]
    fn rtp_frame_round_trips() {
        let frame = RtpFrame { msg_type: MSG_RTP_CREATE, callref: 42, ip: 0x0a00_0001, port: 16384, payload_type: 8, payload_msg_type: 3 };
        let wire = frame.encode();
        assert_eq!(RtpFrame::decode(&wire).unwrap(), frame);
    }

    #[test]
    fn rtp_frame_all_zero_is_failure_signal() {
        let frame = RtpFrame { msg_type: MSG_RTP_CONNECT, callref: 1, ip: 0, port: 0, payload_type: 0, payload_msg_type: 0 };
        assert!(frame.is_all_zero());
    }

    #[test]
    fn hello_frame_rejects_short_buffer() {
        assert_eq!(HelloFrame::decode(&[0u8; 4]).unwrap_err(), FrameError::LengthMismatch { expected: 8, got: 4 });
    }

    #[test]
    fn peek_msg_type_reads_leading_u32() {
        let frame = RtpFrame { msg_type: MSG_RTP_CREATE, ..Default::default() };
        let wire = frame.encode();
        assert_eq!(peek_msg_type(&wire), Some(MSG_RTP_CREATE));
    }

    #[test]
    fn fixed_str_truncates_long_input() {
        let mut out = BytesMut::new();
        write_fixed_str(&mut out, &"1".repeat(40), ADDRESS_NUMBER_LEN);
        assert_eq!(out.len(), ADDRESS_NUMBER_LEN);
        let decoded = read_fixed_str(&mut &out[..], ADDRESS_NUMBER_LEN);
        assert_eq!(decoded.len(), ADDRESS_NUMBER_LEN);
    }
}
