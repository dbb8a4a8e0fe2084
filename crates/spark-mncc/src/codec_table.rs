//! `payload_msg_type` ↔ 编码名映射（§3 补充）。
//!
//! 原始实现把这一步交给一个叫 `app_media_name` 的帮助函数，其定义没有出现
//! 在本仓库的检索素材里（SPEC_FULL §3）。这里提供一张覆盖 MNCC 侧常见 GSM
//! 语音编码（FR/EFR/HR/AMR）外加一对 PCMA/PCMU 兜底的静态表，使
//! `SipLeg::wanted_codec` 总能从 MNCC 侧的 `payload_msg_type` 推导出来。

/// GSM Full Rate。
pub const PAYLOAD_MSG_TYPE_GSM_FR: u8 = 1;
/// GSM Half Rate。
pub const PAYLOAD_MSG_TYPE_GSM_HR: u8 = 2;
/// GSM Enhanced Full Rate。
pub const PAYLOAD_MSG_TYPE_GSM_EFR: u8 = 3;
/// Adaptive Multi-Rate。
pub const PAYLOAD_MSG_TYPE_AMR: u8 = 4;
/// G.711 A-law，用作未知 GSM 编码时的兜底。
pub const PAYLOAD_MSG_TYPE_PCMA: u8 = 97;
/// G.711 µ-law。
pub const PAYLOAD_MSG_TYPE_PCMU: u8 = 98;

/// 将 MNCC 侧的 `payload_msg_type` 映射为 SDP `rtpmap` 使用的编码名。
///
/// 未知取值兜底为 `"PCMA"`：SIP 对端总能拿到一个可协商的编码名，而不是让
/// 出站 INVITE 因为查表失败而无法构造。
pub fn codec_name(payload_msg_type: u8) -> &'static str {
    match payload_msg_type {
        PAYLOAD_MSG_TYPE_GSM_FR => "GSM",
        PAYLOAD_MSG_TYPE_GSM_HR => "GSM-HR",
        PAYLOAD_MSG_TYPE_GSM_EFR => "GSM-EFR",
        PAYLOAD_MSG_TYPE_AMR => "AMR",
        PAYLOAD_MSG_TYPE_PCMU => "PCMU",
        _ => "PCMA",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_payload_types_map_to_distinct_names() {
        assert_eq!(codec_name(PAYLOAD_MSG_TYPE_GSM_FR), "GSM");
        assert_eq!(codec_name(PAYLOAD_MSG_TYPE_AMR), "AMR");
        assert_eq!(codec_name(PAYLOAD_MSG_TYPE_PCMU), "PCMU");
    }

    #[test]
    fn unknown_payload_type_falls_back_to_pcma() {
        assert_eq!(codec_name(255), "PCMA");
    }
}
