//! SIP 对话的本地记账状态。
//!
//! # 教案式说明
//! - **意图 (Why)**：`spark-codec-sip` 不持有任何事务/对话状态（它只管文本
//!   <-> 结构体），`spark-switch::leg::SipLeg` 也只携带一个不透明的
//!   `dialog_handle`；真正的 tag/branch/CSeq 记账必须活在本 crate。
//! - **契约 (What)**：每条 SIP 呼叫腿对应恰好一个 [`SipDialogState`]，以
//!   `call_id`（桥接核心分配的数字 id）为键存放在适配器的 `RefCell<HashMap>`
//!   中；`dialog_handle` 就取 `call_id` 本身，不再发明第二套 id 空间。
//! - **取舍 (Trade-offs)**：不维护 RFC 3261 完整的客户端事务状态机（Calling/
//!   Proceeding/Completed/Terminated），只记最少够用的字段，由
//!   `spark-sip-gateway::adapter` 的响应分发逻辑直接驱动状态迁移。

use std::net::SocketAddr;

/// `branch=` 参数的魔法前缀（RFC 3261 §8.1.1.7）。
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// 一条 SIP 对话的本地记账状态。
#[derive(Debug, Clone)]
pub struct SipDialogState {
    /// 本对话的 `Call-ID` 头部取值（跨 INVITE/ACK/BYE/CANCEL 固定不变）。
    pub call_id_header: String,
    /// 本侧分配的 `From` tag（固定不变）。
    pub local_tag: String,
    /// 对端分配的 `To` tag，首个临时/终结响应到达后写入，此后不再替换。
    pub remote_tag: Option<String>,
    /// 原始 INVITE 请求使用的 `branch`；`CANCEL` 必须复用同一个 branch
    /// （RFC 3261 §9.1），因此单独保存。
    pub invite_branch: String,
    /// 下一个要使用的 `CSeq` 序号（INVITE 用 1，后续自增）。
    pub next_cseq: u32,
    /// 本对话请求的发送目标（配置中的远端 SIP 地址）。
    pub remote_target: SocketAddr,
    /// 本地 `Via`/`Contact`/`From` URI 使用的主机。
    pub local_host: String,
    /// 本地 `Via`/`Contact`/`From` URI 使用的端口。
    pub local_port: u16,
    /// 本侧身份（出现在 `From` 与 `Contact` 的 userinfo 中）。
    pub source: String,
    /// 对端身份（出现在请求 URI 与 `To` 的 userinfo 中）。
    pub dest: String,
    /// 我方是否已经主动发起过拆除（`BYE`/`CANCEL`）；用于区分"对端发来的 BYE"
    /// 与"我方 BYE/CANCEL 的响应"，决定是否需要再次释放对端呼叫腿（§4.7）。
    pub local_initiated_teardown: bool,
    /// 构造出站 offer 时使用的 MNCC 侧 `payload_msg_type`（§3 补充）。200 OK
    /// 的 rtpmap 编码名已经在 [`spark_codec_sdp::negotiate_answer`] 里按
    /// `wanted_codec` 做过匹配校验，因此答案里的负载类型必然对应同一种编码；
    /// 这里原样保留发起时的值，不必重新查表。
    pub origin_payload_msg_type: u8,
}

impl SipDialogState {
    /// 为一次新的出站 INVITE 构造对话状态。
    #[allow(clippy::too_many_arguments)]
    pub fn new_outbound(
        call_id: u64,
        remote_target: SocketAddr,
        local_host: String,
        local_port: u16,
        source: String,
        dest: String,
        origin_payload_msg_type: u8,
    ) -> Self {
        SipDialogState {
            call_id_header: format!("{call_id:x}@{local_host}"),
            local_tag: format!("spark-{call_id:x}"),
            remote_tag: None,
            invite_branch: format!("{BRANCH_MAGIC_COOKIE}-inv-{call_id:x}"),
            next_cseq: 2,
            remote_target,
            local_host,
            local_port,
            source,
            dest,
            local_initiated_teardown: false,
            origin_payload_msg_type,
        }
    }

    /// 生成一个新的非-INVITE 请求 branch（BYE 各自独立一个 branch）。
    pub fn fresh_branch(&self, call_id: u64, label: &str) -> String {
        format!("{BRANCH_MAGIC_COOKIE}-{label}-{call_id:x}-{}", self.next_cseq)
    }

    /// 取出当前 `CSeq` 序号并自增，供下一个新事务使用。
    pub fn take_cseq(&mut self) -> u32 {
        let cseq = self.next_cseq;
        self.next_cseq += 1;
        cseq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    #[test]
    fn outbound_dialog_starts_with_cseq_two_and_no_remote_tag() {
        let dialog = SipDialogState::new_outbound(7, addr(), "10.0.0.2".into(), 5060, "200".into(), "101".into(), 8);
        assert_eq!(dialog.next_cseq, 2);
        assert!(dialog.remote_tag.is_none());
        assert!(dialog.invite_branch.starts_with(BRANCH_MAGIC_COOKIE));
    }

    #[test]
    fn take_cseq_increments_monotonically() {
        let mut dialog = SipDialogState::new_outbound(7, addr(), "10.0.0.2".into(), 5060, "200".into(), "101".into(), 8);
        assert_eq!(dialog.take_cseq(), 2);
        assert_eq!(dialog.take_cseq(), 3);
    }
}
