//! 呼叫腿（`Leg`）数据模型：标签化枚举，而非 trait-object 服务管线。
//!
//! §9 明确要求"不要模拟继承"：`Leg` 在派发点上被模式匹配，公共能力
//! （connect/ring/release/可选 dtmf）通过一个小的 [`LegCapabilities`] trait
//! 对象承载，每个适配器各实现一次，绝不通过 `BoxService` 管线暴露。

use std::rc::Rc;

use crate::call::LegPosition;
use crate::error::SwitchError;

/// 呼叫腿的媒体端点四元组：IPv4 地址（主机字节序的 32 位整数）、UDP 端口、
/// 负载类型、负载消息类型。按 §3 的不变式，该四元组在一条腿的生命周期内最多
/// 被写入两次：一次是自身适配器获知本地端点，一次是对端端点被转发过来。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaEndpoint {
    /// IPv4 地址，主机字节序。
    pub ip: u32,
    /// UDP 端口。
    pub port: u16,
    /// RTP 负载类型（payload type）。
    pub payload_type: u8,
    /// 负载消息类型，用于在 `spark-mncc::codec_table` 中查表得到编码名。
    pub payload_msg_type: u8,
}

impl MediaEndpoint {
    /// 该端点是否仍是全零的"未知"状态（§4.2 的 `RTP_CONNECT` 全零即失败判定）。
    pub fn is_unset(&self) -> bool {
        self.ip == 0 && self.port == 0 && self.payload_type == 0
    }
}

/// 所有呼叫腿变体共享的字段。
#[derive(Debug)]
pub struct LegCommon {
    /// 所属呼叫的 id（反向引用，永不用于获取"对端"——那始终经由 `Call` 查询）。
    pub call_id: u64,
    /// 本腿在所属呼叫中的位置。
    pub position: LegPosition,
    /// 一旦下发本地释放指令即置位；置位后拒绝再次下发。
    pub in_release: bool,
    /// 该腿是否已经完全销毁（协议适配器已经停止为它收发任何报文）。
    /// 呼叫本身只有在两条腿都置位后才从登记表移除（§3）。
    pub destroyed: bool,
    /// 媒体端点四元组。
    pub media: MediaEndpoint,
    /// 本腿的能力实现，由拥有该腿的适配器注入。
    pub capabilities: Rc<dyn LegCapabilities>,
}

impl LegCommon {
    /// 构造一个新的公共字段集合，初始未处于释放流程，媒体端点未知。
    pub fn new(call_id: u64, position: LegPosition, capabilities: Rc<dyn LegCapabilities>) -> Self {
        LegCommon {
            call_id,
            position,
            in_release: false,
            destroyed: false,
            media: MediaEndpoint::default(),
            capabilities,
        }
    }
}

/// MNCC 呼叫腿方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Mobile-originated：呼叫由移动网络侧发起。
    Mo,
    /// Mobile-terminated：呼叫被路由到移动网络侧振铃。
    Mt,
}

/// MNCC 呼叫腿的子状态机（§3）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MnccSubState {
    /// 刚创建，尚未进入 PROCEEDING。
    Initial,
    /// `CALL_PROC_REQ` 已发送（MO）或 `SETUP_REQ` 已发送（MT），等待网络侧推进。
    Proceeding,
    /// `SETUP_COMPL_IND`/`SETUP_CNF` 处理完毕，媒体已双向确认。
    Connected,
}

/// MNCC 地址结构：编号计划、类型与号码串（§6）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressInfo {
    /// 编号计划，ISDN 取值为 1；非 ISDN 必须在 §4.3 中被拒绝。
    pub plan: u8,
    /// 号码类型（national/international/unknown，取值遵循 MNCC 线格式）。
    pub number_type: u8,
    /// 号码串，原样保留，不做截断（截断只发生在 `Call::source`/`Call::dest`）。
    pub number: String,
}

impl AddressInfo {
    /// ISDN 编号计划常量值。
    pub const PLAN_ISDN: u8 = 1;
    /// 国际号码类型常量值（与原始 MNCC 头一致）。
    pub const TYPE_INTERNATIONAL: u8 = 1;

    /// 该地址的编号计划是否为 ISDN。
    pub fn is_isdn_plan(&self) -> bool {
        self.plan == Self::PLAN_ISDN
    }

    /// 该地址是否为国际号码。
    pub fn is_international(&self) -> bool {
        self.number_type == Self::TYPE_INTERNATIONAL
    }
}

/// 单个未完成响应的期望类型与截止时刻，由 [`crate::timer::TimerScheduler`] 驱动。
#[derive(Debug, Clone, Copy)]
pub struct PendingResponse {
    /// 期望收到的 MNCC 消息类型（线格式 32 位类型标签）。
    pub expected: u32,
    /// 截止时刻。
    pub deadline: std::time::Instant,
}

/// MNCC 呼叫腿。
#[derive(Debug)]
pub struct MnccLeg {
    /// 公共字段。
    pub common: LegCommon,
    /// MNCC 侧关联 id。
    pub callref: u32,
    /// MO/MT 方向。
    pub direction: Direction,
    /// 子状态。
    pub sub_state: MnccSubState,
    /// 被叫地址。
    pub called: AddressInfo,
    /// 主叫地址。
    pub calling: AddressInfo,
    /// IMSI，最长 16 字符。
    pub imsi: String,
    /// 当前唯一的未完成响应，`None` 表示没有计时器在跑。
    pub rsp_wanted: Option<PendingResponse>,
}

/// SIP 呼叫腿的子状态机（§4.7）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipSubState {
    /// INVITE 已发送，尚无对话。
    Initial,
    /// 收到临时或终结响应，对话已建立。
    DlgConfirmed,
    /// `200 OK` 处理完毕，ACK 已发送。
    Connected,
}

/// SIP 呼叫腿。
#[derive(Debug)]
pub struct SipLeg {
    /// 公共字段。
    pub common: LegCommon,
    /// 指向底层 SIP 事务/对话的不透明句柄（由 `spark-sip-gateway` 定义其含义）。
    pub dialog_handle: u64,
    /// 子状态。
    pub sub_state: SipSubState,
    /// 期望协商到的编码名，例如 `"PCMA"`。
    pub wanted_codec: String,
}

/// 呼叫腿：标签化枚举，在派发点上模式匹配，而不是 trait-object 服务管线。
#[derive(Debug)]
pub enum Leg {
    /// MNCC 侧呼叫腿。
    Mncc(MnccLeg),
    /// SIP 侧呼叫腿。
    Sip(SipLeg),
}

impl Leg {
    /// 借出公共字段。
    pub fn common(&self) -> &LegCommon {
        match self {
            Leg::Mncc(leg) => &leg.common,
            Leg::Sip(leg) => &leg.common,
        }
    }

    /// 借出可变公共字段。
    pub fn common_mut(&mut self) -> &mut LegCommon {
        match self {
            Leg::Mncc(leg) => &mut leg.common,
            Leg::Sip(leg) => &mut leg.common,
        }
    }

    /// 该腿是否为 MNCC 侧。
    pub fn is_mncc(&self) -> bool {
        matches!(self, Leg::Mncc(_))
    }

    /// 该腿是否为 SIP 侧。
    pub fn is_sip(&self) -> bool {
        matches!(self, Leg::Sip(_))
    }

    /// 取出本腿的能力实现（`Rc` 克隆，成本是一次引用计数自增）。
    pub fn capabilities(&self) -> Rc<dyn LegCapabilities> {
        self.common().capabilities.clone()
    }

    /// 当前媒体端点。
    pub fn media(&self) -> MediaEndpoint {
        self.common().media
    }

    /// 写入媒体端点（§3 不变式：至多写入两次，由调用方保证）。
    pub fn set_media(&mut self, media: MediaEndpoint) {
        self.common_mut().media = media;
    }

    /// 若为 MNCC 腿则借出其内部状态。
    pub fn as_mncc(&self) -> Option<&MnccLeg> {
        match self {
            Leg::Mncc(leg) => Some(leg),
            Leg::Sip(_) => None,
        }
    }

    /// 若为 MNCC 腿则借出其可变内部状态。
    pub fn as_mncc_mut(&mut self) -> Option<&mut MnccLeg> {
        match self {
            Leg::Mncc(leg) => Some(leg),
            Leg::Sip(_) => None,
        }
    }

    /// 若为 SIP 腿则借出其内部状态。
    pub fn as_sip(&self) -> Option<&SipLeg> {
        match self {
            Leg::Sip(leg) => Some(leg),
            Leg::Mncc(_) => None,
        }
    }

    /// 若为 SIP 腿则借出其可变内部状态。
    pub fn as_sip_mut(&mut self) -> Option<&mut SipLeg> {
        match self {
            Leg::Sip(leg) => Some(leg),
            Leg::Mncc(_) => None,
        }
    }
}

/// 呼叫腿的能力集合：{connect, ring, release, 可选 dtmf}（§9）。
///
/// 每个协议适配器各实现一次（`spark-mncc::MnccCapabilities`、
/// `spark-sip-gateway::SipCapabilities`），以 `Rc<dyn LegCapabilities>`
/// 形式挂在 [`LegCommon::capabilities`] 上。实现者在方法体内部通过自己持有的
/// `Rc<CallRegistry>` 和协议状态，依据 `call_id`/`position` 定位并驱动自身的
/// 协议动作；该 trait 本身不知道也不关心具体协议。
pub trait LegCapabilities: std::fmt::Debug {
    /// 驱动本腿进入"已接通"：MNCC 侧发送 `RTP_CONNECT`+`SETUP_RSP`（§4.5），
    /// SIP 侧发送 ACK（§4.7）。
    fn connect_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError>;

    /// 驱动本腿振铃：MNCC 侧发送 `ALERT_REQ`（§4.5）。
    fn ring_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError>;

    /// 驱动本腿释放，具体分支依赖各自子状态机（§4.5/§4.7）。
    fn release_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError>;

    /// 转发一个 DTMF 按键（可选能力，默认忽略）。
    fn dtmf(&self, call_id: u64, position: LegPosition, key: char) -> Result<(), SwitchError> {
        let _ = (call_id, position, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_endpoint_default_is_unset() {
        assert!(MediaEndpoint::default().is_unset());
    }

    #[test]
    fn media_endpoint_with_port_is_not_unset() {
        let endpoint = MediaEndpoint {
            ip: 0,
            port: 16384,
            payload_type: 0,
            payload_msg_type: 0,
        };
        assert!(!endpoint.is_unset());
    }

    #[test]
    fn address_info_classifies_isdn_international() {
        let address = AddressInfo {
            plan: AddressInfo::PLAN_ISDN,
            number_type: AddressInfo::TYPE_INTERNATIONAL,
            number: "101".to_owned(),
        };
        assert!(address.is_isdn_plan());
        assert!(address.is_international());
    }
}
