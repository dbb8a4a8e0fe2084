//! 桥接策略（§4.8）：在受理完一侧呼叫腿后，于另一侧创建对端呼叫腿，并装配
//! 对称的释放级联。
//!
//! 本 crate 不持有任何协议栈或套接字（§2："CORE：协议无关，不持有任何套接字
//! 或 SIP 栈"），因此"在 SIP 侧创建出站腿"与"在 MNCC 侧创建 MT 腿"都通过一对
//! 小 trait 对象完成——具体实现分别位于 `spark-sip-gateway`/`spark-mncc`，由
//! `spark-bridge` 在启动时注入。

use std::rc::Rc;

use crate::call::LegPosition;
use crate::error::SwitchError;
use crate::registry::CallRegistry;

/// 在 SIP 侧为一个已知的呼叫发起出站 INVITE（§4.7：离线腿创建）。
///
/// 这是 §4.8 描述的默认路由规则："创建一个 SIP 出站腿"——当呼叫的 `initial`
/// 腿来自 MNCC（MO 路径，§4.3）时触发。
pub trait SipOriginator {
    /// 为 `call_id` 创建一个新的出站 SIP 呼叫腿，并将其作为 `remote` 写入
    /// 登记表；`source`/`dest` 用于构造 `From`/请求 URI。
    fn originate(&self, call_id: u64, source: &str, dest: &str) -> Result<(), SwitchError>;
}

/// 在 MNCC 侧为一个已知的呼叫发起 MT（mobile-terminated）建立（§4.4）。
///
/// 对应呼叫的 `initial` 腿来自 SIP（入站 INVITE）时触发：网络侧需要振铃
/// 被叫移动台。
pub trait MnccOriginator {
    /// 为 `call_id` 创建一个新的 MT 呼叫腿，并将其作为 `remote` 写入登记表。
    fn originate(&self, call_id: u64, source: &str, dest: &str) -> Result<(), SwitchError>;
}

/// 桥接策略：固定的核心路由规则加上断线级联释放。
pub struct BridgingPolicy {
    registry: Rc<CallRegistry>,
    sip_originator: Rc<dyn SipOriginator>,
    mncc_originator: Rc<dyn MnccOriginator>,
}

impl BridgingPolicy {
    /// 使用已经构造好的登记表与两个协议侧的发起器组装桥接策略。
    pub fn new(
        registry: Rc<CallRegistry>,
        sip_originator: Rc<dyn SipOriginator>,
        mncc_originator: Rc<dyn MnccOriginator>,
    ) -> Self {
        BridgingPolicy {
            registry,
            sip_originator,
            mncc_originator,
        }
    }

    /// `route_call(call, source, dest)`：根据 `initial` 腿的协议族，选择在
    /// 对侧创建出站腿的发起器。新建的腿写入呼叫的 `remote` 位置；由
    /// [`CallRegistry::attach_remote`] 保证该位置此前必须为空。
    pub fn route_call(&self, call_id: u64, source: &str, dest: &str) -> Result<(), SwitchError> {
        let initial_is_mncc = self
            .registry
            .with_call(call_id, |call| call.initial.is_mncc())
            .ok_or(SwitchError::CallNotFound { call_id })?;

        if initial_is_mncc {
            self.sip_originator.originate(call_id, source, dest)
        } else {
            self.mncc_originator.originate(call_id, source, dest)
        }
    }

    /// `on_disconnect`：MNCC 连接断开时，释放登记表内每一通携带至少一条
    /// MNCC 呼叫腿的呼叫（§4.1/§4.8）。对每条仍然存活的呼叫腿调用其
    /// `release_call` 能力；呼叫本身的移除由各腿释放完成后的常规级联完成。
    pub fn on_disconnect(&self) -> Result<(), SwitchError> {
        let affected: Vec<u64> = self
            .registry
            .call_ids()
            .into_iter()
            .filter(|&id| self.registry.with_call(id, |call| call.has_mncc_leg()).unwrap_or(false))
            .collect();

        for call_id in affected {
            for position in [LegPosition::Initial, LegPosition::Remote] {
                let capabilities = self
                    .registry
                    .with_call(call_id, |call| call.leg(position).map(|leg| leg.capabilities()))
                    .flatten();
                if let Some(capabilities) = capabilities {
                    capabilities.release_call(call_id, position)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::leg::{AddressInfo, Direction, Leg, LegCapabilities, LegCommon, MnccLeg, MnccSubState};
    use std::cell::RefCell;

    #[derive(Debug)]
    struct RecordingCapabilities {
        released: Rc<RefCell<Vec<(u64, LegPosition)>>>,
    }

    impl LegCapabilities for RecordingCapabilities {
        fn connect_call(&self, _call_id: u64, _position: LegPosition) -> Result<(), SwitchError> {
            Ok(())
        }
        fn ring_call(&self, _call_id: u64, _position: LegPosition) -> Result<(), SwitchError> {
            Ok(())
        }
        fn release_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
            self.released.borrow_mut().push((call_id, position));
            Ok(())
        }
    }

    struct FailSipOriginator;
    impl SipOriginator for FailSipOriginator {
        fn originate(&self, _call_id: u64, _source: &str, _dest: &str) -> Result<(), SwitchError> {
            Err(SwitchError::Internal {
                detail: "should not be called".into(),
            })
        }
    }

    struct FailMnccOriginator;
    impl MnccOriginator for FailMnccOriginator {
        fn originate(&self, _call_id: u64, _source: &str, _dest: &str) -> Result<(), SwitchError> {
            Err(SwitchError::Internal {
                detail: "should not be called".into(),
            })
        }
    }

    fn mncc_leg(call_id: u64, position: LegPosition, released: Rc<RefCell<Vec<(u64, LegPosition)>>>) -> Leg {
        Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, position, Rc::new(RecordingCapabilities { released })),
            callref: 1,
            direction: Direction::Mo,
            sub_state: MnccSubState::Initial,
            called: AddressInfo {
                plan: AddressInfo::PLAN_ISDN,
                number_type: 0,
                number: "101".into(),
            },
            calling: AddressInfo {
                plan: AddressInfo::PLAN_ISDN,
                number_type: 0,
                number: "200".into(),
            },
            imsi: "111222333444555".into(),
            rsp_wanted: None,
        })
    }

    #[test]
    fn on_disconnect_releases_every_call_with_an_mncc_leg() {
        let registry = CallRegistry::new();
        let released = Rc::new(RefCell::new(Vec::new()));

        let id = registry.next_call_id();
        registry.insert(Call::new(
            id,
            mncc_leg(id, LegPosition::Initial, released.clone()),
            "200".into(),
            "101".into(),
        ));

        let policy = BridgingPolicy::new(registry, Rc::new(FailSipOriginator), Rc::new(FailMnccOriginator));
        policy.on_disconnect().unwrap();

        assert_eq!(released.borrow().as_slice(), &[(id, LegPosition::Initial)]);
    }
}
