//! 全局呼叫登记表。
//!
//! # 教案式说明
//! - **意图 (Why)**：§5 要求单一协作式事件循环、无共享内存并发；把这一点做成
//!   编译期事实而非约定，登记表选用 `Rc<RefCell<HashMap<...>>>`，而不是
//!   `Arc`/`Mutex` 或 `dashmap`（后者是教师原始 `SessionManager` 的选择）。
//! - **契约 (What)**：所有成员变更只能发生在事件循环上下文；迭代顺序不可观察。
//! - **取舍 (Trade-offs)**：放弃跨线程可用性换取"单线程"不变式的类型系统保证，
//!   见 DESIGN.md 的 Open Question 记录。

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Instant;
use std::{collections::HashMap, time::Duration};

use tracing::warn;

use crate::call::{Call, LegPosition};
use crate::error::SwitchError;
use crate::leg::{Leg, PendingResponse};
use crate::timer::TimerScheduler;

/// 每条未完成响应的固定截止期限（§4.6）。
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// 进程范围内的活动呼叫集合，按 id 提供查找。
#[derive(Debug)]
pub struct CallRegistry {
    calls: RefCell<HashMap<u64, Call>>,
    next_id: RefCell<u64>,
    timers: RefCell<TimerScheduler>,
}

impl CallRegistry {
    /// 构造一个空登记表，以 `Rc` 形式共享给各协议适配器。
    pub fn new() -> Rc<Self> {
        Rc::new(CallRegistry {
            calls: RefCell::new(HashMap::new()),
            next_id: RefCell::new(1),
            timers: RefCell::new(TimerScheduler::new()),
        })
    }

    /// 分配下一个呼叫 id，在登记表生命周期内保证唯一。
    pub fn next_call_id(&self) -> u64 {
        let mut next_id = self.next_id.borrow_mut();
        let id = *next_id;
        *next_id += 1;
        id
    }

    /// 登记一个新创建的呼叫。
    pub fn insert(&self, call: Call) {
        self.calls.borrow_mut().insert(call.id, call);
    }

    /// 移除并返回一个呼叫（呼叫两条腿均已释放后调用）。
    pub fn remove(&self, call_id: u64) -> Option<Call> {
        self.timers.borrow_mut().forget(call_id, LegPosition::Initial);
        self.timers.borrow_mut().forget(call_id, LegPosition::Remote);
        self.calls.borrow_mut().remove(&call_id)
    }

    /// 当前所有呼叫 id 的快照（迭代顺序不可观察，§3）。
    pub fn call_ids(&self) -> Vec<u64> {
        self.calls.borrow().keys().copied().collect()
    }

    /// 以只读方式访问一个呼叫。
    pub fn with_call<R>(&self, call_id: u64, f: impl FnOnce(&Call) -> R) -> Option<R> {
        self.calls.borrow().get(&call_id).map(f)
    }

    /// 以可变方式访问一个呼叫。
    pub fn with_call_mut<R>(&self, call_id: u64, f: impl FnOnce(&mut Call) -> R) -> Option<R> {
        self.calls.borrow_mut().get_mut(&call_id).map(f)
    }

    /// 写入 `remote` 腿；若已存在则报错（§3：`remote` 一旦写入不再替换）。
    pub fn attach_remote(&self, call_id: u64, leg: Leg) -> Result<(), SwitchError> {
        let mut calls = self.calls.borrow_mut();
        let call = calls
            .get_mut(&call_id)
            .ok_or(SwitchError::CallNotFound { call_id })?;
        if call.remote.is_some() {
            return Err(SwitchError::RemoteLegAlreadyPresent { call_id });
        }
        call.remote = Some(leg);
        Ok(())
    }

    /// 装配一个响应计时器：5 秒后到期，期望收到 `expected` 类型的响应
    /// （仅 MNCC 腿持有 `rsp_wanted`，§3/§4.6）。
    pub fn start_cmd_timer(&self, call_id: u64, position: LegPosition, expected: u32) -> Result<(), SwitchError> {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        let set = self.with_call_mut(call_id, |call| {
            call.leg_mut(position)
                .and_then(Leg::as_mncc_mut)
                .map(|leg| leg.rsp_wanted = Some(PendingResponse { expected, deadline }))
        });
        match set {
            Some(Some(())) => {
                self.timers.borrow_mut().arm(call_id, position, deadline);
                Ok(())
            }
            Some(None) => Err(SwitchError::Internal {
                detail: format!("leg at {position:?} of call `{call_id}` is not an MNCC leg"),
            }),
            None => Err(SwitchError::LegNotFound { call_id, position }),
        }
    }

    /// 撤销一个响应计时器。只有 `got == rsp_wanted.expected` 才成功；否则
    /// 记录日志并保持计时器继续运行——这是对乱序响应的防御姿态，按 §9
    /// 必须原样保留，而不是一个 bug。
    pub fn stop_cmd_timer(&self, call_id: u64, position: LegPosition, got: u32) -> bool {
        let matched = self.with_call_mut(call_id, |call| {
            let Some(leg) = call.leg_mut(position).and_then(Leg::as_mncc_mut) else {
                return false;
            };
            match leg.rsp_wanted {
                Some(pending) if pending.expected == got => {
                    leg.rsp_wanted = None;
                    true
                }
                Some(pending) => {
                    warn!(
                        call_id,
                        ?position,
                        expected = pending.expected,
                        got,
                        "out-of-order MNCC response, leaving timer running"
                    );
                    false
                }
                None => false,
            }
        });
        let matched = matched.unwrap_or(false);
        if matched {
            self.timers.borrow_mut().disarm(call_id, position);
        }
        matched
    }

    /// 标记 `(call_id, position)` 的腿已完全销毁（协议适配器不会再为它收发
    /// 任何报文），并在两条腿都销毁后把呼叫整体从登记表移除。返回呼叫是否
    /// 因此被移除。
    ///
    /// 这是呼叫腿生命周期的唯一终点：无论是正常释放握手完成、响应超时
    /// （§4.6）、还是 MNCC 连接断开级联（§4.1/§4.8），协议适配器最终都通过
    /// 这一方法把腿标记为销毁，而不是各自发明临时的"移除"约定。
    pub fn destroy_leg(&self, call_id: u64, position: LegPosition) -> bool {
        self.timers.borrow_mut().disarm(call_id, position);
        let fully_destroyed = self.with_call_mut(call_id, |call| {
            if let Some(leg) = call.leg_mut(position) {
                leg.common_mut().destroyed = true;
                if let Some(mncc) = leg.as_mncc_mut() {
                    mncc.rsp_wanted = None;
                }
            }
            call.fully_destroyed()
        });
        if fully_destroyed == Some(true) {
            self.remove(call_id);
            true
        } else {
            false
        }
    }

    /// 按 `callref` 在所有呼叫的两个位置中查找一条 MNCC 呼叫腿（§4.2："Leg
    /// lookup is by callref across both initial and remote positions"）。
    pub fn find_mncc_leg_by_callref(&self, callref: u32) -> Option<(u64, LegPosition)> {
        let calls = self.calls.borrow();
        for call in calls.values() {
            for position in [LegPosition::Initial, LegPosition::Remote] {
                if let Some(leg) = call.leg(position).and_then(Leg::as_mncc) {
                    if leg.callref == callref {
                        return Some((call.id, position));
                    }
                }
            }
        }
        None
    }

    /// 轮询所有已到期（且仍然当前）的计时器。调用方负责据此执行释放级联
    /// （§4.6：对端被释放，本腿被销毁）。
    pub fn poll_expired_timers(&self) -> Vec<(u64, LegPosition)> {
        let fired = self.timers.borrow_mut().poll_expired(Instant::now());
        for &(call_id, position) in &fired {
            self.with_call_mut(call_id, |call| {
                if let Some(leg) = call.leg_mut(position).and_then(Leg::as_mncc_mut) {
                    leg.rsp_wanted = None;
                }
            });
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::leg::{AddressInfo, Direction, LegCommon, MnccLeg, MnccSubState};
    use std::fmt;

    #[derive(Debug)]
    struct NoopCapabilities;

    impl fmt::Display for NoopCapabilities {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "noop")
        }
    }

    impl crate::leg::LegCapabilities for NoopCapabilities {
        fn connect_call(&self, _call_id: u64, _position: LegPosition) -> Result<(), SwitchError> {
            Ok(())
        }
        fn ring_call(&self, _call_id: u64, _position: LegPosition) -> Result<(), SwitchError> {
            Ok(())
        }
        fn release_call(&self, _call_id: u64, _position: LegPosition) -> Result<(), SwitchError> {
            Ok(())
        }
    }

    fn mncc_leg(call_id: u64, position: LegPosition, callref: u32) -> Leg {
        Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, position, Rc::new(NoopCapabilities)),
            callref,
            direction: Direction::Mo,
            sub_state: MnccSubState::Initial,
            called: AddressInfo {
                plan: AddressInfo::PLAN_ISDN,
                number_type: 0,
                number: "101".to_owned(),
            },
            calling: AddressInfo {
                plan: AddressInfo::PLAN_ISDN,
                number_type: 0,
                number: "200".to_owned(),
            },
            imsi: "111222333444555".to_owned(),
            rsp_wanted: None,
        })
    }

    #[test]
    fn start_then_stop_cmd_timer_clears_rsp_wanted() {
        let registry = CallRegistry::new();
        let id = registry.next_call_id();
        registry.insert(Call::new(id, mncc_leg(id, LegPosition::Initial, 42), "200".into(), "101".into()));

        registry.start_cmd_timer(id, LegPosition::Initial, 7).unwrap();
        let has_timer = registry
            .with_call(id, |call| call.initial.as_mncc().unwrap().rsp_wanted.is_some())
            .unwrap();
        assert!(has_timer);

        assert!(registry.stop_cmd_timer(id, LegPosition::Initial, 7));
        let has_timer = registry
            .with_call(id, |call| call.initial.as_mncc().unwrap().rsp_wanted.is_some())
            .unwrap();
        assert!(!has_timer);
    }

    #[test]
    fn stop_cmd_timer_with_wrong_type_leaves_timer_running() {
        let registry = CallRegistry::new();
        let id = registry.next_call_id();
        registry.insert(Call::new(id, mncc_leg(id, LegPosition::Initial, 42), "200".into(), "101".into()));

        registry.start_cmd_timer(id, LegPosition::Initial, 7).unwrap();
        assert!(!registry.stop_cmd_timer(id, LegPosition::Initial, 99));
        let still_running = registry
            .with_call(id, |call| call.initial.as_mncc().unwrap().rsp_wanted.is_some())
            .unwrap();
        assert!(still_running);
    }

    #[test]
    fn destroy_leg_removes_call_with_no_remote_leg() {
        let registry = CallRegistry::new();
        let id = registry.next_call_id();
        registry.insert(Call::new(id, mncc_leg(id, LegPosition::Initial, 42), "200".into(), "101".into()));

        assert!(registry.destroy_leg(id, LegPosition::Initial));
        assert!(registry.with_call(id, |_| ()).is_none());
    }

    #[test]
    fn destroy_leg_waits_for_both_legs_once_remote_is_attached() {
        let registry = CallRegistry::new();
        let id = registry.next_call_id();
        registry.insert(Call::new(id, mncc_leg(id, LegPosition::Initial, 42), "200".into(), "101".into()));
        registry.attach_remote(id, mncc_leg(id, LegPosition::Remote, 43)).unwrap();

        assert!(!registry.destroy_leg(id, LegPosition::Initial));
        assert!(registry.with_call(id, |_| ()).is_some());

        assert!(registry.destroy_leg(id, LegPosition::Remote));
        assert!(registry.with_call(id, |_| ()).is_none());
    }

    #[test]
    fn find_mncc_leg_by_callref_searches_both_positions() {
        let registry = CallRegistry::new();
        let id = registry.next_call_id();
        registry.insert(Call::new(id, mncc_leg(id, LegPosition::Initial, 42), "200".into(), "101".into()));
        registry.attach_remote(id, mncc_leg(id, LegPosition::Remote, 43)).unwrap();

        assert_eq!(registry.find_mncc_leg_by_callref(42), Some((id, LegPosition::Initial)));
        assert_eq!(registry.find_mncc_leg_by_callref(43), Some((id, LegPosition::Remote)));
        assert_eq!(registry.find_mncc_leg_by_callref(99), None);
    }

    #[test]
    fn attach_remote_rejects_second_write() {
        let registry = CallRegistry::new();
        let id = registry.next_call_id();
        registry.insert(Call::new(id, mncc_leg(id, LegPosition::Initial, 42), "200".into(), "101".into()));

        registry.attach_remote(id, mncc_leg(id, LegPosition::Remote, 43)).unwrap();
        let result = registry.attach_remote(id, mncc_leg(id, LegPosition::Remote, 44));
        assert!(matches!(result, Err(SwitchError::RemoteLegAlreadyPresent { .. })));
    }
}
