//! MNCC 适配器：连接生命周期、帧分发、MO/MT 建立与能力实现（§4.1–§4.6）。
//!
//! [`MnccAdapter`] 既是 `spark_switch::LegCapabilities` 的 MNCC 侧实现（§4.5），
//! 也是 `spark_switch::MnccOriginator` 的实现（§4.4：MT 腿创建）。它自己持有
//! 一个到自身的 `Weak` 引用（通过 [`Rc::new_cyclic`] 构造），这样两个 trait
//! 实现里需要的 `Rc<dyn LegCapabilities>` 总能现取现用，而不必在每个调用点
//! 额外传一个 `Rc<Self>` 参数。

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use spark_switch::bridge::{BridgingPolicy, MnccOriginator};
use spark_switch::call::{truncate_identifier, Call, LegPosition};
use spark_switch::error::SwitchError;
use spark_switch::leg::{
    AddressInfo, Direction, Leg, LegCapabilities, LegCommon, MediaEndpoint, MnccLeg, MnccSubState,
};
use spark_switch::registry::CallRegistry;

use crate::connection::{connect_seqpacket, read_frame, try_write_frame, ConnState, ReconnectSchedule};
use crate::frame::{
    peek_msg_type, AddressField, ControlFrame, FrameError, HelloFrame, Progress, RtpFrame,
    ADDRESS_NUMBER_LEN, FIELD_CALLED, FIELD_CALLING, FIELD_PROGRESS, IMSI_LEN, MNCC_SOCK_VERSION,
    MSG_ALERT_IND, MSG_ALERT_REQ, MSG_CALL_CONF_IND, MSG_CALL_PROC_REQ, MSG_DISC_IND, MSG_DISC_REQ,
    MSG_HOLD_IND, MSG_HOLD_REJ, MSG_REJ_IND, MSG_REJ_REQ, MSG_REL_CNF, MSG_REL_IND, MSG_REL_REQ,
    MSG_RTP_CONNECT, MSG_RTP_CREATE, MSG_SETUP_CNF, MSG_SETUP_COMPL_IND, MSG_SETUP_COMPL_REQ,
    MSG_SETUP_IND, MSG_SETUP_REQ, MSG_SETUP_RSP, MSG_SOCKET_HELLO, MSG_START_DTMF_IND,
    MSG_START_DTMF_RSP, MSG_STOP_DTMF_IND, MSG_STOP_DTMF_RSP, PLAN_ISDN,
};

/// 计时器轮询间隔：§4.6 的截止时刻只需要在事件循环空闲时定期检查一次。
const TIMER_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// 单次读取缓冲区长度：三种帧形状中最大的一种（一般控制帧）。
const MAX_FRAME_LEN: usize = ControlFrame::WIRE_LEN;

/// 装配 [`MnccAdapter`] 所需的静态配置（§6）。
#[derive(Debug, Clone)]
pub struct MnccAdapterConfig {
    /// `SOCK_SEQPACKET` 套接字路径。
    pub socket_path: String,
    /// 为真时 MO 路由用 IMSI 作 `source`，MT `SETUP_REQ` 把 IMSI 填入 IMSI 字段（§4.3/§4.4）。
    pub use_imsi_as_id: bool,
}

struct ConnCell {
    state: ConnState,
    stream: Option<Rc<UnixStream>>,
    reconnect: ReconnectSchedule,
}

/// MNCC 适配器：单个 MNCC 套接字连接的全部状态与协议逻辑（§2 组件 3）。
pub struct MnccAdapter {
    self_weak: Weak<MnccAdapter>,
    registry: Rc<CallRegistry>,
    config: MnccAdapterConfig,
    conn: RefCell<ConnCell>,
    bridging: RefCell<Option<Rc<BridgingPolicy>>>,
}

impl std::fmt::Debug for MnccAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MnccAdapter")
            .field("socket_path", &self.config.socket_path)
            .field("state", &self.conn.borrow().state)
            .finish()
    }
}

impl MnccAdapter {
    /// 构造一个尚未连接的适配器。调用 [`MnccAdapter::run`] 驱动其生命周期。
    pub fn new(registry: Rc<CallRegistry>, config: MnccAdapterConfig) -> Rc<Self> {
        Rc::new_cyclic(|weak| MnccAdapter {
            self_weak: weak.clone(),
            registry,
            config,
            conn: RefCell::new(ConnCell {
                state: ConnState::Disconnected,
                stream: None,
                reconnect: ReconnectSchedule::new(),
            }),
            bridging: RefCell::new(None),
        })
    }

    /// 两个适配器都构造完成后，由 `spark-bridge` 注入桥接策略（§4.8）。
    pub fn set_bridging_policy(&self, policy: Rc<BridgingPolicy>) {
        *self.bridging.borrow_mut() = Some(policy);
    }

    fn rc(&self) -> Rc<Self> {
        self.self_weak.upgrade().expect("MnccAdapter outlives its own Rc")
    }

    fn capabilities(&self) -> Rc<dyn LegCapabilities> {
        self.rc()
    }

    fn is_ready(&self) -> bool {
        self.conn.borrow().state == ConnState::Ready
    }

    /// 主事件循环：连接、握手、读取、分发；任何失败都触发重连（§4.1，首次 0 秒，
    /// 此后 5 秒）。这个循环永不返回——核心没有全局关闭信号，见 §5。
    pub async fn run(self: Rc<Self>) {
        loop {
            let delay = self.conn.borrow_mut().reconnect.next_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match connect_seqpacket(&self.config.socket_path).await {
                Ok(stream) => {
                    info!(path = %self.config.socket_path, "MNCC socket connected, awaiting hello");
                    {
                        let mut conn = self.conn.borrow_mut();
                        conn.state = ConnState::WaitVersion;
                        conn.stream = Some(Rc::new(stream));
                    }
                    if let Err(err) = self.connection_loop().await {
                        warn!(%err, "MNCC connection closed");
                    }
                }
                Err(err) => {
                    warn!(%err, path = %self.config.socket_path, "failed to connect MNCC socket");
                }
            }
            self.close_connection();
        }
    }

    async fn connection_loop(&self) -> io::Result<()> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let mut tick = tokio::time::interval(TIMER_POLL_INTERVAL);
        loop {
            let stream = {
                let conn = self.conn.borrow();
                conn.stream.clone().expect("connection_loop requires a live stream")
            };
            tokio::select! {
                result = read_frame(&stream, &mut buf) => {
                    let n = result?;
                    if n == 0 {
                        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "MNCC peer closed the connection"));
                    }
                    if let Err(frame_err) = self.handle_frame(&buf[..n]) {
                        self.close_connection();
                        return Err(io::Error::new(io::ErrorKind::InvalidData, frame_err.to_string()));
                    }
                }
                _ = tick.tick() => {
                    self.fire_expired_timers();
                }
            }
            if self.conn.borrow().state == ConnState::Disconnected {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed during dispatch"));
            }
        }
    }

    /// 关闭连接并把状态清回 `DISCONNECTED`；幂等——第二次调用是空操作。断连
    /// 后驱动桥接策略释放所有携带 MNCC 腿的呼叫（§4.1/§4.8）。
    fn close_connection(&self) {
        let was_connected = {
            let mut conn = self.conn.borrow_mut();
            let was = conn.state != ConnState::Disconnected;
            conn.state = ConnState::Disconnected;
            conn.stream = None;
            was
        };
        if !was_connected {
            return;
        }
        let policy = self.bridging.borrow().clone();
        if let Some(policy) = policy {
            if let Err(err) = policy.on_disconnect() {
                warn!(%err, "bridging policy failed to release calls on MNCC disconnect");
            }
        }
    }

    fn fire_expired_timers(&self) {
        for (call_id, position) in self.registry.poll_expired_timers() {
            let peer = self
                .registry
                .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
                .flatten();
            if let Some(peer) = peer {
                if let Err(err) = peer.release_call(call_id, position.other()) {
                    warn!(%err, call_id, ?position, "failed to release peer leg after response timeout");
                }
            }
            self.registry.destroy_leg(call_id, position);
        }
    }

    fn mncc_callref(&self, call_id: u64, position: LegPosition) -> Option<u32> {
        self.registry
            .with_call(call_id, |call| call.leg(position).and_then(Leg::as_mncc).map(|leg| leg.callref))
            .flatten()
    }

    fn mark_in_release(&self, call_id: u64, position: LegPosition) {
        self.registry.with_call_mut(call_id, |call| {
            if let Some(leg) = call.leg_mut(position) {
                leg.common_mut().in_release = true;
            }
        });
    }

    fn send_control(&self, frame: &ControlFrame) {
        self.send_wire(&frame.encode());
    }

    fn send_rtp(&self, frame: &RtpFrame) {
        self.send_wire(&frame.encode());
    }

    /// 非阻塞地写出一帧；连接未就绪直接丢弃，写失败按 §7 关闭连接。
    fn send_wire(&self, wire: &[u8]) {
        let stream = self.conn.borrow().stream.clone();
        let Some(stream) = stream else {
            warn!("dropping outbound MNCC frame: connection not ready");
            return;
        };
        if let Err(err) = try_write_frame(&stream, wire) {
            warn!(%err, "MNCC write failed, closing connection");
            self.close_connection();
        }
    }

    /// 释放对端腿并销毁本腿，供计时器超时、`RTP_CONNECT` 失败、`REJ_IND` 共用
    /// （它们都遵循"释放对端，销毁本腿"这一相同级联）。
    fn release_both(&self, call_id: u64, position: LegPosition) {
        let peer = self
            .registry
            .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
            .flatten();
        if let Some(peer) = peer {
            if let Err(err) = peer.release_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to release peer leg");
            }
        }
        self.registry.destroy_leg(call_id, position);
    }

    /// 校验长度并按消息类型分派（§4.2/§6）。返回 `Err` 仅代表应当关闭连接的
    /// 成帧错误；业务层失败（关联丢失、状态不匹配）一律记录日志后继续。
    fn handle_frame(&self, raw: &[u8]) -> Result<(), FrameError> {
        let msg_type = peek_msg_type(raw).ok_or(FrameError::LengthMismatch { expected: 4, got: raw.len() })?;

        if self.conn.borrow().state == ConnState::WaitVersion {
            if msg_type != MSG_SOCKET_HELLO {
                warn!(msg_type, "non-hello frame received in WAIT_VERSION, closing connection");
                return Err(FrameError::LengthMismatch { expected: HelloFrame::WIRE_LEN, got: raw.len() });
            }
            let hello = HelloFrame::decode(raw)?;
            if hello.version != MNCC_SOCK_VERSION {
                warn!(got = hello.version, want = MNCC_SOCK_VERSION, "MNCC hello version mismatch");
                return Err(FrameError::LengthMismatch { expected: HelloFrame::WIRE_LEN, got: raw.len() });
            }
            self.conn.borrow_mut().state = ConnState::Ready;
            info!("MNCC connection ready");
            return Ok(());
        }

        match msg_type {
            MSG_SETUP_IND => self.on_setup_ind(ControlFrame::decode(raw)?),
            MSG_RTP_CREATE => self.on_rtp_create_response(RtpFrame::decode(raw)?),
            MSG_RTP_CONNECT => self.on_rtp_connect_response(RtpFrame::decode(raw)?),
            MSG_CALL_CONF_IND => self.on_call_conf_ind(ControlFrame::decode(raw)?),
            MSG_ALERT_IND => self.on_alert_ind(ControlFrame::decode(raw)?),
            MSG_SETUP_CNF => self.on_setup_cnf(ControlFrame::decode(raw)?),
            MSG_SETUP_COMPL_IND => self.on_setup_compl_ind(ControlFrame::decode(raw)?),
            MSG_DISC_IND => self.on_disc_ind(ControlFrame::decode(raw)?),
            MSG_REL_IND => self.on_rel_ind(ControlFrame::decode(raw)?),
            MSG_REL_CNF => self.on_rel_cnf(ControlFrame::decode(raw)?),
            MSG_REJ_IND => self.on_rej_ind(ControlFrame::decode(raw)?),
            MSG_HOLD_IND => self.on_hold_ind(ControlFrame::decode(raw)?),
            MSG_START_DTMF_IND => self.on_start_dtmf_ind(ControlFrame::decode(raw)?),
            MSG_STOP_DTMF_IND => self.on_stop_dtmf_ind(ControlFrame::decode(raw)?),
            MSG_SOCKET_HELLO => debug!("ignoring unsolicited SOCKET_HELLO outside WAIT_VERSION"),
            other => warn!(msg_type = other, "unknown MNCC message type, ignoring"),
        }
        Ok(())
    }

    /// §4.3 步骤 1–3：校验字段与编号计划，分配 MO 呼叫，发起 `RTP_CREATE`。
    fn on_setup_ind(&self, frame: ControlFrame) {
        if !frame.has_called() || !frame.has_calling() {
            warn!(callref = frame.callref, "SETUP_IND missing CALLED/CALLING, rejecting");
            self.send_control(&ControlFrame::bare(MSG_REJ_REQ, frame.callref));
            return;
        }
        if frame.called.plan != PLAN_ISDN {
            warn!(callref = frame.callref, plan = frame.called.plan, "SETUP_IND has non-ISDN numbering plan, rejecting");
            self.send_control(&ControlFrame::bare(MSG_REJ_REQ, frame.callref));
            return;
        }

        let call_id = self.registry.next_call_id();
        let leg = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Initial, self.capabilities()),
            callref: frame.callref,
            direction: Direction::Mo,
            sub_state: MnccSubState::Initial,
            called: AddressInfo {
                plan: frame.called.plan,
                number_type: frame.called.number_type,
                number: frame.called.number,
            },
            calling: AddressInfo {
                plan: frame.calling.plan,
                number_type: frame.calling.number_type,
                number: frame.calling.number,
            },
            imsi: frame.imsi,
            rsp_wanted: None,
        });
        self.registry.insert(Call::new(call_id, leg, String::new(), String::new()));

        self.send_rtp(&RtpFrame { msg_type: MSG_RTP_CREATE, callref: frame.callref, ..Default::default() });
        if let Err(err) = self.registry.start_cmd_timer(call_id, LegPosition::Initial, MSG_RTP_CREATE) {
            warn!(%err, call_id, "failed to arm RTP_CREATE timer for new MO leg");
        }
    }

    /// `RTP_CREATE` response: 记录本地媒体端点、停表，再按方向分别续接
    /// MO（§4.3）或 MT（§4.4a）流程。
    fn on_rtp_create_response(&self, frame: RtpFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "RTP_CREATE response for unknown callref, dropping");
            return;
        };
        if !self.registry.stop_cmd_timer(call_id, position, MSG_RTP_CREATE) {
            return;
        }

        let media = MediaEndpoint {
            ip: frame.ip,
            port: frame.port,
            payload_type: frame.payload_type,
            payload_msg_type: frame.payload_msg_type,
        };
        let direction = self
            .registry
            .with_call_mut(call_id, |call| {
                call.leg_mut(position).map(|leg| {
                    leg.set_media(media);
                    leg.as_mncc().map(|mncc| mncc.direction)
                })
            })
            .flatten()
            .flatten();

        match direction {
            Some(Direction::Mo) => self.continue_mo_call(call_id, position),
            Some(Direction::Mt) => self.continue_mt_call(call_id, position, media),
            None => warn!(call_id, ?position, "RTP_CREATE response resolved to a non-MNCC leg"),
        }
    }

    /// §4.3: send `CALL_PROC_REQ`, mark `PROCEEDING`, compute `source`/`dest`
    /// and hand the call to the bridging policy.
    fn continue_mo_call(&self, call_id: u64, position: LegPosition) {
        let Some(callref) = self.mncc_callref(call_id, position) else { return };
        self.send_control(&ControlFrame::bare(MSG_CALL_PROC_REQ, callref));

        let use_imsi = self.config.use_imsi_as_id;
        let route = self
            .registry
            .with_call_mut(call_id, |call| {
                let mncc = call.leg_mut(position).and_then(Leg::as_mncc_mut)?;
                mncc.sub_state = MnccSubState::Proceeding;
                Some(compute_mo_route(&mncc.called, &mncc.calling, &mncc.imsi, use_imsi))
            })
            .flatten();

        let Some((source, dest)) = route else { return };
        self.registry.with_call_mut(call_id, |call| {
            call.source = source.clone();
            call.dest = dest.clone();
        });

        match self.bridging.borrow().clone() {
            Some(policy) => {
                if let Err(err) = policy.route_call(call_id, &source, &dest) {
                    warn!(%err, call_id, "bridging policy failed to route MO call");
                }
            }
            None => warn!(call_id, "no bridging policy installed, cannot route MO call"),
        }
    }

    /// §4.4a: the MT leg's own payload type/message type is copied onto the
    /// *other* leg's media record; the SIP side's already-negotiated payload
    /// is assumed compatible and is not re-negotiated. No further network
    /// traffic is sent here — `CALL_CONF_IND` already armed this cycle, and
    /// `ALERT_IND`/`SETUP_CNF` continue the rest of the generic table.
    fn continue_mt_call(&self, call_id: u64, position: LegPosition, media: MediaEndpoint) {
        self.registry.with_call_mut(call_id, |call| {
            if let Some(mncc) = call.leg_mut(position).and_then(Leg::as_mncc_mut) {
                mncc.sub_state = MnccSubState::Proceeding;
            }
            if let Some(peer) = call.other_mut(position) {
                let mut peer_media = peer.media();
                peer_media.payload_type = media.payload_type;
                peer_media.payload_msg_type = media.payload_msg_type;
                peer.set_media(peer_media);
            }
        });
    }

    /// `RTP_CONNECT` response: non-zero ip/port/pt is an implicit positive
    /// ack (no action); all-zero signals failure. Per §9's Open Question, a
    /// failure for a leg that no longer exists (destroyed by a concurrent
    /// timer fire) is silently dropped — no cross-leg reconciliation.
    fn on_rtp_connect_response(&self, frame: RtpFrame) {
        if !frame.is_all_zero() {
            return;
        }
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "RTP_CONNECT failure for an already-destroyed leg, dropping");
            return;
        };
        self.release_both(call_id, position);
    }

    fn on_call_conf_ind(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            warn!(callref = frame.callref, "CALL_CONF_IND for unknown callref, rejecting");
            self.send_control(&ControlFrame::bare(MSG_REJ_REQ, frame.callref));
            return;
        };
        self.send_rtp(&RtpFrame { msg_type: MSG_RTP_CREATE, callref: frame.callref, ..Default::default() });
        if let Err(err) = self.registry.start_cmd_timer(call_id, position, MSG_RTP_CREATE) {
            warn!(%err, call_id, "failed to arm RTP_CREATE timer after CALL_CONF_IND");
        }
    }

    fn on_alert_ind(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "ALERT_IND for unknown callref, dropping");
            return;
        };
        let peer = self
            .registry
            .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
            .flatten();
        if let Some(peer) = peer {
            if let Err(err) = peer.ring_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to ring peer leg");
            }
        }
    }

    fn on_setup_cnf(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "SETUP_CNF for unknown callref, dropping");
            return;
        };
        let peer_media = self.registry.with_call(call_id, |call| call.other(position).map(Leg::media)).flatten();
        if let Some(peer_media) = peer_media {
            self.send_rtp(&RtpFrame {
                msg_type: MSG_RTP_CONNECT,
                callref: frame.callref,
                ip: peer_media.ip,
                port: peer_media.port,
                payload_type: peer_media.payload_type,
                payload_msg_type: peer_media.payload_msg_type,
            });
        }
        self.registry.with_call_mut(call_id, |call| {
            if let Some(mncc) = call.leg_mut(position).and_then(Leg::as_mncc_mut) {
                mncc.sub_state = MnccSubState::Connected;
            }
        });
        self.send_control(&ControlFrame::bare(MSG_SETUP_COMPL_REQ, frame.callref));
        let peer = self
            .registry
            .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
            .flatten();
        if let Some(peer) = peer {
            if let Err(err) = peer.connect_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to connect peer leg");
            }
        }
    }

    fn on_setup_compl_ind(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "SETUP_COMPL_IND for unknown callref, dropping");
            return;
        };
        self.registry.stop_cmd_timer(call_id, position, MSG_SETUP_COMPL_IND);
        self.registry.with_call_mut(call_id, |call| {
            if let Some(mncc) = call.leg_mut(position).and_then(Leg::as_mncc_mut) {
                mncc.sub_state = MnccSubState::Connected;
            }
        });
    }

    fn on_disc_ind(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            warn!(callref = frame.callref, "DISC_IND for unknown callref, rejecting");
            self.send_control(&ControlFrame::bare(MSG_REJ_REQ, frame.callref));
            return;
        };
        self.mark_in_release(call_id, position);
        if let Err(err) = self.registry.start_cmd_timer(call_id, position, MSG_REL_CNF) {
            warn!(%err, call_id, "failed to arm REL_CNF timer after DISC_IND");
        }
        self.send_control(&ControlFrame::bare(MSG_REL_REQ, frame.callref));
        let peer = self
            .registry
            .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
            .flatten();
        if let Some(peer) = peer {
            if let Err(err) = peer.release_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to release peer leg after DISC_IND");
            }
        }
    }

    fn on_rel_ind(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "REL_IND for unknown callref, dropping");
            return;
        };
        let already_releasing = self
            .registry
            .with_call(call_id, |call| call.leg(position).map(|leg| leg.common().in_release))
            .flatten()
            .unwrap_or(false);
        if already_releasing {
            self.registry.stop_cmd_timer(call_id, position, MSG_REL_IND);
        } else {
            let peer = self
                .registry
                .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
                .flatten();
            if let Some(peer) = peer {
                if let Err(err) = peer.release_call(call_id, position.other()) {
                    warn!(%err, call_id, "failed to release peer leg after REL_IND");
                }
            }
        }
        self.registry.destroy_leg(call_id, position);
    }

    fn on_rel_cnf(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "REL_CNF for unknown callref, dropping");
            return;
        };
        self.registry.stop_cmd_timer(call_id, position, MSG_REL_CNF);
        self.registry.destroy_leg(call_id, position);
    }

    fn on_rej_ind(&self, frame: ControlFrame) {
        let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) else {
            debug!(callref = frame.callref, "REJ_IND for unknown callref, dropping");
            return;
        };
        self.release_both(call_id, position);
    }

    /// Hold is rejected unconditionally (§4.8a Non-goal enforcement); state
    /// never changes regardless of whether a matching leg still exists.
    fn on_hold_ind(&self, frame: ControlFrame) {
        self.send_control(&ControlFrame::bare(MSG_HOLD_REJ, frame.callref));
    }

    fn on_start_dtmf_ind(&self, frame: ControlFrame) {
        if let Some((call_id, position)) = self.registry.find_mncc_leg_by_callref(frame.callref) {
            let key = frame.keypad as char;
            let peer = self
                .registry
                .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
                .flatten();
            if let Some(peer) = peer {
                if let Err(err) = peer.dtmf(call_id, position.other(), key) {
                    warn!(%err, call_id, "failed to forward DTMF to peer leg");
                }
            }
        } else {
            debug!(callref = frame.callref, "START_DTMF_IND for unknown callref, echoing RSP without forwarding");
        }
        let mut rsp = ControlFrame::bare(MSG_START_DTMF_RSP, frame.callref);
        rsp.keypad = frame.keypad;
        self.send_control(&rsp);
    }

    fn on_stop_dtmf_ind(&self, frame: ControlFrame) {
        let mut rsp = ControlFrame::bare(MSG_STOP_DTMF_RSP, frame.callref);
        rsp.keypad = frame.keypad;
        self.send_control(&rsp);
    }
}

/// §4.3: `dest` is `"+" + called.number` for international numbers else the
/// number itself, truncated to 32 bytes; `source` is the 16-char IMSI when
/// `use_imsi_as_id` else the calling number, truncated to 32 bytes.
fn compute_mo_route(called: &AddressInfo, calling: &AddressInfo, imsi: &str, use_imsi_as_id: bool) -> (String, String) {
    let dest = if called.is_international() {
        truncate_identifier(&format!("+{}", called.number), ADDRESS_NUMBER_LEN)
    } else {
        truncate_identifier(&called.number, ADDRESS_NUMBER_LEN)
    };
    let source = if use_imsi_as_id {
        truncate_identifier(imsi, IMSI_LEN)
    } else {
        truncate_identifier(&calling.number, ADDRESS_NUMBER_LEN)
    };
    (source, dest)
}

impl LegCapabilities for MnccAdapter {
    /// §4.5 `connect_call`: send `RTP_CONNECT` with the peer's endpoint, send
    /// `SETUP_RSP`, arm the `SETUP_COMPL_IND` timer.
    fn connect_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
        let Some(callref) = self.mncc_callref(call_id, position) else {
            return Err(SwitchError::LegNotFound { call_id, position });
        };
        if !self.is_ready() {
            warn!(call_id, ?position, "connect_call requested with MNCC connection not ready, dropping");
            return Ok(());
        }
        let peer_media = self
            .registry
            .with_call(call_id, |call| call.other(position).map(Leg::media))
            .flatten()
            .unwrap_or_default();
        self.send_rtp(&RtpFrame {
            msg_type: MSG_RTP_CONNECT,
            callref,
            ip: peer_media.ip,
            port: peer_media.port,
            payload_type: peer_media.payload_type,
            payload_msg_type: peer_media.payload_msg_type,
        });
        self.send_control(&ControlFrame::bare(MSG_SETUP_RSP, callref));
        self.registry.start_cmd_timer(call_id, position, MSG_SETUP_COMPL_IND)
    }

    /// §4.5 `ring_call`: send `ALERT_REQ` with the fixed progress indicator
    /// (coding=3, location=1, descriptor=8); also send `RTP_CONNECT` if the
    /// peer's endpoint is already known.
    fn ring_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
        let Some(callref) = self.mncc_callref(call_id, position) else {
            return Err(SwitchError::LegNotFound { call_id, position });
        };
        if !self.is_ready() {
            warn!(call_id, ?position, "ring_call requested with MNCC connection not ready, dropping");
            return Ok(());
        }
        let mut frame = ControlFrame::bare(MSG_ALERT_REQ, callref);
        frame.fields = FIELD_PROGRESS;
        frame.progress = Progress { coding: 3, location: 1, descriptor: 8 };
        self.send_control(&frame);

        let peer_media = self.registry.with_call(call_id, |call| call.other(position).map(Leg::media)).flatten();
        if let Some(peer_media) = peer_media {
            if peer_media.ip != 0 && peer_media.port != 0 {
                self.send_rtp(&RtpFrame {
                    msg_type: MSG_RTP_CONNECT,
                    callref,
                    ip: peer_media.ip,
                    port: peer_media.port,
                    payload_type: peer_media.payload_type,
                    payload_msg_type: peer_media.payload_msg_type,
                });
            }
        }
        Ok(())
    }

    /// §4.5 `release_call`: not-ready destroys locally without sending;
    /// otherwise branches on direction/sub-state exactly as the dispatch
    /// table requires.
    fn release_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
        let Some(callref) = self.mncc_callref(call_id, position) else {
            return Err(SwitchError::LegNotFound { call_id, position });
        };
        let already_releasing = self
            .registry
            .with_call(call_id, |call| call.leg(position).map(|leg| leg.common().in_release))
            .flatten()
            .unwrap_or(false);
        if already_releasing {
            return Err(SwitchError::AlreadyReleasing { call_id, position });
        }

        if !self.is_ready() {
            self.registry.destroy_leg(call_id, position);
            return Ok(());
        }

        let state = self
            .registry
            .with_call(call_id, |call| call.leg(position).and_then(Leg::as_mncc).map(|leg| (leg.direction, leg.sub_state)))
            .flatten()
            .ok_or(SwitchError::LegNotFound { call_id, position })?;

        match state {
            (Direction::Mo, MnccSubState::Initial) => {
                self.send_control(&ControlFrame::bare(MSG_REJ_REQ, callref));
                self.registry.destroy_leg(call_id, position);
            }
            (Direction::Mt, MnccSubState::Initial) => {
                self.mark_in_release(call_id, position);
                self.registry.start_cmd_timer(call_id, position, MSG_REL_CNF)?;
                self.send_control(&ControlFrame::bare(MSG_REL_REQ, callref));
            }
            (_, MnccSubState::Proceeding) | (_, MnccSubState::Connected) => {
                self.mark_in_release(call_id, position);
                self.registry.start_cmd_timer(call_id, position, MSG_REL_IND)?;
                self.send_control(&ControlFrame::bare(MSG_DISC_REQ, callref));
            }
        }
        Ok(())
    }
}

impl MnccOriginator for MnccAdapter {
    /// §4.4: allocate an MT `MnccLeg` attached to `call_id` and send
    /// `SETUP_REQ`. The callref is the call id itself ("equal to the call id
    /// is acceptable" per §4.4).
    fn originate(&self, call_id: u64, source: &str, dest: &str) -> Result<(), SwitchError> {
        let callref = call_id as u32;
        let calling_number = truncate_identifier(source, ADDRESS_NUMBER_LEN);
        let (called_number, imsi) = if self.config.use_imsi_as_id {
            (String::new(), truncate_identifier(dest, IMSI_LEN))
        } else {
            (truncate_identifier(dest, ADDRESS_NUMBER_LEN), String::new())
        };

        let leg = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Remote, self.capabilities()),
            callref,
            direction: Direction::Mt,
            sub_state: MnccSubState::Initial,
            called: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: called_number.clone() },
            calling: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: calling_number.clone() },
            imsi: imsi.clone(),
            rsp_wanted: None,
        });
        self.registry.attach_remote(call_id, leg)?;

        let mut frame = ControlFrame::bare(MSG_SETUP_REQ, callref);
        frame.fields = FIELD_CALLED | FIELD_CALLING;
        frame.called = AddressField { plan: PLAN_ISDN, number_type: 0, number: called_number };
        frame.calling = AddressField { plan: PLAN_ISDN, number_type: 0, number: calling_number };
        frame.imsi = imsi;
        self.send_control(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_adapter() -> Rc<MnccAdapter> {
        MnccAdapter::new(
            CallRegistry::new(),
            MnccAdapterConfig { socket_path: "/tmp/spark-mncc-test.sock".into(), use_imsi_as_id: false },
        )
    }

    fn setup_ind_frame(callref: u32, called: &str, calling: &str) -> ControlFrame {
        ControlFrame {
            msg_type: MSG_SETUP_IND,
            callref,
            fields: FIELD_CALLED | FIELD_CALLING,
            called: AddressField { plan: PLAN_ISDN, number_type: 0, number: called.to_owned() },
            calling: AddressField { plan: PLAN_ISDN, number_type: 0, number: calling.to_owned() },
            imsi: "111222333444555".to_owned(),
            keypad: 0,
            progress: Progress { coding: 0, location: 0, descriptor: 0 },
        }
    }

    #[test]
    fn wait_version_rejects_non_hello_frame() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::WaitVersion;
        let frame = RtpFrame { msg_type: MSG_RTP_CREATE, ..Default::default() }.encode();
        let err = adapter.handle_frame(&frame).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
        assert_eq!(adapter.conn.borrow().state, ConnState::WaitVersion);
    }

    #[test]
    fn wait_version_rejects_wrong_protocol_version() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::WaitVersion;
        let mut buf = Vec::new();
        buf.extend_from_slice(&MSG_SOCKET_HELLO.to_be_bytes());
        buf.extend_from_slice(&(MNCC_SOCK_VERSION + 1).to_be_bytes());
        assert!(adapter.handle_frame(&buf).is_err());
    }

    #[test]
    fn wait_version_accepts_matching_hello() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::WaitVersion;
        let mut buf = Vec::new();
        buf.extend_from_slice(&MSG_SOCKET_HELLO.to_be_bytes());
        buf.extend_from_slice(&MNCC_SOCK_VERSION.to_be_bytes());
        adapter.handle_frame(&buf).unwrap();
        assert_eq!(adapter.conn.borrow().state, ConnState::Ready);
    }

    #[test]
    fn setup_ind_creates_mo_call_and_arms_rtp_create_timer() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::Ready;
        let frame = setup_ind_frame(42, "101", "200");
        adapter.handle_frame(&frame.encode()).unwrap();

        let call_id = adapter.registry.call_ids()[0];
        let has_timer = adapter
            .registry
            .with_call(call_id, |call| call.initial.as_mncc().unwrap().rsp_wanted.is_some())
            .unwrap();
        assert!(has_timer);
    }

    #[test]
    fn setup_ind_rejects_non_isdn_plan() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::Ready;
        let mut frame = setup_ind_frame(1, "101", "200");
        frame.called.plan = 2;
        adapter.handle_frame(&frame.encode()).unwrap();
        assert!(adapter.registry.call_ids().is_empty());
    }

    #[test]
    fn setup_ind_rejects_missing_calling_field() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::Ready;
        let mut frame = setup_ind_frame(1, "101", "200");
        frame.fields = FIELD_CALLED;
        adapter.handle_frame(&frame.encode()).unwrap();
        assert!(adapter.registry.call_ids().is_empty());
    }

    #[test]
    fn compute_mo_route_prefixes_international_numbers() {
        let called = AddressInfo { plan: PLAN_ISDN, number_type: AddressInfo::TYPE_INTERNATIONAL, number: "491701234".into() };
        let calling = AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "200".into() };
        let (source, dest) = compute_mo_route(&called, &calling, "111222333444555", false);
        assert_eq!(dest, "+491701234");
        assert_eq!(source, "200");
    }

    #[test]
    fn compute_mo_route_uses_imsi_when_configured() {
        let called = AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "101".into() };
        let calling = AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "200".into() };
        let (source, dest) = compute_mo_route(&called, &calling, "111222333444555", true);
        assert_eq!(dest, "101");
        assert_eq!(source, "111222333444555");
    }

    #[test]
    fn release_call_when_not_ready_destroys_leg_immediately() {
        let adapter = test_adapter();
        let call_id = adapter.registry.next_call_id();
        let leg = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Initial, adapter.capabilities()),
            callref: 7,
            direction: Direction::Mo,
            sub_state: MnccSubState::Connected,
            called: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "101".into() },
            calling: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "200".into() },
            imsi: String::new(),
            rsp_wanted: None,
        });
        adapter.registry.insert(Call::new(call_id, leg, "200".into(), "101".into()));

        adapter.release_call(call_id, LegPosition::Initial).unwrap();
        assert!(adapter.registry.with_call(call_id, |_| ()).is_none());
    }

    #[test]
    fn release_call_rejects_second_local_release() {
        let adapter = test_adapter();
        adapter.conn.borrow_mut().state = ConnState::Ready;
        let call_id = adapter.registry.next_call_id();
        let leg = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Initial, adapter.capabilities()),
            callref: 7,
            direction: Direction::Mo,
            sub_state: MnccSubState::Connected,
            called: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "101".into() },
            calling: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "200".into() },
            imsi: String::new(),
            rsp_wanted: None,
        });
        adapter.registry.insert(Call::new(call_id, leg, "200".into(), "101".into()));

        adapter.release_call(call_id, LegPosition::Initial).unwrap();
        let err = adapter.release_call(call_id, LegPosition::Initial).unwrap_err();
        assert!(matches!(err, SwitchError::AlreadyReleasing { .. }));
    }

    #[test]
    fn continue_mt_call_copies_payload_type_onto_peer_leg() {
        let adapter = test_adapter();
        let call_id = adapter.registry.next_call_id();
        let sip_capabilities = adapter.capabilities();
        let initial = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Initial, sip_capabilities.clone()),
            callref: 1,
            direction: Direction::Mo,
            sub_state: MnccSubState::Connected,
            called: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "101".into() },
            calling: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "200".into() },
            imsi: String::new(),
            rsp_wanted: None,
        });
        adapter.registry.insert(Call::new(call_id, initial, "200".into(), "101".into()));
        let remote = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Remote, sip_capabilities),
            callref: 2,
            direction: Direction::Mt,
            sub_state: MnccSubState::Initial,
            called: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "101".into() },
            calling: AddressInfo { plan: PLAN_ISDN, number_type: 0, number: "200".into() },
            imsi: String::new(),
            rsp_wanted: None,
        });
        adapter.registry.attach_remote(call_id, remote).unwrap();
        adapter.registry.with_call_mut(call_id, |call| {
            call.initial.set_media(MediaEndpoint { ip: 0x0a00_0001, port: 20000, payload_type: 8, payload_msg_type: 0 });
        });

        let mt_media = MediaEndpoint { ip: 0x0a00_0002, port: 16384, payload_type: 3, payload_msg_type: 1 };
        adapter.continue_mt_call(call_id, LegPosition::Remote, mt_media);

        let peer_media = adapter.registry.with_call(call_id, |call| call.initial.media()).unwrap();
        assert_eq!(peer_media.payload_type, 3);
        assert_eq!(peer_media.payload_msg_type, 1);
        assert_eq!(peer_media.ip, 0x0a00_0001, "peer's own address must not be overwritten");
    }

    #[tokio::test]
    async fn setup_ind_sends_rtp_create_over_the_wire() {
        let (local, remote) = UnixStream::pair().unwrap();
        let adapter = test_adapter();
        {
            let mut conn = adapter.conn.borrow_mut();
            conn.state = ConnState::Ready;
            conn.stream = Some(Rc::new(local));
        }

        adapter.handle_frame(&setup_ind_frame(42, "101", "200").encode()).unwrap();

        remote.readable().await.unwrap();
        let mut buf = [0u8; RtpFrame::WIRE_LEN];
        let n = remote.try_read(&mut buf).unwrap();
        let got = RtpFrame::decode(&buf[..n]).unwrap();
        assert_eq!(got.msg_type, MSG_RTP_CREATE);
        assert_eq!(got.callref, 42);
    }

    #[tokio::test]
    async fn hold_ind_always_replies_hold_rej() {
        let (local, remote) = UnixStream::pair().unwrap();
        let adapter = test_adapter();
        {
            let mut conn = adapter.conn.borrow_mut();
            conn.state = ConnState::Ready;
            conn.stream = Some(Rc::new(local));
        }

        let mut frame = ControlFrame::bare(MSG_HOLD_IND, 99);
        frame.msg_type = MSG_HOLD_IND;
        adapter.handle_frame(&frame.encode()).unwrap();

        remote.readable().await.unwrap();
        let mut buf = [0u8; ControlFrame::WIRE_LEN];
        let n = remote.try_read(&mut buf).unwrap();
        let got = ControlFrame::decode(&buf[..n]).unwrap();
        assert_eq!(got.msg_type, MSG_HOLD_REJ);
        assert_eq!(got.callref, 99);
    }
}
