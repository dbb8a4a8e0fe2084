//! SIP 适配器：出站 INVITE 创建、响应/请求分发与三态呼叫腿自动机（§4.7）。
//!
//! [`SipAdapter`] 既是 `spark_switch::LegCapabilities` 的 SIP 侧实现，也是
//! `spark_switch::bridge::SipOriginator` 的实现（§4.8 默认路由："MNCC 侧受理
//! 的呼叫在 SIP 侧创建出站腿"）。和 `spark-mncc::MnccAdapter` 一样，它通过
//! `Rc::new_cyclic` 持有一个到自身的 `Weak` 引用，这样两个 trait 实现里需要
//! 的 `Rc<dyn LegCapabilities>` 总能现取现用。
//!
//! 这个部署里没有 SIP 发起入站呼叫的路径（唯一入口是 MNCC 的
//! `SETUP_IND`，见 `app_setup` 只挂了 MNCC 断线回调），所以 `ring_call`/
//! `connect_call` 这两个能力方法在 SIP 侧永远不会被外部调用——呼叫腿的前进
//! 完全由本模块自己的响应分发驱动。保留这两个方法的实现只是为了满足
//! `LegCapabilities` 的签名与对称性。

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use spark_codec_sdp::{negotiate_answer, parse_sdp, render_offer};
use spark_codec_sip::{
    parse_request, parse_response, render_request, write_response, Header, Method, NameAddr,
    RequestParts, SipMessage, SipScheme, SipUri, StartLine, StatusLine,
};
use spark_mncc::codec_table::codec_name;
use spark_switch::bridge::SipOriginator;
use spark_switch::call::{truncate_identifier, LegPosition};
use spark_switch::error::SwitchError;
use spark_switch::leg::{Leg, LegCapabilities, LegCommon, MediaEndpoint, SipLeg, SipSubState};
use spark_switch::registry::CallRegistry;

use crate::dialog::SipDialogState;
use crate::transport::SipTransport;

/// 单次接收缓冲区长度：足够容纳一条带 SDP body 的 INVITE/200 OK。
const MAX_DATAGRAM_LEN: usize = 4096;

/// 装配 [`SipAdapter`] 所需的静态配置（§6）。
#[derive(Debug, Clone)]
pub struct SipAdapterConfig {
    /// 本地 UDP 绑定地址。
    pub local_addr: Ipv4Addr,
    /// 本地 UDP 绑定端口。
    pub local_port: u16,
    /// 远端 SIP 对端地址。
    pub remote_addr: Ipv4Addr,
    /// 远端 SIP 对端端口。
    pub remote_port: u16,
    /// 出站 SDP offer 里 `o=` 行使用的产品名。
    pub product: String,
}

impl SipAdapterConfig {
    /// 监听地址的展示形式：`0.0.0.0` 映射为 `*`（§4.7a `make_sip_uri`），
    /// 仅用于启动日志，不参与 From/To/SDP 的实际地址构造。
    pub fn listening_uri(&self) -> String {
        let host = if self.local_addr.is_unspecified() {
            "*".to_owned()
        } else {
            self.local_addr.to_string()
        };
        format!("sip:{host}:{port}", port = self.local_port)
    }
}

/// SIP 适配器：一个 UDP 套接字上的全部对话状态与协议逻辑（§2 组件 4）。
#[derive(Debug)]
pub struct SipAdapter {
    self_weak: Weak<SipAdapter>,
    registry: Rc<CallRegistry>,
    config: SipAdapterConfig,
    transport: SipTransport,
    dialogs: RefCell<HashMap<u64, SipDialogState>>,
}

impl SipAdapter {
    /// 同步绑定 UDP 套接字并构造适配器。调用 [`SipAdapter::run`] 驱动其生命周期。
    pub fn new(registry: Rc<CallRegistry>, config: SipAdapterConfig) -> io::Result<Rc<Self>> {
        let bind_addr = SocketAddr::new(config.local_addr.into(), config.local_port);
        let std_socket = std::net::UdpSocket::bind(bind_addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = tokio::net::UdpSocket::from_std(std_socket)?;
        let transport = SipTransport::new(socket);

        Ok(Rc::new_cyclic(|weak| SipAdapter {
            self_weak: weak.clone(),
            registry,
            config,
            transport,
            dialogs: RefCell::new(HashMap::new()),
        }))
    }

    fn rc(&self) -> Rc<Self> {
        self.self_weak.upgrade().expect("SipAdapter outlives its own Rc")
    }

    fn capabilities(&self) -> Rc<dyn LegCapabilities> {
        self.rc()
    }

    /// 主事件循环：接收数据报，按请求/响应分类分发。这个循环永不返回——核心
    /// 没有全局关闭信号，见 §5。
    pub async fn run(self: Rc<Self>) {
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            let (len, from) = match self.transport.recv_from(&mut buf).await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "SIP UDP recv failed");
                    continue;
                }
            };
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                debug!(%from, "dropping non-UTF8 SIP datagram");
                continue;
            };
            self.handle_datagram(text, from);
        }
    }

    fn handle_datagram(&self, text: &str, from: SocketAddr) {
        if text.starts_with("SIP/2.0") {
            match parse_response(text) {
                Ok(msg) => self.handle_response(msg),
                Err(err) => debug!(%err, %from, "failed to parse SIP response"),
            }
        } else {
            match parse_request(text) {
                Ok(msg) => self.handle_request(&msg, from),
                Err(err) => debug!(%err, %from, "failed to parse SIP request"),
            }
        }
    }

    fn find_sip_position(&self, call_id: u64) -> Option<LegPosition> {
        self.registry.with_call(call_id, |call| {
            [LegPosition::Initial, LegPosition::Remote]
                .into_iter()
                .find(|&position| call.leg(position).is_some_and(Leg::is_sip))
        })?
    }

    fn handle_response(&self, msg: SipMessage<'_>) {
        let Some(call_id_header) = msg.call_id() else {
            return;
        };
        let Some(call_id) = call_id_from_header(call_id_header) else {
            return;
        };
        let Some(cseq) = msg.cseq() else {
            return;
        };

        self.update_remote_tag(call_id, &msg);

        match cseq.method {
            Method::Invite => self.handle_invite_response(call_id, &msg),
            Method::Bye | Method::Cancel => self.handle_teardown_response(call_id),
            other => debug!(call_id, method = other.as_str(), "ignoring response to unsupported method"),
        }
    }

    fn update_remote_tag(&self, call_id: u64, msg: &SipMessage<'_>) {
        let Some(to) = msg.headers.iter().find_map(|h| match h {
            Header::To(addr) => Some(*addr),
            _ => None,
        }) else {
            return;
        };
        let Some(tag) = tag_from_params(to.params) else {
            return;
        };
        let mut dialogs = self.dialogs.borrow_mut();
        if let Some(dialog) = dialogs.get_mut(&call_id) {
            if dialog.remote_tag.is_none() {
                dialog.remote_tag = Some(tag.to_owned());
            }
        }
    }

    fn handle_invite_response(&self, call_id: u64, msg: &SipMessage<'_>) {
        let Some(position) = self.find_sip_position(call_id) else {
            return;
        };
        let StartLine::Response(status) = msg.start_line else {
            return;
        };

        let was_initial = self
            .registry
            .with_call(call_id, |call| {
                call.leg(position).and_then(Leg::as_sip).map(|leg| leg.sub_state == SipSubState::Initial)
            })
            .flatten()
            .unwrap_or(false);
        if was_initial {
            self.registry.with_call_mut(call_id, |call| {
                if let Some(leg) = call.leg_mut(position).and_then(Leg::as_sip_mut) {
                    leg.sub_state = SipSubState::DlgConfirmed;
                }
            });
        }

        match status.status_code {
            180 => self.call_progress(call_id, position),
            200 => self.call_connect(call_id, position, msg),
            code if code >= 300 => self.call_failed(call_id, position),
            _ => {}
        }
    }

    fn call_progress(&self, call_id: u64, position: LegPosition) {
        debug!(call_id, "SIP leg is now ringing");
        if let Some(peer) = self.peer_capabilities(call_id, position) {
            if let Err(err) = peer.ring_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to ring peer leg");
            }
        }
    }

    fn call_connect(&self, call_id: u64, position: LegPosition, msg: &SipMessage<'_>) {
        let Some(peer) = self.peer_capabilities(call_id, position) else {
            debug!(call_id, "leg(s) connected but peer is gone");
            self.send_cancel(call_id);
            return;
        };

        let wanted_codec = self
            .registry
            .with_call(call_id, |call| {
                call.leg(position).and_then(Leg::as_sip).map(|leg| leg.wanted_codec.clone())
            })
            .flatten();
        let Some(wanted_codec) = wanted_codec else {
            return;
        };

        let negotiated = parse_sdp(std::str::from_utf8(msg.body).unwrap_or_default())
            .ok()
            .and_then(|desc| negotiate_answer(&desc, &wanted_codec));

        let Some(negotiated) = negotiated else {
            warn!(call_id, "incompatible audio in 200 OK, releasing");
            self.send_cancel(call_id);
            let _ = peer.release_call(call_id, position.other());
            self.destroy_sip_leg(call_id, position);
            return;
        };

        let payload_msg_type = self
            .dialogs
            .borrow()
            .get(&call_id)
            .map(|dialog| dialog.origin_payload_msg_type)
            .unwrap_or_default();

        let media = MediaEndpoint {
            ip: u32::from(negotiated.address),
            port: negotiated.port,
            payload_type: negotiated.payload_type,
            payload_msg_type,
        };

        self.registry.with_call_mut(call_id, |call| {
            if let Some(leg) = call.leg_mut(position) {
                leg.set_media(media);
                if let Some(sip_leg) = leg.as_sip_mut() {
                    sip_leg.sub_state = SipSubState::Connected;
                }
            }
        });

        debug!(call_id, "SIP leg is now connected");
        if let Err(err) = peer.connect_call(call_id, position.other()) {
            warn!(%err, call_id, "failed to connect peer leg");
        }
        self.send_ack(call_id);
    }

    fn call_failed(&self, call_id: u64, position: LegPosition) {
        warn!(call_id, "SIP leg failed, releasing");
        self.send_cancel(call_id);
        self.destroy_sip_leg(call_id, position);
        if let Some(peer) = self.peer_capabilities(call_id, position) {
            if let Err(err) = peer.release_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to release peer leg");
            }
        }
    }

    fn handle_teardown_response(&self, call_id: u64) {
        let Some(position) = self.find_sip_position(call_id) else {
            return;
        };
        debug!(call_id, "got response to our own bye/cancel");
        self.destroy_sip_leg(call_id, position);
    }

    fn handle_request(&self, msg: &SipMessage<'_>, from: SocketAddr) {
        let StartLine::Request(request_line) = msg.start_line else {
            return;
        };
        let Some(call_id_header) = msg.call_id() else {
            return;
        };
        let Some(call_id) = call_id_from_header(call_id_header) else {
            return;
        };

        match request_line.method {
            Method::Bye => self.handle_inbound_bye(call_id, msg, from),
            other => debug!(call_id, method = other.as_str(), "ignoring unsupported inbound SIP request"),
        }
    }

    fn handle_inbound_bye(&self, call_id: u64, msg: &SipMessage<'_>, from: SocketAddr) {
        let Some(position) = self.find_sip_position(call_id) else {
            debug!(call_id, "BYE for unknown call, dropping");
            return;
        };
        let already_local_teardown = self
            .dialogs
            .borrow()
            .get(&call_id)
            .is_some_and(|dialog| dialog.local_initiated_teardown);
        if already_local_teardown {
            debug!(call_id, "inbound BYE raced with our own teardown");
        }

        warn!(call_id, "leg got bye, releasing");
        self.send_ok_to_request(msg, from);
        if let Some(peer) = self.peer_capabilities(call_id, position) {
            if let Err(err) = peer.release_call(call_id, position.other()) {
                warn!(%err, call_id, "failed to release peer leg");
            }
        }
        self.destroy_sip_leg(call_id, position);
    }

    fn peer_capabilities(&self, call_id: u64, position: LegPosition) -> Option<Rc<dyn LegCapabilities>> {
        self.registry
            .with_call(call_id, |call| call.other(position).map(Leg::capabilities))
            .flatten()
    }

    fn destroy_sip_leg(&self, call_id: u64, position: LegPosition) {
        self.dialogs.borrow_mut().remove(&call_id);
        self.registry.destroy_leg(call_id, position);
    }

    fn mark_local_teardown(&self, call_id: u64) {
        if let Some(dialog) = self.dialogs.borrow_mut().get_mut(&call_id) {
            dialog.local_initiated_teardown = true;
        }
    }

    fn send_cancel(&self, call_id: u64) {
        self.send_in_dialog_request(call_id, Method::Cancel);
    }

    fn send_ack(&self, call_id: u64) {
        let rendered = {
            let dialogs = self.dialogs.borrow();
            let Some(dialog) = dialogs.get(&call_id) else {
                return;
            };
            let branch = dialog.fresh_branch(call_id, "ack");
            render_in_dialog_request(dialog, Method::Ack, 1, &branch)
        };
        self.send_rendered(call_id, &rendered, "ACK");
    }

    fn send_in_dialog_request(&self, call_id: u64, method: Method<'static>) {
        let rendered = {
            let mut dialogs = self.dialogs.borrow_mut();
            let Some(dialog) = dialogs.get_mut(&call_id) else {
                return;
            };
            let (cseq, branch) = match method {
                Method::Cancel => (1u32, dialog.invite_branch.clone()),
                _ => {
                    let cseq = dialog.take_cseq();
                    let branch = dialog.fresh_branch(call_id, "bye");
                    (cseq, branch)
                }
            };
            render_in_dialog_request(dialog, method, cseq, &branch)
        };
        self.send_rendered(call_id, &rendered, method.as_str());
    }

    fn send_rendered(&self, call_id: u64, text: &str, what: &str) {
        let target = self.dialogs.borrow().get(&call_id).map(|d| d.remote_target);
        let Some(target) = target else {
            return;
        };
        if let Err(err) = self.transport.try_send_to(text.as_bytes(), target) {
            warn!(%err, call_id, what, "failed to send SIP datagram");
        }
    }

    fn send_ok_to_request(&self, msg: &SipMessage<'_>, from: SocketAddr) {
        let mut headers = Vec::new();
        for header in &msg.headers {
            match header {
                Header::Via(_) | Header::From(_) | Header::To(_) | Header::CallId(_) | Header::CSeq(_) => {
                    headers.push(*header);
                }
                _ => {}
            }
        }
        let status = StatusLine {
            version: "SIP/2.0",
            status_code: 200,
            reason: "OK",
        };
        let mut text = String::new();
        if let Err(err) = write_response(&mut text, &status, &headers, b"") {
            warn!(%err, "failed to render 200 OK for inbound BYE");
            return;
        }
        if let Err(err) = self.transport.try_send_to(text.as_bytes(), from) {
            warn!(%err, "failed to send 200 OK for inbound BYE");
        }
    }
}

fn call_id_from_header(call_id_header: &str) -> Option<u64> {
    let (hex, _) = call_id_header.split_once('@')?;
    u64::from_str_radix(hex, 16).ok()
}

fn tag_from_params(params: Option<&str>) -> Option<&str> {
    params?.split(';').find_map(|part| part.strip_prefix("tag="))
}

fn render_in_dialog_request(dialog: &SipDialogState, method: Method<'static>, cseq: u32, branch: &str) -> String {
    let local_tag_param = format!("tag={}", dialog.local_tag);
    let remote_tag_param = dialog.remote_tag.as_ref().map(|tag| format!("tag={tag}"));
    let remote_ip = dialog.remote_target.ip().to_string();
    let remote_port = dialog.remote_target.port();

    let request_uri = SipUri {
        scheme: SipScheme::Sip,
        userinfo: Some(&dialog.dest),
        host: &remote_ip,
        port: Some(remote_port),
        params: None,
    };
    let from = NameAddr {
        display_name: None,
        uri: SipUri {
            scheme: SipScheme::Sip,
            userinfo: Some(&dialog.source),
            host: &dialog.local_host,
            port: Some(dialog.local_port),
            params: None,
        },
        params: Some(&local_tag_param),
    };
    let to = NameAddr {
        display_name: None,
        uri: request_uri,
        params: remote_tag_param.as_deref(),
    };
    let parts = RequestParts {
        method,
        request_uri,
        via_host: &dialog.local_host,
        via_port: dialog.local_port,
        branch,
        from,
        to,
        call_id: &dialog.call_id_header,
        cseq,
        contact: None,
        content_type: None,
    };
    render_request(&parts, "").unwrap_or_default()
}

impl SipOriginator for SipAdapter {
    /// 为 `call_id` 发起出站 INVITE（§4.7：离线腿创建）。offer 里的媒体端点
    /// 取自 `initial` 腿——即已经受理完的那一侧——而不是本适配器自己的地址,
    /// 这样对端可以直接把 RTP 发往真正的媒体源，不经过任何中继（`send_invite`）。
    fn originate(&self, call_id: u64, source: &str, dest: &str) -> Result<(), SwitchError> {
        let other_media = self
            .registry
            .with_call(call_id, |call| call.initial.media())
            .ok_or(SwitchError::CallNotFound { call_id })?;

        let source = truncate_identifier(source, 32);
        let dest = truncate_identifier(dest, 32);
        let payload_msg_type = other_media.payload_msg_type;
        let wanted_codec = codec_name(payload_msg_type).to_owned();

        let remote_addr_text = self.config.remote_addr.to_string();
        let local_addr_text = self.config.local_addr.to_string();
        let remote_target = SocketAddr::new(self.config.remote_addr.into(), self.config.remote_port);

        let dialog = SipDialogState::new_outbound(
            call_id,
            remote_target,
            local_addr_text.clone(),
            self.config.local_port,
            source.clone(),
            dest.clone(),
            payload_msg_type,
        );

        let other_ip = Ipv4Addr::from(other_media.ip);
        let sdp_body = render_offer(&self.config.product, other_ip, other_media.port, other_media.payload_type, &wanted_codec);

        let request_uri = SipUri {
            scheme: SipScheme::Sip,
            userinfo: Some(&dest),
            host: &remote_addr_text,
            port: Some(self.config.remote_port),
            params: None,
        };
        let from_tag_param = format!("tag={}", dialog.local_tag);
        let contact = NameAddr {
            display_name: None,
            uri: SipUri {
                scheme: SipScheme::Sip,
                userinfo: Some(&source),
                host: &local_addr_text,
                port: Some(self.config.local_port),
                params: None,
            },
            params: None,
        };
        let from = NameAddr {
            display_name: None,
            uri: contact.uri,
            params: Some(&from_tag_param),
        };
        let to = NameAddr {
            display_name: None,
            uri: request_uri,
            params: None,
        };

        let parts = RequestParts {
            method: Method::Invite,
            request_uri,
            via_host: &local_addr_text,
            via_port: self.config.local_port,
            branch: &dialog.invite_branch,
            from,
            to,
            call_id: &dialog.call_id_header,
            cseq: 1,
            contact: Some(contact),
            content_type: Some("application/sdp"),
        };
        let text = render_request(&parts, &sdp_body).map_err(|err| SwitchError::AdapterFailure {
            context: "render_invite".to_owned(),
            detail: err.to_string(),
        })?;

        let leg = Leg::Sip(SipLeg {
            common: LegCommon::new(call_id, LegPosition::Remote, self.capabilities()),
            dialog_handle: call_id,
            sub_state: SipSubState::Initial,
            wanted_codec,
        });
        self.registry.attach_remote(call_id, leg)?;
        self.dialogs.borrow_mut().insert(call_id, dialog);

        if let Err(err) = self.transport.try_send_to(text.as_bytes(), remote_target) {
            warn!(%err, call_id, "failed to send outbound INVITE");
        }
        Ok(())
    }
}

impl LegCapabilities for SipAdapter {
    fn connect_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
        debug!(call_id, ?position, "connect_call on a SIP leg is driven by its own INVITE response, ignoring");
        Ok(())
    }

    fn ring_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
        debug!(call_id, ?position, "ring_call on a SIP leg has no outbound signal to send, ignoring");
        Ok(())
    }

    fn release_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
        let already_releasing = self
            .registry
            .with_call(call_id, |call| call.leg(position).map(|leg| leg.common().in_release))
            .flatten()
            .unwrap_or(false);
        if already_releasing {
            return Err(SwitchError::AlreadyReleasing { call_id, position });
        }

        let sub_state = self
            .registry
            .with_call(call_id, |call| call.leg(position).and_then(Leg::as_sip).map(|leg| leg.sub_state))
            .flatten()
            .ok_or(SwitchError::LegNotFound { call_id, position })?;

        self.registry.with_call_mut(call_id, |call| {
            if let Some(leg) = call.leg_mut(position) {
                leg.common_mut().in_release = true;
            }
        });

        match sub_state {
            SipSubState::Initial => {
                debug!(call_id, "releasing leg in initial state");
                self.destroy_sip_leg(call_id, position);
            }
            SipSubState::DlgConfirmed => {
                debug!(call_id, "releasing leg in dlg-confirmed state, sending cancel");
                self.mark_local_teardown(call_id);
                self.send_cancel(call_id);
            }
            SipSubState::Connected => {
                debug!(call_id, "releasing leg in connected state, sending bye");
                self.mark_local_teardown(call_id);
                self.send_in_dialog_request(call_id, Method::Bye);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_switch::call::Call;
    use spark_switch::leg::{AddressInfo, Direction, MnccLeg, MnccSubState};
    use std::cell::RefCell as StdRefCell;

    fn config() -> SipAdapterConfig {
        SipAdapterConfig {
            local_addr: Ipv4Addr::new(127, 0, 0, 1),
            local_port: 0,
            remote_addr: Ipv4Addr::new(127, 0, 0, 1),
            remote_port: 0,
            product: "spark-bridge-test".to_owned(),
        }
    }

    #[derive(Debug, Default)]
    struct RecordingMnccCaps {
        connected: StdRefCell<Vec<(u64, LegPosition)>>,
        released: StdRefCell<Vec<(u64, LegPosition)>>,
    }

    impl LegCapabilities for RecordingMnccCaps {
        fn connect_call(&self, call_id: u64, position: LegPosition) -> Result<(), SwitchError> {
            self.connected.borrow_mut().push((call_id, position));
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

    fn mncc_initial_leg(call_id: u64, caps: Rc<RecordingMnccCaps>, ip: u32, port: u16, payload_type: u8, payload_msg_type: u8) -> Leg {
        let mut leg = Leg::Mncc(MnccLeg {
            common: LegCommon::new(call_id, LegPosition::Initial, caps as Rc<dyn LegCapabilities>),
            callref: 1,
            direction: Direction::Mo,
            sub_state: MnccSubState::Connected,
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
            imsi: String::new(),
            rsp_wanted: None,
        });
        leg.set_media(MediaEndpoint { ip, port, payload_type, payload_msg_type });
        leg
    }

    #[tokio::test]
    async fn call_id_from_header_parses_hex_prefix() {
        assert_eq!(call_id_from_header("7@10.0.0.2"), Some(7));
        assert_eq!(call_id_from_header("not-a-number@host"), None);
    }

    #[tokio::test]
    async fn originate_sends_invite_with_rendered_sdp_offer() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let registry = CallRegistry::new();
        let call_id = registry.next_call_id();
        let caps = Rc::new(RecordingMnccCaps::default());
        registry.insert(Call::new(
            call_id,
            mncc_initial_leg(call_id, caps, 0x0a00_0001, 16384, 8, 1),
            "200".into(),
            "101".into(),
        ));

        let mut cfg = config();
        cfg.remote_port = receiver_addr.port();
        let adapter = SipAdapter::new(registry, cfg).unwrap();

        adapter.originate(call_id, "200", "101").unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("INVITE sip:101@127.0.0.1"));
        assert!(text.contains("m=audio 16384 RTP/AVP 8\r\n"));
        assert!(text.contains("a=rtpmap:8 GSM/8000\r\n"));
        assert!(text.contains("Content-Type: application/sdp\r\n"));
    }

    #[tokio::test]
    async fn release_call_in_initial_state_destroys_without_sending() {
        let registry = CallRegistry::new();
        let call_id = registry.next_call_id();
        let caps = Rc::new(RecordingMnccCaps::default());
        registry.insert(Call::new(
            call_id,
            mncc_initial_leg(call_id, caps, 0x0a00_0001, 16384, 8, 1),
            "200".into(),
            "101".into(),
        ));

        let adapter = SipAdapter::new(registry.clone(), config()).unwrap();
        adapter.originate(call_id, "200", "101").unwrap();

        let sip_caps = registry.with_call(call_id, |call| call.remote.as_ref().unwrap().capabilities()).unwrap();
        sip_caps.release_call(call_id, LegPosition::Remote).unwrap();

        let destroyed = registry
            .with_call(call_id, |call| call.remote.as_ref().unwrap().common().destroyed)
            .unwrap();
        assert!(destroyed);
    }

    #[tokio::test]
    async fn release_call_in_dlg_confirmed_state_sends_cancel() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let registry = CallRegistry::new();
        let call_id = registry.next_call_id();
        let caps = Rc::new(RecordingMnccCaps::default());
        registry.insert(Call::new(
            call_id,
            mncc_initial_leg(call_id, caps, 0x0a00_0001, 16384, 8, 1),
            "200".into(),
            "101".into(),
        ));

        let mut cfg = config();
        cfg.remote_port = receiver_addr.port();
        let adapter = SipAdapter::new(registry.clone(), cfg).unwrap();
        adapter.originate(call_id, "200", "101").unwrap();

        let mut buf = [0u8; 2048];
        receiver.recv_from(&mut buf).await.unwrap();

        registry.with_call_mut(call_id, |call| {
            if let Some(leg) = call.remote.as_mut().and_then(Leg::as_sip_mut) {
                leg.sub_state = SipSubState::DlgConfirmed;
            }
        });

        let sip_caps = registry.with_call(call_id, |call| call.remote.as_ref().unwrap().capabilities()).unwrap();
        sip_caps.release_call(call_id, LegPosition::Remote).unwrap();

        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("CANCEL sip:101@127.0.0.1"));
    }

    #[tokio::test]
    async fn invite_200_ok_connects_peer_and_sends_ack() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let receiver_addr = receiver.local_addr().unwrap();

        let registry = CallRegistry::new();
        let call_id = registry.next_call_id();
        let caps = Rc::new(RecordingMnccCaps::default());
        registry.insert(Call::new(
            call_id,
            mncc_initial_leg(call_id, caps.clone(), 0x0a00_0001, 16384, 8, 1),
            "200".into(),
            "101".into(),
        ));

        let mut cfg = config();
        cfg.remote_port = receiver_addr.port();
        let adapter = SipAdapter::new(registry.clone(), cfg).unwrap();
        adapter.originate(call_id, "200", "101").unwrap();

        let mut buf = [0u8; 2048];
        receiver.recv_from(&mut buf).await.unwrap();

        let call_id_header = adapter.dialogs.borrow().get(&call_id).unwrap().call_id_header.clone();
        let local_tag = adapter.dialogs.borrow().get(&call_id).unwrap().local_tag.clone();

        let response = format!(
            "SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP 127.0.0.1:{local_port};branch=z9hG4bK-inv\r\n\
From: <sip:200@127.0.0.1:{local_port}>;tag={local_tag}\r\n\
To: <sip:101@127.0.0.1:{remote_port}>;tag=remote-1\r\n\
Call-ID: {call_id_header}\r\n\
CSeq: 1 INVITE\r\n\
Content-Type: application/sdp\r\n\
Content-Length: {body_len}\r\n\
\r\n\
v=0\r\no=- 0 0 IN IP4 10.0.0.2\r\ns=GSM Call\r\nc=IN IP4 10.0.0.2\r\nt=0 0\r\nm=audio 20000 RTP/AVP 1\r\na=rtpmap:1 GSM/8000\r\n",
            local_port = 0,
            remote_port = receiver_addr.port(),
            body_len = "v=0\r\no=- 0 0 IN IP4 10.0.0.2\r\ns=GSM Call\r\nc=IN IP4 10.0.0.2\r\nt=0 0\r\nm=audio 20000 RTP/AVP 1\r\na=rtpmap:1 GSM/8000\r\n".len(),
        );

        adapter.handle_datagram(&response, receiver_addr);

        assert_eq!(caps.connected.borrow().as_slice(), &[(call_id, LegPosition::Initial)]);

        let sub_state = registry
            .with_call(call_id, |call| call.remote.as_ref().unwrap().as_sip().unwrap().sub_state)
            .unwrap();
        assert_eq!(sub_state, SipSubState::Connected);

        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("ACK sip:101@127.0.0.1"));
    }
}
