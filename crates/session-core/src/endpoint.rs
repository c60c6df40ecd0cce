//! The SIP session engine
//!
//! [`SipEndpoint`] ties the stack together: it drives registration against
//! the configured server, dispatches inbound requests and responses, manages
//! the fixed call slot pool, opens one RTP channel per call and gates media
//! through the jitter buffers to the codec link.
//!
//! The engine is poll-driven and never blocks. The host loop calls
//! [`poll`](SipEndpoint::poll) repeatedly; inbound datagrams are queued by
//! the transport and drained on the tick, and all timeouts are checked
//! against a monotonic clock. The audio bridge runs from its own periodic
//! task via [`bridge_tick`](SipEndpoint::bridge_tick). Shared state lives
//! behind coarse locks which are never held across an await.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use emvoip_media_core::{AudioLink, FrameCodec};
use emvoip_rtp_core::{PayloadType, QualitySnapshot, RtpChannel};
use emvoip_sip_core::{
    message::strip_tag, DigestChallenge, DigestCredentials, MessageKind, Method, RequestBuilder,
    ResponseBuilder, SdpAnswer, SdpOffer, SdpSession, SipMessage,
};

use crate::calls::{Call, CallDirection, CallState, CallTable};
use crate::config::EndpointConfig;
use crate::errors::{Error, Result};
use crate::events::SipEvent;
use crate::media::MediaBridge;
use crate::registration::{RegistrationSession, SipState};
use crate::transport::{Datagram, SignalTransport};

/// Media port assumed when an INVITE carries no usable m=audio line
const FALLBACK_MEDIA_PORT: u16 = 4008;

/// How long a dialog may sit in WaitingForAck before the lost-ACK workaround
const ACK_WAIT: Duration = Duration::from_secs(2);

/// Inactivity bound for any non-IDLE call
const CALL_INACTIVITY: Duration = Duration::from_secs(60);

/// What the registration machine decided to send this tick
enum RegisterAction {
    Initial,
    Authenticated(DigestChallenge),
    Renewal,
}

/// The embedded VoIP endpoint engine
pub struct SipEndpoint {
    config: EndpointConfig,
    transport: Arc<dyn SignalTransport>,
    inbound: Mutex<mpsc::Receiver<Datagram>>,
    registration: Mutex<RegistrationSession>,
    calls: Mutex<CallTable>,
    channels: Mutex<Vec<Option<Arc<RtpChannel>>>>,
    media: MediaBridge,
    events: mpsc::UnboundedSender<SipEvent>,
    /// Call-ID used for this endpoint's own dialogs and registration
    session_call_id: String,
}

impl SipEndpoint {
    /// Assemble an endpoint over a transport and a codec link
    ///
    /// Returns the engine and the event stream for the host.
    pub fn new(
        config: EndpointConfig,
        transport: Arc<dyn SignalTransport>,
        inbound: mpsc::Receiver<Datagram>,
        link: Arc<dyn AudioLink>,
    ) -> (SipEndpoint, mpsc::UnboundedReceiver<SipEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session_call_id = format!("{:08x}@{}", rand::random::<u32>(), config.register_host());
        info!(
            server = %config.server,
            user = %config.username,
            call_id = %session_call_id,
            "SIP endpoint created"
        );

        let endpoint = SipEndpoint {
            registration: Mutex::new(RegistrationSession::new(config.expires)),
            calls: Mutex::new(CallTable::new(config.max_calls)),
            channels: Mutex::new(vec![None; config.max_calls]),
            media: MediaBridge::new(config.max_calls, link),
            events,
            session_call_id,
            inbound: Mutex::new(inbound),
            transport,
            config,
        };
        (endpoint, events_rx)
    }

    // ------------------------------------------------------------------
    // Host-facing surface
    // ------------------------------------------------------------------

    /// One engine tick: drain signaling, drive registration, run timers
    ///
    /// Must be called repeatedly by the host loop; never blocks.
    pub async fn poll(&self) -> Result<()> {
        let now = Instant::now();

        if !self.transport.is_ready() {
            self.on_network_lost();
            return Ok(());
        }
        self.media.set_enabled(true);

        loop {
            let datagram = self.inbound.lock().try_recv();
            match datagram {
                Ok(datagram) => self.dispatch(datagram).await,
                Err(_) => break,
            }
        }

        self.drive_registration(now).await;
        self.drive_call_timers(now).await;

        let active = self.active_media_slots();
        self.media
            .pump(|slot| active.iter().any(|(s, _)| *s == slot));
        Ok(())
    }

    /// Periodic audio bridge tick: frame buffered call audio to the link
    pub fn bridge_tick(&self) {
        self.media.bridge_tick(&self.active_media_slots());
    }

    /// Feed one frame received from the codec link back into RTP
    ///
    /// Frames for calls that are not ACTIVE are dropped; outgoing packets are
    /// stamped from the shared media clock.
    pub async fn handle_link_frame(&self, data: &[u8]) -> Result<()> {
        let frame = FrameCodec::decode(data)?;
        let slot = usize::from(frame.call_index);

        let active = {
            let calls = self.calls.lock();
            calls.get(slot).map(|c| c.state) == Some(CallState::Active)
        };
        if !active {
            trace!(slot, "link frame for inactive call dropped");
            return Ok(());
        }

        let channel = self.channels.lock().get(slot).and_then(Clone::clone);
        let Some(channel) = channel else {
            trace!(slot, "link frame without RTP channel dropped");
            return Ok(());
        };

        let (timestamp, sequence) = self.media.clock().next(slot);
        channel
            .send(&frame.payload, timestamp, sequence, frame.codec)
            .await?;
        Ok(())
    }

    /// Place an outgoing call to a SIP URI
    pub async fn make_call(&self, to_uri: &str) -> Result<usize> {
        if !self.transport.is_ready() {
            return Err(Error::NetworkUnavailable);
        }
        if !self.registration.lock().is_registered() {
            return Err(Error::NotRegistered);
        }
        let Some((remote_ip, remote_port)) = parse_contact_addr(to_uri) else {
            return Err(Error::InvalidTarget {
                target: to_uri.to_string(),
            });
        };
        let from_tag = new_tag();
        let cseq = self.registration.lock().next_cseq();

        // reserve and fill the slot in one critical section
        let (slot, local_rtp_port) = {
            let mut calls = self.calls.lock();
            let slot = calls.allocate().ok_or(Error::CallPoolExhausted)?;
            let local_rtp_port = self.config.rtp_port_for_slot(slot);
            let call = calls.get_mut(slot).expect("allocated slot exists");
            call.state = CallState::InviteSent;
            call.direction = CallDirection::Outgoing;
            call.call_id = self.session_call_id.clone();
            call.from_uri = self.config.from_uri();
            call.from_tag = from_tag.clone();
            call.to_uri = to_uri.to_string();
            call.remote_ip = remote_ip.clone();
            call.remote_sip_port = remote_port;
            call.local_rtp_port = local_rtp_port;
            call.ssrc = emvoip_rtp_core::random_ssrc();
            call.cseq_invite = cseq;
            call.touch(Instant::now());
            (slot, local_rtp_port)
        };

        let offer = SdpOffer::new(&self.config.local_ip, local_rtp_port).render();
        let invite = RequestBuilder::new(Method::Invite, to_uri)
            .via(&self.config.local_ip, self.config.local_port, &new_branch())
            .from(&self.config.from_uri(), &from_tag)
            .to(to_uri, None)
            .call_id(&self.session_call_id)
            .cseq(cseq, Method::Invite)
            .contact(&self.config.contact_uri())
            .user_agent(&self.config.user_agent)
            .body("application/sdp", &offer)
            .build();

        if let Err(err) = self.send_text(&remote_ip, remote_port, &invite).await {
            // the INVITE never left, return the slot to the pool
            warn!(slot, %err, "INVITE send failed");
            self.calls.lock().reset(slot);
            return Err(err);
        }

        info!(slot, to_uri, cseq, "outgoing call started");
        self.emit(SipEvent::CallStateChanged {
            slot,
            state: CallState::InviteSent,
        });
        Ok(slot)
    }

    /// End a call: send BYE for established dialogs, then tear the slot down
    pub async fn hangup(&self, slot: usize) -> Result<()> {
        let bye = {
            let calls = self.calls.lock();
            let call = calls.get(slot).ok_or(Error::InvalidSlot { slot })?;
            if call.is_idle() {
                return Err(Error::InvalidSlot { slot });
            }
            if call.is_established() {
                Some(self.build_bye(call))
            } else {
                None
            }
        };

        if let Some((target_ip, target_port, message)) = bye {
            // best effort: the slot is reset regardless of delivery
            if let Err(err) = self.send_text(&target_ip, target_port, &message).await {
                warn!(slot, %err, "BYE send failed");
            }
        }
        self.teardown(slot);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status getters for the host (UI, watchdog)
    // ------------------------------------------------------------------

    pub fn is_registered(&self) -> bool {
        self.registration.lock().is_registered()
    }

    pub fn sip_state(&self) -> SipState {
        self.registration.lock().state
    }

    /// When the next REGISTER is due, while registered
    pub fn renewal_deadline(&self) -> Option<Instant> {
        self.registration.lock().renewal_deadline()
    }

    pub fn call_state(&self, slot: usize) -> CallState {
        self.calls
            .lock()
            .get(slot)
            .map(|c| c.state)
            .unwrap_or(CallState::Idle)
    }

    pub fn call_id(&self, slot: usize) -> Option<String> {
        let calls = self.calls.lock();
        let call = calls.get(slot)?;
        if call.is_idle() {
            None
        } else {
            Some(call.call_id.clone())
        }
    }

    pub fn remote_address(&self, slot: usize) -> Option<String> {
        let calls = self.calls.lock();
        let call = calls.get(slot)?;
        if call.is_idle() {
            None
        } else {
            Some(format!("{}:{}", call.remote_ip, call.remote_sip_port))
        }
    }

    /// Negotiated remote media endpoint for a call
    pub fn remote_media_address(&self, slot: usize) -> Option<String> {
        let calls = self.calls.lock();
        let call = calls.get(slot)?;
        if call.is_idle() || call.remote_rtp_ip.is_empty() {
            None
        } else {
            Some(format!("{}:{}", call.remote_rtp_ip, call.remote_rtp_port))
        }
    }

    pub fn first_active_call(&self) -> Option<usize> {
        self.calls.lock().first_non_idle()
    }

    pub fn active_call_count(&self) -> usize {
        self.calls.lock().active_count()
    }

    /// Jitter/loss snapshot for a call's media channel
    pub fn call_quality(&self, slot: usize) -> Option<QualitySnapshot> {
        let channel = self.channels.lock().get(slot).and_then(Clone::clone)?;
        Some(channel.quality())
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn dispatch(&self, datagram: Datagram) {
        let Ok(text) = std::str::from_utf8(&datagram.data) else {
            debug!(source = %datagram.source, "non-text datagram dropped");
            return;
        };
        let message = match SipMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(source = %datagram.source, %err, "unparseable datagram dropped");
                return;
            }
        };

        match message.kind() {
            MessageKind::Response(code) => self.on_response(&message, code).await,
            MessageKind::Request(method) => self.on_request(&message, method, &datagram).await,
            MessageKind::UnknownRequest => {
                debug!(source = %datagram.source, "unsupported method");
                self.reply_to_source(&message, 501, &datagram).await;
            }
        }
    }

    async fn on_request(&self, message: &SipMessage<'_>, method: Method, datagram: &Datagram) {
        trace!(%method, source = %datagram.source, "request received");
        match method {
            Method::Invite => self.on_invite(message, datagram).await,
            Method::Ack => self.on_ack(message),
            Method::Bye => self.on_bye(message, datagram).await,
            Method::Cancel => self.on_cancel(message, datagram).await,
            Method::Options => self.reply_to_source(message, 200, datagram).await,
            // a client endpoint does not serve REGISTER
            Method::Register => self.reply_to_source(message, 405, datagram).await,
        }
    }

    async fn on_invite(&self, message: &SipMessage<'_>, datagram: &Datagram) {
        let Ok(call_id) = message.header_required("Call-ID") else {
            self.reply_to_source(message, 400, datagram).await;
            return;
        };

        // a known Call-ID is a retransmission, never a second call
        enum Retransmission {
            ResendOk(String, u16, String),
            Ignore,
        }
        let retransmission = {
            let mut calls = self.calls.lock();
            let existing = calls.find(&call_id);
            existing.map(|slot| {
                let call = calls.get_mut(slot).expect("found slot exists");
                if call.state == CallState::WaitingForAck {
                    call.touch(Instant::now());
                    match call.last_ok.clone() {
                        Some(ok) => {
                            Retransmission::ResendOk(call.remote_ip.clone(), call.remote_sip_port, ok)
                        }
                        None => Retransmission::Ignore,
                    }
                } else {
                    Retransmission::Ignore
                }
            })
        };
        match retransmission {
            Some(Retransmission::ResendOk(ip, port, ok)) => {
                info!(%call_id, "INVITE retransmission, resending 200 OK");
                let _ = self.send_text(&ip, port, &ok).await;
                return;
            }
            Some(Retransmission::Ignore) => {
                debug!(%call_id, "INVITE retransmission ignored");
                return;
            }
            None => {}
        }

        // reserve the slot before any await so a concurrent caller cannot
        // be handed the same index
        let slot = {
            let mut calls = self.calls.lock();
            let slot = calls.allocate();
            if let Some(slot) = slot {
                let call = calls.get_mut(slot).expect("allocated slot exists");
                call.state = CallState::Trying;
                call.call_id = call_id.clone();
                call.touch(Instant::now());
            }
            slot
        };
        let Some(slot) = slot else {
            warn!("call pool exhausted, rejecting INVITE");
            self.reply_to_source(message, 503, datagram).await;
            return;
        };

        // mandatory dialog headers
        let extracted = (|| -> emvoip_sip_core::Result<(String, String, u32)> {
            let from_uri = message.header_uri("From")?;
            let to_uri = message.header_uri("To")?;
            let (cseq, _) = message.cseq()?;
            Ok((from_uri, to_uri, cseq))
        })();
        let Ok((from_uri, to_uri, cseq_invite)) = extracted else {
            self.reply_to_source(message, 400, datagram).await;
            self.calls.lock().reset(slot);
            return;
        };
        let from_tag = message.header_param("From", "tag").unwrap_or_default();
        let contact_uri = message.header_uri("Contact").unwrap_or_else(|_| {
            format!(
                "sip:{}@{}:{}",
                self.config.username, self.config.server, self.config.server_port
            )
        });
        let record_route = message.headers_all("Record-Route").join(", ");

        // negotiated media endpoint, with packet-source fallbacks
        let sdp = message.body().map(SdpSession::parse).unwrap_or_default();
        let remote_rtp_ip = sdp
            .connection_ip
            .unwrap_or_else(|| datagram.source.ip().to_string());
        let remote_rtp_port = sdp.audio_port.unwrap_or(FALLBACK_MEDIA_PORT);

        // responses go to the Contact address when it parses
        let (target_ip, target_port) = parse_contact_addr(&contact_uri)
            .unwrap_or_else(|| (datagram.source.ip().to_string(), datagram.source.port()));

        let local_rtp_port = self.config.rtp_port_for_slot(slot);
        let ssrc = emvoip_rtp_core::random_ssrc();

        let remote_media = format!("{remote_rtp_ip}:{remote_rtp_port}").parse::<SocketAddr>();
        let channel = match remote_media {
            Ok(remote) => {
                RtpChannel::open(
                    slot,
                    local_rtp_port,
                    remote,
                    ssrc,
                    PayloadType::Pcma.value(),
                    PayloadType::Pcma.clock_rate(),
                    self.media.packet_sink(),
                )
                .await
            }
            Err(_) => {
                warn!(slot, %remote_rtp_ip, "unusable media address in INVITE");
                self.reply_to_source(message, 400, datagram).await;
                self.calls.lock().reset(slot);
                return;
            }
        };
        let channel = match channel {
            Ok(channel) => channel,
            Err(err) => {
                warn!(slot, %err, "RTP channel setup failed");
                self.reply_to_source(message, 500, datagram).await;
                self.calls.lock().reset(slot);
                return;
            }
        };
        self.channels.lock()[slot] = Some(Arc::new(channel));

        // one To-tag for the whole dialog, fixed before the first response
        let to_tag = new_tag();
        {
            let mut calls = self.calls.lock();
            let call = calls.get_mut(slot).expect("allocated slot exists");
            call.state = CallState::Trying;
            call.direction = CallDirection::Incoming;
            call.call_id = call_id.clone();
            call.from_uri = from_uri.clone();
            call.from_tag = from_tag;
            call.to_uri = to_uri;
            call.to_tag = to_tag.clone();
            call.contact_uri = contact_uri;
            call.record_route = record_route;
            call.remote_ip = target_ip.clone();
            call.remote_sip_port = target_port;
            call.remote_rtp_ip = remote_rtp_ip;
            call.remote_rtp_port = remote_rtp_port;
            call.local_rtp_port = local_rtp_port;
            call.ssrc = ssrc;
            call.cseq_invite = cseq_invite;
            call.touch(Instant::now());
        }
        info!(slot, %call_id, from = %from_uri, "incoming call");
        self.emit(SipEvent::IncomingCall {
            slot,
            from_uri,
        });

        let trying = self.build_reply(message, 100, None, None);
        let ringing = self.build_reply(message, 180, Some(&to_tag), None);
        let answer = SdpAnswer::new(&self.config.local_ip, local_rtp_port).render();
        let ok = self.build_reply(message, 200, Some(&to_tag), Some(answer));
        let (Ok(trying), Ok(ringing), Ok(ok)) = (trying, ringing, ok) else {
            warn!(slot, "failed to build responses for INVITE");
            self.teardown(slot);
            return;
        };

        let _ = self.send_text(&target_ip, target_port, &trying).await;
        self.set_call_state(slot, CallState::Ringing);
        let _ = self.send_text(&target_ip, target_port, &ringing).await;
        let _ = self.send_text(&target_ip, target_port, &ok).await;
        {
            let mut calls = self.calls.lock();
            if let Some(call) = calls.get_mut(slot) {
                call.last_ok = Some(ok);
                call.state = CallState::WaitingForAck;
                call.touch(Instant::now());
            }
        }
        self.emit(SipEvent::CallStateChanged {
            slot,
            state: CallState::WaitingForAck,
        });
    }

    fn on_ack(&self, message: &SipMessage<'_>) {
        let Some(call_id) = message.header("Call-ID") else {
            debug!("ACK without Call-ID");
            return;
        };

        let slot = {
            let mut calls = self.calls.lock();
            match calls.find(call_id) {
                Some(slot) => {
                    let call = calls.get_mut(slot).expect("found slot exists");
                    if call.state == CallState::WaitingForAck {
                        call.state = CallState::Active;
                        call.touch(Instant::now());
                        Some(slot)
                    } else {
                        // not an error; late ACKs after the workaround land here
                        debug!(slot, state = %call.state, "ACK in unexpected state");
                        None
                    }
                }
                None => {
                    debug!(call_id, "ACK for unknown call");
                    None
                }
            }
        };

        if let Some(slot) = slot {
            info!(slot, "call active");
            self.media.clock().reset_call(slot);
            self.emit(SipEvent::CallStateChanged {
                slot,
                state: CallState::Active,
            });
        }
    }

    async fn on_bye(&self, message: &SipMessage<'_>, datagram: &Datagram) {
        let Some(call_id) = message.header("Call-ID") else {
            debug!("BYE without Call-ID");
            return;
        };

        let target = {
            let calls = self.calls.lock();
            calls.find(call_id).map(|slot| {
                let call = calls.get(slot).expect("found slot exists");
                (slot, call.remote_ip.clone(), call.remote_sip_port)
            })
        };

        let Some((slot, remote_ip, remote_port)) = target else {
            debug!(call_id, "BYE for unknown call");
            self.reply_to_source(message, 481, datagram).await;
            return;
        };

        info!(slot, "BYE received");
        if let Ok(ok) = self.build_reply(message, 200, None, None) {
            let _ = self.send_text(&remote_ip, remote_port, &ok).await;
        }
        self.teardown(slot);
    }

    async fn on_cancel(&self, message: &SipMessage<'_>, datagram: &Datagram) {
        let Some(call_id) = message.header("Call-ID") else {
            debug!("CANCEL without Call-ID");
            return;
        };

        let cancelled = {
            let calls = self.calls.lock();
            calls.find(call_id).map(|slot| {
                let call = calls.get(slot).expect("found slot exists");
                let early = matches!(
                    call.state,
                    CallState::Ringing | CallState::WaitingForAck | CallState::Trying
                );
                let terminated = early.then(|| {
                    (
                        self.build_final_from_call(487, call),
                        call.remote_ip.clone(),
                        call.remote_sip_port,
                    )
                });
                (slot, terminated)
            })
        };

        let Some((slot, terminated)) = cancelled else {
            debug!(call_id, "CANCEL for unknown call");
            self.reply_to_source(message, 481, datagram).await;
            return;
        };

        info!(slot, "CANCEL received");
        self.reply_to_source(message, 200, datagram).await;

        // the original INVITE transaction is answered 487 with its own CSeq
        if let Some((response, remote_ip, remote_port)) = terminated {
            let _ = self.send_text(&remote_ip, remote_port, &response).await;
        }
        self.teardown(slot);
    }

    async fn on_response(&self, message: &SipMessage<'_>, code: u16) {
        let Ok((cseq, cseq_method)) = message.cseq() else {
            debug!(code, "response without CSeq dropped");
            return;
        };

        match (code, cseq_method.as_str()) {
            (401, "REGISTER") => self.on_register_challenge(message),
            (200, "REGISTER") => self.on_register_ok(message),
            (200, "INVITE") => self.on_invite_ok(message, cseq).await,
            (200, "BYE") => {
                let slot = message
                    .header("Call-ID")
                    .and_then(|call_id| self.calls.lock().find(call_id));
                if let Some(slot) = slot {
                    debug!(slot, "BYE confirmed");
                    self.teardown(slot);
                }
            }
            (code, "INVITE") if code >= 400 => {
                // 486/603/404/487 and friends: the dialog is over
                let slot = { self.calls.lock().find_by_invite_cseq(cseq) };
                match slot {
                    Some(slot) => {
                        info!(slot, code, "outgoing call rejected");
                        self.teardown(slot);
                    }
                    None => debug!(code, cseq, "final response for unknown INVITE"),
                }
            }
            _ => trace!(code, method = %cseq_method, "response ignored"),
        }
    }

    fn on_register_challenge(&self, message: &SipMessage<'_>) {
        let mut registration = self.registration.lock();
        if registration.auth_attempted {
            // a second 401 is not retried; registration stalls until renewal
            warn!("REGISTER challenged again after authentication, stalled");
            return;
        }

        let Some(header) = message.header("WWW-Authenticate") else {
            warn!("401 without WWW-Authenticate, proceeding unauthenticated");
            return;
        };
        match DigestChallenge::parse(header) {
            Ok(mut challenge) => {
                if let Some(realm) = &self.config.realm {
                    challenge.override_realm(realm);
                }
                debug!(realm = %challenge.realm, "digest challenge captured");
                registration.apply_challenge(challenge);
            }
            Err(err) => {
                // unusable challenge: the next attempt stays unauthenticated
                warn!(%err, "malformed digest challenge");
            }
        }
    }

    fn on_register_ok(&self, message: &SipMessage<'_>) {
        let mut registration = self.registration.lock();
        registration.mark_registered(message.expires(), Instant::now());
        info!(expires = registration.expires, "registered with SIP server");
        drop(registration);
        self.emit(SipEvent::RegistrationChanged { registered: true });
    }

    async fn on_invite_ok(&self, message: &SipMessage<'_>, cseq: u32) {
        let updated = {
            let mut calls = self.calls.lock();
            let Some(slot) = calls.find_by_invite_cseq(cseq) else {
                warn!(cseq, "200 OK for unknown INVITE");
                return;
            };
            let call = calls.get_mut(slot).expect("found slot exists");

            if let Some(to_tag) = message.header_param("To", "tag") {
                call.to_tag = to_tag;
            }
            if let Some(route) = message.header("Record-Route") {
                call.record_route = route.to_string();
            }
            if let Ok(contact) = message.header_uri("Contact") {
                if let Some((ip, port)) = parse_contact_addr(&contact) {
                    call.remote_ip = ip;
                    call.remote_sip_port = port;
                }
                call.contact_uri = contact;
            }

            // the answer's SDP names the remote media endpoint
            let sdp = message.body().map(SdpSession::parse).unwrap_or_default();
            call.remote_rtp_ip = sdp.connection_ip.unwrap_or_else(|| call.remote_ip.clone());
            call.remote_rtp_port = sdp.audio_port.unwrap_or(FALLBACK_MEDIA_PORT);
            call.touch(Instant::now());

            (
                slot,
                self.build_ack(call),
                call.remote_ip.clone(),
                call.remote_sip_port,
                call.local_rtp_port,
                call.ssrc,
                format!("{}:{}", call.remote_rtp_ip, call.remote_rtp_port),
            )
        };
        let (slot, ack, remote_ip, remote_port, local_rtp_port, ssrc, remote_media) = updated;

        // media channel comes up now that the dialog is answered
        let has_channel = self.channels.lock()[slot].is_some();
        if !has_channel {
            match remote_media.parse::<SocketAddr>() {
                Ok(remote) => {
                    match RtpChannel::open(
                        slot,
                        local_rtp_port,
                        remote,
                        ssrc,
                        PayloadType::Pcma.value(),
                        PayloadType::Pcma.clock_rate(),
                        self.media.packet_sink(),
                    )
                    .await
                    {
                        Ok(channel) => self.channels.lock()[slot] = Some(Arc::new(channel)),
                        Err(err) => warn!(slot, %err, "RTP channel setup failed on answer"),
                    }
                }
                Err(_) => warn!(slot, %remote_media, "unusable media address in 200 OK"),
            }
        }

        let _ = self.send_text(&remote_ip, remote_port, &ack).await;
        {
            let mut calls = self.calls.lock();
            if let Some(call) = calls.get_mut(slot) {
                call.state = CallState::Active;
                call.touch(Instant::now());
            }
        }
        info!(slot, "outgoing call answered");
        self.media.clock().reset_call(slot);
        self.emit(SipEvent::CallStateChanged {
            slot,
            state: CallState::Active,
        });
    }

    // ------------------------------------------------------------------
    // Timers and registration drive
    // ------------------------------------------------------------------

    async fn drive_registration(&self, now: Instant) {
        let any_established = self.calls.lock().any_established();
        let action = {
            let mut registration = self.registration.lock();
            match registration.state {
                SipState::Initializing => {
                    registration.state = SipState::Registering;
                    Some(RegisterAction::Initial)
                }
                SipState::Registering => {
                    if registration.challenge.is_some() && !registration.auth_attempted {
                        registration.auth_attempted = true;
                        registration
                            .challenge
                            .clone()
                            .map(RegisterAction::Authenticated)
                    } else {
                        None
                    }
                }
                SipState::Registered => {
                    // renewal is suppressed while any call is up; a long call
                    // can lapse the registration past the server's expiry
                    if registration.renewal_due(now) && !any_established {
                        registration.begin_renewal();
                        Some(RegisterAction::Renewal)
                    } else {
                        None
                    }
                }
            }
        };

        match action {
            Some(RegisterAction::Initial) => {
                info!("starting registration");
                self.send_register(None).await;
            }
            Some(RegisterAction::Authenticated(challenge)) => {
                info!("re-sending REGISTER with digest credentials");
                self.send_register(Some(&challenge)).await;
            }
            Some(RegisterAction::Renewal) => {
                info!("registration renewal due");
                self.send_register(None).await;
            }
            None => {}
        }
    }

    async fn send_register(&self, challenge: Option<&DigestChallenge>) {
        let (cseq, expires) = {
            let mut registration = self.registration.lock();
            (registration.next_cseq(), registration.expires)
        };
        let uri = self.config.registrar_uri();

        let mut builder = RequestBuilder::new(Method::Register, &uri)
            .via(&self.config.local_ip, self.config.local_port, &new_branch())
            .max_forwards(70)
            .from(&self.config.from_uri(), &new_tag())
            .to(&self.config.from_uri(), None)
            .call_id(&self.session_call_id)
            .cseq(cseq, Method::Register)
            .user_agent(&self.config.user_agent)
            .contact(&self.config.contact_uri())
            .expires(expires);

        if let Some(challenge) = challenge {
            let credentials = DigestCredentials::compute(
                challenge,
                Method::Register.as_str(),
                &uri,
                &self.config.username,
                &self.config.password,
                self.config.qop_enabled,
            );
            builder = builder.header("Authorization", &credentials.authorization_value());
        }

        let message = builder.build();
        if let Err(err) = self
            .send_text(&self.config.server, self.config.server_port, &message)
            .await
        {
            warn!(%err, "REGISTER send failed");
        }
    }

    async fn drive_call_timers(&self, now: Instant) {
        let mut forced: Vec<usize> = Vec::new();
        let mut expired: Vec<(usize, Option<(String, u16, String)>)> = Vec::new();

        {
            let mut calls = self.calls.lock();
            for call in calls.iter_mut() {
                if call.is_idle() {
                    continue;
                }
                let idle_for = match call.last_activity {
                    Some(at) => now.saturating_duration_since(at),
                    None => Duration::ZERO,
                };

                // lost-ACK workaround: force the dialog active exactly once
                if call.state == CallState::WaitingForAck
                    && !call.forced_active
                    && idle_for > ACK_WAIT
                {
                    warn!(slot = call.slot, "no ACK, forcing call active");
                    call.state = CallState::Active;
                    call.forced_active = true;
                    call.touch(now);
                    forced.push(call.slot);
                    continue;
                }

                if idle_for > CALL_INACTIVITY {
                    warn!(slot = call.slot, state = %call.state, "call inactivity timeout");
                    let still_establishing =
                        matches!(call.state, CallState::Trying | CallState::Ringing);
                    let timeout_response = still_establishing.then(|| {
                        (
                            call.remote_ip.clone(),
                            call.remote_sip_port,
                            self.build_final_from_call(408, call),
                        )
                    });
                    expired.push((call.slot, timeout_response));
                }
            }
        }

        for slot in forced {
            self.media.clock().reset_call(slot);
            self.emit(SipEvent::CallStateChanged {
                slot,
                state: CallState::Active,
            });
        }
        for (slot, timeout_response) in expired {
            if let Some((remote_ip, remote_port, response)) = timeout_response {
                let _ = self.send_text(&remote_ip, remote_port, &response).await;
            }
            self.teardown(slot);
        }
    }

    fn on_network_lost(&self) {
        let was_registered = {
            let mut registration = self.registration.lock();
            let was = registration.is_registered() || registration.state != SipState::Initializing;
            if was {
                warn!("network unavailable, registration dropped");
            }
            let was_registered = registration.is_registered();
            registration.reset();
            was_registered
        };
        // calls are left alone, only the audio path stops
        self.media.set_enabled(false);
        if was_registered {
            self.emit(SipEvent::RegistrationChanged { registered: false });
        }
    }

    // ------------------------------------------------------------------
    // Teardown and helpers
    // ------------------------------------------------------------------

    /// Return a slot to the pool
    ///
    /// The RTP channel is closed and the jitter slots invalidated before the
    /// record is cleared, so a late media packet cannot reach a successor
    /// call on the same index.
    fn teardown(&self, slot: usize) {
        let channel = self
            .channels
            .lock()
            .get_mut(slot)
            .and_then(Option::take);
        if let Some(channel) = channel {
            channel.close();
        }
        self.media.clear_slot(slot);
        self.calls.lock().reset(slot);
        info!(slot, "call slot released");
        self.emit(SipEvent::CallEnded { slot });
    }

    fn set_call_state(&self, slot: usize, state: CallState) {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get_mut(slot) {
            call.state = state;
            call.touch(Instant::now());
        }
        drop(calls);
        self.emit(SipEvent::CallStateChanged { slot, state });
    }

    fn active_media_slots(&self) -> Vec<(usize, u8)> {
        let calls = self.calls.lock();
        let channels = self.channels.lock();
        calls
            .iter()
            .filter(|call| call.state == CallState::Active)
            .map(|call| {
                let payload_type = channels
                    .get(call.slot)
                    .and_then(|c| c.as_ref())
                    .map(|c| c.payload_type())
                    .unwrap_or(PayloadType::Pcma.value());
                (call.slot, payload_type)
            })
            .collect()
    }

    /// Build a response echoing a received request
    ///
    /// 100 Trying gets a fresh local Via prepended and no To-tag; every other
    /// status echoes the request's Via with received/rport appended, carries
    /// the dialog To-tag (a random one when none is fixed yet) and this
    /// endpoint's Contact.
    fn build_reply(
        &self,
        request: &SipMessage<'_>,
        code: u16,
        to_tag: Option<&str>,
        sdp: Option<String>,
    ) -> Result<String> {
        let call_id = request.header_required("Call-ID")?;
        let from_full = request
            .header("From")
            .ok_or(emvoip_sip_core::Error::MissingHeader { name: "From" })?;
        let to_full = request
            .header("To")
            .ok_or(emvoip_sip_core::Error::MissingHeader { name: "To" })?;
        let (cseq, cseq_method) = request.cseq()?;
        let vias = request.headers_all("Via");
        if vias.is_empty() {
            return Err(emvoip_sip_core::Error::MissingHeader { name: "Via" }.into());
        }

        let mut builder = ResponseBuilder::new(code);

        if code == 100 {
            builder = builder.via_raw(&format!(
                "SIP/2.0/UDP {}:{};branch={}",
                self.config.local_ip,
                self.config.local_port,
                new_branch()
            ));
            for via in &vias {
                builder = builder.via_raw(via);
            }
            builder = builder
                .from_raw(from_full, None)
                .to_raw(strip_tag(to_full), None);
        } else {
            builder = builder.via_raw(&format!(
                "{};received={};rport={}",
                vias[0], self.config.local_ip, self.config.local_port
            ));
            for via in &vias[1..] {
                builder = builder.via_raw(via);
            }
            let tag = match to_tag {
                Some(tag) => tag.to_string(),
                None => new_tag(),
            };
            builder = builder
                .from_raw(from_full, None)
                .to_raw(strip_tag(to_full), Some(&tag));
        }

        builder = builder.call_id(&call_id).cseq_raw(cseq, &cseq_method);

        if code != 100 {
            for route in request.headers_all("Record-Route") {
                builder = builder.record_route(route);
            }
            builder = builder
                .contact(&self.config.contact_uri())
                .user_agent(&self.config.user_agent);
        }

        if let Some(sdp) = sdp {
            builder = builder.body("application/sdp", &sdp);
        }
        Ok(builder.build())
    }

    /// Build a final response for a dialog from the stored call record
    /// (487 after CANCEL, 408 on establishment timeout)
    fn build_final_from_call(&self, code: u16, call: &Call) -> String {
        let from_tag = (!call.from_tag.is_empty()).then_some(call.from_tag.as_str());
        let to_tag = (!call.to_tag.is_empty()).then_some(call.to_tag.as_str());
        ResponseBuilder::new(code)
            .via_raw(&format!(
                "SIP/2.0/UDP {}:{};branch={}",
                self.config.local_ip,
                self.config.local_port,
                new_branch()
            ))
            .from_raw(&format!("<{}>", call.from_uri), from_tag)
            .to_raw(&format!("<{}>", call.to_uri), to_tag)
            .call_id(&call.call_id)
            .cseq_raw(call.cseq_invite, Method::Invite.as_str())
            .user_agent(&self.config.user_agent)
            .build()
    }

    fn build_ack(&self, call: &Call) -> String {
        let target = if call.contact_uri.is_empty() {
            call.to_uri.clone()
        } else {
            call.contact_uri.clone()
        };
        let to_tag = (!call.to_tag.is_empty()).then_some(call.to_tag.as_str());
        RequestBuilder::new(Method::Ack, &target)
            .via(&self.config.local_ip, self.config.local_port, &new_branch())
            .from(&call.from_uri, &call.from_tag)
            .to(&call.to_uri, to_tag)
            .call_id(&call.call_id)
            .cseq(call.cseq_invite, Method::Ack)
            .user_agent(&self.config.user_agent)
            .build()
    }

    /// BYE for an established dialog; CSeq continues past the INVITE
    fn build_bye(&self, call: &Call) -> (String, u16, String) {
        let (target_ip, target_port) = parse_contact_addr(&call.contact_uri)
            .unwrap_or_else(|| (call.remote_ip.clone(), call.remote_sip_port));
        let to_tag = (!call.to_tag.is_empty()).then_some(call.to_tag.as_str());
        let target = if call.contact_uri.is_empty() {
            call.to_uri.clone()
        } else {
            call.contact_uri.clone()
        };
        let message = RequestBuilder::new(Method::Bye, &target)
            .via(&self.config.local_ip, self.config.local_port, &new_branch())
            .from(&call.from_uri, &call.from_tag)
            .to(&call.to_uri, to_tag)
            .call_id(&call.call_id)
            .cseq(call.cseq_invite + 1, Method::Bye)
            .user_agent(&self.config.user_agent)
            .build();
        (target_ip, target_port, message)
    }

    async fn reply_to_source(&self, request: &SipMessage<'_>, code: u16, datagram: &Datagram) {
        match self.build_reply(request, code, None, None) {
            Ok(response) => {
                if let Err(err) = self
                    .transport
                    .send_to(datagram.source, response.as_bytes())
                    .await
                {
                    warn!(code, %err, "response send failed");
                }
            }
            Err(err) => debug!(code, %err, "cannot build response, dropping"),
        }
    }

    async fn send_text(&self, ip: &str, port: u16, message: &str) -> Result<()> {
        let target = format!("{ip}:{port}")
            .parse::<SocketAddr>()
            .map_err(|_| Error::InvalidTarget {
                target: format!("{ip}:{port}"),
            })?;
        self.transport
            .send_to(target, message.as_bytes())
            .await
            .map_err(|source| Error::Transport { source })?;
        trace!(%target, len = message.len(), "signaling sent");
        Ok(())
    }

    fn emit(&self, event: SipEvent) {
        let _ = self.events.send(event);
    }
}

fn new_branch() -> String {
    format!("z9hG4bK{:08x}", rand::random::<u32>())
}

fn new_tag() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// Pull host and port out of a contact-style URI
///
/// Understands `<sip:user@10.0.0.5:5062;transport=udp>`, `sip:user@10.0.0.5`
/// and the user-less `sip:10.0.0.5:5060`; the port defaults to 5060.
fn parse_contact_addr(uri: &str) -> Option<(String, u16)> {
    let inner = match uri.find('<') {
        Some(lt) => uri[lt + 1..].split('>').next().unwrap_or(""),
        None => uri,
    };
    let host_part = match inner.find('@') {
        Some(at) => &inner[at + 1..],
        None => inner.strip_prefix("sip:")?,
    };
    let host_part = host_part
        .split(|c| matches!(c, ';' | '>'))
        .next()
        .unwrap_or("");

    let (host, port) = match host_part.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().ok()?),
        None => (host_part, emvoip_sip_core::SIP_PORT),
    };
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port))
}
