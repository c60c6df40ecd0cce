//! Shared test harness: in-memory transport and codec link
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use emvoip_media_core::AudioLink;
use emvoip_session_core::{
    Datagram, EndpointConfig, SignalTransport, SipEndpoint, SipEvent,
};

/// Transport that records every datagram the engine sends
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(SocketAddr, String)>>,
    down: AtomicBool,
}

impl MockTransport {
    /// Drain and return everything sent since the last call
    pub fn take_sent(&self) -> Vec<(SocketAddr, String)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn set_ready(&self, ready: bool) {
        self.down.store(!ready, Ordering::Relaxed);
    }
}

#[async_trait]
impl SignalTransport for MockTransport {
    async fn send_to(&self, target: SocketAddr, data: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(data).to_string();
        self.sent.lock().push((target, text));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        !self.down.load(Ordering::Relaxed)
    }
}

/// Codec link that collects outbound frames
#[derive(Default)]
pub struct NullLink {
    pub frames: Mutex<Vec<Bytes>>,
}

impl AudioLink for NullLink {
    fn send_frame(&self, frame: Bytes) {
        self.frames.lock().push(frame);
    }
}

pub struct Harness {
    pub endpoint: SipEndpoint,
    pub events: mpsc::UnboundedReceiver<SipEvent>,
    pub transport: Arc<MockTransport>,
    inject_tx: mpsc::Sender<Datagram>,
}

impl Harness {
    pub fn new(config: EndpointConfig) -> Harness {
        let transport = Arc::new(MockTransport::default());
        let (inject_tx, inbound) = mpsc::channel(32);
        let link = Arc::new(NullLink::default());
        let (endpoint, events) = SipEndpoint::new(config, transport.clone(), inbound, link);
        Harness {
            endpoint,
            events,
            transport,
            inject_tx,
        }
    }

    /// Queue a datagram as if it arrived from the network
    pub fn inject(&self, text: &str, source: &str) {
        self.inject_tx
            .try_send(Datagram {
                data: Bytes::from(text.to_string()),
                source: source.parse().unwrap(),
            })
            .expect("inject queue full");
    }

    /// Collect all events currently queued
    pub fn drain_events(&mut self) -> Vec<SipEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A config against a test registrar; RTP ports are OS-assigned
pub fn test_config() -> EndpointConfig {
    EndpointConfig::new("10.0.0.1", "200", "secret", "192.168.1.40")
        .with_realm("emvoip.test")
        .with_rtp_base_port(0)
        .with_max_calls(2)
}

/// A minimal INVITE from a caller at 10.0.0.5 with SDP media at port 40000
pub fn invite(call_id: &str) -> String {
    format!(
        "INVITE sip:200@192.168.1.40 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK776asdhds\r\n\
         Max-Forwards: 70\r\n\
         From: <sip:alice@10.0.0.5>;tag=1928301774\r\n\
         To: <sip:200@192.168.1.40>\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 314159 INVITE\r\n\
         Contact: <sip:alice@10.0.0.5:5060>\r\n\
         Content-Type: application/sdp\r\n\
         Content-Length: 129\r\n\
         \r\n\
         v=0\r\n\
         o=- 1 1 IN IP4 10.0.0.5\r\n\
         s=call\r\n\
         c=IN IP4 10.0.0.5\r\n\
         t=0 0\r\n\
         m=audio 40000 RTP/AVP 0 8 101\r\n\
         a=rtpmap:8 PCMA/8000\r\n"
    )
}

/// An ACK closing the three-way handshake for `call_id`
pub fn ack(call_id: &str, to_tag: &str) -> String {
    format!(
        "ACK sip:200@192.168.1.40 SIP/2.0\r\n\
         Via: SIP/2.0/UDP 10.0.0.5:5060;branch=z9hG4bK887\r\n\
         From: <sip:alice@10.0.0.5>;tag=1928301774\r\n\
         To: <sip:200@192.168.1.40>;tag={to_tag}\r\n\
         Call-ID: {call_id}\r\n\
         CSeq: 314159 ACK\r\n\
         Content-Length: 0\r\n\
         \r\n"
    )
}
