//! SDP subset for audio negotiation (RFC 4566)
//!
//! Only the lines this endpoint acts on are modeled: the connection address
//! (`c=IN IP4`), the audio media line (`m=audio`) and its payload list.
//! Everything else in a received body is ignored.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Parsed view of a received SDP body
///
/// Absent fields stay `None`; the caller supplies fallbacks (the packet
/// source address and the default media port).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpSession {
    pub connection_ip: Option<String>,
    pub audio_port: Option<u16>,
    pub payload_types: Vec<u8>,
}

impl SdpSession {
    /// Extract connection address and audio media line from a body
    ///
    /// Tolerant by design: a missing or malformed line leaves its field unset
    /// rather than failing the INVITE.
    pub fn parse(body: &str) -> SdpSession {
        let mut session = SdpSession::default();

        for line in body.lines() {
            let line = line.trim_end_matches('\r');
            if let Some(rest) = line.strip_prefix("c=IN IP4 ") {
                session.connection_ip = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("m=audio ") {
                let mut fields = rest.split_whitespace();
                match fields.next().and_then(|p| p.parse::<u16>().ok()) {
                    Some(port) => session.audio_port = Some(port),
                    None => warn!("unparseable m=audio port in SDP"),
                }
                // skip the transport token, the rest are payload types
                session.payload_types = fields
                    .skip(1)
                    .filter_map(|pt| pt.parse::<u8>().ok())
                    .collect();
            }
        }
        session
    }
}

/// SDP offer carried in an outgoing INVITE
///
/// Offers PCMU, PCMA, G.722 and telephone-event, all at 8 kHz.
#[derive(Debug, Clone)]
pub struct SdpOffer {
    pub local_ip: String,
    pub audio_port: u16,
}

impl SdpOffer {
    pub fn new(local_ip: &str, audio_port: u16) -> Self {
        Self {
            local_ip: local_ip.to_string(),
            audio_port,
        }
    }

    pub fn render(&self) -> String {
        let session_id = rand::random::<u32>();
        let session_version = rand::random::<u32>();
        format!(
            "v=0\r\n\
             o=- {session_id} {session_version} IN IP4 {ip}\r\n\
             s=emvoip call\r\n\
             c=IN IP4 {ip}\r\n\
             t=0 0\r\n\
             m=audio {port} RTP/AVP 0 8 9 101\r\n\
             a=rtpmap:0 PCMU/8000\r\n\
             a=rtpmap:8 PCMA/8000\r\n\
             a=rtpmap:9 G722/8000\r\n\
             a=rtpmap:101 telephone-event/8000\r\n\
             a=fmtp:101 0-15\r\n",
            ip = self.local_ip,
            port = self.audio_port,
        )
    }
}

/// SDP answer carried in the 200 OK to an incoming INVITE
///
/// Answers with PCMA plus telephone-event.
#[derive(Debug, Clone)]
pub struct SdpAnswer {
    pub local_ip: String,
    pub audio_port: u16,
}

impl SdpAnswer {
    pub fn new(local_ip: &str, audio_port: u16) -> Self {
        Self {
            local_ip: local_ip.to_string(),
            audio_port,
        }
    }

    pub fn render(&self) -> String {
        let session_id = rand::random::<u32>();
        let session_version = rand::random::<u32>();
        format!(
            "v=0\r\n\
             o=- {session_id} {session_version} IN IP4 {ip}\r\n\
             s=emvoip call\r\n\
             c=IN IP4 {ip}\r\n\
             t=0 0\r\n\
             m=audio {port} RTP/AVP 8 101\r\n\
             a=rtpmap:8 PCMA/8000\r\n\
             a=rtpmap:101 telephone-event/8000\r\n\
             a=fmtp:101 0-16\r\n\
             a=sendrecv\r\n",
            ip = self.local_ip,
            port = self.audio_port,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connection_and_media_line() {
        let body = "v=0\r\n\
                    o=- 1 1 IN IP4 10.0.0.5\r\n\
                    s=-\r\n\
                    c=IN IP4 10.0.0.5\r\n\
                    t=0 0\r\n\
                    m=audio 40000 RTP/AVP 0 8 101\r\n\
                    a=rtpmap:0 PCMU/8000\r\n";
        let session = SdpSession::parse(body);
        assert_eq!(session.connection_ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(session.audio_port, Some(40000));
        assert_eq!(session.payload_types, vec![0, 8, 101]);
    }

    #[test]
    fn missing_lines_leave_fields_unset() {
        let session = SdpSession::parse("v=0\r\ns=-\r\n");
        assert_eq!(session.connection_ip, None);
        assert_eq!(session.audio_port, None);
        assert!(session.payload_types.is_empty());
    }

    #[test]
    fn offer_and_answer_parse_back() {
        let offer = SdpOffer::new("192.168.1.40", 16384).render();
        let session = SdpSession::parse(&offer);
        assert_eq!(session.connection_ip.as_deref(), Some("192.168.1.40"));
        assert_eq!(session.audio_port, Some(16384));
        assert_eq!(session.payload_types, vec![0, 8, 9, 101]);

        let answer = SdpAnswer::new("192.168.1.40", 16384).render();
        let session = SdpSession::parse(&answer);
        assert_eq!(session.payload_types, vec![8, 101]);
        assert!(answer.contains("a=sendrecv"));
    }
}
