//! Endpoint configuration
//!
//! Read-only from the engine's perspective; the host owns persistence and
//! hands a populated config to [`crate::SipEndpoint`]. Builder-style setters
//! cover the optional pieces.

use serde::{Deserialize, Serialize};

use emvoip_sip_core::SIP_PORT;

/// Configuration for one SIP endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// SIP account username
    pub username: String,

    /// SIP account password
    pub password: String,

    /// Registrar/proxy host (name or address)
    pub server: String,

    /// Registrar signaling port
    pub server_port: u16,

    /// Optional SIP domain; when set it replaces the server host in URIs
    pub domain: Option<String>,

    /// Optional authentication realm override; wins over the server's realm
    pub realm: Option<String>,

    /// Registration lifetime requested in REGISTER, seconds
    pub expires: u32,

    /// Whether Digest qop=auth is applied when the server offers it
    pub qop_enabled: bool,

    /// Fixed call slot count
    pub max_calls: usize,

    /// First local RTP port; slot N uses `rtp_base_port + 2 * N`
    pub rtp_base_port: u16,

    /// Advertised local address for Via/Contact/SDP
    pub local_ip: String,

    /// Local SIP signaling port
    pub local_port: u16,

    /// User-Agent header value
    pub user_agent: String,
}

impl EndpointConfig {
    pub fn new(server: &str, username: &str, password: &str, local_ip: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            server: server.to_string(),
            server_port: SIP_PORT,
            domain: None,
            realm: None,
            expires: 3600,
            qop_enabled: false,
            max_calls: 2,
            rtp_base_port: 16384,
            local_ip: local_ip.to_string(),
            local_port: SIP_PORT,
            user_agent: "emvoip/0.1".to_string(),
        }
    }

    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_string());
        self
    }

    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = Some(realm.to_string());
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_qop(mut self, enabled: bool) -> Self {
        self.qop_enabled = enabled;
        self
    }

    pub fn with_max_calls(mut self, max_calls: usize) -> Self {
        self.max_calls = max_calls;
        self
    }

    pub fn with_rtp_base_port(mut self, port: u16) -> Self {
        self.rtp_base_port = port;
        self
    }

    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Host used in registration URIs: the domain when set, else the server
    pub fn register_host(&self) -> &str {
        match &self.domain {
            Some(domain) if !domain.is_empty() => domain,
            _ => &self.server,
        }
    }

    /// Request-URI of the registrar
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.register_host())
    }

    /// Public identity of this account
    pub fn from_uri(&self) -> String {
        format!("sip:{}@{}", self.username, self.register_host())
    }

    /// Where this endpoint is reachable
    pub fn contact_uri(&self) -> String {
        format!("sip:{}@{}:{}", self.username, self.local_ip, self.local_port)
    }

    /// Local media port assigned to a call slot
    pub fn rtp_port_for_slot(&self, slot: usize) -> u16 {
        self.rtp_base_port + (slot as u16) * 2
    }
}
