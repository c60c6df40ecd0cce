//! Error types for emvoip-sip-core

use thiserror::Error;

/// Result type for SIP parsing and construction
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while parsing or building SIP messages
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The datagram does not start with a SIP request or status line
    #[error("not a SIP message")]
    NotSip,

    /// A required header is absent
    #[error("missing header: {name}")]
    MissingHeader { name: &'static str },

    /// A header value exceeds the bounded output length
    #[error("header {name} too long: {len} bytes (max {max})")]
    HeaderTooLong {
        name: &'static str,
        len: usize,
        max: usize,
    },

    /// A numeric field failed to parse
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// A Digest challenge is unusable (no nonce)
    #[error("malformed digest challenge: {reason}")]
    MalformedChallenge { reason: &'static str },

    /// The SDP body is absent or unusable
    #[error("invalid SDP body: {reason}")]
    InvalidSdp { reason: &'static str },
}
