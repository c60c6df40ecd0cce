//! Error types for emvoip-session-core

use thiserror::Error;

/// Result type for session engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the session engine
#[derive(Debug, Error)]
pub enum Error {
    /// SIP parsing or construction failed
    #[error("SIP protocol error: {0}")]
    Sip(#[from] emvoip_sip_core::Error),

    /// RTP layer failure
    #[error("RTP error: {0}")]
    Rtp(#[from] emvoip_rtp_core::Error),

    /// Media layer failure
    #[error("media error: {0}")]
    Media(#[from] emvoip_media_core::Error),

    /// An outgoing call was attempted before registration completed
    #[error("not registered with the SIP server")]
    NotRegistered,

    /// Every call slot is in use
    #[error("call pool exhausted")]
    CallPoolExhausted,

    /// A slot index does not name a usable call
    #[error("no such call slot: {slot}")]
    InvalidSlot { slot: usize },

    /// A URI or address could not be resolved to a send target
    #[error("invalid signaling target: {target}")]
    InvalidTarget { target: String },

    /// The transport refused or failed a send
    #[error("transport send failed")]
    Transport {
        #[source]
        source: std::io::Error,
    },

    /// The underlying network is not usable yet
    #[error("network unavailable")]
    NetworkUnavailable,
}
