//! Error types for emvoip-rtp-core

use thiserror::Error;

/// Result type for RTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the RTP layer
#[derive(Debug, Error)]
pub enum Error {
    /// Packet shorter than required
    #[error("buffer too small: required {required} bytes, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Version field was not 2
    #[error("invalid RTP version: {version}")]
    InvalidVersion { version: u8 },

    /// Failed to bind the channel's local UDP port
    #[error("failed to bind RTP port {port}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Failed to transmit a packet
    #[error("failed to send RTP packet")]
    Send {
        #[source]
        source: std::io::Error,
    },
}
