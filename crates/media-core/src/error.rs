//! Error types for emvoip-media-core

use thiserror::Error;

/// Result type for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the media layer
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Every jitter buffer slot is occupied; the write is rejected
    #[error("jitter buffer full, rejecting sequence {sequence}")]
    BufferFull { sequence: u16 },

    /// The buffer lock could not be taken within the bounded wait
    #[error("jitter buffer contended, dropping packet")]
    Contended,

    /// An audio-link frame did not start with the expected magic bytes
    #[error("bad frame magic: {found:02x?}")]
    BadMagic { found: [u8; 2] },

    /// An audio-link frame is shorter than its header
    #[error("truncated frame: required {required} bytes, available {available}")]
    TruncatedFrame { required: usize, available: usize },

    /// A frame's declared payload length exceeds the received bytes
    #[error("frame length mismatch: declared {declared}, available {available}")]
    LengthMismatch { declared: usize, available: usize },
}
