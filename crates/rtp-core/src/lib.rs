//! RTP media transport for the emvoip stack
//!
//! One [`RtpChannel`] is opened per active call, bound to its own UDP socket.
//! Received packets are parsed, folded into RFC 3550 receiver statistics and
//! forwarded to the media sink; outgoing audio is framed into the fixed
//! 12-byte RTP header and sent to the negotiated remote endpoint.

pub mod channel;
pub mod error;
pub mod packet;
pub mod payload;
pub mod stats;

pub use channel::{MediaPacket, RtpChannel};
pub use error::{Error, Result};
pub use packet::{RtpHeader, RtpPacket, RTP_HEADER_SIZE, RTP_VERSION};
pub use payload::PayloadType;
pub use stats::{QualitySnapshot, RtpStats};

/// RTP sequence number type
pub type RtpSequenceNumber = u16;

/// RTP timestamp type
pub type RtpTimestamp = u32;

/// RTP synchronization source identifier type
pub type RtpSsrc = u32;

/// Generate a random synchronization source identifier for a new channel
pub fn random_ssrc() -> RtpSsrc {
    rand::random()
}
