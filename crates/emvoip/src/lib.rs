//! emvoip - an embedded VoIP endpoint stack
//!
//! Registers with a SIP server, negotiates and runs voice calls, and bridges
//! call audio to an external codec peripheral over a framed byte link.
//!
//! The stack is layered as:
//!
//! ```text
//! emvoip (this crate, re-exports)
//!   emvoip-session-core   registration, dialogs, call control, media wiring
//!   emvoip-sip-core       SIP messages, Digest auth, SDP subset
//!   emvoip-rtp-core       RTP packets, channels, RFC 3550 statistics
//!   emvoip-media-core     jitter buffer, media clock, codec-link framing
//! ```
//!
//! Typical hosts construct an [`EndpointConfig`], bind a
//! [`UdpSignalTransport`], hand both to [`SipEndpoint`] together with their
//! codec-link driver, and then call [`SipEndpoint::poll`] from the main loop
//! and [`SipEndpoint::bridge_tick`] from the audio task.

pub use emvoip_media_core as media;
pub use emvoip_rtp_core as rtp;
pub use emvoip_session_core as session;
pub use emvoip_sip_core as sip;

pub use emvoip_media_core::{AudioFrame, AudioLink, JitterBuffer, MediaClock};
pub use emvoip_rtp_core::{PayloadType, QualitySnapshot, RtpChannel, RtpPacket};
pub use emvoip_session_core::{
    CallState, EndpointConfig, SipEndpoint, SipEvent, SipState, UdpSignalTransport,
};
pub use emvoip_sip_core::{DigestChallenge, DigestCredentials, SdpSession, SipMessage};
