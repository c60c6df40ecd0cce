//! SIP session engine for the emvoip stack
//!
//! [`SipEndpoint`] is the heart of the endpoint: it registers with the SIP
//! server, dispatches inbound signaling, drives the call dialog table, opens
//! and tears down RTP channels and bridges call audio to the external codec
//! link. The engine is poll-driven: the host loop calls
//! [`SipEndpoint::poll`] repeatedly; inbound datagrams arrive through the
//! transport's queue and nothing ever blocks.
//!
//! ## Layering
//!
//! ```text
//! host loop -> session-core -> { sip-core, rtp-core, media-core }
//! ```

pub mod calls;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod media;
pub mod registration;
pub mod transport;

pub use calls::{Call, CallDirection, CallState, CallTable};
pub use config::EndpointConfig;
pub use endpoint::SipEndpoint;
pub use errors::{Error, Result};
pub use events::SipEvent;
pub use media::MediaBridge;
pub use registration::{RegistrationSession, SipState};
pub use transport::{Datagram, SignalTransport, UdpSignalTransport};
