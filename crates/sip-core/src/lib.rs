//! SIP protocol support for the emvoip stack
//!
//! This crate carries the wire-level pieces the session engine is built on:
//!
//! - [`message`]: request/response classification and bounded header extraction
//! - [`builder`]: CRLF request/response construction
//! - [`auth`]: RFC 2617 Digest authentication (MD5)
//! - [`sdp`]: the SDP subset used for audio negotiation
//!
//! The parser is deliberately scoped to what a single-registrar UDP endpoint
//! needs: first-line classification plus named header extraction over the raw
//! datagram text. It is not a general RFC 3261 grammar.

pub mod auth;
pub mod builder;
pub mod error;
pub mod message;
pub mod sdp;

pub use auth::{DigestChallenge, DigestCredentials};
pub use builder::{RequestBuilder, ResponseBuilder};
pub use error::{Error, Result};
pub use message::{Method, MessageKind, SipMessage};
pub use sdp::{SdpAnswer, SdpOffer, SdpSession};

/// Default SIP signaling port.
pub const SIP_PORT: u16 = 5060;

/// SIP protocol version string used on every first line.
pub const SIP_VERSION: &str = "SIP/2.0";
