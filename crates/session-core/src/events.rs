//! Engine events surfaced to the host
//!
//! The engine pushes these on an unbounded channel; the host (UI, watchdog,
//! call history) consumes them at its own pace. Losing the receiver is
//! harmless, sends are fire-and-forget.

use crate::calls::CallState;

/// Notifications emitted by [`crate::SipEndpoint`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipEvent {
    /// Registration with the server was gained or lost
    RegistrationChanged { registered: bool },

    /// A new incoming call occupies a slot
    IncomingCall { slot: usize, from_uri: String },

    /// A call moved to a new lifecycle state
    CallStateChanged { slot: usize, state: CallState },

    /// A call slot was torn down and returned to the pool
    CallEnded { slot: usize },
}
