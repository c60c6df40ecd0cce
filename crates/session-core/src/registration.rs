//! Registration state machine
//!
//! A single registration session against one registrar. The engine drives it
//! from `poll()`: INITIALIZING issues the first REGISTER, a 401 challenge is
//! answered exactly once, and a renewal fires ahead of the negotiated expiry
//! while no call is up. State only; message construction lives in the
//! endpoint.

use std::time::{Duration, Instant};

use emvoip_sip_core::DigestChallenge;

/// Client protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipState {
    /// Waiting for a usable network before registering
    Initializing,
    /// REGISTER in flight (first attempt or authenticated retry)
    Registering,
    /// Accepted by the registrar
    Registered,
}

/// Margin subtracted from large expiries when scheduling renewal
const RENEWAL_MARGIN: u32 = 300;

/// The endpoint's single registration with its registrar
#[derive(Debug)]
pub struct RegistrationSession {
    pub state: SipState,
    registered: bool,
    last_success: Option<Instant>,
    /// Negotiated registration lifetime in seconds
    pub expires: u32,
    /// Pending Digest challenge from the last 401, if any
    pub challenge: Option<DigestChallenge>,
    /// Whether the held challenge was already answered; a second 401 stalls
    pub auth_attempted: bool,
    cseq: u32,
}

impl RegistrationSession {
    pub fn new(expires: u32) -> Self {
        Self {
            state: SipState::Initializing,
            registered: false,
            last_success: None,
            expires: if expires > 0 { expires } else { 3600 },
            challenge: None,
            auth_attempted: false,
            cseq: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Monotonically increasing CSeq for REGISTER requests
    pub fn next_cseq(&mut self) -> u32 {
        self.cseq += 1;
        self.cseq
    }

    /// Store a challenge to be answered on the next attempt
    pub fn apply_challenge(&mut self, challenge: DigestChallenge) {
        self.challenge = Some(challenge);
        self.auth_attempted = false;
    }

    /// Record a 200 OK for REGISTER
    pub fn mark_registered(&mut self, server_expires: Option<u32>, now: Instant) {
        self.state = SipState::Registered;
        self.registered = true;
        self.last_success = Some(now);
        if let Some(expires) = server_expires {
            if expires > 0 {
                self.expires = expires;
            }
        }
        self.challenge = None;
        self.auth_attempted = false;
    }

    /// Drop back to INITIALIZING (network loss, credential change)
    pub fn reset(&mut self) {
        self.state = SipState::Initializing;
        self.registered = false;
        self.last_success = None;
        self.challenge = None;
        self.auth_attempted = false;
    }

    /// Begin a re-registration cycle, clearing stale auth state
    pub fn begin_renewal(&mut self) {
        self.state = SipState::Registering;
        self.registered = false;
        self.challenge = None;
        self.auth_attempted = false;
    }

    /// Interval between a successful REGISTER and its renewal
    pub fn renewal_interval(&self) -> Duration {
        let seconds = if self.expires > RENEWAL_MARGIN {
            self.expires - RENEWAL_MARGIN
        } else {
            self.expires / 2
        };
        Duration::from_secs(u64::from(seconds))
    }

    /// When the next REGISTER should go out, if currently registered
    pub fn renewal_deadline(&self) -> Option<Instant> {
        Some(self.last_success? + self.renewal_interval())
    }

    /// Whether the renewal timer has elapsed
    pub fn renewal_due(&self, now: Instant) -> bool {
        match self.renewal_deadline() {
            Some(deadline) => self.registered && now >= deadline,
            None => false,
        }
    }
}
