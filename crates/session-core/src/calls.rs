//! Call dialog store
//!
//! A fixed pool of call records addressed by slot index. Components never
//! hold references to a call across async boundaries; they carry the slot
//! index and look the record up under the table lock. A slot must pass
//! through [`Call::reset`] (every field cleared, state IDLE) before it can
//! host another dialog.

use std::fmt;
use std::time::Instant;

/// Lifecycle state of one call slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// Incoming INVITE accepted for processing, 100 sent
    Trying,
    /// 180 sent, waiting for local answer to complete
    Ringing,
    /// 200 sent, waiting for the peer's ACK
    WaitingForAck,
    /// Media may flow in both directions
    Active,
    /// Outgoing INVITE sent, waiting for the final response
    InviteSent,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "Idle",
            CallState::Trying => "Trying",
            CallState::Ringing => "Ringing",
            CallState::WaitingForAck => "WaitingForAck",
            CallState::Active => "Active",
            CallState::InviteSent => "InviteSent",
        };
        f.write_str(name)
    }
}

/// Which side initiated the dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// One call record
#[derive(Debug, Clone)]
pub struct Call {
    pub slot: usize,
    pub state: CallState,
    pub direction: CallDirection,
    pub call_id: String,
    pub from_uri: String,
    pub from_tag: String,
    pub to_uri: String,
    pub to_tag: String,
    pub contact_uri: String,
    pub record_route: String,
    /// Where signaling for this dialog is sent
    pub remote_ip: String,
    pub remote_sip_port: u16,
    /// Negotiated remote media endpoint
    pub remote_rtp_ip: String,
    pub remote_rtp_port: u16,
    pub local_rtp_port: u16,
    pub ssrc: u32,
    /// CSeq of the dialog's INVITE, used to match responses and build ACK/BYE
    pub cseq_invite: u32,
    pub last_activity: Option<Instant>,
    /// Rendered 200 OK, replayed verbatim on an INVITE retransmission
    pub last_ok: Option<String>,
    /// The lost-ACK workaround fired for this dialog
    pub forced_active: bool,
}

impl Call {
    fn new(slot: usize) -> Self {
        Self {
            slot,
            state: CallState::Idle,
            direction: CallDirection::Incoming,
            call_id: String::new(),
            from_uri: String::new(),
            from_tag: String::new(),
            to_uri: String::new(),
            to_tag: String::new(),
            contact_uri: String::new(),
            record_route: String::new(),
            remote_ip: String::new(),
            remote_sip_port: 0,
            remote_rtp_ip: String::new(),
            remote_rtp_port: 0,
            local_rtp_port: 0,
            ssrc: 0,
            cseq_invite: 0,
            last_activity: None,
            last_ok: None,
            forced_active: false,
        }
    }

    /// Clear every field and return the slot to IDLE
    pub fn reset(&mut self) {
        *self = Call::new(self.slot);
    }

    pub fn is_idle(&self) -> bool {
        self.state == CallState::Idle
    }

    /// States that suppress registration renewal and accept a BYE
    pub fn is_established(&self) -> bool {
        matches!(
            self.state,
            CallState::Active | CallState::Ringing | CallState::WaitingForAck
        )
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity = Some(now);
    }
}

/// Fixed pool of call records
#[derive(Debug)]
pub struct CallTable {
    slots: Vec<Call>,
}

impl CallTable {
    pub fn new(max_calls: usize) -> Self {
        Self {
            slots: (0..max_calls).map(Call::new).collect(),
        }
    }

    /// First IDLE slot, lowest index first
    pub fn allocate(&mut self) -> Option<usize> {
        let slot = self.slots.iter().position(Call::is_idle)?;
        Some(slot)
    }

    /// The non-IDLE slot holding this Call-ID, if any
    pub fn find(&self, call_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| !c.is_idle() && c.call_id == call_id)
    }

    /// The non-IDLE slot whose INVITE carried this CSeq, if any
    pub fn find_by_invite_cseq(&self, cseq: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|c| !c.is_idle() && c.cseq_invite == cseq)
    }

    pub fn get(&self, slot: usize) -> Option<&Call> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Call> {
        self.slots.get_mut(slot)
    }

    pub fn reset(&mut self, slot: usize) {
        if let Some(call) = self.slots.get_mut(slot) {
            call.reset();
        }
    }

    /// Whether any call is far enough along to suppress re-registration
    pub fn any_established(&self) -> bool {
        self.slots.iter().any(Call::is_established)
    }

    /// Number of non-IDLE slots
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|c| !c.is_idle()).count()
    }

    /// Lowest non-IDLE slot index
    pub fn first_non_idle(&self) -> Option<usize> {
        self.slots.iter().position(|c| !c.is_idle())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Call> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Call> {
        self.slots.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occupy(table: &mut CallTable, call_id: &str) -> usize {
        let slot = table.allocate().unwrap();
        let call = table.get_mut(slot).unwrap();
        call.state = CallState::Trying;
        call.call_id = call_id.to_string();
        call.from_uri = "sip:a@b".to_string();
        call.from_tag = "tag".to_string();
        call.to_tag = "tag2".to_string();
        call.contact_uri = "sip:a@1.2.3.4".to_string();
        call.remote_ip = "1.2.3.4".to_string();
        call.cseq_invite = 7;
        slot
    }

    #[test]
    fn allocate_prefers_lowest_idle_slot() {
        let mut table = CallTable::new(3);
        assert_eq!(occupy(&mut table, "a"), 0);
        assert_eq!(occupy(&mut table, "b"), 1);

        table.reset(0);
        assert_eq!(table.allocate(), Some(0));
    }

    #[test]
    fn allocate_never_hands_out_a_busy_slot() {
        let mut table = CallTable::new(2);
        let first = occupy(&mut table, "a");
        let second = occupy(&mut table, "b");
        assert_ne!(first, second);
        assert_eq!(table.allocate(), None);
    }

    #[test]
    fn find_matches_only_non_idle_slots() {
        let mut table = CallTable::new(2);
        let slot = occupy(&mut table, "abc@host");
        assert_eq!(table.find("abc@host"), Some(slot));
        assert_eq!(table.find("other"), None);

        table.reset(slot);
        assert_eq!(table.find("abc@host"), None);
    }

    #[test]
    fn reset_clears_every_string_field() {
        let mut table = CallTable::new(1);
        let slot = occupy(&mut table, "abc");
        table.reset(slot);

        let call = table.get(slot).unwrap();
        assert_eq!(call.state, CallState::Idle);
        assert!(call.call_id.is_empty());
        assert!(call.from_uri.is_empty());
        assert!(call.from_tag.is_empty());
        assert!(call.to_uri.is_empty());
        assert!(call.to_tag.is_empty());
        assert!(call.contact_uri.is_empty());
        assert!(call.record_route.is_empty());
        assert!(call.remote_ip.is_empty());
        assert_eq!(call.cseq_invite, 0);
        assert!(call.last_ok.is_none());
        assert!(!call.forced_active);
    }

    #[test]
    fn established_states_suppress_renewal() {
        let mut table = CallTable::new(1);
        let slot = occupy(&mut table, "a");
        assert!(!table.any_established());

        table.get_mut(slot).unwrap().state = CallState::WaitingForAck;
        assert!(table.any_established());
        table.get_mut(slot).unwrap().state = CallState::Active;
        assert!(table.any_established());
    }
}
