//! Audio payload types negotiated by this endpoint

use std::fmt;

/// Payload types from the static RTP/AVP table plus the dynamic DTMF type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// G.711 mu-law
    Pcmu,
    /// G.711 A-law
    Pcma,
    /// G.722
    G722,
    /// RFC 4733 telephone-event (negotiated, not processed)
    TelephoneEvent,
}

impl PayloadType {
    /// Map a wire payload type number, if supported
    pub fn from_value(value: u8) -> Option<PayloadType> {
        match value {
            0 => Some(PayloadType::Pcmu),
            8 => Some(PayloadType::Pcma),
            9 => Some(PayloadType::G722),
            101 => Some(PayloadType::TelephoneEvent),
            _ => None,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            PayloadType::Pcmu => 0,
            PayloadType::Pcma => 8,
            PayloadType::G722 => 9,
            PayloadType::TelephoneEvent => 101,
        }
    }

    /// RTP clock rate; 8 kHz for every payload type this endpoint carries
    /// (G.722's RTP clock is 8000 Hz by RFC 3551 despite its 16 kHz sampling)
    pub fn clock_rate(&self) -> u32 {
        8000
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadType::Pcmu => "PCMU",
            PayloadType::Pcma => "PCMA",
            PayloadType::G722 => "G722",
            PayloadType::TelephoneEvent => "telephone-event",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for pt in [
            PayloadType::Pcmu,
            PayloadType::Pcma,
            PayloadType::G722,
            PayloadType::TelephoneEvent,
        ] {
            assert_eq!(PayloadType::from_value(pt.value()), Some(pt));
            assert_eq!(pt.clock_rate(), 8000);
        }
        assert_eq!(PayloadType::from_value(18), None);
    }
}
