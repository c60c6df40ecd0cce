//! Shared outgoing media clock
//!
//! One clock serves all calls: the timestamp advances by a fixed 160 units
//! (20 ms at 8 kHz) per packet globally, while each call keeps its own
//! sequence counter incrementing by one per packet. The clock rebases only
//! when a call slot is (re)activated. This is intentional behavior, not an
//! adaptive playout clock.

use std::time::Instant;

use parking_lot::Mutex;

/// Samples per 20 ms packet at 8 kHz
pub const SAMPLES_PER_PACKET: u32 = 160;

#[derive(Debug)]
struct ClockInner {
    base_timestamp: u32,
    samples_accumulated: u32,
    sequences: Vec<u16>,
}

/// Timestamp/sequence source for outgoing RTP across all calls
#[derive(Debug)]
pub struct MediaClock {
    epoch: Instant,
    inner: Mutex<ClockInner>,
}

impl MediaClock {
    pub fn new(max_calls: usize) -> Self {
        Self {
            epoch: Instant::now(),
            inner: Mutex::new(ClockInner {
                base_timestamp: 0,
                samples_accumulated: 0,
                sequences: vec![0; max_calls],
            }),
        }
    }

    /// Next (timestamp, sequence) pair for an outgoing packet on a call
    pub fn next(&self, call_index: usize) -> (u32, u16) {
        let mut inner = self.inner.lock();
        let timestamp = inner
            .base_timestamp
            .wrapping_add(inner.samples_accumulated);
        inner.samples_accumulated = inner.samples_accumulated.wrapping_add(SAMPLES_PER_PACKET);

        let sequence = match inner.sequences.get_mut(call_index) {
            Some(seq) => {
                *seq = seq.wrapping_add(1);
                *seq
            }
            None => 0,
        };
        (timestamp, sequence)
    }

    /// Rebase the clock and zero a call's sequence on (re)activation
    pub fn reset_call(&self, call_index: usize) {
        let mut inner = self.inner.lock();
        inner.samples_accumulated = 0;
        inner.base_timestamp = (self.epoch.elapsed().as_millis() as u32).wrapping_mul(8);
        if let Some(seq) = inner.sequences.get_mut(call_index) {
            *seq = 0;
        }
    }
}
