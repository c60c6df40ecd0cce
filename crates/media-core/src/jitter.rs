//! Fixed-capacity jitter buffer
//!
//! Reorders a small window of RTP payloads by sequence number between the
//! media channel and the codec link. Writes land in any free slot (a write
//! carrying an already-buffered sequence number overwrites that slot); when
//! no slot is free the write is rejected rather than evicting older audio.
//! Read-out picks the numerically smallest valid sequence, which approximates
//! playout order inside the window. 16-bit sequence wraparound is a known
//! boundary this policy does not handle.
//!
//! The buffer is shared between the RTP receive path and the periodic audio
//! bridge task, so every operation takes the internal lock with a bounded
//! wait; failing to acquire it is a transient drop, not an error state.

use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::Error;
use crate::Result;

/// Bounded wait for the buffer lock on a contended path
const LOCK_WAIT: Duration = Duration::from_millis(10);

/// Default slot count per call
pub const DEFAULT_SLOTS: usize = 20;

/// A buffered packet handed back to the audio bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JitterEntry {
    pub sequence: u16,
    pub timestamp: u32,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    sequence: u16,
    timestamp: u32,
    payload: Bytes,
    valid: bool,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Slot>,
    count: usize,
}

/// A per-call reorder buffer with a fixed slot pool
#[derive(Debug)]
pub struct JitterBuffer {
    inner: Mutex<Inner>,
}

impl JitterBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: vec![Slot::default(); capacity],
                count: 0,
            }),
        }
    }

    /// Store one payload, keyed by its RTP sequence number
    ///
    /// Duplicate sequences overwrite in place. A full buffer rejects the
    /// write; lock contention past the bounded wait drops it.
    pub fn write(&self, sequence: u16, timestamp: u32, payload: Bytes) -> Result<()> {
        let mut inner = self.inner.try_lock_for(LOCK_WAIT).ok_or(Error::Contended)?;

        let target = inner
            .slots
            .iter()
            .position(|s| s.valid && s.sequence == sequence)
            .or_else(|| inner.slots.iter().position(|s| !s.valid));

        let Some(index) = target else {
            trace!(sequence, "jitter buffer full");
            return Err(Error::BufferFull { sequence });
        };

        let was_valid = inner.slots[index].valid;
        inner.slots[index] = Slot {
            sequence,
            timestamp,
            payload,
            valid: true,
        };
        if !was_valid {
            inner.count += 1;
        }
        Ok(())
    }

    /// Take the payload with the smallest sequence number, if any
    pub fn read_oldest(&self) -> Option<Bytes> {
        self.read_oldest_entry().map(|entry| entry.payload)
    }

    /// Like [`read_oldest`](Self::read_oldest) but keeps the RTP metadata,
    /// which the audio bridge forwards to the codec peripheral
    pub fn read_oldest_entry(&self) -> Option<JitterEntry> {
        let mut inner = self.inner.try_lock_for(LOCK_WAIT)?;

        let index = inner
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.valid)
            .min_by_key(|(_, s)| s.sequence)
            .map(|(i, _)| i)?;

        inner.slots[index].valid = false;
        inner.count -= 1;
        Some(JitterEntry {
            sequence: inner.slots[index].sequence,
            timestamp: inner.slots[index].timestamp,
            payload: std::mem::take(&mut inner.slots[index].payload),
        })
    }

    /// Take the payload stored for a specific sequence number, if present
    pub fn read_at(&self, sequence: u16) -> Option<Bytes> {
        let mut inner = self.inner.try_lock_for(LOCK_WAIT)?;

        let index = inner
            .slots
            .iter()
            .position(|s| s.valid && s.sequence == sequence)?;
        inner.slots[index].valid = false;
        inner.count -= 1;
        Some(std::mem::take(&mut inner.slots[index].payload))
    }

    /// Invalidate every slot
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for slot in &mut inner.slots {
            slot.valid = false;
            slot.payload = Bytes::new();
        }
        inner.count = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let inner = self.inner.lock();
        inner.count >= inner.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 4])
    }

    #[test]
    fn reads_back_in_sequence_order() {
        let buffer = JitterBuffer::new(DEFAULT_SLOTS);
        buffer.write(5, 800, payload(5)).unwrap();
        buffer.write(3, 480, payload(3)).unwrap();
        buffer.write(4, 640, payload(4)).unwrap();

        assert_eq!(buffer.read_oldest().unwrap(), payload(3));
        assert_eq!(buffer.read_oldest().unwrap(), payload(4));
        assert_eq!(buffer.read_oldest().unwrap(), payload(5));
        assert!(buffer.read_oldest().is_none());
    }

    #[test]
    fn duplicate_sequence_overwrites_in_place() {
        let buffer = JitterBuffer::new(4);
        buffer.write(9, 100, payload(1)).unwrap();
        buffer.write(9, 100, payload(2)).unwrap();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.read_oldest().unwrap(), payload(2));
    }

    #[test]
    fn full_buffer_rejects_without_evicting() {
        let buffer = JitterBuffer::new(2);
        buffer.write(1, 0, payload(1)).unwrap();
        buffer.write(2, 0, payload(2)).unwrap();
        assert!(buffer.is_full());

        let err = buffer.write(3, 0, payload(3)).unwrap_err();
        assert_eq!(err, Error::BufferFull { sequence: 3 });

        // the buffered packets survived the rejected write
        assert_eq!(buffer.read_oldest().unwrap(), payload(1));
        assert_eq!(buffer.read_oldest().unwrap(), payload(2));
    }

    #[test]
    fn read_at_targets_one_sequence() {
        let buffer = JitterBuffer::new(4);
        buffer.write(7, 0, payload(7)).unwrap();
        buffer.write(8, 0, payload(8)).unwrap();

        assert_eq!(buffer.read_at(8).unwrap(), payload(8));
        assert!(buffer.read_at(8).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn clear_invalidates_everything() {
        let buffer = JitterBuffer::new(4);
        buffer.write(1, 0, payload(1)).unwrap();
        buffer.write(2, 0, payload(2)).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.read_oldest().is_none());
    }

    /// Known boundary: the lowest-sequence policy does not handle 16-bit
    /// wraparound, so a post-wrap packet is read before the pre-wrap one.
    #[test]
    fn wraparound_reads_numerically_not_temporally() {
        let buffer = JitterBuffer::new(4);
        buffer.write(65535, 0, payload(1)).unwrap();
        buffer.write(0, 160, payload(2)).unwrap();

        assert_eq!(buffer.read_oldest().unwrap(), payload(2));
        assert_eq!(buffer.read_oldest().unwrap(), payload(1));
    }
}
