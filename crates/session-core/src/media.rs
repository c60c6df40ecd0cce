//! Media wiring between RTP channels and the codec link
//!
//! Received RTP payloads are queued by the channel receive tasks and pumped
//! into per-call jitter buffers here; the periodic bridge tick drains each
//! active call's buffer in sequence order and frames the audio out to the
//! codec peripheral. The outbound direction (frames from the peripheral back
//! to RTP) is driven by the endpoint, which gates on call state and stamps
//! packets from the shared [`MediaClock`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use emvoip_media_core::jitter::DEFAULT_SLOTS;
use emvoip_media_core::{AudioFrame, AudioLink, FrameCodec, JitterBuffer, MediaClock};
use emvoip_rtp_core::MediaPacket;

/// Queue depth between the RTP receive tasks and the pump
const MEDIA_QUEUE_DEPTH: usize = 64;

/// Jitter buffers, clock and codec-link framing for all call slots
pub struct MediaBridge {
    buffers: Vec<Arc<JitterBuffer>>,
    clock: MediaClock,
    codec: Mutex<FrameCodec>,
    link: Arc<dyn AudioLink>,
    tx: mpsc::Sender<MediaPacket>,
    rx: Mutex<mpsc::Receiver<MediaPacket>>,
    /// Bridging stops while the network is down
    enabled: AtomicBool,
}

impl MediaBridge {
    pub fn new(max_calls: usize, link: Arc<dyn AudioLink>) -> Self {
        let (tx, rx) = mpsc::channel(MEDIA_QUEUE_DEPTH);
        Self {
            buffers: (0..max_calls)
                .map(|_| Arc::new(JitterBuffer::new(DEFAULT_SLOTS)))
                .collect(),
            clock: MediaClock::new(max_calls),
            codec: Mutex::new(FrameCodec::new()),
            link,
            tx,
            rx: Mutex::new(rx),
            enabled: AtomicBool::new(true),
        }
    }

    /// Sink handed to each RTP channel on open
    pub fn packet_sink(&self) -> mpsc::Sender<MediaPacket> {
        self.tx.clone()
    }

    pub fn clock(&self) -> &MediaClock {
        &self.clock
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            debug!("audio bridging disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Drain queued RTP payloads into the jitter buffers
    ///
    /// `accepts` reports whether a slot may currently receive media (call
    /// ACTIVE). Packets for gated slots and rejected writes (full buffer,
    /// contention) are transient drops.
    pub fn pump(&self, accepts: impl Fn(usize) -> bool) {
        if !self.is_enabled() {
            return;
        }
        let mut rx = self.rx.lock();
        while let Ok(packet) = rx.try_recv() {
            if !accepts(packet.channel) {
                trace!(slot = packet.channel, "media for inactive call dropped");
                continue;
            }
            let Some(buffer) = self.buffers.get(packet.channel) else {
                continue;
            };
            if let Err(err) = buffer.write(packet.sequence, packet.timestamp, packet.payload) {
                trace!(slot = packet.channel, %err, "jitter write dropped");
            }
        }
    }

    /// Frame buffered audio out to the codec link, oldest sequence first
    ///
    /// `active` lists the slots currently allowed to bridge together with the
    /// codec negotiated for each.
    pub fn bridge_tick(&self, active: &[(usize, u8)]) {
        if !self.is_enabled() {
            return;
        }
        for &(slot, codec_type) in active {
            let Some(buffer) = self.buffers.get(slot) else {
                continue;
            };
            while let Some(entry) = buffer.read_oldest_entry() {
                let frame = AudioFrame {
                    call_index: slot as u8,
                    codec: codec_type,
                    timestamp: entry.timestamp,
                    sequence: entry.sequence,
                    payload: entry.payload,
                };
                let encoded = self.codec.lock().encode(&frame);
                self.link.send_frame(encoded);
            }
        }
    }

    /// Invalidate a slot's buffered audio during teardown
    pub fn clear_slot(&self, slot: usize) {
        if let Some(buffer) = self.buffers.get(slot) {
            buffer.clear();
        }
    }

    #[cfg(test)]
    pub(crate) fn buffer(&self, slot: usize) -> Option<&Arc<JitterBuffer>> {
        self.buffers.get(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct RecordingLink {
        frames: PlMutex<Vec<Bytes>>,
    }

    impl AudioLink for RecordingLink {
        fn send_frame(&self, frame: Bytes) {
            self.frames.lock().push(frame);
        }
    }

    fn packet(slot: usize, seq: u16) -> MediaPacket {
        MediaPacket {
            channel: slot,
            payload: Bytes::from(vec![seq as u8; 8]),
            timestamp: u32::from(seq) * 160,
            sequence: seq,
            payload_type: 8,
        }
    }

    #[tokio::test]
    async fn pump_and_tick_reorder_toward_the_link() {
        let link = Arc::new(RecordingLink::default());
        let bridge = MediaBridge::new(2, link.clone());

        let sink = bridge.packet_sink();
        for seq in [5u16, 3, 4] {
            sink.try_send(packet(0, seq)).unwrap();
        }

        bridge.pump(|_| true);
        bridge.bridge_tick(&[(0, 8)]);

        let frames = link.frames.lock();
        assert_eq!(frames.len(), 3);
        let sequences: Vec<u16> = frames
            .iter()
            .map(|f| u16::from_be_bytes([f[11], f[12]]))
            .collect();
        assert_eq!(sequences, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn gated_slots_drop_media() {
        let link = Arc::new(RecordingLink::default());
        let bridge = MediaBridge::new(2, link.clone());

        bridge.packet_sink().try_send(packet(1, 9)).unwrap();
        bridge.pump(|slot| slot == 0);
        bridge.bridge_tick(&[(1, 8)]);

        assert!(link.frames.lock().is_empty());
        assert!(bridge.buffer(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_bridge_moves_nothing() {
        let link = Arc::new(RecordingLink::default());
        let bridge = MediaBridge::new(1, link.clone());
        bridge.set_enabled(false);

        bridge.packet_sink().try_send(packet(0, 1)).unwrap();
        bridge.pump(|_| true);
        bridge.bridge_tick(&[(0, 8)]);
        assert!(link.frames.lock().is_empty());
    }
}
