//! Framed byte protocol to the external codec peripheral
//!
//! Each frame carries one codec payload together with the call index,
//! timestamp, sequence and codec identifier, behind a two-byte magic and a
//! running frame counter:
//!
//! ```text
//! 0x55 0xAA | counter u16 | length u16 | codec u8 | timestamp u32 | sequence u16 | call u8 | payload...
//! ```
//!
//! The physical link (UART, SPI, socket) is a collaborator behind
//! [`AudioLink`]; this module only encodes and decodes frames.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::Result;

/// Frame start marker
pub const FRAME_MAGIC: [u8; 2] = [0x55, 0xAA];

/// Fixed frame header length in bytes
pub const FRAME_HEADER_SIZE: usize = 14;

/// One audio frame exchanged with the codec peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Call slot index this payload belongs to
    pub call_index: u8,
    /// Codec identifier (RTP payload type value)
    pub codec: u8,
    pub timestamp: u32,
    pub sequence: u16,
    pub payload: Bytes,
}

/// Outbound sink for encoded frames, implemented by the host's link driver
pub trait AudioLink: Send + Sync {
    fn send_frame(&self, frame: Bytes);
}

/// Frame encoder/decoder; the encoder owns the running frame counter
#[derive(Debug, Default)]
pub struct FrameCodec {
    counter: u16,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one frame for the link
    pub fn encode(&mut self, frame: &AudioFrame) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + frame.payload.len());
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u16(self.counter);
        buf.put_u16(frame.payload.len() as u16);
        buf.put_u8(frame.codec);
        buf.put_u32(frame.timestamp);
        buf.put_u16(frame.sequence);
        buf.put_u8(frame.call_index);
        buf.put_slice(&frame.payload);
        self.counter = self.counter.wrapping_add(1);
        buf.freeze()
    }

    /// Decode one frame received from the link
    pub fn decode(mut data: &[u8]) -> Result<AudioFrame> {
        if data.remaining() < FRAME_HEADER_SIZE {
            return Err(Error::TruncatedFrame {
                required: FRAME_HEADER_SIZE,
                available: data.remaining(),
            });
        }

        let magic = [data.get_u8(), data.get_u8()];
        if magic != FRAME_MAGIC {
            return Err(Error::BadMagic { found: magic });
        }

        let _counter = data.get_u16();
        let declared = data.get_u16() as usize;
        let codec = data.get_u8();
        let timestamp = data.get_u32();
        let sequence = data.get_u16();
        let call_index = data.get_u8();

        if declared > data.remaining() {
            return Err(Error::LengthMismatch {
                declared,
                available: data.remaining(),
            });
        }

        Ok(AudioFrame {
            call_index,
            codec,
            timestamp,
            sequence,
            payload: Bytes::copy_from_slice(&data[..declared]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> AudioFrame {
        AudioFrame {
            call_index: 1,
            codec: 8,
            timestamp: 48000,
            sequence: 300,
            payload: Bytes::from_static(&[0xD5; 160]),
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let mut codec = FrameCodec::new();
        let wire = codec.encode(&frame());
        assert_eq!(wire.len(), FRAME_HEADER_SIZE + 160);
        assert_eq!(&wire[..2], &FRAME_MAGIC);

        let decoded = FrameCodec::decode(&wire).unwrap();
        assert_eq!(decoded, frame());
    }

    #[test]
    fn counter_advances_per_frame() {
        let mut codec = FrameCodec::new();
        let first = codec.encode(&frame());
        let second = codec.encode(&frame());
        assert_eq!(u16::from_be_bytes([first[2], first[3]]), 0);
        assert_eq!(u16::from_be_bytes([second[2], second[3]]), 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::from(&codec.encode(&frame())[..]);
        wire[0] = 0x00;
        assert!(matches!(
            FrameCodec::decode(&wire).unwrap_err(),
            Error::BadMagic { .. }
        ));
    }

    #[test]
    fn truncated_and_overdeclared_frames_are_rejected() {
        assert!(matches!(
            FrameCodec::decode(&[0x55, 0xAA, 0, 0]).unwrap_err(),
            Error::TruncatedFrame { .. }
        ));

        let mut codec = FrameCodec::new();
        let wire = codec.encode(&frame());
        // cut the payload short of the declared length
        let cut = &wire[..FRAME_HEADER_SIZE + 10];
        assert!(matches!(
            FrameCodec::decode(cut).unwrap_err(),
            Error::LengthMismatch {
                declared: 160,
                available: 10,
            }
        ));
    }
}
