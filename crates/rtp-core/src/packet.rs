//! RTP packet encoding and decoding
//!
//! Fixed 12-byte header in network byte order, no extensions, padding or
//! CSRC list. The marker bit is not used by this endpoint.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;
use crate::{Result, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// RTP protocol version carried in every packet
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header in bytes
pub const RTP_HEADER_SIZE: usize = 12;

/// Fixed RTP header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Payload type (7 bits)
    pub payload_type: u8,

    /// Sequence number, incremented by one per packet
    pub sequence: RtpSequenceNumber,

    /// Media timestamp in clock-rate units
    pub timestamp: RtpTimestamp,

    /// Synchronization source identifier
    pub ssrc: RtpSsrc,
}

/// A complete RTP packet: header plus opaque payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Parse a packet from a received datagram
    ///
    /// Validates the minimum length and the version field; anything else is
    /// taken at face value.
    pub fn parse(mut buf: &[u8]) -> Result<RtpPacket> {
        if buf.remaining() < RTP_HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                required: RTP_HEADER_SIZE,
                available: buf.remaining(),
            });
        }

        let first = buf.get_u8();
        let version = (first >> 6) & 0x03;
        if version != RTP_VERSION {
            return Err(Error::InvalidVersion { version });
        }

        let second = buf.get_u8();
        let payload_type = second & 0x7F;
        let sequence = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        Ok(RtpPacket {
            header: RtpHeader {
                payload_type,
                sequence,
                timestamp,
                ssrc,
            },
            payload: Bytes::copy_from_slice(buf),
        })
    }

    /// Serialize the packet for transmission
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RTP_HEADER_SIZE + self.payload.len());
        // version 2, no padding, no extension, no CSRC
        buf.put_u8(RTP_VERSION << 6);
        buf.put_u8(self.header.payload_type & 0x7F);
        buf.put_u16(self.header.sequence);
        buf.put_u32(self.header.timestamp);
        buf.put_u32(self.header.ssrc);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
