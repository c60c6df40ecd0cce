//! Per-call RTP media channel
//!
//! Each channel owns one UDP socket bound to the call's local media port. A
//! receive task parses inbound datagrams, updates the channel statistics and
//! forwards payloads to the media sink; malformed packets are dropped
//! silently. Closing the channel (or dropping it) aborts the receive task so
//! a late packet can never reach a successor call on the same index.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::packet::{RtpHeader, RtpPacket};
use crate::stats::{QualitySnapshot, RtpStats};
use crate::{Result, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

const MAX_DATAGRAM: usize = 1500;

/// A received media payload handed to the audio path
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Channel (call slot) index the packet arrived on
    pub channel: usize,
    pub payload: Bytes,
    pub timestamp: RtpTimestamp,
    pub sequence: RtpSequenceNumber,
    pub payload_type: u8,
}

/// One call's RTP media channel
pub struct RtpChannel {
    index: usize,
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    local_port: u16,
    ssrc: RtpSsrc,
    payload_type: u8,
    stats: Arc<Mutex<RtpStats>>,
    recv_task: JoinHandle<()>,
}

impl RtpChannel {
    /// Bind the local media port and start receiving
    ///
    /// Inbound payloads are forwarded to `sink`; if the sink is full the
    /// packet is dropped (a transient, not an error).
    pub async fn open(
        index: usize,
        local_port: u16,
        remote: SocketAddr,
        ssrc: RtpSsrc,
        payload_type: u8,
        clock_rate: u32,
        sink: mpsc::Sender<MediaPacket>,
    ) -> Result<RtpChannel> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port))
            .await
            .map_err(|source| Error::Bind {
                port: local_port,
                source,
            })?;
        let socket = Arc::new(socket);
        let stats = Arc::new(Mutex::new(RtpStats::new(clock_rate)));

        let recv_task = tokio::spawn(recv_loop(index, socket.clone(), stats.clone(), sink));

        debug!(
            index,
            local_port,
            %remote,
            ssrc,
            payload_type,
            "RTP channel opened"
        );

        Ok(RtpChannel {
            index,
            socket,
            remote,
            local_port,
            ssrc,
            payload_type,
            stats,
            recv_task,
        })
    }

    /// Send one media payload to the remote endpoint
    pub async fn send(
        &self,
        payload: &[u8],
        timestamp: RtpTimestamp,
        sequence: RtpSequenceNumber,
        payload_type: u8,
    ) -> Result<()> {
        let packet = RtpPacket::new(
            RtpHeader {
                payload_type,
                sequence,
                timestamp,
                ssrc: self.ssrc,
            },
            Bytes::copy_from_slice(payload),
        );
        self.socket
            .send_to(&packet.serialize(), self.remote)
            .await
            .map_err(|source| Error::Send { source })?;
        trace!(
            index = self.index,
            sequence,
            timestamp,
            len = payload.len(),
            "RTP packet sent"
        );
        Ok(())
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    pub fn payload_type(&self) -> u8 {
        self.payload_type
    }

    /// Current jitter estimate in milliseconds
    pub fn jitter_ms(&self) -> f32 {
        self.stats.lock().jitter_ms()
    }

    /// Current loss percentage
    pub fn packet_loss_percent(&self) -> f32 {
        self.stats.lock().packet_loss_percent()
    }

    /// Combined quality snapshot for monitoring
    pub fn quality(&self) -> QualitySnapshot {
        self.stats.lock().quality()
    }

    /// Copy of the full statistics
    pub fn stats(&self) -> RtpStats {
        self.stats.lock().clone()
    }

    /// Stop receiving; the socket is released when the channel drops
    pub fn close(&self) {
        self.recv_task.abort();
        debug!(index = self.index, "RTP channel closed");
    }
}

impl Drop for RtpChannel {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

async fn recv_loop(
    index: usize,
    socket: Arc<UdpSocket>,
    stats: Arc<Mutex<RtpStats>>,
    sink: mpsc::Sender<MediaPacket>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _source)) => len,
            Err(err) => {
                warn!(index, %err, "RTP receive failed");
                continue;
            }
        };

        let packet = match RtpPacket::parse(&buf[..len]) {
            Ok(packet) => packet,
            Err(err) => {
                debug!(index, %err, "dropping malformed RTP packet");
                continue;
            }
        };

        stats.lock().record_received(
            packet.header.sequence,
            packet.header.timestamp,
            std::time::Instant::now(),
        );

        if packet.payload.is_empty() {
            continue;
        }

        let media = MediaPacket {
            channel: index,
            payload: packet.payload,
            timestamp: packet.header.timestamp,
            sequence: packet.header.sequence,
            payload_type: packet.header.payload_type,
        };
        if sink.try_send(media).is_err() {
            trace!(index, "media sink full, dropping packet");
        }
    }
}
