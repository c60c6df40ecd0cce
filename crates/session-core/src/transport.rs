//! Signaling transport seam
//!
//! The engine talks to the network through [`SignalTransport`]; inbound
//! datagrams are pushed into an mpsc queue that [`crate::SipEndpoint::poll`]
//! drains, preserving run-to-completion dispatch on the tick. The production
//! implementation wraps a tokio UDP socket; tests substitute an in-memory
//! transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// One received signaling datagram with its source address
#[derive(Debug, Clone)]
pub struct Datagram {
    pub data: Bytes,
    pub source: SocketAddr,
}

/// UDP send/receive with source-address reporting
#[async_trait]
pub trait SignalTransport: Send + Sync {
    /// Transmit one datagram
    async fn send_to(&self, target: SocketAddr, data: &[u8]) -> std::io::Result<()>;

    /// Whether the underlying network is usable (bound, address assigned)
    fn is_ready(&self) -> bool;
}

/// Production transport over a tokio UDP socket
pub struct UdpSignalTransport {
    socket: Arc<UdpSocket>,
    ready: AtomicBool,
}

impl UdpSignalTransport {
    /// Bind the signaling port and start forwarding datagrams into a queue
    ///
    /// Returns the transport and the receiver the engine drains on each poll.
    pub async fn bind(
        local_port: u16,
        queue_depth: usize,
    ) -> std::io::Result<(Arc<UdpSignalTransport>, mpsc::Receiver<Datagram>)> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", local_port)).await?);
        let (tx, rx) = mpsc::channel(queue_depth);

        let transport = Arc::new(UdpSignalTransport {
            socket: socket.clone(),
            ready: AtomicBool::new(true),
        });

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, source)) => {
                        let datagram = Datagram {
                            data: Bytes::copy_from_slice(&buf[..len]),
                            source,
                        };
                        if tx.send(datagram).await.is_err() {
                            debug!("signaling queue closed, stopping receiver");
                            break;
                        }
                    }
                    Err(err) => warn!(%err, "signaling receive failed"),
                }
            }
        });

        Ok((transport, rx))
    }

    /// Mark the network unusable (link down) or usable again
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// The bound signaling address
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl SignalTransport for UdpSignalTransport {
    async fn send_to(&self, target: SocketAddr, data: &[u8]) -> std::io::Result<()> {
        self.socket.send_to(data, target).await.map(|_| ())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}
