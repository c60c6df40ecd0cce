//! End-to-end smoke test over real loopback sockets
//!
//! A plain UDP socket plays the registrar: it accepts the endpoint's
//! REGISTER, then probes it with OPTIONS.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use emvoip::media::AudioLink;
use emvoip::{EndpointConfig, SipEndpoint, SipMessage, UdpSignalTransport};
use tokio::net::UdpSocket;
use tokio::time::timeout;

struct DiscardLink;

impl AudioLink for DiscardLink {
    fn send_frame(&self, _frame: Bytes) {}
}

async fn recv_text(socket: &UdpSocket) -> (String, std::net::SocketAddr) {
    let mut buf = [0u8; 2048];
    let (len, source) = timeout(Duration::from_secs(5), socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a datagram")
        .unwrap();
    (String::from_utf8_lossy(&buf[..len]).to_string(), source)
}

#[tokio::test]
async fn registers_and_answers_options_over_loopback() {
    let registrar = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let registrar_addr = registrar.local_addr().unwrap();

    let (transport, inbound) = UdpSignalTransport::bind(0, 32).await.unwrap();
    let endpoint_port = transport.local_addr().unwrap().port();

    let config = EndpointConfig::new(
        &registrar_addr.ip().to_string(),
        "200",
        "secret",
        "127.0.0.1",
    )
    .with_local_port(endpoint_port)
    .with_rtp_base_port(0);
    let config = EndpointConfig {
        server_port: registrar_addr.port(),
        ..config
    };

    let (endpoint, _events) = SipEndpoint::new(config, transport, inbound, Arc::new(DiscardLink));

    // first poll emits the REGISTER
    endpoint.poll().await.unwrap();
    let (register, endpoint_addr) = recv_text(&registrar).await;
    assert!(register.starts_with("REGISTER "));
    let (cseq, method) = SipMessage::parse(&register).unwrap().cseq().unwrap();
    assert_eq!(method, "REGISTER");

    // accept the registration
    let ok = format!(
        "SIP/2.0 200 OK\r\nCSeq: {cseq} REGISTER\r\nExpires: 3600\r\nContent-Length: 0\r\n\r\n"
    );
    registrar.send_to(ok.as_bytes(), endpoint_addr).await.unwrap();

    // poll until the response has been dispatched
    let registered = timeout(Duration::from_secs(5), async {
        loop {
            endpoint.poll().await.unwrap();
            if endpoint.is_registered() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(registered.is_ok(), "endpoint never registered");

    // probe the live endpoint
    let options = "OPTIONS sip:200@127.0.0.1 SIP/2.0\r\n\
                   Via: SIP/2.0/UDP 127.0.0.1:5060;branch=z9hG4bKprobe\r\n\
                   From: <sip:probe@127.0.0.1>;tag=p\r\n\
                   To: <sip:200@127.0.0.1>\r\n\
                   Call-ID: probe-1\r\n\
                   CSeq: 1 OPTIONS\r\n\
                   Content-Length: 0\r\n\
                   \r\n";
    registrar
        .send_to(options.as_bytes(), endpoint_addr)
        .await
        .unwrap();

    let answered = timeout(Duration::from_secs(5), async {
        loop {
            endpoint.poll().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });
    tokio::select! {
        _ = answered => unreachable!(),
        (response, _) = recv_text(&registrar) => {
            assert!(response.starts_with("SIP/2.0 200 OK\r\n"));
            assert!(response.contains("CSeq: 1 OPTIONS"));
        }
    }
}
