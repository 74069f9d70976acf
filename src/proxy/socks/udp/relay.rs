//! Engine-wide UDP relay
//!
//! One socket, bound next to the TCP listener, serves every association.
//! Each inbound datagram is decoded, forwarded from an ephemeral socket,
//! and answered with the single response datagram the target sends back.
//! Responders run concurrently and are independent across datagrams.

use super::packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
use crate::error::EngineError;
use crate::proxy::socks::addr::TargetAddr;
use crate::proxy::socks::consts::*;
use crate::stats::TrafficStats;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Shared UDP relay listener
#[derive(Debug)]
pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    port: u16,
    stats: Arc<TrafficStats>,
    response_timeout: Duration,
}

impl UdpRelay {
    /// Bind the relay socket on the given port
    pub async fn bind(port: u16, stats: Arc<TrafficStats>) -> Result<Self, EngineError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map_err(|source| EngineError::Listener {
                kind: "udp",
                port,
                source,
            })?;
        let port = socket.local_addr().map(|addr| addr.port()).unwrap_or(port);

        Ok(UdpRelay {
            socket: Arc::new(socket),
            port,
            stats,
            response_timeout: Duration::from_secs(UDP_RESPONSE_TIMEOUT_SECS),
        })
    }

    /// Bound relay port (resolved when binding port 0)
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Override the responder timeout (tests use short ones)
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Run the relay loop until shutdown.
    ///
    /// Datagrams that fail to decode are dropped silently; everything else
    /// is handed to a concurrent responder task.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    result = self.socket.recv_from(&mut buf) => {
                        match result {
                            Ok((n, src)) => self.dispatch(&buf[..n], src),
                            Err(e) => {
                                warn!("UDP relay recv error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("UDP relay stopped");
        })
    }

    fn dispatch(self: &Arc<Self>, datagram: &[u8], src: SocketAddr) {
        let packet = match parse_udp_packet(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%src, "dropping UDP datagram: {}", e);
                return;
            }
        };

        self.stats.record_down(datagram.len() as u64);

        let relay = self.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.respond(src, packet).await {
                debug!(%src, "UDP responder ended: {}", e);
            }
        });
    }

    /// Forward one datagram and relay back the single response.
    async fn respond(&self, client: SocketAddr, packet: UdpPacket) -> std::io::Result<()> {
        let ephemeral = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;

        match &packet.dst {
            TargetAddr::Ip(addr) => ephemeral.send_to(&packet.payload, addr).await?,
            TargetAddr::Domain(name, port) => {
                ephemeral
                    .send_to(&packet.payload, (name.as_str(), *port))
                    .await?
            }
        };
        self.stats.record_up(packet.payload.len() as u64);

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        match tokio::time::timeout(self.response_timeout, ephemeral.recv_from(&mut buf)).await {
            Ok(Ok((n, _from))) => {
                self.stats.record_down(n as u64);
                let reply = encode_udp_packet(&packet.dst, &buf[..n]);
                self.socket.send_to(&reply, client).await?;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                debug!(dst = %packet.dst, "no UDP response before timeout");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn echo_server() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((n, from)) = socket.recv_from(&mut buf).await {
                let _ = socket.send_to(&buf[..n], from).await;
            }
        });
        addr
    }

    async fn start_relay(stats: Arc<TrafficStats>) -> (Arc<UdpRelay>, broadcast::Sender<()>) {
        // Port 0 keeps the test free of port collisions
        let relay = Arc::new(
            UdpRelay::bind(0, stats)
                .await
                .unwrap()
                .with_response_timeout(Duration::from_millis(500)),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        relay.clone().spawn(shutdown_rx);
        (relay, shutdown_tx)
    }

    #[tokio::test]
    async fn test_relay_round_trip() {
        let echo = echo_server().await;
        let stats = Arc::new(TrafficStats::new());
        let (relay, _shutdown) = start_relay(stats.clone()).await;

        let relay_addr = relay.socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let echo_ip = match echo.ip() {
            std::net::IpAddr::V4(ip) => ip,
            _ => unreachable!(),
        };
        let dst = TargetAddr::ipv4(echo_ip, echo.port());
        let datagram = encode_udp_packet(&dst, b"ping");
        client.send_to(&datagram, relay_addr).await.unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("no relay reply")
            .unwrap();

        let reply = parse_udp_packet(&buf[..n]).unwrap();
        assert_eq!(reply.dst, dst);
        assert_eq!(&reply.payload[..], b"ping");

        stats.tick();
        let snap = stats.snapshot();
        assert_eq!(snap.upload_total, 4);
        // Inbound datagram plus the echoed response
        assert_eq!(snap.download_total, datagram.len() as u64 + 4);
    }

    #[tokio::test]
    async fn test_fragmented_datagram_dropped() {
        let echo = echo_server().await;
        let stats = Arc::new(TrafficStats::new());
        let (relay, _shutdown) = start_relay(stats.clone()).await;

        let relay_addr = relay.socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let echo_ip = match echo.ip() {
            std::net::IpAddr::V4(ip) => ip,
            _ => unreachable!(),
        };
        let mut datagram = encode_udp_packet(&TargetAddr::ipv4(echo_ip, echo.port()), b"ping");
        datagram[2] = 0x01; // FRAG

        client.send_to(&datagram, relay_addr).await.unwrap();

        let mut buf = [0u8; 128];
        let result =
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await;
        assert!(result.is_err(), "fragmented datagram produced a reply");

        // Dropped datagrams are not accounted
        stats.tick();
        assert_eq!(stats.snapshot().download_total, 0);
    }

    #[tokio::test]
    async fn test_garbage_datagram_dropped() {
        let stats = Arc::new(TrafficStats::new());
        let (relay, _shutdown) = start_relay(stats.clone()).await;

        let relay_addr = relay.socket.local_addr().unwrap();
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&[0xFF, 0xFF], relay_addr).await.unwrap();

        let mut buf = [0u8; 128];
        let result =
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_relay_stops_on_shutdown() {
        let stats = Arc::new(TrafficStats::new());
        let relay = Arc::new(UdpRelay::bind(0, stats).await.unwrap());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = relay.spawn(shutdown_rx);
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("relay did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_bind_port_zero_resolves_real_port() {
        let stats = Arc::new(TrafficStats::new());
        let relay = UdpRelay::bind(0, stats).await.unwrap();
        assert_ne!(relay.port(), 0);
        assert_eq!(relay.port(), relay.socket.local_addr().unwrap().port());
    }
}
