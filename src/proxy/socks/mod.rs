//! SOCKS5 service
//!
//! Implements the RFC 1928 subset this engine serves: no-authentication
//! method negotiation, CONNECT with a TCP relay, and UDP ASSOCIATE backed
//! by the engine-wide UDP relay listener.

pub mod addr;
pub mod command;
pub mod consts;
mod tcp_relay;
pub mod udp;

pub use addr::TargetAddr;
pub use command::{negotiate, parse_request, send_reply, SocksCommand};
pub use udp::UdpRelay;

use crate::error::EngineError;
use crate::proxy::{InboundHandler, ProxyStream};
use crate::registry::ConnectionRegistry;
use crate::stats::TrafficStats;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// SOCKS5 inbound handler
#[derive(Debug)]
pub struct Socks5Handler {
    stats: Arc<TrafficStats>,
    registry: Arc<ConnectionRegistry>,
    /// Advertised UDP relay endpoint; ASSOCIATE is refused without one
    udp_bind: Option<SocketAddrV4>,
}

impl Socks5Handler {
    /// Create a handler backed by the given accountant and registry
    pub fn new(
        stats: Arc<TrafficStats>,
        registry: Arc<ConnectionRegistry>,
        udp_bind: Option<SocketAddrV4>,
    ) -> Self {
        Socks5Handler {
            stats,
            registry,
            udp_bind,
        }
    }
}

#[async_trait::async_trait]
impl InboundHandler for Socks5Handler {
    fn protocol(&self) -> &str {
        "socks5"
    }

    async fn handle(
        &self,
        mut stream: Box<dyn ProxyStream>,
        peer: SocketAddr,
    ) -> Result<(), EngineError> {
        // Greeting failures get no reply; the connection just closes
        negotiate(&mut stream).await?;

        match parse_request(&mut stream).await {
            Ok((SocksCommand::Connect, target)) => {
                info!(%peer, %target, "SOCKS5 CONNECT");
                tcp_relay::handle_connect(stream, target, &self.stats, &self.registry).await
            }
            Ok((SocksCommand::UdpAssociate, _target)) => match self.udp_bind {
                Some(bind) => {
                    info!(%peer, relay = %bind, "SOCKS5 UDP ASSOCIATE");
                    udp::handle_udp_associate(stream, bind).await
                }
                None => {
                    warn!(%peer, "UDP ASSOCIATE without a relay listener");
                    send_reply(&mut stream, consts::SOCKS5_REPLY_GENERAL_FAILURE, None).await?;
                    Ok(())
                }
            },
            Err(e) => {
                debug!(%peer, "SOCKS5 request rejected: {}", e);
                // Best effort; the client may already be gone
                let _ = send_reply(&mut stream, e.reply_code(), None).await;
                Err(e.into())
            }
        }
    }
}
