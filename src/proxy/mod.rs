//! Inbound protocol handlers
//!
//! The supervisor accepts connections and hands each one to the handler
//! for the protocol selected in the configuration. Handlers implement
//! [`InboundHandler`] so the accept loop stays protocol-agnostic.

pub mod http;
pub mod socks;

use crate::config::ProxyType;
use crate::error::EngineError;
use crate::registry::ConnectionRegistry;
use crate::stats::TrafficStats;
use std::fmt::Debug;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub use http::HttpHandler;
pub use socks::{Socks5Handler, UdpRelay};

/// A dynamic stream accepted by the listener.
///
/// Handlers take any stream type so tests can drive them with in-memory
/// duplex pipes instead of real sockets.
pub trait ProxyStream: AsyncRead + AsyncWrite + Unpin + Send + Debug {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Debug> ProxyStream for T {}

/// Trait implemented by each inbound protocol handler
#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync + Debug {
    /// Human-readable protocol name ("socks5", "http")
    fn protocol(&self) -> &str;

    /// Drive one inbound connection to completion.
    ///
    /// The stream is freshly accepted; the handler owns it for the
    /// lifetime of the session, including any outbound connections it
    /// dials.
    async fn handle(&self, stream: Box<dyn ProxyStream>, peer: SocketAddr)
        -> Result<(), EngineError>;
}

/// Create the handler for the selected protocol.
///
/// `udp_bind` is the advertised UDP relay endpoint, present only in
/// SOCKS5 mode.
pub fn create_handler(
    proxy_type: ProxyType,
    stats: Arc<TrafficStats>,
    registry: Arc<ConnectionRegistry>,
    udp_bind: Option<SocketAddrV4>,
) -> Arc<dyn InboundHandler> {
    match proxy_type {
        ProxyType::Socks5 => Arc::new(Socks5Handler::new(stats, registry, udp_bind)),
        ProxyType::Http => Arc::new(HttpHandler::new(stats, registry)),
    }
}
