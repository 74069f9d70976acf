//! HTTP proxy service
//!
//! Serves two request shapes on the same listener: CONNECT tunneling and
//! plain forwarding steered by the Host header. The request head is read
//! as a single buffer of at most 8 KiB; whatever arrives in it is parsed
//! once and, for plain requests, forwarded to the upstream unchanged.
//! Bytes beyond the head ride the relay opaquely in both cases.

use crate::error::{EngineError, HttpError};
use crate::proxy::{InboundHandler, ProxyStream};
use crate::registry::{ConnKind, ConnectionRegistry};
use crate::relay::{splice, Direction};
use crate::stats::TrafficStats;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Upper bound on the buffered request head
pub const MAX_REQUEST_HEAD: usize = 8192;

const RESP_CONNECTED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const RESP_BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n";
const RESP_BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n";

/// Parsed outcome of the request head
#[derive(Debug, PartialEq, Eq)]
enum ParsedRequest {
    /// CONNECT tunnel to host:port
    Connect { host: String, port: u16 },
    /// Plain request forwarded to the Host-header target
    Forward { host: String, port: u16 },
}

/// HTTP proxy inbound handler
#[derive(Debug)]
pub struct HttpHandler {
    stats: Arc<TrafficStats>,
    registry: Arc<ConnectionRegistry>,
}

impl HttpHandler {
    /// Create a handler backed by the given accountant and registry
    pub fn new(stats: Arc<TrafficStats>, registry: Arc<ConnectionRegistry>) -> Self {
        HttpHandler { stats, registry }
    }
}

#[async_trait::async_trait]
impl InboundHandler for HttpHandler {
    fn protocol(&self) -> &str {
        "http"
    }

    async fn handle(
        &self,
        mut stream: Box<dyn ProxyStream>,
        peer: SocketAddr,
    ) -> Result<(), EngineError> {
        let mut head = vec![0u8; MAX_REQUEST_HEAD];
        let n = stream.read(&mut head).await?;
        if n == 0 {
            return Ok(());
        }
        head.truncate(n);

        let text = match std::str::from_utf8(&head) {
            Ok(text) => text,
            Err(_) => {
                debug!(%peer, "request head is not UTF-8");
                return Err(HttpError::NotUtf8.into());
            }
        };

        let parsed = match parse_request_head(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!(%peer, "rejecting request: {}", e);
                let _ = stream.write_all(RESP_BAD_REQUEST).await;
                return Err(e.into());
            }
        };

        match parsed {
            ParsedRequest::Connect { host, port } => {
                info!(%peer, target = %format!("{}:{}", host, port), "HTTP CONNECT");
                let outbound = match TcpStream::connect((host.as_str(), port)).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        debug!(host = %host, port, "dial failed: {}", e);
                        let _ = stream.write_all(RESP_BAD_GATEWAY).await;
                        return Err(e.into());
                    }
                };

                let _outbound_guard = self.registry.register(ConnKind::Outbound);
                stream.write_all(RESP_CONNECTED).await?;
                splice(
                    stream,
                    outbound,
                    Direction::Upload,
                    Direction::Download,
                    &self.stats,
                )
                .await?;
                Ok(())
            }

            ParsedRequest::Forward { host, port } => {
                info!(%peer, target = %format!("{}:{}", host, port), "HTTP forward");
                let mut outbound = match TcpStream::connect((host.as_str(), port)).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        debug!(host = %host, port, "dial failed: {}", e);
                        let _ = stream.write_all(RESP_BAD_GATEWAY).await;
                        return Err(e.into());
                    }
                };

                let _outbound_guard = self.registry.register(ConnKind::Outbound);
                // The buffered head goes out verbatim before the relay starts
                outbound.write_all(&head).await?;
                self.stats.record_up(head.len() as u64);

                splice(
                    stream,
                    outbound,
                    Direction::Upload,
                    Direction::Download,
                    &self.stats,
                )
                .await?;
                Ok(())
            }
        }
    }
}

/// Parse the request line and, for plain requests, the Host header.
fn parse_request_head(head: &str) -> Result<ParsedRequest, HttpError> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut tokens = request_line.split(' ');
    let method = tokens.next().unwrap_or_default();
    let target = tokens.next().unwrap_or_default();
    let version = tokens.next().unwrap_or_default();
    if method.is_empty() || target.is_empty() || version.is_empty() {
        return Err(HttpError::MalformedRequestLine);
    }

    if method == "CONNECT" {
        let (host, port) = split_host_port(target, None)?;
        if host.is_empty() {
            return Err(HttpError::InvalidTarget(target.to_string()));
        }
        return Ok(ParsedRequest::Connect { host, port });
    }

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("host") {
                let value = value.trim();
                if value.is_empty() {
                    return Err(HttpError::MissingHost);
                }
                let (host, port) = split_host_port(value, Some(80))?;
                return Ok(ParsedRequest::Forward { host, port });
            }
        }
    }

    Err(HttpError::MissingHost)
}

/// Split `host[:port]`, requiring an explicit port when no default is
/// given. Port 0 is rejected either way.
fn split_host_port(value: &str, default_port: Option<u16>) -> Result<(String, u16), HttpError> {
    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| HttpError::InvalidPort(value.to_string()))?;
            if port == 0 {
                return Err(HttpError::InvalidPort(value.to_string()));
            }
            Ok((host.to_string(), port))
        }
        None => match default_port {
            Some(port) => Ok((value.to_string(), port)),
            None => Err(HttpError::InvalidTarget(value.to_string())),
        },
    }
}
