//! SOCKS5 target addresses
//!
//! A target is either a socket address carried literally on the wire or a
//! domain name left to the OS resolver at dial time.

use crate::error::SocksError;
use crate::proxy::socks::consts::*;
use bytes::BufMut;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

/// Target address of a SOCKS5 request or UDP datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IPv4 or IPv6 address with port
    Ip(SocketAddr),
    /// Domain name with port, resolved by the OS at dial time
    Domain(String, u16),
}

impl TargetAddr {
    /// Create an IPv4 target
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create an IPv6 target
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a domain target
    pub fn domain(name: impl Into<String>, port: u16) -> Self {
        TargetAddr::Domain(name.into(), port)
    }

    /// Port of the target
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Read `ADDR PORT` from the stream, the address type byte already
    /// consumed by the caller.
    pub async fn read_from<R>(stream: &mut R, addr_type: u8) -> Result<Self, SocksError>
    where
        R: AsyncRead + Unpin,
    {
        match addr_type {
            SOCKS5_ADDR_TYPE_IPV4 => {
                let mut buf = [0u8; 6];
                stream.read_exact(&mut buf).await?;
                let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
                let port = u16::from_be_bytes([buf[4], buf[5]]);
                Ok(TargetAddr::ipv4(ip, port))
            }

            SOCKS5_ADDR_TYPE_DOMAIN => {
                let mut len_buf = [0u8; 1];
                stream.read_exact(&mut len_buf).await?;
                let len = len_buf[0] as usize;
                if len == 0 || len > MAX_DOMAIN_LEN {
                    return Err(SocksError::InvalidDomain(format!("length {}", len)));
                }

                let mut buf = vec![0u8; len + 2];
                stream.read_exact(&mut buf).await?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                buf.truncate(len);
                let name = String::from_utf8(buf)
                    .map_err(|_| SocksError::InvalidDomain("not UTF-8".to_string()))?;
                Ok(TargetAddr::Domain(name, port))
            }

            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut buf = [0u8; 18];
                stream.read_exact(&mut buf).await?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&buf[..16]);
                let port = u16::from_be_bytes([buf[16], buf[17]]);
                Ok(TargetAddr::ipv6(Ipv6Addr::from(octets), port))
            }

            other => Err(SocksError::AddrTypeNotSupported(other)),
        }
    }

    /// Append `ATYP ADDR PORT` to the buffer
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) {
        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            TargetAddr::Domain(name, port) => {
                debug_assert!(name.len() <= MAX_DOMAIN_LEN);
                buf.put_u8(SOCKS5_ADDR_TYPE_DOMAIN);
                buf.put_u8(name.len() as u8);
                buf.put_slice(name.as_bytes());
                buf.put_u16(*port);
            }
        }
    }

    /// Serialized length of `ATYP ADDR PORT`
    pub fn serialized_len(&self) -> usize {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            TargetAddr::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            TargetAddr::Domain(name, _) => 1 + 1 + name.len() + 2,
        }
    }

    /// Dial a TCP connection to the target, resolving domains through the
    /// OS resolver.
    pub async fn connect_tcp(&self) -> std::io::Result<TcpStream> {
        match self {
            TargetAddr::Ip(addr) => TcpStream::connect(*addr).await,
            TargetAddr::Domain(name, port) => TcpStream::connect((name.as_str(), *port)).await,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}
