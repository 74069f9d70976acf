//! SOCKS5 request parsing and reply building

use crate::error::SocksError;
use crate::proxy::socks::addr::TargetAddr;
use crate::proxy::socks::consts::*;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// SOCKS5 command requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// Open a TCP relay to the target
    Connect,
    /// Bind a UDP relay endpoint for the client
    UdpAssociate,
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Negotiate the method selection with the client.
///
/// Reads `VER NMETHODS METHODS...` and answers with no-authentication.
/// The greeting must name SOCKS version 5 and offer at least one method.
pub async fn negotiate<S>(stream: &mut S) -> Result<(), SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS5_VERSION {
        return Err(SocksError::UnsupportedVersion(header[0]));
    }
    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(SocksError::NoMethods);
    }

    let mut methods = vec![0u8; nmethods];
    stream.read_exact(&mut methods).await?;

    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
        .await?;
    stream.flush().await?;
    Ok(())
}

/// Parse a SOCKS5 request from the stream.
///
/// # Request Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub async fn parse_request<S>(stream: &mut S) -> Result<(SocksCommand, TargetAddr), SocksError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let version = header[0];
    let cmd = header[1];
    let _reserved = header[2];
    let addr_type = header[3];

    if version != SOCKS5_VERSION {
        return Err(SocksError::UnsupportedVersion(version));
    }

    let command = match cmd {
        SOCKS5_CMD_TCP_CONNECT => SocksCommand::Connect,
        SOCKS5_CMD_UDP_ASSOCIATE => SocksCommand::UdpAssociate,
        other => return Err(SocksError::CommandNotSupported(other)),
    };

    let target = TargetAddr::read_from(stream, addr_type).await?;
    Ok((command, target))
}

/// Build and send a SOCKS5 reply.
///
/// The bind address defaults to `0.0.0.0:0`, which is what TCP relays
/// always answer; UDP ASSOCIATE passes the relay endpoint instead.
pub async fn send_reply<S>(
    stream: &mut S,
    reply_code: u8,
    bind_addr: Option<SocketAddr>,
) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    let bind_addr =
        bind_addr.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));

    let mut reply = vec![SOCKS5_VERSION, reply_code, SOCKS5_RESERVED];
    TargetAddr::from(bind_addr).write_to_buf(&mut reply);

    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}
