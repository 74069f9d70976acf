//! SOCKS5 UDP encapsulation codec
//!
//! # Datagram Format
//!
//! ```text
//! +----+------+------+----------+----------+----------+
//! |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +----+------+------+----------+----------+----------+
//! | 2  |  1   |  1   | Variable |    2     | Variable |
//! +----+------+------+----------+----------+----------+
//! ```

use crate::error::SocksError;
use crate::proxy::socks::addr::TargetAddr;
use crate::proxy::socks::consts::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// A decoded SOCKS5 UDP datagram
#[derive(Debug, Clone)]
pub struct UdpPacket {
    /// Fragment id; anything non-zero is unsupported and dropped
    pub frag: u8,
    /// Destination of the payload
    pub dst: TargetAddr,
    /// Application payload
    pub payload: Bytes,
}

/// Decode a datagram received on the relay socket.
///
/// Fragmented, truncated, and unknown-address-type datagrams are errors;
/// the relay drops them without a reply.
pub fn parse_udp_packet(data: &[u8]) -> Result<UdpPacket, SocksError> {
    if data.len() < 4 {
        return Err(SocksError::UdpPacketTruncated);
    }

    let mut buf = data;
    let _rsv = buf.get_u16();
    let frag = buf.get_u8();
    if frag != 0 {
        return Err(SocksError::Fragmented(frag));
    }

    let atyp = buf.get_u8();
    let (dst, rest) = parse_addr(atyp, buf)?;

    Ok(UdpPacket {
        frag,
        dst,
        payload: Bytes::copy_from_slice(rest),
    })
}

fn parse_addr(atyp: u8, mut buf: &[u8]) -> Result<(TargetAddr, &[u8]), SocksError> {
    match atyp {
        SOCKS5_ADDR_TYPE_IPV4 => {
            if buf.len() < 6 {
                return Err(SocksError::UdpPacketTruncated);
            }
            let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
            buf.advance(4);
            let port = buf.get_u16();
            Ok((TargetAddr::ipv4(ip, port), buf))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            if buf.is_empty() {
                return Err(SocksError::UdpPacketTruncated);
            }
            let len = buf[0] as usize;
            buf.advance(1);
            if len == 0 {
                return Err(SocksError::InvalidDomain("length 0".to_string()));
            }
            if buf.len() < len + 2 {
                return Err(SocksError::UdpPacketTruncated);
            }
            let name = std::str::from_utf8(&buf[..len])
                .map_err(|_| SocksError::InvalidDomain("not UTF-8".to_string()))?
                .to_string();
            buf.advance(len);
            let port = buf.get_u16();
            Ok((TargetAddr::domain(name, port), buf))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            if buf.len() < 18 {
                return Err(SocksError::UdpPacketTruncated);
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[..16]);
            buf.advance(16);
            let port = buf.get_u16();
            Ok((TargetAddr::ipv6(Ipv6Addr::from(octets), port), buf))
        }

        other => Err(SocksError::AddrTypeNotSupported(other)),
    }
}

/// Encode a reply datagram: zeroed RSV and FRAG, the destination header,
/// then the payload.
pub fn encode_udp_packet(dst: &TargetAddr, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + dst.serialized_len() + payload.len());
    buf.put_u16(0);
    buf.put_u8(0);
    dst.write_to_buf(&mut buf);
    buf.put_slice(payload);
    buf.to_vec()
}
