//! Error types for tetherlink
//!
//! This module defines all custom error types used throughout the engine.

use std::io;
use thiserror::Error;

use crate::proxy::socks::consts::*;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener bind failure; the engine stays stopped
    #[error("Failed to bind {kind} listener on port {port}: {source}")]
    Listener {
        /// Listener transport ("tcp" or "udp")
        kind: &'static str,
        /// Requested bind port
        port: u16,
        /// Underlying bind error
        source: io::Error,
    },

    /// A service was started without the configuration it requires
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    /// SOCKS5 protocol error
    #[error("SOCKS5 error: {0}")]
    Socks(#[from] SocksError),

    /// HTTP proxy protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

/// SOCKS5 specific errors
#[derive(Error, Debug)]
pub enum SocksError {
    /// IO error while reading or writing protocol bytes
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unsupported SOCKS version byte
    #[error("Unsupported SOCKS version: 0x{0:02x}")]
    UnsupportedVersion(u8),

    /// Client offered an empty method list
    #[error("Empty authentication method list")]
    NoMethods,

    /// Command not supported (only CONNECT and UDP ASSOCIATE are)
    #[error("Command not supported: 0x{0:02x}")]
    CommandNotSupported(u8),

    /// Address type not supported
    #[error("Address type not supported: 0x{0:02x}")]
    AddrTypeNotSupported(u8),

    /// Domain name with invalid length or encoding
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// UDP datagram too short to carry the encapsulation header
    #[error("UDP packet truncated")]
    UdpPacketTruncated,

    /// UDP datagram carried a non-zero fragment id
    #[error("Fragmented UDP packet (FRAG=0x{0:02x})")]
    Fragmented(u8),
}

impl SocksError {
    /// Reply code sent to the client before the connection is closed.
    ///
    /// Malformed or truncated requests map to general failure; unsupported
    /// commands and address types get their dedicated codes.
    pub fn reply_code(&self) -> u8 {
        match self {
            SocksError::CommandNotSupported(_) => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            SocksError::AddrTypeNotSupported(_) => SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
            _ => SOCKS5_REPLY_GENERAL_FAILURE,
        }
    }
}

/// HTTP proxy errors
#[derive(Error, Debug)]
pub enum HttpError {
    /// Request head was not valid UTF-8
    #[error("Request head is not valid UTF-8")]
    NotUtf8,

    /// Request line did not tokenize as METHOD TARGET VERSION
    #[error("Malformed request line")]
    MalformedRequestLine,

    /// CONNECT target was not of the form host:port
    #[error("Invalid CONNECT target: {0}")]
    InvalidTarget(String),

    /// Port was absent, zero, or not a number
    #[error("Invalid port in {0}")]
    InvalidPort(String),

    /// Plain request carried no Host header
    #[error("Missing Host header")]
    MissingHost,
}
