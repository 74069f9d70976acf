//! Configuration module for tetherlink
//!
//! Provides the TOML configuration types, defaults, and validation for the
//! proxy engine and the TCP forwarder.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default proxy listener port
fn default_tcp_port() -> u16 {
    4884
}

/// Default forwarder remote port (OpenVPN)
fn default_remote_port() -> u16 {
    1194
}

/// Default forwarder listen port (WireGuard-adjacent)
fn default_local_port() -> u16 {
    51821
}

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Proxy engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// TCP forwarder configuration
    #[serde(default)]
    pub forwarder: ForwarderConfig,
}

impl Config {
    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;
        self.forwarder.validate()
    }
}

/// Protocol served on the proxy listener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    /// SOCKS5 with CONNECT and UDP ASSOCIATE
    #[default]
    Socks5,
    /// HTTP proxy with CONNECT and Host-header forwarding
    Http,
}

/// Proxy engine configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    /// Which request parser handles inbound connections
    #[serde(default)]
    pub proxy_type: ProxyType,

    /// TCP listener port (1080 is accepted as a legacy alias)
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    /// UDP relay port; defaults to `tcp_port + 1` in SOCKS5 mode
    #[serde(default)]
    pub udp_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            proxy_type: ProxyType::default(),
            tcp_port: default_tcp_port(),
            udp_port: None,
        }
    }
}

impl EngineConfig {
    /// Effective UDP relay port
    pub fn udp_port(&self) -> u16 {
        self.udp_port.unwrap_or(self.tcp_port.wrapping_add(1))
    }

    /// Validate the engine section
    pub fn validate(&self) -> Result<(), String> {
        if self.tcp_port == 0 {
            return Err("engine.tcp_port must not be 0".to_string());
        }
        if self.proxy_type == ProxyType::Socks5
            && self.udp_port.is_none()
            && self.tcp_port == u16::MAX
        {
            return Err("engine.tcp_port leaves no room for the UDP relay port".to_string());
        }
        Ok(())
    }
}

/// TCP forwarder configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ForwarderConfig {
    /// Start the forwarder alongside the proxy engine
    #[serde(default)]
    pub enabled: bool,

    /// Remote endpoint host; starting with this empty fails NotConfigured
    #[serde(default)]
    pub remote_host: String,

    /// Remote endpoint port
    #[serde(default = "default_remote_port")]
    pub remote_port: u16,

    /// Local listen port
    #[serde(default = "default_local_port")]
    pub local_port: u16,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        ForwarderConfig {
            enabled: false,
            remote_host: String::new(),
            remote_port: default_remote_port(),
            local_port: default_local_port(),
        }
    }
}

impl ForwarderConfig {
    /// Validate the forwarder section
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.local_port == 0 {
            return Err("forwarder.local_port must not be 0".to_string());
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
