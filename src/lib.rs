//! # tetherlink - LAN-to-Upstream Relay Engine
//!
//! tetherlink turns a host with two network paths, typically a Wi-Fi
//! client LAN and a cellular upstream, into a relay. Clients on the LAN
//! point at the proxy listener and their traffic leaves over the upstream
//! path.
//!
//! ## Features
//!
//! - **SOCKS5 server**: CONNECT relays and UDP ASSOCIATE with a shared
//!   UDP relay listener on the adjacent port
//! - **HTTP proxy**: CONNECT tunneling plus Host-header forwarding
//! - **TCP forwarder**: transparent splice of a local port to a fixed
//!   remote endpoint
//! - **Traffic accounting**: cumulative byte totals and 1 Hz Mb/s rates
//!   published to observers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tetherlink::config::Config;
//! use tetherlink::engine::ProxyEngine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let engine = ProxyEngine::new(config.engine);
//!     engine.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The supervisor accepts LAN connections and dispatches each one to the
//! configured protocol handler. Handlers dial their own outbound
//! connections and relay through the shared byte pump, which records
//! every chunk with the traffic accountant. The registry tracks all live
//! connections so `stop()` can cancel them in bulk.
//!
//! ```text
//! LAN client -> listener -> SOCKS5 / HTTP handler -> upstream target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod engine;
pub mod error;
pub mod forwarder;
pub mod netif;
pub mod proxy;
pub mod registry;
pub mod relay;
pub mod stats;

// Re-export commonly used items
pub use config::{load_config, Config, ProxyType};
pub use engine::{EngineStatus, ProxyEngine};
pub use error::{EngineError, HttpError, SocksError};
pub use forwarder::Forwarder;
pub use stats::{StatsSnapshot, TrafficStats};

/// Version of the tetherlink library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
