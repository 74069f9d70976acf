//! Proxy supervisor
//!
//! Owns the listener lifecycle for the selected protocol, the UDP relay in
//! SOCKS5 mode, the traffic ticker, and the connection registry. Observers
//! get lifecycle changes on a watch channel; the engine publishes and
//! never blocks on them.

use crate::config::{EngineConfig, ProxyType};
use crate::error::EngineError;
use crate::netif;
use crate::proxy::{create_handler, InboundHandler, UdpRelay};
use crate::registry::{ConnKind, ConnectionRegistry};
use crate::stats::{spawn_ticker, StatsSnapshot, TrafficStats};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bind a TCP listener with local-endpoint reuse enabled
pub(crate) fn bind_reuse(port: u16) -> Result<TcpListener, EngineError> {
    let bind = |port: u16| -> std::io::Result<TcpListener> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            port,
        )))?;
        socket.listen(1024)
    };

    bind(port).map_err(|source| EngineError::Listener {
        kind: "tcp",
        port,
        source,
    })
}

/// Published lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    /// True between a successful `start()` and the next `stop()`
    pub running: bool,
    /// Discovered LAN IPv4, `0.0.0.0` when unknown
    pub lan_ip: Ipv4Addr,
    /// Active proxy protocol
    pub proxy_type: ProxyType,
    /// Bound TCP listener port
    pub tcp_port: u16,
    /// Bound UDP relay port, SOCKS5 mode only
    pub udp_port: Option<u16>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        EngineStatus {
            running: false,
            lan_ip: Ipv4Addr::UNSPECIFIED,
            proxy_type: ProxyType::default(),
            tcp_port: 0,
            udp_port: None,
        }
    }
}

#[derive(Debug)]
struct Running {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

/// The proxy engine supervisor
#[derive(Debug)]
pub struct ProxyEngine {
    config: StdMutex<EngineConfig>,
    stats: Arc<TrafficStats>,
    registry: Arc<ConnectionRegistry>,
    status_tx: watch::Sender<EngineStatus>,
    running: Mutex<Option<Running>>,
}

impl ProxyEngine {
    /// Create a stopped engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::default());
        ProxyEngine {
            config: StdMutex::new(config),
            stats: Arc::new(TrafficStats::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            status_tx,
            running: Mutex::new(None),
        }
    }

    /// Shared traffic accountant
    pub fn stats(&self) -> Arc<TrafficStats> {
        self.stats.clone()
    }

    /// Current totals and rates
    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of connected inbound clients
    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    /// Subscribe to lifecycle changes
    pub fn subscribe_status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    /// Last published status
    pub fn status(&self) -> EngineStatus {
        *self.status_tx.borrow()
    }

    /// True between `start()` and `stop()`
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Replace the protocol selection.
    ///
    /// Takes effect on the next `start()`; a running engine is not
    /// restarted.
    pub fn set_proxy_type(&self, proxy_type: ProxyType) {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .proxy_type = proxy_type;
    }

    /// Configuration snapshot
    pub fn config(&self) -> EngineConfig {
        self.config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bind the listeners and start serving. Idempotent; a second call on
    /// a running engine is a no-op. On bind failure nothing is left
    /// running and the error is returned.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let config = self.config();
        self.stats.reset();

        let listener = bind_reuse(config.tcp_port)?;

        // SOCKS5 carries a UDP relay on the adjacent port
        let udp_relay = match config.proxy_type {
            ProxyType::Socks5 => Some(Arc::new(
                UdpRelay::bind(config.udp_port(), self.stats.clone()).await?,
            )),
            ProxyType::Http => None,
        };

        let lan_ip = netif::lan_ipv4();
        let udp_port = udp_relay.as_ref().map(|relay| relay.port());
        let udp_bind = udp_port.map(|port| SocketAddrV4::new(lan_ip, port));

        let handler = create_handler(
            config.proxy_type,
            self.stats.clone(),
            self.registry.clone(),
            udp_bind,
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(accept_loop(
            listener,
            handler,
            self.registry.clone(),
            shutdown_tx.subscribe(),
        )));
        if let Some(relay) = udp_relay {
            tasks.push(relay.spawn(shutdown_tx.subscribe()));
        }
        tasks.push(spawn_ticker(self.stats.clone(), shutdown_tx.subscribe()));

        info!(
            protocol = handler_name(config.proxy_type),
            lan_ip = %lan_ip,
            tcp_port = config.tcp_port,
            udp_port = ?udp_port,
            "engine started"
        );

        self.status_tx.send_replace(EngineStatus {
            running: true,
            lan_ip,
            proxy_type: config.proxy_type,
            tcp_port: config.tcp_port,
            udp_port,
        });

        *running = Some(Running {
            shutdown: shutdown_tx,
            tasks,
        });
        Ok(())
    }

    /// Stop the listeners, cancel every tracked connection, and halt the
    /// ticker. Counters keep their final values until the next `start()`.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(state) = running.take() {
            let _ = state.shutdown.send(());
            for task in state.tasks {
                let _ = task.await;
            }
            self.registry.close_all();

            let status = EngineStatus {
                running: false,
                ..*self.status_tx.borrow()
            };
            self.status_tx.send_replace(status);
            info!("engine stopped");
        }
    }
}

fn handler_name(proxy_type: ProxyType) -> &'static str {
    match proxy_type {
        ProxyType::Socks5 => "socks5",
        ProxyType::Http => "http",
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn InboundHandler>,
    registry: Arc<ConnectionRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        debug!(%peer, protocol = handler.protocol(), "accepted");
                        let mut guard = registry.register(ConnKind::Inbound);
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = guard.cancelled() => {
                                    debug!(%peer, "session cancelled");
                                }
                                result = handler.handle(Box::new(stream), peer) => {
                                    if let Err(e) = result {
                                        debug!(%peer, "session ended: {}", e);
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => warn!("accept error: {}", e),
                }
            }
        }
    }
    debug!("accept loop stopped");
}
