//! Transparent TCP forwarder
//!
//! A socat-style splice: every connection accepted on the local port is
//! paired with a fresh connection to the fixed remote endpoint and the two
//! are relayed until either side closes. The forwarder has no protocol
//! and no direction semantics; all relayed bytes count as forwarded
//! (upload) in the accountant.

use crate::config::ForwarderConfig;
use crate::engine::bind_reuse;
use crate::error::EngineError;
use crate::registry::{ConnKind, ConnectionRegistry};
use crate::relay::{splice, Direction};
use crate::stats::TrafficStats;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Transparent TCP forwarder service
#[derive(Debug)]
pub struct Forwarder {
    config: ForwarderConfig,
    stats: Arc<TrafficStats>,
    registry: Arc<ConnectionRegistry>,
    running: Mutex<Option<Running>>,
}

#[derive(Debug)]
struct Running {
    shutdown: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
}

impl Forwarder {
    /// Create a stopped forwarder
    pub fn new(config: ForwarderConfig, stats: Arc<TrafficStats>) -> Self {
        Forwarder {
            config,
            stats,
            registry: Arc::new(ConnectionRegistry::new()),
            running: Mutex::new(None),
        }
    }

    /// Number of live inbound connections
    pub fn client_count(&self) -> usize {
        self.registry.client_count()
    }

    /// Start accepting. Fails `NotConfigured` when no remote host is set
    /// and `Listener` when the local port cannot be bound. Idempotent.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        if self.config.remote_host.is_empty() {
            return Err(EngineError::NotConfigured("forwarder remote host is empty"));
        }

        let listener = bind_reuse(self.config.local_port)?;
        info!(
            local = self.config.local_port,
            remote = %format!("{}:{}", self.config.remote_host, self.config.remote_port),
            "forwarder listening"
        );

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            self.stats.clone(),
            self.registry.clone(),
            shutdown_rx,
        ));

        *running = Some(Running {
            shutdown: shutdown_tx,
            accept_task,
        });
        Ok(())
    }

    /// Stop the listener and cancel every relayed connection. Idempotent.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        if let Some(state) = running.take() {
            let _ = state.shutdown.send(());
            let _ = state.accept_task.await;
            self.registry.close_all();
            info!("forwarder stopped");
        }
    }

    /// True while the accept loop is running
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ForwarderConfig,
    stats: Arc<TrafficStats>,
    registry: Arc<ConnectionRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            result = listener.accept() => {
                match result {
                    Ok((inbound, peer)) => {
                        debug!(%peer, "forwarder accepted");
                        let mut guard = registry.register(ConnKind::Inbound);
                        let config = config.clone();
                        let stats = stats.clone();
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                _ = guard.cancelled() => debug!(%peer, "forwarder session cancelled"),
                                result = forward(inbound, &config, &stats, &registry) => {
                                    if let Err(e) = result {
                                        debug!(%peer, "forwarder session ended: {}", e);
                                    }
                                }
                            }
                        });
                    }
                    Err(e) => warn!("forwarder accept error: {}", e),
                }
            }
        }
    }
    debug!("forwarder accept loop stopped");
}

/// Dial the remote and splice. A failed dial drops the inbound side.
async fn forward(
    inbound: TcpStream,
    config: &ForwarderConfig,
    stats: &Arc<TrafficStats>,
    registry: &Arc<ConnectionRegistry>,
) -> Result<(), EngineError> {
    let outbound = dial_remote(&config.remote_host, config.remote_port).await?;
    let _outbound_guard = registry.register(ConnKind::Outbound);

    // No direction split here; every relayed byte counts as forwarded
    splice(
        inbound,
        outbound,
        Direction::Upload,
        Direction::Upload,
        stats,
    )
    .await?;
    Ok(())
}

/// Dial the fixed remote with local-endpoint reuse enabled
async fn dial_remote(host: &str, port: u16) -> Result<TcpStream, EngineError> {
    let addr = lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| EngineError::Io(std::io::Error::other("remote host did not resolve")))?;

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    Ok(socket.connect(addr).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn config(remote: SocketAddr, local_port: u16) -> ForwarderConfig {
        ForwarderConfig {
            enabled: true,
            remote_host: remote.ip().to_string(),
            remote_port: remote.port(),
            local_port,
        }
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("0.0.0.0:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_start_without_remote_is_not_configured() {
        let forwarder = Forwarder::new(
            ForwarderConfig::default(),
            Arc::new(TrafficStats::new()),
        );
        let result = forwarder.start().await;
        assert!(matches!(result, Err(EngineError::NotConfigured(_))));
        assert!(!forwarder.is_running().await);
    }

    #[tokio::test]
    async fn test_forward_round_trip() {
        // Remote echoes everything back
        let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote_listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match remote_listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = stream.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if stream.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let local_port = free_port().await;
        let stats = Arc::new(TrafficStats::new());
        let forwarder = Forwarder::new(config(remote_addr, local_port), stats.clone());
        forwarder.start().await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
        let blob: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
        client.write_all(&blob).await.unwrap();

        let mut echoed = vec![0u8; blob.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, blob);

        // Both directions land in the forwarded (upload) counter
        stats.tick();
        let snap = stats.snapshot();
        assert_eq!(snap.upload_total, 2 * blob.len() as u64);
        assert_eq!(snap.download_total, 0);

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote_listener.local_addr().unwrap();

        let local_port = free_port().await;
        let forwarder = Forwarder::new(
            config(remote_addr, local_port),
            Arc::new(TrafficStats::new()),
        );
        forwarder.start().await.unwrap();
        forwarder.start().await.unwrap();
        assert!(forwarder.is_running().await);
        forwarder.stop().await;
        assert!(!forwarder.is_running().await);
    }

    #[tokio::test]
    async fn test_dead_remote_drops_inbound() {
        let local_port = free_port().await;
        let remote: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let forwarder = Forwarder::new(
            config(remote, local_port),
            Arc::new(TrafficStats::new()),
        );
        forwarder.start().await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", local_port)).await.unwrap();
        let mut buf = [0u8; 1];
        // The inbound side is dropped without any payload
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .expect("inbound not closed")
            .unwrap_or(0);
        assert_eq!(n, 0);

        forwarder.stop().await;
    }

    #[tokio::test]
    async fn test_stop_closes_listener() {
        let remote_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let remote_addr = remote_listener.local_addr().unwrap();

        let local_port = free_port().await;
        let forwarder = Forwarder::new(
            config(remote_addr, local_port),
            Arc::new(TrafficStats::new()),
        );
        forwarder.start().await.unwrap();
        forwarder.stop().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(("127.0.0.1", local_port)).await.is_err());
    }
}
