//! tetherlink - LAN-to-Upstream Relay Engine
//!
//! This is the main entry point for the tetherlink daemon.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tetherlink::config::{load_config, Config};
use tetherlink::engine::ProxyEngine;
use tetherlink::forwarder::Forwarder;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// tetherlink - multi-protocol relay proxy engine
#[derive(Parser, Debug)]
#[command(name = "tetherlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, args.json_log)?;

    let config = match &args.config {
        Some(path) => {
            let config = load_config(path)?;
            info!("Configuration loaded from: {:?}", path);
            config
        }
        None => Config::default(),
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    info!("tetherlink v{}", tetherlink::VERSION);

    let engine = Arc::new(ProxyEngine::new(config.engine.clone()));
    engine.start().await?;

    let status = engine.status();
    info!(
        "Proxy listening on {}:{} ({:?})",
        status.lan_ip, status.tcp_port, status.proxy_type
    );
    if let Some(udp_port) = status.udp_port {
        info!("UDP relay on port {}", udp_port);
    }

    let forwarder = if config.forwarder.enabled {
        let forwarder = Arc::new(Forwarder::new(config.forwarder.clone(), engine.stats()));
        forwarder.start().await?;
        Some(forwarder)
    } else {
        None
    };

    wait_for_shutdown().await;

    if let Some(forwarder) = &forwarder {
        forwarder.stop().await;
    }
    engine.stop().await;
    info!("Shutdown complete");

    Ok(())
}

/// Block until Ctrl+C or, on unix, SIGTERM
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

/// Setup logging based on configuration
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
