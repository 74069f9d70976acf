//! TCP relay for the SOCKS5 CONNECT command

use crate::error::EngineError;
use crate::proxy::socks::addr::TargetAddr;
use crate::proxy::socks::command::send_reply;
use crate::proxy::socks::consts::*;
use crate::proxy::ProxyStream;
use crate::registry::{ConnKind, ConnectionRegistry};
use crate::relay::{splice, Direction};
use crate::stats::TrafficStats;
use std::sync::Arc;
use tracing::{debug, info};

/// Dial the target and relay bidirectionally.
///
/// On dial failure the client gets reply code 0x05 and the connection is
/// closed. On success the fixed `0.0.0.0:0` success reply is sent and the
/// two pump directions run until either side terminates. Bytes from the
/// client count as upload, bytes from the target as download.
pub async fn handle_connect(
    mut client: Box<dyn ProxyStream>,
    target: TargetAddr,
    stats: &Arc<TrafficStats>,
    registry: &Arc<ConnectionRegistry>,
) -> Result<(), EngineError> {
    let outbound = match target.connect_tcp().await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%target, "dial failed: {}", e);
            send_reply(&mut client, SOCKS5_REPLY_CONNECTION_REFUSED, None).await?;
            return Err(e.into());
        }
    };

    let _outbound_guard = registry.register(ConnKind::Outbound);
    send_reply(&mut client, SOCKS5_REPLY_SUCCEEDED, None).await?;

    info!(%target, "relay established");
    splice(
        client,
        outbound,
        Direction::Upload,
        Direction::Download,
        stats,
    )
    .await?;
    Ok(())
}
