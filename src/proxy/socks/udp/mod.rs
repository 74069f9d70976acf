//! UDP ASSOCIATE support
//!
//! The ASSOCIATE command hands the client the engine-wide relay endpoint
//! and parks the TCP control connection; the association lives exactly as
//! long as that connection.

pub mod packet;
mod relay;

pub use packet::{encode_udp_packet, parse_udp_packet, UdpPacket};
pub use relay::UdpRelay;

use crate::error::EngineError;
use crate::proxy::socks::command::send_reply;
use crate::proxy::socks::consts::SOCKS5_REPLY_SUCCEEDED;
use crate::proxy::ProxyStream;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::io::AsyncReadExt;
use tracing::{debug, trace};

/// Handle a UDP ASSOCIATE command.
///
/// Replies with the relay endpoint, then reads and discards control-stream
/// bytes until the client closes or errors, which tears the association
/// down.
pub async fn handle_udp_associate(
    mut stream: Box<dyn ProxyStream>,
    bind: SocketAddrV4,
) -> Result<(), EngineError> {
    send_reply(
        &mut stream,
        SOCKS5_REPLY_SUCCEEDED,
        Some(SocketAddr::V4(bind)),
    )
    .await?;

    let mut buf = [0u8; 512];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("control connection closed, association torn down");
                break;
            }
            Ok(n) => {
                trace!(bytes = n, "discarding control-stream bytes");
            }
            Err(e) => {
                debug!("control connection error: {}", e);
                break;
            }
        }
    }

    Ok(())
}
