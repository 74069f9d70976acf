//! Live-connection tracking
//!
//! Every accepted or dialed connection registers here for the lifetime of
//! its session. The registry supports bulk cancellation on shutdown and
//! publishes the number of inbound clients; it never touches stream data.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// Whether a connection was accepted from the listener or dialed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    /// Accepted from a listener
    Inbound,
    /// Dialed towards a target
    Outbound,
}

#[derive(Debug)]
struct ConnEntry {
    kind: ConnKind,
    cancel: broadcast::Sender<()>,
}

/// Registry of live connections for one engine instance
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, ConnEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection; the returned guard deregisters on drop.
    pub fn register(self: &Arc<Self>, kind: ConnKind) -> ConnGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, ConnEntry {
                kind,
                cancel: cancel_tx,
            });
        ConnGuard {
            id,
            registry: self.clone(),
            cancel_rx,
        }
    }

    /// Signal cancellation to every tracked connection.
    ///
    /// Entries stay in the map until their guards drop; deregistrations
    /// arriving after this call are fine.
    pub fn close_all(&self) {
        let senders: Vec<broadcast::Sender<()>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.cancel.clone())
            .collect();

        debug!(count = senders.len(), "cancelling tracked connections");
        for sender in senders {
            let _ = sender.send(());
        }
    }

    /// Number of inbound clients currently connected.
    ///
    /// Outbound connections are tracked for cancellation but not counted.
    pub fn client_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|entry| entry.kind == ConnKind::Inbound)
            .count()
    }

    /// Total tracked connections, inbound and outbound
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deregister(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Handle to one registered connection
#[derive(Debug)]
pub struct ConnGuard {
    id: u64,
    registry: Arc<ConnectionRegistry>,
    cancel_rx: broadcast::Receiver<()>,
}

impl ConnGuard {
    /// Resolve when the registry cancels this connection
    pub async fn cancelled(&mut self) {
        // Closed means the entry is already gone; treat it the same way
        let _ = self.cancel_rx.recv().await;
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}
