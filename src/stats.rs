//! Traffic accounting
//!
//! Data-plane tasks record byte counts into pending deltas under a short
//! mutex; a 1 Hz ticker drains the deltas into the published totals and
//! computes the last-second rates in Mb/s. Rates come from the drained
//! deltas rather than total differences, so a stop/start cycle publishes
//! clean zeros on its first tick.

use crate::relay::Direction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::trace;

/// Published view of the traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Cumulative bytes sent towards targets
    pub upload_total: u64,
    /// Cumulative bytes sent back to clients
    pub download_total: u64,
    /// Upload rate over the last second, in Mb/s
    pub upload_mbps: f64,
    /// Download rate over the last second, in Mb/s
    pub download_mbps: f64,
}

#[derive(Debug, Default)]
struct Pending {
    up: u64,
    down: u64,
}

/// Process-wide traffic accountant for one engine instance
#[derive(Debug)]
pub struct TrafficStats {
    pending: Mutex<Pending>,
    upload_total: AtomicU64,
    download_total: AtomicU64,
    upload_mbps_bits: AtomicU64,
    download_mbps_bits: AtomicU64,
    publish_tx: watch::Sender<StatsSnapshot>,
}

impl Default for TrafficStats {
    fn default() -> Self {
        Self::new()
    }
}

impl TrafficStats {
    /// Create a fresh accountant with all counters at zero
    pub fn new() -> Self {
        let (publish_tx, _) = watch::channel(StatsSnapshot::default());
        TrafficStats {
            pending: Mutex::new(Pending::default()),
            upload_total: AtomicU64::new(0),
            download_total: AtomicU64::new(0),
            upload_mbps_bits: AtomicU64::new(0),
            download_mbps_bits: AtomicU64::new(0),
            publish_tx,
        }
    }

    /// Record bytes flowing towards a target
    pub fn record_up(&self, n: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.up += n;
    }

    /// Record bytes flowing back to a client
    pub fn record_down(&self, n: u64) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.down += n;
    }

    /// Record bytes for a pump direction
    pub fn record(&self, direction: Direction, n: u64) {
        match direction {
            Direction::Upload => self.record_up(n),
            Direction::Download => self.record_down(n),
        }
    }

    /// Current totals and last-second rates
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            upload_total: self.upload_total.load(Ordering::Relaxed),
            download_total: self.download_total.load(Ordering::Relaxed),
            upload_mbps: f64::from_bits(self.upload_mbps_bits.load(Ordering::Relaxed)),
            download_mbps: f64::from_bits(self.download_mbps_bits.load(Ordering::Relaxed)),
        }
    }

    /// Subscribe to ticker publications
    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.publish_tx.subscribe()
    }

    /// Drain pending deltas into the totals and publish rates.
    ///
    /// Called once per second by the ticker task. The mutex is held only
    /// for the drain; totals and rates are stored outside it.
    pub fn tick(&self) {
        let (up_delta, down_delta) = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            let deltas = (pending.up, pending.down);
            pending.up = 0;
            pending.down = 0;
            deltas
        };

        self.upload_total.fetch_add(up_delta, Ordering::Relaxed);
        self.download_total.fetch_add(down_delta, Ordering::Relaxed);

        let up_mbps = up_delta as f64 * 8.0 / 1_000_000.0;
        let down_mbps = down_delta as f64 * 8.0 / 1_000_000.0;
        self.upload_mbps_bits
            .store(up_mbps.to_bits(), Ordering::Relaxed);
        self.download_mbps_bits
            .store(down_mbps.to_bits(), Ordering::Relaxed);

        let snapshot = self.snapshot();
        trace!(
            up = snapshot.upload_total,
            down = snapshot.download_total,
            "stats tick"
        );
        self.publish_tx.send_replace(snapshot);
    }

    /// Zero every counter and publish the cleared snapshot
    pub fn reset(&self) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.up = 0;
            pending.down = 0;
        }
        self.upload_total.store(0, Ordering::Relaxed);
        self.download_total.store(0, Ordering::Relaxed);
        self.upload_mbps_bits.store(0, Ordering::Relaxed);
        self.download_mbps_bits.store(0, Ordering::Relaxed);
        self.publish_tx.send_replace(StatsSnapshot::default());
    }
}

/// Spawn the 1 Hz ticker for the given accountant.
///
/// Drains continue until the shutdown signal fires, whether or not anyone
/// is observing the published snapshots.
pub fn spawn_ticker(
    stats: std::sync::Arc<TrafficStats>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // interval fires immediately; the first drain belongs one second in
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => stats.tick(),
                _ = shutdown.recv() => break,
            }
        }
    })
}
