//! Delivery statistics.
//!
//! Counters describing what the delivery queue has done since start-up. They
//! are for operational visibility only; nothing in the delivery path reads
//! them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live delivery counters for one queue.
#[derive(Debug)]
pub struct DeliveryStats {
    /// Snapshots accepted by `enqueue`
    snapshots_enqueued: AtomicU64,
    /// Snapshots confirmed by the transport
    snapshots_delivered: AtomicU64,
    /// Batches confirmed by the transport
    batches_delivered: AtomicU64,
    /// Individual transport attempts that failed
    failed_attempts: AtomicU64,
    /// Batches pushed back after exhausting their attempts
    batches_requeued: AtomicU64,
    /// Entries discarded by the overflow policy or an explicit clear
    snapshots_dropped: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self {
            snapshots_enqueued: AtomicU64::new(0),
            snapshots_delivered: AtomicU64::new(0),
            batches_delivered: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            batches_requeued: AtomicU64::new(0),
            snapshots_dropped: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue from (and save back to) a JSON file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous delivery stats: {e}");
        }

        stats
    }

    pub fn record_enqueued(&self) {
        self.snapshots_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, batch_len: usize) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.snapshots_delivered
            .fetch_add(batch_len as u64, Ordering::Relaxed);
    }

    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.batches_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: usize) {
        self.snapshots_dropped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            snapshots_enqueued: self.snapshots_enqueued.load(Ordering::Relaxed),
            snapshots_delivered: self.snapshots_delivered.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            batches_requeued: self.batches_requeued.load(Ordering::Relaxed),
            snapshots_dropped: self.snapshots_dropped.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary for the CLI.
    pub fn summary(&self, pending: usize) -> String {
        let stats = self.snapshot();
        format!(
            "Delivery Statistics:\n\
             - Snapshots enqueued: {}\n\
             - Snapshots delivered: {}\n\
             - Batches delivered: {}\n\
             - Failed attempts: {}\n\
             - Batches requeued: {}\n\
             - Snapshots dropped: {}\n\
             - Still pending: {}\n\
             - Uptime: {} seconds",
            stats.snapshots_enqueued,
            stats.snapshots_delivered,
            stats.batches_delivered,
            stats.failed_attempts,
            stats.batches_requeued,
            stats.snapshots_dropped,
            pending,
            stats.uptime_secs
        )
    }

    /// Save counters to disk, if persistence is configured.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                snapshots_enqueued: stats.snapshots_enqueued,
                snapshots_delivered: stats.snapshots_delivered,
                batches_delivered: stats.batches_delivered,
                failed_attempts: stats.failed_attempts,
                batches_requeued: stats.batches_requeued,
                snapshots_dropped: stats.snapshots_dropped,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.snapshots_enqueued
                    .store(persisted.snapshots_enqueued, Ordering::Relaxed);
                self.snapshots_delivered
                    .store(persisted.snapshots_delivered, Ordering::Relaxed);
                self.batches_delivered
                    .store(persisted.batches_delivered, Ordering::Relaxed);
                self.failed_attempts
                    .store(persisted.failed_attempts, Ordering::Relaxed);
                self.batches_requeued
                    .store(persisted.batches_requeued, Ordering::Relaxed);
                self.snapshots_dropped
                    .store(persisted.snapshots_dropped, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the delivery counters at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub snapshots_enqueued: u64,
    pub snapshots_delivered: u64,
    pub batches_delivered: u64,
    pub failed_attempts: u64,
    pub batches_requeued: u64,
    pub snapshots_dropped: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// On-disk format.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub snapshots_enqueued: u64,
    pub snapshots_delivered: u64,
    pub batches_delivered: u64,
    pub failed_attempts: u64,
    pub batches_requeued: u64,
    pub snapshots_dropped: u64,
    pub last_updated: DateTime<Utc>,
}

/// Delivery stats shared between a queue and its host.
pub type SharedDeliveryStats = Arc<DeliveryStats>;
