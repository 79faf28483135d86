//! Batched, retrying delivery queue.
//!
//! Snapshots are appended to an in-memory FIFO. One delivery cycle at a time
//! takes up to `batch_size` of the oldest entries and hands them to the
//! transport, retrying the same batch with linear backoff. A batch that
//! exhausts its attempts goes back to the front of the queue in its original
//! order; a follow-up cycle is scheduled after `requeue_delay` whenever
//! entries remain.

use crate::queue::entry::{BatchState, QueueEntry};
use crate::queue::transport::Transport;
use crate::snapshot::MetricSnapshot;
use crate::stats::{DeliveryStats, SharedDeliveryStats};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What to do when `max_pending` is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending entries to make room
    #[default]
    DropOldest,
    /// Refuse the new snapshot
    RejectNewest,
}

/// Delivery queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Maximum entries per transport call
    pub batch_size: usize,
    /// Transport attempts per batch per cycle (at least one is always made)
    pub retry_attempts: u32,
    /// Base delay; the wait after attempt `n` is `retry_delay * n`
    #[serde(with = "crate::config::duration_ms")]
    pub retry_delay: Duration,
    /// Wait before the follow-up cycle when entries remain
    #[serde(with = "crate::config::duration_ms")]
    pub requeue_delay: Duration,
    /// Pending-size cap; `None` means unbounded
    pub max_pending: Option<usize>,
    /// Applied only when `max_pending` is set
    pub overflow: OverflowPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            requeue_delay: Duration::from_millis(1000),
            max_pending: None,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// Queue errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Delivery queue is full ({capacity} pending)")]
    Full { capacity: usize },
}

/// Outcome of one delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries taken off the queue for this cycle
    pub batch_len: usize,
    /// Transport calls made during this cycle
    pub attempts: u32,
    /// `Delivered` or `Requeued`
    pub state: BatchState,
}

impl CycleReport {
    pub fn delivered(&self) -> bool {
        self.state == BatchState::Delivered
    }
}

/// Clears the single-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }

    /// Take ownership of a flag that was already set by the caller.
    fn adopt(flag: &'a AtomicBool) -> Self {
        Self { flag }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

struct Inner<T> {
    transport: T,
    config: DeliveryConfig,
    pending: Mutex<VecDeque<QueueEntry>>,
    processing: AtomicBool,
    /// Start cycles on enqueue and schedule follow-ups
    auto: bool,
    stats: SharedDeliveryStats,
}

impl<T: Transport + 'static> Inner<T> {
    /// Spawn a cycle unless one is already in flight.
    fn trigger(self: &Arc<Self>) {
        if self.pending_len() == 0 {
            return;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(self);
                handle.spawn(async move {
                    let guard = CycleGuard::adopt(&inner.processing);
                    inner.deliver_next_batch(guard).await;
                    inner.schedule_followup();
                });
            }
            Err(_) => {
                self.processing.store(false, Ordering::Release);
                tracing::debug!("No async runtime available; snapshots stay buffered");
            }
        }
    }

    fn schedule_followup(self: &Arc<Self>) {
        if !self.auto || self.pending_len() == 0 {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.requeue_delay).await;
            inner.trigger();
        });
    }

    async fn run_cycle(&self) -> Option<CycleReport> {
        let guard = CycleGuard::acquire(&self.processing)?;
        self.deliver_next_batch(guard).await
    }

    async fn deliver_next_batch(&self, _guard: CycleGuard<'_>) -> Option<CycleReport> {
        let mut batch = self.take_batch();
        if batch.is_empty() {
            return None;
        }

        let payload: Vec<MetricSnapshot> = batch.iter().map(|e| e.snapshot.clone()).collect();
        let max_attempts = self.config.retry_attempts.max(1);
        let mut state = BatchState::Pending;
        let mut attempt = 0;

        tracing::debug!(batch_len = payload.len(), %state, "Delivery cycle started");

        while !state.is_terminal() {
            attempt += 1;
            state = BatchState::Attempting(attempt);
            for entry in batch.iter_mut() {
                entry.attempts += 1;
            }

            let result = if payload.len() == 1 {
                self.transport.send_one(&payload[0]).await
            } else {
                self.transport.send_batch(&payload).await
            };

            if let Err(ref e) = result {
                self.stats.record_failed_attempt();
                tracing::warn!(
                    attempt,
                    max_attempts,
                    batch_len = payload.len(),
                    "Delivery attempt failed: {e}"
                );
            }

            state = state.after_attempt(result.is_ok(), max_attempts, self.config.retry_delay);
            tracing::debug!(%state, "Batch state changed");

            if let BatchState::Backoff { delay, .. } = state {
                tokio::time::sleep(delay).await;
            }
        }

        let batch_len = batch.len();
        if state == BatchState::Delivered {
            self.stats.record_delivered(batch_len);
            tracing::info!(batch_len, attempts = attempt, "Delivered snapshot batch");
        } else {
            self.requeue(batch);
            self.stats.record_requeued();
            tracing::warn!(
                batch_len,
                pending = self.pending_len(),
                "Batch undeliverable after {attempt} attempts; requeued"
            );
        }

        Some(CycleReport {
            batch_len,
            attempts: attempt,
            state,
        })
    }

    fn take_batch(&self) -> Vec<QueueEntry> {
        let mut pending = self.pending.lock();
        let n = self.config.batch_size.max(1).min(pending.len());
        pending.drain(..n).collect()
    }

    /// Undo `take_batch`, preserving relative order.
    fn requeue(&self, batch: Vec<QueueEntry>) {
        let mut pending = self.pending.lock();
        for entry in batch.into_iter().rev() {
            pending.push_front(entry);
        }
    }

    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Handle to a delivery queue. Cloning shares the same queue.
pub struct DeliveryQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for DeliveryQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + 'static> DeliveryQueue<T> {
    /// Create a queue that starts delivering as soon as snapshots arrive.
    ///
    /// Cycles are spawned on the current tokio runtime; snapshots enqueued
    /// outside a runtime are buffered until the next trigger.
    pub fn new(transport: T, config: DeliveryConfig) -> Self {
        Self::build(transport, config, Arc::new(DeliveryStats::new()), true)
    }

    /// Like [`new`](Self::new), reporting into the given stats.
    pub fn with_stats(transport: T, config: DeliveryConfig, stats: SharedDeliveryStats) -> Self {
        Self::build(transport, config, stats, true)
    }

    /// Create a queue that only delivers when [`process_once`](Self::process_once)
    /// is called.
    pub fn manual(transport: T, config: DeliveryConfig) -> Self {
        Self::build(transport, config, Arc::new(DeliveryStats::new()), false)
    }

    fn build(transport: T, config: DeliveryConfig, stats: SharedDeliveryStats, auto: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                pending: Mutex::new(VecDeque::new()),
                processing: AtomicBool::new(false),
                auto,
                stats,
            }),
        }
    }

    /// Append a snapshot and start a cycle if none is in flight.
    ///
    /// Only fails when a pending cap with [`OverflowPolicy::RejectNewest`]
    /// is configured and reached.
    pub fn enqueue(&self, snapshot: MetricSnapshot) -> Result<(), QueueError> {
        {
            let mut pending = self.inner.pending.lock();

            if let Some(cap) = self.inner.config.max_pending {
                let cap = cap.max(1);
                if pending.len() >= cap {
                    match self.inner.config.overflow {
                        OverflowPolicy::RejectNewest => {
                            tracing::warn!(capacity = cap, "Delivery queue full; snapshot rejected");
                            return Err(QueueError::Full { capacity: cap });
                        }
                        OverflowPolicy::DropOldest => {
                            let excess = pending.len() + 1 - cap;
                            pending.drain(..excess);
                            self.inner.stats.record_dropped(excess);
                            tracing::warn!(
                                capacity = cap,
                                dropped = excess,
                                "Delivery queue full; oldest snapshots dropped"
                            );
                        }
                    }
                }
            }

            pending.push_back(QueueEntry::new(snapshot));
        }

        self.inner.stats.record_enqueued();

        if self.inner.auto {
            self.inner.trigger();
        }
        Ok(())
    }

    /// Run one delivery cycle inline.
    ///
    /// Returns `None` when the queue is empty or another cycle is in flight.
    pub async fn process_once(&self) -> Option<CycleReport> {
        self.inner.run_cycle().await
    }

    /// Entries not yet confirmed by the transport.
    pub fn queue_size(&self) -> usize {
        self.inner.pending_len()
    }

    /// Whether a delivery cycle is currently in flight.
    pub fn is_processing(&self) -> bool {
        self.inner.processing.load(Ordering::Acquire)
    }

    /// Session ids of the pending entries, oldest first.
    pub fn pending_session_ids(&self) -> Vec<String> {
        self.inner
            .pending
            .lock()
            .iter()
            .map(|e| e.snapshot.session_id.clone())
            .collect()
    }

    /// Drop every pending entry. Returns how many were dropped.
    ///
    /// A batch already taken by an in-flight cycle is not affected.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut pending = self.inner.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            self.inner.stats.record_dropped(dropped);
            tracing::info!(dropped, "Delivery queue cleared");
        }
        dropped
    }

    /// Resolve once nothing is pending and no cycle is in flight.
    pub async fn wait_until_empty(&self, poll: Duration) {
        while self.queue_size() > 0 || self.is_processing() {
            tokio::time::sleep(poll).await;
        }
    }

    pub fn stats(&self) -> &SharedDeliveryStats {
        &self.inner.stats
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::transport::{CallKind, MemoryTransport};

    fn snapshots(prefix: &str, n: usize) -> Vec<MetricSnapshot> {
        (0..n)
            .map(|i| MetricSnapshot::new(format!("{prefix}-{i}")))
            .collect()
    }

    fn config(batch_size: usize) -> DeliveryConfig {
        DeliveryConfig {
            batch_size,
            ..DeliveryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_single_entry_uses_single_path() {
        let queue = DeliveryQueue::manual(MemoryTransport::new(), config(5));
        queue.enqueue(MetricSnapshot::new("only")).unwrap();
        assert_eq!(queue.queue_size(), 1);

        let report = queue.process_once().await.unwrap();
        assert!(report.delivered());
        assert_eq!(report.batch_len, 1);
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.transport().calls()[0].kind, CallKind::Single);
    }

    #[tokio::test]
    async fn test_multiple_entries_use_batch_path() {
        let queue = DeliveryQueue::manual(MemoryTransport::new(), config(5));
        for s in snapshots("s", 3) {
            queue.enqueue(s).unwrap();
        }

        let report = queue.process_once().await.unwrap();
        assert_eq!(report.batch_len, 3);
        assert_eq!(queue.transport().calls()[0].kind, CallKind::Batch);
        assert_eq!(
            queue.transport().calls()[0].session_ids,
            vec!["s-0", "s-1", "s-2"]
        );
    }

    #[tokio::test]
    async fn test_empty_queue_has_no_cycle() {
        let queue = DeliveryQueue::manual(MemoryTransport::new(), config(5));
        assert!(queue.process_once().await.is_none());
        assert!(queue.transport().calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_batch_is_requeued_in_order() {
        let queue = DeliveryQueue::manual(MemoryTransport::new(), config(2));
        for s in snapshots("s", 3) {
            queue.enqueue(s).unwrap();
        }
        queue.transport().set_down(true);
        let before = queue.pending_session_ids();

        let started = tokio::time::Instant::now();
        let report = queue.process_once().await.unwrap();

        assert_eq!(report.state, BatchState::Requeued);
        assert_eq!(report.attempts, 3);
        assert_eq!(queue.pending_session_ids(), before);
        assert_eq!(queue.transport().calls().len(), 3);
        // 1000ms after the first failure, 2000ms after the second
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(queue.stats().snapshot().batches_requeued, 1);
        assert!(!queue.is_processing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_within_cycle() {
        let queue = DeliveryQueue::manual(MemoryTransport::new(), config(10));
        for s in snapshots("s", 4) {
            queue.enqueue(s).unwrap();
        }
        queue.transport().fail_next(2);

        let report = queue.process_once().await.unwrap();

        assert!(report.delivered());
        assert_eq!(report.attempts, 3);
        assert_eq!(queue.queue_size(), 0);
        assert_eq!(queue.transport().delivered().len(), 4);
        assert_eq!(queue.stats().snapshot().failed_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_attempts_still_tries_once() {
        let cfg = DeliveryConfig {
            retry_attempts: 0,
            ..config(5)
        };
        let queue = DeliveryQueue::manual(MemoryTransport::new(), cfg);
        queue.enqueue(MetricSnapshot::new("a")).unwrap();

        let report = queue.process_once().await.unwrap();
        assert!(report.delivered());
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_delivery_in_fifo_batches() {
        let queue = DeliveryQueue::new(MemoryTransport::new(), config(5));
        for s in snapshots("s", 12) {
            queue.enqueue(s).unwrap();
        }
        // Only one cycle is in flight no matter how many enqueues happened
        assert!(queue.is_processing());

        queue.wait_until_empty(Duration::from_millis(50)).await;

        assert_eq!(queue.transport().delivered_batch_sizes(), vec![5, 5, 2]);
        let order: Vec<String> = queue
            .transport()
            .delivered()
            .into_iter()
            .map(|s| s.session_id)
            .collect();
        let expected: Vec<String> = (0..12).map(|i| format!("s-{i}")).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_delivery_survives_outage() {
        let queue = DeliveryQueue::new(MemoryTransport::new(), config(10));
        // First cycle: three failed attempts, then requeue
        queue.transport().fail_next(3);
        for s in snapshots("s", 2) {
            queue.enqueue(s).unwrap();
        }

        queue.wait_until_empty(Duration::from_millis(50)).await;

        let calls = queue.transport().calls();
        assert_eq!(calls.len(), 4);
        assert!(calls[3].succeeded);
        assert_eq!(queue.stats().snapshot().snapshots_delivered, 2);
        assert_eq!(queue.stats().snapshot().batches_requeued, 1);
    }

    #[tokio::test]
    async fn test_reject_newest_when_full() {
        let cfg = DeliveryConfig {
            max_pending: Some(2),
            overflow: OverflowPolicy::RejectNewest,
            ..config(5)
        };
        let queue = DeliveryQueue::manual(MemoryTransport::new(), cfg);
        queue.enqueue(MetricSnapshot::new("a")).unwrap();
        queue.enqueue(MetricSnapshot::new("b")).unwrap();

        let err = queue.enqueue(MetricSnapshot::new("c")).unwrap_err();
        assert_eq!(err, QueueError::Full { capacity: 2 });
        assert_eq!(queue.pending_session_ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_drop_oldest_when_full() {
        let cfg = DeliveryConfig {
            max_pending: Some(2),
            overflow: OverflowPolicy::DropOldest,
            ..config(5)
        };
        let queue = DeliveryQueue::manual(MemoryTransport::new(), cfg);
        for id in ["a", "b", "c"] {
            queue.enqueue(MetricSnapshot::new(id)).unwrap();
        }

        assert_eq!(queue.pending_session_ids(), vec!["b", "c"]);
        assert_eq!(queue.stats().snapshot().snapshots_dropped, 1);
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let queue = DeliveryQueue::manual(MemoryTransport::new(), config(5));
        for s in snapshots("s", 3) {
            queue.enqueue(s).unwrap();
        }

        assert_eq!(queue.clear(), 3);
        assert_eq!(queue.queue_size(), 0);
        assert!(queue.process_once().await.is_none());
    }

    #[test]
    fn test_enqueue_outside_runtime_buffers() {
        let queue = DeliveryQueue::new(MemoryTransport::new(), config(5));
        queue.enqueue(MetricSnapshot::new("a")).unwrap();

        assert_eq!(queue.queue_size(), 1);
        assert!(!queue.is_processing());
    }

    #[test]
    fn test_default_config() {
        let cfg = DeliveryConfig::default();
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.retry_delay, Duration::from_millis(1000));
        assert_eq!(cfg.requeue_delay, Duration::from_millis(1000));
        assert!(cfg.max_pending.is_none());
    }
}
