//! Queue entries and the per-batch delivery state machine.

use crate::snapshot::MetricSnapshot;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// A snapshot wrapped with delivery metadata.
///
/// Owned by the queue until the transport confirms it.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub snapshot: MetricSnapshot,
    /// Transport attempts made so far, across all cycles
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(snapshot: MetricSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            snapshot,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Where a batch is in its delivery cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Taken off the queue, not yet attempted
    Pending,
    /// Transport call `n` (1-based) in flight
    Attempting(u32),
    /// Attempt `n` failed; waiting before the next one
    Backoff { attempt: u32, delay: Duration },
    /// Confirmed by the transport
    Delivered,
    /// All attempts failed; pushed back to the front of the queue
    Requeued,
}

impl BatchState {
    /// Next state after a transport result.
    ///
    /// `Attempting(n)` moves to `Delivered` on success, to `Backoff` while
    /// attempts remain and to `Requeued` once `max_attempts` is reached.
    pub fn after_attempt(self, success: bool, max_attempts: u32, base_delay: Duration) -> Self {
        match self {
            BatchState::Attempting(_) if success => BatchState::Delivered,
            BatchState::Attempting(n) if n < max_attempts => BatchState::Backoff {
                attempt: n,
                delay: base_delay * n,
            },
            BatchState::Attempting(_) => BatchState::Requeued,
            other => other,
        }
    }

    /// Whether the cycle for this batch has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Delivered | BatchState::Requeued)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchState::Pending => write!(f, "pending"),
            BatchState::Attempting(n) => write!(f, "attempting #{n}"),
            BatchState::Backoff { attempt, delay } => {
                write!(f, "backoff after #{attempt} ({}ms)", delay.as_millis())
            }
            BatchState::Delivered => write!(f, "delivered"),
            BatchState::Requeued => write!(f, "requeued"),
        }
    }
}
