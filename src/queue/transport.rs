//! The outward delivery seam.

use crate::snapshot::MetricSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// Transport failure. All variants are treated the same by the queue.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport config error: {0}")]
    Config(String),

    #[error("Transport network error: {0}")]
    Network(String),

    #[error("Collection endpoint returned {status}: {message}")]
    Server { status: u16, message: String },
}

/// Delivers snapshots to the collection boundary.
///
/// The two methods only differ in request shape; the queue uses `send_one`
/// for a batch of exactly one entry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_one(&self, snapshot: &MetricSnapshot) -> Result<(), TransportError>;

    async fn send_batch(&self, snapshots: &[MetricSnapshot]) -> Result<(), TransportError>;
}

/// Which path a transport call took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Single,
    Batch,
}

/// A call observed by [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct TransportCall {
    pub kind: CallKind,
    pub session_ids: Vec<String>,
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct MemoryTransportState {
    calls: Vec<TransportCall>,
    delivered: Vec<MetricSnapshot>,
    fail_next: u32,
    down: bool,
}

/// In-process transport that records every call.
///
/// Failures can be scripted with [`fail_next`](Self::fail_next) or by taking
/// the whole sink [`down`](Self::set_down).
#[derive(Debug, Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryTransportState>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` calls, then recover.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Fail every call until brought back up.
    pub fn set_down(&self, down: bool) {
        self.state.lock().down = down;
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    /// Sizes of the successful calls, in order.
    pub fn delivered_batch_sizes(&self) -> Vec<usize> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.succeeded)
            .map(|c| c.session_ids.len())
            .collect()
    }

    /// Every snapshot confirmed so far, in delivery order.
    pub fn delivered(&self) -> Vec<MetricSnapshot> {
        self.state.lock().delivered.clone()
    }

    fn record(&self, kind: CallKind, snapshots: &[MetricSnapshot]) -> Result<(), TransportError> {
        let mut state = self.state.lock();

        let failed = if state.down {
            true
        } else if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            false
        };

        state.calls.push(TransportCall {
            kind,
            session_ids: snapshots.iter().map(|s| s.session_id.clone()).collect(),
            succeeded: !failed,
        });

        if failed {
            return Err(TransportError::Server {
                status: 503,
                message: "sink unavailable".to_string(),
            });
        }

        state.delivered.extend_from_slice(snapshots);
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_one(&self, snapshot: &MetricSnapshot) -> Result<(), TransportError> {
        self.record(CallKind::Single, std::slice::from_ref(snapshot))
    }

    async fn send_batch(&self, snapshots: &[MetricSnapshot]) -> Result<(), TransportError> {
        self.record(CallKind::Batch, snapshots)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send_one(&self, snapshot: &MetricSnapshot) -> Result<(), TransportError> {
        (**self).send_one(snapshot).await
    }

    async fn send_batch(&self, snapshots: &[MetricSnapshot]) -> Result<(), TransportError> {
        (**self).send_batch(snapshots).await
    }
}
