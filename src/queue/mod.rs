//! Telemetry delivery queue.
//!
//! This module contains:
//! - `DeliveryQueue`, the batching and retrying FIFO
//! - `DeliveryChannel`, the host-owned slot holding the current queue
//! - `QueueEntry` and the per-batch `BatchState` machine
//! - The `Transport` seam plus an in-memory implementation

pub mod channel;
pub mod delivery;
pub mod entry;
pub mod transport;

// Re-export commonly used types
pub use channel::DeliveryChannel;
pub use delivery::{CycleReport, DeliveryConfig, DeliveryQueue, OverflowPolicy, QueueError};
pub use entry::{BatchState, QueueEntry};
pub use transport::{CallKind, MemoryTransport, Transport, TransportCall, TransportError};
