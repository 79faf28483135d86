//! Snapshot and persisted-row types.
//!
//! `MetricSnapshot` is what the capture layer hands over on each tick and what
//! the delivery queue ships. `SessionRecord` is the flat row the collection
//! boundary stores and the reconciler reads back.

pub mod record;
pub mod types;

// Re-export commonly used types
pub use record::{RecordSource, SessionRecord};
pub use types::{FocusMetrics, MetricSnapshot, MouseMetrics, ScrollMetrics, TypingMetrics};
