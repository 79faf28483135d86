//! Synheart Session Agent - reliable delivery, reconciliation and risk scoring
//! for behavioral session telemetry.
//!
//! A host hands the agent finished behavioral snapshots (typing, pointer,
//! scroll and focus aggregates). The agent gets them to a collection endpoint
//! despite network flakiness, and later turns the stored rows back into one
//! coherent record per session with an explainable risk score.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Synheart Session Agent                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │  Snapshot   │──▶│  Delivery   │──▶│  Transport  │──▶ sink│
//! │  │   source    │   │   Queue     │   │ (HTTP/mem)  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                                             │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Session   │──▶│ Reconciler  │──▶│    Risk     │──▶ report
//! │  │   Store     │   │ (dedup+fold)│   │ Classifier  │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use synheart_session_agent::queue::{DeliveryConfig, DeliveryQueue, MemoryTransport};
//! use synheart_session_agent::snapshot::MetricSnapshot;
//!
//! # async fn demo() {
//! let queue = DeliveryQueue::new(MemoryTransport::new(), DeliveryConfig::default());
//! queue
//!     .enqueue(MetricSnapshot::page_load("sess-1", "https://shop.test/", "demo"))
//!     .expect("queue is unbounded by default");
//! queue.wait_until_empty(std::time::Duration::from_millis(50)).await;
//! # }
//! ```

pub mod config;
pub mod queue;
pub mod reconcile;
pub mod report;
pub mod risk;
pub mod snapshot;
pub mod stats;
pub mod store;

#[cfg(feature = "gateway")]
pub mod gateway;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use queue::{DeliveryChannel, DeliveryConfig, DeliveryQueue, QueueError, Transport, TransportError};
pub use reconcile::{ReconciledRecord, Reconciler, Reconciliation};
pub use report::{RiskReport, RiskSummary, SessionRisk};
pub use risk::{RiskAssessment, RiskClassifier, RiskRule, RiskThresholds, RiskTier};
pub use snapshot::{MetricSnapshot, RecordSource, SessionRecord};
pub use stats::{DeliveryStats, SharedDeliveryStats};
pub use store::{JsonFileStore, MemoryStore, SessionStore, StoreError};

// Gateway re-exports (when enabled)
#[cfg(feature = "gateway")]
pub use gateway::{GatewayConfig, HttpTransport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name reported to collection endpoints.
pub const PRODUCER_NAME: &str = "synheart-session-agent";
