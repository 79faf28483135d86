//! Session reconciliation.
//!
//! Raw rows arrive from several sources (behavior snapshots, activity logs,
//! gate attempts) and may include redundant re-sends. A pass first drops
//! re-sends that land in the same session and time bucket, then folds the
//! survivors into one [`ReconciledRecord`] per session.

mod bucket;
mod reconciler;
mod record;

pub use bucket::{BucketKey, Clock, FixedBucket, FixedClock, SystemClock};
pub use reconciler::{ReconcileConfig, Reconciler, Reconciliation};
pub use record::ReconciledRecord;
