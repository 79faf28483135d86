//! Deduplication bucket keys and the clock used for missing timestamps.

use chrono::{DateTime, Utc};

/// Maps a record timestamp to a dedup bucket.
///
/// Two records of the same session with equal keys are treated as redundant
/// re-sends of one emission.
pub trait BucketKey: Send + Sync {
    fn key(&self, at: DateTime<Utc>) -> i64;
}

/// Truncates timestamps to fixed windows aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBucket {
    width_secs: i64,
}

impl FixedBucket {
    pub fn new(width_secs: u64) -> Self {
        Self {
            width_secs: (width_secs as i64).max(1),
        }
    }

    /// One-minute resolution.
    pub fn minute() -> Self {
        Self::new(60)
    }

    pub fn width_secs(&self) -> i64 {
        self.width_secs
    }
}

impl Default for FixedBucket {
    fn default() -> Self {
        Self::minute()
    }
}

impl BucketKey for FixedBucket {
    fn key(&self, at: DateTime<Utc>) -> i64 {
        at.timestamp().div_euclid(self.width_secs)
    }
}

impl<F> BucketKey for F
where
    F: Fn(DateTime<Utc>) -> i64 + Send + Sync,
{
    fn key(&self, at: DateTime<Utc>) -> i64 {
        self(at)
    }
}

/// Source of "now" for records without a usable timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Always returns the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
