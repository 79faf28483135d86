//! Minute-bucket deduplication followed by a session-keyed fold.

use crate::reconcile::bucket::{BucketKey, Clock, FixedBucket, SystemClock};
use crate::reconcile::record::ReconciledRecord;
use crate::snapshot::{RecordSource, SessionRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Width of the dedup bucket in seconds
    pub bucket_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { bucket_secs: 60 }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    records: Vec<ReconciledRecord>,
    index: HashMap<String, usize>,
    /// Records dropped as redundant re-sends
    pub deduplicated: usize,
    /// Records that could not be used at all
    pub skipped: usize,
}

impl Reconciliation {
    pub fn get(&self, session_id: &str) -> Option<&ReconciledRecord> {
        self.index.get(session_id).map(|&i| &self.records[i])
    }

    /// Sessions in order of first sighting.
    pub fn records(&self) -> &[ReconciledRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ReconciledRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Dedup identity of a record. Only re-sends into the same table collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DedupKey {
    Bucket(String, RecordSource, i64),
    /// No usable timestamp; never collides with anything
    Fresh(usize),
}

/// Folds raw session rows into one record per session.
///
/// Stateless per call; one instance can serve concurrent callers.
#[derive(Clone)]
pub struct Reconciler {
    bucket: Arc<dyn BucketKey>,
    clock: Arc<dyn Clock>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    /// One-minute buckets, wall-clock fallback.
    pub fn new() -> Self {
        Self {
            bucket: Arc::new(FixedBucket::minute()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new().with_bucket(FixedBucket::new(config.bucket_secs))
    }

    pub fn with_bucket(mut self, bucket: impl BucketKey + 'static) -> Self {
        self.bucket = Arc::new(bucket);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Reconcile decoded rows.
    ///
    /// Within one session, table and bucket only the record with the latest
    /// timestamp survives; on equal timestamps the one earlier in input order
    /// is kept. Records with a missing or malformed timestamp are stamped with
    /// the clock's "now" and always survive, but never supply the "latest"
    /// fields while a dated record exists. Records without a session id are
    /// skipped.
    pub fn reconcile(&self, records: &[SessionRecord]) -> Reconciliation {
        let now = self.clock.now();
        let mut result = Reconciliation::default();

        let mut survivors: Vec<(&SessionRecord, DateTime<Utc>, bool)> =
            Vec::with_capacity(records.len());
        let mut slots: HashMap<DedupKey, usize> = HashMap::new();

        for (position, record) in records.iter().enumerate() {
            if record.session_id.trim().is_empty() {
                tracing::warn!(position, "Skipping record without session id");
                result.skipped += 1;
                continue;
            }

            let (key, at, dated) = match record.parsed_created_at() {
                Some(at) => (
                    DedupKey::Bucket(
                        record.session_id.clone(),
                        record.source,
                        self.bucket.key(at),
                    ),
                    at,
                    true,
                ),
                None => {
                    tracing::warn!(
                        session_id = %record.session_id,
                        created_at = record.created_at.as_deref().unwrap_or("<missing>"),
                        "Unusable timestamp; treating record as a fresh emission"
                    );
                    (DedupKey::Fresh(position), now, false)
                }
            };

            match slots.get(&key) {
                Some(&slot) => {
                    result.deduplicated += 1;
                    if at > survivors[slot].1 {
                        survivors[slot] = (record, at, dated);
                    }
                }
                None => {
                    slots.insert(key, survivors.len());
                    survivors.push((record, at, dated));
                }
            }
        }

        for (record, at, dated) in survivors {
            match result.index.get(&record.session_id) {
                Some(&i) => result.records[i].fold(record, at, dated),
                None => {
                    result
                        .index
                        .insert(record.session_id.clone(), result.records.len());
                    result.records.push(ReconciledRecord::start(record, at, dated));
                }
            }
        }

        tracing::debug!(
            sessions = result.records.len(),
            deduplicated = result.deduplicated,
            skipped = result.skipped,
            "Reconciliation pass complete"
        );

        result
    }

    /// Reconcile raw JSON rows, skipping any that do not decode.
    pub fn reconcile_values(&self, values: &[serde_json::Value]) -> Reconciliation {
        let mut skipped = 0;
        let records: Vec<SessionRecord> = values
            .iter()
            .enumerate()
            .filter_map(|(position, value)| {
                match serde_json::from_value::<SessionRecord>(value.clone()) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(position, "Skipping unparseable record: {e}");
                        skipped += 1;
                        None
                    }
                }
            })
            .collect();

        let mut result = self.reconcile(&records);
        result.skipped += skipped;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::bucket::FixedClock;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap()
    }

    fn row(session: &str, at: DateTime<Utc>) -> SessionRecord {
        SessionRecord::new(session, at)
    }

    #[test]
    fn test_same_minute_keeps_latest() {
        let mut early = row("s", t0() + Duration::seconds(5));
        early.mouse_clicks = 3;
        let mut late = row("s", t0() + Duration::seconds(15));
        late.mouse_clicks = 7;

        let result = Reconciler::new().reconcile(&[early, late]);

        assert_eq!(result.deduplicated, 1);
        let record = result.get("s").unwrap();
        assert_eq!(record.mouse_clicks, 7);
        assert_eq!(record.source_records, 1);
        assert_eq!(record.last_seen, t0() + Duration::seconds(15));
    }

    #[test]
    fn test_newest_first_input_keeps_first() {
        let mut late = row("s", t0() + Duration::seconds(15));
        late.mouse_clicks = 7;
        let mut early = row("s", t0() + Duration::seconds(5));
        early.mouse_clicks = 3;

        let result = Reconciler::new().reconcile(&[late, early]);

        assert_eq!(result.get("s").unwrap().mouse_clicks, 7);
    }

    #[test]
    fn test_equal_timestamps_keep_earlier_input() {
        let mut first = row("s", t0());
        first.searches = 1;
        let mut second = row("s", t0());
        second.searches = 9;

        let result = Reconciler::new().reconcile(&[first, second]);
        assert_eq!(result.get("s").unwrap().searches, 1);
    }

    #[test]
    fn test_behavior_and_activity_in_same_minute_both_fold() {
        let mut behavior = row("s", t0());
        behavior.typing_wpm = 50.0;
        behavior.typing_keystrokes = 100;
        behavior.mouse_clicks = 12;
        behavior.focus_time = 30_000;
        let mut activity = row("s", t0() + Duration::seconds(20));
        activity.source = RecordSource::Activity;
        activity.cart_actions = 1;

        let result = Reconciler::new().reconcile(&[activity, behavior]);

        assert_eq!(result.deduplicated, 0);
        let record = result.get("s").unwrap();
        assert_eq!(record.cart_actions, 1);
        assert_eq!(record.mouse_clicks, 12);
        assert_eq!(record.typing_keystrokes, 100);
        assert_eq!(record.focus_time, 30_000);
        assert_eq!(record.source_records, 2);
    }

    #[test]
    fn test_activity_resend_in_same_minute_collapses() {
        let mut first = row("s", t0() + Duration::seconds(10));
        first.source = RecordSource::Activity;
        first.cart_actions = 1;
        let second = SessionRecord {
            created_at: row("s", t0() + Duration::seconds(40)).created_at,
            ..first.clone()
        };

        let result = Reconciler::new().reconcile(&[first, second]);

        assert_eq!(result.deduplicated, 1);
        assert_eq!(result.get("s").unwrap().cart_actions, 1);
    }

    #[test]
    fn test_undated_record_does_not_supply_latest_fields() {
        let mut dated = row("s", t0());
        dated.typing_wpm = 50.0;
        dated.scroll_speed = 120.0;
        let mut undated = row("s", t0());
        undated.created_at = None;
        undated.typing_wpm = 250.0;
        undated.scroll_speed = 900.0;

        let result = Reconciler::new()
            .with_clock(FixedClock(t0() + Duration::hours(1)))
            .reconcile(&[undated, dated]);

        let record = result.get("s").unwrap();
        assert_eq!(record.typing_wpm, 50.0);
        assert_eq!(record.scroll_speed, 120.0);
        assert_eq!(record.source_records, 2);
    }

    #[test]
    fn test_crossing_minute_boundary_both_survive() {
        let mut a = row("s", t0() + Duration::seconds(30));
        a.cart_actions = 2;
        let mut b = row("s", t0() + Duration::seconds(120));
        b.cart_actions = 3;

        let result = Reconciler::new().reconcile(&[a, b]);

        assert_eq!(result.deduplicated, 0);
        let record = result.get("s").unwrap();
        assert_eq!(record.cart_actions, 5);
        assert_eq!(record.source_records, 2);
    }

    #[test]
    fn test_different_sessions_never_collide() {
        let result = Reconciler::new().reconcile(&[row("a", t0()), row("b", t0())]);
        assert_eq!(result.len(), 2);
        assert_eq!(result.deduplicated, 0);
    }

    #[test]
    fn test_missing_and_malformed_timestamps_are_kept() {
        let now = t0() + Duration::hours(1);
        let mut missing = row("s", t0());
        missing.created_at = None;
        missing.cart_actions = 1;
        let mut malformed = row("s", t0());
        malformed.created_at = Some("yesterday-ish".to_string());
        malformed.cart_actions = 2;
        let mut good = row("s", t0());
        good.cart_actions = 4;

        let result = Reconciler::new()
            .with_clock(FixedClock(now))
            .reconcile(&[missing, malformed, good]);

        let record = result.get("s").unwrap();
        assert_eq!(record.cart_actions, 7);
        assert_eq!(record.source_records, 3);
        assert_eq!(record.last_seen, now);
        assert_eq!(record.first_seen, t0());
    }

    #[test]
    fn test_product_views_across_sources() {
        let mut behavior = row("s", t0());
        behavior.product_views = vec![1, 2];
        let mut activity = row("s", t0() + Duration::minutes(3));
        activity.product_views = vec![2, 3];

        let result = Reconciler::new().reconcile(&[behavior, activity]);
        assert_eq!(result.get("s").unwrap().product_views, vec![1, 2, 3]);
    }

    #[test]
    fn test_first_sighting_order() {
        let result = Reconciler::new().reconcile(&[
            row("b", t0()),
            row("a", t0() + Duration::minutes(2)),
            row("b", t0() + Duration::minutes(4)),
        ]);
        let ids: Vec<&str> = result
            .records()
            .iter()
            .map(|r| r.session_id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_custom_bucket_key() {
        let hourly = |at: DateTime<Utc>| at.timestamp() / 3600;
        let result = Reconciler::new().with_bucket(hourly).reconcile(&[
            row("s", t0()),
            row("s", t0() + Duration::minutes(30)),
        ]);
        assert_eq!(result.deduplicated, 1);
    }

    #[test]
    fn test_unparseable_values_are_skipped() {
        let values = vec![
            serde_json::json!({ "session_id": "s", "cart_actions": 2, "created_at": "2024-01-22T10:00:00Z" }),
            serde_json::json!({ "session_id": "s", "cart_actions": "lots" }),
            serde_json::json!("not an object"),
            serde_json::json!({ "cart_actions": 1 }),
        ];

        let result = Reconciler::new().reconcile_values(&values);

        assert_eq!(result.skipped, 3);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("s").unwrap().cart_actions, 2);
    }

    #[test]
    fn test_reconcile_is_rebuilt_from_scratch() {
        let reconciler = Reconciler::new();
        let rows = vec![row("s", t0())];
        let first = reconciler.reconcile(&rows);
        let second = reconciler.reconcile(&rows);
        assert_eq!(first.records(), second.records());
    }
}
