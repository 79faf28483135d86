//! Delivery through a flaky transport, persistence, then the risk read surface.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use synheart_session_agent::queue::{DeliveryConfig, DeliveryQueue, MemoryTransport};
use synheart_session_agent::{
    JsonFileStore, MetricSnapshot, Reconciler, RiskClassifier, RiskReport, RiskTier,
    SessionRecord, SessionStore,
};

fn ticks() -> Vec<MetricSnapshot> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 22, 10, 0, 0).unwrap();
    (0..12)
        .map(|i| {
            let mut s = MetricSnapshot::new(format!("sess-{}", i % 4))
                .at(t0 + ChronoDuration::seconds(i as i64 * 5));
            s.typing.words_per_minute = if i % 4 == 0 { 180.0 } else { 50.0 };
            s.typing.keystroke_count = 40;
            s.focus.total_focus_time_ms = 20_000;
            s
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_flaky_delivery_then_report() {
    let transport = Arc::new(MemoryTransport::new());
    transport.fail_next(4);

    let queue = DeliveryQueue::new(
        Arc::clone(&transport),
        DeliveryConfig {
            batch_size: 5,
            ..DeliveryConfig::default()
        },
    );
    for snapshot in ticks() {
        queue.enqueue(snapshot).unwrap();
    }
    queue.wait_until_empty(Duration::from_millis(50)).await;

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 12);
    assert_eq!(transport.delivered_batch_sizes(), vec![5, 5, 2]);
    assert_eq!(queue.stats().snapshot().batches_requeued, 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    {
        let store = JsonFileStore::open(&path).unwrap();
        for snapshot in &delivered {
            store.upsert(SessionRecord::from(snapshot)).unwrap();
        }
        // Activity re-sent twice within one minute
        for _ in 0..2 {
            let mut row = SessionRecord::new("sess-1", Utc.with_ymd_and_hms(2024, 1, 22, 10, 7, 0).unwrap());
            row.cart_actions = 1;
            store.append_activity(row).unwrap();
        }
    }

    let store = JsonFileStore::open(&path).unwrap();
    let report = RiskReport::build(
        &store.records().unwrap(),
        &Reconciler::new(),
        &RiskClassifier::default(),
    );

    assert_eq!(report.summary.total_sessions, 4);
    assert_eq!(report.summary.deduplicated_records, 1);

    let fast = report.session("sess-0").unwrap();
    assert_eq!(fast.assessment.factors, vec!["Unusual typing speed".to_string()]);
    assert_eq!(fast.assessment.tier, RiskTier::Low);

    let shopper = report.session("sess-1").unwrap();
    assert_eq!(shopper.record.cart_actions, 1);
    assert_eq!(shopper.record.source_records, 2);
}
