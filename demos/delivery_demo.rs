//! Demonstration of the delivery queue and the risk read surface.
//!
//! This example shows how to:
//! 1. Queue snapshots against a transport that drops the first few requests
//! 2. Watch the queue retry, requeue and drain
//! 3. Store what arrived and print the per-session risk report
//!
//! Run with: cargo run --example delivery_demo
//!
//! Set RUST_LOG=debug to see every batch state transition.

use std::sync::Arc;
use std::time::Duration;

use synheart_session_agent::{
    queue::{DeliveryConfig, DeliveryQueue, MemoryTransport},
    MemoryStore, MetricSnapshot, Reconciler, RiskClassifier, RiskReport, SessionRecord,
    SessionStore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Synheart Session Agent - Delivery Demo");
    println!("======================================");
    println!();

    let transport = Arc::new(MemoryTransport::new());
    transport.fail_next(2);

    let config = DeliveryConfig {
        batch_size: 4,
        retry_delay: Duration::from_millis(200),
        requeue_delay: Duration::from_millis(200),
        ..DeliveryConfig::default()
    };
    let queue = DeliveryQueue::new(Arc::clone(&transport), config);

    // Three sessions, three ticks each; the bot types and moves implausibly fast
    for tick in 0..3u64 {
        for (session, wpm, speed) in [("human", 48.0, 320.0), ("bot", 240.0, 2400.0), ("idle", 0.0, 0.0)] {
            let mut snapshot = MetricSnapshot::page_load(session, "https://shop.test/", "demo");
            snapshot.typing.words_per_minute = wpm;
            snapshot.typing.keystroke_count = 30 * (tick + 1);
            snapshot.mouse.average_speed_pixels_per_second = speed;
            snapshot.focus.total_focus_time_ms = if session == "idle" { 1_000 } else { 20_000 };
            snapshot.session_duration_ms = 10_000 * (tick + 1);

            if let Err(e) = queue.enqueue(snapshot) {
                eprintln!("Snapshot not queued: {e}");
            }
        }
    }

    println!("Queued {} snapshots", queue.queue_size());
    queue.wait_until_empty(Duration::from_millis(50)).await;
    println!();
    println!("{}", queue.stats().summary(queue.queue_size()));
    println!();

    let store = MemoryStore::new();
    for snapshot in transport.delivered() {
        if let Err(e) = store.upsert(SessionRecord::from(&snapshot)) {
            eprintln!("Store failed: {e}");
        }
    }

    let records = match store.records() {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Store failed: {e}");
            return;
        }
    };
    let report = RiskReport::build(&records, &Reconciler::new(), &RiskClassifier::default());

    println!("Session risk:");
    for session in &report.sessions {
        println!(
            "  {:<6} {:>3} {:<6} {}",
            session.record.session_id,
            session.assessment.score,
            session.assessment.tier,
            session.assessment.factors.join(", ")
        );
    }
}
