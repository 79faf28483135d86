//! Integration tests for the session-agent HTTP server

#[cfg(all(feature = "server", feature = "gateway"))]
mod server_tests {
    use std::time::Duration;
    use synheart_session_agent::gateway::{GatewayConfig, HttpTransport};
    use synheart_session_agent::queue::{DeliveryConfig, DeliveryQueue};
    use synheart_session_agent::server::{run, ServerConfig};
    use synheart_session_agent::snapshot::MetricSnapshot;

    async fn start() -> (std::net::SocketAddr, tokio::sync::oneshot::Sender<()>) {
        let (addr, shutdown_tx) = run(ServerConfig::new(0))
            .await
            .expect("Failed to start server");
        tokio::time::sleep(Duration::from_millis(100)).await;
        (addr, shutdown_tx)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_queue_delivers_into_server_and_report_reads_back() {
        let (addr, shutdown_tx) = start().await;

        let transport = HttpTransport::new(GatewayConfig::new(
            format!("http://{}/analytics", addr),
            None,
        ))
        .expect("Failed to build transport");
        let queue = DeliveryQueue::new(
            transport,
            DeliveryConfig {
                batch_size: 2,
                ..DeliveryConfig::default()
            },
        );

        let mut risky = MetricSnapshot::new("risky");
        risky.typing.words_per_minute = 150.0;
        risky.mouse.average_speed_pixels_per_second = 1200.0;
        risky.focus.total_focus_time_ms = 60_000;
        let mut calm = MetricSnapshot::new("calm");
        calm.typing.words_per_minute = 45.0;
        calm.focus.total_focus_time_ms = 60_000;
        let mut single = MetricSnapshot::new("single");
        single.typing.words_per_minute = 45.0;
        single.focus.total_focus_time_ms = 60_000;

        queue.enqueue(risky).unwrap();
        queue.enqueue(calm).unwrap();
        queue.enqueue(single).unwrap();

        tokio::time::timeout(Duration::from_secs(10), queue.wait_until_empty(Duration::from_millis(20)))
            .await
            .expect("queue did not drain");
        assert_eq!(queue.stats().snapshot().snapshots_delivered, 3);

        let client = reqwest::Client::new();
        let report: serde_json::Value = client
            .get(format!("http://{}/sessions", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["summary"]["total_sessions"], 3);
        assert_eq!(report["summary"]["medium_risk"], 1);

        let risky: serde_json::Value = client
            .get(format!("http://{}/sessions/risky", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(risky["assessment"]["score"], 40);
        assert_eq!(risky["assessment"]["tier"], "MEDIUM");
        assert_eq!(
            risky["assessment"]["factors"],
            serde_json::json!(["Unusual typing speed", "High mouse velocity"])
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_activity_rows_merge_into_session() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        client
            .post(format!("http://{}/analytics", addr))
            .json(&serde_json::json!({
                "sessionId": "shopper",
                "createdAt": "2024-01-22T10:00:00Z",
                "typing": { "wordsPerMinute": 50.0 },
                "focus": { "totalFocusTimeMs": 30000 }
            }))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        for (at, product) in [("2024-01-22T10:00:20Z", 1), ("2024-01-22T10:05:00Z", 2)] {
            client
                .post(format!("http://{}/activity", addr))
                .json(&serde_json::json!({
                    "session_id": "shopper",
                    "created_at": at,
                    "cart_actions": 1,
                    "product_views": [product]
                }))
                .send()
                .await
                .unwrap()
                .error_for_status()
                .unwrap();
        }

        let session: serde_json::Value = client
            .get(format!("http://{}/sessions/shopper", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(session["record"]["cart_actions"], 2);
        assert_eq!(session["record"]["product_views"], serde_json::json!([2, 1]));
        assert_eq!(session["record"]["source_records"], 3);
        assert_eq!(session["record"]["typing_wpm"], 50.0);
        assert_eq!(session["record"]["focus_time"], 30000);
        assert_eq!(session["assessment"]["tier"], "LOW");
        assert_eq!(session["assessment"]["factors"], serde_json::json!([]));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_unknown_session_and_delete() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let missing = client
            .get(format!("http://{}/sessions/nobody", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        client
            .post(format!("http://{}/analytics/batch", addr))
            .json(&serde_json::json!({
                "analytics": [{ "sessionId": "a" }, { "sessionId": "b" }]
            }))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .unwrap();

        let deleted = client
            .delete(format!("http://{}/analytics/a", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);

        let again = client
            .delete(format!("http://{}/analytics/a", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), reqwest::StatusCode::NOT_FOUND);

        let report: serde_json::Value = client
            .get(format!("http://{}/sessions", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["summary"]["total_sessions"], 1);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_snapshot_without_session_id_rejected() {
        let (addr, shutdown_tx) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/analytics", addr))
            .json(&serde_json::json!({ "sessionId": "  " }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_SESSION");

        let _ = shutdown_tx.send(());
    }
}
