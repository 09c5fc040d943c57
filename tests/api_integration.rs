//! API Integration Tests for prompush
//!
//! Covers the status server routes over a real socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use prompush::scrape::PushBatch;
use prompush::{
    AppConfig, JobConfig, LabelOverlay, Pipeline, PipelineError, Push, PushError, Settings,
};
use prompush::push::PushReport;
use serde_json::Value;
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

/// Push destination that only counts calls.
#[derive(Default)]
struct CountingPusher {
    pushes: AtomicU32,
}

#[async_trait]
impl Push for CountingPusher {
    async fn push(
        &self,
        _job: &str,
        _instance: &str,
        _batch: &PushBatch,
    ) -> Result<PushReport, PushError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(PushReport { attempts: 1 })
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        scrape_configs: vec![
            JobConfig::new("node")
                .with_interval(Duration::from_secs(30))
                .with_label("team", "infra")
                // Nothing listens on port 1; scrapes fail fast.
                .with_static_targets(["127.0.0.1:1"]),
            JobConfig::new("idle"),
        ],
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

/// Start a pipeline serving its status routes and return the base URL.
async fn start_test_server() -> (String, Pipeline) {
    let config = test_config();
    let overlay = LabelOverlay::parse("env", "test").expect("Failed to parse overlay");
    let settings = Settings::from_config(&config, overlay).expect("Failed to build settings");
    let pipeline = Pipeline::start_with_pusher(
        settings,
        &config,
        Arc::new(CountingPusher::default()),
    )
    .await
    .expect("Failed to start pipeline");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = pipeline
        .serve_status_on(listener)
        .expect("Failed to start status server");

    // Give the scheduler time to start its loops
    for _ in 0..100 {
        if !pipeline.scheduler().active_loops().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    (format!("http://{}", addr), pipeline)
}

// =============================================================================
// Health Probe Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoints() {
    let (base_url, pipeline) = start_test_server().await;
    let client = reqwest::Client::new();

    // Test /healthz (liveness)
    let resp = client
        .get(format!("{}/healthz", base_url))
        .send()
        .await
        .expect("Failed to send healthz request");
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_str(&resp.text().await.expect("Failed to read healthz response"))
        .expect("Failed to parse healthz response");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["generation"], 1);

    // Test /ping (legacy liveness)
    let resp = client
        .get(format!("{}/ping", base_url))
        .send()
        .await
        .expect("Failed to send ping request");
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_str(&resp.text().await.expect("Failed to read ping response"))
        .expect("Failed to parse ping response");
    assert_eq!(body["message"], "pong");

    pipeline.shutdown().await;
}

// =============================================================================
// Targets API Tests
// =============================================================================

#[tokio::test]
async fn test_targets_lists_jobs_with_health() {
    let (base_url, pipeline) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/targets", base_url))
        .send()
        .await
        .expect("Failed to send targets request");
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_str(&resp.text().await.expect("Failed to read targets response"))
        .expect("Failed to parse targets response");

    assert_eq!(body["idle"], Value::Array(vec![]));
    let node = &body["node"][0];
    assert_eq!(node["address"], "127.0.0.1:1");
    assert_eq!(node["scrape_url"], "http://127.0.0.1:1/metrics");
    assert_eq!(node["interval"], "30s");
    assert_eq!(node["labels"]["team"], "infra");
    assert_eq!(node["labels"]["job"], "node");
    // Custom labels are applied at push time only
    assert!(node["labels"].get("env").is_none());
    assert!(node["health"].is_object());

    pipeline.shutdown().await;
}

// =============================================================================
// Metrics API Tests
// =============================================================================

#[tokio::test]
async fn test_metrics_exposes_own_telemetry() {
    let (base_url, pipeline) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/metrics", base_url))
        .send()
        .await
        .expect("Failed to send metrics request");
    assert_eq!(resp.status(), 200);
    let content_type = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = resp.text().await.expect("Failed to read metrics body");
    assert!(body.contains(r#"prompush_targets{job="node"} 1"#));
    assert!(body.contains(r#"prompush_targets{job="idle"} 0"#));

    pipeline.shutdown().await;
}

// =============================================================================
// Server Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_status_server_starts_once_and_stops_on_shutdown() {
    let (base_url, pipeline) = start_test_server().await;

    let second = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    assert!(matches!(
        pipeline.serve_status_on(second),
        Err(PipelineError::AlreadyServing(_))
    ));

    pipeline.shutdown().await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .expect("Failed to build client");
    let result = client.get(format!("{}/ping", base_url)).send().await;
    assert!(result.is_err(), "server should be stopped");
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (base_url, pipeline) = start_test_server().await;

    let resp = reqwest::get(format!("{}/api/v1/unknown", base_url))
        .await
        .expect("Failed to send request");
    assert_eq!(resp.status(), 404);

    pipeline.shutdown().await;
}
