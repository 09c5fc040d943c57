//! Pipeline Integration Tests for prompush
//!
//! Runs the real pipeline against a fake exporter and a fake Pushgateway,
//! both served on random local ports.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use prompush::config::GatewayConfig;
use prompush::{AppConfig, JobConfig, LabelOverlay, Pipeline, RetryPolicy, Settings, TargetKey};
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

const EXPOSITION: &str = "\
# HELP node_load1 1m load average.
# TYPE node_load1 gauge
node_load1{cpu=\"all\"} 0.5
";

/// A fake exporter whose response status can be changed at runtime.
struct Exporter {
    addr: SocketAddr,
    status: Arc<AtomicU16>,
}

async fn start_exporter() -> Exporter {
    let status = Arc::new(AtomicU16::new(200));
    let app = Router::new()
        .route(
            "/metrics",
            get(|State(status): State<Arc<AtomicU16>>| async move {
                match status.load(Ordering::SeqCst) {
                    200 => EXPOSITION.into_response(),
                    code => StatusCode::from_u16(code)
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                        .into_response(),
                }
            }),
        )
        .with_state(Arc::clone(&status));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Exporter { addr, status }
}

/// One request received by the fake gateway.
#[derive(Debug, Clone)]
struct Pushed {
    method: Method,
    path: String,
    body: String,
}

#[derive(Default)]
struct GatewayState {
    received: Mutex<Vec<Pushed>>,
    delays: Mutex<VecDeque<Duration>>,
}

/// A fake Pushgateway recording every request. Queued delays are applied to
/// the first requests, one each.
async fn start_gateway(delays: Vec<Duration>) -> (String, Arc<GatewayState>) {
    let state = Arc::new(GatewayState {
        received: Mutex::new(Vec::new()),
        delays: Mutex::new(delays.into()),
    });

    let app = Router::new()
        .fallback(
            |State(state): State<Arc<GatewayState>>, method: Method, uri: Uri, body: Bytes| async move {
                state.received.lock().push(Pushed {
                    method,
                    path: uri.path().to_string(),
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
                let delay = state.delays.lock().pop_front();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Response::new(axum::body::Body::empty())
            },
        )
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

fn job(name: &str, exporters: &[&Exporter]) -> JobConfig {
    JobConfig::new(name)
        .with_interval(Duration::from_secs(1))
        .with_static_targets(exporters.iter().map(|e| e.addr.to_string()))
}

fn app_config(gateway_url: &str, jobs: Vec<JobConfig>) -> AppConfig {
    AppConfig {
        gateway: GatewayConfig {
            url: gateway_url.to_string(),
            timeout: Duration::from_millis(300),
            retry: RetryPolicy::default()
                .with_backoff(Duration::from_millis(10), Duration::from_millis(50)),
            ..Default::default()
        },
        shutdown_timeout: Duration::from_secs(2),
        scrape_configs: jobs,
        ..Default::default()
    }
}

async fn start_pipeline(config: &AppConfig, overlay: LabelOverlay) -> Pipeline {
    let settings = Settings::from_config(config, overlay).unwrap();
    Pipeline::start(settings, config).await.unwrap()
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

// =============================================================================
// Scrape and Push
// =============================================================================

#[tokio::test]
async fn test_scraped_samples_reach_gateway_with_custom_labels() {
    let exporter = start_exporter().await;
    let (gateway_url, gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&exporter])]);
    let overlay = LabelOverlay::parse("env,region", "prod,eu-west-1").unwrap();

    let pipeline = start_pipeline(&config, overlay).await;
    let key = TargetKey::new("node", exporter.addr.to_string());
    eventually("first push", || {
        pipeline
            .scheduler()
            .health()
            .get(&key)
            .is_some_and(|h| h.pushes_ok >= 1)
    })
    .await;
    pipeline.shutdown().await;

    let pushed = gateway.received.lock()[0].clone();
    assert_eq!(pushed.method, Method::POST);
    assert_eq!(
        pushed.path,
        format!("/metrics/job/node/instance/{}", exporter.addr)
    );
    assert!(pushed.body.contains("# TYPE node_load1"));
    assert!(pushed.body.contains(&format!(
        "node_load1{{cpu=\"all\",env=\"prod\",instance=\"{}\",job=\"node\",region=\"eu-west-1\"}} 0.5\n",
        exporter.addr
    )));

    let rendered = pipeline.telemetry().render();
    assert!(rendered.contains(r#"prompush_pushes_total{job="node",outcome="success"}"#));
}

#[tokio::test]
async fn test_failed_scrape_is_not_pushed() {
    let exporter = start_exporter().await;
    exporter.status.store(500, Ordering::SeqCst);
    let (gateway_url, gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&exporter])]);

    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;
    let key = TargetKey::new("node", exporter.addr.to_string());
    eventually("failed scrape", || {
        pipeline
            .scheduler()
            .health()
            .get(&key)
            .is_some_and(|h| h.scrapes_failed >= 1)
    })
    .await;
    pipeline.shutdown().await;

    assert!(gateway.received.lock().is_empty());
    let health = pipeline.status().report().jobs["node"][0].health.clone().unwrap();
    assert!(health.last_error.unwrap().contains("500"));
    assert_eq!(health.pushes_ok, 0);
}

#[tokio::test]
async fn test_failing_target_does_not_block_healthy_one() {
    let broken = start_exporter().await;
    broken.status.store(500, Ordering::SeqCst);
    let healthy = start_exporter().await;
    let (gateway_url, gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&broken, &healthy])]);

    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;
    let broken_key = TargetKey::new("node", broken.addr.to_string());
    let healthy_key = TargetKey::new("node", healthy.addr.to_string());
    eventually("healthy target pushed twice", || {
        let health = pipeline.scheduler().health();
        health.get(&healthy_key).is_some_and(|h| h.pushes_ok >= 2)
            && health.get(&broken_key).is_some_and(|h| h.scrapes_failed >= 1)
    })
    .await;
    pipeline.shutdown().await;

    let received = gateway.received.lock();
    assert!(received
        .iter()
        .all(|p| p.path == format!("/metrics/job/node/instance/{}", healthy.addr)));
    assert!(received.len() >= 2);
}

#[tokio::test]
async fn test_push_timeouts_are_retried() {
    let exporter = start_exporter().await;
    let slow = Duration::from_secs(2);
    let (gateway_url, gateway) = start_gateway(vec![slow, slow]).await;
    let config = app_config(&gateway_url, vec![job("node", &[&exporter])]);

    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;
    let key = TargetKey::new("node", exporter.addr.to_string());
    let mut first_success = None;
    eventually("successful push", || {
        first_success = pipeline
            .scheduler()
            .health()
            .get(&key)
            .filter(|h| h.pushes_ok >= 1)
            .cloned();
        first_success.is_some()
    })
    .await;

    let health = first_success.unwrap();
    assert_eq!(health.pushes_ok, 1);
    assert_eq!(health.last_push_attempts, 3);
    assert_eq!(health.pushes_failed, 0);
    assert!(gateway.received.lock().len() >= 3);
    pipeline.shutdown().await;
}

// =============================================================================
// Reconfiguration
// =============================================================================

#[tokio::test]
async fn test_removed_target_loop_is_stopped() {
    let first = start_exporter().await;
    let second = start_exporter().await;
    let (gateway_url, gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&first, &second])]);

    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;
    eventually("two loops", || pipeline.scheduler().active_loops().len() == 2).await;

    let reduced = app_config(&gateway_url, vec![job("node", &[&first])]);
    let summary = pipeline.reload(&reduced).await;
    assert!(summary.changed);
    assert_eq!(summary.targets, 1);

    eventually("one loop", || pipeline.scheduler().active_loops().len() == 1).await;
    let loops = pipeline.scheduler().active_loops();
    assert_eq!(loops[0].key, TargetKey::new("node", first.addr.to_string()));
    assert!(
        !pipeline
            .scheduler()
            .health()
            .contains_key(&TargetKey::new("node", second.addr.to_string()))
    );

    let pushes_for = |exporter: &Exporter| {
        let path = format!("/metrics/job/node/instance/{}", exporter.addr);
        gateway.received.lock().iter().filter(|p| p.path == path).count()
    };
    // Let a push already in flight for the removed target land.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let (second_before, first_before) = (pushes_for(&second), pushes_for(&first));
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(pushes_for(&second), second_before);
    assert!(pushes_for(&first) > first_before);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_identical_reload_keeps_loops() {
    let exporter = start_exporter().await;
    let (gateway_url, _gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&exporter])]);

    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;
    eventually("loop started", || pipeline.scheduler().active_loops().len() == 1).await;
    let before = pipeline.scheduler().active_loops();
    let generation = pipeline.manager().targets().generation();

    let summary = pipeline.reload(&config).await;
    assert!(!summary.changed);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(pipeline.scheduler().active_loops(), before);
    assert_eq!(pipeline.manager().targets().generation(), generation);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_invalid_reload_keeps_targets() {
    let exporter = start_exporter().await;
    let (gateway_url, _gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&exporter])]);
    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("prometheus_pusher.yml");
    std::fs::write(
        &path,
        "scrape_configs:\n  - job_name: a\n  - job_name: a\n",
    )
    .unwrap();

    assert!(pipeline.reload_from(&path).await.is_err());
    assert!(pipeline.reload_from(dir.path().join("missing.yml")).await.is_err());

    let targets = pipeline.manager().targets();
    assert_eq!(targets.len(), 1);
    assert!(targets.job("node").is_some());
    pipeline.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let exporter = start_exporter().await;
    let (gateway_url, _gateway) = start_gateway(Vec::new()).await;
    let config = app_config(&gateway_url, vec![job("node", &[&exporter])]);
    let pipeline = start_pipeline(&config, LabelOverlay::default()).await;

    pipeline.shutdown().await;
    pipeline.shutdown().await;
    assert!(pipeline.scheduler().active_loops().is_empty());
}
