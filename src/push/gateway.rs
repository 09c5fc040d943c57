//! Pushgateway client.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use url::Url;

use crate::config::Settings;
use crate::scrape::PushBatch;

use super::retry::RetryPolicy;
use super::traits::{Push, PushError, PushReport};

/// Content type of the text exposition format.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Longest rejection body kept in errors and logs.
const MAX_ERROR_BODY: usize = 256;

/// HTTP method used for pushes.
///
/// POST replaces only the metric families present in the body; PUT replaces
/// the whole grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PushMethod {
    #[default]
    Post,
    Put,
}

impl std::str::FromStr for PushMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            _ => Err(()),
        }
    }
}

impl PushMethod {
    /// Get the method name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

enum AttemptError {
    Transient(String),
    Rejected { status: u16, body: String },
}

/// Pushes batches to a Prometheus Pushgateway.
#[derive(Debug, Clone)]
pub struct GatewayPusher {
    base: Url,
    method: PushMethod,
    timeout: Duration,
    retry: RetryPolicy,
    client: Client,
}

impl GatewayPusher {
    /// Create a pusher from resolved settings.
    ///
    /// # Errors
    /// Returns `PushError::Client` if the HTTP client cannot be built.
    pub fn new(settings: &Settings) -> Result<Self, PushError> {
        Self::with_parts(
            settings.gateway_url.clone(),
            settings.push_method,
            settings.push_timeout,
            settings.retry.clone(),
        )
    }

    /// Create a pusher from individual parts.
    pub fn with_parts(
        base: Url,
        method: PushMethod,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, PushError> {
        if base.cannot_be_a_base() {
            return Err(PushError::InvalidUrl(base.to_string()));
        }
        let client = Client::builder()
            .build()
            .map_err(|e| PushError::Client(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base,
            method,
            timeout,
            retry,
            client,
        })
    }

    /// Build `{base}/metrics/job/{job}/instance/{instance}`.
    ///
    /// Values containing `/` use the `name@base64/<value>` form; empty values
    /// are sent as `name@base64/=`.
    pub fn push_url(&self, job: &str, instance: &str) -> Result<Url, PushError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PushError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty().push("metrics");
            for (name, value) in [("job", job), ("instance", instance)] {
                if value.is_empty() {
                    segments.push(&format!("{}@base64", name)).push("=");
                } else if value.contains('/') {
                    segments
                        .push(&format!("{}@base64", name))
                        .push(&URL_SAFE_NO_PAD.encode(value));
                } else {
                    segments.push(name).push(value);
                }
            }
        }
        Ok(url)
    }

    async fn attempt(&self, url: &Url, body: &str) -> Result<(), AttemptError> {
        let request = match self.method {
            PushMethod::Post => self.client.post(url.clone()),
            PushMethod::Put => self.client.put(url.clone()),
        }
        .header(reqwest::header::CONTENT_TYPE, TEXT_CONTENT_TYPE)
        .body(body.to_owned());

        let deadline = Instant::now() + self.timeout;
        let response = match timeout_at(deadline, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(AttemptError::Transient(e.to_string())),
            Err(_) => {
                return Err(AttemptError::Transient(format!(
                    "timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status.is_server_error() {
            return Err(AttemptError::Transient(format!("gateway returned status {}", status)));
        }

        let body = read_error_body(response, deadline).await;
        Err(AttemptError::Rejected {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

/// First `MAX_ERROR_BODY` bytes of a rejection, whatever arrived by `deadline`.
async fn read_error_body(mut response: reqwest::Response, deadline: Instant) -> String {
    let mut buf = Vec::with_capacity(MAX_ERROR_BODY);
    while buf.len() < MAX_ERROR_BODY {
        match timeout_at(deadline, response.chunk()).await {
            Ok(Ok(Some(chunk))) => buf.extend_from_slice(&chunk),
            _ => break,
        }
    }
    buf.truncate(MAX_ERROR_BODY);
    String::from_utf8_lossy(&buf).into_owned()
}

#[async_trait::async_trait]
impl Push for GatewayPusher {
    async fn push(
        &self,
        job: &str,
        instance: &str,
        batch: &PushBatch,
    ) -> Result<PushReport, PushError> {
        let url = self.push_url(job, instance)?;
        let body = batch.encode();
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.attempt(&url, &body).await {
                Ok(()) => return Ok(PushReport { attempts }),
                Err(AttemptError::Rejected { status, body }) => {
                    return Err(PushError::Rejected {
                        status,
                        body,
                        attempts,
                    });
                }
                Err(AttemptError::Transient(reason)) => {
                    if attempts >= max_attempts {
                        return Err(PushError::Exhausted {
                            attempts,
                            last_error: reason,
                        });
                    }
                    let delay = self.retry.backoff(attempts);
                    tracing::debug!(job = %job, instance = %instance, attempts,
                        error = %reason, delay_ms = delay.as_millis() as u64,
                        "Push attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::exposition;
    use axum::Router;
    use axum::http::{HeaderMap, Method, StatusCode};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorded {
        requests: parking_lot::Mutex<Vec<(Method, String, String, String)>>,
        calls: AtomicUsize,
    }

    /// Fake gateway answering with `statuses` in order, then 200.
    async fn fake_gateway(statuses: Vec<u16>) -> (Url, Arc<Recorded>) {
        let recorded = Arc::new(Recorded::default());
        let state = Arc::clone(&recorded);
        let app = Router::new().fallback(
            move |method: Method, uri: axum::http::Uri, headers: HeaderMap, body: String| {
                let state = Arc::clone(&state);
                let statuses = statuses.clone();
                async move {
                    let n = state.calls.fetch_add(1, Ordering::SeqCst);
                    let content_type = headers
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    state
                        .requests
                        .lock()
                        .push((method, uri.path().to_string(), content_type, body));
                    let status = statuses.get(n).copied().unwrap_or(200);
                    (StatusCode::from_u16(status).unwrap(), "bad payload")
                }
            },
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (Url::parse(&format!("http://{}", addr)).unwrap(), recorded)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default().with_backoff(Duration::from_millis(10), Duration::from_millis(20))
    }

    fn batch() -> PushBatch {
        let exposition = exposition::parse("# TYPE up gauge\nup 1 1700000000000\n").unwrap();
        PushBatch::labeled(
            exposition,
            &crate::labels::LabelSet::from([("env".to_string(), "prod".to_string())]),
        )
    }

    fn pusher(base: &str) -> GatewayPusher {
        GatewayPusher::with_parts(
            Url::parse(base).unwrap(),
            PushMethod::Post,
            Duration::from_secs(2),
            fast_retry(),
        )
        .unwrap()
    }

    #[test]
    fn test_push_method_parse() {
        assert_eq!("put".parse::<PushMethod>(), Ok(PushMethod::Put));
        assert_eq!("POST".parse::<PushMethod>(), Ok(PushMethod::Post));
        assert!("GET".parse::<PushMethod>().is_err());
        assert_eq!(PushMethod::default().as_str(), "POST");
    }

    #[test]
    fn test_push_url_plain() {
        let url = pusher("http://localhost:9091").push_url("node", "localhost:9100").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:9091/metrics/job/node/instance/localhost:9100"
        );
    }

    #[test]
    fn test_push_url_keeps_prefix() {
        let url = pusher("https://pgw.example.com/prefix/").push_url("a", "b:1").unwrap();
        assert_eq!(url.path(), "/prefix/metrics/job/a/instance/b:1");
    }

    #[test]
    fn test_push_url_base64_values() {
        let p = pusher("http://pgw:9091");
        let url = p.push_url("node", "host:80/sub").unwrap();
        assert_eq!(
            url.path(),
            format!("/metrics/job/node/instance@base64/{}", URL_SAFE_NO_PAD.encode("host:80/sub"))
        );

        let url = p.push_url("node", "").unwrap();
        assert_eq!(url.path(), "/metrics/job/node/instance@base64/=");
    }

    #[tokio::test]
    async fn test_push_sends_text_body() {
        let (base, recorded) = fake_gateway(vec![]).await;
        let p = pusher(base.as_str());

        let report = p.push("node", "localhost:9100", &batch()).await.unwrap();
        assert_eq!(report.attempts, 1);

        let requests = recorded.requests.lock();
        let (method, path, content_type, body) = &requests[0];
        assert_eq!(*method, Method::POST);
        assert_eq!(path, "/metrics/job/node/instance/localhost:9100");
        assert!(content_type.starts_with("text/plain; version=0.0.4"));
        assert!(body.contains(r#"up{env="prod"} 1"#));
        assert!(!body.contains("1700000000000"));
    }

    #[tokio::test]
    async fn test_push_put_method() {
        let (base, recorded) = fake_gateway(vec![]).await;
        let p = GatewayPusher::with_parts(base, PushMethod::Put, Duration::from_secs(2), fast_retry())
            .unwrap();
        p.push("node", "a:1", &batch()).await.unwrap();
        assert_eq!(recorded.requests.lock()[0].0, Method::PUT);
    }

    #[tokio::test]
    async fn test_push_retries_server_errors() {
        let (base, recorded) = fake_gateway(vec![503, 500]).await;
        let report = pusher(base.as_str()).push("node", "a:1", &batch()).await.unwrap();
        assert_eq!(report.attempts, 3);
        assert_eq!(recorded.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_push_rejection_is_not_retried() {
        let (base, recorded) = fake_gateway(vec![400]).await;
        let err = pusher(base.as_str()).push("node", "a:1", &batch()).await.unwrap_err();
        assert!(matches!(err, PushError::Rejected { status: 400, attempts: 1, .. }));
        assert!(err.to_string().contains("bad payload"));
        assert_eq!(recorded.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejection_body_is_bounded_by_timeout() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Answers 400 with a body that never completes.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request).await;
            let head = "HTTP/1.1 400 Bad Request\r\ncontent-length: 100000\r\n\r\nbad payload";
            stream.write_all(head.as_bytes()).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let p = GatewayPusher::with_parts(
            Url::parse(&format!("http://{}", addr)).unwrap(),
            PushMethod::Post,
            Duration::from_millis(300),
            fast_retry(),
        )
        .unwrap();

        let err = tokio::time::timeout(Duration::from_secs(2), p.push("node", "a:1", &batch()))
            .await
            .expect("push blocked on the rejection body")
            .unwrap_err();
        assert!(matches!(err, PushError::Rejected { status: 400, attempts: 1, .. }));
        assert!(err.to_string().contains("bad payload"));
    }

    #[tokio::test]
    async fn test_rejection_body_is_truncated() {
        let app = Router::new().fallback(|| async { (StatusCode::BAD_REQUEST, "x".repeat(10_000)) });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let err = pusher(&format!("http://{}", addr))
            .push("node", "a:1", &batch())
            .await
            .unwrap_err();
        match err {
            PushError::Rejected { body, .. } => assert_eq!(body.len(), MAX_ERROR_BODY),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_push_exhausts_attempts() {
        let (base, _) = fake_gateway(vec![502, 502, 502, 502]).await;
        let err = pusher(base.as_str()).push("node", "a:1", &batch()).await.unwrap_err();
        assert!(matches!(err, PushError::Exhausted { attempts: 3, .. }));
        assert_eq!(err.attempts(), 3);
    }
}
