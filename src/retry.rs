//! HTTP POST with bounded retries, doubling backoff and jitter.

use anyhow::Result;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

const INITIAL_BACKOFF_MS: u64 = 150;
const MAX_BACKOFF_MS: u64 = 1200;
const JITTER_MS: u64 = 50;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    /// Per-attempt request timeout.
    pub timeout: Duration,
}

/// Posts `payload` as JSON to `url`.
///
/// Transport errors are retried. A response is returned as-is unless
/// `retry_status` asks for another attempt; the last attempt's response is
/// always returned.
pub async fn post_with_retry<T, F>(
    client: &reqwest::Client,
    url: &str,
    payload: &T,
    policy: RetryPolicy,
    retry_status: F,
) -> Result<reqwest::Response>
where
    T: Serialize + ?Sized,
    F: Fn(StatusCode) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut delay_ms = INITIAL_BACKOFF_MS;

    for attempt in 1..=attempts {
        let last = attempt == attempts;
        let response = client
            .post(url)
            .json(payload)
            .timeout(policy.timeout)
            .send()
            .await;

        match response {
            Ok(resp) if last || !retry_status(resp.status()) => return Ok(resp),
            Ok(resp) => {
                tracing::debug!("POST {} answered {} ({}/{})", url, resp.status(), attempt, attempts);
            }
            Err(e) if last => return Err(anyhow::anyhow!("POST {} failed: {}", url, e)),
            Err(e) => {
                tracing::debug!("POST {} failed: {} ({}/{})", url, e, attempt, attempts);
            }
        }

        let jitter = rand::random::<u64>() % JITTER_MS;
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
        delay_ms = (delay_ms * 2).min(MAX_BACKOFF_MS);
    }

    Err(anyhow::anyhow!("Retry attempts exhausted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, extract::Extension, http::StatusCode as AxumStatus, routing::post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves `/flaky`, which answers 503 to the first `failures` calls.
    async fn flaky_server(failures: usize) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/flaky",
                post(move |Extension(calls): Extension<Arc<AtomicUsize>>| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < failures {
                        AxumStatus::SERVICE_UNAVAILABLE
                    } else {
                        AxumStatus::OK
                    }
                }),
            )
            .layer(Extension(calls.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/flaky", addr), calls)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn test_retries_statuses_the_caller_asks_for() {
        let (url, calls) = flaky_server(2).await;

        let resp = post_with_retry(&reqwest::Client::new(), &url, &"x", policy(), |status| {
            status.is_server_error()
        })
        .await
        .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_first_answer_when_status_is_final() {
        let (url, calls) = flaky_server(5).await;

        let resp = post_with_retry(&reqwest::Client::new(), &url, &"x", policy(), |_| false)
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_after_last_attempt() {
        // Bind and drop to get a port nobody listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };

        let result = post_with_retry(
            &reqwest::Client::new(),
            &format!("http://{}/gone", addr),
            &"x",
            policy(),
            |_| true,
        )
        .await;

        assert!(result.unwrap_err().to_string().contains("failed"));
    }
}
