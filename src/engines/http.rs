//! Shared reqwest client for the HTTP search backend.
//!
//! Throttling and server-side errors (408, 429, 5xx) and transport failures
//! are retried with doubling backoff; any other non-success status fails the
//! call at once.

use bytes::Bytes;
use reqwest::{Client, Proxy, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{DownloadError, Result};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Connection and retry settings of one backend's client
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Total tries per request, the first one included
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            attempts: 3,
            initial_backoff: Duration::from_secs(1),
            user_agent: concat!("crawlbox/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug)]
enum Failure {
    Transient(String),
    Permanent(DownloadError),
}

fn check_status(status: StatusCode) -> std::result::Result<(), Failure> {
    if status.is_success() {
        return Ok(());
    }
    let message = format!("HTTP {}", status.as_u16());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(Failure::Transient(message))
    } else {
        Err(Failure::Permanent(DownloadError::RequestFailed(message)))
    }
}

/// Pause before try number `attempt + 1`
fn backoff(initial: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    initial.saturating_mul(factor).min(MAX_BACKOFF)
}

pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig, proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent);

        if let Some(url) = proxy_url {
            let proxy = Proxy::all(url)
                .map_err(|e| DownloadError::InvalidUrl(format!("proxy {url}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::Setup(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// GET `url` with `query`, retrying transient failures
    pub async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<Bytes> {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.fetch(url, query).await {
                Ok(body) => return Ok(body),
                Err(Failure::Permanent(e)) => return Err(e),
                Err(Failure::Transient(reason)) if attempt >= attempts => {
                    return Err(DownloadError::RequestFailed(format!(
                        "{reason} (gave up after {attempt} attempts)"
                    )));
                }
                Err(Failure::Transient(reason)) => {
                    let pause = backoff(self.config.initial_backoff, attempt);
                    warn!(url, attempt, reason = %reason, ?pause, "Request failed, retrying");
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch(&self, url: &str, query: &[(&str, String)]) -> std::result::Result<Bytes, Failure> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    Failure::Permanent(DownloadError::InvalidUrl(e.to_string()))
                } else {
                    Failure::Transient(e.to_string())
                }
            })?;

        check_status(response.status())?;

        let body = response
            .bytes()
            .await
            .map_err(|e| Failure::Transient(format!("reading body: {e}")))?;
        debug!(url, size = body.len(), "Fetched");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(matches!(
            check_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(Failure::Transient(_))
        ));
        assert!(matches!(
            check_status(StatusCode::TOO_MANY_REQUESTS),
            Err(Failure::Transient(_))
        ));
        match check_status(StatusCode::NOT_FOUND) {
            Err(Failure::Permanent(DownloadError::RequestFailed(msg))) => {
                assert_eq!(msg, "HTTP 404")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let initial = Duration::from_millis(500);
        assert_eq!(backoff(initial, 1), Duration::from_millis(500));
        assert_eq!(backoff(initial, 2), Duration::from_secs(1));
        assert_eq!(backoff(initial, 3), Duration::from_secs(2));
        assert_eq!(backoff(initial, 40), MAX_BACKOFF);
    }

    #[test]
    fn test_builds_with_backend_proxy() {
        let config = HttpConfig {
            user_agent: "crawlbox-test".to_string(),
            ..HttpConfig::default()
        };
        assert!(HttpClient::new(config, Some("http://127.0.0.1:3128")).is_ok());
    }
}
