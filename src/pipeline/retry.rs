//! Resilient HTTP execution with bounded retries
//!
//! Every outbound call (aggregate query, metric ingest) goes through the
//! `RetryClient`, which wraps a `Transport` capability with a bounded
//! exponential-backoff retry loop. Transports perform exactly one wire
//! attempt; retry policy lives in one place.
//!
//! Classification:
//! - 2xx → success, body returned
//! - 4xx → `TransportError::Client`, surfaced immediately (a malformed
//!   request cannot succeed on retry and wastes quota)
//! - 5xx and network-level failures → retried until the attempt budget is
//!   spent, then `TransportError::Exhausted`

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[derive(Debug)]
pub enum TransportError {
    /// 4xx: the request itself is wrong
    Client(u16, String),
    /// Connection, TLS, or timeout failure before a status was received
    Network(String),
    /// Retry budget spent without a success
    Exhausted { attempts: u32, last: String },
    /// Client could not be constructed
    Build(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Client(status, body) => {
                write!(f, "Client error HTTP {}: {}", status, body)
            }
            TransportError::Network(msg) => write!(f, "Network error: {}", msg),
            TransportError::Exhausted { attempts, last } => {
                write!(f, "Retries exhausted after {} attempts, last failure: {}", attempts, last)
            }
            TransportError::Build(msg) => write!(f, "HTTP client build error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// One wire attempt. No retry logic here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport: POST over reqwest with a per-request timeout.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Retrying executor over a `Transport`.
pub struct RetryClient {
    transport: Box<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryClient {
    pub fn new(transport: Box<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Execute the request, retrying transient failures. Returns the
    /// response body on the first 2xx.
    pub async fn execute(&self, request: &HttpRequest) -> Result<String, TransportError> {
        let mut last_failure = String::from("no attempt made");

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.backoff_delay(attempt);
                log::warn!(
                    "⚠️  Retrying {} in {:?} (attempt {}/{}): {}",
                    request.url,
                    delay,
                    attempt,
                    self.policy.max_attempts,
                    last_failure
                );
                tokio::time::sleep(delay).await;
            }

            match self.transport.send(request).await {
                Ok(response) if (200..300).contains(&response.status) => {
                    return Ok(response.body);
                }
                Ok(response) if (400..500).contains(&response.status) => {
                    return Err(TransportError::Client(response.status, response.body));
                }
                Ok(response) => {
                    last_failure = format!("HTTP {}", response.status);
                }
                Err(TransportError::Network(msg)) => {
                    last_failure = msg;
                }
                Err(fatal) => return Err(fatal),
            }
        }

        Err(TransportError::Exhausted {
            attempts: self.policy.max_attempts,
            last: last_failure,
        })
    }

    /// `base × 2^(n-2)` before attempt n, capped, plus uniform jitter in
    /// `[0, base)` to spread synchronized pollers apart.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(2).min(16);
        let backoff = self
            .policy
            .base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.policy.max_backoff);
        let base_ms = self.policy.base_backoff.as_millis() as u64;
        let jitter = if base_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
        } else {
            Duration::ZERO
        };
        backoff + jitter
    }
}
