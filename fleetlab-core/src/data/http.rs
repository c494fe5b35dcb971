//! Blocking HTTP transport shared by the vehicle-data sources.
//!
//! Wraps a `reqwest` client with the per-provider rate limiter and circuit
//! breaker, and maps HTTP outcomes onto `ProviderError`. One attempt per
//! call; retries live in the caching clients.

use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::provider::ProviderError;
use super::rate_limit::RateLimiter;

/// Transport settings for one provider.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub min_interval: Duration,
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            min_interval: Duration::from_millis(100),
            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(5 * 60),
            user_agent: concat!("fleetlab/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

pub struct HttpTransport {
    client: reqwest::blocking::Client,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(settings.min_interval),
            breaker: CircuitBreaker::new(settings.breaker_cooldown, settings.breaker_threshold),
        })
    }

    pub fn is_available(&self) -> bool {
        self.breaker.is_allowed()
    }

    /// GET `url` and parse the body as JSON.
    pub fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, ProviderError> {
        if !self.is_available() {
            let remaining = self.breaker.remaining_cooldown().as_secs().max(1);
            return Err(ProviderError::CircuitOpen {
                retry_after_secs: Some(remaining),
            });
        }

        self.limiter.wait();
        tracing::debug!(url, "GET");

        let resp = self
            .client
            .get(url)
            .query(query)
            .header(ACCEPT, "application/json")
            .send()
            .map_err(|e| {
                self.breaker.record_failure();
                if e.is_timeout() {
                    ProviderError::Network(format!("request timed out: {url}"))
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == StatusCode::FORBIDDEN {
            self.breaker.trip();
        }

        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(err) = classify_status(status, retry_after, url) {
            if err.is_retryable() {
                self.breaker.record_failure();
            }
            return Err(err);
        }

        let body = resp
            .json::<Value>()
            .map_err(|e| ProviderError::Network(format!("malformed response from {url}: {e}")))?;
        self.breaker.record_success();
        Ok(body)
    }
}

/// Map a non-success HTTP status onto a provider error. `None` for 2xx.
pub fn classify_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    url: &str,
) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    let err = match status {
        StatusCode::NOT_FOUND => ProviderError::NotFound(format!("no record at {url}")),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            ProviderError::RateLimited { retry_after_secs }
        }
        StatusCode::FORBIDDEN => ProviderError::RateLimited {
            retry_after_secs: None,
        },
        StatusCode::BAD_REQUEST => {
            ProviderError::InvalidInput(format!("request rejected by {url}"))
        }
        other => ProviderError::Network(format!("HTTP {other} from {url}")),
    };
    Some(err)
}
