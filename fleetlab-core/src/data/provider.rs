//! Upstream source traits and structured provider errors.
//!
//! The source traits abstract over the external services (NHTSA vPIC,
//! FuelEconomy.gov) so implementations can be swapped and mocked in tests.
//! Sources do not know about the cache or retries; the caching clients in
//! `vin_client` and `fuel_client` sit above them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::{EnrichmentStatus, FieldMap, Vin};

/// Coarse classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderErrorKind {
    NotFound,
    RateLimited,
    Network,
    InvalidInput,
    Ambiguous,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Network => "NETWORK",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Ambiguous => "AMBIGUOUS",
        };
        f.write_str(s)
    }
}

/// Structured error from a provider call.
///
/// Designed to be displayable as-is in exported records and CLI output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by provider{}", retry_after(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// The provider's circuit breaker is open. Reported as `RATE_LIMITED`
    /// but never retried: every attempt before the cooldown ends is refused.
    #[error("provider unavailable: circuit breaker open{}", closes_in(.retry_after_secs))]
    CircuitOpen { retry_after_secs: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("ambiguous match: {0}")]
    Ambiguous(String),
}

fn retry_after(secs: &Option<u64>) -> String {
    secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default()
}

fn closes_in(secs: &Option<u64>) -> String {
    secs.map(|s| format!(" (closes in {s}s)")).unwrap_or_default()
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::NotFound(_) => ProviderErrorKind::NotFound,
            Self::RateLimited { .. } | Self::CircuitOpen { .. } => ProviderErrorKind::RateLimited,
            Self::Network(_) => ProviderErrorKind::Network,
            Self::InvalidInput(_) => ProviderErrorKind::InvalidInput,
            Self::Ambiguous(_) => ProviderErrorKind::Ambiguous,
        }
    }

    /// Transient failures worth retrying. The rest are deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }

    /// Server-requested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }
}

/// One entry of a FuelEconomy.gov menu (`value` is the id, `text` the label).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub value: String,
    pub text: String,
}

impl MenuItem {
    pub fn new(value: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            text: text.into(),
        }
    }
}

/// VIN-decode upstream.
pub trait VinDecodeSource: Send + Sync {
    /// Short name used in cache keys and error attribution.
    fn name(&self) -> &str;

    /// Decode one VIN into every attribute the service returns.
    fn decode(&self, vin: &Vin) -> Result<FieldMap, ProviderError>;
}

/// Fuel-economy upstream, shaped after the FuelEconomy.gov menu API.
pub trait FuelEconomySource: Send + Sync {
    fn name(&self) -> &str;

    /// Makes listed for a model year.
    fn makes(&self, year: u16) -> Result<Vec<MenuItem>, ProviderError>;

    /// Model names listed for a year and make.
    fn models(&self, year: u16, make: &str) -> Result<Vec<MenuItem>, ProviderError>;

    /// Vehicle options (id + description) for a year, make and model.
    fn options(&self, year: u16, make: &str, model: &str) -> Result<Vec<MenuItem>, ProviderError>;

    /// Every attribute of one fuel-economy vehicle record.
    fn vehicle(&self, id: &str) -> Result<FieldMap, ProviderError>;
}

/// Progress callback for batch enrichment.
pub trait EnrichProgress: Send + Sync {
    /// Called when a row's task starts.
    fn on_start(&self, vin: &str, index: usize, total: usize);

    /// Called when a row reaches a final status.
    fn on_complete(&self, vin: &str, index: usize, total: usize, status: EnrichmentStatus);

    /// Called once the whole batch is settled.
    fn on_batch_complete(&self, enriched: usize, partial: usize, failed: usize, total: usize);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl EnrichProgress for StdoutProgress {
    fn on_start(&self, _vin: &str, _index: usize, _total: usize) {}

    fn on_complete(&self, vin: &str, index: usize, total: usize, status: EnrichmentStatus) {
        println!("[{}/{}] {vin}: {status}", index + 1, total);
    }

    fn on_batch_complete(&self, enriched: usize, partial: usize, failed: usize, total: usize) {
        println!(
            "\nEnrichment complete: {enriched}/{total} enriched, {partial} partial, {failed} failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(!ProviderError::NotFound("x".into()).is_retryable());
        assert!(!ProviderError::InvalidInput("x".into()).is_retryable());
        assert!(!ProviderError::Ambiguous("x".into()).is_retryable());
    }

    #[test]
    fn open_breaker_is_rate_limited_but_final() {
        let e = ProviderError::CircuitOpen {
            retry_after_secs: Some(120),
        };
        assert_eq!(e.kind(), ProviderErrorKind::RateLimited);
        assert!(!e.is_retryable());
        assert_eq!(
            e.to_string(),
            "provider unavailable: circuit breaker open (closes in 120s)"
        );
    }

    #[test]
    fn rate_limit_message_includes_retry_after() {
        let e = ProviderError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(e.to_string(), "rate limited by provider (retry after 30s)");
        assert_eq!(e.retry_after(), Some(Duration::from_secs(30)));

        let e = ProviderError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(e.to_string(), "rate limited by provider");
    }
}
