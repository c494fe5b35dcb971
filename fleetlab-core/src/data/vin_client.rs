//! Caching VIN-decode client.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::cache::{CacheKey, ResponseCache};
use super::provider::{ProviderError, VinDecodeSource};
use super::retry::{with_retry, RetryPolicy};
use crate::domain::{FieldMap, Vin};

/// Default TTL for decoded VINs (a VIN's decode never changes in practice).
pub const DEFAULT_VIN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct VinDecodeClient {
    source: Arc<dyn VinDecodeSource>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    ttl: Duration,
}

impl VinDecodeClient {
    pub fn new(source: Arc<dyn VinDecodeSource>, cache: Arc<ResponseCache>) -> Self {
        Self {
            source,
            cache,
            retry: RetryPolicy::default(),
            ttl: DEFAULT_VIN_TTL,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Decode a VIN, serving from the cache when possible. Concurrent
    /// decodes of one VIN make a single upstream call.
    pub fn decode(&self, vin: &Vin) -> Result<FieldMap, ProviderError> {
        let key = CacheKey::new(self.source.name(), vin.as_str());
        let fetch = || with_retry(&self.retry, "vin_decode", || self.source.decode(vin));

        match self
            .cache
            .get_or_fetch(&key, self.ttl, || fetch().map(Value::Object))?
        {
            Value::Object(fields) => Ok(fields),
            _ => {
                tracing::warn!(vin = %vin, "cached vin decode is not an object; refetching");
                self.cache.invalidate(&key);
                fetch()
            }
        }
    }
}
