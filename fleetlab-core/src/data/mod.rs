//! Provider access: upstream sources, response cache and caching clients.

pub mod cache;
pub mod circuit_breaker;
pub mod fuel_client;
pub mod fueleconomy;
pub mod http;
pub mod nhtsa;
pub mod provider;
pub mod rate_limit;
pub mod retry;
pub mod vin_client;

pub use cache::{CacheEntry, CacheKey, CacheStats, ResponseCache, DEFAULT_MAX_ENTRIES};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use fuel_client::{FuelEconomyClient, FuelEconomyMatch, DEFAULT_FUEL_TTL};
pub use fueleconomy::FuelEconomyGovSource;
pub use http::{HttpSettings, HttpTransport};
pub use nhtsa::NhtsaSource;
pub use provider::{
    EnrichProgress, FuelEconomySource, MenuItem, ProviderError, ProviderErrorKind,
    StdoutProgress, VinDecodeSource,
};
pub use rate_limit::RateLimiter;
pub use retry::{with_retry, RetryPolicy};
pub use vin_client::{VinDecodeClient, DEFAULT_VIN_TTL};
