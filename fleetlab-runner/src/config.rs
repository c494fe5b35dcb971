//! Enrichment configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Sections:
//!
//! ```toml
//! [api]
//! vin_base_url = "https://vpic.nhtsa.dot.gov/api/vehicles"
//! fuel_base_url = "https://www.fueleconomy.gov/ws/rest"
//! timeout_secs = 10
//!
//! [cache]
//! enabled = true
//! vin_ttl_secs = 604800
//!
//! [retry]
//! max_attempts = 3
//!
//! [matching]
//! levels = ["exact", "relax_trim", "normalized_model", "partial_model"]
//! tie_break = "first_returned"
//!
//! [pipeline]
//! max_parallelism = 10
//!
//! [analysis]
//! gas_price = 3.5
//! electricity_price = 0.13
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use fleetlab_core::data::{HttpSettings, RetryPolicy, DEFAULT_MAX_ENTRIES};
use fleetlab_core::data::{fueleconomy, nhtsa};
use fleetlab_core::matching::MatchPolicy;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Upstream endpoints and transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub vin_base_url: String,
    pub fuel_base_url: String,
    pub timeout_secs: u64,
    /// Minimum spacing between requests to one provider.
    pub min_interval_ms: u64,
    /// Consecutive transient failures before the circuit breaker opens.
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            vin_base_url: nhtsa::DEFAULT_BASE_URL.to_string(),
            fuel_base_url: fueleconomy::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            min_interval_ms: 100,
            breaker_threshold: 5,
            breaker_cooldown_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub vin_ttl_secs: u64,
    pub fuel_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: DEFAULT_MAX_ENTRIES,
            vin_ttl_secs: 7 * 24 * 60 * 60,
            fuel_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_parallelism: usize,
    /// Whole-batch deadline. Absent means wait for every row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_secs: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 10,
            deadline_secs: None,
        }
    }
}

/// Cost and emissions assumptions for the electrification analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// $/gallon.
    pub gas_price: f64,
    /// $/kWh.
    pub electricity_price: f64,
    /// kWh/mile.
    pub ev_efficiency: f64,
    /// Used when a row has no annual mileage column.
    pub annual_mileage: f64,
    pub analysis_years: u32,
    /// Annual NPV discount rate, percent.
    pub discount_rate: f64,
    /// Annual increase in EV energy use, percent.
    pub battery_degradation: f64,
    /// $/mile.
    pub ice_maintenance: f64,
    /// $/mile.
    pub ev_maintenance: f64,
    /// Grid emissions, kg CO2/kWh.
    pub grid_intensity: f64,
    /// Assumed EV purchase premium per vehicle for the fleet payback.
    pub ev_premium: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            gas_price: 3.50,
            electricity_price: 0.13,
            ev_efficiency: 0.30,
            annual_mileage: 12_000.0,
            analysis_years: 12,
            discount_rate: 5.0,
            battery_degradation: 2.0,
            ice_maintenance: 0.10,
            ev_maintenance: 0.06,
            grid_intensity: 0.4,
            ev_premium: 15_000.0,
        }
    }
}

/// Complete enrichment configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub api: ApiConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub matching: MatchPolicy,
    pub pipeline: PipelineConfig,
    pub analysis: AnalysisConfig,
}

impl EnrichConfig {
    /// Load and validate a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.api.vin_base_url.trim().is_empty() || self.api.fuel_base_url.trim().is_empty() {
            return invalid("api base URLs must not be empty");
        }
        if self.api.timeout_secs == 0 {
            return invalid("api.timeout_secs must be > 0");
        }
        if self.api.breaker_threshold == 0 {
            return invalid("api.breaker_threshold must be > 0");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be > 0 when the cache is enabled");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be >= 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.matching.levels.is_empty() {
            return invalid("matching.levels must list at least one level");
        }
        for (i, level) in self.matching.levels.iter().enumerate() {
            if self.matching.levels[..i].contains(level) {
                return Err(ConfigError::Invalid(format!(
                    "matching.levels lists '{level}' more than once"
                )));
            }
        }
        if self.pipeline.max_parallelism == 0 {
            return invalid("pipeline.max_parallelism must be > 0");
        }
        if self.pipeline.deadline_secs == Some(0) {
            return invalid("pipeline.deadline_secs must be > 0 when set");
        }

        let a = &self.analysis;
        let prices = [
            a.gas_price,
            a.electricity_price,
            a.ice_maintenance,
            a.ev_maintenance,
            a.grid_intensity,
            a.battery_degradation,
        ];
        if prices.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return invalid("analysis prices, rates and intensities must be >= 0");
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(a.ev_efficiency) || !positive(a.annual_mileage) {
            return invalid("analysis.ev_efficiency and analysis.annual_mileage must be > 0");
        }
        if a.analysis_years == 0 {
            return invalid("analysis.analysis_years must be >= 1");
        }
        if !a.discount_rate.is_finite() || a.discount_rate <= -100.0 {
            return invalid("analysis.discount_rate must be > -100");
        }
        Ok(())
    }

    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(self.api.timeout_secs),
            min_interval: Duration::from_millis(self.api.min_interval_ms),
            breaker_threshold: self.api.breaker_threshold,
            breaker_cooldown: Duration::from_secs(self.api.breaker_cooldown_secs),
            ..HttpSettings::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn vin_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.vin_ttl_secs)
    }

    pub fn fuel_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.fuel_ttl_secs)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.pipeline.deadline_secs.map(Duration::from_secs)
    }
}
