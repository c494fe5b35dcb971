//! Caching fuel-economy client.
//!
//! Resolves a `VehicleQuery` to one fuel-economy vehicle record by walking
//! the configured relaxation ladder over the catalogue menus. Menus, vehicle
//! payloads and final matches are all cached, so a repeated query makes no
//! upstream calls.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use super::cache::{CacheKey, ResponseCache};
use super::provider::{FuelEconomySource, MenuItem, ProviderError};
use super::retry::{with_retry, RetryPolicy};
use crate::domain::{FieldMap, MatchConfidence};
use crate::matching::{
    candidate_allowed, model_matches, pick_best, Candidate, MatchLevel, MatchPolicy,
    VehicleQuery,
};

/// Default TTL for fuel-economy lookups.
pub const DEFAULT_FUEL_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A resolved fuel-economy vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuelEconomyMatch {
    pub vehicle_id: String,
    /// "<model> <option text>" of the chosen vehicle.
    pub description: String,
    pub confidence: MatchConfidence,
    pub level: MatchLevel,
    pub fields: FieldMap,
}

pub struct FuelEconomyClient {
    source: Arc<dyn FuelEconomySource>,
    cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    ttl: Duration,
    policy: MatchPolicy,
}

impl FuelEconomyClient {
    pub fn new(source: Arc<dyn FuelEconomySource>, cache: Arc<ResponseCache>) -> Self {
        Self {
            source,
            cache,
            retry: RetryPolicy::default(),
            ttl: DEFAULT_FUEL_TTL,
            policy: MatchPolicy::default(),
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

    pub fn with_policy(mut self, policy: MatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    pub fn policy(&self) -> &MatchPolicy {
        &self.policy
    }

    /// Find the fuel-economy record for a decoded vehicle.
    pub fn lookup(&self, query: &VehicleQuery) -> Result<FuelEconomyMatch, ProviderError> {
        self.cached(format!("match|{}", query.cache_params()), || self.resolve(query))
    }

    /// Serve `params` from the cache, or compute it with `fetch` and store it.
    /// Concurrent misses on one key share a single `fetch`. Errors are never
    /// cached.
    fn cached<T, F>(&self, params: String, fetch: F) -> Result<T, ProviderError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Result<T, ProviderError>,
    {
        let key = CacheKey::new(self.source.name(), params);
        let value = self.cache.get_or_fetch(&key, self.ttl, || {
            let fresh = fetch()?;
            serde_json::to_value(&fresh)
                .map_err(|e| ProviderError::Network(format!("response not cacheable: {e}")))
        })?;

        match serde_json::from_value(value) {
            Ok(hit) => Ok(hit),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "undecodable cache entry; treating as miss");
                self.cache.invalidate(&key);
                fetch()
            }
        }
    }

    fn makes(&self, year: u16) -> Result<Vec<MenuItem>, ProviderError> {
        self.cached(format!("menu/make|{year}"), || {
            with_retry(&self.retry, "fuel_makes", || self.source.makes(year))
        })
    }

    fn models(&self, year: u16, make: &str) -> Result<Vec<MenuItem>, ProviderError> {
        self.cached(format!("menu/model|{year}|{make}"), || {
            with_retry(&self.retry, "fuel_models", || self.source.models(year, make))
        })
    }

    fn options(&self, year: u16, make: &str, model: &str) -> Result<Vec<MenuItem>, ProviderError> {
        self.cached(format!("menu/options|{year}|{make}|{model}"), || {
            with_retry(&self.retry, "fuel_options", || {
                self.source.options(year, make, model)
            })
        })
    }

    fn vehicle(&self, id: &str) -> Result<FieldMap, ProviderError> {
        self.cached(format!("vehicle|{id}"), || {
            with_retry(&self.retry, "fuel_vehicle", || self.source.vehicle(id))
        })
    }

    fn resolve(&self, query: &VehicleQuery) -> Result<FuelEconomyMatch, ProviderError> {
        let wanted_make = query.make.trim().to_lowercase();
        let makes = self.makes(query.year)?;
        let make = makes
            .iter()
            .find(|m| m.text.trim().to_lowercase() == wanted_make)
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "make '{}' not listed for {}",
                    query.make, query.year
                ))
            })?;

        let models = self.models(query.year, &make.value)?;
        let mut options_by_model: HashMap<&str, Vec<MenuItem>> = HashMap::new();

        for &level in &self.policy.levels {
            let matched: Vec<&MenuItem> = models
                .iter()
                .filter(|m| model_matches(level, query, &m.text))
                .collect();
            if matched.is_empty() {
                tracing::debug!(
                    level = %level,
                    model = %query.model,
                    "no catalogue model at level"
                );
                continue;
            }

            let mut candidates = Vec::new();
            let mut seen = HashSet::new();
            for model in matched {
                if !options_by_model.contains_key(model.value.as_str()) {
                    let opts = self.options(query.year, &make.value, &model.value)?;
                    options_by_model.insert(model.value.as_str(), opts);
                }
                let opts = options_by_model
                    .get(model.value.as_str())
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for opt in opts {
                    let candidate = Candidate {
                        id: opt.value.clone(),
                        model: model.text.clone(),
                        description: opt.text.clone(),
                    };
                    if candidate_allowed(level, query, &candidate)
                        && seen.insert(opt.value.clone())
                    {
                        candidates.push(candidate);
                    }
                }
            }

            let Some(pick) = pick_best(query, &candidates, self.policy.tie_break)? else {
                tracing::debug!(
                    level = %level,
                    model = %query.model,
                    "no vehicle options at level"
                );
                continue;
            };

            let chosen = &candidates[pick.index];
            let confidence = if level == MatchLevel::Exact && pick.unique {
                MatchConfidence::Exact
            } else {
                MatchConfidence::Fuzzy
            };
            let fields = self.vehicle(&chosen.id)?;

            tracing::debug!(
                vehicle_id = %chosen.id,
                level = %level,
                confidence = %confidence,
                candidates = candidates.len(),
                "fuel economy match"
            );
            return Ok(FuelEconomyMatch {
                vehicle_id: chosen.id.clone(),
                description: chosen.label(),
                confidence,
                level,
                fields,
            });
        }

        Err(ProviderError::NotFound(format!(
            "no fuel-economy match for {} {} {}",
            query.year, query.make, query.model
        )))
    }
}
