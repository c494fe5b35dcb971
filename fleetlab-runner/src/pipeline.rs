//! Enrichment pipeline: a batch of input rows in, one vehicle record per row out.
//!
//! Invalid VINs are rejected up front without any provider call. Valid rows
//! run on a private rayon pool sized `max_parallelism`; each task decodes the
//! VIN, then (only if that succeeded) looks up fuel economy. Results come
//! back over a channel into a position-indexed buffer, so output order always
//! matches input order.
//!
//! An optional deadline bounds the whole batch. Rows still running when it
//! elapses are reported as `TIMEOUT`; queued tasks see the cancel flag and
//! exit without calling providers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use fleetlab_core::data::{
    EnrichProgress, FuelEconomyClient, FuelEconomyGovSource, HttpTransport, NhtsaSource,
    ResponseCache, VinDecodeClient,
};
use fleetlab_core::domain::vin::normalize;
use fleetlab_core::domain::{EnrichmentStatus, InputRow, VehicleRecord, Vin};
use fleetlab_core::matching::VehicleQuery;

use crate::config::EnrichConfig;

/// Errors that abort a whole batch. Per-row problems never surface here.
#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("max_parallelism must be at least 1")]
    InvalidParallelism,
    #[error("failed to build worker pool: {0}")]
    PoolBuild(String),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Per-batch options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub max_parallelism: usize,
    /// Wall-clock budget for the whole batch.
    pub deadline: Option<Duration>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_parallelism: 10,
            deadline: None,
        }
    }
}

impl ProcessOptions {
    pub fn from_config(config: &EnrichConfig) -> Self {
        Self {
            max_parallelism: config.pipeline.max_parallelism,
            deadline: config.deadline(),
        }
    }
}

/// Runs batches of rows through the VIN-decode and fuel-economy clients.
pub struct Enricher {
    vin_client: Arc<VinDecodeClient>,
    fuel_client: Arc<FuelEconomyClient>,
    cache: Arc<ResponseCache>,
}

impl Enricher {
    /// Both clients are expected to share `cache`; it is kept here for stats.
    pub fn new(
        vin_client: VinDecodeClient,
        fuel_client: FuelEconomyClient,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            vin_client: Arc::new(vin_client),
            fuel_client: Arc::new(fuel_client),
            cache,
        }
    }

    /// Wire the HTTP sources, shared cache and policies from configuration.
    pub fn from_config(config: &EnrichConfig) -> Result<Self, EnrichError> {
        let cache = Arc::new(if config.cache.enabled {
            ResponseCache::new(config.cache.max_entries)
        } else {
            ResponseCache::disabled()
        });

        let settings = config.http_settings();
        let transport = || {
            HttpTransport::new(&settings)
                .map(Arc::new)
                .map_err(|e| EnrichError::HttpClient(e.to_string()))
        };

        let vin_source = NhtsaSource::new(&config.api.vin_base_url, transport()?);
        let fuel_source = FuelEconomyGovSource::new(&config.api.fuel_base_url, transport()?);

        let vin_client = VinDecodeClient::new(Arc::new(vin_source), Arc::clone(&cache))
            .with_retry_policy(config.retry_policy())
            .with_ttl(config.vin_ttl());
        let fuel_client = FuelEconomyClient::new(Arc::new(fuel_source), Arc::clone(&cache))
            .with_retry_policy(config.retry_policy())
            .with_ttl(config.fuel_ttl())
            .with_policy(config.matching.clone());

        Ok(Self::new(vin_client, fuel_client, cache))
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Enrich every row. The result has exactly one record per row, in order.
    pub fn process(
        &self,
        rows: &[InputRow],
        options: &ProcessOptions,
        progress: Option<Arc<dyn EnrichProgress>>,
    ) -> Result<Vec<VehicleRecord>, EnrichError> {
        if options.max_parallelism == 0 {
            return Err(EnrichError::InvalidParallelism);
        }

        let started = Instant::now();
        let total = rows.len();
        let mut results: Vec<Option<VehicleRecord>> = vec![None; total];
        let mut pending: Vec<(usize, Vin)> = Vec::new();

        for (index, row) in rows.iter().enumerate() {
            match Vin::parse(&row.vin) {
                Ok(vin) => pending.push((index, vin)),
                Err(e) => {
                    tracing::warn!(row = index, vin = %row.vin, error = %e, "rejected invalid VIN");
                    let record =
                        VehicleRecord::rejected(normalize(&row.vin), row.fields.clone(), &e);
                    if let Some(p) = &progress {
                        p.on_complete(record.vin(), index, total, record.status());
                    }
                    results[index] = Some(record);
                }
            }
        }

        tracing::info!(
            rows = total,
            valid = pending.len(),
            max_parallelism = options.max_parallelism,
            "enrichment started"
        );

        if !pending.is_empty() {
            self.run_pool(rows, &pending, &mut results, options, progress.as_ref())?;
        }

        let records: Vec<VehicleRecord> = results.into_iter().flatten().collect();
        debug_assert_eq!(records.len(), total);

        let count = |s: EnrichmentStatus| records.iter().filter(|r| r.status() == s).count();
        let (enriched, partial, failed) = (
            count(EnrichmentStatus::Enriched),
            count(EnrichmentStatus::Partial),
            count(EnrichmentStatus::Failed),
        );
        let stats = self.cache.stats();
        tracing::info!(
            enriched,
            partial,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            cache_hits = stats.hits,
            cache_misses = stats.misses,
            "enrichment finished"
        );
        if let Some(p) = &progress {
            p.on_batch_complete(enriched, partial, failed, total);
        }

        Ok(records)
    }

    fn run_pool(
        &self,
        rows: &[InputRow],
        pending: &[(usize, Vin)],
        results: &mut [Option<VehicleRecord>],
        options: &ProcessOptions,
        progress: Option<&Arc<dyn EnrichProgress>>,
    ) -> Result<(), EnrichError> {
        let total = rows.len();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_parallelism)
            .thread_name(|i| format!("fleetlab-enrich-{i}"))
            .panic_handler(|_| tracing::error!("enrichment task panicked"))
            .build()
            .map_err(|e| EnrichError::PoolBuild(e.to_string()))?;

        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel::<(usize, VehicleRecord)>();

        for (index, vin) in pending {
            let (index, vin) = (*index, vin.clone());
            let fields = rows[index].fields.clone();
            let tx = tx.clone();
            let cancel = Arc::clone(&cancel);
            let vin_client = Arc::clone(&self.vin_client);
            let fuel_client = Arc::clone(&self.fuel_client);
            let progress = progress.cloned();

            pool.spawn(move || {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(p) = &progress {
                    p.on_start(vin.as_str(), index, total);
                }
                let record = enrich_row(&vin_client, &fuel_client, &vin, fields);
                // Receiver gone means the batch already gave up on this row.
                let _ = tx.send((index, record));
            });
        }
        drop(tx);

        let deadline = options.deadline.map(|d| (d, Instant::now() + d));
        let mut received = 0;
        let mut timed_out = false;

        while received < pending.len() {
            let next = match deadline {
                Some((_, at)) => {
                    let now = Instant::now();
                    if now >= at {
                        timed_out = true;
                        break;
                    }
                    match rx.recv_timeout(at - now) {
                        Ok(msg) => Some(msg),
                        Err(mpsc::RecvTimeoutError::Timeout) => {
                            timed_out = true;
                            break;
                        }
                        Err(mpsc::RecvTimeoutError::Disconnected) => None,
                    }
                }
                None => rx.recv().ok(),
            };

            let Some((index, record)) = next else {
                break;
            };
            if let Some(p) = progress {
                p.on_complete(record.vin(), index, total, record.status());
            }
            results[index] = Some(record);
            received += 1;
        }

        cancel.store(true, Ordering::Relaxed);

        for (index, vin) in pending {
            if results[*index].is_some() {
                continue;
            }
            let mut record = VehicleRecord::new(vin, rows[*index].fields.clone());
            match deadline {
                Some((budget, _)) if timed_out => {
                    tracing::warn!(vin = %vin, "enrichment timed out");
                    record.mark_timed_out(budget);
                }
                _ => {
                    tracing::warn!(vin = %vin, "enrichment task aborted");
                    record.mark_aborted();
                }
            }
            if let Some(p) = progress {
                p.on_complete(record.vin(), *index, total, record.status());
            }
            results[*index] = Some(record);
        }

        Ok(())
    }
}

/// One row's work: decode, then fuel economy if the decode succeeded.
fn enrich_row(
    vin_client: &VinDecodeClient,
    fuel_client: &FuelEconomyClient,
    vin: &Vin,
    fields: std::collections::BTreeMap<String, String>,
) -> VehicleRecord {
    let mut record = VehicleRecord::new(vin, fields);

    let decoded = vin_client.decode(vin);
    if record.apply_decode(vin_client.source_name(), decoded) {
        let lookup = VehicleQuery::from_decoded(record.decoded_fields())
            .and_then(|query| fuel_client.lookup(&query));
        record.apply_fuel_economy(fuel_client.source_name(), lookup);
    }

    match record.status() {
        EnrichmentStatus::Enriched => {
            tracing::debug!(vin = %vin, confidence = %record.match_confidence(), "enriched")
        }
        status => {
            tracing::warn!(
                vin = %vin,
                status = %status,
                errors = %record.error_summary(),
                "incomplete enrichment"
            )
        }
    }
    record
}
