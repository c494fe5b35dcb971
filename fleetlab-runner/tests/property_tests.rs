//! Property tests for the enrichment pipeline.
//!
//! 1. Output length and order always match the input, whatever the mix of
//!    valid and invalid VINs and whatever the parallelism.
//! 2. Invalid VINs never reach a provider, and each distinct valid VIN is
//!    decoded exactly once.

use fleetlab_core::data::{
    FuelEconomyClient, FuelEconomySource, MenuItem, ProviderError, ResponseCache, RetryPolicy,
    VinDecodeClient, VinDecodeSource,
};
use fleetlab_core::domain::{EnrichmentStatus, FieldMap, InputRow, RecordErrorKind, Vin};
use fleetlab_runner::{Enricher, ProcessOptions};
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Decodes every VIN to the same vehicle and counts calls.
struct EchoDecoder {
    calls: AtomicUsize,
}

impl VinDecodeSource for EchoDecoder {
    fn name(&self) -> &str {
        "echo"
    }

    fn decode(&self, vin: &Vin) -> Result<FieldMap, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let v = json!({"ModelYear": "2015", "Make": "Ford", "Model": "Focus", "VIN": vin.as_str()});
        Ok(v.as_object().cloned().unwrap_or_default())
    }
}

/// Empty catalogue: every lookup is NOT_FOUND.
struct EmptyCatalogue;

impl FuelEconomySource for EmptyCatalogue {
    fn name(&self) -> &str {
        "empty"
    }

    fn makes(&self, _year: u16) -> Result<Vec<MenuItem>, ProviderError> {
        Ok(vec![])
    }

    fn models(&self, _year: u16, _make: &str) -> Result<Vec<MenuItem>, ProviderError> {
        Ok(vec![])
    }

    fn options(
        &self,
        _year: u16,
        _make: &str,
        _model: &str,
    ) -> Result<Vec<MenuItem>, ProviderError> {
        Ok(vec![])
    }

    fn vehicle(&self, id: &str) -> Result<FieldMap, ProviderError> {
        Err(ProviderError::NotFound(id.to_string()))
    }
}

fn enricher(decoder: Arc<EchoDecoder>) -> Enricher {
    let cache = Arc::new(ResponseCache::default());
    let vin_client =
        VinDecodeClient::new(decoder, Arc::clone(&cache)).with_retry_policy(RetryPolicy::none());
    let fuel_client = FuelEconomyClient::new(Arc::new(EmptyCatalogue), Arc::clone(&cache))
        .with_retry_policy(RetryPolicy::none());
    Enricher::new(vin_client, fuel_client, cache)
}

fn vin_strategy() -> impl Strategy<Value = (String, bool)> {
    prop_oneof![
        "[A-HJ-NPR-Z0-9]{17}".prop_map(|v| (v, true)),
        "[A-Z0-9]{0,16}".prop_map(|v| (v, false)),
        "[A-HJ-NPR-Z0-9]{8}[IOQ][A-HJ-NPR-Z0-9]{8}".prop_map(|v| (v, false)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn length_and_order_are_preserved(
        vins in prop::collection::vec(vin_strategy(), 0..24),
        parallelism in 1usize..6,
    ) {
        let decoder = Arc::new(EchoDecoder { calls: AtomicUsize::new(0) });
        let rows: Vec<InputRow> = vins.iter().map(|(v, _)| InputRow::new(v.as_str())).collect();
        let options = ProcessOptions { max_parallelism: parallelism, deadline: None };

        let records = enricher(decoder.clone()).process(&rows, &options, None).unwrap();

        prop_assert_eq!(records.len(), rows.len());
        for ((vin, valid), record) in vins.iter().zip(&records) {
            prop_assert_eq!(record.vin(), vin.as_str());
            if *valid {
                prop_assert_eq!(record.status(), EnrichmentStatus::Partial);
            } else {
                prop_assert_eq!(record.status(), EnrichmentStatus::Failed);
                prop_assert_eq!(record.errors()[0].kind, RecordErrorKind::InvalidVin);
            }
        }

        let distinct_valid: std::collections::HashSet<&str> = vins
            .iter()
            .filter(|(_, valid)| *valid)
            .map(|(v, _)| v.as_str())
            .collect();
        // one upstream decode per distinct VIN, however many workers race on it
        prop_assert_eq!(decoder.calls.load(Ordering::SeqCst), distinct_valid.len());
    }
}
