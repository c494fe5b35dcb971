//! NHTSA vPIC VIN decoder.
//!
//! Uses the flat `DecodeVinValues` endpoint, which returns one object per
//! VIN with every decoded attribute as a string (`ModelYear`, `Make`,
//! `Model`, `Trim`, `DisplacementL`, ...). All attributes are kept.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::http::HttpTransport;
use super::provider::{ProviderError, VinDecodeSource};
use crate::domain::record::{MAKE_KEYS, MODEL_KEYS, YEAR_KEYS};
use crate::domain::{field_str, FieldMap, Vin};

pub const DEFAULT_BASE_URL: &str = "https://vpic.nhtsa.dot.gov/api/vehicles";

#[derive(Debug, Deserialize)]
struct DecodeResponse {
    #[serde(rename = "Results", default)]
    results: Vec<FieldMap>,
}

pub struct NhtsaSource {
    base_url: String,
    http: Arc<HttpTransport>,
}

impl NhtsaSource {
    pub fn new(base_url: impl Into<String>, http: Arc<HttpTransport>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    fn decode_url(&self, vin: &Vin) -> String {
        format!("{}/DecodeVinValues/{}", self.base_url, vin)
    }
}

impl VinDecodeSource for NhtsaSource {
    fn name(&self) -> &str {
        "nhtsa_vpic"
    }

    fn decode(&self, vin: &Vin) -> Result<FieldMap, ProviderError> {
        let body = self.http.get_json(&self.decode_url(vin), &[("format", "json")])?;
        parse_decode_response(vin, body)
    }
}

/// Take the first result and require year, make and model.
pub fn parse_decode_response(vin: &Vin, body: Value) -> Result<FieldMap, ProviderError> {
    let resp: DecodeResponse = serde_json::from_value(body)
        .map_err(|e| ProviderError::Network(format!("unexpected vPIC response: {e}")))?;

    let fields = resp
        .results
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::NotFound(format!("no decode results for {vin}")))?;

    let complete = [YEAR_KEYS, MAKE_KEYS, MODEL_KEYS]
        .iter()
        .all(|keys| field_str(&fields, keys).is_some());
    if !complete {
        return Err(ProviderError::NotFound(format!(
            "incomplete vehicle data for {vin} (year, make or model missing)"
        )));
    }

    Ok(fields)
}
