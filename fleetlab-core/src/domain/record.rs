//! Vehicle record: one input row and everything enrichment learned about it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::vin::{Vin, VinError};
use crate::data::fuel_client::FuelEconomyMatch;
use crate::data::provider::{ProviderError, ProviderErrorKind};

/// Open attribute mapping as returned by a provider.
pub type FieldMap = serde_json::Map<String, Value>;

/// One row of user input: a raw VIN plus any other columns, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRow {
    pub vin: String,
    pub fields: BTreeMap<String, String>,
}

impl InputRow {
    pub fn new(vin: impl Into<String>) -> Self {
        Self {
            vin: vin.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrichmentStatus {
    /// No provider call issued yet.
    Pending,
    /// VIN decode and fuel-economy lookup both succeeded.
    Enriched,
    /// Exactly one of the two lookups succeeded.
    Partial,
    Failed,
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Enriched => "ENRICHED",
            Self::Partial => "PARTIAL",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// How closely the fuel-economy record matched the decoded vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchConfidence {
    Exact,
    Fuzzy,
    None,
}

impl fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exact => "EXACT",
            Self::Fuzzy => "FUZZY",
            Self::None => "NONE",
        };
        f.write_str(s)
    }
}

/// Category of a per-row error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordErrorKind {
    InvalidVin,
    NotFound,
    RateLimited,
    Network,
    InvalidInput,
    Ambiguous,
    Timeout,
    /// The worker task died before producing a result.
    Aborted,
}

impl From<ProviderErrorKind> for RecordErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::NotFound => Self::NotFound,
            ProviderErrorKind::RateLimited => Self::RateLimited,
            ProviderErrorKind::Network => Self::Network,
            ProviderErrorKind::InvalidInput => Self::InvalidInput,
            ProviderErrorKind::Ambiguous => Self::Ambiguous,
        }
    }
}

impl fmt::Display for RecordErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidVin => "INVALID_VIN",
            Self::NotFound => "NOT_FOUND",
            Self::RateLimited => "RATE_LIMITED",
            Self::Network => "NETWORK",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Ambiguous => "AMBIGUOUS",
            Self::Timeout => "TIMEOUT",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// A human-readable error attached to a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: RecordErrorKind,
    /// Provider that raised it, if any.
    pub source: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn from_provider(source: &str, err: &ProviderError) -> Self {
        Self {
            kind: err.kind().into(),
            source: Some(source.to_string()),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{} [{source}]: {}", self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// The fuel-economy vehicle a match resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssumedVehicle {
    pub id: String,
    pub description: String,
}

/// One vehicle's known and enriched fields.
///
/// Created `Pending` per input row. The VIN is fixed at creation; enrichment
/// only touches the field maps, confidence, status and errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleRecord {
    vin: String,
    user_fields: BTreeMap<String, String>,
    decoded_fields: FieldMap,
    fuel_economy_fields: FieldMap,
    match_confidence: MatchConfidence,
    status: EnrichmentStatus,
    errors: Vec<RecordError>,
    assumed_vehicle: Option<AssumedVehicle>,
    #[serde(skip)]
    fuel_attempted: bool,
}

impl VehicleRecord {
    /// A pending record for a valid VIN.
    pub fn new(vin: &Vin, user_fields: BTreeMap<String, String>) -> Self {
        Self {
            vin: vin.as_str().to_string(),
            user_fields,
            decoded_fields: FieldMap::new(),
            fuel_economy_fields: FieldMap::new(),
            match_confidence: MatchConfidence::None,
            status: EnrichmentStatus::Pending,
            errors: Vec::new(),
            assumed_vehicle: None,
            fuel_attempted: false,
        }
    }

    /// A failed record for a row whose VIN did not pass validation.
    pub fn rejected(
        normalized_vin: impl Into<String>,
        user_fields: BTreeMap<String, String>,
        err: &VinError,
    ) -> Self {
        Self {
            vin: normalized_vin.into(),
            user_fields,
            decoded_fields: FieldMap::new(),
            fuel_economy_fields: FieldMap::new(),
            match_confidence: MatchConfidence::None,
            status: EnrichmentStatus::Failed,
            errors: vec![RecordError {
                kind: RecordErrorKind::InvalidVin,
                source: None,
                message: err.to_string(),
            }],
            assumed_vehicle: None,
            fuel_attempted: false,
        }
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn user_fields(&self) -> &BTreeMap<String, String> {
        &self.user_fields
    }

    pub fn decoded_fields(&self) -> &FieldMap {
        &self.decoded_fields
    }

    pub fn fuel_economy_fields(&self) -> &FieldMap {
        &self.fuel_economy_fields
    }

    pub fn match_confidence(&self) -> MatchConfidence {
        self.match_confidence
    }

    pub fn status(&self) -> EnrichmentStatus {
        self.status
    }

    pub fn errors(&self) -> &[RecordError] {
        &self.errors
    }

    pub fn assumed_vehicle(&self) -> Option<&AssumedVehicle> {
        self.assumed_vehicle.as_ref()
    }

    /// Record the VIN-decode outcome. Returns true if decoding succeeded.
    ///
    /// A failed decode leaves nothing for the fuel-economy lookup to work
    /// with, so the record is final (`Failed`).
    pub fn apply_decode(&mut self, source: &str, result: Result<FieldMap, ProviderError>) -> bool {
        match result {
            Ok(fields) => {
                self.decoded_fields = fields;
                self.status = EnrichmentStatus::Partial;
                true
            }
            Err(e) => {
                self.errors.push(RecordError::from_provider(source, &e));
                self.status = EnrichmentStatus::Failed;
                false
            }
        }
    }

    /// Record the fuel-economy outcome. Only meaningful after a successful decode.
    pub fn apply_fuel_economy(
        &mut self,
        source: &str,
        result: Result<FuelEconomyMatch, ProviderError>,
    ) {
        if self.status != EnrichmentStatus::Partial || self.fuel_attempted {
            return;
        }
        self.fuel_attempted = true;
        match result {
            Ok(m) => {
                self.fuel_economy_fields = m.fields;
                self.match_confidence = m.confidence;
                self.assumed_vehicle = Some(AssumedVehicle {
                    id: m.vehicle_id,
                    description: m.description,
                });
                self.status = EnrichmentStatus::Enriched;
            }
            Err(e) => {
                self.errors.push(RecordError::from_provider(source, &e));
                self.match_confidence = MatchConfidence::None;
            }
        }
    }

    /// Mark a record whose task did not finish before the deadline.
    pub fn mark_timed_out(&mut self, after: std::time::Duration) {
        self.fail_with(
            RecordErrorKind::Timeout,
            format!("enrichment did not finish within {:.1}s", after.as_secs_f64()),
        );
    }

    /// Mark a record whose task died without reporting back.
    pub fn mark_aborted(&mut self) {
        self.fail_with(
            RecordErrorKind::Aborted,
            "worker task aborted before completion".to_string(),
        );
    }

    fn fail_with(&mut self, kind: RecordErrorKind, message: String) {
        self.status = EnrichmentStatus::Failed;
        self.errors.push(RecordError {
            kind,
            source: None,
            message,
        });
    }

    /// "2014 Ford F-150", or the VIN when nothing was decoded.
    pub fn display_name(&self) -> String {
        let parts: Vec<String> = [YEAR_KEYS, MAKE_KEYS, MODEL_KEYS]
            .iter()
            .filter_map(|keys| field_str(&self.decoded_fields, keys))
            .collect();
        if parts.is_empty() {
            self.vin.clone()
        } else {
            parts.join(" ")
        }
    }

    /// Human-readable error summary, `; `-separated.
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub(crate) const YEAR_KEYS: &[&str] = &["year", "ModelYear", "model_year"];
pub(crate) const MAKE_KEYS: &[&str] = &["make"];
pub(crate) const MODEL_KEYS: &[&str] = &["model"];

/// Case-insensitive lookup of the first non-empty value under any alias,
/// rendered as a string. Numbers are rendered without quotes.
pub fn field_str(map: &FieldMap, aliases: &[&str]) -> Option<String> {
    for alias in aliases {
        let found = map
            .get(*alias)
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(alias))
                    .map(|(_, v)| v)
            });
        let rendered = match found {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => continue,
        };
        if !rendered.is_empty() {
            return Some(rendered);
        }
    }
    None
}
