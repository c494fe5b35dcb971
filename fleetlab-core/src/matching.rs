//! Fuel-economy matching policy.
//!
//! A decoded vehicle is matched against the fuel-economy catalogue by walking
//! a relaxation ladder of model comparisons, then scoring the surviving
//! vehicle options on secondary attributes (trim, displacement, cylinders,
//! drive, transmission). The ladder and tie-break are configuration.

use chrono::Datelike;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::data::provider::ProviderError;
use crate::domain::record::{MAKE_KEYS, MODEL_KEYS, YEAR_KEYS};
use crate::domain::{field_str, FieldMap};

const TRIM_KEYS: &[&str] = &["trim", "Trim", "Series"];
const DISPLACEMENT_KEYS: &[&str] = &["DisplacementL", "displacement", "displ"];
const CYLINDER_KEYS: &[&str] = &["EngineCylinders", "cylinders"];
const DRIVE_KEYS: &[&str] = &["DriveType", "drive"];
const TRANSMISSION_KEYS: &[&str] = &["TransmissionStyle", "transmission", "trany"];

/// One rung of the relaxation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    /// Model equal (case-insensitive, trimmed) and trim present in the option.
    Exact,
    /// Model equal, trim ignored.
    RelaxTrim,
    /// Normalized model names equal.
    NormalizedModel,
    /// Normalized catalogue model contains the normalized query model.
    PartialModel,
}

impl fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Exact => "exact",
            Self::RelaxTrim => "relax_trim",
            Self::NormalizedModel => "normalized_model",
            Self::PartialModel => "partial_model",
        };
        f.write_str(s)
    }
}

/// What to do when several candidates share the best score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Take the first candidate in upstream order.
    #[default]
    FirstReturned,
    /// Fail the lookup with `Ambiguous`.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchPolicy {
    pub levels: Vec<MatchLevel>,
    pub tie_break: TieBreak,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            levels: vec![
                MatchLevel::Exact,
                MatchLevel::RelaxTrim,
                MatchLevel::NormalizedModel,
                MatchLevel::PartialModel,
            ],
            tie_break: TieBreak::FirstReturned,
        }
    }
}

/// Fuel-economy lookup input, derived from decoded VIN attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleQuery {
    pub year: u16,
    pub make: String,
    pub model: String,
    pub trim: Option<String>,
    /// Litres.
    pub displacement: Option<f64>,
    pub cylinders: Option<u32>,
    pub drive: Option<String>,
    pub transmission: Option<String>,
}

impl VehicleQuery {
    pub fn new(year: u16, make: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            year,
            make: make.into(),
            model: model.into(),
            trim: None,
            displacement: None,
            cylinders: None,
            drive: None,
            transmission: None,
        }
    }

    pub fn with_trim(mut self, trim: impl Into<String>) -> Self {
        self.trim = Some(trim.into());
        self
    }

    /// Build a query from decoded attributes. Keys are matched
    /// case-insensitively with aliases (`ModelYear`/`year`, ...).
    pub fn from_decoded(fields: &FieldMap) -> Result<Self, ProviderError> {
        let year_raw = field_str(fields, YEAR_KEYS)
            .ok_or_else(|| ProviderError::InvalidInput("decoded data has no model year".into()))?;
        let year = parse_year(&year_raw)?;
        let make = field_str(fields, MAKE_KEYS)
            .ok_or_else(|| ProviderError::InvalidInput("decoded data has no make".into()))?;
        let model = field_str(fields, MODEL_KEYS)
            .ok_or_else(|| ProviderError::InvalidInput("decoded data has no model".into()))?;

        Ok(Self {
            year,
            make,
            model,
            trim: field_str(fields, TRIM_KEYS),
            displacement: field_str(fields, DISPLACEMENT_KEYS)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|d| *d > 0.0),
            cylinders: field_str(fields, CYLINDER_KEYS)
                .and_then(|s| s.parse::<u32>().ok())
                .filter(|c| *c > 0),
            drive: field_str(fields, DRIVE_KEYS),
            transmission: field_str(fields, TRANSMISSION_KEYS),
        })
    }

    /// Normalized request parameters, used as the cache key.
    pub fn cache_params(&self) -> String {
        let opt = |o: &Option<String>| o.as_deref().unwrap_or("").trim().to_lowercase();
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.year,
            self.make.trim().to_lowercase(),
            self.model.trim().to_lowercase(),
            opt(&self.trim),
            self.displacement.map(|d| format!("{d:.1}")).unwrap_or_default(),
            self.cylinders.map(|c| c.to_string()).unwrap_or_default(),
            opt(&self.drive),
            opt(&self.transmission),
        )
    }
}

fn parse_year(raw: &str) -> Result<u16, ProviderError> {
    let year: u16 = raw
        .trim()
        .parse()
        .map_err(|_| ProviderError::InvalidInput(format!("model year '{raw}' is not a number")))?;
    let max = chrono::Utc::now().year() + 1;
    if year < 1900 || i32::from(year) > max {
        return Err(ProviderError::InvalidInput(format!(
            "model year {year} outside 1900..={max}"
        )));
    }
    Ok(year)
}

struct FoldRules {
    f_series: Regex,
    e_series: Regex,
    super_duty: Regex,
    gm_trucks: Regex,
    ram: Regex,
    gm_vans: Regex,
}

static FOLD_RULES: OnceLock<FoldRules> = OnceLock::new();

fn fold_rules() -> &'static FoldRules {
    FOLD_RULES.get_or_init(|| FoldRules {
        f_series: Regex::new(r"f[-\s]*(\d{3})").expect("valid regex"),
        e_series: Regex::new(r"e[-\s]*(\d{3})").expect("valid regex"),
        super_duty: Regex::new(r"\bsuper\s*duty\b").expect("valid regex"),
        gm_trucks: Regex::new(r"(silverado|sierra)[-\s]*(\d{4})").expect("valid regex"),
        ram: Regex::new(r"ram[-\s]*(\d{4})").expect("valid regex"),
        gm_vans: Regex::new(r"(express|savana)[-\s]*(\d{4})").expect("valid regex"),
    })
}

/// Normalize a model name for comparison.
///
/// Lowercases, folds commercial-vehicle spellings (`F-150`/`F 150` →
/// `f150`, `Silverado 2500` → `silverado2500`, `Ram 1500` → `ram1500`, ...),
/// drops "super duty", strips punctuation and collapses whitespace.
pub fn normalize_model(model: &str) -> String {
    let rules = fold_rules();
    let s = model.trim().to_lowercase();
    let s = rules.f_series.replace_all(&s, "f${1}");
    let s = rules.e_series.replace_all(&s, "e${1}");
    let s = rules.super_duty.replace_all(&s, "");
    let s = rules.gm_trucks.replace_all(&s, "${1}${2}");
    let s = rules.ram.replace_all(&s, "ram${1}");
    let s = rules.gm_vans.replace_all(&s, "${1}${2}");

    let cleaned: String = s
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn same_model(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Does the catalogue model name `candidate` satisfy `level` for `query`?
pub fn model_matches(level: MatchLevel, query: &VehicleQuery, candidate: &str) -> bool {
    match level {
        MatchLevel::Exact | MatchLevel::RelaxTrim => same_model(&query.model, candidate),
        MatchLevel::NormalizedModel => normalize_model(&query.model) == normalize_model(candidate),
        MatchLevel::PartialModel => {
            let needle = normalize_model(&query.model);
            !needle.is_empty() && normalize_model(candidate).contains(&needle)
        }
    }
}

/// A vehicle option reachable at some level of the ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    /// Catalogue model name the option belongs to.
    pub model: String,
    /// Option text, e.g. "Auto 6-spd, 8 cyl, 5.0 L".
    pub description: String,
}

impl Candidate {
    fn haystack(&self) -> String {
        format!("{} {}", self.model, self.description).to_lowercase()
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.model, self.description)
    }
}

/// Whether a candidate passes the level's own filter (beyond the model).
pub fn candidate_allowed(level: MatchLevel, query: &VehicleQuery, candidate: &Candidate) -> bool {
    match (level, query.trim.as_deref()) {
        (MatchLevel::Exact, Some(trim)) => candidate.haystack().contains(&trim.to_lowercase()),
        _ => true,
    }
}

fn drive_class(drive: &str) -> Option<&'static str> {
    let d = drive.to_lowercase();
    if d.contains("4wd") || d.contains("4x4") || d.contains("4-wheel") {
        Some("4wd")
    } else if d.contains("awd") || d.contains("all-wheel") {
        Some("awd")
    } else if ["2wd", "4x2", "fwd", "rwd", "front-wheel", "rear-wheel"]
        .iter()
        .any(|t| d.contains(t))
    {
        Some("2wd")
    } else {
        None
    }
}

fn drive_matches(class: &str, text: &str) -> bool {
    match class {
        "4wd" => text.contains("4wd") || text.contains("4x4"),
        "awd" => text.contains("awd"),
        _ => ["2wd", "fwd", "rwd"].iter().any(|t| text.contains(t)),
    }
}

fn transmission_token(transmission: &str) -> Option<&'static str> {
    let t = transmission.trim().to_lowercase();
    if t.starts_with("auto") || t.starts_with("cvt") {
        Some("auto")
    } else if t.starts_with("man") {
        Some("man")
    } else {
        None
    }
}

/// Number of secondary attributes the candidate agrees with.
pub fn score(query: &VehicleQuery, candidate: &Candidate) -> u32 {
    let text = candidate.haystack();
    let mut score = 0;

    if let Some(trim) = query.trim.as_deref() {
        if text.contains(&trim.to_lowercase()) {
            score += 1;
        }
    }
    if let Some(displ) = query.displacement {
        if text.contains(&format!("{displ:.1} l")) {
            score += 1;
        }
    }
    if let Some(cyl) = query.cylinders {
        if text.contains(&format!("{cyl} cyl")) {
            score += 1;
        }
    }
    if let Some(class) = query.drive.as_deref().and_then(drive_class) {
        if drive_matches(class, &text) {
            score += 1;
        }
    }
    if let Some(token) = query.transmission.as_deref().and_then(transmission_token) {
        if text.contains(token) {
            score += 1;
        }
    }
    score
}

/// Outcome of choosing among scored candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pick {
    pub index: usize,
    /// True when no other candidate shares the best score.
    pub unique: bool,
}

/// Pick the highest-scoring candidate. Ties go to the first in upstream
/// order, or fail with `Ambiguous` under `TieBreak::Reject`.
pub fn pick_best(
    query: &VehicleQuery,
    candidates: &[Candidate],
    tie_break: TieBreak,
) -> Result<Option<Pick>, ProviderError> {
    let scores: Vec<u32> = candidates.iter().map(|c| score(query, c)).collect();
    let Some(&best) = scores.iter().max() else {
        return Ok(None);
    };

    let tied: Vec<usize> = scores
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == best)
        .map(|(i, _)| i)
        .collect();

    if tied.len() > 1 && tie_break == TieBreak::Reject {
        let labels: Vec<String> = tied.iter().map(|&i| candidates[i].label()).collect();
        return Err(ProviderError::Ambiguous(format!(
            "{} candidates tie for {} {} {}: {}",
            tied.len(),
            query.year,
            query.make,
            query.model,
            labels.join("; ")
        )));
    }

    Ok(Some(Pick {
        index: tied[0],
        unique: tied.len() == 1,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cand(id: &str, model: &str, description: &str) -> Candidate {
        Candidate {
            id: id.into(),
            model: model.into(),
            description: description.into(),
        }
    }

    #[test]
    fn normalizes_f_series() {
        assert_eq!(normalize_model("F-150"), "f150");
        assert_eq!(normalize_model("F 150"), "f150");
        assert_eq!(normalize_model(" f150 Pickup 4WD "), "f150 pickup 4wd");
    }

    #[test]
    fn normalizes_commercial_models() {
        assert_eq!(normalize_model("F-250 Super Duty"), "f250");
        assert_eq!(normalize_model("E-350 Van"), "e350 van");
        assert_eq!(normalize_model("Silverado 2500"), "silverado2500");
        assert_eq!(normalize_model("Sierra-3500HD"), "sierra3500hd");
        assert_eq!(normalize_model("Ram 1500"), "ram1500");
        assert_eq!(normalize_model("Express 2500"), "express2500");
    }

    #[test]
    fn strips_punctuation_and_spacing() {
        assert_eq!(normalize_model("Transit-Connect  (LWB)"), "transitconnect lwb");
    }

    #[test]
    fn ladder_levels() {
        let q = VehicleQuery::new(2014, "Ford", "F-150");
        assert!(model_matches(MatchLevel::Exact, &q, " f-150 "));
        assert!(!model_matches(MatchLevel::RelaxTrim, &q, "F150"));
        assert!(model_matches(MatchLevel::NormalizedModel, &q, "F150"));
        assert!(!model_matches(MatchLevel::NormalizedModel, &q, "F150 Pickup 2WD"));
        assert!(model_matches(MatchLevel::PartialModel, &q, "F150 Pickup 2WD"));
    }

    #[test]
    fn exact_level_requires_known_trim() {
        let q = VehicleQuery::new(2014, "Ford", "F-150").with_trim("XLT");
        assert!(candidate_allowed(MatchLevel::Exact, &q, &cand("1", "F-150", "XLT 5.0 L")));
        assert!(!candidate_allowed(MatchLevel::Exact, &q, &cand("2", "F-150", "5.0 L")));
        assert!(candidate_allowed(MatchLevel::RelaxTrim, &q, &cand("2", "F-150", "5.0 L")));
    }

    #[test]
    fn scores_secondary_attributes() {
        let mut q = VehicleQuery::new(2014, "Ford", "F-150");
        q.displacement = Some(5.0);
        q.cylinders = Some(8);
        q.drive = Some("4WD/4-Wheel Drive/4x4".into());
        q.transmission = Some("Automatic".into());

        let good = cand("1", "F150 Pickup 4WD", "Auto 6-spd, 8 cyl, 5.0 L");
        let poor = cand("2", "F150 Pickup 2WD", "Auto 6-spd, 6 cyl, 3.5 L, Turbo");
        assert_eq!(score(&q, &good), 4);
        assert_eq!(score(&q, &poor), 1);

        let pick = pick_best(&q, &[poor, good], TieBreak::FirstReturned)
            .unwrap()
            .unwrap();
        assert_eq!(pick, Pick { index: 1, unique: true });
    }

    #[test]
    fn tie_goes_to_first_returned() {
        let q = VehicleQuery::new(2014, "Ford", "F-150");
        let cands = [cand("A", "F-150", "one"), cand("B", "F-150", "two")];
        let pick = pick_best(&q, &cands, TieBreak::FirstReturned).unwrap().unwrap();
        assert_eq!(pick, Pick { index: 0, unique: false });
    }

    #[test]
    fn tie_rejected_when_configured() {
        let q = VehicleQuery::new(2014, "Ford", "F-150");
        let cands = [cand("A", "F-150", "one"), cand("B", "F-150", "two")];
        let err = pick_best(&q, &cands, TieBreak::Reject).unwrap_err();
        assert!(matches!(err, ProviderError::Ambiguous(_)));
    }

    #[test]
    fn empty_candidates_pick_nothing() {
        let q = VehicleQuery::new(2014, "Ford", "F-150");
        assert_eq!(pick_best(&q, &[], TieBreak::Reject).unwrap(), None);
    }

    #[test]
    fn query_from_decoded_uses_aliases() {
        let fields = json!({
            "ModelYear": "2014", "Make": "FORD", "Model": "F-150",
            "Trim": "", "DisplacementL": "4.951", "EngineCylinders": "8"
        });
        let q = VehicleQuery::from_decoded(fields.as_object().unwrap()).unwrap();
        assert_eq!(q.year, 2014);
        assert_eq!(q.make, "FORD");
        assert_eq!(q.trim, None);
        assert_eq!(q.displacement, Some(4.951));
        assert_eq!(q.cylinders, Some(8));
        assert_eq!(q.cache_params(), "2014|ford|f-150||5.0|8||");
    }

    #[test]
    fn query_rejects_bad_year() {
        let fields = json!({"year": 1850, "make": "Ford", "model": "T"});
        let err = VehicleQuery::from_decoded(fields.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));

        let fields = json!({"make": "Ford", "model": "T"});
        assert!(VehicleQuery::from_decoded(fields.as_object().unwrap()).is_err());
    }

    #[test]
    fn policy_round_trips_through_toml_names() {
        let policy: MatchPolicy = serde_json::from_value(json!({
            "levels": ["exact", "normalized_model"],
            "tie_break": "reject"
        }))
        .unwrap();
        assert_eq!(policy.levels, vec![MatchLevel::Exact, MatchLevel::NormalizedModel]);
        assert_eq!(policy.tie_break, TieBreak::Reject);
    }
}
