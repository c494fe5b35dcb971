//! Export of enriched records as CSV or JSON.
//!
//! CSV columns, in order: `VIN`, `Status`, `Match Confidence`, `Errors`,
//! `Assumed Vehicle ID`, `Assumed Vehicle`, then user columns, then every
//! decoded attribute as `decoded.<name>` and every fuel-economy attribute as
//! `fuel.<name>`. Columns are the union over all records in first-seen order.
//! A user column whose name collides with a fixed column or a reserved
//! prefix is exported as `user.<name>`. A selection restricts and reorders
//! the columns.

use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use fleetlab_core::domain::{InputRow, VehicleRecord};

const FIXED_COLUMNS: &[&str] = &[
    "VIN",
    "Status",
    "Match Confidence",
    "Errors",
    "Assumed Vehicle ID",
    "Assumed Vehicle",
];

const DECODED_PREFIX: &str = "decoded.";
const FUEL_PREFIX: &str = "fuel.";
const USER_PREFIX: &str = "user.";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown field '{0}' (see available fields)")]
    UnknownField(String),
}

// ─── Field discovery ────────────────────────────────────────────────

/// Export header for a user column.
fn user_column(name: &str) -> String {
    let reserved = FIXED_COLUMNS.contains(&name)
        || [DECODED_PREFIX, FUEL_PREFIX, USER_PREFIX]
            .iter()
            .any(|p| name.starts_with(p));
    if reserved {
        format!("{USER_PREFIX}{name}")
    } else {
        name.to_string()
    }
}

/// Every column that could be exported for these records.
pub fn available_fields(records: &[VehicleRecord]) -> Vec<String> {
    let mut fields: Vec<String> = FIXED_COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut seen: HashSet<String> = fields.iter().cloned().collect();
    let mut push = |name: String, fields: &mut Vec<String>| {
        if seen.insert(name.clone()) {
            fields.push(name);
        }
    };

    for r in records {
        for k in r.user_fields().keys() {
            push(user_column(k), &mut fields);
        }
    }
    for r in records {
        for k in r.decoded_fields().keys() {
            push(format!("{DECODED_PREFIX}{k}"), &mut fields);
        }
    }
    for r in records {
        for k in r.fuel_economy_fields().keys() {
            push(format!("{FUEL_PREFIX}{k}"), &mut fields);
        }
    }
    fields
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn cell(record: &VehicleRecord, column: &str) -> String {
    match column {
        "VIN" => record.vin().to_string(),
        "Status" => record.status().to_string(),
        "Match Confidence" => record.match_confidence().to_string(),
        "Errors" => record.error_summary(),
        "Assumed Vehicle ID" => record
            .assumed_vehicle()
            .map(|a| a.id.clone())
            .unwrap_or_default(),
        "Assumed Vehicle" => record
            .assumed_vehicle()
            .map(|a| a.description.clone())
            .unwrap_or_default(),
        _ => {
            if let Some(v) = record.user_fields().get(column) {
                return v.clone();
            }
            if let Some(k) = column.strip_prefix(USER_PREFIX) {
                return record.user_fields().get(k).cloned().unwrap_or_default();
            }
            if let Some(k) = column.strip_prefix(DECODED_PREFIX) {
                return render(record.decoded_fields().get(k));
            }
            if let Some(k) = column.strip_prefix(FUEL_PREFIX) {
                return render(record.fuel_economy_fields().get(k));
            }
            String::new()
        }
    }
}

/// Check a column selection against the input before any enrichment.
///
/// Fixed and user columns must exist; `decoded.*` and `fuel.*` names are
/// only known after enrichment and are accepted here.
pub fn check_selection(rows: &[InputRow], selection: &[String]) -> Result<(), ExportError> {
    let user: HashSet<String> = rows
        .iter()
        .flat_map(|r| r.fields.keys())
        .map(|k| user_column(k))
        .collect();
    let known = |name: &str| {
        FIXED_COLUMNS.contains(&name)
            || user.contains(name)
            || name.starts_with(DECODED_PREFIX)
            || name.starts_with(FUEL_PREFIX)
    };
    match selection.iter().find(|s| !known(s)) {
        Some(unknown) => Err(ExportError::UnknownField(unknown.clone())),
        None => Ok(()),
    }
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Render records as CSV. `selection`, if given, names the columns to
/// include (in that order); unknown names are an error.
pub fn export_csv(
    records: &[VehicleRecord],
    selection: Option<&[String]>,
) -> Result<String, ExportError> {
    let available = available_fields(records);
    let columns: Vec<String> = match selection {
        Some(sel) => {
            if let Some(unknown) = sel.iter().find(|s| !available.contains(s)) {
                return Err(ExportError::UnknownField(unknown.clone()));
            }
            sel.to_vec()
        }
        None => available,
    };

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&columns)?;
    for record in records {
        wtr.write_record(columns.iter().map(|c| cell(record, c)))?;
    }
    let bytes = wtr
        .into_inner()
        .map_err(|e| ExportError::Csv(csv::Error::from(e.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn save_csv(
    records: &[VehicleRecord],
    selection: Option<&[String]>,
    path: &Path,
) -> Result<(), ExportError> {
    let text = export_csv(records, selection)?;
    write_file(path, &text)
}

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize records to pretty JSON (array of records, input order).
pub fn export_json(records: &[VehicleRecord]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(records)?)
}

pub fn save_json(records: &[VehicleRecord], path: &Path) -> Result<(), ExportError> {
    let text = export_json(records)?;
    write_file(path, &text)
}

fn write_file(path: &Path, contents: &str) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, contents).map_err(io_err)?;
    tracing::info!(path = %path.display(), "wrote export");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlab_core::data::FuelEconomyMatch;
    use fleetlab_core::domain::{FieldMap, MatchConfidence, Vin, VinError};
    use fleetlab_core::matching::MatchLevel;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn map(v: Value) -> FieldMap {
        v.as_object().unwrap().clone()
    }

    fn enriched() -> VehicleRecord {
        let vin = Vin::parse("1FTFW1ET1EFA00001").unwrap();
        let user = BTreeMap::from([("Unit".to_string(), "101".to_string())]);
        let mut rec = VehicleRecord::new(&vin, user);
        rec.apply_decode(
            "nhtsa",
            Ok(map(json!({"ModelYear": "2014", "Make": "FORD", "Model": "F-150"}))),
        );
        rec.apply_fuel_economy(
            "fe",
            Ok(FuelEconomyMatch {
                vehicle_id: "34567".into(),
                description: "F-150 Auto 6-spd, 8 cyl, 5.0 L".into(),
                confidence: MatchConfidence::Exact,
                level: MatchLevel::Exact,
                fields: map(json!({"combined_mpg": 18, "fuelType": "Regular"})),
            }),
        );
        rec
    }

    fn rejected() -> VehicleRecord {
        VehicleRecord::rejected("BADVIN", BTreeMap::new(), &VinError::WrongLength { found: 6 })
    }

    #[test]
    fn available_fields_are_ordered_and_unique() {
        let fields = available_fields(&[enriched(), rejected(), enriched()]);
        assert_eq!(&fields[..4], &["VIN", "Status", "Match Confidence", "Errors"]);
        assert!(fields.contains(&"Unit".to_string()));
        assert!(fields.contains(&"decoded.Make".to_string()));
        assert!(fields.contains(&"fuel.combined_mpg".to_string()));
        let unique: HashSet<_> = fields.iter().collect();
        assert_eq!(unique.len(), fields.len());
        let unit = fields.iter().position(|f| f == "Unit").unwrap();
        let decoded = fields.iter().position(|f| f == "decoded.Make").unwrap();
        assert!(unit < decoded);
    }

    #[test]
    fn csv_has_all_columns_and_values() {
        let text = export_csv(&[enriched(), rejected()], None).unwrap();
        let mut rdr = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);

        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
        assert_eq!(&rows[0][col("Status")], "ENRICHED");
        assert_eq!(&rows[0][col("Match Confidence")], "EXACT");
        assert_eq!(&rows[0][col("fuel.combined_mpg")], "18");
        assert_eq!(&rows[0][col("Assumed Vehicle ID")], "34567");
        assert_eq!(&rows[1][col("VIN")], "BADVIN");
        assert_eq!(&rows[1][col("Status")], "FAILED");
        assert!(rows[1][col("Errors")].starts_with("INVALID_VIN"));
        assert_eq!(&rows[1][col("decoded.Make")], "");
    }

    #[test]
    fn csv_selection_restricts_and_orders() {
        let sel = vec!["fuel.combined_mpg".to_string(), "VIN".to_string()];
        let text = export_csv(&[enriched()], Some(&sel)).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("fuel.combined_mpg,VIN"));
        assert_eq!(lines.next(), Some("18,1FTFW1ET1EFA00001"));
    }

    #[test]
    fn csv_selection_rejects_unknown_field() {
        let sel = vec!["fuel.nope".to_string()];
        let err = export_csv(&[enriched()], Some(&sel)).unwrap_err();
        assert!(matches!(err, ExportError::UnknownField(f) if f == "fuel.nope"));
    }

    #[test]
    fn clashing_user_column_is_namespaced() {
        let vin = Vin::parse("1FTFW1ET1EFA00001").unwrap();
        let user = BTreeMap::from([
            ("Status".to_string(), "Active".to_string()),
            ("Unit".to_string(), "101".to_string()),
        ]);
        let rec = VehicleRecord::new(&vin, user);

        let text = export_csv(&[rec], None).unwrap();
        let mut rdr = csv::Reader::from_reader(text.as_bytes());
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        let row = rdr.records().next().unwrap().unwrap();
        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();

        assert_eq!(headers.iter().filter(|h| *h == "Status").count(), 1);
        assert_eq!(&row[col("Status")], "PENDING");
        assert_eq!(&row[col("user.Status")], "Active");
        assert_eq!(&row[col("Unit")], "101");
    }

    #[test]
    fn selection_is_checked_against_input_columns() {
        let rows = vec![InputRow::new("1FTFW1ET1EFA00001")
            .with_field("Unit", "101")
            .with_field("Status", "Active")];
        let ok = ["VIN", "Unit", "user.Status", "decoded.Make", "fuel.combined_mpg"]
            .map(String::from);
        assert!(check_selection(&rows, &ok).is_ok());

        let typo = ["VIN", "Unti"].map(String::from);
        let err = check_selection(&rows, &typo).unwrap_err();
        assert!(matches!(err, ExportError::UnknownField(f) if f == "Unti"));
    }

    #[test]
    fn json_is_an_array_in_order() {
        let text = export_json(&[rejected(), enriched()]).unwrap();
        let v: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v[0]["vin"], "BADVIN");
        assert_eq!(v[1]["status"], "ENRICHED");
        assert_eq!(v[1]["fuel_economy_fields"]["combined_mpg"], 18);
    }

    #[test]
    fn saves_files_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("out/enriched.csv");
        let json_path = dir.path().join("out/enriched.json");
        save_csv(&[enriched()], None, &csv_path).unwrap();
        save_json(&[enriched()], &json_path).unwrap();
        assert!(std::fs::read_to_string(csv_path).unwrap().starts_with("VIN,Status"));
        assert!(std::fs::read_to_string(json_path).unwrap().starts_with('['));
    }
}
