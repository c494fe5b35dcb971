//! CSV input: one row per vehicle, VIN column detected from the header.
//!
//! Every non-blank row is kept, including rows whose VIN is empty or
//! malformed, so that output rows line up with input rows. Non-VIN columns
//! are carried through verbatim as user fields.

use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

use fleetlab_core::domain::InputRow;

/// Header names recognised as the VIN column, in priority order.
pub const VIN_COLUMN_NAMES: &[&str] = &[
    "VIN",
    "VINs",
    "VIN Number",
    "Vehicle Identification Number",
];

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no VIN column found (headers: {})", .headers.join(", "))]
    NoVinColumn { headers: Vec<String> },
}

/// Index of the VIN column: exact name, then case-insensitive name, then
/// the first header containing "vin".
pub fn find_vin_column<S: AsRef<str>>(headers: &[S]) -> Option<usize> {
    let headers: Vec<&str> = headers.iter().map(|h| h.as_ref().trim()).collect();

    for name in VIN_COLUMN_NAMES {
        if let Some(i) = headers.iter().position(|h| h == name) {
            return Some(i);
        }
    }
    for name in VIN_COLUMN_NAMES {
        if let Some(i) = headers.iter().position(|h| h.eq_ignore_ascii_case(name)) {
            return Some(i);
        }
    }
    headers
        .iter()
        .position(|h| h.to_ascii_lowercase().contains("vin"))
}

/// Read input rows from a CSV file.
pub fn read_rows(path: &Path) -> Result<Vec<InputRow>, InputError> {
    let file = std::fs::File::open(path).map_err(|source| InputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rows = read_rows_from_reader(file)?;
    tracing::info!(path = %path.display(), rows = rows.len(), "read input rows");
    Ok(rows)
}

/// Read input rows from any CSV source.
pub fn read_rows_from_reader<R: Read>(reader: R) -> Result<Vec<InputRow>, InputError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let vin_idx = find_vin_column(&headers).ok_or_else(|| InputError::NoVinColumn {
        headers: headers.clone(),
    })?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        let mut row = InputRow::new(record.get(vin_idx).unwrap_or_default());
        for (i, name) in headers.iter().enumerate() {
            if i == vin_idx {
                continue;
            }
            row.fields
                .insert(name.clone(), record.get(i).unwrap_or_default().to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}
