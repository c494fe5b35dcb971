//! Domain types: VINs, input rows and enriched vehicle records.

pub mod record;
pub mod vin;

pub use record::{
    field_str, AssumedVehicle, EnrichmentStatus, FieldMap, InputRow, MatchConfidence,
    RecordError, RecordErrorKind, VehicleRecord,
};
pub use vin::{Vin, VinError, VIN_LENGTH};
