//! FleetLab Runner — batch enrichment, configuration, input and export.
//!
//! This crate builds on `fleetlab-core` to provide:
//! - TOML configuration with defaults for every setting
//! - CSV input with VIN column detection
//! - The bounded-parallelism enrichment pipeline with an optional deadline
//! - Batch summaries
//! - Electrification savings and emissions inventory over enriched records
//! - CSV and JSON export with field selection

pub mod analysis;
pub mod config;
pub mod export;
pub mod input;
pub mod pipeline;
pub mod summary;

pub use analysis::{
    annual_co2_tons, annual_ev_cost, annual_fuel_cost, electrification_savings,
    emissions_reduction, ev_co2_tons, ev_roi, ElectrificationSavings, EmissionsInventory, EvRoi,
    FleetAnalysis, VehicleProfile,
};
pub use config::{
    AnalysisConfig, ApiConfig, CacheConfig, ConfigError, EnrichConfig, PipelineConfig,
    RetryConfig,
};
pub use export::{
    available_fields, check_selection, export_csv, export_json, save_csv, save_json, ExportError,
};
pub use input::{find_vin_column, read_rows, read_rows_from_reader, InputError};
pub use pipeline::{EnrichError, Enricher, ProcessOptions};
pub use summary::BatchSummary;
