//! FleetLab Core — vehicle domain types, response cache, provider clients.
//!
//! This crate contains everything below the batch pipeline:
//! - Domain types (VIN, input rows, vehicle records, record errors)
//! - Thread-safe TTL response cache shared by all provider clients
//! - Upstream source traits with NHTSA vPIC and FuelEconomy.gov implementations
//! - Caching clients with retry, rate limiting and circuit breaking
//! - Fuel-economy matching policy (relaxation ladder and tie-break)

pub mod data;
pub mod domain;
pub mod matching;
