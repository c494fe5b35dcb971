//! Electrification and emissions analysis over enriched records.
//!
//! Per-vehicle figures are pure functions of combined MPG, tailpipe CO2,
//! annual mileage and the `[analysis]` assumptions. Fleet figures fold them
//! over a batch. Records without fuel-economy data are skipped.

use serde::Serialize;
use std::collections::BTreeMap;

use fleetlab_core::domain::{field_str, FieldMap, VehicleRecord};

use crate::config::AnalysisConfig;

/// Grams of CO2 per gallon of gasoline, used when the catalogue has no
/// tailpipe figure.
const GASOLINE_CO2_GRAMS_PER_GALLON: f64 = 8_900.0;

const MPG_KEYS: &[&str] = &["comb08", "combined_mpg"];
const CO2_KEYS: &[&str] = &["co2TailpipeGpm", "co2"];
const MILEAGE_KEYS: &[&str] = &["Annual Mileage", "annual_mileage", "AnnualMileage"];
const DEPARTMENT_KEYS: &[&str] = &["Department", "Dept"];
const BODY_CLASS_KEYS: &[&str] = &["BodyClass", "body_class"];
const FUEL_TYPE_KEYS: &[&str] = &["FuelTypePrimary", "fuelType", "fuel_type"];

// ─── Inputs ─────────────────────────────────────────────────────────

/// The analysis inputs of one enriched vehicle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleProfile {
    pub vin: String,
    pub combined_mpg: Option<f64>,
    /// Tailpipe CO2, g/mile, when the catalogue lists it.
    pub co2_grams_per_mile: Option<f64>,
    pub annual_mileage: f64,
    pub department: String,
    pub body_class: String,
    pub fuel_type: String,
}

impl VehicleProfile {
    /// `None` when the record has neither MPG nor CO2 data.
    pub fn from_record(record: &VehicleRecord, default_mileage: f64) -> Option<Self> {
        let fuel = record.fuel_economy_fields();
        let combined_mpg = positive_number(fuel, MPG_KEYS);
        let co2_grams_per_mile = positive_number(fuel, CO2_KEYS);
        if combined_mpg.is_none() && co2_grams_per_mile.is_none() {
            return None;
        }

        let annual_mileage = user_value(record, MILEAGE_KEYS)
            .and_then(|s| s.replace(',', "").parse::<f64>().ok())
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(default_mileage);

        Some(Self {
            vin: record.vin().to_string(),
            combined_mpg,
            co2_grams_per_mile,
            annual_mileage,
            department: user_value(record, DEPARTMENT_KEYS)
                .unwrap_or_else(|| "Unassigned".to_string()),
            body_class: field_str(record.decoded_fields(), BODY_CLASS_KEYS)
                .unwrap_or_else(|| "Unknown".to_string()),
            fuel_type: field_str(record.decoded_fields(), FUEL_TYPE_KEYS)
                .or_else(|| field_str(fuel, FUEL_TYPE_KEYS))
                .unwrap_or_else(|| "Unknown".to_string()),
        })
    }
}

fn positive_number(map: &FieldMap, keys: &[&str]) -> Option<f64> {
    field_str(map, keys)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn user_value(record: &VehicleRecord, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        record
            .user_fields()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

// ─── Per-vehicle functions ──────────────────────────────────────────

/// Annual gasoline cost in dollars. 0.0 without a usable MPG.
pub fn annual_fuel_cost(combined_mpg: f64, annual_mileage: f64, gas_price: f64) -> f64 {
    if combined_mpg <= 0.0 {
        return 0.0;
    }
    annual_mileage / combined_mpg * gas_price
}

/// Annual electricity cost in dollars if the vehicle were electric.
pub fn annual_ev_cost(annual_mileage: f64, electricity_price: f64, ev_efficiency: f64) -> f64 {
    annual_mileage * ev_efficiency * electricity_price
}

/// Annual tailpipe CO2 in metric tons.
///
/// Uses the catalogue's g/mile figure, else estimates it from MPG.
pub fn annual_co2_tons(
    co2_grams_per_mile: Option<f64>,
    combined_mpg: Option<f64>,
    annual_mileage: f64,
) -> f64 {
    let per_mile = match (co2_grams_per_mile, combined_mpg) {
        (Some(g), _) if g > 0.0 => g,
        (_, Some(mpg)) if mpg > 0.0 => GASOLINE_CO2_GRAMS_PER_GALLON / mpg,
        _ => return 0.0,
    };
    per_mile * annual_mileage / 1_000_000.0
}

/// Annual CO2 from grid electricity in metric tons.
pub fn ev_co2_tons(annual_mileage: f64, ev_efficiency: f64, grid_intensity: f64) -> f64 {
    annual_mileage * ev_efficiency * grid_intensity / 1_000.0
}

/// Annual CO2 avoided by electrifying, never negative.
pub fn emissions_reduction(profile: &VehicleProfile, config: &AnalysisConfig) -> f64 {
    let current = annual_co2_tons(
        profile.co2_grams_per_mile,
        profile.combined_mpg,
        profile.annual_mileage,
    );
    let electric = ev_co2_tons(
        profile.annual_mileage,
        config.ev_efficiency,
        config.grid_intensity,
    );
    (current - electric).max(0.0)
}

/// Savings from replacing one vehicle with an EV.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElectrificationSavings {
    pub annual_fuel_savings: f64,
    pub total_fuel_savings: f64,
    pub annual_maintenance_savings: f64,
    pub total_maintenance_savings: f64,
    /// Fuel plus maintenance savings, discounted at `discount_rate`.
    pub total_npv_savings: f64,
    pub annual_co2_reduction: f64,
    pub total_co2_reduction: f64,
}

/// Savings over `analysis_years`, with EV energy use rising by
/// `battery_degradation` percent per year.
pub fn electrification_savings(
    profile: &VehicleProfile,
    config: &AnalysisConfig,
) -> ElectrificationSavings {
    let mileage = profile.annual_mileage;
    let mpg = profile.combined_mpg.unwrap_or(0.0);
    let ice_fuel = annual_fuel_cost(mpg, mileage, config.gas_price);
    let ev_fuel = annual_ev_cost(mileage, config.electricity_price, config.ev_efficiency);
    let annual_maintenance = mileage * (config.ice_maintenance - config.ev_maintenance);
    let annual_co2 = emissions_reduction(profile, config);

    let mut savings = ElectrificationSavings {
        annual_fuel_savings: ice_fuel - ev_fuel,
        annual_maintenance_savings: annual_maintenance,
        annual_co2_reduction: annual_co2,
        ..ElectrificationSavings::default()
    };

    let discount = 1.0 + config.discount_rate / 100.0;
    for year in 1..=config.analysis_years {
        let degraded = config.ev_efficiency
            * (1.0 + config.battery_degradation / 100.0 * f64::from(year - 1));
        let year_fuel = ice_fuel - mileage * degraded * config.electricity_price;

        savings.total_fuel_savings += year_fuel;
        savings.total_maintenance_savings += annual_maintenance;
        savings.total_co2_reduction += annual_co2;
        savings.total_npv_savings += (year_fuel + annual_maintenance) / discount.powi(year as i32);
    }
    savings
}

/// Return on replacing one vehicle with an EV at the given prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvRoi {
    pub price_premium: f64,
    pub annual_savings: f64,
    /// `None` when the EV never pays back.
    pub payback_years: Option<f64>,
    /// NPV savings over the premium, percent. `None` when there is no premium.
    pub roi_percent: Option<f64>,
    /// ICE purchase price plus the operating savings it forgoes.
    pub ice_tco: f64,
    pub ev_tco: f64,
    pub tco_savings: f64,
    pub co2_reduction: f64,
}

pub fn ev_roi(
    profile: &VehicleProfile,
    ev_price: f64,
    ice_price: f64,
    config: &AnalysisConfig,
) -> EvRoi {
    let savings = electrification_savings(profile, config);
    let price_premium = ev_price - ice_price;
    let annual_savings = savings.annual_fuel_savings + savings.annual_maintenance_savings;
    let ice_tco = ice_price + annual_savings * f64::from(config.analysis_years);

    EvRoi {
        price_premium,
        annual_savings,
        payback_years: (annual_savings > 0.0).then(|| price_premium / annual_savings),
        roi_percent: (price_premium > 0.0)
            .then(|| savings.total_npv_savings / price_premium * 100.0),
        ice_tco,
        ev_tco: ev_price,
        tco_savings: ice_tco - ev_price,
        co2_reduction: savings.total_co2_reduction,
    }
}

// ─── Fleet ──────────────────────────────────────────────────────────

/// Electrification totals for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetAnalysis {
    /// Vehicles with a usable MPG.
    pub vehicles_analyzed: usize,
    pub annual_fuel_cost: f64,
    pub annual_ev_cost: f64,
    pub total_fuel_savings: f64,
    pub total_maintenance_savings: f64,
    pub total_npv_savings: f64,
    pub total_co2_reduction: f64,
    /// Simple payback of `ev_premium` per analyzed vehicle. `None` when the
    /// fleet never pays back.
    pub payback_years: Option<f64>,
    /// VINs by NPV savings, largest first.
    pub prioritized: Vec<String>,
}

impl FleetAnalysis {
    pub fn compute(records: &[VehicleRecord], config: &AnalysisConfig) -> Self {
        let mut fleet = Self::default();
        let mut ranked: Vec<(String, f64)> = Vec::new();

        for profile in records
            .iter()
            .filter_map(|r| VehicleProfile::from_record(r, config.annual_mileage))
        {
            let Some(mpg) = profile.combined_mpg else {
                continue;
            };
            let savings = electrification_savings(&profile, config);

            fleet.vehicles_analyzed += 1;
            fleet.annual_fuel_cost +=
                annual_fuel_cost(mpg, profile.annual_mileage, config.gas_price);
            fleet.annual_ev_cost += annual_ev_cost(
                profile.annual_mileage,
                config.electricity_price,
                config.ev_efficiency,
            );
            fleet.total_fuel_savings += savings.total_fuel_savings;
            fleet.total_maintenance_savings += savings.total_maintenance_savings;
            fleet.total_npv_savings += savings.total_npv_savings;
            fleet.total_co2_reduction += savings.total_co2_reduction;
            ranked.push((profile.vin, savings.total_npv_savings));
        }

        // stable sort keeps input order among equal savings
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        fleet.prioritized = ranked.into_iter().map(|(vin, _)| vin).collect();

        let years = f64::from(config.analysis_years);
        let annual_savings = (fleet.total_fuel_savings + fleet.total_maintenance_savings) / years;
        if fleet.total_npv_savings > 0.0 && annual_savings > 0.0 {
            let premium = fleet.vehicles_analyzed as f64 * config.ev_premium;
            fleet.payback_years = Some(premium / annual_savings);
        }
        fleet
    }
}

/// Annual tailpipe CO2 of a batch, in metric tons, with breakdowns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmissionsInventory {
    pub vehicles: usize,
    pub total_tons: f64,
    pub by_department: BTreeMap<String, f64>,
    pub by_vehicle_type: BTreeMap<String, f64>,
    pub by_fuel_type: BTreeMap<String, f64>,
}

impl EmissionsInventory {
    pub fn compute(records: &[VehicleRecord], config: &AnalysisConfig) -> Self {
        let mut inventory = Self::default();
        for profile in records
            .iter()
            .filter_map(|r| VehicleProfile::from_record(r, config.annual_mileage))
        {
            let tons = annual_co2_tons(
                profile.co2_grams_per_mile,
                profile.combined_mpg,
                profile.annual_mileage,
            );
            if tons <= 0.0 {
                continue;
            }
            inventory.vehicles += 1;
            inventory.total_tons += tons;
            *inventory.by_department.entry(profile.department).or_default() += tons;
            *inventory.by_vehicle_type.entry(profile.body_class).or_default() += tons;
            *inventory.by_fuel_type.entry(profile.fuel_type).or_default() += tons;
        }
        inventory
    }
}
