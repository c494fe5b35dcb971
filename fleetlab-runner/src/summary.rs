//! Batch summary: counts by status, confidence, make and error kind, plus
//! the optional electrification and emissions analysis.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use fleetlab_core::domain::{
    field_str, EnrichmentStatus, MatchConfidence, RecordErrorKind, VehicleRecord,
};

use crate::analysis::{EmissionsInventory, FleetAnalysis};
use crate::config::AnalysisConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub enriched: usize,
    pub partial: usize,
    pub failed: usize,
    pub exact_matches: usize,
    pub fuzzy_matches: usize,
    pub by_make: BTreeMap<String, usize>,
    pub errors_by_kind: BTreeMap<RecordErrorKind, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub electrification: Option<FleetAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emissions: Option<EmissionsInventory>,
}

impl BatchSummary {
    pub fn from_records(records: &[VehicleRecord]) -> Self {
        let mut summary = Self {
            total: records.len(),
            ..Self::default()
        };

        for record in records {
            match record.status() {
                EnrichmentStatus::Enriched => summary.enriched += 1,
                EnrichmentStatus::Partial => summary.partial += 1,
                EnrichmentStatus::Failed => summary.failed += 1,
                EnrichmentStatus::Pending => {}
            }
            match record.match_confidence() {
                MatchConfidence::Exact => summary.exact_matches += 1,
                MatchConfidence::Fuzzy => summary.fuzzy_matches += 1,
                MatchConfidence::None => {}
            }
            if let Some(make) = field_str(record.decoded_fields(), &["make"]) {
                *summary.by_make.entry(title_case(&make)).or_default() += 1;
            }
            for err in record.errors() {
                *summary.errors_by_kind.entry(err.kind).or_default() += 1;
            }
        }
        summary
    }

    /// Attach fleet electrification and emissions figures.
    pub fn with_analysis(mut self, records: &[VehicleRecord], config: &AnalysisConfig) -> Self {
        self.electrification = Some(FleetAnalysis::compute(records, config));
        self.emissions = Some(EmissionsInventory::compute(records, config));
        self
    }

    /// Fraction of rows that were fully enriched.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.enriched as f64 / self.total as f64
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// "FORD" and "ford" both count as "Ford".
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Vehicles: {} ({} enriched, {} partial, {} failed; {:.1}% success)",
            self.total,
            self.enriched,
            self.partial,
            self.failed,
            self.success_rate() * 100.0
        )?;
        writeln!(
            f,
            "Matches:  {} exact, {} fuzzy",
            self.exact_matches, self.fuzzy_matches
        )?;
        if !self.by_make.is_empty() {
            let makes: Vec<String> = self
                .by_make
                .iter()
                .map(|(make, n)| format!("{make} {n}"))
                .collect();
            writeln!(f, "Makes:    {}", makes.join(", "))?;
        }
        if !self.errors_by_kind.is_empty() {
            let kinds: Vec<String> = self
                .errors_by_kind
                .iter()
                .map(|(kind, n)| format!("{kind} {n}"))
                .collect();
            writeln!(f, "Errors:   {}", kinds.join(", "))?;
        }
        if let Some(fleet) = self.electrification.as_ref().filter(|a| a.vehicles_analyzed > 0) {
            writeln!(
                f,
                "Fuel:     ${:.0}/yr gasoline vs ${:.0}/yr electric ({} vehicles)",
                fleet.annual_fuel_cost, fleet.annual_ev_cost, fleet.vehicles_analyzed
            )?;
            let payback = fleet
                .payback_years
                .map(|y| format!("{y:.1} years"))
                .unwrap_or_else(|| "never".to_string());
            writeln!(
                f,
                "Savings:  ${:.0} NPV, {:.1} t CO2 avoided, payback {payback}",
                fleet.total_npv_savings, fleet.total_co2_reduction
            )?;
        }
        if let Some(inventory) = self.emissions.as_ref().filter(|e| e.vehicles > 0) {
            writeln!(
                f,
                "CO2:      {:.1} t/yr across {} vehicles",
                inventory.total_tons, inventory.vehicles
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlab_core::domain::{Vin, VinError};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn decoded(make: &str) -> VehicleRecord {
        let vin = Vin::parse("1FTFW1ET1EFA00001").unwrap();
        let mut rec = VehicleRecord::new(&vin, BTreeMap::new());
        let fields = json!({"ModelYear": "2014", "Make": make, "Model": "F-150"});
        rec.apply_decode("vin", Ok(fields.as_object().unwrap().clone()));
        rec
    }

    #[test]
    fn counts_statuses_makes_and_errors() {
        let rejected = VehicleRecord::rejected(
            "BADVIN",
            BTreeMap::new(),
            &VinError::WrongLength { found: 6 },
        );
        let records = vec![decoded("FORD"), decoded("ford"), rejected];
        let s = BatchSummary::from_records(&records);

        assert_eq!(s.total, 3);
        assert_eq!(s.partial, 2);
        assert_eq!(s.failed, 1);
        assert_eq!(s.by_make.get("Ford"), Some(&2));
        assert_eq!(s.errors_by_kind.get(&RecordErrorKind::InvalidVin), Some(&1));
        assert!(s.has_failures());
        assert_eq!(s.success_rate(), 0.0);
    }

    #[test]
    fn empty_batch() {
        let s = BatchSummary::from_records(&[]);
        assert_eq!(s.total, 0);
        assert_eq!(s.success_rate(), 0.0);
        assert!(!s.has_failures());
    }

    #[test]
    fn display_lists_makes() {
        let s = BatchSummary::from_records(&[decoded("Chevrolet")]);
        let text = s.to_string();
        assert!(text.contains("Vehicles: 1"));
        assert!(text.contains("Chevrolet 1"));
    }

    #[test]
    fn analysis_is_attached_and_displayed() {
        use fleetlab_core::data::FuelEconomyMatch;
        use fleetlab_core::domain::MatchConfidence;
        use fleetlab_core::matching::MatchLevel;

        let mut rec = decoded("FORD");
        rec.apply_fuel_economy(
            "fe",
            Ok(FuelEconomyMatch {
                vehicle_id: "34567".into(),
                description: "F-150".into(),
                confidence: MatchConfidence::Exact,
                level: MatchLevel::Exact,
                fields: json!({"combined_mpg": 18}).as_object().unwrap().clone(),
            }),
        );
        let records = vec![rec];
        let s = BatchSummary::from_records(&records)
            .with_analysis(&records, &AnalysisConfig::default());

        let fleet = s.electrification.as_ref().unwrap();
        assert_eq!(fleet.vehicles_analyzed, 1);
        assert_eq!(s.emissions.as_ref().unwrap().vehicles, 1);
        let text = s.to_string();
        assert!(text.contains("$2333/yr gasoline vs $468/yr electric (1 vehicles)"));
        assert!(text.contains("CO2:      5.9 t/yr across 1 vehicles"));
    }

    #[test]
    fn title_cases_makes() {
        assert_eq!(title_case("MERCEDES-BENZ"), "Mercedes-benz");
        assert_eq!(title_case("land rover"), "Land Rover");
    }
}
