use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field prefix on every Volve well bore name in the source dataset
const WELL_NAME_PREFIX: &str = "15/9-";

/// One hourly well reading as stored in the analytical source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Source timestamp (zone-less in the dataset, interpreted as UTC)
    pub original_time: DateTime<Utc>,
    /// Normalized well name, e.g. "F-11B"
    pub well_name: String,
    /// "OP" (producer) or "WI" (water injector)
    pub well_type: Option<String>,
    pub oil_rate: Option<f64>,
    pub gas_rate: Option<f64>,
    pub water_rate: Option<f64>,
    pub water_inj_rate: Option<f64>,
    pub on_stream_hrs: Option<f64>,
    pub downhole_pressure: Option<f64>,
    pub downhole_temperature: Option<f64>,
    pub dp_tubing: Option<f64>,
    pub annulus_pressure: Option<f64>,
    pub choke_size: Option<f64>,
    pub choke_size_uom: Option<String>,
    pub dp_choke_size: Option<f64>,
    /// Tubing head (wellhead) pressure
    pub thp: Option<f64>,
    /// Wellhead temperature
    pub wht: Option<f64>,
    pub flow_kind: Option<String>,
}

/// A source record shifted onto the wall clock, with derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    /// Wall-clock timestamp the reading is published under
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub source: SourceRecord,
    /// Gas-oil ratio
    pub gor: f64,
    pub watercut: f64,
    pub liquid_rate: Option<f64>,
}

impl SourceRecord {
    /// Attach the wall-clock time and compute derived metrics.
    pub fn into_mapped(self, time: DateTime<Utc>) -> MappedRecord {
        let gor = gas_oil_ratio(self.gas_rate, self.oil_rate);
        let watercut = watercut(self.water_rate, self.oil_rate);
        let liquid_rate = liquid_rate(self.oil_rate, self.water_rate);

        MappedRecord {
            time,
            source: self,
            gor,
            watercut,
            liquid_rate,
        }
    }
}

impl MappedRecord {
    pub fn original_time(&self) -> DateTime<Utc> {
        self.source.original_time
    }

    pub fn well_name(&self) -> &str {
        &self.source.well_name
    }
}

/// Strip the field prefix and internal spaces from a raw well bore name.
///
/// "15/9-F-11 B" becomes "F-11B", "15/9-F-4 AH" becomes "F-4AH".
pub fn normalize_well_name(raw: &str) -> String {
    raw.replace(WELL_NAME_PREFIX, "").replace(' ', "")
}

/// Gas over oil; 0 when there is no oil to divide by.
pub fn gas_oil_ratio(gas_rate: Option<f64>, oil_rate: Option<f64>) -> f64 {
    match (gas_rate, oil_rate) {
        (Some(gas), Some(oil)) => finite_or_zero(gas / oil),
        _ => 0.0,
    }
}

/// Water share of total liquid; 0 when there is no liquid.
pub fn watercut(water_rate: Option<f64>, oil_rate: Option<f64>) -> f64 {
    match (water_rate, oil_rate) {
        (Some(water), Some(oil)) => finite_or_zero(water / (water + oil)),
        _ => 0.0,
    }
}

pub fn liquid_rate(oil_rate: Option<f64>, water_rate: Option<f64>) -> Option<f64> {
    Some(oil_rate? + water_rate?)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
