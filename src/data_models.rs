use crate::season::Season;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Literal provenance marker for values that no source column supplied.
pub const IMPUTED_MARKER: &str = "Imputed";

pub const SITE_ID: &str = "site_id";
pub const ROW_ID: &str = "row_id";
pub const MEASURED_ON: &str = "measured_on";
pub const LATITUDE: &str = "latitude";
pub const ELEVATION: &str = "elevation";
pub const DISTANCE_TO_WATER: &str = "distance_to_water_m";
pub const SEASON: &str = "season";
pub const WATER_BODY_TYPE: &str = "water_body_type";
pub const BANK_MATERIAL: &str = "bank_material";
pub const BEDROCK: &str = "bedrock";
pub const WATER_BODY_SOURCE: &str = "water_body_source";
pub const FRESHWATER_HABITATS: &str = "freshwater_habitats";
pub const SALTWATER_HABITATS: &str = "saltwater_habitats";
pub const TRANSPARENCY_SOURCE: &str = "transparency_tube_cm";
pub const IMAGE_DISAPPEARED: &str = "transparency_image_disappeared";
pub const TRANSPARENCY: &str = "transparency";
pub const SATURATION: &str = "transparency_saturation";

/// One raw alternative column and the method label it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceColumn {
    pub column: &'static str,
    pub method: &'static str,
}

/// Water-quality variables reconciled from alternative source columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    Alkalinity,
    Conductivity,
    DissolvedOxygen,
    Nitrate,
    Ph,
    Salinity,
    WaterTemperature,
}

impl Variable {
    pub const ALL: [Variable; 7] = [
        Variable::Alkalinity,
        Variable::Conductivity,
        Variable::DissolvedOxygen,
        Variable::Nitrate,
        Variable::Ph,
        Variable::Salinity,
        Variable::WaterTemperature,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Variable::Alkalinity => "alkalinity",
            Variable::Conductivity => "conductivity",
            Variable::DissolvedOxygen => "dissolved_oxygen",
            Variable::Nitrate => "nitrate",
            Variable::Ph => "ph",
            Variable::Salinity => "salinity",
            Variable::WaterTemperature => "water_temperature",
        }
    }

    pub fn method_column(self) -> String {
        format!("{}_method", self.name())
    }

    /// Source columns in precedence order: the first is preferred, the second is the fallback.
    pub fn sources(self) -> [SourceColumn; 2] {
        let source = |column: &'static str, method: &'static str| SourceColumn { column, method };
        match self {
            Variable::Alkalinity => [
                source("alkalinity_direct_mgl", "direct"),
                source("alkalinity_drop_count_mgl", "drop count"),
            ],
            Variable::Conductivity => [
                source("conductivity_meter_uscm", "meter"),
                source("conductivity_probe_uscm", "probe"),
            ],
            Variable::DissolvedOxygen => [
                source("dissolved_oxygen_kit_mgl", "kit"),
                source("dissolved_oxygen_probe_mgl", "probe"),
            ],
            Variable::Nitrate => [
                source("nitrate_kit_mgl", "kit"),
                source("nitrate_strip_mgl", "strip"),
            ],
            Variable::Ph => [source("ph_meter", "meter"), source("ph_paper", "paper")],
            Variable::Salinity => [
                source("salinity_hydrometer_ppt", "hydrometer"),
                source("salinity_refractometer_ppt", "refractometer"),
            ],
            Variable::WaterTemperature => [
                source("water_temp_probe_c", "probe"),
                source("water_temp_thermometer_c", "thermometer"),
            ],
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every header the input file must carry.
pub fn required_columns() -> Vec<&'static str> {
    let mut columns = vec![
        SITE_ID,
        MEASURED_ON,
        LATITUDE,
        ELEVATION,
        DISTANCE_TO_WATER,
        WATER_BODY_TYPE,
        BANK_MATERIAL,
        BEDROCK,
        WATER_BODY_SOURCE,
        FRESHWATER_HABITATS,
        SALTWATER_HABITATS,
    ];
    for var in Variable::ALL {
        columns.extend(var.sources().iter().map(|s| s.column));
    }
    columns.push(TRANSPARENCY_SOURCE);
    columns.push(IMAGE_DISAPPEARED);
    columns
}

/// A row exactly as it appears in the input file. Every cell is kept as text;
/// typing happens in the parser so null markers stay configurable.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRecord {
    pub site_id: Option<String>,
    pub measured_on: Option<String>,
    pub latitude: Option<String>,
    pub elevation: Option<String>,
    pub distance_to_water_m: Option<String>,
    pub water_body_type: Option<String>,
    pub bank_material: Option<String>,
    pub bedrock: Option<String>,
    pub water_body_source: Option<String>,
    pub freshwater_habitats: Option<String>,
    pub saltwater_habitats: Option<String>,
    pub alkalinity_direct_mgl: Option<String>,
    pub alkalinity_drop_count_mgl: Option<String>,
    pub conductivity_meter_uscm: Option<String>,
    pub conductivity_probe_uscm: Option<String>,
    pub dissolved_oxygen_kit_mgl: Option<String>,
    pub dissolved_oxygen_probe_mgl: Option<String>,
    pub nitrate_kit_mgl: Option<String>,
    pub nitrate_strip_mgl: Option<String>,
    pub ph_meter: Option<String>,
    pub ph_paper: Option<String>,
    pub salinity_hydrometer_ppt: Option<String>,
    pub salinity_refractometer_ppt: Option<String>,
    pub water_temp_probe_c: Option<String>,
    pub water_temp_thermometer_c: Option<String>,
    pub transparency_tube_cm: Option<String>,
    pub transparency_image_disappeared: Option<String>,
}

impl RawRecord {
    /// Raw text of a measurement alternative column.
    pub fn alternative(&self, column: &str) -> Option<&str> {
        let cell = match column {
            "alkalinity_direct_mgl" => &self.alkalinity_direct_mgl,
            "alkalinity_drop_count_mgl" => &self.alkalinity_drop_count_mgl,
            "conductivity_meter_uscm" => &self.conductivity_meter_uscm,
            "conductivity_probe_uscm" => &self.conductivity_probe_uscm,
            "dissolved_oxygen_kit_mgl" => &self.dissolved_oxygen_kit_mgl,
            "dissolved_oxygen_probe_mgl" => &self.dissolved_oxygen_probe_mgl,
            "nitrate_kit_mgl" => &self.nitrate_kit_mgl,
            "nitrate_strip_mgl" => &self.nitrate_strip_mgl,
            "ph_meter" => &self.ph_meter,
            "ph_paper" => &self.ph_paper,
            "salinity_hydrometer_ppt" => &self.salinity_hydrometer_ppt,
            "salinity_refractometer_ppt" => &self.salinity_refractometer_ppt,
            "water_temp_probe_c" => &self.water_temp_probe_c,
            "water_temp_thermometer_c" => &self.water_temp_thermometer_c,
            _ => return None,
        };
        cell.as_deref()
    }
}

/// A typed input row: numbers parsed, null markers resolved, nothing reconciled yet.
#[derive(Debug, Clone)]
pub struct InputRecord {
    /// Zero-based data row index; becomes the observation's row identity.
    pub row_id: usize,
    pub site_id: String,
    pub measured_on: NaiveDate,
    pub latitude: Option<f64>,
    pub elevation: Option<f64>,
    pub distance_to_water_m: Option<f64>,
    pub water_body_type: Option<String>,
    pub bank_material: Option<String>,
    pub bedrock: Option<String>,
    pub water_body_source: Option<String>,
    pub freshwater_habitats: Option<String>,
    pub saltwater_habitats: Option<String>,
    /// Alternatives per variable, indexed by `Variable::index`, in precedence order.
    pub alternatives: [[Option<f64>; 2]; 7],
    pub transparency_tube_cm: Option<f64>,
    pub image_disappeared: Option<bool>,
}

impl InputRecord {
    pub fn alternatives_for(&self, var: Variable) -> [Option<f64>; 2] {
        self.alternatives[var.index()]
    }
}

/// How a canonical value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Source(&'static str),
    Imputed,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Source(label) => *label,
            Method::Imputed => IMPUTED_MARKER,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub value: Option<f64>,
    pub method: Method,
}

impl Measurement {
    pub fn missing() -> Self {
        Self {
            value: None,
            method: Method::Imputed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Saturation {
    #[serde(rename = "saturated")]
    Saturated,
    #[serde(rename = "not-saturated")]
    NotSaturated,
}

impl Saturation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Saturation::Saturated => "saturated",
            Saturation::NotSaturated => "not-saturated",
        }
    }

    pub fn is_saturated(&self) -> bool {
        matches!(self, Saturation::Saturated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HabitatFlag {
    Yes,
    No,
    Unknown,
}

impl HabitatFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            HabitatFlag::Yes => "Yes",
            HabitatFlag::No => "No",
            HabitatFlag::Unknown => "Unknown",
        }
    }
}

/// A reconciled site visit.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub row_id: usize,
    pub site_id: String,
    pub measured_on: NaiveDate,
    /// Absolute latitude; the hemisphere is already folded into `season`.
    pub latitude: f64,
    pub elevation: f64,
    pub distance_to_water_m: Option<f64>,
    pub season: Season,
    pub water_body_type: Option<String>,
    pub bank_material: Option<String>,
    pub bedrock: Option<String>,
    pub water_body_source: Option<String>,
    pub measurements: [Measurement; 7],
    /// Inverse of the tube reading: larger means clearer water.
    pub transparency: f64,
    pub saturation: Saturation,
    pub freshwater_habitats: Vec<String>,
    pub saltwater_habitats: Vec<String>,
    /// `has_<slug>` -> flag, filled by habitat expansion.
    pub habitats: BTreeMap<String, HabitatFlag>,
}

impl Observation {
    pub fn measurement(&self, var: Variable) -> &Measurement {
        &self.measurements[var.index()]
    }

    pub fn measurement_mut(&mut self, var: Variable) -> &mut Measurement {
        &mut self.measurements[var.index()]
    }

    /// Partition key for stratified imputation.
    pub fn partition_key(&self) -> &str {
        self.water_body_type.as_deref().unwrap_or("unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_columns_cover_every_alternative() {
        let columns = required_columns();
        for var in Variable::ALL {
            for source in var.sources() {
                assert!(columns.contains(&source.column), "{} missing", source.column);
            }
        }
        assert!(columns.contains(&TRANSPARENCY_SOURCE));
        assert_eq!(columns.len(), 11 + 14 + 2);
    }

    #[test]
    fn every_alternative_column_is_addressable() {
        let raw = RawRecord {
            ph_paper: Some("6.5".into()),
            ..Default::default()
        };
        for var in Variable::ALL {
            for source in var.sources() {
                let value = raw.alternative(source.column);
                if source.column == "ph_paper" {
                    assert_eq!(value, Some("6.5"));
                } else {
                    assert_eq!(value, None);
                }
            }
        }
    }

    #[test]
    fn method_renders_marker() {
        assert_eq!(Method::Imputed.to_string(), IMPUTED_MARKER);
        assert_eq!(Method::Source("drop count").to_string(), "drop count");
        assert_eq!(Variable::DissolvedOxygen.method_column(), "dissolved_oxygen_method");
    }
}
