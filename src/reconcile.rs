//! Reconciliation of alternative measurement columns into canonical observations.

use crate::config::PipelineConfig;
use crate::data_models::{InputRecord, Measurement, Method, Observation, Saturation, Variable};
use crate::habitat;
use crate::metrics::METRICS;
use crate::season::season_for;
use crate::utils::{normalize_category, split_phrases};
use log::{info, warn};
use std::collections::BTreeMap;

/// Water-body source value that marks an unresolved record.
pub const INCONCLUSIVE_SOURCE: &str = "inconclusive";

/// Why an input row did not become an observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DropCounts {
    pub missing_geolocation: usize,
    pub inconclusive_source: usize,
    pub undefined_transparency: usize,
}

impl DropCounts {
    pub fn total(&self) -> usize {
        self.missing_geolocation + self.inconclusive_source + self.undefined_transparency
    }
}

/// Output of the reconciliation stage.
#[derive(Debug, Clone)]
pub struct ReconciledTable {
    pub observations: Vec<Observation>,
    /// Sorted habitat slugs observed anywhere in the input.
    pub habitat_phrases: Vec<String>,
    pub drops: DropCounts,
}

/// `1 / x` for finite positive `x`. Zero and non-finite inputs have no inverse.
pub fn invert_transparency(x: f64) -> Option<f64> {
    if x.is_finite() && x > 0.0 {
        let inv = 1.0 / x;
        inv.is_finite().then_some(inv)
    } else {
        None
    }
}

/// Takes the first present alternative in precedence order.
pub fn select_measurement(var: Variable, alternatives: [Option<f64>; 2]) -> Measurement {
    for (source, value) in var.sources().iter().zip(alternatives) {
        if let Some(v) = value {
            return Measurement {
                value: Some(v),
                method: Method::Source(source.method),
            };
        }
    }
    Measurement::missing()
}

/// A tube whose image never disappeared hit its ceiling. An absent flag is read as
/// "disappeared", i.e. an exact reading.
pub fn saturation_from_flag(image_disappeared: Option<bool>) -> Saturation {
    match image_disappeared {
        Some(false) => Saturation::Saturated,
        Some(true) | None => Saturation::NotSaturated,
    }
}

/// Reconciles one geolocated record. Returns `None` when the transparency has no inverse.
fn reconcile_record(
    config: &PipelineConfig,
    record: InputRecord,
    latitude: f64,
    elevation: f64,
) -> Option<Observation> {
    let transparency = record
        .transparency_tube_cm
        .map(f64::abs)
        .and_then(invert_transparency)?;

    let mut measurements = [Measurement::missing(); 7];
    for var in Variable::ALL {
        measurements[var.index()] = select_measurement(var, record.alternatives_for(var));
    }

    Some(Observation {
        row_id: record.row_id,
        season: season_for(record.measured_on, latitude),
        site_id: record.site_id,
        measured_on: record.measured_on,
        latitude: latitude.abs(),
        elevation,
        distance_to_water_m: record.distance_to_water_m,
        water_body_type: normalize_category(record.water_body_type.as_deref()),
        bank_material: normalize_category(record.bank_material.as_deref()),
        bedrock: normalize_category(record.bedrock.as_deref()),
        water_body_source: normalize_category(record.water_body_source.as_deref()),
        measurements,
        transparency,
        saturation: saturation_from_flag(record.image_disappeared),
        freshwater_habitats: split_phrases(
            record.freshwater_habitats.as_deref(),
            &config.habitat_delimiter,
        ),
        saltwater_habitats: split_phrases(
            record.saltwater_habitats.as_deref(),
            &config.habitat_delimiter,
        ),
        habitats: BTreeMap::new(),
    })
}

/// Raw records -> reconciled observations with habitat flags expanded.
///
/// Records without latitude or elevation are dropped first. Records whose
/// water-body source is inconclusive, or whose transparency is undefined, are
/// dropped after reconciliation.
pub fn reconcile(records: Vec<InputRecord>, config: &PipelineConfig) -> ReconciledTable {
    let total = records.len();
    let mut drops = DropCounts::default();
    let mut observations = Vec::with_capacity(total);

    for record in records {
        let (latitude, elevation) = match (record.latitude, record.elevation) {
            (Some(lat), Some(elev)) => (lat, elev),
            _ => {
                drops.missing_geolocation += 1;
                continue;
            }
        };
        let Some(obs) = reconcile_record(config, record, latitude, elevation) else {
            drops.undefined_transparency += 1;
            continue;
        };
        if obs.water_body_source.as_deref() == Some(INCONCLUSIVE_SOURCE) {
            drops.inconclusive_source += 1;
            continue;
        }
        observations.push(obs);
    }

    if drops.total() > 0 {
        warn!(
            "Dropped {} of {} rows (missing geolocation: {}, inconclusive source: {}, \
             undefined transparency: {})",
            drops.total(),
            total,
            drops.missing_geolocation,
            drops.inconclusive_source,
            drops.undefined_transparency
        );
    }

    let (observations, habitat_phrases) = habitat::expand(observations);
    info!(
        "Reconciled {} observations with {} habitat flags",
        observations.len(),
        habitat_phrases.len()
    );

    {
        let mut metrics = METRICS.lock();
        metrics.record_rows_read(total as u64);
        metrics.record_drops(&drops);
    }

    ReconciledTable {
        observations,
        habitat_phrases,
        drops,
    }
}
