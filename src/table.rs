//! Observations as a polars frame for imputation, provenance scans and export.

use crate::data_models::{
    Observation, Variable, BANK_MATERIAL, BEDROCK, DISTANCE_TO_WATER, ELEVATION, IMPUTED_MARKER,
    LATITUDE, MEASURED_ON, SATURATION, SEASON, SITE_ID, TRANSPARENCY, WATER_BODY_SOURCE,
    WATER_BODY_TYPE,
};
use polars::prelude::*;

fn numeric(
    name: &str,
    observations: &[Observation],
    f: impl Fn(&Observation) -> Option<f64>,
) -> Series {
    Series::new(name, observations.iter().map(f).collect::<Vec<_>>())
}

fn text(
    name: &str,
    observations: &[Observation],
    f: impl Fn(&Observation) -> Option<String>,
) -> Series {
    Series::new(name, observations.iter().map(f).collect::<Vec<_>>())
}

/// One frame row per observation. `row_ids[i]` is the observation behind frame row `i`.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub row_ids: Vec<usize>,
    pub frame: DataFrame,
}

impl FeatureTable {
    pub fn from_observations(observations: &[Observation]) -> PolarsResult<Self> {
        let mut columns = vec![
            text(SITE_ID, observations, |o| Some(o.site_id.clone())),
            text(MEASURED_ON, observations, |o| Some(o.measured_on.to_string())),
            numeric(LATITUDE, observations, |o| Some(o.latitude)),
            numeric(ELEVATION, observations, |o| Some(o.elevation)),
            numeric(DISTANCE_TO_WATER, observations, |o| o.distance_to_water_m),
            text(SEASON, observations, |o| Some(o.season.to_string())),
            text(WATER_BODY_TYPE, observations, |o| o.water_body_type.clone()),
            text(BANK_MATERIAL, observations, |o| o.bank_material.clone()),
            text(BEDROCK, observations, |o| o.bedrock.clone()),
            text(WATER_BODY_SOURCE, observations, |o| o.water_body_source.clone()),
        ];
        for var in Variable::ALL {
            columns.push(numeric(var.name(), observations, |o| o.measurement(var).value));
            columns.push(text(&var.method_column(), observations, |o| {
                Some(o.measurement(var).method.to_string())
            }));
        }
        columns.push(numeric(TRANSPARENCY, observations, |o| Some(o.transparency)));
        columns.push(text(SATURATION, observations, |o| {
            Some(o.saturation.as_str().to_string())
        }));
        if let Some(first) = observations.first() {
            for key in first.habitats.keys() {
                columns.push(text(key, observations, |o| {
                    o.habitats.get(key).map(|f| f.as_str().to_string())
                }));
            }
        }

        Ok(Self {
            row_ids: observations.iter().map(|o| o.row_id).collect(),
            frame: DataFrame::new(columns)?,
        })
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn width(&self) -> usize {
        self.frame.width()
    }

    /// Per row, the number of text cells equal to the imputation marker.
    pub fn imputed_markers_per_row(&self) -> PolarsResult<Vec<u64>> {
        let mut counts = vec![0_u64; self.height()];
        for series in self.frame.get_columns() {
            if series.dtype() != &DataType::String {
                continue;
            }
            for (count, cell) in counts.iter_mut().zip(series.str()?.into_iter()) {
                if cell == Some(IMPUTED_MARKER) {
                    *count += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Copies imputable cells back onto `observations`, which must be in frame row order.
    /// Null cells leave the observation as it was.
    pub fn write_back(&self, observations: &mut [Observation]) -> PolarsResult<()> {
        let distances = self.frame.column(DISTANCE_TO_WATER)?.f64()?;
        for (obs, value) in observations.iter_mut().zip(distances.into_iter()) {
            if value.is_some() {
                obs.distance_to_water_m = value;
            }
        }

        for var in Variable::ALL {
            let values = self.frame.column(var.name())?.f64()?;
            for (obs, value) in observations.iter_mut().zip(values.into_iter()) {
                if value.is_some() {
                    obs.measurement_mut(var).value = value;
                }
            }
        }

        for name in [WATER_BODY_TYPE, BANK_MATERIAL, BEDROCK, WATER_BODY_SOURCE] {
            let values = self.frame.column(name)?.str()?;
            for (row, (obs, value)) in observations.iter_mut().zip(values.into_iter()).enumerate() {
                debug_assert_eq!(obs.row_id, self.row_ids[row]);
                let Some(value) = value else { continue };
                let slot = match name {
                    WATER_BODY_TYPE => &mut obs.water_body_type,
                    BANK_MATERIAL => &mut obs.bank_material,
                    BEDROCK => &mut obs.bedrock,
                    _ => &mut obs.water_body_source,
                };
                *slot = Some(value.to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_models::Method;
    use crate::tests::test_helpers::observation;

    #[test]
    fn table_exposes_every_field() {
        let obs = vec![observation(0, "S1"), observation(1, "S2")];
        let table = FeatureTable::from_observations(&obs).unwrap();
        assert_eq!(table.height(), 2);
        // 10 descriptors + 7 value/method pairs + transparency + saturation + 2 habitats
        assert_eq!(table.width(), 10 + 14 + 2 + 2);
        assert!(table.frame.column("ph_method").is_ok());
        assert!(table.frame.column("has_lake").is_ok());
        let distance = table.frame.column(DISTANCE_TO_WATER).unwrap();
        assert_eq!(distance.dtype(), &DataType::Float64);
    }

    #[test]
    fn imputed_marker_scan_counts_method_cells() {
        let mut obs = observation(0, "S1");
        obs.measurement_mut(Variable::Ph).value = None;
        obs.measurement_mut(Variable::Ph).method = Method::Imputed;
        let table = FeatureTable::from_observations(&[obs, observation(1, "S1")]).unwrap();
        assert_eq!(table.imputed_markers_per_row().unwrap(), vec![1, 0]);
    }

    #[test]
    fn write_back_fills_only_present_cells() {
        let mut obs = vec![observation(0, "S1")];
        obs[0].bedrock = None;
        obs[0].measurement_mut(Variable::Nitrate).value = None;
        let mut table = FeatureTable::from_observations(&obs).unwrap();
        table
            .frame
            .replace("nitrate", Series::new("nitrate", &[Some(0.7)]))
            .unwrap();
        table
            .frame
            .replace(BEDROCK, Series::new(BEDROCK, &[Some("granite")]))
            .unwrap();
        let before = obs[0].clone();
        table.write_back(&mut obs).unwrap();
        assert_eq!(obs[0].measurement(Variable::Nitrate).value, Some(0.7));
        assert_eq!(obs[0].bedrock.as_deref(), Some("granite"));
        assert_eq!(obs[0].transparency, before.transparency);
        assert_eq!(obs[0].site_id, before.site_id);
    }
}
