//! Builders for observations and synthetic input files shared by the tests.

use crate::config::{ForestGrid, ModelConfig, PipelineConfig};
use crate::data_models::{
    required_columns, HabitatFlag, Measurement, Method, Observation, Saturation, Variable,
};
use crate::season::Season;
use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

/// A complete lake observation: every value present, every method a source label.
pub fn observation(row_id: usize, site: &str) -> Observation {
    let mut measurements = [Measurement::missing(); 7];
    for var in Variable::ALL {
        measurements[var.index()] = Measurement {
            value: Some(1.0 + var.index() as f64),
            method: Method::Source(var.sources()[0].method),
        };
    }
    let mut habitats = BTreeMap::new();
    habitats.insert("has_lake".to_string(), HabitatFlag::Yes);
    habitats.insert("has_pond".to_string(), HabitatFlag::No);

    Observation {
        row_id,
        site_id: site.to_string(),
        measured_on: NaiveDate::from_ymd_opt(2021, 7, 4).unwrap() + Duration::days(row_id as i64),
        latitude: 41.0,
        elevation: 120.0,
        distance_to_water_m: Some(50.0),
        season: Season::Summer,
        water_body_type: Some("lake".to_string()),
        bank_material: Some("soil".to_string()),
        bedrock: Some("sandstone".to_string()),
        water_body_source: Some("rain".to_string()),
        measurements,
        transparency: 0.05,
        saturation: Saturation::NotSaturated,
        freshwater_habitats: vec!["lake".to_string()],
        saltwater_habitats: Vec::new(),
        habitats,
    }
}

/// `n` observations over two water-body types with scattered gaps in values and categories.
pub fn synthetic_observations(n: usize, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let mut obs = observation(i, &format!("S{}", i % 4));
            obs.water_body_type = Some((if i % 2 == 0 { "lake" } else { "river" }).to_string());
            obs.bank_material = Some(["soil", "rock", "sand"][i % 3].to_string());
            obs.elevation = 100.0 + rng.gen_range(0.0..50.0);
            obs.transparency = 1.0 / rng.gen_range(10.0..60.0);
            for var in Variable::ALL {
                let m = obs.measurement_mut(var);
                m.value = Some(rng.gen_range(0.0..10.0) + var.index() as f64);
            }
            if i % 6 == 1 || i % 6 == 2 {
                let m = obs.measurement_mut(Variable::Ph);
                m.value = None;
                m.method = Method::Imputed;
            }
            if i % 9 == 3 {
                obs.bedrock = None;
            }
            if i % 11 == 5 {
                obs.distance_to_water_m = None;
            }
            obs
        })
        .collect()
}

/// Small forest and few passes so end-to-end runs stay quick.
pub fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.imputation.iterations = 2;
    config.model = ModelConfig {
        cv_folds: 3,
        n_trees: 15,
        cv_trees: 5,
        grid: ForestGrid {
            max_features: vec![0.5, 1.0],
            min_samples_leaf: vec![1, 5],
        },
        ..ModelConfig::default()
    };
    config.histogram_bins = 10;
    config
}

fn cell(column: &str, i: usize) -> String {
    let site = i % 5;
    let far = site >= 3;
    match column {
        "site_id" => format!("SITE-{site}"),
        "measured_on" => {
            let start = NaiveDate::from_ymd_opt(2019, 1, 1).unwrap();
            (start + Duration::days(3 * i as i64))
                .format("%Y-%m-%d")
                .to_string()
        }
        "latitude" => {
            if site == 4 {
                format!("{:.2}", -25.0 - i as f64 / 100.0)
            } else {
                format!("{:.2}", 40.0 + site as f64 + i as f64 / 100.0)
            }
        }
        "elevation" => format!("{}", 100 + 10 * site + i % 7),
        "distance_to_water_m" if i % 17 == 0 => String::new(),
        "distance_to_water_m" => format!("{}", if far { 1500 + i } else { 20 + 10 * site + i % 5 }),
        "water_body_type" => (if site % 2 == 0 { "Lake" } else { "River" }).to_string(),
        "bank_material" => ["soil", "Rock", "sand"][i % 3].to_string(),
        "bedrock" if i % 11 == 0 => "NA".to_string(),
        "bedrock" => ["granite", "limestone"][i % 2].to_string(),
        "water_body_source" => ["rain", "spring"][(i / 2) % 2].to_string(),
        "freshwater_habitats" if site % 2 == 0 => "Lake; Pond".to_string(),
        "freshwater_habitats" if i % 4 == 0 => String::new(),
        "freshwater_habitats" => "Stream".to_string(),
        "saltwater_habitats" if i % 6 == 0 => "Estuary".to_string(),
        "saltwater_habitats" => String::new(),
        "alkalinity_direct_mgl" if i % 5 == 0 => String::new(),
        "alkalinity_direct_mgl" | "alkalinity_drop_count_mgl" => format!("{}", 40 + i % 19),
        "conductivity_meter_uscm" => format!("{}", 200 + 3 * (i % 31)),
        "dissolved_oxygen_probe_mgl" => format!("{:.1}", 6.0 + (i % 8) as f64 / 2.0),
        "nitrate_kit_mgl" if i % 9 == 0 => String::new(),
        "nitrate_kit_mgl" => format!("{:.2}", 0.1 + (i % 6) as f64 / 10.0),
        "ph_meter" if i % 7 == 0 => String::new(),
        "ph_meter" => format!("{:.1}", 6.5 + (i % 10) as f64 / 10.0),
        "ph_paper" if i % 14 == 0 => "7".to_string(),
        "salinity_refractometer_ppt" => format!("{:.1}", (i % 4) as f64 / 2.0),
        "water_temp_probe_c" => format!("{}", 10 + i % 13),
        "transparency_tube_cm" if i == 3 => "0".to_string(),
        "transparency_tube_cm" => format!("{}", 15 + 3 * (i % 13) + 4 * site),
        "transparency_image_disappeared" => (if i % 9 == 4 { "false" } else { "true" }).to_string(),
        _ => String::new(),
    }
}

/// Comma-delimited input with every required column. Sites 3 and 4 lie far from
/// water, row 3 has a zero tube reading, and several cells are blank.
pub fn synthetic_csv(n: usize) -> String {
    let columns = required_columns();
    let mut text = columns.join(",");
    text.push('\n');
    for i in 0..n {
        let row: Vec<String> = columns.iter().map(|c| cell(c, i)).collect();
        text.push_str(&row.join(","));
        text.push('\n');
    }
    text
}
