use hydro_pipeline::config::{load_config, PipelineConfig};
use hydro_pipeline::errors::PipelineError;
use hydro_pipeline::metrics::METRICS;
use hydro_pipeline::{output, pipeline};
use log::{error, info};
use std::error::Error;
use std::path::{Path, PathBuf};

const USAGE: &str = "usage: hydro_pipeline <observations.csv> [config.json]";

fn run(input: &Path, config_path: Option<PathBuf>) -> Result<Vec<PathBuf>, PipelineError> {
    let config = match config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            load_config(&path)?
        }
        None => PipelineConfig::default(),
    };
    let out = pipeline::run(input, &config)?;
    output::write_all(&out, &config.output_dir)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args_os().skip(1);
    let Some(input) = args.next().map(PathBuf::from) else {
        error!("{}", USAGE);
        return Err(USAGE.into());
    };

    let result = run(&input, args.next().map(PathBuf::from));
    METRICS.lock().log_summary();

    match result {
        Ok(files) => {
            for file in files {
                info!("  {}", file.display());
            }
            Ok(())
        }
        Err(e) => {
            error!("Pipeline failed: {}", e);
            Err(e.into())
        }
    }
}
