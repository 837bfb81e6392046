pub mod candidates;
pub mod config;
pub mod data_models;
pub mod diagnostics;
pub mod errors;
pub mod habitat;
pub mod impute;
pub mod metrics;
pub mod mice;
pub mod model;
pub mod output;
pub mod parallel;
pub mod parsers;
pub mod pipeline;
pub mod plot_data;
pub mod reconcile;
pub mod season;
pub mod stats;
pub mod table;
pub mod utils;

#[cfg(test)]
mod tests;
