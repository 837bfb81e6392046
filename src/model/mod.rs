pub mod cv;
pub mod dataset;
pub mod evaluate;
pub mod forest;

pub use dataset::{CategoryDictionary, ModelView};
pub use evaluate::{train_and_evaluate, ModelOutcome, ScoredObservation};
pub use forest::{ForestParams, RegressionForest};
