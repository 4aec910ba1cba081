//! Experiment tracking store.
//!
//! The Model Resolver only reads from the store; the training job appends runs
//! through `JsonlTrackingStore::record_run` (or MLflow, when that backend is
//! used).

mod jsonl;
mod mlflow;
mod run;
mod traits;

use std::sync::Arc;

pub use jsonl::JsonlTrackingStore;
pub use mlflow::MlflowTrackingStore;
pub use run::{Experiment, TrainingRun};
pub use traits::TrackingStore;

use crate::config::{TrackingBackend, TrackingConfig};
use crate::error::Result;

/// Open the store selected by configuration
pub fn open_store(config: &TrackingConfig) -> Result<Arc<dyn TrackingStore>> {
    match config.backend {
        TrackingBackend::Jsonl => Ok(Arc::new(JsonlTrackingStore::new(&config.dir)?)),
        TrackingBackend::Mlflow => Ok(Arc::new(MlflowTrackingStore::new(
            &config.mlflow_uri,
            &config.metric,
        )?)),
    }
}
