//! Tracking store trait

use async_trait::async_trait;

use super::run::{Experiment, TrainingRun};
use crate::error::Result;

/// Read access to experiments and their runs
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Look up an experiment by name
    async fn experiment_by_name(&self, name: &str) -> Result<Option<Experiment>>;

    /// All recorded runs of an experiment, in no particular order
    async fn runs(&self, experiment: &Experiment) -> Result<Vec<TrainingRun>>;
}
