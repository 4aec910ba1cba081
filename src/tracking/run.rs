//! Tracking store records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named collection of runs sharing a comparison metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
}

/// One completed training attempt. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub experiment_name: String,
    /// Higher is better (e.g. validation accuracy)
    pub metric_value: f64,
    pub artifact_uri: String,
    pub timestamp: DateTime<Utc>,
}

impl TrainingRun {
    pub fn new(
        run_id: impl Into<String>,
        experiment_name: impl Into<String>,
        metric_value: f64,
        artifact_uri: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            experiment_name: experiment_name.into(),
            metric_value,
            artifact_uri: artifact_uri.into(),
            timestamp,
        }
    }
}
