//! Retraining orchestration.
//!
//! Drives two dependent external jobs (ingestion, then training) through the
//! `Idle -> Ingesting -> Training -> Completed` state machine, failing fast on
//! the first unsuccessful stage.

mod job;
mod orchestrator;
mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use job::{CommandJob, HttpJob, Job, JobHandle, JobOutcome};
pub use orchestrator::{HttpReloadHook, Orchestrator, ReloadHook};
pub use state::{RetrainJob, RetrainReport, RetrainState, StageResult};

/// One external job managed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingestion,
    Training,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::Training => "training",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
