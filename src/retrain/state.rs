//! Retrain job state machine

use serde::Serialize;

use super::Stage;
use crate::error::{OcrError, Result};

/// Lifecycle of one retrain job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrainState {
    Idle,
    Ingesting,
    Training,
    Completed,
    Failed,
}

impl RetrainState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetrainState::Completed | RetrainState::Failed)
    }

    fn can_transition_to(self, next: RetrainState) -> bool {
        use RetrainState::*;
        matches!(
            (self, next),
            (Idle, Ingesting)
                | (Ingesting, Training)
                | (Ingesting, Failed)
                | (Training, Completed)
                | (Training, Failed)
        )
    }
}

/// Output captured from one finished stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub output: String,
}

/// One pass through the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct RetrainJob {
    pub job_id: String,
    pub state: RetrainState,
    pub stage_results: Vec<StageResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
}

impl RetrainJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: RetrainState::Idle,
            stage_results: Vec::new(),
            failed_stage: None,
        }
    }

    /// Move to `next`, rejecting transitions the pipeline does not allow
    pub fn transition(&mut self, next: RetrainState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OcrError::InvalidState(format!(
                "retrain job {} cannot move from {:?} to {:?}",
                self.job_id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    pub fn record(&mut self, result: StageResult) {
        self.stage_results.push(result);
    }

    pub fn fail(&mut self, stage: Stage, detail: impl Into<String>) -> Result<()> {
        self.record(StageResult {
            stage,
            success: false,
            output: detail.into(),
        });
        self.failed_stage = Some(stage);
        self.transition(RetrainState::Failed)
    }
}

/// Composite payload returned for a completed retrain
#[derive(Debug, Clone, Serialize)]
pub struct RetrainReport {
    pub status: RetrainState,
    pub job_id: String,
    pub stages: Vec<StageResult>,
    pub model_reloaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = RetrainJob::new("retrain-1");
        job.transition(RetrainState::Ingesting).unwrap();
        job.transition(RetrainState::Training).unwrap();
        job.transition(RetrainState::Completed).unwrap();
        assert!(job.state.is_terminal());
    }

    #[test]
    fn test_cannot_skip_ingestion() {
        let mut job = RetrainJob::new("retrain-1");
        let err = job.transition(RetrainState::Training).unwrap_err();
        assert!(matches!(err, OcrError::InvalidState(_)));
        assert_eq!(job.state, RetrainState::Idle);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = RetrainJob::new("retrain-1");
        job.transition(RetrainState::Ingesting).unwrap();
        job.fail(Stage::Ingestion, "exit code 1").unwrap();
        assert_eq!(job.state, RetrainState::Failed);
        assert_eq!(job.failed_stage, Some(Stage::Ingestion));
        assert!(job.transition(RetrainState::Training).is_err());
    }

    #[test]
    fn test_report_serializes_lowercase_status() {
        let report = RetrainReport {
            status: RetrainState::Completed,
            job_id: "retrain-1".into(),
            stages: vec![StageResult {
                stage: Stage::Ingestion,
                success: true,
                output: "ok".into(),
            }],
            model_reloaded: false,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["stages"][0]["stage"], "ingestion");
        assert_eq!(json["model_reloaded"], false);
    }
}
