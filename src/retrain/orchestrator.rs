//! Single-flight retrain orchestrator

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::{Mutex, RwLock};

use super::job::{CommandJob, HttpJob, Job};
use super::state::{RetrainJob, RetrainReport, RetrainState, StageResult};
use super::Stage;
use crate::auth::{AuthContext, Role, authorize};
use crate::config::{GATEWAY_TOKEN_HEADER, RetrainConfig, StageJobConfig, TrustConfig};
use crate::error::{OcrError, Result};
use crate::id::generate_job_id;

const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(7200);

/// Called after a successful retrain so the serving side picks up the new model
#[async_trait]
pub trait ReloadHook: Send + Sync {
    async fn reload(&self) -> Result<()>;
}

/// Asks an inference service to re-resolve its model via `POST <url>`
pub struct HttpReloadHook {
    url: String,
    role_header: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpReloadHook {
    pub fn new(url: impl Into<String>, role_header: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            role_header: role_header.into(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ReloadHook for HttpReloadHook {
    async fn reload(&self) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header(self.role_header.as_str(), Role::Admin.as_str());
        if let Some(token) = &self.token {
            request = request.header(GATEWAY_TOKEN_HEADER, token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::UpstreamUnavailable(format!(
                "reload returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Runs ingestion then training, at most one pipeline at a time
pub struct Orchestrator {
    pipeline: Pipeline,
    in_flight: Arc<Mutex<()>>,
}

/// Everything a running retrain needs, cloned into its task
#[derive(Clone)]
struct Pipeline {
    ingestion: Arc<dyn Job>,
    training: Arc<dyn Job>,
    ingestion_timeout: Duration,
    training_timeout: Duration,
    reload: Option<Arc<dyn ReloadHook>>,
    last: Arc<RwLock<Option<RetrainJob>>>,
}

impl Orchestrator {
    pub fn new(ingestion: Arc<dyn Job>, training: Arc<dyn Job>) -> Self {
        Self {
            pipeline: Pipeline {
                ingestion,
                training,
                ingestion_timeout: DEFAULT_STAGE_TIMEOUT,
                training_timeout: DEFAULT_STAGE_TIMEOUT,
                reload: None,
                last: Arc::new(RwLock::new(None)),
            },
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_timeouts(mut self, ingestion: Duration, training: Duration) -> Self {
        self.pipeline.ingestion_timeout = ingestion;
        self.pipeline.training_timeout = training;
        self
    }

    pub fn with_reload_hook(mut self, hook: Arc<dyn ReloadHook>) -> Self {
        self.pipeline.reload = Some(hook);
        self
    }

    /// Build jobs and the reload hook from configuration
    pub fn from_config(retrain: &RetrainConfig, trust: &TrustConfig, role_header: &str) -> Result<Self> {
        let ingestion = build_job(&retrain.ingestion, trust)?;
        let training = build_job(&retrain.training, trust)?;
        let mut orchestrator = Self::new(ingestion, training).with_timeouts(
            Duration::from_millis(retrain.ingestion.timeout_ms()),
            Duration::from_millis(retrain.training.timeout_ms()),
        );
        if let Some(url) = &retrain.reload_url {
            orchestrator = orchestrator.with_reload_hook(Arc::new(HttpReloadHook::new(
                url.clone(),
                role_header,
                trust.shared_secret.clone(),
            )));
        }
        Ok(orchestrator)
    }

    /// Whether a retrain currently holds the single-flight slot
    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Snapshot of the most recent job, running or finished
    pub async fn last_job(&self) -> Option<RetrainJob> {
        self.pipeline.last.read().await.clone()
    }

    /// Run the full pipeline for an admin caller.
    ///
    /// The role check happens before any job starts. A second call while one
    /// is running fails with `Conflict`. The first failing stage ends the job
    /// and training never starts after a failed ingestion.
    ///
    /// The pipeline runs on its own task and keeps the slot until it reaches a
    /// terminal state, even if the caller stops waiting.
    pub async fn trigger_retrain(&self, caller: &AuthContext) -> Result<RetrainReport> {
        authorize(caller, Role::Admin)?;
        let slot = self
            .in_flight
            .clone()
            .try_lock_owned()
            .map_err(|_| OcrError::Conflict("a retrain is already in progress".to_string()))?;

        let job = RetrainJob::new(generate_job_id());
        info!("Retrain {} triggered by {}", job.job_id, caller.username);

        let pipeline = self.pipeline.clone();
        let task = tokio::spawn(async move {
            let _slot = slot;
            pipeline.run(job).await
        });
        task.await
            .map_err(|e| OcrError::InvalidState(format!("retrain task ended abnormally: {}", e)))?
    }
}

impl Pipeline {
    async fn run(self, mut job: RetrainJob) -> Result<RetrainReport> {
        job.transition(RetrainState::Ingesting)?;
        self.publish(&job).await;
        self.execute(&mut job, Stage::Ingestion).await?;

        job.transition(RetrainState::Training)?;
        self.publish(&job).await;
        self.execute(&mut job, Stage::Training).await?;

        job.transition(RetrainState::Completed)?;
        self.publish(&job).await;
        info!("Retrain {} completed", job.job_id);

        let model_reloaded = self.reload_model().await;
        Ok(RetrainReport {
            status: job.state,
            job_id: job.job_id,
            stages: job.stage_results,
            model_reloaded,
        })
    }

    async fn execute(&self, job: &mut RetrainJob, stage: Stage) -> Result<()> {
        match self.run_stage(stage).await {
            Ok(output) => {
                info!("Retrain {}: {} stage succeeded", job.job_id, stage);
                job.record(StageResult {
                    stage,
                    success: true,
                    output,
                });
                Ok(())
            }
            Err(detail) => {
                error!("Retrain {}: {} stage failed: {}", job.job_id, stage, detail);
                job.fail(stage, detail.clone())?;
                self.publish(job).await;
                Err(OcrError::StageFailure { stage, detail })
            }
        }
    }

    async fn run_stage(&self, stage: Stage) -> std::result::Result<String, String> {
        let (job, limit) = match stage {
            Stage::Ingestion => (&self.ingestion, self.ingestion_timeout),
            Stage::Training => (&self.training, self.training_timeout),
        };
        info!("Starting {} stage: {}", stage, job.describe());

        let mut handle = job
            .start()
            .await
            .map_err(|e| format!("failed to start {}: {}", job.describe(), e))?;
        match tokio::time::timeout(limit, handle.wait()).await {
            Ok(Ok(outcome)) if outcome.is_success() => Ok(outcome.stdout),
            Ok(Ok(outcome)) => Err(outcome.failure_detail()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
        }
    }

    async fn reload_model(&self) -> bool {
        let Some(hook) = &self.reload else {
            return false;
        };
        match hook.reload().await {
            Ok(()) => {
                info!("Inference model reloaded");
                true
            }
            Err(e) => {
                warn!("Retrain succeeded but model reload failed: {}", e);
                false
            }
        }
    }

    async fn publish(&self, job: &RetrainJob) {
        *self.last.write().await = Some(job.clone());
    }
}

fn build_job(config: &StageJobConfig, trust: &TrustConfig) -> Result<Arc<dyn Job>> {
    Ok(match config {
        StageJobConfig::Command { command, .. } => Arc::new(CommandJob::new(command.clone())),
        StageJobConfig::Http { url, timeout_ms } => Arc::new(HttpJob::new(
            url.clone(),
            trust.shared_secret.clone(),
            Duration::from_millis(*timeout_ms),
        )?),
    })
}
