//! Stage service: one external job behind `GET /ingest` or `GET /train`
//!
//! Replies `{"status":"success","output":...}` or `{"status":"error","error":...}`
//! with status 200 either way; the orchestrator reads the `status` field.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use log::{error, info};
use serde_json::json;
use tokio::sync::Mutex;

use super::require_gateway_token;
use crate::error::{OcrError, Result};
use crate::retrain::{Job, Stage};

#[derive(Clone)]
pub struct StageState {
    pub stage: Stage,
    pub job: Arc<dyn Job>,
    pub timeout: Duration,
    pub token: Option<String>,
    running: Arc<Mutex<()>>,
}

impl StageState {
    pub fn new(stage: Stage, job: Arc<dyn Job>, timeout: Duration, token: Option<String>) -> Self {
        Self {
            stage,
            job,
            timeout,
            token,
            running: Arc::new(Mutex::new(())),
        }
    }
}

/// Path the stage is served on
pub fn stage_path(stage: Stage) -> &'static str {
    match stage {
        Stage::Ingestion => "/ingest",
        Stage::Training => "/train",
    }
}

pub fn stage_router(state: StageState) -> Router {
    Router::new()
        .route(stage_path(state.stage), get(run_stage))
        .route("/healthz", get(|| async { Json(json!({ "status": "ok" })) }))
        .with_state(state)
}

async fn run_stage(State(state): State<StageState>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    require_gateway_token(&headers, state.token.as_deref())?;
    let _running = state
        .running
        .try_lock()
        .map_err(|_| OcrError::Conflict(format!("{} is already running", state.stage)))?;

    info!("Starting {}: {}", state.stage, state.job.describe());
    let mut handle = state.job.start().await?;
    let body = match tokio::time::timeout(state.timeout, handle.wait()).await {
        Ok(Ok(outcome)) if outcome.is_success() => {
            info!("{} finished", state.stage);
            json!({ "status": "success", "output": outcome.stdout })
        }
        Ok(Ok(outcome)) => {
            error!("{} failed: {}", state.stage, outcome.failure_detail());
            json!({ "status": "error", "error": outcome.failure_detail() })
        }
        Ok(Err(e)) => {
            error!("{} failed: {}", state.stage, e);
            json!({ "status": "error", "error": e.to_string() })
        }
        Err(_) => {
            error!("{} timed out after {:?}", state.stage, state.timeout);
            json!({
                "status": "error",
                "error": format!("timed out after {}ms", state.timeout.as_millis()),
            })
        }
    };
    Ok(Json(body))
}
