//! Error types for ocrgate
//!
//! Centralized error handling using thiserror. Every variant maps to one HTTP
//! status so services can return the error straight from a handler.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::retrain::Stage;

/// All error types that can occur in ocrgate
#[derive(Debug, Error)]
pub enum OcrError {
    /// Missing or invalid credential
    #[error("{0}")]
    Unauthorized(String),

    /// Valid credential, insufficient role
    #[error("{0}")]
    Forbidden(String),

    /// Experiment unknown to the tracking store
    #[error("Experiment '{0}' not found")]
    NoSuchExperiment(String),

    /// Experiment exists but has no recorded runs
    #[error("No runs found in experiment '{0}'")]
    NoRuns(String),

    /// Model artifact could not be read or deserialized
    #[error("Failed to load model: {0}")]
    LoadFailure(String),

    /// Uploaded bytes are not a decodable image
    #[error("Failed to decode image: {0}")]
    DecodeError(String),

    /// The model could not produce a prediction
    #[error("Inference failed: {0}")]
    InferenceError(String),

    /// A retrain stage exited unsuccessfully or timed out
    #[error("{stage} stage failed: {detail}")]
    StageFailure { stage: Stage, detail: String },

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A single-flight operation is already in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Transport failure talking to a downstream service
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Malformed request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Tracking store error
    #[error("Tracking store error: {0}")]
    Tracking(String),

    /// Metrics exporter error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ocrgate operations
pub type Result<T> = std::result::Result<T, OcrError>;

impl OcrError {
    /// Stable machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::Unauthorized(_) => "unauthorized",
            OcrError::Forbidden(_) => "forbidden",
            OcrError::NoSuchExperiment(_) => "no_such_experiment",
            OcrError::NoRuns(_) => "no_runs",
            OcrError::LoadFailure(_) => "load_failure",
            OcrError::DecodeError(_) => "decode_error",
            OcrError::InferenceError(_) => "inference_error",
            OcrError::StageFailure { .. } => "stage_failure",
            OcrError::InvalidState(_) => "invalid_state",
            OcrError::Conflict(_) => "conflict",
            OcrError::UpstreamUnavailable(_) => "upstream_unavailable",
            OcrError::BadRequest(_) => "bad_request",
            OcrError::Tracking(_) => "tracking",
            OcrError::Metrics(_) => "metrics",
            OcrError::Config(_) => "config",
            OcrError::Io(_) => "io",
            OcrError::Json(_) => "json",
        }
    }

    /// HTTP status this error is reported with
    pub fn status(&self) -> StatusCode {
        match self {
            OcrError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            OcrError::Forbidden(_) => StatusCode::FORBIDDEN,
            OcrError::Conflict(_) => StatusCode::CONFLICT,
            OcrError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OcrError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            OcrError::NoSuchExperiment(_) | OcrError::NoRuns(_) | OcrError::LoadFailure(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON body sent to the caller
    pub fn body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let OcrError::StageFailure { stage, detail } = self {
            body["status"] = serde_json::json!("error");
            body["stage"] = serde_json::json!(stage.as_str());
            body["error"] = serde_json::json!(detail);
        }
        body
    }
}

impl IntoResponse for OcrError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = axum::Json(self.body());
        if status == StatusCode::UNAUTHORIZED {
            return (status, [(header::WWW_AUTHENTICATE, "Basic")], body).into_response();
        }
        (status, body).into_response()
    }
}

impl From<reqwest::Error> for OcrError {
    fn from(e: reqwest::Error) -> Self {
        OcrError::UpstreamUnavailable(e.to_string())
    }
}
