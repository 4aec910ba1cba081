//! Inference service routes

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde_json::json;

use super::{require_gateway_token, role_from_headers};
use crate::auth::{AuthContext, Policy};
use crate::error::{OcrError, Result};
use crate::inference::InferenceService;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct InferenceState {
    pub service: Arc<InferenceService>,
    pub role_header: String,
    pub token: Option<String>,
}

pub fn inference_router(state: InferenceState) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/reload", post(reload))
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Check trust token and role header against `policy`
fn caller(state: &InferenceState, headers: &HeaderMap, policy: Policy) -> Result<AuthContext> {
    require_gateway_token(headers, state.token.as_deref())?;
    let role = role_from_headers(headers, &state.role_header)?;
    let context = AuthContext {
        username: format!("<{}>", role),
        role,
    };
    policy.check(&context)?;
    Ok(context)
}

async fn predict(
    State(state): State<InferenceState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>> {
    let context = caller(&state, &headers, Policy::PREDICT)?;
    debug!("Prediction request from role {}", context.role);

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OcrError::BadRequest(e.to_string()))?
    {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| OcrError::BadRequest(e.to_string()))?;
            upload = Some(bytes);
            break;
        }
    }
    let bytes = upload
        .ok_or_else(|| OcrError::BadRequest(format!("multipart field '{}' is required", FILE_FIELD)))?;

    let prediction = state.service.predict(&bytes).await?;
    Ok(Json(json!({ "predicted_text": prediction.label })))
}

async fn reload(State(state): State<InferenceState>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    caller(&state, &headers, Policy::ADMIN_ONLY)?;
    let resolved = state.service.resolver().invalidate_and_reresolve().await?;
    info!("Reload selected run {}", resolved.run.run_id);
    Ok(Json(json!({
        "status": "reloaded",
        "run_id": resolved.run.run_id,
        "metric_value": resolved.run.metric_value,
    })))
}

async fn metrics(State(state): State<InferenceState>) -> Result<Response> {
    let text = state.service.metrics().render()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        text,
    )
        .into_response())
}

async fn healthz(State(state): State<InferenceState>) -> Json<serde_json::Value> {
    let active = state.service.resolver().active().await;
    Json(json!({
        "status": "ok",
        "run_id": active.map(|m| m.run.run_id.clone()),
    }))
}
