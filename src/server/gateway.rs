//! Gateway routes.
//!
//! Every protected route authenticates the Basic credential, checks the
//! route's role policy, then either forwards to a backend service or runs the
//! retrain orchestrator in process. Forwarded requests carry only the body,
//! its content type, the injected role header and, when configured, the
//! gateway token. Backend responses are relayed as-is.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, info};
use serde_json::json;

use crate::auth::{AuthContext, Authenticator, CredentialStore, Policy};
use crate::config::{Config, GATEWAY_TOKEN_HEADER};
use crate::error::{OcrError, Result};
use crate::retrain::Orchestrator;

pub const WELCOME: &str = "Welcome to the OCR Gateway Service";

#[derive(Clone)]
pub struct GatewayState {
    pub authenticator: Authenticator,
    pub orchestrator: Arc<Orchestrator>,
    pub client: reqwest::Client,
    pub inference_url: String,
    pub ingestion_url: String,
    pub training_url: String,
    pub request_timeout: Duration,
    pub stage_timeout: Duration,
    pub role_header: String,
    pub token: Option<String>,
}

impl GatewayState {
    /// Build the gateway state from configuration
    pub fn from_config(config: &Config, orchestrator: Arc<Orchestrator>) -> Result<Self> {
        let store = CredentialStore::from_config(&config.users)?;
        let request_timeout = Duration::from_millis(config.gateway.request_timeout_ms);
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| OcrError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            authenticator: Authenticator::new(Arc::new(store)),
            orchestrator,
            client,
            inference_url: trim_url(&config.gateway.inference_url),
            ingestion_url: trim_url(&config.gateway.ingestion_url),
            training_url: trim_url(&config.gateway.training_url),
            request_timeout,
            stage_timeout: Duration::from_millis(config.gateway.stage_timeout_ms),
            role_header: config.gateway.role_header.clone(),
            token: config.trust.shared_secret.clone(),
        })
    }

    /// Authenticate the request and apply `policy`
    fn admit(&self, headers: &HeaderMap, policy: Policy) -> Result<AuthContext> {
        let context = self.authenticator.authenticate_headers(headers)?;
        policy.check(&context)?;
        Ok(context)
    }

    async fn forward(
        &self,
        context: &AuthContext,
        method: Method,
        url: String,
        headers: &HeaderMap,
        body: Bytes,
        timeout: Duration,
    ) -> Result<Response> {
        debug!("Forwarding {} {} for {}", method, url, context.username);
        let mut request = self
            .client
            .request(method, &url)
            .timeout(timeout)
            .header(self.role_header.as_str(), context.role.as_str());
        if let Some(token) = &self.token {
            request = request.header(GATEWAY_TOKEN_HEADER, token);
        }
        if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
            request = request.header(header::CONTENT_TYPE, content_type.clone());
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let mut relayed = HeaderMap::new();
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            relayed.insert(header::CONTENT_TYPE, content_type.clone());
        }
        let bytes = response.bytes().await?;
        debug!("{} answered {}", url, status);
        Ok((status, relayed, bytes).into_response())
    }
}

fn trim_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

pub fn gateway_router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/healthz", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/predict", post(predict))
        .route("/retrain", post(retrain))
        .route("/retrain/status", get(retrain_status))
        .route("/ingest", get(ingest))
        .route("/train", get(train))
        .with_state(state)
}

async fn home() -> Json<serde_json::Value> {
    Json(json!({ "message": WELCOME }))
}

async fn predict(State(state): State<GatewayState>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    let context = state.admit(&headers, Policy::PREDICT)?;
    info!("Prediction request from {} ({})", context.username, context.role);
    let url = format!("{}/predict", state.inference_url);
    state
        .forward(&context, Method::POST, url, &headers, body, state.request_timeout)
        .await
}

async fn retrain(State(state): State<GatewayState>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    let context = state.admit(&headers, Policy::ADMIN_ONLY)?;
    let report = state.orchestrator.trigger_retrain(&context).await?;
    Ok(Json(serde_json::to_value(report)?))
}

async fn retrain_status(State(state): State<GatewayState>, headers: HeaderMap) -> Result<Json<serde_json::Value>> {
    state.admit(&headers, Policy::ADMIN_ONLY)?;
    let last = state.orchestrator.last_job().await;
    Ok(Json(json!({
        "running": state.orchestrator.is_running(),
        "last_job": last,
    })))
}

async fn ingest(State(state): State<GatewayState>, headers: HeaderMap) -> Result<Response> {
    let context = state.admit(&headers, Policy::ADMIN_ONLY)?;
    info!("Ingestion requested by {}", context.username);
    let url = format!("{}/ingest", state.ingestion_url);
    state
        .forward(&context, Method::GET, url, &headers, Bytes::new(), state.stage_timeout)
        .await
}

async fn train(State(state): State<GatewayState>, headers: HeaderMap) -> Result<Response> {
    let context = state.admit(&headers, Policy::ADMIN_ONLY)?;
    info!("Training requested by {}", context.username);
    let url = format!("{}/train", state.training_url);
    state
        .forward(&context, Method::GET, url, &headers, Bytes::new(), state.stage_timeout)
        .await
}
