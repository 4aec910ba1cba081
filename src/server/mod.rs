//! HTTP services.
//!
//! - `gateway`: public entry point, authenticates and forwards
//! - `inference`: serves predictions from the resolved model
//! - `stage`: wraps one external job (ingest or train) behind a GET endpoint
//!
//! Downstream services never see client credentials. They trust the role
//! header the gateway injects, and when a shared secret is configured they
//! also require the gateway token.

pub mod gateway;
pub mod inference;
pub mod stage;

use axum::Router;
use axum::http::HeaderMap;
use log::{info, warn};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;

use crate::auth::Role;
use crate::config::GATEWAY_TOKEN_HEADER;
use crate::error::{OcrError, Result};

pub use gateway::{GatewayState, gateway_router};
pub use inference::{InferenceState, inference_router};
pub use stage::{StageState, stage_router};

/// Bind `addr` and serve `router` until the process exits
pub async fn serve(router: Router, addr: &str, name: &str) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("{} listening on {}", name, listener.local_addr()?);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Reject requests that do not carry the configured gateway token
pub(crate) fn require_gateway_token(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let presented = headers
        .get(GATEWAY_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        warn!("Rejected request without a valid gateway token");
        Err(OcrError::Unauthorized("Missing or invalid gateway token".to_string()))
    }
}

/// Role injected by the gateway
pub(crate) fn role_from_headers(headers: &HeaderMap, header: &str) -> Result<Role> {
    let value = headers.get(header).and_then(|v| v.to_str().ok()).ok_or_else(|| {
        warn!("Request without {} header", header);
        OcrError::BadRequest(format!(
            "Role is missing in the request; expected the gateway to forward {}",
            header
        ))
    })?;
    Role::parse(value).ok_or_else(|| OcrError::Unauthorized(format!("Unknown role '{}'", value)))
}
