//! End-to-end tests
//!
//! Runs the inference and stage services on loopback listeners and drives the
//! gateway router against them.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use axum::routing::post;
use chrono::Utc;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ocrgate::auth::credentials::{MIN_MEMORY_KIB, hash_secret_with};
use ocrgate::auth::{Credential, Role};
use ocrgate::config::{Config, StageJobConfig, UserEntry};
use ocrgate::inference::{InferenceService, LabelVocabulary};
use ocrgate::model::{ArtifactLoader, DenseModel, ModelResolver};
use ocrgate::retrain::{CommandJob, Orchestrator, Stage};
use ocrgate::server::{
    GatewayState, InferenceState, StageState, gateway_router, inference_router, stage_router,
};
use ocrgate::tracking::{JsonlTrackingStore, TrainingRun};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tower::util::ServiceExt;

const EXPERIMENT: &str = "OCR_CNN_Training";
const TOKEN: &str = "gateway-shared-secret";
const BOUNDARY: &str = "e2e-boundary-7f3a";

/// Serve `router` on an ephemeral loopback port
async fn spawn(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn write_model(dir: &Path, name: &str, class: usize) -> String {
    let path = dir.join(name);
    std::fs::write(&path, DenseModel::constant(20, class).unwrap().to_json().unwrap()).unwrap();
    path.to_str().unwrap().to_string()
}

/// Tracking store with one run whose model always predicts "We"
fn seed_tracking(dir: &Path) -> Arc<JsonlTrackingStore> {
    let store = Arc::new(JsonlTrackingStore::new(dir.join("tracking")).unwrap());
    let artifact = write_model(dir, "model-we.json", 4);
    store
        .record_run(&TrainingRun::new("run-1", EXPERIMENT, 0.82, artifact, Utc::now()))
        .unwrap();
    store
}

async fn spawn_inference(store: Arc<JsonlTrackingStore>) -> String {
    let resolver = ModelResolver::new(store, Arc::new(ArtifactLoader::new().unwrap()), EXPERIMENT);
    let state = InferenceState {
        service: Arc::new(InferenceService::new(Arc::new(resolver), LabelVocabulary::default()).unwrap()),
        role_header: "X-User-Role".to_string(),
        token: Some(TOKEN.to_string()),
    };
    spawn(inference_router(state)).await
}

/// Backend that answers with the role and token headers it received
async fn spawn_echo() -> String {
    let router = Router::new().route(
        "/predict",
        post(|headers: HeaderMap| async move {
            let values = |name: &str| -> Vec<String> {
                headers
                    .get_all(name)
                    .iter()
                    .filter_map(|v| v.to_str().ok().map(str::to_string))
                    .collect()
            };
            axum::Json(serde_json::json!({
                "roles": values("X-User-Role"),
                "tokens": values("X-Gateway-Token"),
            }))
        }),
    );
    spawn(router).await
}

fn config(inference_url: &str) -> Config {
    let mut config = Config::default();
    config.gateway.inference_url = inference_url.to_string();
    config.trust.shared_secret = Some(TOKEN.to_string());
    config.users = vec![
        UserEntry {
            username: "admin1".to_string(),
            secret_hash: hash_secret_with("1nimda", MIN_MEMORY_KIB, 2).unwrap(),
            role: Role::Admin,
        },
        UserEntry {
            username: "user1".to_string(),
            secret_hash: hash_secret_with("1resu", MIN_MEMORY_KIB, 2).unwrap(),
            role: Role::User,
        },
    ];
    config
}

fn gateway(config: &Config, orchestrator: Orchestrator) -> Router {
    gateway_router(GatewayState::from_config(config, Arc::new(orchestrator)).unwrap())
}

fn white_png() -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])))
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn predict_request(credential: Option<(&str, &str)>) -> Request<Body> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"word.png\"\r\nContent-Type: image/png\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(&white_png());
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri("/predict")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        // A client cannot promote itself; the gateway replaces this header
        .header("X-User-Role", "admin");
    if let Some((user, secret)) = credential {
        builder = builder.header(header::AUTHORIZATION, Credential::new(user, secret).to_header_value());
    }
    builder.body(Body::from(body)).unwrap()
}

fn request(method: &str, uri: &str, credential: (&str, &str)) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(
            header::AUTHORIZATION,
            Credential::new(credential.0, credential.1).to_header_value(),
        )
        .body(Body::empty())
        .unwrap()
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn marker_jobs(dir: &Path, ingest_exit: i32) -> Orchestrator {
    let ingest = format!("touch {}/ingested; exit {}", dir.display(), ingest_exit);
    let train = format!("touch {}/trained", dir.display());
    Orchestrator::new(Arc::new(CommandJob::new(ingest)), Arc::new(CommandJob::new(train)))
}

#[tokio::test]
async fn test_predict_through_gateway() {
    let dir = TempDir::new().unwrap();
    let inference_url = spawn_inference(seed_tracking(dir.path())).await;
    let app = gateway(&config(&inference_url), marker_jobs(dir.path(), 0));

    let response = app.clone().oneshot(predict_request(Some(("user1", "1resu")))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["predicted_text"], "We");

    let response = app.clone().oneshot(predict_request(Some(("admin1", "1nimda")))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(predict_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_client_role_and_token_headers_are_replaced() {
    let dir = TempDir::new().unwrap();
    let echo_url = spawn_echo().await;
    let app = gateway(&config(&echo_url), marker_jobs(dir.path(), 0));

    let mut request = predict_request(Some(("user1", "1resu")));
    request
        .headers_mut()
        .insert("X-Gateway-Token", "forged".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json(response).await;
    assert_eq!(body["roles"], serde_json::json!(["user"]));
    assert_eq!(body["tokens"], serde_json::json!([TOKEN]));
}

#[tokio::test]
async fn test_backend_rejects_requests_that_bypass_the_gateway() {
    let dir = TempDir::new().unwrap();
    let inference_url = spawn_inference(seed_tracking(dir.path())).await;

    let response = reqwest::Client::new()
        .post(format!("{}/predict", inference_url))
        .header("X-User-Role", "admin")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Vec::new())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn test_retrain_as_user_is_forbidden_and_starts_nothing() {
    let dir = TempDir::new().unwrap();
    let inference_url = spawn_inference(seed_tracking(dir.path())).await;
    let app = gateway(&config(&inference_url), marker_jobs(dir.path(), 0));

    let response = app.oneshot(request("POST", "/retrain", ("user1", "1resu"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!dir.path().join("ingested").exists());
    assert!(!dir.path().join("trained").exists());
}

#[tokio::test]
async fn test_failed_ingestion_never_trains() {
    let dir = TempDir::new().unwrap();
    let inference_url = spawn_inference(seed_tracking(dir.path())).await;
    let app = gateway(&config(&inference_url), marker_jobs(dir.path(), 1));

    let response = app.oneshot(request("POST", "/retrain", ("admin1", "1nimda"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json(response).await["stage"], "ingestion");
    assert!(dir.path().join("ingested").exists());
    assert!(!dir.path().join("trained").exists());
}

/// Stage services over HTTP; training records a better run and the reload
/// hook switches the inference service to it.
#[tokio::test]
async fn test_retrain_over_http_reloads_new_model() {
    let dir = TempDir::new().unwrap();
    let store = seed_tracking(dir.path());
    let inference_url = spawn_inference(store).await;
    let app = gateway(&config(&inference_url), marker_jobs(dir.path(), 0));

    // Warm the cache with run-1
    let response = app.clone().oneshot(predict_request(Some(("user1", "1resu")))).await.unwrap();
    assert_eq!(json(response).await["predicted_text"], "We");

    let artifact = write_model(dir.path(), "model-two.json", 3);
    let record = format!(
        r#"printf '%s\n' '{{"run_id":"run-2","experiment_name":"{EXPERIMENT}","metric_value":0.97,"artifact_uri":"{artifact}","timestamp":"{}"}}' >> {}/tracking/runs.jsonl"#,
        Utc::now().to_rfc3339(),
        dir.path().display()
    );
    let ingest_url = spawn(stage_router(StageState::new(
        Stage::Ingestion,
        Arc::new(CommandJob::new("echo ingested")),
        Duration::from_secs(10),
        Some(TOKEN.to_string()),
    )))
    .await;
    let train_url = spawn(stage_router(StageState::new(
        Stage::Training,
        Arc::new(CommandJob::new(record)),
        Duration::from_secs(10),
        Some(TOKEN.to_string()),
    )))
    .await;

    let mut config = config(&inference_url);
    config.retrain.ingestion = StageJobConfig::Http {
        url: format!("{}/ingest", ingest_url),
        timeout_ms: 10_000,
    };
    config.retrain.training = StageJobConfig::Http {
        url: format!("{}/train", train_url),
        timeout_ms: 10_000,
    };
    config.retrain.reload_url = Some(format!("{}/reload", inference_url));
    let orchestrator =
        Orchestrator::from_config(&config.retrain, &config.trust, &config.gateway.role_header).unwrap();
    let app = gateway(&config, orchestrator);

    let response = app.clone().oneshot(request("POST", "/retrain", ("admin1", "1nimda"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json(response).await;
    assert_eq!(body["status"], "completed");
    assert_eq!(body["stages"][0]["output"], "ingested\n");
    assert_eq!(body["model_reloaded"], true);

    let response = app.oneshot(predict_request(Some(("user1", "1resu")))).await.unwrap();
    assert_eq!(json(response).await["predicted_text"], "two");
}
