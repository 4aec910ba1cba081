//! MLflow REST tracking store

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::run::{Experiment, TrainingRun};
use super::traits::TrackingStore;
use crate::error::{OcrError, Result};

const PAGE_SIZE: u32 = 1000;

/// Relative location of the serialized model inside a run's artifacts
const MODEL_ARTIFACT: &str = "model/model.json";

/// Reads experiments and runs from an MLflow tracking server
pub struct MlflowTrackingStore {
    client: Client,
    base_url: String,
    metric: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: MlflowExperiment,
}

#[derive(Debug, Deserialize)]
struct MlflowExperiment {
    experiment_id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchRunsResponse {
    #[serde(default)]
    runs: Vec<MlflowRun>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MlflowRun {
    info: MlflowRunInfo,
    #[serde(default)]
    data: MlflowRunData,
}

#[derive(Debug, Deserialize)]
struct MlflowRunInfo {
    run_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: Option<i64>,
    artifact_uri: String,
}

#[derive(Debug, Default, Deserialize)]
struct MlflowRunData {
    #[serde(default)]
    metrics: Vec<MlflowMetric>,
}

#[derive(Debug, Deserialize)]
struct MlflowMetric {
    key: String,
    value: f64,
}

impl MlflowTrackingStore {
    pub fn new(base_url: &str, metric: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| OcrError::Tracking(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            metric: metric.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/2.0/mlflow/{}", self.base_url, path)
    }

    /// Location the artifact loader can fetch.
    ///
    /// `mlflow-artifacts:` roots are served by the tracking server's artifact
    /// proxy. Other schemes are passed through unchanged.
    fn artifact_location(&self, root: &str) -> String {
        let model = format!("{}/{}", root.trim_end_matches('/'), MODEL_ARTIFACT);
        let Some(rest) = model.strip_prefix("mlflow-artifacts:") else {
            return model;
        };
        // mlflow-artifacts://host:port/path names the server explicitly
        let path = match rest.strip_prefix("//") {
            Some(authority_and_path) => authority_and_path
                .split_once('/')
                .map(|(_, path)| path)
                .unwrap_or_default(),
            None => rest,
        };
        format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}",
            self.base_url,
            path.trim_start_matches('/')
        )
    }
}

/// Convert an MLflow run, skipping unfinished runs and runs without the metric
fn to_training_run(run: MlflowRun, experiment: &str, metric: &str, artifact_uri: String) -> Option<TrainingRun> {
    if let Some(status) = &run.info.status {
        if status != "FINISHED" {
            return None;
        }
    }
    let value = run
        .data
        .metrics
        .iter()
        .find(|m| m.key == metric)
        .map(|m| m.value)?;
    let millis = run.info.end_time.or(run.info.start_time).unwrap_or(0);
    let timestamp: DateTime<Utc> = Utc.timestamp_millis_opt(millis).single()?;
    Some(TrainingRun {
        run_id: run.info.run_id,
        experiment_name: experiment.to_string(),
        metric_value: value,
        artifact_uri,
        timestamp,
    })
}

#[async_trait]
impl TrackingStore for MlflowTrackingStore {
    async fn experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let response = self
            .client
            .get(self.endpoint("experiments/get-by-name"))
            .query(&[("experiment_name", name)])
            .send()
            .await
            .map_err(|e| OcrError::Tracking(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(OcrError::Tracking(format!(
                "get-by-name returned {}",
                response.status()
            )));
        }

        let body: GetExperimentResponse = response
            .json()
            .await
            .map_err(|e| OcrError::Tracking(e.to_string()))?;
        Ok(Some(Experiment {
            experiment_id: body.experiment.experiment_id,
            name: body.experiment.name,
        }))
    }

    async fn runs(&self, experiment: &Experiment) -> Result<Vec<TrainingRun>> {
        let mut runs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = json!({
                "experiment_ids": [experiment.experiment_id],
                "max_results": PAGE_SIZE,
                "run_view_type": "ACTIVE_ONLY",
            });
            if let Some(token) = &page_token {
                request["page_token"] = json!(token);
            }

            let response = self
                .client
                .post(self.endpoint("runs/search"))
                .json(&request)
                .send()
                .await
                .map_err(|e| OcrError::Tracking(e.to_string()))?;
            if !response.status().is_success() {
                return Err(OcrError::Tracking(format!(
                    "runs/search returned {}",
                    response.status()
                )));
            }

            let page: SearchRunsResponse = response
                .json()
                .await
                .map_err(|e| OcrError::Tracking(e.to_string()))?;
            runs.extend(
                page.runs
                    .into_iter()
                    .filter_map(|r| {
                        let artifact = self.artifact_location(&r.info.artifact_uri);
                        to_training_run(r, &experiment.name, &self.metric, artifact)
                    }),
            );

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        log::debug!("Fetched {} runs for experiment '{}'", runs.len(), experiment.name);
        Ok(runs)
    }
}
