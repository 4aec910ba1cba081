//! Prediction service

use std::sync::Arc;
use std::time::Instant;

use log::{error, info};
use serde::Serialize;

use super::labels::LabelVocabulary;
use super::metrics::InferenceMetrics;
use super::preprocess::preprocess_bytes;
use crate::error::Result;
use crate::model::ModelResolver;

/// Outcome of one prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: String,
    pub run_id: String,
}

pub struct InferenceService {
    resolver: Arc<ModelResolver>,
    labels: LabelVocabulary,
    metrics: Arc<InferenceMetrics>,
}

impl InferenceService {
    pub fn new(resolver: Arc<ModelResolver>, labels: LabelVocabulary) -> Result<Self> {
        Ok(Self {
            resolver,
            labels,
            metrics: Arc::new(InferenceMetrics::new()?),
        })
    }

    pub fn resolver(&self) -> &Arc<ModelResolver> {
        &self.resolver
    }

    pub fn metrics(&self) -> &Arc<InferenceMetrics> {
        &self.metrics
    }

    /// Preprocess `image_bytes`, run the active model and decode the arg-max label
    pub async fn predict(&self, image_bytes: &[u8]) -> Result<PredictionResult> {
        self.metrics.record_request();
        let result = self.run(image_bytes).await;
        match &result {
            Ok(prediction) => info!(
                "Prediction successful: {} (run {})",
                prediction.label, prediction.run_id
            ),
            Err(e) => {
                self.metrics.record_failure();
                error!("Prediction failed: {}", e);
            }
        }
        result
    }

    async fn run(&self, image_bytes: &[u8]) -> Result<PredictionResult> {
        let input = preprocess_bytes(image_bytes)?;
        let model = self.resolver.current().await?;

        let started = Instant::now();
        let probabilities = model.handle.predict(&input)?;
        let label = self.labels.decode(&probabilities)?.to_string();
        self.metrics.observe_inference(started.elapsed());

        Ok(PredictionResult {
            label,
            run_id: model.run.run_id.clone(),
        })
    }
}
