//! Inference: image preprocessing, arg-max decoding and request metrics.

pub mod labels;
pub mod metrics;
pub mod preprocess;
mod service;

pub use labels::LabelVocabulary;
pub use metrics::InferenceMetrics;
pub use preprocess::{IMAGE_SIZE, preprocess_bytes};
pub use service::{InferenceService, PredictionResult};
