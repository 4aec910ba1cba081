//! ocrgate - serving and orchestration for a handwriting OCR model
//!
//! A gateway authenticates callers and forwards predictions to an inference
//! service, which serves the best run recorded in a tracking store. Admins can
//! trigger a retrain that runs ingestion then training as external jobs.

pub mod auth;
pub mod config;
pub mod error;
pub mod id;
pub mod inference;
pub mod model;
pub mod retrain;
pub mod server;
pub mod tracking;

pub use error::{OcrError, Result};
