//! `dense-softmax-v1` model artifact
//!
//! A single fully connected layer over the flattened 28x28x1 input followed by
//! a softmax. Stored as JSON:
//!
//! ```json
//! {"format": "dense-softmax-v1", "input": [28, 28, 1],
//!  "weights": [[w_0_0, ..., w_0_k], ...784 rows...], "bias": [b_0, ..., b_k]}
//! ```

use serde::{Deserialize, Serialize};

use super::Model;
use super::tensor::Tensor4;
use crate::error::{OcrError, Result};
use crate::inference::preprocess::{IMAGE_SIZE, input_shape};

pub const DENSE_FORMAT: &str = "dense-softmax-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseModel {
    format: String,
    input: [usize; 3],
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

impl DenseModel {
    pub fn new(weights: Vec<Vec<f32>>, bias: Vec<f32>) -> Result<Self> {
        let model = Self {
            format: DENSE_FORMAT.to_string(),
            input: [IMAGE_SIZE, IMAGE_SIZE, 1],
            weights,
            bias,
        };
        model.validate()?;
        Ok(model)
    }

    /// Model that ignores its input and always favours `class`
    pub fn constant(classes: usize, class: usize) -> Result<Self> {
        let mut bias = vec![0.0; classes];
        match bias.get_mut(class) {
            Some(b) => *b = 10.0,
            None => {
                return Err(OcrError::LoadFailure(format!(
                    "class {} out of range for {} classes",
                    class, classes
                )));
            }
        }
        Self::new(vec![vec![0.0; classes]; IMAGE_SIZE * IMAGE_SIZE], bias)
    }

    /// Parse and validate a serialized artifact
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let model: Self = serde_json::from_slice(bytes)
            .map_err(|e| OcrError::LoadFailure(format!("invalid artifact: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.format != DENSE_FORMAT {
            return Err(OcrError::LoadFailure(format!("unsupported format '{}'", self.format)));
        }
        if self.input != [IMAGE_SIZE, IMAGE_SIZE, 1] {
            return Err(OcrError::LoadFailure(format!("unsupported input shape {:?}", self.input)));
        }
        let features = IMAGE_SIZE * IMAGE_SIZE;
        if self.weights.len() != features {
            return Err(OcrError::LoadFailure(format!(
                "expected {} weight rows, found {}",
                features,
                self.weights.len()
            )));
        }
        if self.bias.is_empty() {
            return Err(OcrError::LoadFailure("model has no output classes".to_string()));
        }
        if self.weights.iter().any(|row| row.len() != self.bias.len()) {
            return Err(OcrError::LoadFailure("weight row width does not match bias".to_string()));
        }
        let finite = self.bias.iter().chain(self.weights.iter().flatten()).all(|v| v.is_finite());
        if !finite {
            return Err(OcrError::LoadFailure("non-finite parameter".to_string()));
        }
        Ok(())
    }
}

impl Model for DenseModel {
    fn predict(&self, input: &Tensor4) -> Result<Vec<f32>> {
        if input.shape() != input_shape() {
            return Err(OcrError::InferenceError(format!(
                "expected input shape {:?}, got {:?}",
                input_shape(),
                input.shape()
            )));
        }

        let mut logits = self.bias.clone();
        for (x, row) in input.data().iter().zip(&self.weights) {
            if *x == 0.0 {
                continue;
            }
            for (logit, w) in logits.iter_mut().zip(row) {
                *logit += x * w;
            }
        }

        let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f32 = exps.iter().sum();
        Ok(exps.into_iter().map(|e| e / sum).collect())
    }

    fn output_size(&self) -> usize {
        self.bias.len()
    }
}
