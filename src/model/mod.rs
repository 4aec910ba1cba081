//! Model handles and the production model resolution policy.

mod dense;
mod loader;
mod resolver;
mod tensor;

pub use dense::{DENSE_FORMAT, DenseModel};
pub use loader::{ArtifactLoader, ModelLoader};
pub use resolver::{ModelResolver, ResolvedModel, select_best};
pub use tensor::Tensor4;

use crate::error::Result;

/// An executable model
pub trait Model: Send + Sync {
    /// Probability vector over the label vocabulary for a batch of one
    fn predict(&self, input: &Tensor4) -> Result<Vec<f32>>;

    /// Width of the probability vector
    fn output_size(&self) -> usize;
}
