use ndarray::Array4;
use thiserror::Error;

/// NCHW float tensor fed to the model.
pub type InputTensor = Array4<f32>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference exceeded timeout of {0} ms")]
    Timeout(u64),
    #[error("previous inference still running")]
    Busy,
    #[error("inference failed: {0}")]
    Failed(String),
}

/// Domain interface for a loaded recognition model.
///
/// Maps an input tensor to a probability vector over the fixed label
/// catalog. Implementations may hold mutable runtime state, hence `&mut self`.
pub trait InferenceEngine: Send {
    fn infer(&mut self, tensor: &InputTensor) -> Result<Vec<f32>, InferenceError>;
}

/// Produces an [`InferenceEngine`] from a model artifact.
///
/// Loading is expensive and is expected to happen once per process through
/// a `ModelHandle`.
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn InferenceEngine>, InferenceError>;
}
