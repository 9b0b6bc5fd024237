/// Product classifier backed by ONNX Runtime via `ort`.
///
/// Expects a single NCHW float input and a `[1, K]` output over the label
/// catalog. Outputs that are not already a probability distribution are
/// passed through softmax.
use std::path::{Path, PathBuf};

use crate::detection::domain::inference_engine::{
    InferenceEngine, InferenceError, InputTensor, ModelLoader,
};

/// Tolerance when deciding whether an output already sums to one.
const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

pub struct OnnxInferenceEngine {
    session: ort::session::Session,
    input_size: Option<u32>,
}

impl OnnxInferenceEngine {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let session = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .with_execution_providers(preferred_execution_providers())?
            .commit_from_file(model_path)?;

        // NCHW: [1, 3, H, W]; dynamic dimensions are reported as -1.
        let input_size = session.inputs().first().and_then(|input| {
            if let ort::value::ValueType::Tensor { ref shape, .. } = input.dtype() {
                if shape.len() >= 4 && shape[2] > 0 {
                    Some(shape[2] as u32)
                } else {
                    None
                }
            } else {
                None
            }
        });

        Ok(Self {
            session,
            input_size,
        })
    }

    /// Square input resolution declared by the model, if fixed.
    pub fn input_size(&self) -> Option<u32> {
        self.input_size
    }
}

impl InferenceEngine for OnnxInferenceEngine {
    fn infer(&mut self, tensor: &InputTensor) -> Result<Vec<f32>, InferenceError> {
        let input_value = ort::value::Tensor::from_array(tensor.clone())
            .map_err(|e| InferenceError::Failed(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input_value])
            .map_err(|e| InferenceError::Failed(e.to_string()))?;
        if outputs.len() == 0 {
            return Err(InferenceError::Failed(
                "classifier model produced no outputs".into(),
            ));
        }
        let scores = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| InferenceError::Failed(e.to_string()))?;

        Ok(to_probabilities(scores.iter().copied().collect()))
    }
}

/// Loads [`OnnxInferenceEngine`] from a resolved model path.
///
/// `input_size` is the resolution the preprocessor produces; a model with a
/// different fixed input shape is rejected at load time.
pub struct OnnxModelLoader {
    model_path: PathBuf,
    input_size: u32,
}

impl OnnxModelLoader {
    pub fn new(model_path: PathBuf, input_size: u32) -> Self {
        Self {
            model_path,
            input_size,
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn InferenceEngine>, InferenceError> {
        if !self.model_path.exists() {
            return Err(InferenceError::ModelUnavailable(format!(
                "model file not found: {}",
                self.model_path.display()
            )));
        }
        let engine = OnnxInferenceEngine::new(&self.model_path)
            .map_err(|e| InferenceError::ModelUnavailable(e.to_string()))?;
        check_input_size(engine.input_size(), self.input_size)?;
        log::info!(
            "Classifier input resolution: {0}x{0}",
            engine.input_size().unwrap_or(self.input_size)
        );
        Ok(Box::new(engine))
    }
}

/// Dynamic model inputs accept any size; fixed ones must match `expected`.
fn check_input_size(model: Option<u32>, expected: u32) -> Result<(), InferenceError> {
    match model {
        Some(size) if size != expected => Err(InferenceError::ModelUnavailable(format!(
            "model expects {size}x{size} input but input_size is configured as {expected}"
        ))),
        _ => Ok(()),
    }
}

/// CoreML on macOS, DirectML on Windows, CPU elsewhere.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

/// Returns `scores` unchanged if they already form a distribution,
/// otherwise their softmax.
fn to_probabilities(scores: Vec<f32>) -> Vec<f32> {
    let in_range = scores.iter().all(|s| (0.0..=1.0).contains(s));
    let sum: f32 = scores.iter().sum();
    if scores.is_empty() || (in_range && (sum - 1.0).abs() <= PROBABILITY_SUM_TOLERANCE) {
        return scores;
    }
    softmax(&scores)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.iter().map(|e| e / total).collect()
    } else {
        vec![0.0; logits.len()]
    }
}
