pub mod model_handle;
pub mod model_resolver;
pub mod onnx_inference_engine;
pub mod preprocessor;
pub mod timed_inference;
