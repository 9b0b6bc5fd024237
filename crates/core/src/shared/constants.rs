pub const CLASSIFIER_MODEL_NAME: &str = "product_classifier.onnx";

/// Directory name used under the platform cache/config dirs.
pub const APP_DIR_NAME: &str = "CartSight";

pub const CONFIG_FILE_NAME: &str = "pipeline.json";

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;
pub const DEFAULT_DETECTION_INTERVAL_MS: u64 = 1500;
pub const DEFAULT_CACHE_SIZE: usize = 10;
pub const DEFAULT_CACHE_EXPIRY_MS: u64 = 3000;
pub const DEFAULT_INFERENCE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
pub const DEFAULT_MAX_CART_ITEMS: u32 = 50;

/// Square model input resolution (224x224x3).
pub const DEFAULT_INPUT_SIZE: u32 = 224;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];
