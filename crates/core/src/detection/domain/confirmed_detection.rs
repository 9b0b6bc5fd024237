use std::time::Duration;

/// Output of the classifier for one tick.
///
/// `label` is `None` when the model abstained or the confidence fell below
/// the configured floor. `confidence` is on the 0-100 scale either way.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassificationResult {
    pub label: Option<String>,
    pub confidence: f64,
}

impl ClassificationResult {
    pub fn none(confidence: f64) -> Self {
        Self {
            label: None,
            confidence,
        }
    }
}

/// One distinct physical product placement, after deduplication.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmedDetection {
    pub product_label: String,
    pub confidence: f64,
    pub timestamp: Duration,
}
