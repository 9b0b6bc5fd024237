use thiserror::Error;

use super::confirmed_detection::ClassificationResult;

/// The model produced a winning index the label catalog cannot name.
///
/// Indicates a mismatch between the deployed model and the configured
/// catalog; never recoverable by retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("classifier index {index} outside label catalog of size {catalog_size}")]
pub struct ClassifierIndexError {
    pub index: usize,
    pub catalog_size: usize,
}

/// Converts raw model probabilities into a `(label, confidence)` pair.
///
/// Confidence is `probability * 100`; results below `threshold` (same
/// scale) carry no label.
pub struct DetectionClassifier {
    labels: Vec<String>,
    threshold: f64,
}

impl DetectionClassifier {
    pub fn new(labels: Vec<String>, threshold: f64) -> Self {
        Self { labels, threshold }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(
        &self,
        probabilities: &[f32],
    ) -> Result<ClassificationResult, ClassifierIndexError> {
        let Some((index, probability)) = argmax(probabilities) else {
            return Ok(ClassificationResult::none(0.0));
        };

        if index >= self.labels.len() {
            return Err(ClassifierIndexError {
                index,
                catalog_size: self.labels.len(),
            });
        }

        let confidence = to_percent(probability);
        if confidence < self.threshold {
            return Ok(ClassificationResult::none(confidence));
        }

        Ok(ClassificationResult {
            label: Some(self.labels[index].clone()),
            confidence,
        })
    }
}

/// Probability as a percentage, rounded to hundredths so that values such as
/// `0.7f32` land exactly on `70.0`.
fn to_percent(probability: f32) -> f64 {
    (f64::from(probability) * 10_000.0).round() / 100.0
}

/// Index and value of the largest finite entry. Earliest index wins ties.
fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn classifier() -> DetectionClassifier {
        DetectionClassifier::new(
            vec!["Botella".into(), "Lata".into(), "Galletas".into()],
            70.0,
        )
    }

    #[test]
    fn test_picks_highest_probability_label() {
        let result = classifier().classify(&[0.05, 0.85, 0.10]).unwrap();
        assert_eq!(result.label.as_deref(), Some("Lata"));
        assert_relative_eq!(result.confidence, 85.0, epsilon = 1e-4);
    }

    #[rstest]
    #[case(0.65, None)]
    #[case(0.6999, None)]
    #[case(0.70, Some("Botella"))]
    #[case(0.95, Some("Botella"))]
    fn test_threshold_gating(#[case] p: f32, #[case] expected: Option<&str>) {
        let rest = (1.0 - p) / 2.0;
        let result = classifier().classify(&[p, rest, rest]).unwrap();
        assert_eq!(result.label.as_deref(), expected);
    }

    #[test]
    fn test_below_threshold_still_reports_confidence() {
        let result = classifier().classify(&[0.65, 0.20, 0.15]).unwrap();
        assert!(result.label.is_none());
        assert_relative_eq!(result.confidence, 65.0, epsilon = 1e-4);
    }

    #[test]
    fn test_index_outside_catalog_is_error() {
        let err = classifier().classify(&[0.0, 0.0, 0.0, 0.9]).unwrap_err();
        assert_eq!(
            err,
            ClassifierIndexError {
                index: 3,
                catalog_size: 3
            }
        );
    }

    #[test]
    fn test_low_confidence_out_of_catalog_index_still_errors() {
        // A mismatched model is a bug regardless of how confident it is.
        let err = classifier().classify(&[0.1, 0.1, 0.1, 0.2]);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_probabilities_abstain() {
        let result = classifier().classify(&[]).unwrap();
        assert_eq!(result, ClassificationResult::none(0.0));
    }

    #[test]
    fn test_nan_entries_ignored() {
        let result = classifier().classify(&[f32::NAN, 0.9, 0.1]).unwrap();
        assert_eq!(result.label.as_deref(), Some("Lata"));
    }

    #[test]
    fn test_all_nan_abstains() {
        let result = classifier().classify(&[f32::NAN, f32::NAN]).unwrap();
        assert!(result.label.is_none());
    }

    #[test]
    fn test_tie_prefers_first_index() {
        let result = DetectionClassifier::new(vec!["A".into(), "B".into()], 0.0)
            .classify(&[0.5, 0.5])
            .unwrap();
        assert_eq!(result.label.as_deref(), Some("A"));
    }
}
