use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cart::domain::cart::{CartEdit, CartError, CartItem};
use crate::cart::domain::cart_reconciler::CartReconciler;
use crate::config::pipeline_config::PipelineConfig;
use crate::detection::domain::confirmed_detection::ConfirmedDetection;
use crate::detection::domain::detection_classifier::{ClassifierIndexError, DetectionClassifier};
use crate::detection::domain::inference_engine::InferenceError;
use crate::detection::domain::temporal_deduplicator::{DedupDecision, TemporalDeduplicator};
use crate::detection::infrastructure::model_handle::{ModelHandle, SharedEngine};
use crate::detection::infrastructure::preprocessor::{PreprocessError, Preprocessor};
use crate::detection::infrastructure::timed_inference::TimedInference;
use crate::shared::frame::Frame;

use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};
use super::retry_governor::{RetriesExhausted, RetryError, RetryGovernor, RetryPolicy};

/// Failures that end the detection loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("detection unavailable after {attempts} attempts: {source}")]
    DetectionUnavailable {
        attempts: u32,
        #[source]
        source: InferenceError,
    },
    #[error(transparent)]
    ClassifierIndex(#[from] ClassifierIndexError),
}

impl From<RetriesExhausted> for PipelineError {
    fn from(e: RetriesExhausted) -> Self {
        PipelineError::DetectionUnavailable {
            attempts: e.attempts,
            source: e.last_error,
        }
    }
}

/// Why a tick produced no classification.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Preprocess(PreprocessError),
    /// A timed-out inference is still occupying the model.
    Busy,
    /// Timeout or engine error, counted by the retry governor.
    Inference(InferenceError),
}

#[derive(Debug)]
pub enum TickOutcome {
    /// A new placement was confirmed and applied to the cart.
    Confirmed {
        detection: ConfirmedDetection,
        item: CartItem,
    },
    /// The label is still held from an earlier confirmation.
    Suppressed {
        label: String,
        occurrence_count: u32,
    },
    /// The model abstained or scored below the threshold.
    NoDetection { confidence: f64 },
    Skipped(SkipReason),
    /// Confirmed, but the cart refused it. Not retried.
    Dropped {
        detection: ConfirmedDetection,
        error: CartError,
    },
    /// Cancellation arrived mid-tick; nothing was touched.
    Discarded,
}

/// Per-frame pass: preprocess → infer → classify → dedupe → reconcile.
///
/// Owns every piece of per-session state (cache, cart, retry streak) and is
/// driven by a single thread, so none of it needs locking. The model handle
/// is the only part shared with other threads.
pub struct DetectionPipeline {
    preprocessor: Preprocessor,
    model: ModelHandle,
    inference: TimedInference,
    classifier: DetectionClassifier,
    deduplicator: TemporalDeduplicator,
    reconciler: CartReconciler,
    governor: RetryGovernor,
    cancelled: Arc<AtomicBool>,
    logger: Box<dyn PipelineLogger>,
    ticks: u64,
}

impl DetectionPipeline {
    pub fn new(
        config: &PipelineConfig,
        model: ModelHandle,
        mut reconciler: CartReconciler,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        reconciler.set_max_cart_items(config.max_cart_items);
        Self {
            preprocessor: Preprocessor::new(config.input_size, config.normalization),
            model,
            inference: TimedInference::new(config.inference_timeout()),
            classifier: DetectionClassifier::new(
                config.labels.clone(),
                config.confidence_threshold,
            ),
            deduplicator: TemporalDeduplicator::new(config.cache_size, config.cache_expiry()),
            reconciler,
            governor: RetryGovernor::new(RetryPolicy::from_config(config), cancelled.clone()),
            cancelled,
            logger: Box::new(NullPipelineLogger),
            ticks: 0,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn reconciler(&self) -> &CartReconciler {
        &self.reconciler
    }

    pub fn deduplicator(&self) -> &TemporalDeduplicator {
        &self.deduplicator
    }

    pub fn apply_edit(&mut self, edit: &CartEdit, at: Duration) -> Result<(), CartError> {
        self.reconciler.apply_edit(edit, at)?;
        self.logger
            .metric("cart_units", f64::from(self.reconciler.cart().total_units()));
        Ok(())
    }

    /// Emits the logger summary and hands the cart back to the caller.
    pub fn finish(self) -> CartReconciler {
        self.logger.summary();
        self.reconciler
    }

    pub fn tick(&mut self, frame: &Frame) -> Result<TickOutcome, PipelineError> {
        let now = frame.captured_at();
        self.logger.tick(self.ticks);
        self.ticks += 1;

        if self.is_cancelled() {
            return Ok(TickOutcome::Discarded);
        }
        self.deduplicator.expire(now);

        let started = Instant::now();
        let tensor = match self.preprocessor.process(frame) {
            Ok(tensor) => tensor,
            Err(e) => {
                log::warn!("Skipping frame at {}ms: {e}", now.as_millis());
                return Ok(TickOutcome::Skipped(SkipReason::Preprocess(e)));
            }
        };
        self.logger.timing("preprocess", elapsed_ms(started));

        let Some(engine) = self.acquire_model()? else {
            return Ok(TickOutcome::Discarded);
        };

        let started = Instant::now();
        let inferred = self.inference.infer(&engine, tensor);
        self.logger.timing("infer", elapsed_ms(started));
        if self.is_cancelled() {
            log::debug!("Discarding inference result after cancellation");
            return Ok(TickOutcome::Discarded);
        }
        let probabilities = match inferred {
            Ok(probabilities) => {
                self.governor.record_success();
                probabilities
            }
            Err(InferenceError::Busy) => {
                log::debug!("Previous inference still running, skipping tick");
                return Ok(TickOutcome::Skipped(SkipReason::Busy));
            }
            Err(e) => {
                self.governor.record_failure(&e)?;
                return Ok(TickOutcome::Skipped(SkipReason::Inference(e)));
            }
        };

        let started = Instant::now();
        let classification = match self.classifier.classify(&probabilities) {
            Ok(classification) => classification,
            Err(e) => {
                log::error!("Model and label catalog disagree: {e}");
                return Err(e.into());
            }
        };
        self.logger.timing("classify", elapsed_ms(started));
        self.logger.metric("confidence", classification.confidence);

        let Some(label) = classification.label else {
            return Ok(TickOutcome::NoDetection {
                confidence: classification.confidence,
            });
        };

        match self.deduplicator.observe(&label, now) {
            DedupDecision::Suppressed { occurrence_count } => {
                self.logger
                    .metric("occurrence_count", f64::from(occurrence_count));
                Ok(TickOutcome::Suppressed {
                    label,
                    occurrence_count,
                })
            }
            DedupDecision::Confirmed { .. } => {
                let detection = ConfirmedDetection {
                    product_label: label,
                    confidence: classification.confidence,
                    timestamp: now,
                };
                Ok(self.reconcile(detection))
            }
        }
    }

    fn reconcile(&mut self, detection: ConfirmedDetection) -> TickOutcome {
        let started = Instant::now();
        let applied = self.reconciler.apply_confirmed_detection(&detection);
        self.logger.timing("reconcile", elapsed_ms(started));
        match applied {
            Ok(item) => {
                self.logger
                    .metric("cart_units", f64::from(self.reconciler.cart().total_units()));
                TickOutcome::Confirmed { detection, item }
            }
            Err(error) => {
                log::warn!(
                    "Dropping detection of '{}': {error}",
                    detection.product_label
                );
                TickOutcome::Dropped { detection, error }
            }
        }
    }

    /// `Ok(None)` when cancelled while waiting to retry.
    fn acquire_model(&mut self) -> Result<Option<SharedEngine>, PipelineError> {
        let model = &self.model;
        match self.governor.retry(|| model.get_or_load()) {
            Ok(engine) => Ok(Some(engine)),
            Err(RetryError::Cancelled) => Ok(None),
            Err(RetryError::Exhausted(e)) => Err(e.into()),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}
