use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::detection::domain::inference_engine::{InferenceEngine, InferenceError, ModelLoader};

/// Loaded engine shared between the handle and in-flight inference calls.
pub type SharedEngine = Arc<Mutex<Box<dyn InferenceEngine>>>;

enum LoadState {
    Empty,
    Loading { attempt: u64 },
    Ready(SharedEngine),
}

struct Inner {
    loader: Box<dyn ModelLoader>,
    state: Mutex<Slot>,
    ready: Condvar,
}

struct Slot {
    state: LoadState,
    attempts: u64,
    /// Outcome of the most recent failed attempt, so its waiters see it.
    last_failure: Option<(u64, InferenceError)>,
}

/// Lazily loaded, single-flight model handle.
///
/// The first caller of [`get_or_load`](Self::get_or_load) performs the load;
/// concurrent callers block on the same attempt and receive its outcome. A
/// failed attempt leaves the handle empty so a later call can try again, and
/// an engine poisoned by a panicking inference is dropped and reloaded.
/// Clones share the same underlying model.
#[derive(Clone)]
pub struct ModelHandle {
    inner: Arc<Inner>,
}

impl ModelHandle {
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader,
                state: Mutex::new(Slot {
                    state: LoadState::Empty,
                    attempts: 0,
                    last_failure: None,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.lock()
            .map(|slot| matches!(slot.state, LoadState::Ready(_)))
            .unwrap_or(false)
    }

    /// Number of load attempts started so far.
    pub fn load_attempts(&self) -> u64 {
        self.lock().map(|slot| slot.attempts).unwrap_or(0)
    }

    pub fn get_or_load(&self) -> Result<SharedEngine, InferenceError> {
        let mut slot = self.lock()?;
        let attempt = loop {
            if matches!(&slot.state, LoadState::Ready(engine) if engine.is_poisoned()) {
                log::warn!("Recognition model panicked during inference, reloading");
                slot.state = LoadState::Empty;
            }
            let in_flight = match &slot.state {
                LoadState::Ready(engine) => return Ok(engine.clone()),
                LoadState::Loading { attempt } => Some(*attempt),
                LoadState::Empty => None,
            };
            match in_flight {
                Some(attempt) => {
                    slot = self
                        .inner
                        .ready
                        .wait_while(slot, |s| {
                            matches!(s.state, LoadState::Loading { attempt: a } if a == attempt)
                        })
                        .map_err(|e| InferenceError::ModelUnavailable(e.to_string()))?;
                    if let Some((failed, err)) = &slot.last_failure {
                        if *failed == attempt {
                            return Err(err.clone());
                        }
                    }
                }
                None => {
                    slot.attempts += 1;
                    let attempt = slot.attempts;
                    slot.state = LoadState::Loading { attempt };
                    break attempt;
                }
            }
        };
        drop(slot);

        log::info!("Loading recognition model (attempt {attempt})");
        let result = self.inner.loader.load();

        let mut slot = self.lock()?;
        let outcome = match result {
            Ok(engine) => {
                let shared: SharedEngine = Arc::new(Mutex::new(engine));
                slot.state = LoadState::Ready(shared.clone());
                slot.last_failure = None;
                log::info!("Recognition model ready");
                Ok(shared)
            }
            Err(e) => {
                let err = match e {
                    InferenceError::ModelUnavailable(_) => e,
                    other => InferenceError::ModelUnavailable(other.to_string()),
                };
                log::warn!("Model load attempt {attempt} failed: {err}");
                slot.state = LoadState::Empty;
                slot.last_failure = Some((attempt, err.clone()));
                Err(err)
            }
        };
        drop(slot);
        self.inner.ready.notify_all();
        outcome
    }

    fn lock(&self) -> Result<MutexGuard<'_, Slot>, InferenceError> {
        self.inner
            .state
            .lock()
            .map_err(|e| InferenceError::ModelUnavailable(format!("Lock poisoned: {e}")))
    }
}
