use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, SendError, Sender};

use crate::detection::domain::inference_engine::{InferenceError, InputTensor};

use super::model_handle::SharedEngine;

/// Runs inference on a long-lived worker thread and gives up after `timeout`.
///
/// A timed-out call keeps running on the worker; its result is dropped.
/// Until it finishes, further calls fail fast with [`InferenceError::Busy`],
/// so at most one inference runs against the model at a time. If the worker
/// dies (the engine panicked), the next call starts a fresh one.
pub struct TimedInference {
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
    worker: Option<Sender<InferenceJob>>,
}

/// Clears the in-flight flag even if the engine panics.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct InferenceJob {
    engine: SharedEngine,
    tensor: InputTensor,
    reply: Sender<Result<Vec<f32>, InferenceError>>,
    guard: InFlightGuard,
}

impl InferenceJob {
    fn run(self) {
        let InferenceJob {
            engine,
            tensor,
            reply,
            guard,
        } = self;
        let result = match engine.lock() {
            Ok(mut engine) => engine.infer(&tensor),
            Err(e) => Err(InferenceError::Failed(format!("Lock poisoned: {e}"))),
        };
        // Released before replying so the caller's next call is not Busy.
        drop(guard);
        // The receiver is gone if the caller already timed out.
        let _ = reply.send(result);
    }
}

impl TimedInference {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn infer(
        &mut self,
        engine: &SharedEngine,
        tensor: InputTensor,
    ) -> Result<Vec<f32>, InferenceError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(InferenceError::Busy);
        }
        let (reply, result_rx) = crossbeam_channel::bounded(1);
        self.dispatch(InferenceJob {
            engine: engine.clone(),
            tensor,
            reply,
            guard: InFlightGuard(self.in_flight.clone()),
        })?;

        match result_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                Err(InferenceError::Timeout(self.timeout.as_millis() as u64))
            }
            Err(RecvTimeoutError::Disconnected) => Err(InferenceError::Failed(
                "inference worker exited without a result".into(),
            )),
        }
    }

    /// Hands `job` to the worker, respawning it if the previous one died.
    fn dispatch(&mut self, job: InferenceJob) -> Result<(), InferenceError> {
        let job = match &self.worker {
            Some(worker) => match worker.send(job) {
                Ok(()) => return Ok(()),
                Err(SendError(job)) => {
                    log::warn!("Inference worker exited, starting a new one");
                    job
                }
            },
            None => job,
        };
        let worker = spawn_worker()?;
        worker
            .send(job)
            .map_err(|_| InferenceError::Failed("inference worker exited on start".into()))?;
        self.worker = Some(worker);
        Ok(())
    }
}

fn spawn_worker() -> Result<Sender<InferenceJob>, InferenceError> {
    let (job_tx, job_rx) = crossbeam_channel::unbounded::<InferenceJob>();
    thread::Builder::new()
        .name("inference".into())
        .spawn(move || {
            for job in job_rx {
                job.run();
            }
        })
        .map_err(|e| InferenceError::Failed(format!("failed to spawn inference thread: {e}")))?;
    Ok(job_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::inference_engine::InferenceEngine;
    use ndarray::Array4;
    use std::sync::Mutex;
    use std::time::Instant;

    struct SlowEngine {
        delay: Duration,
        output: Vec<f32>,
    }

    impl InferenceEngine for SlowEngine {
        fn infer(&mut self, _tensor: &InputTensor) -> Result<Vec<f32>, InferenceError> {
            thread::sleep(self.delay);
            Ok(self.output.clone())
        }
    }

    struct PanickingEngine;

    impl InferenceEngine for PanickingEngine {
        fn infer(&mut self, _tensor: &InputTensor) -> Result<Vec<f32>, InferenceError> {
            panic!("engine crashed");
        }
    }

    fn engine(delay: Duration) -> SharedEngine {
        Arc::new(Mutex::new(Box::new(SlowEngine {
            delay,
            output: vec![0.2, 0.8],
        })))
    }

    fn tensor() -> InputTensor {
        Array4::zeros((1, 3, 2, 2))
    }

    #[test]
    fn test_returns_engine_output() {
        let mut runner = TimedInference::new(Duration::from_secs(1));
        let out = runner.infer(&engine(Duration::ZERO), tensor()).unwrap();
        assert_eq!(out, vec![0.2, 0.8]);
        assert!(!runner.is_busy());
    }

    #[test]
    fn test_times_out_slow_engine() {
        let mut runner = TimedInference::new(Duration::from_millis(20));
        let start = Instant::now();

        let result = runner.infer(&engine(Duration::from_millis(300)), tensor());

        assert_eq!(result, Err(InferenceError::Timeout(20)));
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_busy_while_timed_out_call_runs() {
        let mut runner = TimedInference::new(Duration::from_millis(20));
        let slow = engine(Duration::from_millis(200));

        assert!(runner.infer(&slow, tensor()).is_err());
        assert!(runner.is_busy());
        assert_eq!(runner.infer(&slow, tensor()), Err(InferenceError::Busy));

        thread::sleep(Duration::from_millis(400));
        assert!(!runner.is_busy());
    }

    #[test]
    fn test_engine_panic_is_reported_and_clears_flag() {
        let mut runner = TimedInference::new(Duration::from_secs(1));
        let crashed: SharedEngine = Arc::new(Mutex::new(Box::new(PanickingEngine)));

        let result = runner.infer(&crashed, tensor());

        assert!(matches!(result, Err(InferenceError::Failed(_))));
        // The guard is dropped while the worker unwinds.
        thread::sleep(Duration::from_millis(50));
        assert!(!runner.is_busy());
    }

    #[test]
    fn test_worker_is_reused_across_calls() {
        let mut runner = TimedInference::new(Duration::from_secs(1));
        let healthy = engine(Duration::ZERO);

        runner.infer(&healthy, tensor()).unwrap();
        let first = runner.worker.clone().unwrap();
        runner.infer(&healthy, tensor()).unwrap();

        assert!(first.same_channel(runner.worker.as_ref().unwrap()));
    }

    #[test]
    fn test_worker_restarts_after_engine_panic() {
        let mut runner = TimedInference::new(Duration::from_secs(1));
        let crashed: SharedEngine = Arc::new(Mutex::new(Box::new(PanickingEngine)));
        assert!(runner.infer(&crashed, tensor()).is_err());
        thread::sleep(Duration::from_millis(50));

        let out = runner.infer(&engine(Duration::ZERO), tensor()).unwrap();

        assert_eq!(out, vec![0.2, 0.8]);
    }
}
