use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver, Sender};
use thiserror::Error;

use crate::capture::domain::frame_source::{FrameSource, FrameSourceError};
use crate::cart::domain::cart::{CartEdit, CartError, CartItem};
use crate::cart::domain::cart_reconciler::CartReconciler;
use crate::config::pipeline_config::{ConfigError, PipelineConfig};
use crate::detection::domain::confirmed_detection::ConfirmedDetection;
use crate::detection::infrastructure::model_handle::ModelHandle;

use super::detection_pipeline::{DetectionPipeline, PipelineError, TickOutcome};
use super::pipeline_logger::{NullPipelineLogger, PipelineLogger};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("detection is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error("failed to spawn detection loop: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("detection loop panicked; cart state was lost")]
    LoopPanicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    /// Stopped on request, or because the frame source closed.
    Stopped,
    /// A terminal pipeline error ended the loop. Restartable.
    Failed,
}

type DetectionListener = Box<dyn Fn(&ConfirmedDetection) + Send + Sync>;
type FailureListener = Box<dyn Fn(&PipelineError) + Send + Sync>;
type RejectionListener = Box<dyn Fn(&ConfirmedDetection, &CartError) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    detections: Mutex<Vec<DetectionListener>>,
    rejections: Mutex<Vec<RejectionListener>>,
    failures: Mutex<Vec<FailureListener>>,
}

impl Listeners {
    fn confirmed(&self, detection: &ConfirmedDetection) {
        for listener in lock(&self.detections).iter() {
            listener(detection);
        }
    }

    fn rejected(&self, detection: &ConfirmedDetection, error: &CartError) {
        for listener in lock(&self.rejections).iter() {
            listener(detection, error);
        }
    }

    fn failed(&self, error: &PipelineError) {
        for listener in lock(&self.failures).iter() {
            listener(error);
        }
    }
}

/// Requests served by the loop thread between ticks, so the cart has a
/// single writer.
enum Command {
    Edit(CartEdit, Sender<Result<(), CartError>>),
    Snapshot(Sender<Vec<CartItem>>),
}

struct RunningLoop {
    handle: JoinHandle<CartReconciler>,
    stop_tx: Sender<()>,
    command_tx: Sender<Command>,
    cancelled: Arc<AtomicBool>,
}

/// Owns the detection loop for one checkout.
///
/// At most one loop runs at a time. The cart survives stops and failures,
/// so calling [`start_detection`](Self::start_detection) again after a
/// `Failed` status resumes with the same items.
pub struct DetectionSession {
    model: ModelHandle,
    reconciler: Option<CartReconciler>,
    listeners: Arc<Listeners>,
    status: Arc<Mutex<SessionStatus>>,
    running: Option<RunningLoop>,
    started_at: Instant,
}

impl DetectionSession {
    pub fn new(model: ModelHandle, reconciler: CartReconciler) -> Self {
        Self {
            model,
            reconciler: Some(reconciler),
            listeners: Arc::new(Listeners::default()),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            running: None,
            started_at: Instant::now(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *lock(&self.status)
    }

    pub fn on_confirmed_detection(
        &self,
        listener: impl Fn(&ConfirmedDetection) + Send + Sync + 'static,
    ) {
        lock(&self.listeners.detections).push(Box::new(listener));
    }

    /// Called when a confirmed product could not be added to the cart (for
    /// example `CartFull`). The event is dropped and not retried.
    pub fn on_cart_rejected(
        &self,
        listener: impl Fn(&ConfirmedDetection, &CartError) + Send + Sync + 'static,
    ) {
        lock(&self.listeners.rejections).push(Box::new(listener));
    }

    pub fn on_terminal_failure(&self, listener: impl Fn(&PipelineError) + Send + Sync + 'static) {
        lock(&self.listeners.failures).push(Box::new(listener));
    }

    pub fn start_detection(
        &mut self,
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
    ) -> Result<(), SessionError> {
        self.start_detection_with_logger(config, source, Box::new(NullPipelineLogger))
    }

    pub fn start_detection_with_logger(
        &mut self,
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        logger: Box<dyn PipelineLogger>,
    ) -> Result<(), SessionError> {
        self.reap()?;
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }
        config.validate()?;
        let reconciler = self.reconciler.take().ok_or(SessionError::LoopPanicked)?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let pipeline =
            DetectionPipeline::new(&config, self.model.clone(), reconciler, cancelled.clone())
                .with_logger(logger);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let detection_loop = DetectionLoop {
            pipeline,
            source,
            interval: config.detection_interval(),
            started_at: self.started_at,
            listeners: self.listeners.clone(),
            status: self.status.clone(),
        };

        *lock(&self.status) = SessionStatus::Running;
        let spawned = std::thread::Builder::new()
            .name("detection-loop".into())
            .spawn(move || detection_loop.run(stop_rx, command_rx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                *lock(&self.status) = SessionStatus::Failed;
                return Err(SessionError::Spawn(e));
            }
        };
        log::info!(
            "Detection started: every {}ms, threshold {:.0}%",
            config.detection_interval_ms,
            config.confidence_threshold
        );

        self.running = Some(RunningLoop {
            handle,
            stop_tx,
            command_tx,
            cancelled,
        });
        Ok(())
    }

    /// Stops the loop and waits for it to exit. No-op when not running.
    ///
    /// An inference still in flight is abandoned; its result never reaches
    /// the cart.
    pub fn stop_detection(&mut self) -> Result<(), SessionError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancelled.store(true, Ordering::Relaxed);
        let _ = running.stop_tx.send(());
        self.join(running.handle)?;
        let mut status = lock(&self.status);
        if *status == SessionStatus::Running {
            *status = SessionStatus::Stopped;
        }
        log::info!("Detection stopped");
        Ok(())
    }

    /// Applies a cashier edit, in between ticks while the loop runs.
    pub fn edit_cart(&mut self, edit: CartEdit) -> Result<(), SessionError> {
        let at = self.started_at.elapsed();
        if let Some(running) = &self.running {
            let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
            if running.command_tx.send(Command::Edit(edit.clone(), reply_tx)).is_ok() {
                if let Ok(result) = reply_rx.recv() {
                    return result.map_err(SessionError::from);
                }
            }
        }
        // The loop has exited on its own; take the cart back and edit it here.
        self.reap_finished()?;
        let reconciler = self.reconciler.as_mut().ok_or(SessionError::LoopPanicked)?;
        reconciler.apply_edit(&edit, at)?;
        Ok(())
    }

    pub fn cart_items(&mut self) -> Result<Vec<CartItem>, SessionError> {
        if let Some(running) = &self.running {
            let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
            if running.command_tx.send(Command::Snapshot(reply_tx)).is_ok() {
                if let Ok(items) = reply_rx.recv() {
                    return Ok(items);
                }
            }
        }
        self.reap_finished()?;
        self.reconciler
            .as_ref()
            .map(CartReconciler::items)
            .ok_or(SessionError::LoopPanicked)
    }

    /// Blocks until the loop exits on its own (source closed or terminal
    /// failure) and returns the final status.
    pub fn wait(&mut self) -> Result<SessionStatus, SessionError> {
        if let Some(running) = self.running.take() {
            self.join(running.handle)?;
        }
        Ok(self.status())
    }

    /// Collects a loop that already exited without being asked to.
    fn reap(&mut self) -> Result<(), SessionError> {
        let finished = self
            .running
            .as_ref()
            .is_some_and(|running| running.handle.is_finished());
        if finished {
            self.reap_finished()?;
        }
        Ok(())
    }

    fn reap_finished(&mut self) -> Result<(), SessionError> {
        if let Some(running) = self.running.take() {
            self.join(running.handle)?;
        }
        Ok(())
    }

    fn join(&mut self, handle: JoinHandle<CartReconciler>) -> Result<(), SessionError> {
        match handle.join() {
            Ok(reconciler) => {
                self.reconciler = Some(reconciler);
                Ok(())
            }
            Err(_) => {
                log::error!("Detection loop panicked");
                *lock(&self.status) = SessionStatus::Failed;
                Err(SessionError::LoopPanicked)
            }
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        if let Err(e) = self.stop_detection() {
            log::warn!("Error stopping detection on drop: {e}");
        }
    }
}

struct DetectionLoop {
    pipeline: DetectionPipeline,
    source: Box<dyn FrameSource>,
    interval: Duration,
    started_at: Instant,
    listeners: Arc<Listeners>,
    status: Arc<Mutex<SessionStatus>>,
}

enum LoopControl {
    Continue,
    Exit(SessionStatus),
}

impl DetectionLoop {
    fn run(mut self, stop_rx: Receiver<()>, command_rx: Receiver<Command>) -> CartReconciler {
        let ticker = crossbeam_channel::tick(self.interval);
        // The first frame is captured immediately rather than one interval in.
        let mut control = self.on_tick();
        let final_status = loop {
            if let LoopControl::Exit(status) = control {
                break status;
            }
            control = select! {
                recv(stop_rx) -> _ => LoopControl::Exit(SessionStatus::Stopped),
                recv(command_rx) -> command => match command {
                    Ok(command) => self.on_command(command),
                    Err(_) => LoopControl::Exit(SessionStatus::Stopped),
                },
                recv(ticker) -> _ => self.on_tick(),
            };
        };
        {
            let mut status = lock(&self.status);
            if *status == SessionStatus::Running {
                *status = final_status;
            }
        }
        self.pipeline.finish()
    }

    fn on_tick(&mut self) -> LoopControl {
        let now = self.started_at.elapsed();
        let frame = match self.source.capture(now) {
            Ok(Some(frame)) => frame,
            Ok(None) => return LoopControl::Continue,
            Err(FrameSourceError::Closed) => {
                log::info!("Frame source closed, ending detection");
                return LoopControl::Exit(SessionStatus::Stopped);
            }
            Err(e) => {
                log::warn!("Skipping tick: {e}");
                return LoopControl::Continue;
            }
        };

        match self.pipeline.tick(&frame) {
            Ok(TickOutcome::Confirmed { detection, .. }) => {
                self.listeners.confirmed(&detection);
                LoopControl::Continue
            }
            Ok(TickOutcome::Dropped { detection, error }) => {
                self.listeners.rejected(&detection, &error);
                LoopControl::Continue
            }
            Ok(_) => LoopControl::Continue,
            Err(e) => {
                log::error!("Detection halted: {e}");
                *lock(&self.status) = SessionStatus::Failed;
                self.listeners.failed(&e);
                LoopControl::Exit(SessionStatus::Failed)
            }
        }
    }

    fn on_command(&mut self, command: Command) -> LoopControl {
        match command {
            Command::Edit(edit, reply) => {
                let result = self.pipeline.apply_edit(&edit, self.started_at.elapsed());
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.pipeline.reconciler().items());
            }
        }
        LoopControl::Continue
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
