//! Frame scheduling: ties camera frames to asynchronous segmentation.
//!
//! The scheduler runs as a single tokio task. It reacts to three kinds of
//! events: control commands from a [`SchedulerHandle`], new camera frames,
//! and completed engine jobs. The segmentation engine is moved into a job
//! for every inference or model load and handed back with the result, so at
//! most one engine call can ever be outstanding. Frames that arrive while the
//! engine is busy, inferring or loading a model, replace a single pending
//! slot; they never queue. Frames reach the output unsegmented only when no
//! engine is configured at all.

mod events;
mod handle;
mod state;

pub use events::{PipelineEvent, PipelineListener};
pub use handle::SchedulerHandle;
pub use state::SessionState;
use state::SchedulerState;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

use crate::background::{BackgroundAsset, BackgroundSource};
use crate::capture::FrameSource;
use crate::compositor;
use crate::config::SegmentationConfig;
use crate::error::{describe, CameraError, ErrorKind, InferenceError, ModelLoadError, SessionError};
use crate::frame::{Composite, Frame, Resolution, SegmentationMask};
use crate::output::OutputSink;
use crate::segmentation::SegmentationEngine;
use handle::Command;

/// Log pipeline statistics every this many rendered frames.
const STATS_INTERVAL: u64 = 30;

enum EngineSlot {
    /// No segmentation configured; every frame passes through.
    Absent,
    Idle(SegmentationEngine),
    /// Moved into a running job.
    Busy,
}

enum EngineJob {
    Inferred {
        engine: SegmentationEngine,
        epoch: u64,
        frame: Arc<Frame>,
        result: Result<SegmentationMask, InferenceError>,
        elapsed: Duration,
    },
    Initialized {
        engine: SegmentationEngine,
        result: Result<(), ModelLoadError>,
    },
}

#[derive(Default)]
struct FrameStats {
    rendered: u64,
    dropped: u64,
    inferences: u64,
    inference_time: Duration,
    composite_time: Duration,
}

impl FrameStats {
    fn record_render(&mut self) {
        self.rendered += 1;
        if self.rendered % STATS_INTERVAL != 0 {
            return;
        }

        let avg_infer_ms = if self.inferences > 0 {
            self.inference_time.as_secs_f64() * 1000.0 / self.inferences as f64
        } else {
            0.0
        };
        let avg_composite_ms = self.composite_time.as_secs_f64() * 1000.0 / self.rendered as f64;

        tracing::info!(
            rendered = self.rendered,
            dropped = self.dropped,
            infer_ms = round_ms(avg_infer_ms),
            composite_ms = round_ms(avg_composite_ms),
            "pipeline stats"
        );
    }
}

fn round_ms(ms: f64) -> f64 {
    (ms * 10.0).round() / 10.0
}

/// Drives capture, segmentation and compositing for one camera.
pub struct FrameScheduler {
    source: FrameSource,
    engine: EngineSlot,
    sink: Option<Box<dyn OutputSink>>,
    listeners: Vec<Box<dyn PipelineListener>>,

    config: SegmentationConfig,
    reload_requested: bool,
    /// The last model load failed; frames are dropped until a reload works.
    model_failed: bool,

    background_source: BackgroundSource,
    background: Option<Arc<BackgroundAsset>>,
    resolution: Option<Resolution>,

    session: SessionState,
    state: SchedulerState,
    epoch: u64,
    frames: Option<watch::Receiver<Option<Arc<Frame>>>>,
    pending: Option<Arc<Frame>>,

    state_tx: watch::Sender<SessionState>,
    latest_tx: watch::Sender<Option<Arc<Composite>>>,
    jobs_tx: mpsc::UnboundedSender<EngineJob>,
    jobs_rx: mpsc::UnboundedReceiver<EngineJob>,
    stats: FrameStats,
}

impl FrameScheduler {
    /// Without an engine the scheduler runs in passthrough mode.
    pub fn new(source: FrameSource, engine: Option<SegmentationEngine>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (latest_tx, _) = watch::channel(None);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let engine = match engine {
            Some(engine) => EngineSlot::Idle(engine),
            None => EngineSlot::Absent,
        };

        Self {
            source,
            reload_requested: matches!(engine, EngineSlot::Idle(_)),
            engine,
            sink: None,
            listeners: Vec::new(),
            config: SegmentationConfig::default(),
            model_failed: false,
            background_source: BackgroundSource::default(),
            background: None,
            resolution: None,
            session: SessionState::Idle,
            state: SchedulerState::Idle,
            epoch: 0,
            frames: None,
            pending: None,
            state_tx,
            latest_tx,
            jobs_tx,
            jobs_rx,
            stats: FrameStats::default(),
        }
    }

    pub fn with_sink<S: OutputSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    pub fn with_config(mut self, config: SegmentationConfig) -> Self {
        self.config = config.clamped();
        self
    }

    pub fn with_background(mut self, source: BackgroundSource) -> Self {
        self.background_source = source;
        self.background = None;
        self
    }

    pub fn add_listener<L: PipelineListener + 'static>(&mut self, listener: L) {
        self.listeners.push(Box::new(listener));
    }

    /// Move the scheduler onto its own task. Must be called inside a tokio
    /// runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = self.state_tx.subscribe();
        let latest = self.latest_tx.subscribe();
        let task = tokio::spawn(self.run(command_rx));

        SchedulerHandle {
            commands,
            state,
            latest,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("frame scheduler running");
        self.reconcile();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                frame = next_frame(&mut self.frames) => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => self.on_camera_lost().await,
                },
                Some(job) = self.jobs_rx.recv() => self.on_job(job),
            }
        }

        self.stop_session().await;
        tracing::debug!("frame scheduler exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { hint, reply } => {
                let result = self.start_session(hint).await;
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                self.stop_session().await;
                let _ = reply.send(());
            }
            Command::Reset { reply } => {
                self.reset_session().await;
                let _ = reply.send(());
            }
            Command::SetBackground(source) => {
                tracing::info!(image = source.is_image(), "background source changed");
                self.background_source = source;
                self.background = None;
                self.reconcile();
            }
            Command::Configure(config) => {
                let config = config.clamped();
                // Effect changes apply to the next composite; only model
                // parameters, or a previous failed load, warrant a reload.
                let reload = !matches!(self.engine, EngineSlot::Absent)
                    && (self.model_failed || self.config.requires_reload(&config));
                if config != self.config {
                    tracing::info!(?config, "segmentation config changed");
                    self.config = config;
                }
                if reload {
                    tracing::info!(tier = ?self.config.model_tier, "reloading segmentation model");
                    self.reload_requested = true;
                    self.reconcile();
                }
            }
            Command::Subscribe(listener) => self.listeners.push(listener),
            Command::Shutdown => {}
        }
    }

    async fn start_session(&mut self, hint: Resolution) -> Result<Resolution, SessionError> {
        match self.session {
            SessionState::Error => return Err(SessionError::NeedsReset),
            SessionState::Idle => {}
            _ => return Err(CameraError::AlreadyActive.into()),
        }

        self.set_session(SessionState::Starting);

        let stream = match self.source.start(hint).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(error = %err, "camera failed to start");
                self.emit_error(ErrorKind::CameraAccess, &describe(&err));
                self.source.stop().await;
                self.set_session(SessionState::Error);
                return Err(err.into());
            }
        };

        self.epoch += 1;
        self.pending = None;
        self.frames = Some(stream.frames());
        self.resolution = Some(stream.resolution());
        if let EngineSlot::Idle(engine) = &mut self.engine {
            engine.reset();
        }
        self.reconcile();

        self.set_state(SchedulerState::WaitingForFrame);
        self.set_session(SessionState::Active);
        Ok(stream.resolution())
    }

    async fn stop_session(&mut self) {
        // Releasing the device is unconditional; it is a no-op when idle.
        self.source.stop().await;
        self.frames = None;
        self.pending = None;

        if matches!(self.session, SessionState::Idle | SessionState::Error) {
            return;
        }

        self.set_session(SessionState::Stopping);
        // In-flight results from this session become inert.
        self.epoch += 1;
        self.set_state(SchedulerState::Idle);
        self.set_session(SessionState::Idle);
    }

    async fn reset_session(&mut self) {
        if self.session != SessionState::Error {
            tracing::debug!(session = %self.session, "reset ignored outside error state");
            return;
        }
        self.source.stop().await;
        self.set_state(SchedulerState::Idle);
        self.set_session(SessionState::Idle);
    }

    async fn on_camera_lost(&mut self) {
        self.frames = None;
        if self.session != SessionState::Active {
            return;
        }

        tracing::error!("camera stream ended unexpectedly");
        self.emit_error(ErrorKind::CameraAccess, "camera stream ended unexpectedly");
        self.source.stop().await;
        self.pending = None;
        self.epoch += 1;
        self.set_state(SchedulerState::Idle);
        self.set_session(SessionState::Error);
    }

    fn on_frame(&mut self, frame: Arc<Frame>) {
        if self.session != SessionState::Active {
            return;
        }

        let resolution = frame.resolution();
        if self.resolution != Some(resolution) {
            tracing::info!(resolution = %resolution, "frame size changed");
            self.resolution = Some(resolution);
            self.reconcile();
        }

        self.dispatch(frame);
    }

    /// Route a frame by engine availability: segment it, hold it while the
    /// engine is busy, drop it while no model is loaded, or pass it through
    /// when segmentation is not configured.
    fn dispatch(&mut self, frame: Arc<Frame>) {
        match &self.engine {
            EngineSlot::Absent => {
                self.set_state(SchedulerState::Compositing);
                self.render(compositor::passthrough(&frame));
                self.set_state(SchedulerState::WaitingForFrame);
            }
            EngineSlot::Busy => {
                if let Some(stale) = self.pending.replace(frame) {
                    tracing::trace!(sequence = stale.sequence, "replaced pending frame");
                    self.stats.dropped += 1;
                }
            }
            EngineSlot::Idle(engine) if engine.is_ready() => self.submit(frame),
            EngineSlot::Idle(_) => {
                tracing::debug!(sequence = frame.sequence, "no segmentation model loaded, dropping frame");
                self.stats.dropped += 1;
                self.set_state(SchedulerState::WaitingForFrame);
            }
        }
    }

    fn submit(&mut self, frame: Arc<Frame>) {
        match std::mem::replace(&mut self.engine, EngineSlot::Busy) {
            EngineSlot::Idle(engine) => {
                self.set_state(SchedulerState::Inferring);
                let jobs = self.jobs_tx.clone();
                let epoch = self.epoch;
                tokio::spawn(async move {
                    let mut engine = engine;
                    let started = Instant::now();
                    let result = engine.infer(Arc::clone(&frame)).await;
                    let _ = jobs.send(EngineJob::Inferred {
                        engine,
                        epoch,
                        frame,
                        result,
                        elapsed: started.elapsed(),
                    });
                });
            }
            slot => self.engine = slot,
        }
    }

    fn on_job(&mut self, job: EngineJob) {
        match job {
            EngineJob::Inferred {
                engine,
                epoch,
                frame,
                result,
                elapsed,
            } => {
                self.engine = EngineSlot::Idle(engine);
                self.stats.inferences += 1;
                self.stats.inference_time += elapsed;

                if matches!(result, Err(InferenceError::Panicked)) {
                    tracing::warn!("segmentation model lost after a panic, reloading");
                    self.reload_requested = true;
                }

                if epoch != self.epoch || self.session != SessionState::Active {
                    tracing::debug!(sequence = frame.sequence, "discarding result from stopped session");
                } else {
                    self.complete(&frame, result);
                }
            }
            EngineJob::Initialized { engine, result } => {
                self.engine = EngineSlot::Idle(engine);
                match result {
                    Ok(()) => self.model_failed = false,
                    Err(err) => {
                        tracing::warn!(error = %err, "segmentation model failed to load");
                        self.model_failed = true;
                        self.emit_error(ErrorKind::ModelLoad, &describe(&err));
                    }
                }
            }
        }

        // A config change may have arrived while the engine was busy.
        self.reconcile();

        if self.session != SessionState::Active {
            self.set_state(SchedulerState::Idle);
            return;
        }

        match self.pending.take() {
            Some(frame) => self.dispatch(frame),
            None => self.set_state(SchedulerState::WaitingForFrame),
        }
    }

    fn complete(&mut self, frame: &Frame, result: Result<SegmentationMask, InferenceError>) {
        let mask = match result {
            Ok(mask) => mask,
            Err(err) => {
                tracing::warn!(sequence = frame.sequence, error = %err, "inference failed, dropping frame");
                self.emit_error(ErrorKind::Inference, &describe(&err));
                self.stats.dropped += 1;
                return;
            }
        };

        self.set_state(SchedulerState::Compositing);
        let background = self.background_for(frame.resolution());
        let started = Instant::now();

        match compositor::composite(frame, &mask, &background, &self.config.effects) {
            Ok(composite) => {
                self.stats.composite_time += started.elapsed();
                self.render(composite);
            }
            Err(err) => {
                tracing::warn!(sequence = frame.sequence, error = %err, "composite failed, dropping frame");
                self.emit_error(ErrorKind::Composite, &err.to_string());
                self.stats.dropped += 1;
            }
        }
    }

    fn render(&mut self, composite: Composite) {
        let composite = Arc::new(composite);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = sink.write_frame(&composite.image) {
                tracing::warn!(error = %err, "failed to write composite to output");
                self.emit_error(ErrorKind::Output, &format!("{err:#}"));
            }
        }

        self.latest_tx.send_replace(Some(Arc::clone(&composite)));
        for listener in &mut self.listeners {
            listener.on_frame_ready(&composite);
        }
        self.stats.record_render();
    }

    /// Bring derived state in line with the tracked inputs: background
    /// source, frame size and segmentation config.
    fn reconcile(&mut self) {
        if let Some(resolution) = self.resolution {
            let stale = self
                .background
                .as_ref()
                .map_or(true, |asset| asset.resolution() != resolution);
            if stale {
                self.background = Some(Arc::new(BackgroundAsset::from_source(
                    &self.background_source,
                    resolution,
                )));
            }
        }

        if self.reload_requested {
            if let EngineSlot::Idle(_) = self.engine {
                self.reload_requested = false;
                self.begin_initialize();
            }
        }
    }

    fn begin_initialize(&mut self) {
        let EngineSlot::Idle(engine) = std::mem::replace(&mut self.engine, EngineSlot::Busy) else {
            return;
        };

        self.model_failed = false;
        let config = self.config;
        let jobs = self.jobs_tx.clone();
        tokio::spawn(async move {
            let mut engine = engine;
            let result = engine.initialize(config).await;
            let _ = jobs.send(EngineJob::Initialized { engine, result });
        });
    }

    fn background_for(&mut self, resolution: Resolution) -> Arc<BackgroundAsset> {
        match &self.background {
            Some(asset) if asset.resolution() == resolution => Arc::clone(asset),
            _ => {
                let asset = Arc::new(BackgroundAsset::from_source(&self.background_source, resolution));
                self.background = Some(Arc::clone(&asset));
                asset
            }
        }
    }

    fn emit_error(&mut self, kind: ErrorKind, message: &str) {
        for listener in &mut self.listeners {
            listener.on_error(kind, message);
        }
    }

    fn set_session(&mut self, session: SessionState) {
        if self.session == session {
            return;
        }
        tracing::info!(from = %self.session, to = %session, "session state changed");
        self.session = session;
        self.state_tx.send_replace(session);
        for listener in &mut self.listeners {
            listener.on_state_change(session);
        }
    }

    fn set_state(&mut self, state: SchedulerState) {
        if self.state != state {
            tracing::trace!(from = ?self.state, to = ?state, "scheduler state");
            self.state = state;
        }
    }
}

/// Wait for the next frame. Resolves to `None` when the camera stream closes
/// and never resolves while no stream is attached.
async fn next_frame(frames: &mut Option<watch::Receiver<Option<Arc<Frame>>>>) -> Option<Arc<Frame>> {
    let Some(rx) = frames.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        if rx.changed().await.is_err() {
            return None;
        }
        let frame = rx.borrow_and_update().clone();
        if frame.is_some() {
            return frame;
        }
    }
}
