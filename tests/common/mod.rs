#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use backdrop::capture::{CameraBackend, CaptureSource};
use backdrop::error::{CameraError, ModelLoadError};
use backdrop::scheduler::PipelineEvent;
use backdrop::segmentation::{ModelLoader, SegmentationModel};
use backdrop::{Composite, ErrorKind, Resolution, SegmentationConfig, SegmentationMask, SessionState};
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

/// Blue channel of every synthetic camera frame.
pub const FRAME_BLUE: u8 = 200;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Pixel of a synthetic frame: red carries the sequence number.
pub fn frame_pixel(sequence: u64) -> Rgb<u8> {
    Rgb([sequence as u8, 0, FRAME_BLUE])
}

// Camera

#[derive(Default)]
struct CameraCounters {
    opens: AtomicUsize,
    open_now: AtomicUsize,
    fail_open: AtomicBool,
}

/// Camera backend that generates uniform frames at a fixed interval.
#[derive(Clone)]
pub struct SyntheticBackend {
    counters: Arc<CameraCounters>,
    resolution: Resolution,
    interval: Duration,
    fail_after: Option<u64>,
    switch: Option<(u64, Resolution)>,
}

impl SyntheticBackend {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            counters: Arc::default(),
            resolution,
            interval: Duration::from_millis(5),
            fail_after: None,
            switch: None,
        }
    }

    /// Frames after the first `frames` come out at `resolution`.
    pub fn switching_to(mut self, resolution: Resolution, frames: u64) -> Self {
        self.switch = Some((frames, resolution));
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Every capture after `frames` successful ones fails.
    pub fn failing_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.counters.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Total number of successful opens.
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// Number of cameras currently held open.
    pub fn open_now(&self) -> usize {
        self.counters.open_now.load(Ordering::SeqCst)
    }
}

impl CameraBackend for SyntheticBackend {
    fn open(&self, hint: Resolution) -> Result<Box<dyn CaptureSource>, CameraError> {
        if self.counters.fail_open.load(Ordering::SeqCst) {
            return Err(CameraError::Open {
                device: "synthetic".into(),
                source: anyhow!("permission denied"),
            });
        }
        tracing::debug!(%hint, resolution = %self.resolution, "synthetic camera opened");
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        self.counters.open_now.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SyntheticCamera {
            counters: Arc::clone(&self.counters),
            resolution: self.resolution,
            interval: self.interval,
            fail_after: self.fail_after,
            switch: self.switch,
            sequence: 0,
        }))
    }
}

struct SyntheticCamera {
    counters: Arc<CameraCounters>,
    resolution: Resolution,
    interval: Duration,
    fail_after: Option<u64>,
    switch: Option<(u64, Resolution)>,
    sequence: u64,
}

impl CaptureSource for SyntheticCamera {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        std::thread::sleep(self.interval);
        if self.fail_after.is_some_and(|limit| self.sequence >= limit) {
            bail!("device unplugged");
        }
        self.sequence += 1;
        let resolution = match self.switch {
            Some((after, switched)) if self.sequence > after => switched,
            _ => self.resolution,
        };
        Ok(RgbImage::from_pixel(
            resolution.width,
            resolution.height,
            frame_pixel(self.sequence),
        ))
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.counters.open_now.fetch_sub(1, Ordering::SeqCst);
    }
}

// Model

struct ModelScript {
    loads: AtomicUsize,
    fail_load: AtomicBool,
    calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_calls: HashSet<usize>,
    panic_calls: HashSet<usize>,
    failed_sequences: Mutex<Vec<u8>>,
    mask_value: f32,
    mask_resolution: Resolution,
    infer_delay: Duration,
    load_delay: Duration,
}

/// Model loader whose models return uniform masks and fail on chosen calls.
#[derive(Clone)]
pub struct ScriptedLoader {
    script: Arc<ModelScript>,
}

impl ScriptedLoader {
    pub fn new(mask_value: f32) -> Self {
        Self::build(mask_value, Resolution::new(16, 16), Duration::ZERO, HashSet::new())
    }

    pub fn build(
        mask_value: f32,
        mask_resolution: Resolution,
        infer_delay: Duration,
        fail_calls: HashSet<usize>,
    ) -> Self {
        Self {
            script: Arc::new(ModelScript {
                loads: AtomicUsize::new(0),
                fail_load: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_calls,
                panic_calls: HashSet::new(),
                failed_sequences: Mutex::new(Vec::new()),
                mask_value,
                mask_resolution,
                infer_delay,
                load_delay: Duration::ZERO,
            }),
        }
    }

    /// Models panic on these inference calls (1-based, counted across loads).
    pub fn panicking_on(mut self, calls: &[usize]) -> Self {
        let script = Arc::get_mut(&mut self.script).expect("configure before cloning");
        script.panic_calls = calls.iter().copied().collect();
        self
    }

    /// Every model load blocks for `delay`.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        let script = Arc::get_mut(&mut self.script).expect("configure before cloning");
        script.load_delay = delay;
        self
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.script.fail_load.store(fail, Ordering::SeqCst);
    }

    pub fn loads(&self) -> usize {
        self.script.loads.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.script.completed.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.script.max_in_flight.load(Ordering::SeqCst)
    }

    /// Frame sequence numbers (mod 256) whose inference was scripted to fail.
    pub fn failed_sequences(&self) -> Vec<u8> {
        self.script.failed_sequences.lock().unwrap().clone()
    }
}

impl ModelLoader for ScriptedLoader {
    fn load(&self, config: &SegmentationConfig) -> Result<Box<dyn SegmentationModel>, ModelLoadError> {
        std::thread::sleep(self.script.load_delay);
        if self.script.fail_load.load(Ordering::SeqCst) {
            return Err(ModelLoadError::NotFound(format!("{:?}", config.model_tier)));
        }
        self.script.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            script: Arc::clone(&self.script),
        }))
    }
}

struct ScriptedModel {
    script: Arc<ModelScript>,
}

impl SegmentationModel for ScriptedModel {
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMask> {
        let script = &self.script;
        let call = script.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if script.panic_calls.contains(&call) {
            panic!("scripted panic on call {call}");
        }
        let in_flight = script.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        script.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        std::thread::sleep(script.infer_delay);

        script.in_flight.fetch_sub(1, Ordering::SeqCst);
        script.completed.fetch_add(1, Ordering::SeqCst);

        if script.fail_calls.contains(&call) {
            let sequence = frame.get_pixel(0, 0)[0];
            script.failed_sequences.lock().unwrap().push(sequence);
            bail!("scripted failure on call {call}");
        }

        Ok(SegmentationMask::filled(script.mask_resolution, script.mask_value))
    }

    fn input_size(&self) -> (u32, u32) {
        (self.script.mask_resolution.width, self.script.mask_resolution.height)
    }
}

// Event helpers

pub type Events = mpsc::UnboundedReceiver<PipelineEvent>;

pub fn events() -> (mpsc::UnboundedSender<PipelineEvent>, Events) {
    mpsc::unbounded_channel()
}

async fn next_event(events: &mut Events, deadline: Instant) -> PipelineEvent {
    match timeout(deadline.saturating_duration_since(Instant::now()), events.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("timed out waiting for pipeline event"),
    }
}

/// Wait for a composite that satisfies `accept`, skipping other events.
pub async fn composite_where<F>(events: &mut Events, mut accept: F) -> Arc<Composite>
where
    F: FnMut(&Composite) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        if let PipelineEvent::FrameReady(composite) = next_event(events, deadline).await {
            if accept(&composite) {
                return composite;
            }
        }
    }
}

pub async fn next_composite(events: &mut Events) -> Arc<Composite> {
    composite_where(events, |_| true).await
}

/// Composites rendered without segmentation carry the frame's zero green
/// channel; blended ones pick up green from the background.
pub fn is_blended(composite: &Composite) -> bool {
    composite.image.get_pixel(0, 0)[1] != 0
}

pub async fn wait_for_state(events: &mut Events, state: SessionState) {
    let deadline = Instant::now() + WAIT;
    loop {
        if let PipelineEvent::StateChanged(got) = next_event(events, deadline).await {
            if got == state {
                return;
            }
        }
    }
}

pub async fn wait_for_error(events: &mut Events, kind: ErrorKind) -> String {
    let deadline = Instant::now() + WAIT;
    loop {
        if let PipelineEvent::Error { kind: got, message } = next_event(events, deadline).await {
            if got == kind {
                return message;
            }
        }
    }
}

/// Poll `condition` until it holds.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
