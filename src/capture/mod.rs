mod v4l_capture;

pub use v4l_capture::{WebcamBackend, WebcamCapture};

use anyhow::Result;
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

use crate::error::CameraError;
use crate::frame::{Frame, Resolution};

/// Give up on the device after this many capture failures in a row.
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// How long `stop` waits for the capture thread to close the device.
const RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Trait for camera capture sources
pub trait CaptureSource {
    /// Capture a single frame, blocking until one is available
    fn capture_frame(&mut self) -> Result<RgbImage>;

    /// Get the resolution of captured frames
    fn resolution(&self) -> Resolution;

    /// Hand back the pixel storage of a frame nobody references any more.
    fn recycle(&mut self, _buffer: Vec<u8>) {}
}

/// Opens capture sources. Sources are opened on the capture thread itself,
/// so they do not need to be `Send`.
pub trait CameraBackend: Send + Sync + 'static {
    fn open(&self, hint: Resolution) -> Result<Box<dyn CaptureSource>, CameraError>;
}

/// Latest-frame feed of a running camera stream.
#[derive(Clone)]
pub struct StreamHandle {
    resolution: Resolution,
    frames: watch::Receiver<Option<Arc<Frame>>>,
}

impl StreamHandle {
    /// Resolution negotiated with the device; may differ from the hint.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn frames(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.frames.clone()
    }

    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }
}

struct ActiveStream {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    handle: StreamHandle,
}

/// Owns the camera device for the lifetime of one stream. At most one stream
/// is active at a time; the device is released by `stop` or on drop.
pub struct FrameSource {
    backend: Arc<dyn CameraBackend>,
    active: Option<ActiveStream>,
}

impl FrameSource {
    pub fn new<B: CameraBackend>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            active: None,
        }
    }

    /// Open the device and begin capturing on a dedicated thread.
    pub async fn start(&mut self, hint: Resolution) -> Result<StreamHandle, CameraError> {
        if self.active.is_some() {
            return Err(CameraError::AlreadyActive);
        }

        tracing::info!(hint = %hint, "starting camera stream");

        let (frame_tx, frame_rx) = watch::channel(None);
        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let backend = Arc::clone(&self.backend);
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("camera-capture".into())
            .spawn(move || capture_loop(backend.as_ref(), hint, frame_tx, ready_tx, &thread_stop))
            .map_err(|err| CameraError::Other(err.into()))?;

        match ready_rx.await {
            Ok(Ok(resolution)) => {
                tracing::info!(resolution = %resolution, "camera stream active");
                let handle = StreamHandle {
                    resolution,
                    frames: frame_rx,
                };
                self.active = Some(ActiveStream {
                    stop,
                    thread: Some(thread),
                    handle: handle.clone(),
                });
                Ok(handle)
            }
            Ok(Err(err)) => {
                release(thread).await;
                Err(err)
            }
            Err(_) => {
                release(thread).await;
                Err(CameraError::Disconnected)
            }
        }
    }

    /// Latest captured frame, if the stream is running and has produced one.
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.active
            .as_ref()
            .and_then(|active| active.handle.current_frame())
    }

    pub fn resolution(&self) -> Option<Resolution> {
        self.active.as_ref().map(|active| active.handle.resolution())
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Stop capturing and release the device. Safe to call repeatedly.
    ///
    /// Waits off the async executor for the capture thread to close the
    /// device, at most [`RELEASE_TIMEOUT`]; a thread stuck in a read is then
    /// left to exit on its own.
    pub async fn stop(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = active.thread.take() {
            release(thread).await;
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        // Cannot wait here; the thread closes the device once it sees the flag.
        if let Some(active) = self.active.take() {
            active.stop.store(true, Ordering::Relaxed);
        }
    }
}

async fn release(thread: thread::JoinHandle<()>) {
    let join = tokio::task::spawn_blocking(move || thread.join());
    match tokio::time::timeout(RELEASE_TIMEOUT, join).await {
        Ok(Ok(Ok(()))) => tracing::info!("camera released"),
        Ok(Ok(Err(_))) => tracing::warn!("camera capture thread panicked"),
        Ok(Err(err)) => tracing::warn!(error = %err, "failed to wait for camera release"),
        Err(_) => tracing::warn!(
            timeout_ms = RELEASE_TIMEOUT.as_millis() as u64,
            "camera capture thread did not exit in time, detaching"
        ),
    }
}

fn capture_loop(
    backend: &dyn CameraBackend,
    hint: Resolution,
    frames: watch::Sender<Option<Arc<Frame>>>,
    ready: oneshot::Sender<Result<Resolution, CameraError>>,
    stop: &AtomicBool,
) {
    let mut source = match backend.open(hint) {
        Ok(source) => source,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    if ready.send(Ok(source.resolution())).is_err() {
        tracing::debug!("stream start abandoned, closing camera");
        return;
    }

    let mut sequence = 0u64;
    let mut failures = 0u32;

    while !stop.load(Ordering::Relaxed) {
        match source.capture_frame() {
            Ok(image) => {
                failures = 0;
                sequence += 1;
                let previous = frames.send_replace(Some(Arc::new(Frame::new(image, sequence))));
                // Reuse the old frame's storage once every consumer has let go of it.
                if let Some(frame) = previous.and_then(|frame| Arc::try_unwrap(frame).ok()) {
                    source.recycle(frame.image.into_raw());
                }
            }
            Err(err) => {
                failures += 1;
                tracing::warn!(error = %err, failures, "frame capture failed");
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!("camera stopped producing frames, closing stream");
                    break;
                }
            }
        }
    }

    tracing::debug!(frames = sequence, "camera capture thread exiting");
}
