use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::events::PipelineListener;
use super::state::SessionState;
use crate::background::BackgroundSource;
use crate::config::SegmentationConfig;
use crate::error::{EncodingError, SessionError};
use crate::frame::{Composite, Resolution};
use crate::output::{EncodedImage, SnapshotExporter, SnapshotFormat};

pub(crate) enum Command {
    Start {
        hint: Resolution,
        reply: oneshot::Sender<Result<Resolution, SessionError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SetBackground(BackgroundSource),
    Configure(SegmentationConfig),
    Subscribe(Box<dyn PipelineListener>),
    Shutdown,
}

/// Control surface of a running scheduler task.
pub struct SchedulerHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) state: watch::Receiver<SessionState>,
    pub(crate) latest: watch::Receiver<Option<Arc<Composite>>>,
    pub(crate) task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Open the camera and begin processing. Returns the negotiated resolution.
    pub async fn start(&self, hint: Resolution) -> Result<Resolution, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { hint, reply })?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Stop processing and release the camera. Safe to call in any state.
    pub async fn stop(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Leave the error state.
    pub async fn reset(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reset { reply })?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub fn set_background(&self, source: BackgroundSource) -> Result<(), SessionError> {
        self.send(Command::SetBackground(source))
    }

    /// Replace the segmentation configuration. Values are clamped; the model
    /// is reloaded without interrupting the camera.
    pub fn configure(&self, config: SegmentationConfig) -> Result<(), SessionError> {
        self.send(Command::Configure(config))
    }

    pub fn subscribe<L: PipelineListener + 'static>(&self, listener: L) -> Result<(), SessionError> {
        self.send(Command::Subscribe(Box::new(listener)))
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch session state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Most recently rendered composite.
    pub fn latest_composite(&self) -> Option<Arc<Composite>> {
        self.latest.borrow().clone()
    }

    /// Encode the most recently rendered composite.
    pub fn snapshot(
        &self,
        format: SnapshotFormat,
        quality: f32,
    ) -> Result<EncodedImage, EncodingError> {
        let composite = self.latest_composite().ok_or(EncodingError::NothingRendered)?;
        SnapshotExporter::export(&composite, format, quality)
    }

    /// Stop the session, release the camera and end the scheduler task.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if self.task.await.is_err() {
            tracing::warn!("scheduler task panicked");
        }
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}
