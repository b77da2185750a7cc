use std::sync::Arc;
use tokio::sync::mpsc;

use super::state::SessionState;
use crate::error::ErrorKind;
use crate::frame::Composite;

/// Receives pipeline notifications. Every produced composite is dispatched
/// exactly once to each registered listener.
pub trait PipelineListener: Send {
    fn on_error(&mut self, _kind: ErrorKind, _message: &str) {}

    fn on_frame_ready(&mut self, _composite: &Arc<Composite>) {}

    fn on_state_change(&mut self, _state: SessionState) {}
}

/// Owned form of a listener notification.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Error { kind: ErrorKind, message: String },
    FrameReady(Arc<Composite>),
    StateChanged(SessionState),
}

/// Forwards notifications over a channel. A closed receiver is ignored.
impl PipelineListener for mpsc::UnboundedSender<PipelineEvent> {
    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        let _ = self.send(PipelineEvent::Error {
            kind,
            message: message.to_string(),
        });
    }

    fn on_frame_ready(&mut self, composite: &Arc<Composite>) {
        let _ = self.send(PipelineEvent::FrameReady(Arc::clone(composite)));
    }

    fn on_state_change(&mut self, state: SessionState) {
        let _ = self.send(PipelineEvent::StateChanged(state));
    }
}
