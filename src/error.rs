use std::fmt;
use thiserror::Error;

use crate::frame::Resolution;

/// Category of a failure reported to pipeline listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CameraAccess,
    ModelLoad,
    Inference,
    Encoding,
    Asset,
    Composite,
    Output,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::CameraAccess => "camera access",
            ErrorKind::ModelLoad => "model load",
            ErrorKind::Inference => "inference",
            ErrorKind::Encoding => "encoding",
            ErrorKind::Asset => "background asset",
            ErrorKind::Composite => "composite",
            ErrorKind::Output => "output",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera stream is already active")]
    AlreadyActive,
    #[error("failed to open camera {device}")]
    Open {
        device: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("camera capture thread exited before reporting a stream")]
    Disconnected,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("model loader panicked")]
    Panicked,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("segmentation model is not initialized")]
    NotInitialized,
    #[error("inference task panicked")]
    Panicked,
    #[error(transparent)]
    Model(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("no composite has been rendered yet")]
    NothingRendered,
    #[error("failed to encode snapshot")]
    Image(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to decode background image")]
    Decode(#[from] image::ImageError),
    #[error("background image has zero size")]
    Empty,
}

#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("input dimensions differ: frame {frame}, mask {mask}, background {background}")]
    DimensionMismatch {
        frame: Resolution,
        mask: Resolution,
        background: Resolution,
    },
}

/// Failures returned by the scheduler control surface.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error("session is in the error state; reset before starting again")]
    NeedsReset,
    #[error("scheduler task has shut down")]
    Closed,
}

/// Render an error with its full cause chain, `outer: inner: root`.
pub fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    anyhow::Chain::new(err)
        .map(|cause| cause.to_string())
        .collect::<Vec<_>>()
        .join(": ")
}
