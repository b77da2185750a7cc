//! Live background replacement for webcam video.
//!
//! A [`FrameSource`] captures camera frames, a [`SegmentationEngine`]
//! produces a person mask, and the [`compositor`] blends the person over a
//! [`BackgroundAsset`]. [`FrameScheduler`] ties them together with
//! single-flight inference and drives an [`output::OutputSink`].

pub mod background;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod error;
pub mod frame;
pub mod output;
pub mod scheduler;
pub mod segmentation;

pub use background::{BackgroundAsset, BackgroundSource, FALLBACK_COLOR};
pub use capture::FrameSource;
pub use config::{EffectsConfig, ModelTier, SegmentationConfig};
pub use error::ErrorKind;
pub use frame::{Composite, Frame, Resolution, SegmentationMask};
pub use scheduler::{FrameScheduler, PipelineEvent, PipelineListener, SchedulerHandle, SessionState};
pub use segmentation::SegmentationEngine;
