use anyhow::Result;
use image::RgbImage;

use crate::config::SegmentationConfig;
use crate::error::ModelLoadError;
use crate::frame::SegmentationMask;

/// Trait for segmentation models
/// Allows swapping between different backends (selfie segmentation, scripted test models, ...)
pub trait SegmentationModel: Send {
    /// Process a frame and return a foreground mask
    ///
    /// The mask may be at the model's own resolution; the engine resamples
    /// it to the frame size.
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMask>;

    /// Reset internal state
    ///
    /// Called when a new session starts or the camera changes.
    fn reset_state(&mut self) {
        // Default implementation: no-op for stateless models
    }

    /// Get the model's preferred input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);
}

/// Builds a model for a configuration. Runs on a blocking thread.
pub trait ModelLoader: Send + Sync + 'static {
    fn load(&self, config: &SegmentationConfig) -> Result<Box<dyn SegmentationModel>, ModelLoadError>;
}
