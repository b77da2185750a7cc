use std::sync::Arc;
use std::time::Instant;

use super::types::{ModelLoader, SegmentationModel};
use crate::config::SegmentationConfig;
use crate::error::{InferenceError, ModelLoadError};
use crate::frame::{Frame, SegmentationMask};

/// Owns the segmentation model and its load lifecycle.
///
/// Model loading and inference run on tokio's blocking pool. `infer` takes
/// `&mut self`, so a second call cannot start before the first resolves.
pub struct SegmentationEngine {
    loader: Arc<dyn ModelLoader>,
    model: Option<Box<dyn SegmentationModel>>,
    config: SegmentationConfig,
    tracking: bool,
}

impl SegmentationEngine {
    pub fn new<L: ModelLoader>(loader: L) -> Self {
        Self {
            loader: Arc::new(loader),
            model: None,
            config: SegmentationConfig::default(),
            tracking: false,
        }
    }

    /// True once a model has loaded successfully.
    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    /// Load (or replace) the model for `config`. On failure the engine is
    /// left uninitialized and a later call may retry.
    pub async fn initialize(&mut self, config: SegmentationConfig) -> Result<(), ModelLoadError> {
        let config = config.clamped();
        self.model = None;
        self.tracking = false;
        self.config = config;

        tracing::info!(tier = ?config.model_tier, "initializing segmentation model");
        let started = Instant::now();

        let loader = Arc::clone(&self.loader);
        let model = tokio::task::spawn_blocking(move || loader.load(&config))
            .await
            .map_err(|_| ModelLoadError::Panicked)??;

        tracing::info!(
            tier = ?config.model_tier,
            input = ?model.input_size(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "segmentation model ready"
        );

        self.model = Some(model);
        Ok(())
    }

    /// Segment one frame. The mask is gated by the confidence thresholds and
    /// resampled to the frame's resolution.
    ///
    /// A model that panics is discarded: the engine reports
    /// [`InferenceError::Panicked`] and is not ready until reinitialized.
    pub async fn infer(&mut self, frame: Arc<Frame>) -> Result<SegmentationMask, InferenceError> {
        let mut model = self.model.take().ok_or(InferenceError::NotInitialized)?;

        let input = Arc::clone(&frame);
        let (model, result) = tokio::task::spawn_blocking(move || {
            let result = model.segment(&input.image);
            (model, result)
        })
        .await
        .map_err(|_| {
            self.tracking = false;
            InferenceError::Panicked
        })?;

        self.model = Some(model);
        let mask = result?;

        Ok(self.gate(mask).resized(frame.resolution()))
    }

    /// Forget tracking state, e.g. when a new session starts.
    pub fn reset(&mut self) {
        self.tracking = false;
        if let Some(model) = self.model.as_mut() {
            model.reset_state();
        }
    }

    /// Zero the mask when no person is confidently present. The detection
    /// threshold applies until a person is found, then the tracking one.
    fn gate(&mut self, mask: SegmentationMask) -> SegmentationMask {
        let threshold = if self.tracking {
            self.config.min_tracking_confidence
        } else {
            self.config.min_detection_confidence
        };

        let peak = mask.peak();
        if peak >= threshold {
            if !self.tracking {
                tracing::debug!(peak, threshold, "person detected");
            }
            self.tracking = true;
            mask
        } else {
            if self.tracking {
                tracing::debug!(peak, threshold, "person lost");
            }
            self.tracking = false;
            SegmentationMask::filled(mask.resolution(), 0.0)
        }
    }
}
