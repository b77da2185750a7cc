use super::preprocess::Preprocessor;
use super::types::{ModelLoader, SegmentationModel};
use anyhow::{Context, Result};
use image::RgbImage;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use std::path::{Path, PathBuf};

use crate::config::{ModelTier, SegmentationConfig};
use crate::error::ModelLoadError;
use crate::frame::SegmentationMask;

/// Selfie segmentation model exported to ONNX
///
/// Input: `[1, H, W, 3]` RGB in [0, 1]. Output: `[1, H, W, 1]` person
/// probability. Stateless between frames.
pub struct SelfieSegmentation {
    session: Session,
    preprocessor: Preprocessor,
    width: u32,
    height: u32,
}

impl SelfieSegmentation {
    /// Load a selfie segmentation model for the given tier
    ///
    /// The tier fixes the input size: 256x256 for `HighQuality`, 256x144 for
    /// `Fast`.
    pub fn new<P: AsRef<Path>>(model_path: P, tier: ModelTier, intra_threads: usize) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!(model = %path.display(), ?tier, "loading selfie segmentation model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let (width, height) = tier.input_size();

        Ok(Self {
            session,
            preprocessor: Preprocessor::new(width, height),
            width,
            height,
        })
    }
}

impl SegmentationModel for SelfieSegmentation {
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMask> {
        let _span = tracing::debug_span!("selfie_segment").entered();

        let input = self.preprocessor.preprocess(frame)?;
        let input = Tensor::from_array(input)?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("Failed to run inference")?;
        drop(_infer_span);

        let probabilities = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract segmentation output")?;

        Preprocessor::postprocess_mask(probabilities)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Loads selfie segmentation models from a directory, one file per tier.
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    model_dir: PathBuf,
    intra_threads: usize,
}

impl OnnxModelLoader {
    pub fn new<P: Into<PathBuf>>(model_dir: P) -> Self {
        Self {
            model_dir: model_dir.into(),
            intra_threads: 4,
        }
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }

    pub fn model_path(&self, tier: ModelTier) -> PathBuf {
        self.model_dir.join(tier.file_name())
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, config: &SegmentationConfig) -> Result<Box<dyn SegmentationModel>, ModelLoadError> {
        let path = self.model_path(config.model_tier);
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.display().to_string()));
        }

        let model = SelfieSegmentation::new(&path, config.model_tier, self.intra_threads)?;
        Ok(Box::new(model))
    }
}
