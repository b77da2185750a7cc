mod engine;
mod preprocess;
mod selfie;
pub mod types;

pub use engine::SegmentationEngine;
pub use preprocess::Preprocessor;
pub use selfie::{OnnxModelLoader, SelfieSegmentation};
pub use types::{ModelLoader, SegmentationModel};

use std::path::PathBuf;

/// Create the default engine: selfie segmentation models from `model_dir`,
/// each session running `intra_threads` threads
pub fn create_default_engine<P: Into<PathBuf>>(model_dir: P, intra_threads: usize) -> SegmentationEngine {
    SegmentationEngine::new(OnnxModelLoader::new(model_dir).with_intra_threads(intra_threads))
}
