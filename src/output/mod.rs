mod loopback;
pub mod snapshot;

pub use loopback::V4L2Output;
pub use snapshot::{EncodedImage, SnapshotExporter, SnapshotFormat};

use anyhow::Result;
use image::RgbImage;

/// Render target for finished composites
pub trait OutputSink: Send {
    /// Write a frame to the output
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()>;
}
