use anyhow::{bail, Result};
use image::{imageops, RgbImage};
use ndarray::{Array4, ArrayViewD};

use crate::frame::SegmentationMask;

/// Converts frames to model input tensors and model output back to masks
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB image into a normalized NHWC tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions
    /// 2. Convert to float and normalize to [0, 1]
    ///
    /// Returns: Array4<f32> with shape [1, height, width, 3]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        // Interleaved RGB is already NHWC order.
        let values: Vec<f32> = resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect();

        let tensor = Array4::from_shape_vec(
            (1, self.target_height as usize, self.target_width as usize, 3),
            values,
        )?;

        Ok(tensor)
    }

    /// Convert a single-channel probability map to a mask at model resolution
    ///
    /// Accepts `[1, H, W, 1]` (NHWC), `[1, 1, H, W]` (NCHW) or `[1, H, W]`.
    pub fn postprocess_mask(output: ArrayViewD<'_, f32>) -> Result<SegmentationMask> {
        let _span = tracing::debug_span!("postprocess").entered();

        let shape = output.shape();
        let (height, width) = match *shape {
            [1, h, w, 1] => (h, w),
            [1, 1, h, w] => (h, w),
            [1, h, w] => (h, w),
            _ => bail!("unexpected segmentation output shape {:?}", shape),
        };

        let values: Vec<f32> = output.iter().copied().collect();
        match SegmentationMask::from_raw(width as u32, height as u32, values) {
            Some(mask) => Ok(mask),
            None => bail!("segmentation output has wrong element count"),
        }
    }
}
