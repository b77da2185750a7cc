use image::{imageops, Rgb, RgbImage};
use std::sync::Arc;

use crate::error::AssetError;
use crate::frame::Resolution;

/// Chroma-key green used when no background image has been supplied.
pub const FALLBACK_COLOR: Rgb<u8> = Rgb([0x00, 0xFF, 0x00]);

/// Where a background comes from. Kept alongside the normalized asset so the
/// asset can be rebuilt when the frame size changes.
#[derive(Debug, Clone)]
pub enum BackgroundSource {
    Image(Arc<RgbImage>),
    Color(Rgb<u8>),
}

impl Default for BackgroundSource {
    fn default() -> Self {
        BackgroundSource::Color(FALLBACK_COLOR)
    }
}

impl BackgroundSource {
    /// Decode an encoded image (PNG, JPEG, ...) into a background source.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let decoded = image::load_from_memory(bytes)?.to_rgb8();
        Self::from_image(decoded)
    }

    pub fn from_image(image: RgbImage) -> Result<Self, AssetError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(AssetError::Empty);
        }
        Ok(BackgroundSource::Image(Arc::new(image)))
    }

    pub fn is_image(&self) -> bool {
        matches!(self, BackgroundSource::Image(_))
    }
}

/// Cover-fit placement of a source image inside a target rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverFit {
    pub scale: f64,
    /// Top-left of the scaled image relative to the target. Never positive.
    pub offset_x: f64,
    pub offset_y: f64,
    pub scaled_width: u32,
    pub scaled_height: u32,
}

impl CoverFit {
    pub fn compute(source: Resolution, target: Resolution) -> Self {
        let (sw, sh) = (source.width as f64, source.height as f64);
        let (tw, th) = (target.width as f64, target.height as f64);

        let scale = (tw / sw).max(th / sh);
        let offset_x = (tw - sw * scale) / 2.0;
        let offset_y = (th - sh * scale) / 2.0;

        // Round away float error; the scaled image must still cover the target.
        let scaled_width = ((sw * scale).round() as u32).max(target.width);
        let scaled_height = ((sh * scale).round() as u32).max(target.height);

        Self {
            scale,
            offset_x,
            offset_y,
            scaled_width,
            scaled_height,
        }
    }

    /// Top-left corner of the visible window inside the scaled image.
    pub fn crop_origin(&self, target: Resolution) -> (u32, u32) {
        let max_x = self.scaled_width - target.width;
        let max_y = self.scaled_height - target.height;
        let x = (-self.offset_x).round().max(0.0) as u32;
        let y = (-self.offset_y).round().max(0.0) as u32;
        (x.min(max_x), y.min(max_y))
    }
}

/// Background pixels normalized to exactly one frame size.
#[derive(Debug, Clone)]
pub struct BackgroundAsset {
    image: RgbImage,
    source: BackgroundSource,
}

impl BackgroundAsset {
    pub fn from_image(image: Arc<RgbImage>, target_width: u32, target_height: u32) -> Self {
        let target = Resolution::new(target_width, target_height);
        let rasterized = rasterize_cover(&image, target);
        Self {
            image: rasterized,
            source: BackgroundSource::Image(image),
        }
    }

    pub fn from_color(color: Rgb<u8>, width: u32, height: u32) -> Self {
        Self {
            image: RgbImage::from_pixel(width, height, color),
            source: BackgroundSource::Color(color),
        }
    }

    pub fn from_source(source: &BackgroundSource, target: Resolution) -> Self {
        match source {
            BackgroundSource::Image(image) => {
                Self::from_image(Arc::clone(image), target.width, target.height)
            }
            BackgroundSource::Color(color) => Self::from_color(*color, target.width, target.height),
        }
    }

    /// Rebuild for a new frame size from the stored source.
    pub fn retarget(&self, target: Resolution) -> Self {
        if target == self.resolution() {
            return self.clone();
        }
        Self::from_source(&self.source, target)
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn resolution(&self) -> Resolution {
        self.image.dimensions().into()
    }

    /// True when the asset is a uniform fill rather than an image.
    pub fn is_solid(&self) -> bool {
        !self.source.is_image()
    }
}

fn rasterize_cover(image: &RgbImage, target: Resolution) -> RgbImage {
    let _span = tracing::debug_span!("rasterize_background").entered();

    if target.pixel_count() == 0 {
        return RgbImage::new(target.width, target.height);
    }
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::from_pixel(target.width, target.height, FALLBACK_COLOR);
    }

    let source: Resolution = image.dimensions().into();
    let fit = CoverFit::compute(source, target);

    tracing::debug!(
        source = %source,
        target = %target,
        scale = fit.scale,
        offset_x = fit.offset_x,
        offset_y = fit.offset_y,
        "normalizing background image"
    );

    let scaled = if (fit.scaled_width, fit.scaled_height) == image.dimensions() {
        image.clone()
    } else {
        imageops::resize(
            image,
            fit.scaled_width,
            fit.scaled_height,
            imageops::FilterType::Lanczos3,
        )
    };

    let (x, y) = fit.crop_origin(target);
    imageops::crop_imm(&scaled, x, y, target.width, target.height).to_image()
}
