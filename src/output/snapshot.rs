use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::error::EncodingError;
use crate::frame::{Composite, Resolution};

/// Quality used when the caller does not pick one.
pub const DEFAULT_QUALITY: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotFormat {
    #[default]
    Jpeg,
    Png,
}

impl SnapshotFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "image/jpeg",
            SnapshotFormat::Png => "image/png",
        }
    }
}

/// An encoded still image, held in memory only.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub format: SnapshotFormat,
    pub resolution: Resolution,
    pub bytes: Vec<u8>,
}

/// Encodes composites to still images. Stateless; never touches the pipeline.
pub struct SnapshotExporter;

impl SnapshotExporter {
    /// Encode `composite`. `quality` is clamped to 0.0..=1.0 and only affects
    /// JPEG; PNG is always lossless.
    pub fn export(
        composite: &Composite,
        format: SnapshotFormat,
        quality: f32,
    ) -> Result<EncodedImage, EncodingError> {
        let _span = tracing::debug_span!("snapshot", sequence = composite.sequence).entered();

        let (width, height) = composite.image.dimensions();
        let mut bytes = Vec::new();

        match format {
            SnapshotFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut bytes, jpeg_quality(quality));
                encoder.write_image(
                    composite.image.as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )?;
            }
            SnapshotFormat::Png => {
                let encoder = PngEncoder::new(&mut bytes);
                encoder.write_image(
                    composite.image.as_raw(),
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )?;
            }
        }

        tracing::debug!(
            format = format.mime_type(),
            size = bytes.len(),
            "snapshot encoded"
        );

        Ok(EncodedImage {
            format,
            resolution: Resolution::new(width, height),
            bytes,
        })
    }
}

fn jpeg_quality(quality: f32) -> u8 {
    let quality = if quality.is_nan() {
        DEFAULT_QUALITY
    } else {
        quality.clamp(0.0, 1.0)
    };
    ((quality * 100.0).round() as u8).max(1)
}
