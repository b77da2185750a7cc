use image::{imageops, Luma, RgbImage};
use std::fmt;
use std::time::Instant;

/// Width and height of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1280, 720)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
}

/// A captured camera frame. Frames are shared behind `Arc` and never mutated
/// after capture; a newer capture supersedes them.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub format: PixelFormat,
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            format: PixelFormat::Rgb8,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.image.dimensions().into()
    }
}

/// Foreground opacity per pixel, row-major, 0.0 = background, 1.0 = foreground.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationMask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl SegmentationMask {
    /// Build a mask from raw values. Returns `None` when the buffer length
    /// does not match the dimensions.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        if data.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data: data.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
        })
    }

    pub fn filled(resolution: Resolution, value: f32) -> Self {
        Self {
            width: resolution.width,
            height: resolution.height,
            data: vec![value.clamp(0.0, 1.0); resolution.pixel_count()],
        }
    }

    /// Fully opaque mask: compositing with it reproduces the frame.
    pub fn opaque(resolution: Resolution) -> Self {
        Self::filled(resolution, 1.0)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }

    /// Highest foreground probability anywhere in the mask.
    pub fn peak(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }

    /// Resample to `target`. Returns `self` unchanged when dimensions match.
    pub fn resized(self, target: Resolution) -> Self {
        let _span = tracing::debug_span!("resample_mask").entered();

        if self.resolution() == target {
            return self;
        }

        let source: image::ImageBuffer<Luma<f32>, Vec<f32>> =
            match image::ImageBuffer::from_raw(self.width, self.height, self.data) {
                Some(buffer) => buffer,
                None => return Self::filled(target, 0.0),
            };

        let resized = imageops::resize(
            &source,
            target.width,
            target.height,
            imageops::FilterType::Triangle,
        );

        Self {
            width: target.width,
            height: target.height,
            data: resized
                .into_raw()
                .into_iter()
                .map(|v| v.clamp(0.0, 1.0))
                .collect(),
        }
    }

    pub(crate) fn as_image(&self) -> Option<image::ImageBuffer<Luma<f32>, Vec<f32>>> {
        image::ImageBuffer::from_raw(self.width, self.height, self.data.clone())
    }

    pub(crate) fn from_image(buffer: image::ImageBuffer<Luma<f32>, Vec<f32>>) -> Self {
        let (width, height) = buffer.dimensions();
        Self {
            width,
            height,
            data: buffer
                .into_raw()
                .into_iter()
                .map(|v| v.clamp(0.0, 1.0))
                .collect(),
        }
    }
}

/// Output of one compositing pass, handed to the render target and to
/// snapshot export.
#[derive(Debug, Clone)]
pub struct Composite {
    pub image: RgbImage,
    /// Sequence number of the frame this composite was built from.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Composite {
    pub fn resolution(&self) -> Resolution {
        self.image.dimensions().into()
    }
}
