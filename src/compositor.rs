//! Masked blending of a camera frame over a background.
//!
//! `composite` is a pure function: identical inputs always produce identical
//! bytes. Effects are applied only when their parameter is non-zero.

use image::{imageops, Rgb, RgbImage};
use std::borrow::Cow;

use crate::background::BackgroundAsset;
use crate::config::EffectsConfig;
use crate::error::CompositeError;
use crate::frame::{Composite, Frame, SegmentationMask};

/// Blend `frame` over `background` using `mask` as foreground opacity.
///
/// Per pixel and channel: `mask * frame + (1 - mask) * background`, rounded
/// to the nearest integer. Optional effects:
/// - edge softening blurs the mask before blending,
/// - background blur blurs the background layer only,
/// - vignette darkens the result radially from the frame center.
///
/// Background blur and vignette are skipped for solid-color backgrounds so a
/// chroma-key fill stays exact.
pub fn composite(
    frame: &Frame,
    mask: &SegmentationMask,
    background: &BackgroundAsset,
    effects: &EffectsConfig,
) -> Result<Composite, CompositeError> {
    let _span = tracing::debug_span!("composite", sequence = frame.sequence).entered();

    let resolution = frame.resolution();
    if mask.resolution() != resolution || background.resolution() != resolution {
        return Err(CompositeError::DimensionMismatch {
            frame: resolution,
            mask: mask.resolution(),
            background: background.resolution(),
        });
    }

    let effects = effects.clamped();

    let softened;
    let mask = if effects.edge_soften_radius > 0.0 {
        softened = soften_edges(mask, effects.edge_soften_radius);
        &softened
    } else {
        mask
    };

    let layer: Cow<'_, RgbImage> =
        if effects.background_blur_radius > 0.0 && !background.is_solid() {
            Cow::Owned(imageops::blur(
                background.image(),
                effects.background_blur_radius,
            ))
        } else {
            Cow::Borrowed(background.image())
        };

    let mut image = blend(&frame.image, mask, &layer);

    if effects.vignette_strength > 0.0 && !background.is_solid() {
        apply_vignette(&mut image, effects.vignette_strength);
    }

    Ok(Composite {
        image,
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    })
}

/// The frame as-is, used while no segmentation model is available.
pub fn passthrough(frame: &Frame) -> Composite {
    Composite {
        image: frame.image.clone(),
        sequence: frame.sequence,
        captured_at: frame.captured_at,
    }
}

fn blend(foreground: &RgbImage, mask: &SegmentationMask, background: &RgbImage) -> RgbImage {
    let (width, height) = foreground.dimensions();
    let mut out = RgbImage::new(width, height);

    for (((out_px, fg), bg), &alpha) in out
        .pixels_mut()
        .zip(foreground.pixels())
        .zip(background.pixels())
        .zip(mask.values())
    {
        let inv = 1.0 - alpha;
        for c in 0..3 {
            let value = alpha * fg[c] as f32 + inv * bg[c] as f32;
            out_px[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

fn soften_edges(mask: &SegmentationMask, radius: f32) -> SegmentationMask {
    match mask.as_image() {
        Some(buffer) => SegmentationMask::from_image(imageops::blur(&buffer, radius)),
        None => mask.clone(),
    }
}

/// Multiply by a radial gradient: transparent at the center, `strength`
/// opacity black at half the frame width and beyond.
fn apply_vignette(image: &mut RgbImage, strength: f32) {
    let (width, height) = image.dimensions();
    let cx = width as f32 / 2.0;
    let cy = height as f32 / 2.0;
    let radius = width as f32 / 2.0;
    if radius <= 0.0 {
        return;
    }

    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - cx;
        let dy = y as f32 + 0.5 - cy;
        let t = ((dx * dx + dy * dy).sqrt() / radius).min(1.0);
        let keep = 1.0 - strength * t;
        let Rgb([r, g, b]) = *pixel;
        *pixel = Rgb([
            (r as f32 * keep).round() as u8,
            (g as f32 * keep).round() as u8,
            (b as f32 * keep).round() as u8,
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::FALLBACK_COLOR;
    use crate::frame::Resolution;
    use std::sync::Arc;

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(
            RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x * 7 % 256) as u8, (y * 11 % 256) as u8, 200])
            }),
            1,
        )
    }

    fn image_background(width: u32, height: u32) -> BackgroundAsset {
        let source = RgbImage::from_pixel(width, height, Rgb([40, 80, 160]));
        BackgroundAsset::from_image(Arc::new(source), width, height)
    }

    /// Left half foreground, right half background.
    fn split_mask(width: u32, height: u32) -> SegmentationMask {
        let data = (0..height)
            .flat_map(|_| (0..width).map(move |x| if x < width / 2 { 1.0 } else { 0.0 }))
            .collect();
        SegmentationMask::from_raw(width, height, data).unwrap()
    }

    #[test]
    fn opaque_mask_reproduces_frame() {
        let frame = frame(16, 8);
        let mask = SegmentationMask::opaque(frame.resolution());
        let background = image_background(16, 8);

        let out = composite(&frame, &mask, &background, &EffectsConfig::default()).unwrap();
        assert_eq!(out.image, frame.image);
        assert_eq!(out.resolution(), frame.resolution());
    }

    #[test]
    fn empty_mask_shows_fallback_color_exactly() {
        let frame = frame(16, 8);
        let mask = SegmentationMask::filled(frame.resolution(), 0.0);
        let background = BackgroundAsset::from_color(FALLBACK_COLOR, 16, 8);

        // Background effects never touch a solid fill.
        let out = composite(&frame, &mask, &background, &EffectsConfig::depth()).unwrap();
        assert!(out.image.pixels().all(|p| *p == FALLBACK_COLOR));
    }

    #[test]
    fn half_mask_averages_channels() {
        let frame = Frame::new(RgbImage::from_pixel(2, 2, Rgb([200, 100, 0])), 3);
        let mask = SegmentationMask::filled(Resolution::new(2, 2), 0.5);
        let background = BackgroundAsset::from_color(Rgb([0, 50, 255]), 2, 2);

        let out = composite(&frame, &mask, &background, &EffectsConfig::default()).unwrap();
        assert!(out.image.pixels().all(|p| *p == Rgb([100, 75, 128])));
        assert_eq!(out.sequence, 3);
    }

    #[test]
    fn output_is_bit_reproducible() {
        let frame = frame(32, 24);
        let mask = split_mask(32, 24);
        let background = image_background(32, 24);
        let effects = EffectsConfig::default();

        let a = composite(&frame, &mask, &background, &effects).unwrap();
        let b = composite(&frame, &mask, &background, &effects).unwrap();
        assert_eq!(a.image.as_raw(), b.image.as_raw());
    }

    #[test]
    fn mismatched_dimensions_are_rejected() {
        let frame = frame(16, 8);
        let mask = SegmentationMask::opaque(Resolution::new(8, 8));
        let background = image_background(16, 8);

        let err = composite(&frame, &mask, &background, &EffectsConfig::default()).unwrap_err();
        assert!(matches!(err, CompositeError::DimensionMismatch { .. }));
    }

    #[test]
    fn edge_softening_blends_across_the_boundary() {
        let frame = Frame::new(RgbImage::from_pixel(32, 8, Rgb([255, 255, 255])), 1);
        let mask = split_mask(32, 8);
        let background = BackgroundAsset::from_color(Rgb([0, 0, 0]), 32, 8);
        let effects = EffectsConfig {
            edge_soften_radius: 2.0,
            ..Default::default()
        };

        let hard = composite(&frame, &mask, &background, &EffectsConfig::default()).unwrap();
        let soft = composite(&frame, &mask, &background, &effects).unwrap();

        // Hard edge: pure white then pure black.
        assert_eq!(hard.image.get_pixel(15, 4)[0], 255);
        assert_eq!(hard.image.get_pixel(16, 4)[0], 0);

        // Softened edge: intermediate values on both sides of the boundary.
        let left = soft.image.get_pixel(15, 4)[0];
        let right = soft.image.get_pixel(16, 4)[0];
        assert!(left < 255 && left > 0, "left edge value {left}");
        assert!(right > 0 && right < 255, "right edge value {right}");
        // Far from the edge nothing changes.
        assert_eq!(soft.image.get_pixel(2, 4)[0], 255);
        assert_eq!(soft.image.get_pixel(29, 4)[0], 0);
    }

    #[test]
    fn vignette_darkens_corners_only() {
        let frame = Frame::new(RgbImage::from_pixel(64, 36, Rgb([200, 200, 200])), 1);
        let mask = SegmentationMask::opaque(frame.resolution());
        let background = image_background(64, 36);
        let effects = EffectsConfig {
            vignette_strength: 0.3,
            ..Default::default()
        };

        let out = composite(&frame, &mask, &background, &effects).unwrap();
        let center = out.image.get_pixel(32, 18)[0];
        let corner = out.image.get_pixel(0, 0)[0];

        assert!(center >= 198, "center {center}");
        assert_eq!(corner, 140);
    }

    #[test]
    fn background_blur_leaves_foreground_untouched() {
        let frame = frame(32, 16);
        let mask = SegmentationMask::opaque(frame.resolution());
        let checker = RgbImage::from_fn(32, 16, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let background = BackgroundAsset::from_image(Arc::new(checker), 32, 16);
        let effects = EffectsConfig {
            background_blur_radius: 2.0,
            ..Default::default()
        };

        let out = composite(&frame, &mask, &background, &effects).unwrap();
        assert_eq!(out.image, frame.image);
    }

    #[test]
    fn background_blur_smooths_visible_background() {
        let frame = frame(32, 16);
        let mask = SegmentationMask::filled(frame.resolution(), 0.0);
        let checker = RgbImage::from_fn(32, 16, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let background = BackgroundAsset::from_image(Arc::new(checker), 32, 16);

        let sharp = composite(&frame, &mask, &background, &EffectsConfig::default()).unwrap();
        let blurred = composite(
            &frame,
            &mask,
            &background,
            &EffectsConfig {
                background_blur_radius: 2.0,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(sharp.image.get_pixel(16, 8)[0], 0);
        assert_eq!(sharp.image.get_pixel(17, 8)[0], 255);
        // Neighbouring checker cells average out to mid gray.
        for x in 14..18 {
            let value = blurred.image.get_pixel(x, 8)[0];
            assert!((64..=192).contains(&value), "pixel {x} = {value}");
        }
    }

    #[test]
    fn passthrough_copies_frame() {
        let frame = frame(8, 8);
        let out = passthrough(&frame);
        assert_eq!(out.image, frame.image);
        assert_eq!(out.sequence, frame.sequence);
    }
}
