use super::OutputSink;
use anyhow::{Context, Result};
use image::{imageops, RgbImage};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use v4l::video::Output;
use v4l::{Device, Format, FourCC};

use crate::frame::Resolution;

/// Writes composites to a v4l2loopback device as packed YUYV.
pub struct V4L2Output {
    // Held open so the negotiated format stays in effect.
    _device: Device,
    file: File,
    resolution: Resolution,
    yuyv: Vec<u8>,
}

impl V4L2Output {
    pub fn new<P: AsRef<Path>>(device_path: P, width: u32, height: u32) -> Result<Self> {
        let path = device_path.as_ref();
        tracing::info!(
            device = %path.display(),
            width,
            height,
            "opening v4l2loopback output"
        );

        // Announce the format first so consumers see the right geometry.
        let device = Device::with_path(path)
            .with_context(|| format!("Failed to open v4l2 device at {}", path.display()))?;
        let requested = Format::new(width, height, FourCC::new(b"YUYV"));
        let negotiated = Output::set_format(&device, &requested)
            .context("Failed to set v4l2loopback output format")?;
        if negotiated.width != width || negotiated.height != height {
            tracing::warn!(
                width = negotiated.width,
                height = negotiated.height,
                "loopback device negotiated a different size"
            );
        }

        let file = File::options()
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open v4l2loopback device at {}", path.display()))?;

        Ok(Self {
            _device: device,
            file,
            resolution: Resolution::new(negotiated.width, negotiated.height),
            yuyv: Vec::with_capacity((negotiated.width * negotiated.height * 2) as usize),
        })
    }
}

/// Pack RGB into YUYV: two pixels share one U and one V sample.
pub(crate) fn pack_yuyv(frame: &RgbImage, out: &mut Vec<u8>) {
    out.clear();
    let row_bytes = frame.width() as usize * 3;
    if row_bytes == 0 {
        return;
    }
    for row in frame.as_raw().chunks_exact(row_bytes) {
        for pair in row.chunks(6) {
            let first = &pair[..3];
            let second = pair.get(3..6).unwrap_or(first);

            let (y0, u0, v0) = rgb_to_yuv(first[0], first[1], first[2]);
            let (y1, u1, v1) = rgb_to_yuv(second[0], second[1], second[2]);

            out.extend_from_slice(&[
                y0,
                ((u0 as u16 + u1 as u16) / 2) as u8,
                y1,
                ((v0 as u16 + v1 as u16) / 2) as u8,
            ]);
        }
    }
}

/// BT.601 full-range RGB to YUV
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);

    let y = (0.299 * r + 0.587 * g + 0.114 * b).clamp(0.0, 255.0) as u8;
    let u = ((-0.147 * r - 0.289 * g + 0.436 * b) + 128.0).clamp(0.0, 255.0) as u8;
    let v = ((0.615 * r - 0.515 * g - 0.100 * b) + 128.0).clamp(0.0, 255.0) as u8;

    (y, u, v)
}

impl OutputSink for V4L2Output {
    fn write_frame(&mut self, frame: &RgbImage) -> Result<()> {
        let target = self.resolution;
        let resized;
        let frame = if frame.dimensions() != (target.width, target.height) {
            resized = imageops::resize(
                frame,
                target.width,
                target.height,
                imageops::FilterType::Triangle,
            );
            &resized
        } else {
            frame
        };

        pack_yuyv(frame, &mut self.yuyv);

        self.file
            .write_all(&self.yuyv)
            .context("Failed to write frame to v4l2loopback device")?;

        Ok(())
    }
}
