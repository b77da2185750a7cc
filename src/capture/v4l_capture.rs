use super::{CameraBackend, CaptureSource};
use anyhow::{Context, Result};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType,
    Resolution as CameraResolution,
};
use nokhwa::Camera;

use crate::error::CameraError;
use crate::frame::Resolution;

/// Webcam opened through nokhwa's v4l input.
pub struct WebcamCapture {
    camera: Camera,
    resolution: Resolution,
    spare: Option<Vec<u8>>,
}

impl WebcamCapture {
    pub fn new(device_index: u32, hint: Resolution, frame_rate: u32) -> Result<Self> {
        tracing::info!(
            device_index,
            width = hint.width,
            height = hint.height,
            frame_rate,
            "initializing webcam"
        );

        let index = CameraIndex::Index(device_index);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(
                CameraResolution::new(hint.width, hint.height),
                FrameFormat::MJPEG,
                frame_rate,
            ),
        ));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;

        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let actual = camera.resolution();
        let resolution = Resolution::new(actual.width(), actual.height());
        if resolution != hint {
            tracing::info!(
                requested = %hint,
                negotiated = %resolution,
                "camera negotiated a different resolution"
            );
        }

        Ok(Self {
            camera,
            resolution,
            spare: None,
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn capture_frame(&mut self) -> Result<RgbImage> {
        let res = self.camera.resolution();
        let mut data = self.spare.take().unwrap_or_default();
        data.resize((res.width() * res.height() * 3) as usize, 0);
        self.camera
            .write_frame_to_buffer::<RgbFormat>(&mut data)
            .context("Failed to capture and decode frame")?;

        RgbImage::from_raw(res.width(), res.height(), data)
            .context("Decoded frame does not match camera resolution")
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn recycle(&mut self, buffer: Vec<u8>) {
        self.spare = Some(buffer);
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(err) = self.camera.stop_stream() {
            tracing::warn!(error = %err, "failed to stop camera stream");
        }
    }
}

/// Camera backend for a local webcam by index.
#[derive(Debug, Clone)]
pub struct WebcamBackend {
    pub device_index: u32,
    pub frame_rate: u32,
}

impl CameraBackend for WebcamBackend {
    fn open(&self, hint: Resolution) -> Result<Box<dyn CaptureSource>, CameraError> {
        let capture = WebcamCapture::new(self.device_index, hint, self.frame_rate).map_err(
            |source| CameraError::Open {
                device: format!("#{}", self.device_index),
                source,
            },
        )?;
        Ok(Box::new(capture))
    }
}
