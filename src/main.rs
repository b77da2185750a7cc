use anyhow::{Context, Result};
use backdrop::capture::{FrameSource, WebcamBackend};
use backdrop::config::{EffectsConfig, ModelTier, SegmentationConfig};
use backdrop::output::V4L2Output;
use backdrop::scheduler::{FrameScheduler, PipelineListener};
use backdrop::{segmentation, BackgroundSource, ErrorKind, Resolution, SessionState};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Requested capture width
    #[arg(long, default_value_t = 1280)]
    capture_width: u32,

    /// Requested capture height
    #[arg(long, default_value_t = 720)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Requested camera frame rate
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Directory holding the segmentation models
    /// If not provided, runs in passthrough mode without segmentation
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Threads per inference session
    #[arg(long, default_value_t = 4)]
    inference_threads: usize,

    /// Segmentation model tier
    #[arg(long, value_enum, default_value_t = ModelTier::HighQuality)]
    quality: ModelTier,

    /// Minimum confidence to detect a person
    #[arg(long, default_value_t = 0.5)]
    min_detection_confidence: f32,

    /// Minimum confidence to keep tracking a detected person
    #[arg(long, default_value_t = 0.5)]
    min_tracking_confidence: f32,

    /// Mask edge softening radius (0 disables)
    #[arg(long, default_value_t = 0.0)]
    edge_soften: f32,

    /// Background blur radius (0 disables)
    #[arg(long, default_value_t = 0.0)]
    background_blur: f32,

    /// Vignette strength, 0.0 to 1.0
    #[arg(long, default_value_t = 0.0)]
    vignette: f32,

    /// Soft edges, blurred background and a light vignette.
    /// Overrides the individual effect flags
    #[arg(long)]
    depth_effects: bool,

    /// Background image (PNG, JPEG, ...). Chroma-key green when absent
    #[arg(short, long)]
    background: Option<PathBuf>,
}

impl Args {
    fn segmentation_config(&self) -> SegmentationConfig {
        let effects = if self.depth_effects {
            EffectsConfig::depth()
        } else {
            EffectsConfig {
                edge_soften_radius: self.edge_soften,
                background_blur_radius: self.background_blur,
                vignette_strength: self.vignette,
            }
        };

        SegmentationConfig {
            model_tier: self.quality,
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
            effects,
        }
        .clamped()
    }
}

/// Logs pipeline errors reported by the scheduler.
struct ErrorLogger;

impl PipelineListener for ErrorLogger {
    fn on_error(&mut self, kind: ErrorKind, message: &str) {
        tracing::error!(%kind, "{message}");
    }

    fn on_state_change(&mut self, state: SessionState) {
        if state == SessionState::Error {
            tracing::error!("session failed, press Ctrl+C to exit");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    let config = args.segmentation_config();
    let capture_hint = Resolution::new(args.capture_width, args.capture_height);

    tracing::info!("backdrop starting");
    tracing::info!(capture = %capture_hint, fps = args.fps, "camera request");
    tracing::info!(output = %Resolution::new(args.output_width, args.output_height), device = %args.output_device, "loopback output");
    tracing::info!(?config, "segmentation config");

    let background = match &args.background {
        Some(path) => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Failed to read background {}", path.display()))?;
            let source = BackgroundSource::from_bytes(&bytes)
                .with_context(|| format!("Failed to decode background {}", path.display()))?;
            tracing::info!(path = %path.display(), "using background image");
            source
        }
        None => {
            tracing::info!("no background image, using chroma-key green");
            BackgroundSource::default()
        }
    };

    let engine = match &args.model_dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), threads = args.inference_threads, "segmentation models");
            Some(segmentation::create_default_engine(dir, args.inference_threads))
        }
        None => {
            tracing::info!("Running in passthrough mode (no segmentation)");
            None
        }
    };

    let output = V4L2Output::new(&args.output_device, args.output_width, args.output_height)
        .context("Failed to initialize v4l2loopback output")?;

    let source = FrameSource::new(WebcamBackend {
        device_index: args.input_device,
        frame_rate: args.fps,
    });

    let mut scheduler = FrameScheduler::new(source, engine)
        .with_sink(output)
        .with_config(config)
        .with_background(background);
    scheduler.add_listener(ErrorLogger);

    let handle = scheduler.spawn();

    let resolution = handle
        .start(capture_hint)
        .await
        .context("Failed to start camera")?;
    tracing::info!(%resolution, "pipeline running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    tracing::info!("shutting down");
    handle.stop().await?;
    handle.shutdown().await;

    Ok(())
}
