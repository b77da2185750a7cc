use clap::ValueEnum;

/// Segmentation model variant. `HighQuality` runs the square general model,
/// `Fast` the smaller landscape model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum ModelTier {
    Fast,
    #[default]
    HighQuality,
}

impl ModelTier {
    /// File name looked up inside the model directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            ModelTier::Fast => "selfie_segmentation_landscape.onnx",
            ModelTier::HighQuality => "selfie_segmentation.onnx",
        }
    }

    /// Model input size as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            ModelTier::Fast => (256, 144),
            ModelTier::HighQuality => (256, 256),
        }
    }
}

/// Cosmetic post-processing applied by the compositor. Zero disables an effect.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectsConfig {
    /// Gaussian sigma applied to the mask before blending.
    pub edge_soften_radius: f32,
    /// Gaussian sigma applied to the background layer.
    pub background_blur_radius: f32,
    /// Darkening at the frame corners, 0.0..=1.0.
    pub vignette_strength: f32,
}

impl EffectsConfig {
    /// Depth-of-field preset: soft edges, blurred background, light vignette.
    pub fn depth() -> Self {
        Self {
            edge_soften_radius: 1.0,
            background_blur_radius: 2.0,
            vignette_strength: 0.3,
        }
    }

    pub fn clamped(self) -> Self {
        Self {
            edge_soften_radius: non_negative(self.edge_soften_radius),
            background_blur_radius: non_negative(self.background_blur_radius),
            vignette_strength: unit(self.vignette_strength),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.edge_soften_radius > 0.0
            || self.background_blur_radius > 0.0
            || self.vignette_strength > 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationConfig {
    pub model_tier: ModelTier,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    pub effects: EffectsConfig,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            model_tier: ModelTier::HighQuality,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            effects: EffectsConfig::default(),
        }
    }
}

impl SegmentationConfig {
    /// Clamp every numeric field into its valid range.
    pub fn clamped(self) -> Self {
        Self {
            model_tier: self.model_tier,
            min_detection_confidence: unit(self.min_detection_confidence),
            min_tracking_confidence: unit(self.min_tracking_confidence),
            effects: self.effects.clamped(),
        }
    }

    /// True when moving to `other` needs a new model. Effects are read by the
    /// compositor per frame and never do.
    pub fn requires_reload(&self, other: &SegmentationConfig) -> bool {
        self.model_tier != other.model_tier
            || self.min_detection_confidence != other.min_detection_confidence
            || self.min_tracking_confidence != other.min_tracking_confidence
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn non_negative(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}
