//! Prediction result types.

use std::path::PathBuf;

use serde::Serialize;

use super::{DetectError, RiskClass, NUM_CLASSES};

/// Largest encoded image accepted from an upload or a download.
pub const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// A decoded image together with the name it arrived under.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Original filename, used to derive artifact names.
    pub filename: String,
    /// Decoded image data.
    pub image: image::DynamicImage,
}

impl SourceImage {
    /// Wraps an already decoded image.
    pub fn new(filename: impl Into<String>, image: image::DynamicImage) -> Self {
        Self {
            filename: filename.into(),
            image,
        }
    }

    /// Decodes raw bytes, rejecting anything that is not a supported image.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Input`] if the bytes cannot be decoded.
    pub fn decode(filename: impl Into<String>, bytes: &[u8]) -> Result<Self, DetectError> {
        let filename = filename.into();
        let image = image::load_from_memory(bytes)
            .map_err(|e| DetectError::input(format!("cannot decode {filename}: {e}")))?;
        Ok(Self { filename, image })
    }
}

/// Raw outputs of the three heads for one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadOutputs {
    /// Classification scores.
    pub logits: [f32; NUM_CLASSES],
    /// SSIM regression in the training (normalized) domain.
    pub ssim: f32,
    /// LPIPS regression in the training (normalized) domain.
    pub lpips: f32,
}

/// Persisted heatmap overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeatmapArtifact {
    /// Artifact name, `hm_<original_filename>` with a numeric suffix when that
    /// name was already used by the same sink.
    pub filename: String,
    /// Where the sink wrote it.
    pub path: PathBuf,
    /// Width in pixels (the model input size).
    pub width: u32,
    /// Height in pixels (the model input size).
    pub height: u32,
}

/// Full-precision result of one inference request.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// Predicted authenticity class.
    pub class: RiskClass,
    /// Softmax probability of the predicted class.
    pub confidence: f64,
    /// SSIM estimate, in natural units when `stats_applied`.
    pub ssim: f64,
    /// LPIPS estimate, in natural units when `stats_applied`.
    pub lpips: f64,
    /// Whether checkpoint statistics were used to denormalize the regressions.
    pub stats_applied: bool,
    /// Mean absolute high-pass residual.
    pub rm: f64,
    /// Percentage of residual peaks above the outlier threshold.
    pub pvr: f64,
    /// Saliency overlay.
    pub heatmap: HeatmapArtifact,
}
