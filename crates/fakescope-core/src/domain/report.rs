//! Presentation record returned to API callers.

use serde::{Deserialize, Serialize};

use super::Prediction;

/// Rounded, caller-facing view of a [`Prediction`].
///
/// Field names match the JSON contract consumed by the detection backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    /// Where the image came from (path, URL or upload name).
    pub source: String,
    /// Predicted class index (0-3).
    pub label: usize,
    /// Display name from the risk table.
    pub label_name: String,
    /// Severity tier from the risk table.
    pub state: String,
    /// Confidence, 4 decimal places.
    pub confidence: f64,
    /// SSIM estimate, 4 decimal places.
    pub ssim: f64,
    /// LPIPS estimate, 4 decimal places.
    pub lpips: f64,
    /// Residual mean, 6 decimal places.
    pub rm: f64,
    /// Peak-variance ratio, 2 decimal places.
    pub pvr: f64,
    /// Retrievable heatmap reference: the relocated URL when uploaded, else the local name.
    pub heatmap_filename: String,
    /// Relocated heatmap URL, if the artifact was uploaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap_url: Option<String>,
    /// Whether SSIM/LPIPS were denormalized with checkpoint statistics.
    pub stats_applied: bool,
    /// Analysis timestamp (RFC 3339).
    pub analyzed_at: String,
}

impl DetectionReport {
    /// Builds the report from a prediction.
    #[must_use]
    pub fn from_prediction(
        source: impl Into<String>,
        prediction: &Prediction,
        heatmap_url: Option<String>,
        analyzed_at: impl Into<String>,
    ) -> Self {
        let heatmap_filename = heatmap_url
            .clone()
            .unwrap_or_else(|| prediction.heatmap.filename.clone());

        Self {
            source: source.into(),
            label: prediction.class.index(),
            label_name: prediction.class.display_name().to_string(),
            state: prediction.class.risk_level().to_string(),
            confidence: round_to(prediction.confidence, 4),
            ssim: round_to(prediction.ssim, 4),
            lpips: round_to(prediction.lpips, 4),
            rm: round_to(prediction.rm, 6),
            pvr: round_to(prediction.pvr, 2),
            heatmap_filename,
            heatmap_url,
            stats_applied: prediction.stats_applied,
            analyzed_at: analyzed_at.into(),
        }
    }
}

/// Rounds half away from zero to `places` decimal places.
#[must_use]
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
