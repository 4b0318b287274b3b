//! Reverses training-time z-score normalization of the regression heads.

use serde::{Deserialize, Serialize};

/// Mean/std of the regression targets collected at training time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionStats {
    /// SSIM target mean.
    pub ssim_mean: f64,
    /// SSIM target standard deviation.
    pub ssim_std: f64,
    /// LPIPS target mean.
    pub lpips_mean: f64,
    /// LPIPS target standard deviation.
    pub lpips_std: f64,
}

/// Regression outputs after optional denormalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Denormalized {
    /// SSIM estimate.
    pub ssim: f64,
    /// LPIPS estimate.
    pub lpips: f64,
    /// Whether statistics were applied.
    pub applied: bool,
}

/// Maps a normalized value back to natural units: `raw * std + mean`, then clamps.
#[must_use]
pub fn denormalize(raw: f64, mean: f64, std: f64, floor: Option<f64>, ceil: Option<f64>) -> f64 {
    let mut value = raw * std + mean;
    if let Some(floor) = floor {
        value = value.max(floor);
    }
    if let Some(ceil) = ceil {
        value = value.min(ceil);
    }
    value
}

impl RegressionStats {
    /// Denormalizes raw head outputs. SSIM lands in `[0, 1]`, LPIPS in `[0, inf)`.
    #[must_use]
    pub fn apply(&self, ssim_raw: f32, lpips_raw: f32) -> Denormalized {
        Denormalized {
            ssim: denormalize(
                f64::from(ssim_raw),
                self.ssim_mean,
                self.ssim_std,
                Some(0.0),
                Some(1.0),
            ),
            lpips: denormalize(
                f64::from(lpips_raw),
                self.lpips_mean,
                self.lpips_std,
                Some(0.0),
                None,
            ),
            applied: true,
        }
    }
}

impl Denormalized {
    /// Applies `stats` when present, otherwise passes the raw values through untouched.
    #[must_use]
    pub fn from_raw(stats: Option<&RegressionStats>, ssim_raw: f32, lpips_raw: f32) -> Self {
        stats.map_or(
            Self {
                ssim: f64::from(ssim_raw),
                lpips: f64::from(lpips_raw),
                applied: false,
            },
            |s| s.apply(ssim_raw, lpips_raw),
        )
    }
}
