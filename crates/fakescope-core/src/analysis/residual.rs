//! Residual signal metrics.
//!
//! Extracts a high-pass noise residual from the grayscale image and summarizes it as:
//! - RM: mean absolute residual
//! - PVR: percentage of residual peaks above `k` standard deviations

// Pixel counts and coordinates are well within f64/isize range
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

use image::{DynamicImage, ImageBuffer, Luma};
use serde::Serialize;

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// 3x5 second-derivative residual kernel, already divided by 4.
pub const RESIDUAL_KERNEL: [[f32; 5]; 3] = [
    [0.0, -0.25, 0.5, -0.25, 0.0],
    [0.0, 0.5, -1.0, 0.5, 0.0],
    [0.0, -0.25, 0.5, -0.25, 0.0],
];

/// Kernel anchor (row, column).
const ANCHOR: (isize, isize) = (1, 2);

/// Configuration for residual analysis.
#[derive(Debug, Clone, Copy)]
pub struct ResidualConfig {
    /// Outlier threshold in standard deviations of the absolute residual.
    pub pvr_k: f64,
}

impl Default for ResidualConfig {
    fn default() -> Self {
        Self { pvr_k: 3.0 }
    }
}

/// RM / PVR summary of an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResidualMetrics {
    /// Mean absolute residual (>= 0).
    pub rm: f64,
    /// Peak-variance ratio in percent (0-100).
    pub pvr: f64,
}

/// Computes residual metrics. Holds no learned state.
#[derive(Debug, Clone, Default)]
pub struct ResidualAnalyzer {
    config: ResidualConfig,
}

impl ResidualAnalyzer {
    /// Creates an analyzer with the given configuration.
    #[must_use]
    pub const fn new(config: ResidualConfig) -> Self {
        Self { config }
    }

    /// Analyzes an image at its native resolution.
    #[must_use]
    pub fn analyze(&self, image: &DynamicImage) -> ResidualMetrics {
        let gray = to_unit_gray(image);
        let residual = high_pass(&gray);
        summarize(&residual, self.config.pvr_k)
    }
}

/// Converts to 8-bit BT.601 luma and rescales to [0, 1].
///
/// Uses the 14-bit fixed-point weights so results match common 8-bit pipelines exactly.
fn to_unit_gray(image: &DynamicImage) -> GrayF32 {
    let rgb = image.to_rgb8();
    ImageBuffer::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let luma = (u32::from(r) * 4899 + u32::from(g) * 9617 + u32::from(b) * 1868 + 8192) >> 14;
        #[allow(clippy::cast_possible_truncation)]
        Luma([luma as f32 / 255.0])
    })
}

/// Reflect-101 border index (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(i: isize, len: isize) -> usize {
    if len == 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= len {
        if i < 0 {
            i = -i;
        }
        if i >= len {
            i = 2 * len - 2 - i;
        }
    }
    i as usize
}

/// Same-size correlation with [`RESIDUAL_KERNEL`].
fn high_pass(gray: &GrayF32) -> Vec<f32> {
    let width = gray.width() as isize;
    let height = gray.height() as isize;
    let src = gray.as_raw();

    let taps: Vec<(isize, isize, f32)> = RESIDUAL_KERNEL
        .iter()
        .enumerate()
        .flat_map(|(ky, row)| {
            row.iter()
                .enumerate()
                .filter(|(_, &w)| w != 0.0)
                .map(move |(kx, &w)| (ky as isize - ANCHOR.0, kx as isize - ANCHOR.1, w))
        })
        .collect();

    let mut out = Vec::with_capacity(src.len());
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0.0f32;
            for &(dy, dx, w) in &taps {
                let sy = reflect_101(y + dy, height);
                let sx = reflect_101(x + dx, width);
                acc += w * src[sy * width as usize + sx];
            }
            out.push(acc);
        }
    }
    out
}

fn summarize(residual: &[f32], k: f64) -> ResidualMetrics {
    if residual.is_empty() {
        return ResidualMetrics { rm: 0.0, pvr: 0.0 };
    }

    let n = residual.len() as f64;
    let abs: Vec<f64> = residual.iter().map(|v| f64::from(v.abs())).collect();

    let rm = abs.iter().sum::<f64>() / n;
    let variance = abs.iter().map(|a| (a - rm) * (a - rm)).sum::<f64>() / n;
    let threshold = k * variance.sqrt();

    let peaks = abs.iter().filter(|&&a| a > threshold).count();
    let pvr = peaks as f64 / n.max(1.0) * 100.0;

    ResidualMetrics { rm, pvr }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb, RgbImage};

    fn impulse(size: u32) -> DynamicImage {
        let c = size / 2;
        let img = GrayImage::from_fn(size, size, |x, y| {
            if x == c && y == c {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn test_kernel_is_zero_sum() {
        let sum: f32 = RESIDUAL_KERNEL.iter().flatten().sum();
        assert!(sum.abs() < f32::EPSILON);
    }

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
        assert_eq!(reflect_101(-3, 2), 1);
    }

    #[test]
    fn test_flat_image_has_no_residual() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([128, 128, 128])));
        let metrics = ResidualAnalyzer::default().analyze(&img);
        assert!(metrics.rm.abs() < 1e-12);
        assert!(metrics.pvr.abs() < f64::EPSILON);
    }

    #[test]
    fn test_impulse_response() {
        // The kernel's absolute mass (4.0) spreads over a 5x5 image
        let metrics = ResidualAnalyzer::default().analyze(&impulse(5));
        assert!((metrics.rm - 4.0 / 25.0).abs() < 1e-6, "rm = {}", metrics.rm);
        // Only the center tap (1.0) exceeds 3 standard deviations
        assert!((metrics.pvr - 4.0).abs() < 1e-9, "pvr = {}", metrics.pvr);
    }

    #[test]
    fn test_pvr_threshold_scales_with_k() {
        let strict = ResidualAnalyzer::new(ResidualConfig { pvr_k: 0.0 }).analyze(&impulse(5));
        // k = 0 counts every non-zero residual: 9 taps touch the impulse
        assert!((strict.pvr - 36.0).abs() < 1e-9, "pvr = {}", strict.pvr);
    }

    #[test]
    fn test_deterministic() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(97, 61, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        }));
        let analyzer = ResidualAnalyzer::default();
        let a = analyzer.analyze(&img);
        let b = analyzer.analyze(&img);
        assert_eq!(a.rm.to_bits(), b.rm.to_bits());
        assert_eq!(a.pvr.to_bits(), b.pvr.to_bits());
        assert!((0.0..=100.0).contains(&a.pvr));
        assert!(a.rm >= 0.0);
    }

    #[test]
    fn test_empty_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let metrics = ResidualAnalyzer::default().analyze(&img);
        assert!(metrics.rm.abs() < f64::EPSILON);
        assert!(metrics.pvr.abs() < f64::EPSILON);
    }

    #[test]
    fn test_single_pixel() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([10, 200, 30])));
        let metrics = ResidualAnalyzer::default().analyze(&img);
        assert!(metrics.rm.abs() < 1e-12);
        assert!(metrics.pvr.abs() < f64::EPSILON);
    }
}
