//! Heatmap coloring and blending.

// Values are clamped to [0, 255] before narrowing
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use image::{Rgb, Rgb32FImage, RgbImage};

use super::SaliencyMap;
use crate::domain::DetectError;

/// Jet colormap, RGB in `[0, 1]`.
#[must_use]
pub fn jet(level: u8) -> [f32; 3] {
    let x = f32::from(level) / 255.0;
    let channel = |center: f32| (1.5 - (4.0 * x - center).abs()).clamp(0.0, 1.0);
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Blends the jet-colored `saliency` over `base`.
///
/// `base` holds RGB in `[0, 1]`; `image_weight` is the share of the base image
/// in the blend. The result is rescaled so its brightest channel is 255.
///
/// # Errors
///
/// Returns [`DetectError::Inference`] if the two images differ in size.
pub fn overlay(
    base: &Rgb32FImage,
    saliency: &SaliencyMap,
    image_weight: f32,
) -> Result<RgbImage, DetectError> {
    if base.dimensions() != saliency.dimensions() {
        return Err(DetectError::inference(format!(
            "saliency map {:?} does not match image {:?}",
            saliency.dimensions(),
            base.dimensions()
        )));
    }

    let (width, height) = base.dimensions();
    let mut blended = Rgb32FImage::new(width, height);
    let mut max = 0.0f32;
    for ((out, src), heat) in blended
        .pixels_mut()
        .zip(base.pixels())
        .zip(saliency.pixels())
    {
        let color = jet((255.0 * heat[0]) as u8);
        for c in 0..3 {
            out[c] = (1.0 - image_weight) * color[c] + image_weight * src[c];
            max = max.max(out[c]);
        }
    }

    let max = if max > 0.0 { max } else { 1.0 };
    Ok(RgbImage::from_fn(width, height, |x, y| {
        let p = blended.get_pixel(x, y);
        Rgb([0, 1, 2].map(|c| (255.0 * (p[c] / max)).clamp(0.0, 255.0) as u8))
    }))
}
