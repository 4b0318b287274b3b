//! Input preprocessing for the classifier.

// Pixel buffers are bounded by image dimensions
#![allow(clippy::cast_possible_truncation)]

use candle_core::{Device, Result, Tensor};
use image::RgbImage;

/// Per-channel ImageNet mean.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel ImageNet standard deviation.
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Converts an already resized RGB image into a normalized `(1, 3, H, W)` tensor.
///
/// # Errors
///
/// Returns an error if tensor creation fails.
pub fn to_input_tensor(image: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = image.dimensions();
    let data: Vec<f32> = image
        .pixels()
        .flat_map(|p| {
            [0, 1, 2].map(|c| (f32::from(p[c]) / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c])
        })
        .collect();

    // HWC -> NCHW
    Tensor::from_vec(data, (1, height as usize, width as usize, 3), device)?
        .permute((0, 3, 1, 2))?
        .contiguous()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_shape_and_normalization() {
        let img = RgbImage::from_pixel(4, 3, Rgb([255, 0, 128]));
        let t = to_input_tensor(&img, &Device::Cpu).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.dims(), &[1, 3, 3, 4]);

        let values = t
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .unwrap_or_else(|e| panic!("{e}"));
        // First channel plane is red = 1.0
        let red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((values[0] - red).abs() < 1e-6);
        // Second plane starts after 12 values, green = 0.0
        let green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((values[12] - green).abs() < 1e-6);
    }
}
