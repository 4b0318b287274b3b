//! Synthetic image builders for testing.

use std::io::Cursor;

use fakescope_core::SourceImage;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};

/// Builder for creating synthetic test images.
///
/// Provides convenience methods for generating images with known residual
/// characteristics (flat, high-frequency, smooth, noisy).
pub struct SyntheticImageBuilder;

impl SyntheticImageBuilder {
    /// Creates a uniform gray image; its residual is exactly zero.
    #[must_use]
    pub fn uniform_gray(width: u32, height: u32, value: u8) -> SourceImage {
        let img = GrayImage::from_pixel(width, height, Luma([value]));
        SourceImage::new("uniform_gray.png", DynamicImage::ImageLuma8(img))
    }

    /// Creates a high-contrast checkerboard pattern.
    #[must_use]
    pub fn checkerboard(width: u32, height: u32, cell_size: u32) -> SourceImage {
        let cell = cell_size.max(1);
        let img = GrayImage::from_fn(width, height, |x, y| {
            if (x / cell + y / cell) % 2 == 0 {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        SourceImage::new("checkerboard.png", DynamicImage::ImageLuma8(img))
    }

    /// Creates a smooth horizontal RGB gradient.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn horizontal_gradient(width: u32, height: u32) -> SourceImage {
        let img = RgbImage::from_fn(width, height, |x, _| {
            let val = ((u32::from(u8::MAX) * x) / width.max(1)) as u8;
            Rgb([val, val / 2, 255 - val])
        });
        SourceImage::new("gradient.png", DynamicImage::ImageRgb8(img))
    }

    /// Creates deterministic pseudo-random RGB noise.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn noise(width: u32, height: u32, seed: u64) -> SourceImage {
        let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let img = RgbImage::from_fn(width, height, |_, _| {
            let mut next = || {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 56) as u8
            };
            Rgb([next(), next(), next()])
        });
        SourceImage::new("noise.png", DynamicImage::ImageRgb8(img))
    }

    /// Renames a synthetic image.
    #[must_use]
    pub fn named(image: SourceImage, filename: &str) -> SourceImage {
        SourceImage::new(filename, image.image)
    }

    /// Encodes an image as PNG bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn png_bytes(image: &SourceImage) -> anyhow::Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        image.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    /// Bytes that start like a PNG but cannot be decoded.
    #[must_use]
    pub fn corrupted_bytes() -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(b"this is not image data");
        bytes
    }
}
