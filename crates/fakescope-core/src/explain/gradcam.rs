//! Gradient-weighted class activation maps.

use candle_core::{Result as CandleResult, Tensor, Var};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use tracing::debug;

use crate::domain::DetectError;

/// Per-pixel importance in `[0, 1]`.
pub type SaliencyMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Brings a target-layer tensor into channels-first `(B, C, H, W)` layout.
pub type ReshapeTransform = fn(&Tensor) -> CandleResult<Tensor>;

/// For layers that emit `(B, H, W, C)`.
///
/// # Errors
///
/// Returns an error if the tensor is not 4-dimensional.
pub fn nhwc_to_nchw(t: &Tensor) -> CandleResult<Tensor> {
    t.permute((0, 3, 1, 2))
}

/// For layers already in `(B, C, H, W)`.
///
/// # Errors
///
/// Never fails.
pub fn channels_first(t: &Tensor) -> CandleResult<Tensor> {
    Ok(t.clone())
}

/// A classifier whose forward pass can be paused at the explained layer.
pub trait SplitClassifier {
    /// State recorded at the target layer.
    type Capture;

    /// Runs up to the target layer.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch or device failure.
    fn capture(&self, x: &Tensor) -> CandleResult<Self::Capture>;

    /// Target layer output held by `capture`.
    fn activation<'c>(&self, capture: &'c Self::Capture) -> &'c Tensor;

    /// Finishes the forward pass with `activation` in place of the captured one,
    /// returning class logits `(B, classes)`.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch or device failure.
    fn logits_from(&self, capture: &Self::Capture, activation: &Tensor) -> CandleResult<Tensor>;
}

/// Grad-CAM over a single target layer.
///
/// Built per request; it borrows the model and holds no other state.
pub struct SaliencyExplainer<'m, M> {
    model: &'m M,
    reshape: ReshapeTransform,
}

impl<'m, M: SplitClassifier> SaliencyExplainer<'m, M> {
    /// Creates an explainer for `model`, whose target layer output is brought
    /// to channels-first layout with `reshape`.
    pub fn new(model: &'m M, reshape: ReshapeTransform) -> Self {
        Self { model, reshape }
    }

    /// Computes the saliency of `target_class` for the first item of `input`,
    /// min-max scaled and then resized to `width` x `height`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Inference`] if the forward or backward pass fails
    /// or no gradient reaches the target layer.
    pub fn explain(
        &self,
        input: &Tensor,
        target_class: usize,
        width: u32,
        height: u32,
    ) -> Result<SaliencyMap, DetectError> {
        let capture = self.model.capture(input)?;
        let target = Var::from_tensor(&self.model.activation(&capture).detach())?;

        let logits = self.model.logits_from(&capture, target.as_tensor())?;
        let score = logits.narrow(1, target_class, 1)?.sum_all()?;
        let grads = score.backward()?;
        let grad = grads
            .get(target.as_tensor())
            .ok_or_else(|| DetectError::inference("no gradient reached the target layer"))?;

        let activations = (self.reshape)(&target.as_tensor().detach())?;
        let gradients = (self.reshape)(grad)?;
        let weights = gradients.mean_keepdim(3)?.mean_keepdim(2)?;
        let cam = activations
            .broadcast_mul(&weights)?
            .sum(1)?
            .relu()?
            .get(0)?;

        let (h, w) = cam.dims2()?;
        debug!(h, w, target_class, "computed class activation map");
        let raw = cam.flatten_all()?.to_vec1::<f32>()?;
        let mut small = SaliencyMap::from_raw(
            u32::try_from(w).map_err(|e| DetectError::inference(e.to_string()))?,
            u32::try_from(h).map_err(|e| DetectError::inference(e.to_string()))?,
            raw,
        )
        .ok_or_else(|| DetectError::inference("activation map buffer size mismatch"))?;

        scale_to_unit(&mut small);
        // Triangle resampling is a convex combination, so the range stays [0, 1].
        Ok(imageops::resize(&small, width, height, FilterType::Triangle))
    }
}

/// Min-max scaling to `[0, 1]`.
fn scale_to_unit(map: &mut SaliencyMap) {
    let min = map.pixels().map(|p| p[0]).fold(f32::INFINITY, f32::min);
    let mut max = f32::NEG_INFINITY;
    for p in map.pixels_mut() {
        p[0] -= min;
        max = max.max(p[0]);
    }
    for p in map.pixels_mut() {
        p[0] /= 1e-7 + max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    /// Activation is the input itself; logit `c` is the spatial sum of channel `c`.
    struct ChannelSum;

    impl SplitClassifier for ChannelSum {
        type Capture = Tensor;

        fn capture(&self, x: &Tensor) -> CandleResult<Tensor> {
            Ok(x.clone())
        }

        fn activation<'c>(&self, capture: &'c Tensor) -> &'c Tensor {
            capture
        }

        fn logits_from(&self, _: &Tensor, activation: &Tensor) -> CandleResult<Tensor> {
            activation.sum((2, 3))
        }
    }

    fn input(channel0: [f32; 4], channel1: [f32; 4]) -> Tensor {
        let data: Vec<f32> = channel0.into_iter().chain(channel1).collect();
        Tensor::from_vec(data, (1, 2, 2, 2), &Device::Cpu).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_selects_target_channel() {
        let x = input([0., 1., 2., 3.], [9., 9., 0., 0.]);
        let explainer = SaliencyExplainer::new(&ChannelSum, channels_first);
        let map = explainer.explain(&x, 0, 2, 2).unwrap_or_else(|e| panic!("{e}"));
        let values: Vec<f32> = map.pixels().map(|p| p[0]).collect();
        let expected = [0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-4, "{values:?}");
        }
    }

    #[test]
    fn test_other_class_uses_other_channel() {
        let x = input([0., 1., 2., 3.], [9., 9., 0., 0.]);
        let explainer = SaliencyExplainer::new(&ChannelSum, channels_first);
        let map = explainer.explain(&x, 1, 2, 2).unwrap_or_else(|e| panic!("{e}"));
        assert!(map.get_pixel(0, 0)[0] > 0.99);
        assert!(map.get_pixel(0, 1)[0] < 1e-4);
    }

    #[test]
    fn test_negative_evidence_gives_flat_map() {
        let x = input([-1., -2., -3., -4.], [0., 0., 0., 0.]);
        let explainer = SaliencyExplainer::new(&ChannelSum, channels_first);
        let map = explainer.explain(&x, 0, 8, 8).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(map.dimensions(), (8, 8));
        assert!(map.pixels().all(|p| p[0] == 0.0));
    }

    #[test]
    fn test_output_is_unit_range_after_upscale() {
        let x = input([0.5, 4., 1., 2.], [1., 1., 1., 1.]);
        let explainer = SaliencyExplainer::new(&ChannelSum, channels_first);
        let map = explainer.explain(&x, 0, 16, 16).unwrap_or_else(|e| panic!("{e}"));
        assert!(map.pixels().all(|p| (0.0..=1.0).contains(&p[0])));
        let max = map.pixels().map(|p| p[0]).fold(0.0, f32::max);
        assert!(max > 0.99);
    }

    #[test]
    fn test_nhwc_transform() {
        let t = Tensor::zeros((1, 4, 5, 6), candle_core::DType::F32, &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"));
        let moved = nhwc_to_nchw(&t).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(moved.dims(), &[1, 6, 4, 5]);
    }
}
