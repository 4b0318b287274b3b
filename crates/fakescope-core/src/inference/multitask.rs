//! Shared backbone with classification and quality-regression heads.

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear, Dropout, Linear, VarBuilder};

use super::swin::{LayerCapture, SwinV2, SwinV2Config};
use crate::domain::{HeadOutputs, NUM_CLASSES};
use crate::explain::SplitClassifier;

/// Hidden width of the classification head.
const LABEL_HIDDEN: usize = 512;
/// Hidden width of each regression head.
const REGRESSION_HIDDEN: usize = 256;

/// `Linear -> ReLU -> Dropout -> Linear`, parameters at indices 0 and 3.
#[derive(Debug, Clone)]
struct ClassificationHead {
    fc1: Linear,
    dropout: Dropout,
    fc2: Linear,
}

impl ClassificationHead {
    fn new(in_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(in_dim, LABEL_HIDDEN, vb.pp("0"))?,
            dropout: Dropout::new(0.3),
            fc2: linear(LABEL_HIDDEN, NUM_CLASSES, vb.pp("3"))?,
        })
    }
}

impl Module for ClassificationHead {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.fc1.forward(x)?.relu()?;
        self.fc2.forward(&self.dropout.forward(&x, false)?)
    }
}

/// `Linear -> ReLU -> Linear` producing one scalar, parameters at indices 0 and 2.
#[derive(Debug, Clone)]
struct RegressionHead {
    fc1: Linear,
    fc2: Linear,
}

impl RegressionHead {
    fn new(in_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(in_dim, REGRESSION_HIDDEN, vb.pp("0"))?,
            fc2: linear(REGRESSION_HIDDEN, 1, vb.pp("2"))?,
        })
    }
}

impl Module for RegressionHead {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&self.fc1.forward(x)?.relu()?)
    }
}

/// Raw outputs of the three heads for a batch.
#[derive(Debug, Clone)]
pub struct MultiTaskOutput {
    /// Class logits, `(B, 4)`.
    pub logits: Tensor,
    /// Normalized SSIM estimate, `(B, 1)`.
    pub ssim: Tensor,
    /// Normalized LPIPS estimate, `(B, 1)`.
    pub lpips: Tensor,
}

impl MultiTaskOutput {
    /// Extracts the first batch item.
    ///
    /// # Errors
    ///
    /// Returns an error if the tensors are empty or have unexpected shapes.
    pub fn first(&self) -> Result<HeadOutputs> {
        let logits = self.logits.get(0)?.to_vec1::<f32>()?;
        let logits: [f32; NUM_CLASSES] = logits.try_into().map_err(|v: Vec<f32>| {
            candle_core::Error::Msg(format!("expected {NUM_CLASSES} logits, got {}", v.len()))
        })?;
        Ok(HeadOutputs {
            logits,
            ssim: self.ssim.get(0)?.get(0)?.to_scalar::<f32>()?,
            lpips: self.lpips.get(0)?.get(0)?.to_scalar::<f32>()?,
        })
    }
}

/// `SwinV2` backbone feeding a 4-way classifier and SSIM/LPIPS regressors.
#[derive(Debug, Clone)]
pub struct MultiTaskModel {
    backbone: SwinV2,
    head_label: ClassificationHead,
    head_ssim: RegressionHead,
    head_lpips: RegressionHead,
}

impl MultiTaskModel {
    /// Builds the model; parameters live under `backbone.`, `head_label.`,
    /// `head_ssim.` and `head_lpips.`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or a parameter cannot be created.
    pub fn new(cfg: &SwinV2Config, vb: VarBuilder) -> Result<Self> {
        let backbone = SwinV2::new(cfg, vb.pp("backbone"))?;
        let features = backbone.num_features();
        Ok(Self {
            backbone,
            head_label: ClassificationHead::new(features, vb.pp("head_label"))?,
            head_ssim: RegressionHead::new(features, vb.pp("head_ssim"))?,
            head_lpips: RegressionHead::new(features, vb.pp("head_lpips"))?,
        })
    }

    /// Runs all three heads on a normalized `(B, 3, H, W)` batch.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch or device failure.
    pub fn forward(&self, x: &Tensor) -> Result<MultiTaskOutput> {
        let features = self.backbone.forward(x)?;
        Ok(MultiTaskOutput {
            logits: self.head_label.forward(&features)?,
            ssim: self.head_ssim.forward(&features)?,
            lpips: self.head_lpips.forward(&features)?,
        })
    }

    /// Shared backbone.
    #[must_use]
    pub fn backbone(&self) -> &SwinV2 {
        &self.backbone
    }
}

/// Classification-only view of a [`MultiTaskModel`], split at the last
/// transformer block for saliency computation.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierOutput<'a> {
    model: &'a MultiTaskModel,
}

impl<'a> ClassifierOutput<'a> {
    /// Wraps a model.
    #[must_use]
    pub fn new(model: &'a MultiTaskModel) -> Self {
        Self { model }
    }
}

impl SplitClassifier for ClassifierOutput<'_> {
    type Capture = LayerCapture;

    fn capture(&self, x: &Tensor) -> Result<LayerCapture> {
        self.model.backbone.forward_to_target(x)
    }

    fn activation<'c>(&self, capture: &'c LayerCapture) -> &'c Tensor {
        &capture.activation
    }

    fn logits_from(&self, capture: &LayerCapture, activation: &Tensor) -> Result<Tensor> {
        let features = self.model.backbone.forward_from_target(capture, activation)?;
        self.model.head_label.forward(&features)
    }
}
