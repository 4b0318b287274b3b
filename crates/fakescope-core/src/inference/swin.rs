//! `SwinV2` vision transformer backbone.
//!
//! Activations are kept channels-last `(B, H, W, C)` between stages, matching
//! the parameter layout of the reference training code. The forward pass can be
//! split just after the final block's `norm1`, which is the layer saliency maps
//! are computed on.

// Shapes and offsets here are small, non-negative and well inside f32/i64 range
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use candle_core::{Device, Module, Result, Tensor, D};
use candle_nn::init::DEFAULT_KAIMING_NORMAL;
use candle_nn::{conv2d, linear, linear_no_bias, Conv2d, Conv2dConfig, Init, Linear, VarBuilder};
use serde::{Deserialize, Serialize};

/// Value added to attention logits between tokens from different shifted regions.
const MASK_FILL: f32 = -100.0;
/// Hidden width of the continuous position bias MLP.
const CPB_HIDDEN: usize = 512;
/// Upper bound applied to the learned attention temperature before `exp`.
const MAX_LOGIT_SCALE: f64 = 4.605_170_185_988_091; // ln(100)

/// Backbone hyper-parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwinV2Config {
    /// Square input resolution.
    pub img_size: usize,
    /// Patch embedding stride.
    pub patch_size: usize,
    /// Input channels.
    pub in_chans: usize,
    /// Width of the first stage; each later stage doubles it.
    pub embed_dim: usize,
    /// Blocks per stage.
    pub depths: Vec<usize>,
    /// Attention heads per stage.
    pub num_heads: Vec<usize>,
    /// Attention window side length.
    pub window_size: usize,
    /// MLP hidden width as a multiple of the stage width.
    pub mlp_ratio: f64,
}

impl Default for SwinV2Config {
    fn default() -> Self {
        Self::small_window16_256()
    }
}

impl SwinV2Config {
    /// Names accepted by [`SwinV2Config::preset`].
    pub const PRESETS: [&'static str; 6] = [
        "swinv2_tiny_window8_256",
        "swinv2_tiny_window16_256",
        "swinv2_small_window8_256",
        "swinv2_small_window16_256",
        "swinv2_base_window8_256",
        "swinv2_base_window16_256",
    ];

    /// `swinv2_small_window16_256`, the architecture the shipped checkpoints use.
    #[must_use]
    pub fn small_window16_256() -> Self {
        Self {
            img_size: 256,
            patch_size: 4,
            in_chans: 3,
            embed_dim: 96,
            depths: vec![2, 2, 18, 2],
            num_heads: vec![3, 6, 12, 24],
            window_size: 16,
            mlp_ratio: 4.0,
        }
    }

    /// Looks up a named architecture.
    #[must_use]
    pub fn preset(name: &str) -> Option<Self> {
        let window_size = if name.ends_with("window8_256") {
            8
        } else if name.ends_with("window16_256") {
            16
        } else {
            return None;
        };
        let (embed_dim, depths, num_heads) = match name.strip_prefix("swinv2_")?.split('_').next()? {
            "tiny" => (96, vec![2, 2, 6, 2], vec![3, 6, 12, 24]),
            "small" => (96, vec![2, 2, 18, 2], vec![3, 6, 12, 24]),
            "base" => (128, vec![2, 2, 18, 2], vec![4, 8, 16, 32]),
            _ => return None,
        };
        Some(Self {
            img_size: 256,
            patch_size: 4,
            in_chans: 3,
            embed_dim,
            depths,
            num_heads,
            window_size,
            mlp_ratio: 4.0,
        })
    }

    /// Width of the pooled feature vector.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.stage_dim(self.depths.len().saturating_sub(1))
    }

    fn stage_dim(&self, stage: usize) -> usize {
        self.embed_dim << stage
    }

    fn stage_resolution(&self, stage: usize) -> usize {
        (self.img_size / self.patch_size) >> stage
    }

    /// Checks that the architecture is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns a description of the first inconsistency found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.depths.is_empty() {
            return Err("at least one stage is required".into());
        }
        if self.depths.len() != self.num_heads.len() {
            return Err(format!(
                "{} stage depths but {} head counts",
                self.depths.len(),
                self.num_heads.len()
            ));
        }
        if self.depths.contains(&0) {
            return Err("every stage needs at least one block".into());
        }
        if self.patch_size == 0 || self.window_size == 0 || self.embed_dim == 0 {
            return Err("patch size, window size and embed dim must be positive".into());
        }
        let reduction = self.patch_size << (self.depths.len() - 1);
        if self.img_size == 0 || self.img_size % reduction != 0 {
            return Err(format!(
                "img_size {} is not divisible by {reduction}",
                self.img_size
            ));
        }
        for (stage, &heads) in self.num_heads.iter().enumerate() {
            let dim = self.stage_dim(stage);
            if heads == 0 || dim % heads != 0 {
                return Err(format!("stage {stage}: width {dim} not divisible by {heads} heads"));
            }
            let res = self.stage_resolution(stage);
            let window = self.window_size.min(res);
            if res % window != 0 {
                return Err(format!(
                    "stage {stage}: resolution {res} not divisible by window {window}"
                ));
            }
        }
        if self.mlp_ratio <= 0.0 {
            return Err("mlp_ratio must be positive".into());
        }
        Ok(())
    }
}

/// Layer normalization built from primitive ops so gradients flow through it.
#[derive(Debug, Clone)]
struct Norm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl Norm {
    fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(dim, "weight", Init::Const(1.0))?,
            bias: vb.get_with_hints(dim, "bias", Init::Const(0.0))?,
            eps: 1e-5,
        })
    }
}

impl Module for Norm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let std = (var + self.eps)?.sqrt()?;
        centered
            .broadcast_div(&std)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

#[derive(Debug, Clone)]
struct PatchEmbed {
    proj: Conv2d,
    norm: Norm,
}

impl PatchEmbed {
    fn new(cfg: &SwinV2Config, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = Conv2dConfig {
            stride: cfg.patch_size,
            ..Default::default()
        };
        Ok(Self {
            proj: conv2d(
                cfg.in_chans,
                cfg.embed_dim,
                cfg.patch_size,
                conv_cfg,
                vb.pp("proj"),
            )?,
            norm: Norm::new(cfg.embed_dim, vb.pp("norm"))?,
        })
    }
}

impl Module for PatchEmbed {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        // NCHW -> NHWC
        let x = self.proj.forward(x)?.permute((0, 2, 3, 1))?.contiguous()?;
        self.norm.forward(&x)
    }
}

/// Log-spaced relative offsets fed to the position bias MLP, `((2w-1)^2, 2)`.
fn relative_coords_table(window: usize) -> Vec<f32> {
    let span = window as i64 - 1;
    let scale = if span > 0 { 8.0 / span as f64 } else { 0.0 };
    let log_norm = 8f64.log2();
    let encode = |offset: i64| {
        let v = offset as f64 * scale;
        (v.signum() * (v.abs() + 1.0).log2() / log_norm) as f32
    };
    let mut table = Vec::with_capacity(((2 * span + 1) * (2 * span + 1) * 2) as usize);
    for dh in -span..=span {
        for dw in -span..=span {
            table.push(encode(dh));
            table.push(encode(dw));
        }
    }
    table
}

/// Index into the coords table for every (query, key) token pair of a window.
fn relative_position_index(window: usize) -> Vec<u32> {
    let n = window * window;
    let side = 2 * window - 1;
    let mut index = Vec::with_capacity(n * n);
    for p in 0..n {
        let (ph, pw) = (p / window, p % window);
        for q in 0..n {
            let (qh, qw) = (q / window, q % window);
            let dh = ph + window - 1 - qh;
            let dw = pw + window - 1 - qw;
            index.push((dh * side + dw) as u32);
        }
    }
    index
}

/// Additive attention mask for shifted windows, `(num_windows, N, N)`.
fn shifted_window_mask(
    height: usize,
    width: usize,
    window: usize,
    shift: usize,
    device: &Device,
) -> Result<Tensor> {
    let region = |pos: usize, len: usize| {
        if pos < len - window {
            0
        } else if pos < len - shift {
            1
        } else {
            2
        }
    };
    let n = window * window;
    let windows = (height / window) * (width / window);
    let mut mask = Vec::with_capacity(windows * n * n);
    for wy in 0..height / window {
        for wx in 0..width / window {
            let labels: Vec<usize> = (0..n)
                .map(|i| {
                    let y = wy * window + i / window;
                    let x = wx * window + i % window;
                    region(y, height) * 3 + region(x, width)
                })
                .collect();
            for a in &labels {
                for b in &labels {
                    mask.push(if a == b { 0.0 } else { MASK_FILL });
                }
            }
        }
    }
    Tensor::from_vec(mask, (windows, n, n), device)
}

/// Cyclic shift along `dim`; positive shifts move elements towards higher indices.
fn roll(x: &Tensor, shift: isize, dim: usize) -> Result<Tensor> {
    let len = x.dim(dim)?;
    let shift = shift.rem_euclid(len as isize) as usize;
    if shift == 0 {
        return Ok(x.clone());
    }
    Tensor::cat(
        &[&x.narrow(dim, len - shift, shift)?, &x.narrow(dim, 0, len - shift)?],
        dim,
    )
}

/// `(B, H, W, C)` -> `(B * num_windows, window^2, C)`.
fn window_partition(x: &Tensor, window: usize) -> Result<Tensor> {
    let (b, h, w, c) = x.dims4()?;
    x.reshape((b, h / window, window, w / window, window, c))?
        .permute((0, 1, 3, 2, 4, 5))?
        .reshape((b * (h / window) * (w / window), window * window, c))
}

/// Inverse of [`window_partition`].
fn window_reverse(windows: &Tensor, window: usize, height: usize, width: usize) -> Result<Tensor> {
    let (count, _, c) = windows.dims3()?;
    let b = count / ((height / window) * (width / window));
    windows
        .reshape((b, height / window, width / window, window, window, c))?
        .permute((0, 1, 3, 2, 4, 5))?
        .reshape((b, height, width, c))
}

fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.maximum(1e-12)?;
    x.broadcast_div(&norm)
}

/// Scaled cosine window attention with a continuous relative position bias.
#[derive(Debug, Clone)]
struct WindowAttention {
    qkv: Linear,
    proj: Linear,
    num_heads: usize,
    logit_scale: Tensor,
    position_bias: Tensor,
}

impl WindowAttention {
    fn new(dim: usize, window: usize, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let device = vb.device().clone();

        let qkv_weight =
            vb.pp("qkv")
                .get_with_hints((3 * dim, dim), "weight", DEFAULT_KAIMING_NORMAL)?;
        let q_bias = vb.get_with_hints(dim, "q_bias", Init::Const(0.0))?;
        let v_bias = vb.get_with_hints(dim, "v_bias", Init::Const(0.0))?;
        let qkv_bias = Tensor::cat(&[&q_bias, &q_bias.zeros_like()?, &v_bias], 0)?;

        let logit_scale = vb
            .get_with_hints((num_heads, 1, 1), "logit_scale", Init::Const(10f64.ln()))?
            .minimum(MAX_LOGIT_SCALE)?
            .exp()?;

        let cpb_in = linear(2, CPB_HIDDEN, vb.pp("cpb_mlp.0"))?;
        let cpb_out = linear_no_bias(CPB_HIDDEN, num_heads, vb.pp("cpb_mlp.2"))?;
        let span = 2 * window - 1;
        let table = Tensor::from_vec(relative_coords_table(window), (span * span, 2), &device)?;
        let index = Tensor::from_vec(
            relative_position_index(window),
            window.pow(4),
            &device,
        )?;
        let n = window * window;
        let bias = cpb_out
            .forward(&cpb_in.forward(&table)?.relu()?)?
            .index_select(&index, 0)?
            .reshape((n, n, num_heads))?
            .permute((2, 0, 1))?
            .contiguous()?;
        let position_bias = (candle_nn::ops::sigmoid(&bias)? * 16.0)?.unsqueeze(0)?;

        Ok(Self {
            qkv: Linear::new(qkv_weight, Some(qkv_bias)),
            proj: linear(dim, dim, vb.pp("proj"))?,
            num_heads,
            logit_scale,
            position_bias,
        })
    }

    /// `x` is `(B * num_windows, N, C)`, `mask` is `(num_windows, N, N)`.
    fn forward(&self, x: &Tensor, mask: Option<&Tensor>) -> Result<Tensor> {
        let (b, n, c) = x.dims3()?;
        let heads = self.num_heads;
        let qkv = self
            .qkv
            .forward(x)?
            .reshape((b, n, 3, heads, c / heads))?
            .permute((2, 0, 3, 1, 4))?;
        let q = l2_normalize(&qkv.get(0)?)?.contiguous()?;
        let k = l2_normalize(&qkv.get(1)?)?;
        let v = qkv.get(2)?.contiguous()?;

        let attn = q
            .matmul(&k.t()?.contiguous()?)?
            .broadcast_mul(&self.logit_scale)?
            .broadcast_add(&self.position_bias)?;
        let attn = match mask {
            Some(mask) => {
                let windows = mask.dim(0)?;
                attn.reshape((b / windows, windows, heads, n, n))?
                    .broadcast_add(&mask.unsqueeze(1)?.unsqueeze(0)?)?
                    .reshape((b, heads, n, n))?
            }
            None => attn,
        };
        let attn = candle_nn::ops::softmax_last_dim(&attn)?;

        let out = attn.matmul(&v)?.transpose(1, 2)?.reshape((b, n, c))?;
        self.proj.forward(&out)
    }
}

#[derive(Debug, Clone)]
struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    fn new(dim: usize, hidden: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, hidden, vb.pp("fc1"))?,
            fc2: linear(hidden, dim, vb.pp("fc2"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.fc2.forward(&self.fc1.forward(x)?.gelu_erf()?)
    }
}

/// Post-norm transformer block over (optionally shifted) windows.
#[derive(Debug, Clone)]
struct SwinBlock {
    attn: WindowAttention,
    norm1: Norm,
    mlp: Mlp,
    norm2: Norm,
    window: usize,
    shift: usize,
    attn_mask: Option<Tensor>,
}

impl SwinBlock {
    fn new(
        cfg: &SwinV2Config,
        dim: usize,
        resolution: usize,
        num_heads: usize,
        shifted: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (window, shift) = if resolution <= cfg.window_size {
            (resolution, 0)
        } else if shifted {
            (cfg.window_size, cfg.window_size / 2)
        } else {
            (cfg.window_size, 0)
        };
        let attn_mask = if shift > 0 {
            Some(shifted_window_mask(
                resolution,
                resolution,
                window,
                shift,
                vb.device(),
            )?)
        } else {
            None
        };
        let hidden = (dim as f64 * cfg.mlp_ratio) as usize;
        Ok(Self {
            attn: WindowAttention::new(dim, window, num_heads, vb.pp("attn"))?,
            norm1: Norm::new(dim, vb.pp("norm1"))?,
            mlp: Mlp::new(dim, hidden, vb.pp("mlp"))?,
            norm2: Norm::new(dim, vb.pp("norm2"))?,
            window,
            shift,
            attn_mask,
        })
    }

    /// `norm1(attention(x))`, the value added to the first residual.
    fn attention_branch(&self, x: &Tensor) -> Result<Tensor> {
        let (_, h, w, _) = x.dims4()?;
        let shift = self.shift as isize;
        let shifted = if self.shift > 0 {
            roll(&roll(x, -shift, 1)?, -shift, 2)?
        } else {
            x.clone()
        };
        let windows = window_partition(&shifted, self.window)?;
        let attended = self.attn.forward(&windows, self.attn_mask.as_ref())?;
        let merged = window_reverse(&attended, self.window, h, w)?;
        let unshifted = if self.shift > 0 {
            roll(&roll(&merged, shift, 1)?, shift, 2)?
        } else {
            merged
        };
        self.norm1.forward(&unshifted)
    }

    /// Completes the block from its input and the attention branch output.
    fn finish(&self, shortcut: &Tensor, branch: &Tensor) -> Result<Tensor> {
        let (b, h, w, c) = shortcut.dims4()?;
        let x = (shortcut + branch)?.reshape((b, h * w, c))?;
        let x = (&x + self.norm2.forward(&self.mlp.forward(&x)?)?)?;
        x.reshape((b, h, w, c))
    }
}

impl Module for SwinBlock {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.finish(x, &self.attention_branch(x)?)
    }
}

/// Halves the spatial resolution and doubles the width.
#[derive(Debug, Clone)]
struct PatchMerging {
    reduction: Linear,
    norm: Norm,
}

impl PatchMerging {
    fn new(dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            reduction: linear_no_bias(4 * dim, out_dim, vb.pp("reduction"))?,
            norm: Norm::new(out_dim, vb.pp("norm"))?,
        })
    }
}

impl Module for PatchMerging {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (b, h, w, c) = x.dims4()?;
        let x = x
            .reshape((b, h / 2, 2, w / 2, 2, c))?
            .permute((0, 1, 3, 4, 2, 5))?
            .reshape((b, h / 2, w / 2, 4 * c))?;
        self.norm.forward(&self.reduction.forward(&x)?)
    }
}

#[derive(Debug, Clone)]
struct SwinStage {
    downsample: Option<PatchMerging>,
    blocks: Vec<SwinBlock>,
}

impl SwinStage {
    fn new(cfg: &SwinV2Config, stage: usize, vb: VarBuilder) -> Result<Self> {
        let dim = cfg.stage_dim(stage);
        let resolution = cfg.stage_resolution(stage);
        let downsample = if stage > 0 {
            Some(PatchMerging::new(
                cfg.stage_dim(stage - 1),
                dim,
                vb.pp("downsample"),
            )?)
        } else {
            None
        };
        let blocks = (0..cfg.depths[stage])
            .map(|i| {
                SwinBlock::new(
                    cfg,
                    dim,
                    resolution,
                    cfg.num_heads[stage],
                    i % 2 == 1,
                    vb.pp("blocks").pp(i),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { downsample, blocks })
    }

    /// Runs the downsample and all blocks except the last one.
    fn forward_head(&self, x: &Tensor) -> Result<Tensor> {
        let mut x = match &self.downsample {
            Some(down) => down.forward(x)?,
            None => x.clone(),
        };
        for block in &self.blocks[..self.blocks.len() - 1] {
            x = block.forward(&x)?;
        }
        Ok(x)
    }

    fn last_block(&self) -> Result<&SwinBlock> {
        self.blocks
            .last()
            .ok_or_else(|| candle_core::Error::Msg("stage without blocks".into()))
    }
}

impl Module for SwinStage {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = self.forward_head(x)?;
        self.last_block()?.forward(&x)
    }
}

/// Forward state at the saliency target layer.
#[derive(Debug, Clone)]
pub struct LayerCapture {
    /// Output of the final block's `norm1`, `(B, H, W, C)`.
    pub activation: Tensor,
    residual: Tensor,
}

/// `SwinV2` backbone producing pooled features.
#[derive(Debug, Clone)]
pub struct SwinV2 {
    patch_embed: PatchEmbed,
    layers: Vec<SwinStage>,
    norm: Norm,
    num_features: usize,
}

impl SwinV2 {
    /// Builds the backbone from `vb` (parameter names as in `timm`).
    ///
    /// # Errors
    ///
    /// Returns an error if the config is inconsistent or a parameter is missing.
    pub fn new(cfg: &SwinV2Config, vb: VarBuilder) -> Result<Self> {
        cfg.validate().map_err(candle_core::Error::Msg)?;
        let layers = (0..cfg.depths.len())
            .map(|stage| SwinStage::new(cfg, stage, vb.pp("layers").pp(stage)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patch_embed: PatchEmbed::new(cfg, vb.pp("patch_embed"))?,
            layers,
            norm: Norm::new(cfg.num_features(), vb.pp("norm"))?,
            num_features: cfg.num_features(),
        })
    }

    /// Width of the pooled features.
    #[must_use]
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Runs the network up to and including the final block's `norm1`.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch or device failure.
    pub fn forward_to_target(&self, x: &Tensor) -> Result<LayerCapture> {
        let (last, earlier) = self
            .layers
            .split_last()
            .ok_or_else(|| candle_core::Error::Msg("backbone without stages".into()))?;
        let mut x = self.patch_embed.forward(x)?;
        for stage in earlier {
            x = stage.forward(&x)?;
        }
        let residual = last.forward_head(&x)?;
        let activation = last.last_block()?.attention_branch(&residual)?;
        Ok(LayerCapture {
            activation,
            residual,
        })
    }

    /// Resumes from a capture, substituting `activation` for the recorded one.
    ///
    /// Returns pooled features `(B, num_features)`.
    ///
    /// # Errors
    ///
    /// Returns an error on shape mismatch or device failure.
    pub fn forward_from_target(&self, capture: &LayerCapture, activation: &Tensor) -> Result<Tensor> {
        let last = self
            .layers
            .last()
            .ok_or_else(|| candle_core::Error::Msg("backbone without stages".into()))?;
        let x = last.last_block()?.finish(&capture.residual, activation)?;
        self.norm.forward(&x)?.mean((1, 2))
    }
}

impl Module for SwinV2 {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let capture = self.forward_to_target(x)?;
        self.forward_from_target(&capture, &capture.activation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarMap;

    /// Small architecture exercising both stage types and a shifted block.
    fn tiny_config() -> SwinV2Config {
        SwinV2Config {
            img_size: 32,
            patch_size: 4,
            in_chans: 3,
            embed_dim: 8,
            depths: vec![2, 1],
            num_heads: vec![1, 2],
            window_size: 4,
            mlp_ratio: 2.0,
        }
    }

    fn values(t: &Tensor) -> Vec<f32> {
        t.flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_presets_are_valid() {
        for name in SwinV2Config::PRESETS {
            let cfg = SwinV2Config::preset(name).unwrap_or_else(|| panic!("missing {name}"));
            assert_eq!(cfg.validate(), Ok(()), "{name}");
        }
        assert_eq!(
            SwinV2Config::preset("swinv2_small_window16_256"),
            Some(SwinV2Config::small_window16_256())
        );
        assert_eq!(SwinV2Config::small_window16_256().num_features(), 768);
        assert!(SwinV2Config::preset("resnet50").is_none());
        assert!(SwinV2Config::preset("swinv2_huge_window8_256").is_none());
    }

    #[test]
    fn test_invalid_configs() {
        let mut cfg = tiny_config();
        cfg.img_size = 30;
        assert!(cfg.validate().is_err());

        let mut cfg = tiny_config();
        cfg.num_heads = vec![1];
        assert!(cfg.validate().is_err());

        let mut cfg = tiny_config();
        cfg.num_heads = vec![3, 2];
        assert!(cfg.validate().is_err());

        let mut cfg = tiny_config();
        cfg.depths = vec![2, 0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_relative_position_index() {
        let index = relative_position_index(2);
        assert_eq!(index.len(), 16);
        // Every token relative to itself maps to the center entry
        for p in 0..4 {
            assert_eq!(index[p * 4 + p], 4);
        }
        assert_eq!(index.iter().copied().max(), Some(8));
    }

    #[test]
    fn test_relative_coords_table() {
        let table = relative_coords_table(2);
        assert_eq!(table.len(), 9 * 2);
        let edge = 9f32.log2() / 3.0;
        assert!((table[0] + edge).abs() < 1e-6);
        // Center entry is (0, 0)
        assert!(table[8].abs() < f32::EPSILON && table[9].abs() < f32::EPSILON);
        assert!((table[17] - edge).abs() < 1e-6);
    }

    #[test]
    fn test_shifted_window_mask() {
        let mask = shifted_window_mask(4, 4, 2, 1, &Device::Cpu).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(mask.dims(), &[4, 4, 4]);
        let v = values(&mask);
        // Top-left window lies in a single region
        assert!(v[..16].iter().all(|&m| m == 0.0));
        // Bottom-right window mixes four regions
        let last = &v[48..];
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 0.0 } else { MASK_FILL };
                assert!((last[i * 4 + j] - expected).abs() < f32::EPSILON);
            }
        }
    }

    #[test]
    fn test_roll() {
        let x = Tensor::new(&[0f32, 1., 2., 3.], &Device::Cpu).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(values(&roll(&x, -1, 0).unwrap_or_else(|e| panic!("{e}"))), [1., 2., 3., 0.]);
        assert_eq!(values(&roll(&x, 1, 0).unwrap_or_else(|e| panic!("{e}"))), [3., 0., 1., 2.]);
        assert_eq!(values(&roll(&x, 4, 0).unwrap_or_else(|e| panic!("{e}"))), [0., 1., 2., 3.]);
    }

    #[test]
    fn test_window_partition_reverse() {
        let x = Tensor::arange(0f32, 2. * 4. * 4. * 3., &Device::Cpu)
            .and_then(|t| t.reshape((2, 4, 4, 3)))
            .unwrap_or_else(|e| panic!("{e}"));
        let windows = window_partition(&x, 2).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(windows.dims(), &[8, 4, 3]);
        // Second token of the first window is pixel (0, 1)
        let first = values(&windows.get(0).unwrap_or_else(|e| panic!("{e}")));
        assert_eq!(&first[3..6], &[3., 4., 5.]);
        let back = window_reverse(&windows, 2, 4, 4).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(values(&back), values(&x));
    }

    #[test]
    fn test_norm_normalizes_last_dim() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = Norm::new(4, vb).unwrap_or_else(|e| panic!("{e}"));
        let x = Tensor::new(&[[1f32, 2., 3., 10.]], &Device::Cpu).unwrap_or_else(|e| panic!("{e}"));
        let y = values(&norm.forward(&x).unwrap_or_else(|e| panic!("{e}")));
        let mean: f32 = y.iter().sum::<f32>() / 4.0;
        let var: f32 = y.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_split_forward_matches_full_forward() {
        let cfg = tiny_config();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = SwinV2::new(&cfg, vb).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(model.num_features(), 16);

        let x = Tensor::randn(0f32, 1., (1, 3, 32, 32), &Device::Cpu)
            .unwrap_or_else(|e| panic!("{e}"));
        let full = model.forward(&x).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(full.dims(), &[1, 16]);

        let capture = model.forward_to_target(&x).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(capture.activation.dims(), &[1, 4, 4, 16]);
        let resumed = model
            .forward_from_target(&capture, &capture.activation)
            .unwrap_or_else(|e| panic!("{e}"));
        let (a, b) = (values(&full), values(&resumed));
        assert!(a.iter().all(|v| v.is_finite()));
        assert!(a.iter().zip(&b).all(|(x, y)| (x - y).abs() < 1e-5));
    }
}
