//! Tiny checkpoints matching the published parameter layout.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use fakescope_core::inference::{Checkpoint, MultiTaskModel, RegressionStats, SwinV2Config};
use safetensors::tensor::TensorView;

/// Hidden width of the regression heads.
const REGRESSION_HIDDEN: usize = 256;

type Entry = (String, Vec<usize>, Vec<f32>);

/// Builds small checkpoints for pipeline tests.
///
/// By default only the regression output layers are written, which exercises
/// non-strict loading; [`CheckpointBuilder::complete`] writes every parameter.
#[derive(Debug, Clone)]
pub struct CheckpointBuilder {
    arch: SwinV2Config,
    stats: Option<RegressionStats>,
    parallel_prefix: bool,
    complete: bool,
    ssim_raw: f32,
    lpips_raw: f32,
    extra: Vec<Entry>,
}

impl CheckpointBuilder {
    /// Two-stage architecture on 32x32 inputs that runs in milliseconds.
    #[must_use]
    pub fn tiny_arch() -> SwinV2Config {
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

    /// `[model.arch]` TOML table for [`CheckpointBuilder::tiny_arch`].
    #[must_use]
    pub fn tiny_arch_toml() -> &'static str {
        "[model.arch]\n\
         img_size = 32\n\
         patch_size = 4\n\
         in_chans = 3\n\
         embed_dim = 8\n\
         depths = [2, 1]\n\
         num_heads = [1, 2]\n\
         window_size = 4\n\
         mlp_ratio = 2.0\n"
    }

    /// Checkpoint for the tiny architecture with raw regressions of 1.0 (SSIM) and 0.5 (LPIPS).
    #[must_use]
    pub fn tiny() -> Self {
        Self {
            arch: Self::tiny_arch(),
            stats: None,
            parallel_prefix: false,
            complete: false,
            ssim_raw: 1.0,
            lpips_raw: 0.5,
            extra: Vec::new(),
        }
    }

    /// Embeds regression statistics.
    #[must_use]
    pub fn with_stats(mut self, stats: RegressionStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Prefixes every parameter with `module.` as data-parallel training does.
    #[must_use]
    pub fn with_parallel_prefix(mut self) -> Self {
        self.parallel_prefix = true;
        self
    }

    /// Writes every model parameter rather than only the regression outputs.
    #[must_use]
    pub fn complete(mut self) -> Self {
        self.complete = true;
        self
    }

    /// Fixes the raw (normalized) regression outputs.
    #[must_use]
    pub fn with_regressions(mut self, ssim_raw: f32, lpips_raw: f32) -> Self {
        self.ssim_raw = ssim_raw;
        self.lpips_raw = lpips_raw;
        self
    }

    /// Adds a tensor the model does not know about.
    #[must_use]
    pub fn with_extra(mut self, name: &str, shape: Vec<usize>, data: Vec<f32>) -> Self {
        self.extra.push((name.to_string(), shape, data));
        self
    }

    /// Architecture the checkpoint is built for.
    #[must_use]
    pub fn arch(&self) -> &SwinV2Config {
        &self.arch
    }

    fn entries(&self) -> Result<Vec<Entry>> {
        let mut entries: HashMap<String, (Vec<usize>, Vec<f32>)> = HashMap::new();

        if self.complete {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
            MultiTaskModel::new(&self.arch, vb).context("Failed to initialise tiny model")?;
            let vars = varmap
                .data()
                .lock()
                .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;
            for (name, var) in vars.iter() {
                let data = var.as_tensor().flatten_all()?.to_vec1::<f32>()?;
                entries.insert(name.clone(), (var.dims().to_vec(), data));
            }
        }

        for (head, value) in [("head_ssim", self.ssim_raw), ("head_lpips", self.lpips_raw)] {
            entries.insert(
                format!("{head}.2.weight"),
                (vec![1, REGRESSION_HIDDEN], vec![0.0; REGRESSION_HIDDEN]),
            );
            entries.insert(format!("{head}.2.bias"), (vec![1], vec![value]));
        }
        for (name, shape, data) in &self.extra {
            entries.insert(name.clone(), (shape.clone(), data.clone()));
        }

        let prefix = if self.parallel_prefix { "module." } else { "" };
        let mut entries: Vec<Entry> = entries
            .into_iter()
            .map(|(name, (shape, data))| (format!("{prefix}{name}"), shape, data))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    /// Builds an in-memory checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if a tensor cannot be created.
    pub fn build(&self) -> Result<Checkpoint> {
        let tensors = self
            .entries()?
            .into_iter()
            .map(|(name, shape, data)| Ok((name, Tensor::from_vec(data, shape, &Device::Cpu)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Checkpoint::from_tensors(tensors, self.stats))
    }

    /// Writes the checkpoint as safetensors, statistics in the `stats` metadata entry.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let entries = self.entries()?;
        let views = entries
            .iter()
            .map(|(name, shape, data)| {
                let bytes: &[u8] = bytemuck::cast_slice(data);
                let view = TensorView::new(safetensors::Dtype::F32, shape.clone(), bytes)?;
                Ok((name.clone(), view))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        let metadata = self
            .stats
            .map(|s| serde_json::to_string(&s).map(|json| HashMap::from([("stats".to_string(), json)])))
            .transpose()?;
        let serialized = safetensors::serialize(&views, &metadata)?;
        std::fs::write(path, serialized)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Writes the checkpoint as a `torch.save` training record
    /// `{"model_state_dict": ..., "stats": ...}`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the archive fails.
    pub fn write_pytorch_to(&self, path: &Path) -> Result<()> {
        crate::torch::write_record(path, &self.entries()?, self.stats)
    }
}
