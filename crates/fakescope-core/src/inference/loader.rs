//! Checkpoint loading for safetensors and `PyTorch` pickle files.
//!
//! Loading is non-strict: parameters the model expects but the checkpoint lacks
//! keep their initial values, checkpoint entries the model does not know are
//! ignored. Both sets are reported.

use anyhow::{anyhow, bail, Context, Result};
use candle_core::pickle::{Object, Stack};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use safetensors::SafeTensors;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use super::denorm::RegressionStats;

/// Key holding the state dict inside a training checkpoint.
const STATE_DICT_KEY: &str = "model_state_dict";
/// Safetensors metadata key, and training-record key, carrying regression statistics.
const STATS_KEY: &str = "stats";
/// Prefix added to parameter names by data-parallel wrappers.
const PARALLEL_PREFIX: &str = "module.";

/// Parameters and optional regression statistics read from disk.
#[derive(Debug, Default)]
pub struct Checkpoint {
    tensors: HashMap<String, Tensor>,
    stats: Option<RegressionStats>,
}

/// Outcome of a non-strict load.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Number of parameters copied from the checkpoint.
    pub loaded: usize,
    /// Expected parameters absent from the checkpoint.
    pub missing: Vec<String>,
    /// Checkpoint entries the model has no slot for.
    pub unexpected: Vec<String>,
}

/// Removes data-parallel wrapper segments from a parameter name.
#[must_use]
pub fn strip_parallel_prefix(name: &str) -> String {
    name.replace(PARALLEL_PREFIX, "")
}

impl Checkpoint {
    /// Builds a checkpoint from in-memory tensors, normalizing parameter names.
    #[must_use]
    pub fn from_tensors(
        tensors: impl IntoIterator<Item = (String, Tensor)>,
        stats: Option<RegressionStats>,
    ) -> Self {
        let tensors = tensors
            .into_iter()
            .map(|(name, tensor)| (strip_parallel_prefix(&name), tensor))
            .collect();
        Self { tensors, stats }
    }

    /// Reads a checkpoint, choosing the format from the file extension.
    ///
    /// `.safetensors` files are parsed directly, anything else is treated as a
    /// `PyTorch` pickle (`.pt` / `.pth`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let is_safetensors = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));
        if is_safetensors {
            Self::from_safetensors(path, device)
        } else {
            Self::from_pytorch(path, device)
        }
    }

    /// Reads a safetensors checkpoint. Statistics come from the `stats` metadata entry.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The safetensors data is invalid
    /// - The `stats` metadata is not valid JSON
    pub fn from_safetensors(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading safetensors from {}", path.display());

        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?;

        let (_, metadata) = SafeTensors::read_metadata(&data)
            .with_context(|| format!("Failed to parse safetensors header: {}", path.display()))?;
        let stats = metadata
            .metadata()
            .as_ref()
            .and_then(|m| m.get(STATS_KEY))
            .map(|raw| serde_json::from_str::<RegressionStats>(raw))
            .transpose()
            .with_context(|| format!("Invalid stats metadata in {}", path.display()))?;

        let tensors = SafeTensors::deserialize(&data)
            .with_context(|| format!("Failed to parse safetensors: {}", path.display()))?;

        let mut tensor_map = Vec::with_capacity(tensors.len());
        for name in tensors.names() {
            let view = tensors
                .tensor(name)
                .with_context(|| format!("Failed to get tensor '{name}'"))?;
            let dtype = safetensors_dtype_to_candle(view.dtype())?;
            let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)
                .with_context(|| format!("Failed to create tensor '{name}'"))?;
            tensor_map.push((name.clone(), tensor));
        }

        Ok(Self::from_tensors(tensor_map, stats))
    }

    /// Reads a `PyTorch` pickle checkpoint.
    ///
    /// Accepts both a bare state dict and a training record whose state dict
    /// sits under `model_state_dict`. A record's `stats` entry supplies the
    /// regression statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, contains no tensors, or
    /// carries a `stats` entry missing one of the four values.
    pub fn from_pytorch(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading PyTorch checkpoint from {}", path.display());

        let tensors = match candle_core::pickle::read_all_with_key(path, Some(STATE_DICT_KEY)) {
            Ok(tensors) if !tensors.is_empty() => tensors,
            _ => candle_core::pickle::read_all_with_key(path, None)
                .with_context(|| format!("Failed to read checkpoint: {}", path.display()))?,
        };
        if tensors.is_empty() {
            bail!("Checkpoint contains no tensors: {}", path.display());
        }

        let tensors = tensors
            .into_iter()
            .map(|(name, t)| Ok((name, t.to_device(device)?)))
            .collect::<Result<Vec<_>>>()?;
        let stats = read_record_stats(path)
            .with_context(|| format!("Invalid stats in {}", path.display()))?;
        Ok(Self::from_tensors(tensors, stats))
    }

    /// Replaces the regression statistics.
    #[must_use]
    pub fn with_stats(mut self, stats: Option<RegressionStats>) -> Self {
        if stats.is_some() {
            self.stats = stats;
        }
        self
    }

    /// Regression statistics, if the checkpoint carried any.
    #[must_use]
    pub fn stats(&self) -> Option<&RegressionStats> {
        self.stats.as_ref()
    }

    /// Number of parameter tensors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the checkpoint holds no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Looks up a parameter by its normalized name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }
}

/// Reads regression statistics from a JSON sidecar file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or lacks one of the four fields.
pub fn read_stats_file(path: impl AsRef<Path>) -> Result<RegressionStats> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read stats: {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid stats file: {}", path.display()))
}

/// Decodes the `stats` entry of a pickled training record, if there is one.
fn read_record_stats(path: &Path) -> Result<Option<RegressionStats>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(std::io::BufReader::new(file))?;
    let Some(record) = archive
        .file_names()
        .find(|name| name.ends_with("data.pkl"))
        .map(str::to_string)
    else {
        return Ok(None);
    };

    let mut reader = std::io::BufReader::new(archive.by_name(&record)?);
    let mut stack = Stack::empty();
    stack.read_loop(&mut reader)?;
    let Object::Dict(entries) = stack.finalize()? else {
        return Ok(None);
    };
    match entries.into_iter().find(|(key, _)| is_key(key, STATS_KEY)) {
        Some((_, Object::None)) | None => Ok(None),
        Some((_, Object::Dict(fields))) => {
            let field = |name: &str| -> Result<f64> {
                match fields.iter().find(|(key, _)| is_key(key, name)) {
                    Some((_, Object::Float(v))) => Ok(*v),
                    Some((_, Object::Int(v))) => Ok(f64::from(*v)),
                    Some((_, other)) => bail!("stats.{name} is not a number: {other:?}"),
                    None => bail!("stats.{name} is missing"),
                }
            };
            debug!("Checkpoint record carries regression statistics");
            Ok(Some(RegressionStats {
                ssim_mean: field("ssim_mean")?,
                ssim_std: field("ssim_std")?,
                lpips_mean: field("lpips_mean")?,
                lpips_std: field("lpips_std")?,
            }))
        }
        Some((_, other)) => Err(anyhow!("stats is not a dict: {other:?}")),
    }
}

fn is_key(key: &Object, name: &str) -> bool {
    matches!(key, Object::Unicode(k) if k == name)
}

/// Builds a model from `checkpoint` without requiring an exact key match.
///
/// `build` runs twice: once against a [`VarMap`] to discover every expected
/// parameter with its initial value, and once against the merged, detached
/// tensors to produce the returned model.
///
/// # Errors
///
/// Returns an error if a checkpoint tensor's shape differs from the model's
/// parameter of the same name, or if `build` fails.
pub fn load_non_strict<T>(
    checkpoint: &Checkpoint,
    device: &Device,
    build: impl Fn(VarBuilder) -> candle_core::Result<T>,
) -> Result<(T, LoadReport)> {
    let varmap = VarMap::new();
    build(VarBuilder::from_varmap(&varmap, DType::F32, device))
        .context("Failed to initialise model parameters")?;

    let mut report = LoadReport::default();
    let merged: HashMap<String, Tensor> = {
        let vars = varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;

        for (name, tensor) in &checkpoint.tensors {
            let Some(var) = vars.get(name) else {
                report.unexpected.push(name.clone());
                continue;
            };
            if var.shape() != tensor.shape() {
                bail!(
                    "size mismatch for {name}: checkpoint {:?}, model {:?}",
                    tensor.dims(),
                    var.dims()
                );
            }
            let value = tensor.to_dtype(DType::F32)?.to_device(device)?;
            var.set(&value)
                .with_context(|| format!("Failed to copy parameter '{name}'"))?;
            report.loaded += 1;
        }

        report.missing = vars
            .keys()
            .filter(|name| !checkpoint.tensors.contains_key(*name))
            .cloned()
            .collect();

        vars.iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().detach()))
            .collect()
    };
    report.missing.sort();
    report.unexpected.sort();

    if !report.missing.is_empty() {
        warn!(
            "{} parameters missing from checkpoint, first: {}",
            report.missing.len(),
            report.missing[0]
        );
    }
    if !report.unexpected.is_empty() {
        warn!(
            "{} unexpected checkpoint entries ignored, first: {}",
            report.unexpected.len(),
            report.unexpected[0]
        );
    }
    debug!("Loaded {} parameters", report.loaded);

    let model = build(VarBuilder::from_tensors(merged, DType::F32, device))
        .context("Failed to build model from checkpoint")?;
    Ok((model, report))
}

/// Converts safetensors dtype to candle dtype.
fn safetensors_dtype_to_candle(dtype: safetensors::Dtype) -> Result<DType> {
    use safetensors::Dtype as S;
    match dtype {
        S::F32 => Ok(DType::F32),
        S::F64 => Ok(DType::F64),
        S::F16 => Ok(DType::F16),
        S::BF16 => Ok(DType::BF16),
        S::I64 => Ok(DType::I64),
        S::U8 => Ok(DType::U8),
        S::U32 => Ok(DType::U32),
        other => bail!("Unsupported dtype: {other:?}"),
    }
}
