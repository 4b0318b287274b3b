//! Inference orchestration.
//!
//! The [`Engine`] is built once at startup (checkpoint, device, model) and then
//! serves any number of concurrent `predict` calls.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use candle_core::Device;
use image::imageops::{self, FilterType};
use image::DynamicImage;
use tracing::{debug, info};

use crate::analysis::{ResidualAnalyzer, ResidualConfig};
use crate::domain::{DetectError, Prediction, RiskClass, SourceImage};
use crate::explain::{nhwc_to_nchw, overlay, ReshapeTransform, SaliencyExplainer};
use crate::inference::{
    argmax, load_non_strict, read_stats_file, softmax, to_input_tensor, Checkpoint,
    ClassifierOutput, Denormalized, MultiTaskModel, RegressionStats, SwinV2Config,
};
use crate::ports::ArtifactSink;

/// Name used when the original filename has no usable final component.
const FALLBACK_FILENAME: &str = "image.png";

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backbone architecture; must match the checkpoint.
    pub arch: SwinV2Config,
    /// RM / PVR settings.
    pub residual: ResidualConfig,
    /// Layout adapter for the saliency target layer.
    pub cam_transform: ReshapeTransform,
    /// Share of the source image in the heatmap blend.
    pub image_weight: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arch: SwinV2Config::default(),
            residual: ResidualConfig::default(),
            cam_transform: nhwc_to_nchw,
            image_weight: 0.5,
        }
    }
}

/// Deterministic heatmap name for an uploaded or fetched file.
#[must_use]
pub fn heatmap_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string());
    format!("hm_{name}")
}

/// Loaded model plus everything needed to turn an image into a [`Prediction`].
pub struct Engine {
    model: MultiTaskModel,
    stats: Option<RegressionStats>,
    device: Device,
    config: EngineConfig,
    input_size: u32,
    analyzer: ResidualAnalyzer,
    sink: Arc<dyn ArtifactSink>,
    forward_passes: AtomicUsize,
}

impl Engine {
    /// Builds the engine from an in-memory checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Config`] if the architecture is invalid or the
    /// checkpoint does not fit it.
    pub fn new(
        config: EngineConfig,
        checkpoint: &Checkpoint,
        device: Device,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, DetectError> {
        config.arch.validate().map_err(DetectError::config)?;
        let input_size = u32::try_from(config.arch.img_size)
            .map_err(|_| DetectError::config("img_size does not fit in u32"))?;

        let (model, report) = load_non_strict(checkpoint, &device, |vb| {
            MultiTaskModel::new(&config.arch, vb)
        })
        .map_err(|e| DetectError::config(format!("{e:#}")))?;

        let stats = checkpoint.stats().copied();
        info!(
            loaded = report.loaded,
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            stats = stats.is_some(),
            "model ready"
        );

        Ok(Self {
            model,
            stats,
            device,
            analyzer: ResidualAnalyzer::new(config.residual),
            config,
            input_size,
            sink,
            forward_passes: AtomicUsize::new(0),
        })
    }

    /// Reads the checkpoint (and optional sidecar statistics) from disk and builds the engine.
    ///
    /// Sidecar statistics take precedence over any embedded in the checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Config`] if a file is missing or unreadable, or
    /// the checkpoint does not fit the architecture.
    pub fn load(
        config: EngineConfig,
        checkpoint_path: &Path,
        stats_path: Option<&Path>,
        device: Device,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, DetectError> {
        if !checkpoint_path.is_file() {
            return Err(DetectError::config(format!(
                "checkpoint not found: {}",
                checkpoint_path.display()
            )));
        }
        let checkpoint = Checkpoint::load(checkpoint_path, &device)
            .map_err(|e| DetectError::config(format!("{e:#}")))?;
        let sidecar = stats_path
            .map(read_stats_file)
            .transpose()
            .map_err(|e| DetectError::config(format!("{e:#}")))?;
        let checkpoint = checkpoint.with_stats(sidecar);
        Self::new(config, &checkpoint, device, sink)
    }

    /// Square side length of the model input and the heatmap.
    #[must_use]
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Regression statistics in use, if any.
    #[must_use]
    pub fn stats(&self) -> Option<&RegressionStats> {
        self.stats.as_ref()
    }

    /// Number of model forward passes run so far.
    #[must_use]
    pub fn forward_passes(&self) -> usize {
        self.forward_passes.load(Ordering::Relaxed)
    }

    /// Decodes `bytes` and runs [`Engine::predict`].
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Input`] for undecodable bytes, otherwise as `predict`.
    pub fn predict_bytes(&self, filename: &str, bytes: &[u8]) -> Result<Prediction, DetectError> {
        let source = SourceImage::decode(filename, bytes)?;
        self.predict(&source)
    }

    /// Runs the full pipeline on one image.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Input`] for an empty image and
    /// [`DetectError::Inference`] if the model, the saliency pass or the
    /// artifact sink fails.
    pub fn predict(&self, source: &SourceImage) -> Result<Prediction, DetectError> {
        let rgb = source.image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(DetectError::input(format!("{} has no pixels", source.filename)));
        }
        let size = self.input_size;
        let model_input = imageops::resize(&rgb, size, size, FilterType::Triangle);
        let blend_base =
            DynamicImage::ImageRgb8(imageops::resize(&rgb, size, size, FilterType::CatmullRom))
                .to_rgb32f();
        let input = to_input_tensor(&model_input, &self.device)?;

        self.forward_passes.fetch_add(1, Ordering::Relaxed);
        let heads = self.model.forward(&input)?.first()?;
        let class_index = argmax(&heads.logits);
        let class = RiskClass::from_index(class_index)
            .ok_or_else(|| DetectError::inference(format!("class index {class_index} out of range")))?;
        let confidence = softmax(&heads.logits)[class_index];
        let regression = Denormalized::from_raw(self.stats.as_ref(), heads.ssim, heads.lpips);
        debug!(?heads, "raw head outputs");

        let classifier = ClassifierOutput::new(&self.model);
        let explainer = SaliencyExplainer::new(&classifier, self.config.cam_transform);
        let saliency = explainer.explain(&input, class_index, size, size)?;
        let heatmap = overlay(&blend_base, &saliency, self.config.image_weight)?;
        let artifact = self
            .sink
            .persist(&heatmap_filename(&source.filename), &heatmap)?;

        let residual = self.analyzer.analyze(&source.image);

        info!(
            source = %source.filename,
            class = class.display_name(),
            confidence,
            heatmap = %artifact.path.display(),
            "prediction complete"
        );

        Ok(Prediction {
            class,
            confidence,
            ssim: regression.ssim,
            lpips: regression.lpips,
            stats_applied: regression.applied,
            rm: residual.rm,
            pvr: residual.pvr,
            heatmap: artifact,
        })
    }
}
