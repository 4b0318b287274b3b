//! Engine construction shared by `predict` and `serve`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use fakescope_adapters::models::ensure_checkpoint_in;
use fakescope_adapters::{FsArtifactSink, HttpArtifactUploader};
use fakescope_core::analysis::ResidualConfig;
use fakescope_core::inference::{select_device, SwinV2Config};
use fakescope_core::{DetectError, Engine, EngineConfig};
use tracing::{debug, info};

use crate::config::AppConfig;

/// Hardcoded defaults, lowest layer below config files and flags.
pub mod defaults {
    pub const HEATMAP_DIR: &str = "uploads";
    pub const TIMEOUT_SECS: u64 = 15;
    pub const BIND: &str = "127.0.0.1:8000";
}

/// Parse an architecture preset name.
fn parse_preset(s: &str) -> Result<String, String> {
    if SwinV2Config::preset(s).is_some() {
        Ok(s.to_string())
    } else {
        Err(format!(
            "unknown architecture '{s}', expected one of {}",
            SwinV2Config::PRESETS.join(", ")
        ))
    }
}

/// Parse a strictly positive multiplier.
fn parse_positive(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("{value} must be greater than 0"))
    }
}

/// Model and runtime arguments.
#[derive(Args, Clone, Debug, Default)]
pub struct EngineArgs {
    /// Checkpoint file (.safetensors, .pt or .pth)
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,

    /// Sidecar regression statistics (JSON), overrides embedded stats
    #[arg(long, value_name = "PATH")]
    pub stats: Option<PathBuf>,

    /// Architecture preset
    #[arg(long, value_name = "NAME", value_parser = parse_preset)]
    pub arch: Option<String>,

    /// Force CPU inference
    #[arg(long)]
    pub cpu: bool,

    /// Directory heatmaps are written to
    #[arg(long, value_name = "DIR")]
    pub heatmap_dir: Option<PathBuf>,

    /// PVR outlier threshold in standard deviations
    #[arg(long, value_parser = parse_positive)]
    pub pvr_k: Option<f64>,

    /// Timeout for remote fetches and uploads, in seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

/// Fully resolved engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub checkpoint: PathBuf,
    pub stats: Option<PathBuf>,
    pub config: EngineConfig,
    pub heatmap_dir: PathBuf,
    pub timeout: Duration,
    pub force_cpu: bool,
}

impl EngineArgs {
    /// Layers CLI flags over config values over defaults.
    ///
    /// A configured remote checkpoint is downloaded into the cache when no
    /// local checkpoint is given.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no checkpoint is configured, or the
    /// download fails.
    pub fn resolve(&self, config: &AppConfig) -> Result<EngineSettings> {
        let arch = self.arch(config);
        let residual = ResidualConfig {
            pvr_k: self
                .pvr_k
                .or(config.analysis.pvr_k)
                .unwrap_or(ResidualConfig::default().pvr_k),
        };

        let checkpoint = match self.checkpoint.clone().or_else(|| config.model.checkpoint.clone()) {
            Some(path) => path,
            None => match config.remote_checkpoint() {
                Some(remote) => ensure_checkpoint_in(&config.cache_dir(), &remote)
                    .context("Failed to obtain remote checkpoint")?,
                None => {
                    return Err(DetectError::config(
                        "no checkpoint configured; pass --checkpoint or set model.checkpoint or model.url",
                    )
                    .into())
                }
            },
        };

        Ok(EngineSettings {
            checkpoint,
            stats: self.stats.clone().or_else(|| config.model.stats.clone()),
            config: EngineConfig {
                arch,
                residual,
                ..EngineConfig::default()
            },
            heatmap_dir: self
                .heatmap_dir
                .clone()
                .or_else(|| config.output.heatmap_dir.clone())
                .unwrap_or_else(|| PathBuf::from(defaults::HEATMAP_DIR)),
            timeout: Duration::from_secs(
                self.timeout
                    .or(config.fetch.timeout_secs)
                    .unwrap_or(defaults::TIMEOUT_SECS),
            ),
            force_cpu: self.cpu,
        })
    }

    /// `--arch` preset, then `[model.arch]`, then `model.name`, then the default preset.
    fn arch(&self, config: &AppConfig) -> SwinV2Config {
        if let Some(arch) = self.arch.as_deref().and_then(SwinV2Config::preset) {
            return arch;
        }
        if let Some(ref arch) = config.model.arch {
            return arch.clone();
        }
        config
            .model
            .name
            .as_deref()
            .and_then(SwinV2Config::preset)
            .unwrap_or_default()
    }
}

impl EngineSettings {
    /// Loads the checkpoint and builds the engine with a filesystem heatmap sink.
    ///
    /// # Errors
    ///
    /// Returns the engine's configuration error if loading fails.
    pub fn build(&self) -> Result<Engine> {
        debug!(arch = ?self.config.arch, "engine architecture");
        let device = select_device(self.force_cpu);
        let sink = Arc::new(FsArtifactSink::new(&self.heatmap_dir));
        let engine = Engine::load(
            self.config.clone(),
            &self.checkpoint,
            self.stats.as_deref(),
            device,
            sink,
        )?;
        info!(
            "Loaded {} (heatmaps in {})",
            self.checkpoint.display(),
            self.heatmap_dir.display()
        );
        Ok(engine)
    }

    /// Builds the heatmap uploader from `[storage]`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no endpoint is configured.
    pub fn uploader(&self, config: &AppConfig) -> Result<HttpArtifactUploader, DetectError> {
        HttpArtifactUploader::new(
            config.storage.endpoint.as_deref(),
            config.storage.public_base_url.as_deref(),
            config.storage.keep_local.unwrap_or(false),
            self.timeout,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn local_args() -> EngineArgs {
        EngineArgs {
            checkpoint: Some(PathBuf::from("model.safetensors")),
            ..EngineArgs::default()
        }
    }

    #[test]
    fn test_defaults() {
        let settings = local_args().resolve(&AppConfig::default()).unwrap();
        assert_eq!(settings.heatmap_dir, PathBuf::from("uploads"));
        assert_eq!(settings.timeout, Duration::from_secs(15));
        assert_eq!(settings.config.arch, SwinV2Config::small_window16_256());
        assert!((settings.config.residual.pvr_k - 3.0).abs() < f64::EPSILON);
        assert!(settings.stats.is_none());
    }

    #[test]
    fn test_cli_overrides_config() {
        let config: AppConfig = toml::from_str(
            r#"
[model]
checkpoint = "config.safetensors"
name = "swinv2_base_window8_256"
stats = "config_stats.json"

[analysis]
pvr_k = 2.0

[fetch]
timeout_secs = 30

[output]
heatmap_dir = "config_out"
"#,
        )
        .unwrap();

        let from_config = EngineArgs::default().resolve(&config).unwrap();
        assert_eq!(from_config.checkpoint, PathBuf::from("config.safetensors"));
        assert_eq!(from_config.stats, Some(PathBuf::from("config_stats.json")));
        assert_eq!(from_config.config.arch.embed_dim, 128);
        assert_eq!(from_config.config.arch.window_size, 8);
        assert_eq!(from_config.heatmap_dir, PathBuf::from("config_out"));
        assert_eq!(from_config.timeout, Duration::from_secs(30));

        let args = EngineArgs {
            checkpoint: Some(PathBuf::from("cli.safetensors")),
            arch: Some("swinv2_tiny_window16_256".to_string()),
            heatmap_dir: Some(PathBuf::from("cli_out")),
            pvr_k: Some(5.0),
            timeout: Some(2),
            ..EngineArgs::default()
        };
        let from_cli = args.resolve(&config).unwrap();
        assert_eq!(from_cli.checkpoint, PathBuf::from("cli.safetensors"));
        assert_eq!(from_cli.config.arch.depths, vec![2, 2, 6, 2]);
        assert_eq!(from_cli.heatmap_dir, PathBuf::from("cli_out"));
        assert!((from_cli.config.residual.pvr_k - 5.0).abs() < f64::EPSILON);
        assert_eq!(from_cli.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_explicit_arch_beats_preset_name() {
        let config: AppConfig = toml::from_str(
            r#"
[model]
name = "swinv2_base_window8_256"

[model.arch]
embed_dim = 48
"#,
        )
        .unwrap();
        let settings = local_args().resolve(&config).unwrap();
        assert_eq!(settings.config.arch.embed_dim, 48);
    }

    #[test]
    fn test_missing_checkpoint_is_config_error() {
        let err = EngineArgs::default()
            .resolve(&AppConfig::default())
            .unwrap_err();
        let detect = err.downcast_ref::<DetectError>().unwrap();
        assert!(detect.is_config());
        assert!(err.to_string().contains("no checkpoint configured"));
    }

    #[test]
    fn test_uploader_requires_endpoint() {
        let settings = local_args().resolve(&AppConfig::default()).unwrap();
        let err = settings.uploader(&AppConfig::default()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_parsers() {
        assert!(parse_preset("swinv2_small_window8_256").is_ok());
        assert!(parse_preset("vit_base").unwrap_err().contains("swinv2_tiny_window8_256"));
        assert!(parse_positive("2.5").is_ok());
        assert!(parse_positive("0").is_err());
        assert!(parse_positive("abc").is_err());
    }
}
