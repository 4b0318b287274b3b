//! Configuration file support for fakescope.
//!
//! Supports TOML configuration from:
//! - XDG config: `~/.config/fakescope/config.toml` (lowest priority)
//! - Project-local: `.fakescope.toml` (searched up directory tree)
//! - CLI flags (highest priority, applied separately)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use fakescope_adapters::{is_url, models_dir, RemoteCheckpoint};
use fakescope_core::inference::SwinV2Config;
use serde::Deserialize;
use tracing::{debug, info};

/// Top-level configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Checkpoint and architecture.
    pub model: ModelConfig,
    /// Residual metric settings.
    pub analysis: AnalysisConfig,
    /// Remote image fetching.
    pub fetch: FetchConfig,
    /// Heatmap and report output.
    pub output: OutputConfig,
    /// Heatmap relocation target.
    pub storage: StorageConfig,
    /// HTTP service.
    pub server: ServerConfig,
}

/// Model configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Architecture preset name.
    pub name: Option<String>,
    /// Local checkpoint path.
    pub checkpoint: Option<PathBuf>,
    /// Remote checkpoint URL, downloaded into the cache on first use.
    pub url: Option<String>,
    /// Expected SHA-256 of the remote checkpoint.
    pub sha256: Option<String>,
    /// Sidecar regression statistics (JSON).
    pub stats: Option<PathBuf>,
    /// Checkpoint cache directory.
    pub cache_dir: Option<PathBuf>,
    /// Explicit architecture, overrides `name`.
    pub arch: Option<SwinV2Config>,
}

/// Residual analysis configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// PVR outlier threshold in standard deviations.
    pub pvr_k: Option<f64>,
}

/// Image fetch configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout_secs: Option<u64>,
}

/// Output formatting configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory heatmaps are written to.
    pub heatmap_dir: Option<PathBuf>,
    /// Output format: "json" or "jsonl".
    pub format: Option<String>,
    /// Pretty-print JSON output.
    pub pretty: Option<bool>,
    /// Show progress bar.
    pub progress: Option<bool>,
}

/// Heatmap relocation configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL heatmaps are `PUT` to.
    pub endpoint: Option<String>,
    /// Base URL reported to callers instead of the endpoint.
    pub public_base_url: Option<String>,
    /// Keep the local heatmap after a successful upload.
    pub keep_local: Option<bool>,
}

/// HTTP service configuration.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: Option<String>,
}

impl AppConfig {
    /// Load configuration from XDG and project-local files.
    ///
    /// Priority (lowest to highest):
    /// 1. XDG config: `~/.config/fakescope/config.toml`
    /// 2. Project-local: `.fakescope.toml` (searched up from cwd)
    ///
    /// Missing files are silently ignored. Invalid values are reported as warnings.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load XDG config (lowest priority)
        if let Some(xdg_path) = xdg_config_path() {
            if xdg_path.exists() {
                info!("Loading XDG config: {}", xdg_path.display());
                if let Some(xdg_config) = load_file(&xdg_path) {
                    config = xdg_config;
                }
            } else {
                debug!("XDG config not found: {}", xdg_path.display());
            }
        }

        // Load project-local config (higher priority, merged)
        if let Some(project_path) = find_project_config() {
            info!("Loading project config: {}", project_path.display());
            if let Some(project_config) = load_file(&project_path) {
                config.merge(project_config);
            }
        }

        if let Err(e) = config.validate() {
            eprintln!("warning: {e}");
        }

        config
    }

    /// Remote checkpoint, when a URL is configured.
    #[must_use]
    pub fn remote_checkpoint(&self) -> Option<RemoteCheckpoint> {
        self.model.url.as_ref().map(|url| RemoteCheckpoint {
            url: url.clone(),
            sha256: self.model.sha256.clone(),
        })
    }

    /// Checkpoint cache directory, falling back to the data directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.model.cache_dir.clone().unwrap_or_else(models_dir)
    }

    /// Validate configuration values are within acceptable ranges.
    fn validate(&self) -> Result<(), String> {
        if let Some(ref name) = self.model.name {
            if SwinV2Config::preset(name).is_none() {
                return Err(format!(
                    "model.name must be one of {}, got '{name}'",
                    SwinV2Config::PRESETS.join(", ")
                ));
            }
        }
        if let Some(ref arch) = self.model.arch {
            arch.validate().map_err(|e| format!("model.arch is invalid: {e}"))?;
        }
        if let Some(ref url) = self.model.url {
            if !is_url(url) {
                return Err(format!("model.url must be an http(s) URL, got '{url}'"));
            }
        }

        if let Some(k) = self.analysis.pvr_k {
            if !(k.is_finite() && k > 0.0) {
                return Err(format!("analysis.pvr_k must be positive, got {k}"));
            }
        }

        if self.fetch.timeout_secs == Some(0) {
            return Err("fetch.timeout_secs must be at least 1".to_string());
        }

        if let Some(ref f) = self.output.format {
            if f != "json" && f != "jsonl" {
                return Err(format!(
                    "output.format must be 'json' or 'jsonl', got '{f}'"
                ));
            }
        }

        if let Some(ref endpoint) = self.storage.endpoint {
            if !is_url(endpoint) {
                return Err(format!(
                    "storage.endpoint must be an http(s) URL, got '{endpoint}'"
                ));
            }
        }

        if let Some(ref bind) = self.server.bind {
            if bind.parse::<SocketAddr>().is_err() {
                return Err(format!(
                    "server.bind must be an address like 127.0.0.1:8000, got '{bind}'"
                ));
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` when present.
    fn merge(&mut self, other: Self) {
        // Model
        self.model.name = other.model.name.or_else(|| self.model.name.take());
        self.model.checkpoint = other
            .model
            .checkpoint
            .or_else(|| self.model.checkpoint.take());
        self.model.url = other.model.url.or_else(|| self.model.url.take());
        self.model.sha256 = other.model.sha256.or_else(|| self.model.sha256.take());
        self.model.stats = other.model.stats.or_else(|| self.model.stats.take());
        self.model.cache_dir = other
            .model
            .cache_dir
            .or_else(|| self.model.cache_dir.take());
        self.model.arch = other.model.arch.or_else(|| self.model.arch.take());

        // Analysis
        self.analysis.pvr_k = other.analysis.pvr_k.or(self.analysis.pvr_k);

        // Fetch
        self.fetch.timeout_secs = other.fetch.timeout_secs.or(self.fetch.timeout_secs);

        // Output
        self.output.heatmap_dir = other
            .output
            .heatmap_dir
            .or_else(|| self.output.heatmap_dir.take());
        self.output.format = other.output.format.or_else(|| self.output.format.take());
        self.output.pretty = other.output.pretty.or(self.output.pretty);
        self.output.progress = other.output.progress.or(self.output.progress);

        // Storage
        self.storage.endpoint = other
            .storage
            .endpoint
            .or_else(|| self.storage.endpoint.take());
        self.storage.public_base_url = other
            .storage
            .public_base_url
            .or_else(|| self.storage.public_base_url.take());
        self.storage.keep_local = other.storage.keep_local.or(self.storage.keep_local);

        // Server
        self.server.bind = other.server.bind.or_else(|| self.server.bind.take());
    }
}

/// Get the XDG config file path.
fn xdg_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("fakescope").join("config.toml"))
}

/// Find project-local config by searching up from current directory.
fn find_project_config() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_parents(&cwd)
}

/// Search for `.fakescope.toml` in the given directory and its parents.
fn find_config_in_parents(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);

    while let Some(dir) = current {
        let config_path = dir.join(".fakescope.toml");
        if config_path.exists() {
            return Some(config_path);
        }
        current = dir.parent();
    }

    None
}

/// Load and parse a TOML config file.
fn load_file(path: &Path) -> Option<AppConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("Failed to read config file {}: {}", path.display(), e);
            return None;
        }
    };

    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
            None
        }
    }
}
