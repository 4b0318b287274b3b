//! Checkpoint downloading and caching adapter.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name used when a checkpoint URL has no final path segment.
const FALLBACK_CHECKPOINT: &str = "checkpoint.safetensors";

/// A checkpoint published at a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCheckpoint {
    /// Download URL.
    pub url: String,
    /// Expected SHA-256 hex digest; verification is skipped when absent.
    pub sha256: Option<String>,
}

impl RemoteCheckpoint {
    /// Filename the checkpoint is cached under.
    #[must_use]
    pub fn filename(&self) -> String {
        let path = self.url.split(['?', '#']).next().unwrap_or_default();
        path.rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .map_or_else(|| FALLBACK_CHECKPOINT.to_string(), str::to_string)
    }
}

/// Returns the checkpoint cache directory.
///
/// Uses `XDG_DATA_HOME/fakescope/models` or `~/.local/share/fakescope/models`.
#[must_use]
pub fn models_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fakescope")
        .join("models")
}

/// Returns the local path of a checkpoint, downloading it into the cache if needed.
///
/// # Errors
///
/// Returns an error if the download fails or the checksum does not match.
pub fn ensure_checkpoint(remote: &RemoteCheckpoint) -> Result<PathBuf> {
    ensure_checkpoint_in(&models_dir(), remote)
}

/// Like [`ensure_checkpoint`], with an explicit cache directory.
///
/// # Errors
///
/// Returns an error if:
/// - The cache directory cannot be created
/// - The download fails
/// - The checksum doesn't match
pub fn ensure_checkpoint_in(dir: &Path, remote: &RemoteCheckpoint) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create models directory {}", dir.display()))?;

    let path = dir.join(remote.filename());
    if path.exists() {
        debug!("Checkpoint {} already cached", path.display());
    } else {
        download_checkpoint(remote, &path)?;
    }
    Ok(path)
}

/// Downloads a checkpoint from its URL.
fn download_checkpoint(remote: &RemoteCheckpoint, path: &Path) -> Result<()> {
    info!("Downloading checkpoint: {}", remote.url);

    let response = reqwest::blocking::get(&remote.url)
        .with_context(|| format!("Failed to download {}", remote.url))?;

    if !response.status().is_success() {
        anyhow::bail!("Download failed with status: {}", response.status());
    }

    let bytes = response
        .bytes()
        .with_context(|| format!("Failed to read response for {}", remote.url))?;

    match remote.sha256.as_deref() {
        Some(expected) => verify_sha256(&bytes, expected).with_context(|| {
            format!(
                "Try deleting {} and re-running to download a fresh copy.",
                path.display()
            )
        })?,
        None => debug!("No checksum configured for {}", remote.url),
    }

    // Write beside the target and rename so an interrupted download never looks cached
    let partial = path.with_extension("part");
    fs::write(&partial, &bytes)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    fs::rename(&partial, path).with_context(|| format!("Failed to move {}", path.display()))?;

    info!("Downloaded {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Checks `bytes` against a hex SHA-256 digest (case-insensitive).
///
/// # Errors
///
/// Returns an error describing both digests on mismatch.
pub fn verify_sha256(bytes: &[u8], expected: &str) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = format!("{:x}", hasher.finalize());

    if !hash.eq_ignore_ascii_case(expected.trim()) {
        anyhow::bail!("Checksum mismatch: expected {expected}, got {hash}");
    }
    Ok(())
}

/// Lists cached checkpoints with their sizes in bytes, sorted by name.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub fn list_cached(dir: &Path) -> Result<Vec<(String, u64)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut cached = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let is_checkpoint = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "safetensors" | "pt" | "pth"));
        if path.is_file() && is_checkpoint {
            cached.push((
                entry.file_name().to_string_lossy().into_owned(),
                entry.metadata()?.len(),
            ));
        }
    }
    cached.sort();
    Ok(cached)
}
