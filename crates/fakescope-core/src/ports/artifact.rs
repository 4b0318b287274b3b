//! Artifact ports for persisting and relocating heatmaps.

use std::path::Path;

use image::RgbImage;

use crate::domain::{DetectError, HeatmapArtifact};

/// Port for persisting the heatmap overlay produced by the engine.
pub trait ArtifactSink: Send + Sync {
    /// Writes `image` as a PNG under `filename` and returns the artifact reference.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Inference`] if the artifact cannot be written.
    fn persist(&self, filename: &str, image: &RgbImage) -> Result<HeatmapArtifact, DetectError>;
}

/// Port for relocating a persisted artifact to remote storage.
pub trait ArtifactUploader: Send + Sync {
    /// Uploads the file at `path` and returns a retrievable URL.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Config`] when no storage location is configured and
    /// [`DetectError::Inference`] when the transfer fails.
    fn upload(&self, path: &Path) -> Result<String, DetectError>;
}
