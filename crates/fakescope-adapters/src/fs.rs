//! Filesystem adapters for reading images and writing heatmaps.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fakescope_core::{ArtifactSink, DetectError, HeatmapArtifact, ImageFetcher, SourceImage};
use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};

/// Supported image extensions.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "webp", "bmp", "gif"];

/// Expands files and directories into the list of image files to analyze.
pub struct FsImageSource {
    paths: Vec<PathBuf>,
    recursive: bool,
}

impl FsImageSource {
    /// Creates a new filesystem image source.
    ///
    /// # Arguments
    ///
    /// * `paths` - Files or directories to scan
    /// * `recursive` - Whether to recurse into subdirectories
    #[must_use]
    pub const fn new(paths: Vec<PathBuf>, recursive: bool) -> Self {
        Self { paths, recursive }
    }

    /// Collects image files from the configured paths, directories sorted by name.
    ///
    /// Explicitly named files are kept whatever their extension so that bad
    /// inputs surface as rejections instead of disappearing.
    #[must_use]
    pub fn collect(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for path in &self.paths {
            if path.is_dir() {
                self.collect_from_dir(path, &mut files);
            } else {
                if !path.exists() {
                    warn!("Path does not exist: {}", path.display());
                }
                files.push(path.clone());
            }
        }

        debug!("Found {} image files", files.len());
        files
    }

    fn collect_from_dir(&self, dir: &Path, files: &mut Vec<PathBuf>) {
        let mut entries: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(e) => e.flatten().map(|entry| entry.path()).collect(),
            Err(e) => {
                warn!("Failed to read directory {}: {e}", dir.display());
                return;
            }
        };
        entries.sort();

        for path in entries {
            if path.is_file() && is_supported_image(&path) {
                files.push(path);
            } else if path.is_dir() && self.recursive {
                self.collect_from_dir(&path, files);
            }
        }
    }
}

/// Checks if a path has a supported image extension.
fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.as_str()))
}

/// Reads images from local paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsImageFetcher;

impl ImageFetcher for FsImageFetcher {
    fn handles(&self, location: &str) -> bool {
        !crate::http::is_url(location)
    }

    fn fetch(&self, location: &str) -> Result<SourceImage, DetectError> {
        let path = Path::new(location);
        let bytes = std::fs::read(path)
            .map_err(|e| DetectError::input(format!("cannot read {}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        SourceImage::decode(filename, &bytes)
    }
}

/// Writes heatmaps as PNG files into a directory.
///
/// Every artifact persisted through one sink gets its own file: a name that
/// was already handed out gets a numeric suffix (`hm_x.png`, `hm_x_2.png`).
/// Files left in the directory by earlier runs are overwritten.
#[derive(Debug)]
pub struct FsArtifactSink {
    dir: PathBuf,
    claimed: Mutex<HashSet<String>>,
}

impl FsArtifactSink {
    /// Creates a sink writing into `dir`, created on first use.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Reserves `filename`, or the first free suffixed variant of it.
    fn claim(&self, filename: &str) -> Result<String, DetectError> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| DetectError::inference("heatmap name registry is poisoned"))?;
        if claimed.insert(filename.to_string()) {
            return Ok(filename.to_string());
        }

        let name = Path::new(filename);
        let stem = name
            .file_stem()
            .map_or_else(|| filename.to_string(), |s| s.to_string_lossy().into_owned());
        let ext = name.extension().map(|e| e.to_string_lossy().into_owned());
        (2u64..)
            .map(|n| match &ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            })
            .find(|candidate| claimed.insert(candidate.clone()))
            .ok_or_else(|| DetectError::inference(format!("no free heatmap name for {filename}")))
    }
}

impl ArtifactSink for FsArtifactSink {
    fn persist(&self, filename: &str, image: &RgbImage) -> Result<HeatmapArtifact, DetectError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            DetectError::inference(format!("cannot create {}: {e}", self.dir.display()))
        })?;
        let filename = self.claim(filename)?;
        let path = self.dir.join(&filename);
        image
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|e| DetectError::inference(format!("cannot write {}: {e}", path.display())))?;
        debug!("Wrote heatmap {}", path.display());

        Ok(HeatmapArtifact {
            filename,
            path,
            width: image.width(),
            height: image.height(),
        })
    }
}
