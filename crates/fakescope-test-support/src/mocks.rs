//! Mock implementations of core port traits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use fakescope_core::domain::{DetectError, DetectionReport, HeatmapArtifact, SourceImage};
use fakescope_core::ports::{
    ArtifactSink, ArtifactUploader, ImageFetcher, ProgressEvent, ProgressSink, ResultOutput,
};
use image::RgbImage;

/// Mock implementation of `ImageFetcher` for testing.
///
/// Serves pre-registered images by location and counts fetches.
#[derive(Default)]
pub struct MockImageFetcher {
    images: HashMap<String, SourceImage>,
    fetch_count: Arc<Mutex<usize>>,
}

impl MockImageFetcher {
    /// Creates a fetcher with no registered images.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an image under `location`.
    #[must_use]
    pub fn with_image(mut self, location: &str, image: SourceImage) -> Self {
        self.images.insert(location.to_string(), image);
        self
    }

    /// Returns the number of `fetch` calls.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        *self.fetch_count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ImageFetcher for MockImageFetcher {
    fn handles(&self, _location: &str) -> bool {
        true
    }

    fn fetch(&self, location: &str) -> Result<SourceImage, DetectError> {
        *self.fetch_count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.images
            .get(location)
            .cloned()
            .ok_or_else(|| DetectError::input(format!("{location} returned 404 Not Found")))
    }
}

/// Mock implementation of `ArtifactSink` for testing.
///
/// Records every persisted heatmap instead of writing it.
pub struct MockArtifactSink {
    persisted: Arc<Mutex<Vec<(String, (u32, u32))>>>,
    fail: bool,
}

impl MockArtifactSink {
    /// Creates a sink that accepts every artifact.
    #[must_use]
    pub fn new() -> Self {
        Self {
            persisted: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// Creates a sink whose writes always fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Names and dimensions of persisted heatmaps.
    #[must_use]
    pub fn persisted(&self) -> Vec<(String, (u32, u32))> {
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of `persist` calls that succeeded.
    #[must_use]
    pub fn persist_count(&self) -> usize {
        self.persisted().len()
    }
}

impl Default for MockArtifactSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactSink for MockArtifactSink {
    fn persist(&self, filename: &str, image: &RgbImage) -> Result<HeatmapArtifact, DetectError> {
        if self.fail {
            return Err(DetectError::inference(format!("disk full writing {filename}")));
        }
        self.persisted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((filename.to_string(), image.dimensions()));
        Ok(HeatmapArtifact {
            filename: filename.to_string(),
            path: PathBuf::from("mock").join(filename),
            width: image.width(),
            height: image.height(),
        })
    }
}

/// Mock implementation of `ArtifactUploader` for testing.
pub struct MockArtifactUploader {
    uploaded: Arc<Mutex<Vec<PathBuf>>>,
    error: Option<fn(String) -> DetectError>,
}

impl MockArtifactUploader {
    /// Creates an uploader that reports `https://storage.test/<n>.png` URLs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            uploaded: Arc::new(Mutex::new(Vec::new())),
            error: None,
        }
    }

    /// Creates an uploader that behaves as if no storage were configured.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            error: Some(DetectError::Config),
            ..Self::new()
        }
    }

    /// Creates an uploader whose transfers fail.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            error: Some(DetectError::Inference),
            ..Self::new()
        }
    }

    /// Paths handed to `upload`, in order.
    #[must_use]
    pub fn uploaded(&self) -> Vec<PathBuf> {
        self.uploaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for MockArtifactUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactUploader for MockArtifactUploader {
    fn upload(&self, path: &Path) -> Result<String, DetectError> {
        if let Some(error) = self.error {
            return Err(error(format!("cannot upload {}", path.display())));
        }
        let mut uploaded = self.uploaded.lock().unwrap_or_else(PoisonError::into_inner);
        uploaded.push(path.to_path_buf());
        Ok(format!("https://storage.test/{}.png", uploaded.len()))
    }
}

/// Mock implementation of `ResultOutput` for testing.
///
/// Captures reports for later assertions.
pub struct MockResultOutput {
    reports: Arc<Mutex<Vec<DetectionReport>>>,
    flush_count: Arc<Mutex<usize>>,
}

impl MockResultOutput {
    /// Creates a new mock output.
    #[must_use]
    pub fn new() -> Self {
        Self {
            reports: Arc::new(Mutex::new(Vec::new())),
            flush_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Returns all captured reports.
    #[must_use]
    pub fn reports(&self) -> Vec<DetectionReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of times `flush()` was called.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        *self
            .flush_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockResultOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultOutput for MockResultOutput {
    fn write(&self, report: &DetectionReport) -> anyhow::Result<()> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        if let Ok(mut c) = self.flush_count.lock() {
            *c += 1;
        }
        Ok(())
    }
}

/// Mock implementation of `ProgressSink` for testing.
///
/// Captures events for later assertions.
pub struct MockProgressSink {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl MockProgressSink {
    /// Creates a new mock progress sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns all captured events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of `Started` events.
    #[must_use]
    pub fn started_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Started { .. }))
            .count()
    }

    /// Returns the number of `Completed` events.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Completed { .. }))
            .count()
    }

    /// Returns the number of `Rejected` events.
    #[must_use]
    pub fn rejected_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Rejected { .. }))
            .count()
    }

    /// Returns the final counts from the `Finished` event, if any.
    #[must_use]
    pub fn finished_counts(&self) -> Option<(usize, usize)> {
        self.events().iter().find_map(|e| match e {
            ProgressEvent::Finished {
                processed,
                rejected,
            } => Some((*processed, *rejected)),
            _ => None,
        })
    }
}

impl Default for MockProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for MockProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyntheticImageBuilder;

    #[test]
    fn test_mock_fetcher() {
        let fetcher = MockImageFetcher::new().with_image(
            "https://img.test/gray.png",
            SyntheticImageBuilder::uniform_gray(8, 8, 10),
        );
        assert!(fetcher.fetch("https://img.test/gray.png").is_ok());
        let missing = fetcher.fetch("https://img.test/none.png").err();
        assert!(missing.is_some_and(|e| e.is_input()));
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[test]
    fn test_mock_sink() {
        let sink = MockArtifactSink::new();
        let artifact = sink.persist("hm_a.png", &RgbImage::new(4, 3));
        assert!(artifact.is_ok_and(|a| a.width == 4 && a.height == 3));
        assert_eq!(sink.persisted(), vec![("hm_a.png".to_string(), (4, 3))]);

        let failing = MockArtifactSink::failing();
        assert!(failing.persist("hm_b.png", &RgbImage::new(1, 1)).is_err());
        assert_eq!(failing.persist_count(), 0);
    }

    #[test]
    fn test_mock_uploader() {
        let uploader = MockArtifactUploader::new();
        let url = uploader.upload(Path::new("uploads/hm_a.png"));
        assert_eq!(url.ok().as_deref(), Some("https://storage.test/1.png"));
        assert_eq!(uploader.uploaded().len(), 1);

        let err = MockArtifactUploader::unconfigured()
            .upload(Path::new("x.png"))
            .err();
        assert!(err.is_some_and(|e| e.is_config()));
    }

    #[test]
    fn test_mock_progress_sink() {
        let sink = MockProgressSink::new();
        sink.on_event(ProgressEvent::Started {
            source: "a.png".into(),
            index: 0,
            total: Some(2),
        });
        sink.on_event(ProgressEvent::Rejected {
            source: "b.png".into(),
            reason: "not an image".into(),
        });
        sink.on_event(ProgressEvent::Finished {
            processed: 1,
            rejected: 1,
        });
        assert_eq!(sink.started_count(), 1);
        assert_eq!(sink.rejected_count(), 1);
        assert_eq!(sink.finished_counts(), Some((1, 1)));
    }

    #[test]
    fn test_mock_result_output() {
        let output = MockResultOutput::new();
        output.flush().unwrap_or_else(|e| panic!("{e}"));
        assert!(output.reports().is_empty());
        assert_eq!(output.flush_count(), 1);
    }
}
