//! Per-image detection shared by `predict` and `serve`.

use fakescope_core::{ArtifactUploader, DetectError, DetectionReport, Engine, SourceImage};
use tracing::debug;

/// Runs the engine on `image`, relocates the heatmap if an uploader is given,
/// and builds the caller-facing report.
///
/// # Errors
///
/// Propagates engine errors unchanged; upload failures are configuration or
/// inference errors.
pub fn detect(
    engine: &Engine,
    source: &str,
    image: &SourceImage,
    uploader: Option<&dyn ArtifactUploader>,
) -> Result<DetectionReport, DetectError> {
    let prediction = engine.predict(image)?;
    let heatmap_url = uploader
        .map(|u| u.upload(&prediction.heatmap.path))
        .transpose()?;
    Ok(DetectionReport::from_prediction(
        source,
        &prediction,
        heatmap_url,
        iso_timestamp(),
    ))
}

/// Generate ISO 8601 UTC timestamp (RFC 3339 format).
pub fn iso_timestamp() -> String {
    match time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339) {
        Ok(ts) => ts,
        Err(e) => {
            debug!("Timestamp format failed: {e}");
            String::from("1970-01-01T00:00:00Z")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use fakescope_core::inference::select_device;
    use fakescope_core::EngineConfig;
    use fakescope_test_support::{
        CheckpointBuilder, MockArtifactSink, MockArtifactUploader, SyntheticImageBuilder,
    };

    use super::*;

    fn engine() -> Engine {
        let checkpoint = CheckpointBuilder::tiny().build().unwrap();
        let config = EngineConfig {
            arch: CheckpointBuilder::tiny_arch(),
            ..EngineConfig::default()
        };
        Engine::new(
            config,
            &checkpoint,
            select_device(true),
            Arc::new(MockArtifactSink::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_report_without_upload_uses_local_name() {
        let image = SyntheticImageBuilder::named(
            SyntheticImageBuilder::uniform_gray(64, 64, 128),
            "gray.png",
        );
        let report = detect(&engine(), "photos/gray.png", &image, None).unwrap();

        assert_eq!(report.source, "photos/gray.png");
        assert_eq!(report.heatmap_filename, "hm_gray.png");
        assert!(report.heatmap_url.is_none());
        assert!(report.label < 4);
        assert!(report.analyzed_at.ends_with('Z'));
    }

    #[test]
    fn test_report_with_upload_uses_url() {
        let image = SyntheticImageBuilder::uniform_gray(64, 64, 128);
        let uploader = MockArtifactUploader::new();
        let report = detect(&engine(), "gray.png", &image, Some(&uploader)).unwrap();

        assert_eq!(report.heatmap_filename, "https://storage.test/1.png");
        assert_eq!(report.heatmap_url.as_deref(), Some("https://storage.test/1.png"));
        assert_eq!(uploader.uploaded().len(), 1);
    }

    #[test]
    fn test_unconfigured_upload_is_config_error() {
        let image = SyntheticImageBuilder::uniform_gray(64, 64, 128);
        let uploader = MockArtifactUploader::unconfigured();
        let err = detect(&engine(), "gray.png", &image, Some(&uploader)).unwrap_err();
        assert!(err.is_config());
    }
}
