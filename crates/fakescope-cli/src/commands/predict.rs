//! Predict command - classify images and write saliency heatmaps.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use fakescope_adapters::{is_url, FsImageFetcher, FsImageSource, HttpImageFetcher};
use fakescope_core::{
    ArtifactUploader, DetectError, Engine, ImageFetcher, ProgressEvent, ProgressSink,
    ResultOutput, SourceImage,
};
use tracing::{debug, info};

use super::engine::EngineArgs;
use super::ExitCode;
use crate::config::AppConfig;
use crate::detect::detect;
use crate::output::{JsonOutput, OutputFormat, ProgressBar};

/// Arguments for the predict command.
#[derive(Args, Clone, Debug)]
pub struct PredictArgs {
    /// Image files, directories or http(s) URLs
    #[arg(required = true, value_name = "INPUT")]
    pub inputs: Vec<String>,

    /// Recurse into subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Relocate heatmaps to the configured storage endpoint
    #[arg(long)]
    pub upload: bool,

    /// Show progress bar
    #[arg(long)]
    pub progress: bool,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output (only affects --format json)
    #[arg(long)]
    pub pretty: bool,

    #[command(flatten)]
    pub engine: EngineArgs,
}

impl PredictArgs {
    /// Apply configuration file values, respecting CLI precedence.
    ///
    /// Engine settings are layered separately by [`EngineArgs::resolve`].
    #[must_use]
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        if self.format.is_none() {
            self.format = config
                .output
                .format
                .as_deref()
                .and_then(OutputFormat::from_config);
        }
        if !self.pretty {
            self.pretty = config.output.pretty.unwrap_or(false);
        }
        if !self.progress {
            self.progress = config.output.progress.unwrap_or(false);
        }
        self
    }

    /// Get output format with fallback to JSONL.
    fn format(&self) -> OutputFormat {
        self.format.unwrap_or_default()
    }
}

/// Outcome of a predict run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictSummary {
    /// Inputs predicted successfully.
    pub processed: usize,
    /// Inputs rejected as unreadable or undecodable.
    pub rejected: usize,
    /// Exit code.
    pub exit_code: ExitCode,
}

/// Run the predict command.
///
/// Expects `args` to have been processed through `with_config()` first.
///
/// # Errors
///
/// Returns an error if the engine cannot be built or an input fails for a
/// reason other than bad input; rejected inputs only affect the exit code.
pub fn run(args: &PredictArgs, config: &AppConfig) -> Result<PredictSummary> {
    info!("Running predict on {} inputs", args.inputs.len());

    let settings = args.engine.resolve(config)?;
    let uploader = if args.upload {
        Some(settings.uploader(config)?)
    } else {
        None
    };
    let engine = settings.build()?;

    let http = HttpImageFetcher::new(settings.timeout)?;
    let fetchers: [&dyn ImageFetcher; 2] = [&http, &FsImageFetcher];

    let locations = expand_inputs(&args.inputs, args.recursive);
    let show_progress = !args.quiet && (args.progress || std::io::stderr().is_terminal());
    let progress = ProgressBar::new(Some(locations.len() as u64), args.quiet, show_progress);
    let output = JsonOutput::stdout(args.format(), args.pretty);

    let summary = process_inputs(
        &engine,
        &locations,
        &fetchers,
        uploader.as_ref().map(|u| u as &dyn ArtifactUploader),
        &output,
        &progress,
    )?;
    info!(
        processed = summary.processed,
        rejected = summary.rejected,
        "predict finished"
    );
    Ok(summary)
}

/// Expands directories into image files; URLs and plain files pass through in order.
fn expand_inputs(inputs: &[String], recursive: bool) -> Vec<String> {
    let mut locations = Vec::new();
    for input in inputs {
        if is_url(input) {
            locations.push(input.clone());
            continue;
        }
        let source = FsImageSource::new(vec![PathBuf::from(input)], recursive);
        locations.extend(source.collect().iter().map(|p| p.display().to_string()));
    }
    locations
}

/// Resolves `location` with the first fetcher that handles it.
fn fetch(fetchers: &[&dyn ImageFetcher], location: &str) -> Result<SourceImage, DetectError> {
    fetchers
        .iter()
        .find(|f| f.handles(location))
        .ok_or_else(|| DetectError::input(format!("no fetcher handles {location}")))?
        .fetch(location)
}

/// Predicts every location, skipping rejected inputs and aborting on internal errors.
fn process_inputs(
    engine: &Engine,
    locations: &[String],
    fetchers: &[&dyn ImageFetcher],
    uploader: Option<&dyn ArtifactUploader>,
    output: &dyn ResultOutput,
    progress: &dyn ProgressSink,
) -> Result<PredictSummary> {
    let total = Some(locations.len());
    let mut processed = 0usize;
    let mut rejected = 0usize;

    for (index, location) in locations.iter().enumerate() {
        progress.on_event(ProgressEvent::Started {
            source: location.clone(),
            index,
            total,
        });

        let outcome =
            fetch(fetchers, location).and_then(|image| detect(engine, location, &image, uploader));

        match outcome {
            Ok(report) => {
                output.write(&report)?;
                progress.on_event(ProgressEvent::Completed {
                    report: Box::new(report),
                });
                processed += 1;
            }
            Err(e) if e.is_input() => {
                debug!("Rejected {location}: {e}");
                progress.on_event(ProgressEvent::Rejected {
                    source: location.clone(),
                    reason: e.to_string(),
                });
                rejected += 1;
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!("Failed to process {location}")));
            }
        }
    }

    output.flush()?;
    progress.on_event(ProgressEvent::Finished {
        processed,
        rejected,
    });

    let exit_code = if rejected > 0 {
        ExitCode::InputRejected
    } else {
        ExitCode::Success
    };

    Ok(PredictSummary {
        processed,
        rejected,
        exit_code,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use fakescope_core::inference::select_device;
    use fakescope_core::{ArtifactSink, EngineConfig};
    use fakescope_test_support::{
        CheckpointBuilder, MockArtifactSink, MockArtifactUploader, MockImageFetcher,
        MockProgressSink, MockResultOutput, SyntheticImageBuilder,
    };

    use super::*;

    fn engine_with_sink(sink: Arc<dyn ArtifactSink>) -> Engine {
        let checkpoint = CheckpointBuilder::tiny().build().unwrap();
        let config = EngineConfig {
            arch: CheckpointBuilder::tiny_arch(),
            ..EngineConfig::default()
        };
        Engine::new(config, &checkpoint, select_device(true), sink).unwrap()
    }

    fn fetcher() -> MockImageFetcher {
        MockImageFetcher::new()
            .with_image("gray.png", SyntheticImageBuilder::uniform_gray(48, 48, 90))
            .with_image("noise.png", SyntheticImageBuilder::noise(40, 40, 7))
    }

    fn locations(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_all_inputs_predicted() {
        let engine = engine_with_sink(Arc::new(MockArtifactSink::new()));
        let fetcher = fetcher();
        let output = MockResultOutput::new();
        let progress = MockProgressSink::new();

        let summary = process_inputs(
            &engine,
            &locations(&["gray.png", "noise.png"]),
            &[&fetcher],
            None,
            &output,
            &progress,
        )
        .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.exit_code, ExitCode::Success);

        let reports = output.reports();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source, "gray.png");
        assert_eq!(reports[1].source, "noise.png");
        assert_eq!(output.flush_count(), 1);

        assert_eq!(progress.started_count(), 2);
        assert_eq!(progress.completed_count(), 2);
        assert_eq!(progress.finished_counts(), Some((2, 0)));
    }

    #[test]
    fn test_rejected_input_is_skipped() {
        let engine = engine_with_sink(Arc::new(MockArtifactSink::new()));
        let fetcher = fetcher();
        let output = MockResultOutput::new();
        let progress = MockProgressSink::new();

        let summary = process_inputs(
            &engine,
            &locations(&["missing.png", "gray.png"]),
            &[&fetcher],
            None,
            &output,
            &progress,
        )
        .unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.exit_code, ExitCode::InputRejected);
        assert_eq!(output.reports().len(), 1);
        assert_eq!(progress.rejected_count(), 1);
        assert_eq!(engine.forward_passes(), 1);
    }

    #[test]
    fn test_internal_error_aborts_batch() {
        let engine = engine_with_sink(Arc::new(MockArtifactSink::failing()));
        let fetcher = fetcher();
        let output = MockResultOutput::new();
        let progress = MockProgressSink::new();

        let err = process_inputs(
            &engine,
            &locations(&["gray.png", "noise.png"]),
            &[&fetcher],
            None,
            &output,
            &progress,
        )
        .unwrap_err();

        assert!(format!("{err:#}").contains("gray.png"));
        assert!(output.reports().is_empty());
        assert_eq!(fetcher.fetch_count(), 1);
        assert!(progress.finished_counts().is_none());
    }

    #[test]
    fn test_upload_reports_urls() {
        let engine = engine_with_sink(Arc::new(MockArtifactSink::new()));
        let fetcher = fetcher();
        let uploader = MockArtifactUploader::new();
        let output = MockResultOutput::new();
        let progress = MockProgressSink::new();

        process_inputs(
            &engine,
            &locations(&["gray.png", "noise.png"]),
            &[&fetcher],
            Some(&uploader),
            &output,
            &progress,
        )
        .unwrap();

        let reports = output.reports();
        assert_eq!(reports[0].heatmap_filename, "https://storage.test/1.png");
        assert_eq!(reports[1].heatmap_filename, "https://storage.test/2.png");
        assert_eq!(
            uploader.uploaded(),
            vec![
                PathBuf::from("mock/hm_uniform_gray.png"),
                PathBuf::from("mock/hm_noise.png")
            ]
        );
    }

    #[test]
    fn test_failed_upload_aborts() {
        let engine = engine_with_sink(Arc::new(MockArtifactSink::new()));
        let fetcher = fetcher();
        let uploader = MockArtifactUploader::failing();
        let output = MockResultOutput::new();

        let result = process_inputs(
            &engine,
            &locations(&["gray.png"]),
            &[&fetcher],
            Some(&uploader),
            &output,
            &MockProgressSink::new(),
        );
        assert!(result.is_err());
        assert!(output.reports().is_empty());
    }

    #[test]
    fn test_fetch_picks_first_handling_fetcher() {
        let err = fetch(&[&FsImageFetcher], "/definitely/not/here.png").unwrap_err();
        assert!(err.is_input());

        let err = fetch(&[&FsImageFetcher], "https://example.com/a.png").unwrap_err();
        assert!(err.to_string().contains("no fetcher handles"));
    }

    #[test]
    fn test_expand_inputs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        std::fs::write(root.join("b.jpg"), b"").unwrap();
        std::fs::write(root.join("a.png"), b"").unwrap();
        std::fs::write(root.join("notes.txt"), b"").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();
        std::fs::write(root.join("sub").join("c.png"), b"").unwrap();

        let dir = root.display().to_string();
        let url = "https://example.com/cat.png".to_string();

        let flat = expand_inputs(&[url.clone(), dir.clone()], false);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[0], url);
        assert!(flat[1].ends_with("a.png"));
        assert!(flat[2].ends_with("b.jpg"));

        let deep = expand_inputs(&[dir], true);
        assert_eq!(deep.len(), 3);
        assert!(deep[2].ends_with("c.png"));
    }

    #[test]
    fn test_with_config_respects_cli() {
        let config: AppConfig = toml::from_str(
            r"
[output]
format = 'json'
pretty = true
",
        )
        .unwrap();

        let args = PredictArgs {
            inputs: vec!["a.png".to_string()],
            recursive: false,
            upload: false,
            progress: false,
            quiet: true,
            format: None,
            pretty: false,
            engine: EngineArgs::default(),
        };
        let merged = args.clone().with_config(&config);
        assert_eq!(merged.format(), OutputFormat::Json);
        assert!(merged.pretty);

        let explicit = PredictArgs {
            format: Some(OutputFormat::Jsonl),
            ..args
        }
        .with_config(&config);
        assert_eq!(explicit.format(), OutputFormat::Jsonl);
    }
}
