//! Progress bar adapter using indicatif.

use fakescope_core::{ProgressEvent, ProgressSink};
use indicatif::{ProgressBar as IndicatifBar, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";

/// How progress reaches the terminal.
enum Display {
    /// Nothing, not even rejections.
    Quiet,
    /// One stderr line per image.
    Lines,
    /// An indicatif bar; rejections are still printed.
    Bar(IndicatifBar),
}

/// Progress bar adapter for CLI output.
pub struct ProgressBar {
    display: Display,
}

impl ProgressBar {
    /// Creates a new progress bar.
    ///
    /// # Arguments
    ///
    /// * `total` - Total number of items, if known
    /// * `quiet` - If true, suppress all output
    /// * `show_bar` - If true, show progress bar; otherwise show per-item verdicts
    #[must_use]
    pub fn new(total: Option<u64>, quiet: bool, show_bar: bool) -> Self {
        let display = match (quiet, show_bar) {
            (true, _) => Display::Quiet,
            (false, false) => Display::Lines,
            (false, true) => {
                let bar = total.map_or_else(IndicatifBar::new_spinner, IndicatifBar::new);
                if let Ok(style) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                    bar.set_style(style.progress_chars("#>-"));
                }
                Display::Bar(bar)
            }
        };
        Self { display }
    }
}

impl ProgressSink for ProgressBar {
    fn on_event(&self, event: ProgressEvent) {
        match (&self.display, event) {
            (Display::Quiet, _) => {}
            (
                Display::Bar(bar),
                ProgressEvent::Started {
                    source,
                    index,
                    total,
                },
            ) => {
                if let Some(t) = total {
                    bar.set_length(t as u64);
                }
                bar.set_position(index as u64);
                bar.set_message(source);
            }
            (Display::Bar(bar), ProgressEvent::Completed { .. }) => bar.inc(1),
            (Display::Lines, ProgressEvent::Completed { report }) => {
                eprintln!(
                    "{}: {} ({}, {:.2}%)",
                    report.source,
                    report.label_name,
                    report.state,
                    report.confidence * 100.0
                );
            }
            (display, ProgressEvent::Rejected { source, reason }) => {
                if let Display::Bar(bar) = display {
                    bar.inc(1);
                }
                eprintln!("WARN: Rejected {source}: {reason}");
            }
            (
                Display::Bar(bar),
                ProgressEvent::Finished {
                    processed,
                    rejected,
                },
            ) => bar.finish_with_message(format!("Done: {processed} predicted, {rejected} rejected")),
            (Display::Lines, ProgressEvent::Started { .. } | ProgressEvent::Finished { .. }) => {}
        }
    }
}
