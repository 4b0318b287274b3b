//! JSON output adapter.

use std::io::{self, Write};
use std::sync::Mutex;

use anyhow::Result;
use clap::ValueEnum;
use fakescope_core::{DetectionReport, ResultOutput};

/// Output format for reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// JSON Lines (one JSON object per line)
    #[default]
    Jsonl,
    /// Single JSON array
    Json,
}

impl OutputFormat {
    /// Parses a config file value.
    #[must_use]
    pub fn from_config(value: &str) -> Option<Self> {
        match value {
            "json" => Some(Self::Json),
            "jsonl" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

/// JSON output adapter.
///
/// In [`OutputFormat::Jsonl`] mode each report is written as it arrives; in
/// [`OutputFormat::Json`] mode reports are buffered and written as one array
/// on `flush`.
pub struct JsonOutput {
    writer: Mutex<Box<dyn Write + Send>>,
    format: OutputFormat,
    pretty: bool,
    pending: Mutex<Vec<DetectionReport>>,
}

impl JsonOutput {
    /// Creates a new JSON output writing to stdout.
    #[must_use]
    pub fn stdout(format: OutputFormat, pretty: bool) -> Self {
        Self::new(Box::new(io::stdout()), format, pretty)
    }

    /// Creates a new JSON output writing to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>, format: OutputFormat, pretty: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
            pretty,
            pending: Mutex::new(Vec::new()),
        }
    }

    #[allow(clippy::significant_drop_tightening)]
    fn write_line(&self, json: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?;
        writeln!(writer, "{json}")?;
        Ok(())
    }
}

impl ResultOutput for JsonOutput {
    fn write(&self, report: &DetectionReport) -> Result<()> {
        match self.format {
            OutputFormat::Jsonl => self.write_line(&serde_json::to_string(report)?),
            OutputFormat::Json => {
                self.pending
                    .lock()
                    .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?
                    .push(report.clone());
                Ok(())
            }
        }
    }

    #[allow(clippy::significant_drop_tightening)]
    fn flush(&self) -> Result<()> {
        if self.format == OutputFormat::Json {
            let reports = std::mem::take(
                &mut *self
                    .pending
                    .lock()
                    .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?,
            );
            let json = if self.pretty {
                serde_json::to_string_pretty(&reports)?
            } else {
                serde_json::to_string(&reports)?
            };
            self.write_line(&json)?;
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock poisoned: {e}"))?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Writer sharing its buffer with the test.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn report(source: &str) -> DetectionReport {
        DetectionReport {
            source: source.to_string(),
            label: 1,
            label_name: "Sleek Fake".to_string(),
            state: "Low Risk".to_string(),
            confidence: 0.75,
            ssim: 0.6,
            lpips: 0.15,
            rm: 0.012_345,
            pvr: 1.5,
            heatmap_filename: format!("hm_{source}"),
            heatmap_url: None,
            stats_applied: true,
            analyzed_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_jsonl_writes_each_report_immediately() {
        let buf = SharedBuf::default();
        let output = JsonOutput::new(Box::new(buf.clone()), OutputFormat::Jsonl, false);

        output.write(&report("a.png")).unwrap();
        assert_eq!(buf.contents().lines().count(), 1);
        output.write(&report("b.png")).unwrap();
        output.flush().unwrap();

        let lines: Vec<_> = buf.contents().lines().map(str::to_string).collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first["source"], "a.png");
        assert_eq!(first["labelName"], "Sleek Fake");
    }

    #[test]
    fn test_json_buffers_until_flush() {
        let buf = SharedBuf::default();
        let output = JsonOutput::new(Box::new(buf.clone()), OutputFormat::Json, false);

        output.write(&report("a.png")).unwrap();
        output.write(&report("b.png")).unwrap();
        assert!(buf.contents().is_empty());

        output.flush().unwrap();
        let parsed: Vec<DetectionReport> = serde_json::from_str(buf.contents().trim()).unwrap();
        assert_eq!(parsed, vec![report("a.png"), report("b.png")]);
    }

    #[test]
    fn test_json_empty_batch_is_empty_array() {
        let buf = SharedBuf::default();
        let output = JsonOutput::new(Box::new(buf.clone()), OutputFormat::Json, true);
        output.flush().unwrap();
        assert_eq!(buf.contents().trim(), "[]");
    }

    #[test]
    fn test_pretty_json_is_multiline() {
        let buf = SharedBuf::default();
        let output = JsonOutput::new(Box::new(buf.clone()), OutputFormat::Json, true);
        output.write(&report("a.png")).unwrap();
        output.flush().unwrap();
        assert!(buf.contents().lines().count() > 3);
    }

    #[test]
    fn test_format_from_config() {
        assert_eq!(OutputFormat::from_config("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_config("jsonl"), Some(OutputFormat::Jsonl));
        assert_eq!(OutputFormat::from_config("xml"), None);
    }
}
