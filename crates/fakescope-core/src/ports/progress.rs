//! Progress reporting port for UI integration.

use crate::domain::DetectionReport;

/// Events emitted during a batch of predictions.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Prediction started for an input.
    Started {
        /// Input location.
        source: String,
        /// Index in the batch (0-based).
        index: usize,
        /// Total inputs in batch, if known.
        total: Option<usize>,
    },
    /// Prediction completed for an input.
    Completed {
        /// The detection report.
        report: Box<DetectionReport>,
    },
    /// An input was rejected.
    Rejected {
        /// Input location.
        source: String,
        /// Reason for rejection.
        reason: String,
    },
    /// All inputs have been processed.
    Finished {
        /// Inputs predicted successfully.
        processed: usize,
        /// Inputs rejected.
        rejected: usize,
    },
}

/// Port for receiving progress events.
pub trait ProgressSink: Send + Sync {
    /// Called when a progress event occurs.
    fn on_event(&self, event: ProgressEvent);
}
