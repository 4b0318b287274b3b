//! Core domain types for forgery detection.

mod error;
mod prediction;
mod report;
mod risk;

pub use error::DetectError;
pub use prediction::{HeadOutputs, HeatmapArtifact, Prediction, SourceImage, MAX_IMAGE_BYTES};
pub use report::DetectionReport;
pub use risk::{RiskClass, NUM_CLASSES};
