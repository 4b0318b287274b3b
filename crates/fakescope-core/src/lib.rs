//! Fakescope Core - Forgery detection inference.
//!
//! This crate contains the domain types, port traits and the inference pipeline:
//! residual signal metrics, the multi-task SwinV2 model, regression denormalization,
//! Grad-CAM saliency and the engine that composes them.

pub mod analysis;
pub mod domain;
pub mod engine;
pub mod explain;
pub mod inference;
pub mod ports;

pub use domain::{
    DetectError, DetectionReport, HeadOutputs, HeatmapArtifact, Prediction, RiskClass,
    SourceImage, MAX_IMAGE_BYTES,
};
pub use engine::{Engine, EngineConfig};
pub use ports::{ArtifactSink, ArtifactUploader, ImageFetcher, ProgressEvent, ProgressSink, ResultOutput};
