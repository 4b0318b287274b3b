//! Test support utilities for fakescope.
//!
//! Provides mocks, synthetic image builders and tiny checkpoints for testing
//! the detection pipeline without the published weights.
//!
//! # Example
//!
//! ```
//! use fakescope_test_support::{CheckpointBuilder, MockArtifactSink, SyntheticImageBuilder};
//!
//! let gray = SyntheticImageBuilder::uniform_gray(256, 256, 128);
//! let checkpoint = CheckpointBuilder::tiny().build().unwrap();
//! let sink = MockArtifactSink::new();
//! # let _ = (gray, checkpoint, sink);
//! ```

mod builders;
mod checkpoint;
mod mocks;
mod torch;

pub use builders::SyntheticImageBuilder;
pub use checkpoint::CheckpointBuilder;
pub use mocks::{
    MockArtifactSink, MockArtifactUploader, MockImageFetcher, MockProgressSink, MockResultOutput,
};
