//! Port definitions for hexagonal architecture.
//!
//! These traits define the boundaries between the inference core and external adapters.

mod artifact;
mod image_fetcher;
mod progress;
mod result_output;

pub use artifact::{ArtifactSink, ArtifactUploader};
pub use image_fetcher::ImageFetcher;
pub use progress::{ProgressEvent, ProgressSink};
pub use result_output::ResultOutput;
