//! Fakescope Adapters - External adapters for fakescope.
//!
//! This crate provides adapters for:
//! - Filesystem image input and heatmap output
//! - HTTP image fetching and heatmap relocation
//! - Checkpoint downloading and caching

pub mod fs;
pub mod http;
pub mod models;

pub use fs::{FsArtifactSink, FsImageFetcher, FsImageSource};
pub use http::{is_url, HttpArtifactUploader, HttpImageFetcher};
pub use models::{ensure_checkpoint, models_dir, RemoteCheckpoint};
