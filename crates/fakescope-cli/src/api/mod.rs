//! HTTP prediction service.
//!
//! Routes:
//! - `GET /` service status
//! - `POST /predict` JSON body `{"image_url": "..."}`
//! - `POST /predict/upload` multipart form with a `file` field

pub mod error;
pub mod handlers;
pub mod router;

use std::sync::Arc;

use fakescope_core::{ArtifactUploader, Engine, ImageFetcher};

pub use router::router;

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    /// Loaded model, read-only after startup.
    pub engine: Arc<Engine>,
    /// Resolves `image_url` requests.
    pub fetcher: Arc<dyn ImageFetcher>,
    /// Relocates heatmaps when storage is enabled.
    pub uploader: Option<Arc<dyn ArtifactUploader>>,
}
