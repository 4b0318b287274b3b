//! Image fetch port for obtaining images from paths, URLs or uploads.

use crate::domain::{DetectError, SourceImage};

/// Port for resolving an image location into a decoded image.
pub trait ImageFetcher: Send + Sync {
    /// Returns true if this fetcher understands the given location.
    fn handles(&self, location: &str) -> bool;

    /// Fetches and decodes the image at `location`.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Input`] if the location is unreachable, answers with a
    /// non-success status, or does not contain a decodable image.
    fn fetch(&self, location: &str) -> Result<SourceImage, DetectError>;
}
