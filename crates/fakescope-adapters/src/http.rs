//! HTTP adapters: image download and heatmap relocation.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use fakescope_core::{ArtifactUploader, DetectError, ImageFetcher, SourceImage, MAX_IMAGE_BYTES};
use reqwest::blocking::Client;
use reqwest::Url;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name given to downloads whose URL path has no final segment.
const FALLBACK_FILENAME: &str = "image.png";

/// Download cap, shared with the service's upload limit.
const MAX_DOWNLOAD_BYTES: u64 = MAX_IMAGE_BYTES as u64;

/// Returns true for `http://` and `https://` locations.
#[must_use]
pub fn is_url(location: &str) -> bool {
    let lower = location.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fakescope/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

/// Downloads images over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    /// Creates a fetcher whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

/// Last non-empty path segment of `url`.
fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map_or_else(|| FALLBACK_FILENAME.to_string(), str::to_string)
}

impl ImageFetcher for HttpImageFetcher {
    fn handles(&self, location: &str) -> bool {
        is_url(location)
    }

    fn fetch(&self, location: &str) -> Result<SourceImage, DetectError> {
        let url = Url::parse(location.trim())
            .map_err(|e| DetectError::input(format!("invalid URL {location}: {e}")))?;
        debug!("Fetching {url}");

        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| DetectError::input(format!("cannot fetch {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::input(format!("fetching {url} returned {status}")));
        }
        let too_large =
            || DetectError::input(format!("{url} is larger than {MAX_DOWNLOAD_BYTES} bytes"));
        if response
            .content_length()
            .is_some_and(|len| len > MAX_DOWNLOAD_BYTES)
        {
            return Err(too_large());
        }

        // Content-Length may be absent or wrong; never buffer past the cap.
        let mut bytes = Vec::new();
        response
            .take(MAX_DOWNLOAD_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| DetectError::input(format!("cannot read body of {url}: {e}")))?;
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(too_large());
        }

        SourceImage::decode(filename_from_url(&url), &bytes)
    }
}

/// Relocates heatmaps with an HTTP `PUT` to object storage.
#[derive(Debug, Clone)]
pub struct HttpArtifactUploader {
    client: Client,
    endpoint: String,
    public_base_url: Option<String>,
    keep_local: bool,
}

impl HttpArtifactUploader {
    /// Creates an uploader targeting `endpoint`.
    ///
    /// Objects are reported under `public_base_url` when given, otherwise
    /// under the endpoint itself.
    ///
    /// # Errors
    ///
    /// Returns [`DetectError::Config`] if no endpoint is configured or the
    /// HTTP client cannot be built.
    pub fn new(
        endpoint: Option<&str>,
        public_base_url: Option<&str>,
        keep_local: bool,
        timeout: Duration,
    ) -> Result<Self, DetectError> {
        let endpoint = endpoint
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| DetectError::config("storage endpoint is not configured"))?;
        if !is_url(endpoint) {
            return Err(DetectError::config(format!(
                "storage endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        let client = build_client(timeout).map_err(|e| DetectError::config(format!("{e:#}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            keep_local,
        })
    }
}

impl ArtifactUploader for HttpArtifactUploader {
    fn upload(&self, path: &Path) -> Result<String, DetectError> {
        let bytes = std::fs::read(path)
            .map_err(|e| DetectError::inference(format!("cannot read {}: {e}", path.display())))?;
        let object = format!("{}.png", Uuid::new_v4());
        let target = format!("{}/{object}", self.endpoint);

        let response = self
            .client
            .put(&target)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(bytes)
            .send()
            .map_err(|e| DetectError::inference(format!("upload to {target} failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::inference(format!(
                "upload to {target} returned {status}"
            )));
        }

        let base = self.public_base_url.as_deref().unwrap_or(&self.endpoint);
        let url = format!("{base}/{object}");
        info!("Uploaded {} to {url}", path.display());

        if !self.keep_local {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {e}", path.display());
            }
        }
        Ok(url)
    }
}
