//! Request handlers.

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::Json;
use fakescope_core::{DetectionReport, SourceImage};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::AppState;
use crate::detect::detect;

/// Multipart field carrying the image.
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub input_size: u32,
    pub stats_loaded: bool,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub image_url: String,
}

/// `GET /`: liveness and model summary.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "fakescope is running",
        version: env!("CARGO_PKG_VERSION"),
        input_size: state.engine.input_size(),
        stats_loaded: state.engine.stats().is_some(),
    })
}

/// `POST /predict`: fetch `image_url` and run the engine.
pub async fn predict_url(
    State(state): State<AppState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<DetectionReport>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let url = request.image_url.trim().to_string();
    if url.is_empty() || !state.fetcher.handles(&url) {
        return Err(ApiError::InvalidInput(
            "image_url must be an http(s) URL".to_string(),
        ));
    }

    let report = tokio::task::spawn_blocking(move || {
        let image = state.fetcher.fetch(&url)?;
        detect(&state.engine, &url, &image, state.uploader.as_deref())
    })
    .await??;
    Ok(Json(report))
}

/// `POST /predict/upload`: run the engine on an uploaded file.
pub async fn predict_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionReport>, ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::InvalidInput(e.body_text()))?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        if field.name() == Some(FILE_FIELD) {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::InvalidInput(format!("cannot read upload: {e}")))?;
            upload = Some((filename, bytes));
            break;
        }
    }
    let (filename, bytes) = upload
        .ok_or_else(|| ApiError::InvalidInput(format!("missing multipart field `{FILE_FIELD}`")))?;

    let report = tokio::task::spawn_blocking(move || {
        let image = SourceImage::decode(filename.as_str(), &bytes)?;
        detect(&state.engine, &filename, &image, state.uploader.as_deref())
    })
    .await??;
    Ok(Json(report))
}
