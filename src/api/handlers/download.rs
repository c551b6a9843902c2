use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::Response;

use super::uploads::fetch_error;
use super::{download_response, parse_id};
use crate::api::response::ApiError;
use crate::storage::RecordKind;
use crate::AppState;

/// Public download link. An `asap` upload is gone once this returns.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    deliver(&state, &id).await
}

/// Same as [`download`]; the filename segment only exists for browsers.
pub async fn download_named(
    State(state): State<Arc<AppState>>,
    Path((id, _file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    deliver(&state, &id).await
}

async fn deliver(state: &AppState, id: &str) -> Result<Response, ApiError> {
    let id = parse_id(id, RecordKind::Upload)?;

    let delivery = state.reaper.fetch("", &id).await.map_err(fetch_error)?;
    let response = download_response(&delivery);

    tracing::info!(upload_id = %id, file = %delivery.upload.file, "Served download");
    state.reaper.delivered(&delivery.upload);

    Ok(response)
}
