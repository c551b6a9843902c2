mod download;
mod forms;
mod status;
mod uploads;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use serde::Deserialize;

use crate::api::response::ApiError;
use crate::lifecycle::Delivery;
use crate::storage::RecordKind;

pub use download::{download, download_named};
pub use forms::{
    create_form, delete_form, describe_form, form_page, list_forms, modify_form, FormPageResponse,
    FormResponse,
};
pub use status::health;
pub use uploads::{
    create_upload, delete_upload, describe_upload, fetch_upload_file, list_uploads,
    modify_upload, UploadResponse,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Only records owned by exactly this context
    #[serde(default)]
    pub filter: Option<String>,
    /// Regex matched against expire, created, file and description
    #[serde(default)]
    pub query: Option<String>,
}

fn compile_query(query: Option<&str>) -> Result<Option<Regex>, ApiError> {
    match query.filter(|q| !q.is_empty()) {
        Some(q) => Regex::new(q)
            .map(Some)
            .map_err(|e| ApiError::bad_request(format!("Invalid query regex: {e}"))),
        None => Ok(None),
    }
}

/// Ids are UUIDs; anything else cannot exist and is rejected up front.
fn parse_id(raw: &str, kind: RecordKind) -> Result<String, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(|u| u.to_string())
        .map_err(|_| ApiError::no_such(kind))
}

fn download_response(delivery: &Delivery) -> Response {
    let file = &delivery.upload.file;
    let mut response = (StatusCode::OK, delivery.data.clone()).into_response();
    let headers = response.headers_mut();

    let mime = mime_guess::from_path(file).first_or_octet_stream();
    headers.insert(
        header::CONTENT_TYPE,
        mime.as_ref()
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );

    if let Ok(value) = format!("attachment; filename=\"{file}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Content may vanish at any moment; never let intermediaries keep it
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    response
}
