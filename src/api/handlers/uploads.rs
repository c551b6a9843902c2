use std::sync::{Arc, LazyLock};

use axum::extract::{Multipart, Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{compile_query, download_response, parse_id, ListParams};
use crate::api::auth::Caller;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::expiry::{self, ASAP};
use crate::lifecycle::FetchError;
use crate::storage::{Form, Record, RecordKind, RecordUpdate, Upload};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub context: String,
    pub created: String,
    pub expire: String,
    pub file: String,
    pub id: String,
    pub members: Vec<String>,
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct ModifyUploadRequest {
    pub expire: String,
}

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\-.]").expect("filename pattern is valid"));

// ============================================================================
// Handlers
// ============================================================================

/// Accepts `upload[]` file parts and an optional `expire` field. Several
/// files are zipped into one archive.
pub async fn create_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    let claimed = claim_form(&state, caller.form.as_ref())?;
    let id = uuid::Uuid::new_v4().to_string();
    let mut members: Vec<String> = Vec::new();
    let mut expire: Option<String> = None;

    let received = async {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
        {
            let part = field.name().unwrap_or("").to_string();
            match part.as_str() {
                "upload[]" | "upload" => {
                    let name = sanitize_filename(field.file_name().unwrap_or(""));
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

                    if data.len() as u64 > state.config.max_upload_size {
                        return Err(ApiError::payload_too_large(format!(
                            "File exceeds maximum upload size of {} bytes",
                            state.config.max_upload_size
                        )));
                    }

                    state
                        .artifacts
                        .put(&id, &name, data)
                        .await
                        .map_err(|e| ApiError::internal(format!("Could not store file: {e}")))?;

                    tracing::debug!(upload_id = %id, file = %name, "Received file");
                    if !members.contains(&name) {
                        members.push(name);
                    }
                }
                "expire" => {
                    expire = Some(field.text().await.map_err(|e| {
                        ApiError::bad_request(format!("Invalid expire: {e}"))
                    })?);
                }
                _ => {
                    // Ignore unknown fields
                }
            }
        }
        Ok::<(), ApiError>(())
    }
    .await;

    let file = match received.and_then(|()| finish_members(&members, expire.as_deref())) {
        Ok(()) if members.len() == 1 => members[0].clone(),
        Ok(()) => {
            let archive = format!("{}data.zip", Utc::now().format("%Y-%m-%d-%H-%M-"));
            match state.artifacts.archive(&id, &members, &archive).await {
                Ok(()) => archive,
                Err(e) => {
                    discard(&state, &id, claimed).await;
                    return Err(ApiError::internal(format!("Could not archive files: {e}")));
                }
            }
        }
        Err(e) => {
            discard(&state, &id, claimed).await;
            return Err(e);
        }
    };

    let upload = Upload {
        id: id.clone(),
        expire: expire
            .filter(|e| !e.trim().is_empty())
            .map(|e| e.trim().to_string())
            .unwrap_or_else(|| ASAP.to_string()),
        file,
        members,
        created: Utc::now(),
        context: caller.context.clone(),
    };

    if upload.members.len() > 1 {
        let artifacts = Arc::clone(&state.artifacts);
        let members = upload.members.clone();
        let upload_id = id.clone();
        state.tasks.spawn("remove archived members", &*id, async move {
            for member in &members {
                artifacts.remove(&upload_id, member).await?;
            }
            Ok::<(), crate::artifacts::ArtifactError>(())
        });
    }

    let db = state.db.clone();
    let record = Record::Upload(upload.clone());
    state
        .tasks
        .spawn("insert upload", &*id, async move { db.insert(&record) });

    tracing::info!(
        upload_id = %id,
        file = %upload.file,
        expire = %upload.expire,
        context = %upload.context,
        "Created upload"
    );

    Ok(JSend::success(upload_to_response(
        &upload,
        &state.config.node.public_url,
    )))
}

pub async fn list_uploads(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<JSend<Vec<UploadResponse>>>, ApiError> {
    caller.require_api_key()?;
    let query = compile_query(params.query.as_deref())?;

    let records = state
        .db
        .list(
            &caller.context,
            params.filter.as_deref().unwrap_or(""),
            query.as_ref(),
            RecordKind::Upload,
        )
        .map_err(|e| ApiError::from_db(RecordKind::Upload, e))?;

    Ok(JSend::success(
        records
            .into_iter()
            .filter_map(Record::into_upload)
            .map(|u| upload_to_response(&u, &state.config.node.public_url))
            .collect(),
    ))
}

pub async fn describe_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Upload)?;

    let upload = state
        .db
        .get(&caller.context, &id, RecordKind::Upload)
        .map_err(|e| ApiError::from_db(RecordKind::Upload, e))?
        .and_then(Record::into_upload)
        .ok_or_else(|| ApiError::no_such(RecordKind::Upload))?;

    Ok(JSend::success(upload_to_response(
        &upload,
        &state.config.node.public_url,
    )))
}

pub async fn modify_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    AppJson(req): AppJson<ModifyUploadRequest>,
) -> Result<Json<JSend<UploadResponse>>, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Upload)?;
    validate_expire(&req.expire)?;

    let update = RecordUpdate {
        expire: Some(req.expire),
        ..Default::default()
    };
    let upload = state
        .db
        .modify(&caller.context, &id, RecordKind::Upload, &update)
        .map_err(|e| ApiError::from_db(RecordKind::Upload, e))?
        .into_upload()
        .ok_or_else(|| ApiError::internal("Upload changed kind during update"))?;

    tracing::debug!(upload_id = %id, expire = %upload.expire, "Modified upload");
    Ok(JSend::success(upload_to_response(
        &upload,
        &state.config.node.public_url,
    )))
}

pub async fn delete_upload(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Upload)?;

    state
        .db
        .get(&caller.context, &id, RecordKind::Upload)
        .map_err(|e| ApiError::from_db(RecordKind::Upload, e))?
        .ok_or_else(|| ApiError::no_such(RecordKind::Upload))?;

    state
        .db
        .delete(&caller.context, &id)
        .map_err(|e| ApiError::from_db(RecordKind::Upload, e))?;

    // Phase 2: directory removal does not hold up the response
    let artifacts = Arc::clone(&state.artifacts);
    let upload_id = id.clone();
    state.tasks.spawn("remove upload directory", &*id, async move {
        artifacts.remove_dir(&upload_id).await
    });

    tracing::debug!(upload_id = %id, "Deleted upload");
    Ok(JSend::success(()))
}

/// Authenticated download. Never triggers delete-after-download.
pub async fn fetch_upload_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Upload)?;

    let delivery = state
        .reaper
        .fetch(&caller.context, &id)
        .await
        .map_err(fetch_error)?;

    Ok(download_response(&delivery))
}

// ============================================================================
// Helpers
// ============================================================================

pub(super) fn fetch_error(e: FetchError) -> ApiError {
    match e {
        FetchError::NotFound => ApiError::no_such(RecordKind::Upload),
        FetchError::Database(e) => ApiError::from_db(RecordKind::Upload, e),
        FetchError::Artifact(e) => {
            tracing::error!(error = %e, "Failed to read upload file");
            ApiError::internal("Failed to retrieve file")
        }
    }
}

pub(super) fn validate_expire(expire: &str) -> Result<(), ApiError> {
    if expiry::is_valid_expire(expire) {
        Ok(())
    } else {
        Err(ApiError::bad_request(
            "expire must be 'asap' or a duration like '1d', '2h30m'",
        ))
    }
}

fn finish_members(members: &[String], expire: Option<&str>) -> Result<(), ApiError> {
    if members.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }
    match expire.map(str::trim) {
        Some(e) if !e.is_empty() => validate_expire(e),
        _ => Ok(()),
    }
}

/// Take a one-time form out of the store before anything is written, so
/// only one upload can ever be made with it. Returns the claimed form.
fn claim_form(state: &AppState, form: Option<&Form>) -> Result<Option<Form>, ApiError> {
    let Some(form) = form.filter(|f| f.expire == ASAP) else {
        return Ok(None);
    };

    let removed = state
        .db
        .remove(RecordKind::Form, &form.id)
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?;
    if !removed {
        return Err(ApiError::forbidden("Form has already been used"));
    }

    tracing::debug!(form_id = %form.id, "Claimed one-time form");
    Ok(Some(form.clone()))
}

/// Undo a rejected upload: drop its files and give back a claimed form.
async fn discard(state: &AppState, id: &str, claimed: Option<Form>) {
    if let Err(e) = state.artifacts.remove_dir(id).await {
        tracing::warn!(upload_id = %id, error = %e, "Failed to remove rejected upload");
    }
    if let Some(form) = claimed {
        if state.db.insert(&Record::Form(form.clone())).is_ok() {
            tracing::debug!(form_id = %form.id, "Returned one-time form after failed upload");
        }
    }
}

/// Base name of a client-supplied filename with unsafe characters removed.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(base, "");
    if cleaned.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        cleaned.into_owned()
    }
}

pub fn upload_to_response(upload: &Upload, public_url: &str) -> UploadResponse {
    UploadResponse {
        context: upload.context.clone(),
        created: upload.created.to_rfc3339(),
        expire: upload.expire.clone(),
        file: upload.file.clone(),
        id: upload.id.clone(),
        members: upload.members.clone(),
        url: upload.url(public_url),
    }
}
