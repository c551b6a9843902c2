use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use super::uploads::validate_expire;
use super::{compile_query, parse_id, ListParams};
use crate::api::auth::Caller;
use crate::api::response::{ApiError, AppJson, AppQuery, JSend};
use crate::expiry::ASAP;
use crate::storage::{Form, Patch, Record, RecordKind, RecordUpdate};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct FormResponse {
    pub context: String,
    pub created: String,
    pub description: Option<String>,
    pub expire: String,
    pub id: String,
    pub notify: Option<String>,
    pub url: String,
}

/// What a recipient of a form link needs to upload with it. Owner and
/// notification address stay private.
#[derive(Debug, Serialize, Deserialize)]
pub struct FormPageResponse {
    pub description: Option<String>,
    pub expire: String,
    pub id: String,
    pub upload_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateFormRequest {
    #[serde(default)]
    pub expire: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notify: Option<String>,
}

/// Partial update. `null` clears `description` or `notify`; a missing
/// field leaves it alone.
#[derive(Debug, Default, Deserialize)]
pub struct ModifyFormRequest {
    #[serde(default)]
    pub expire: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub notify: Option<Option<String>>,
}

fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: DeserializeOwned,
    D: Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppJson(req): AppJson<CreateFormRequest>,
) -> Result<Json<JSend<FormResponse>>, ApiError> {
    caller.require_api_key()?;

    let expire = match req.expire.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => {
            validate_expire(e)?;
            e.to_string()
        }
        _ => ASAP.to_string(),
    };

    let form = Form {
        id: uuid::Uuid::new_v4().to_string(),
        expire,
        created: Utc::now(),
        context: caller.context,
        description: req.description.filter(|d| !d.is_empty()),
        notify: req.notify.filter(|n| !n.is_empty()),
    };

    let db = state.db.clone();
    let record = Record::Form(form.clone());
    state
        .tasks
        .spawn("insert form", form.id.clone(), async move { db.insert(&record) });

    tracing::info!(
        form_id = %form.id,
        expire = %form.expire,
        context = %form.context,
        "Created form"
    );

    Ok(JSend::success(form_to_response(
        &form,
        &state.config.node.public_url,
    )))
}

pub async fn list_forms(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<ListParams>,
) -> Result<Json<JSend<Vec<FormResponse>>>, ApiError> {
    caller.require_api_key()?;
    let query = compile_query(params.query.as_deref())?;

    let records = state
        .db
        .list(
            &caller.context,
            params.filter.as_deref().unwrap_or(""),
            query.as_ref(),
            RecordKind::Form,
        )
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?;

    Ok(JSend::success(
        records
            .into_iter()
            .filter_map(Record::into_form)
            .map(|f| form_to_response(&f, &state.config.node.public_url))
            .collect(),
    ))
}

pub async fn describe_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<FormResponse>>, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Form)?;

    let form = state
        .db
        .get(&caller.context, &id, RecordKind::Form)
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?
        .and_then(Record::into_form)
        .ok_or_else(|| ApiError::no_such(RecordKind::Form))?;

    Ok(JSend::success(form_to_response(
        &form,
        &state.config.node.public_url,
    )))
}

pub async fn modify_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
    AppJson(req): AppJson<ModifyFormRequest>,
) -> Result<Json<JSend<FormResponse>>, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Form)?;

    if let Some(ref expire) = req.expire {
        validate_expire(expire)?;
    }

    let update = RecordUpdate {
        expire: req.expire,
        description: Patch::from(req.description),
        notify: Patch::from(req.notify),
    };
    if update.is_empty() {
        return Err(ApiError::bad_request("Nothing to update"));
    }

    let form = state
        .db
        .modify(&caller.context, &id, RecordKind::Form, &update)
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?
        .into_form()
        .ok_or_else(|| ApiError::internal("Form changed kind during update"))?;

    tracing::debug!(form_id = %id, "Modified form");
    Ok(JSend::success(form_to_response(
        &form,
        &state.config.node.public_url,
    )))
}

pub async fn delete_form(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<JSend<()>>, ApiError> {
    caller.require_api_key()?;
    let id = parse_id(&id, RecordKind::Form)?;

    state
        .db
        .get(&caller.context, &id, RecordKind::Form)
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?
        .ok_or_else(|| ApiError::no_such(RecordKind::Form))?;

    state
        .db
        .delete(&caller.context, &id)
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?;

    tracing::debug!(form_id = %id, "Deleted form");
    Ok(JSend::success(()))
}

/// Public landing point of a form link. The form id is the credential, so
/// anyone holding the link may see it while it is live.
pub async fn form_page(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<JSend<FormPageResponse>>, ApiError> {
    let id = parse_id(&id, RecordKind::Form)?;

    let form = state
        .db
        .get("", &id, RecordKind::Form)
        .map_err(|e| ApiError::from_db(RecordKind::Form, e))?
        .and_then(Record::into_form)
        .ok_or_else(|| ApiError::no_such(RecordKind::Form))?;

    Ok(JSend::success(FormPageResponse {
        description: form.description,
        expire: form.expire,
        id: form.id,
        upload_url: format!(
            "{}/v1/uploads",
            state.config.node.public_url.trim_end_matches('/')
        ),
    }))
}

pub fn form_to_response(form: &Form, public_url: &str) -> FormResponse {
    FormResponse {
        context: form.context.clone(),
        created: form.created.to_rfc3339(),
        description: form.description.clone(),
        expire: form.expire.clone(),
        id: form.id.clone(),
        notify: form.notify.clone(),
        url: form.url(public_url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modify_request_distinguishes_null_from_missing() {
        let req: ModifyFormRequest =
            serde_json::from_str(r#"{"description": null, "expire": "2d"}"#).unwrap();
        assert_eq!(req.expire.as_deref(), Some("2d"));
        assert_eq!(Patch::from(req.description), Patch::Null);
        assert_eq!(Patch::from(req.notify), Patch::<String>::Absent);

        let req: ModifyFormRequest = serde_json::from_str(r#"{"notify": "a@b.c"}"#).unwrap();
        assert_eq!(Patch::from(req.notify), Patch::Value("a@b.c".to_string()));
    }
}
