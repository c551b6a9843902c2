use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use ring::digest::{digest, SHA256};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::storage::{Form, RecordKind};
use crate::AppState;

/// The authenticated caller of a `/v1` route.
#[derive(Debug, Clone)]
pub struct Caller {
    /// Owner tag used for every store check. Empty when the service runs
    /// without API keys.
    pub context: String,
    /// Set when the caller presented a form id as a one-time upload key.
    pub form: Option<Form>,
}

impl Caller {
    fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            form: None,
        }
    }

    /// Form keys only grant uploads; everything else needs a real API key.
    pub fn require_api_key(&self) -> Result<(), ApiError> {
        if self.form.is_some() {
            return Err(ApiError::forbidden("Form keys can only be used to upload"));
        }
        Ok(())
    }
}

fn bearer_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Resolve an API key (or its absence) into a caller context.
pub fn resolve_caller(state: &AppState, key: Option<&str>) -> Result<Caller, ApiError> {
    let Some(key) = key else {
        if state.config.is_public() {
            return Ok(Caller::with_context(""));
        }
        return Err(ApiError::forbidden("Missing API key"));
    };

    // A live form id doubles as a one-time upload key.
    if uuid::Uuid::parse_str(key).is_ok() {
        let form = state
            .db
            .get("", key, RecordKind::Form)
            .map_err(|e| ApiError::from_db(RecordKind::Form, e))?
            .and_then(|r| r.into_form());
        if let Some(form) = form {
            tracing::debug!(form_id = %form.id, "Authenticated with form key");
            return Ok(Caller {
                context: form.context.clone(),
                form: Some(form),
            });
        }
    }

    let presented = digest(&SHA256, key.as_bytes());
    let matched = state
        .config
        .api_contexts
        .iter()
        .find(|c| digest(&SHA256, c.key.as_bytes()).as_ref() == presented.as_ref());

    match matched {
        Some(ctx) => Ok(Caller::with_context(ctx.context.clone())),
        None if state.config.is_public() => Ok(Caller::with_context("")),
        None => Err(ApiError::forbidden("Invalid API key")),
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        resolve_caller(state, bearer_key(&parts.headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiContext;
    use crate::storage::Record;
    use crate::testutil::{test_state, test_state_with};

    #[test]
    fn public_mode_accepts_anyone() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        assert_eq!(resolve_caller(&state, None).unwrap().context, "");
        assert_eq!(resolve_caller(&state, Some("whatever")).unwrap().context, "");
    }

    #[test]
    fn api_keys_map_to_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state_with(&dir, |config| {
            config.api_contexts = vec![ApiContext {
                context: "support".to_string(),
                key: "s3cret".to_string(),
            }];
        });

        assert_eq!(
            resolve_caller(&state, Some("s3cret")).unwrap().context,
            "support"
        );
        assert!(resolve_caller(&state, Some("wrong")).is_err());
        assert!(resolve_caller(&state, None).is_err());
    }

    #[test]
    fn form_id_is_an_upload_only_key() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state_with(&dir, |config| {
            config.api_contexts = vec![ApiContext {
                context: "support".to_string(),
                key: "s3cret".to_string(),
            }];
        });

        let form = Form {
            id: uuid::Uuid::new_v4().to_string(),
            expire: "asap".to_string(),
            created: chrono::Utc::now(),
            context: "support".to_string(),
            description: None,
            notify: None,
        };
        state.db.insert(&Record::Form(form.clone())).unwrap();

        let caller = resolve_caller(&state, Some(form.id.as_str())).unwrap();
        assert_eq!(caller.context, "support");
        assert_eq!(caller.form.as_ref().map(|f| f.id.as_str()), Some(form.id.as_str()));
        assert!(caller.require_api_key().is_err());
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_key(&headers), None);

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_key(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_key(&headers), None);
    }
}
