use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    Router::new()
        // Uploads
        .route(
            "/v1/uploads",
            post(handlers::create_upload)
                .layer(DefaultBodyLimit::max(upload_limit))
                .get(handlers::list_uploads),
        )
        .route(
            "/v1/uploads/:id",
            get(handlers::describe_upload)
                .put(handlers::modify_upload)
                .delete(handlers::delete_upload),
        )
        .route("/v1/uploads/:id/file", get(handlers::fetch_upload_file))
        // Forms
        .route(
            "/v1/forms",
            post(handlers::create_form).get(handlers::list_forms),
        )
        .route(
            "/v1/forms/:id",
            get(handlers::describe_form)
                .put(handlers::modify_form)
                .delete(handlers::delete_form),
        )
        // Public links
        .route("/form/:id", get(handlers::form_page))
        .route("/download/:id", get(handlers::download))
        .route("/download/:id/:file", get(handlers::download_named))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
