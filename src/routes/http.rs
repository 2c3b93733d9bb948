// GET handlers: healthz, version

use axum::{http::header, response::IntoResponse};

use crate::version::{NAME, VERSION};

const HEALTH_BODY: &str = r#"{"status":"ok"}"#;

/// GET /healthz: fixed liveness body.
pub(super) async fn health_handler() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], HEALTH_BODY)
}

/// GET /version: service name and version from build metadata.
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}
