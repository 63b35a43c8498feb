use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({
                    "error": "unauthorized",
                    "detail": "Invalid or missing X-API-Key header",
                }),
            ),
            AppError::ValidationFailed(detail) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation_failed", "detail": detail }),
            ),
            AppError::MissingField(field) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": format!("Missing or invalid '{}' field", field) }),
            ),
            AppError::NotFound(what) => {
                (StatusCode::NOT_FOUND, json!({ "error": what }))
            }
            AppError::Upstream(e) => {
                (StatusCode::BAD_GATEWAY, json!({ "error": e }))
            }
            AppError::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal_server_error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
