use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::gtfs::GtfsError;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable description of what went wrong
    pub error: String,
}

pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn not_found(message: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map an engine failure onto a response status. A store that has not been
/// built yet is a temporary condition, everything else is a server fault.
pub fn service_error(err: GtfsError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        GtfsError::StoreNotReady => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "GTFS data not loaded".to_string(),
            }),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: format!("Internal error: {}", other),
            }),
        ),
    }
}
