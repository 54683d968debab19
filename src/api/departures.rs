use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::{bad_request, not_found, service_error, ErrorResponse};
use crate::gtfs::{Departure, GtfsService};

const LIMIT_DEFAULT: usize = 10;
const LIMIT_MAX: usize = 50;

#[derive(Clone)]
pub struct DeparturesState {
    pub service: Arc<GtfsService>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeparturesParams {
    /// Maximum number of departures (default 10, at most 50)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeparturesResponse {
    /// Normalized (lowercased) stop code
    pub stop_code: String,
    /// Server time of the lookup, RFC 3339
    pub timestamp: String,
    /// Number of departures returned
    pub count: usize,
    pub departures: Vec<Departure>,
    /// Data source reminder
    pub note: String,
}

/// Stop codes are short tokens of letters and digits; some regional feeds
/// also use underscores and hyphens in them.
fn valid_stop_code(code: &str) -> bool {
    let mut has_alphanumeric = false;
    for c in code.chars() {
        match c {
            '_' | '-' => {}
            c if c.is_alphanumeric() => has_alphanumeric = true,
            _ => return false,
        }
    }
    has_alphanumeric
}

/// Upcoming departures for a stop
#[utoipa::path(
    get,
    path = "/api/stops/{stop_code}/departures",
    params(
        ("stop_code" = String, Path, description = "Public stop code, matched case-insensitively"),
        DeparturesParams
    ),
    responses(
        (status = 200, description = "Departures sorted by departure time", body = DeparturesResponse),
        (status = 400, description = "Invalid stop code or limit", body = ErrorResponse),
        (status = 404, description = "Unknown stop or no departures left today", body = ErrorResponse),
        (status = 503, description = "Schedule data not ready", body = ErrorResponse)
    ),
    tag = "departures"
)]
pub async fn stop_departures(
    State(state): State<DeparturesState>,
    Path(stop_code): Path<String>,
    Query(params): Query<DeparturesParams>,
) -> Result<Json<DeparturesResponse>, (StatusCode, Json<ErrorResponse>)> {
    let code = stop_code.trim().to_lowercase();
    if !valid_stop_code(&code) {
        return Err(bad_request("Invalid stop code format"));
    }
    let limit = params.limit.unwrap_or(LIMIT_DEFAULT);
    if !(1..=LIMIT_MAX).contains(&limit) {
        return Err(bad_request(format!("Limit must be between 1 and {LIMIT_MAX}")));
    }

    let departures = state
        .service
        .departures(&code, limit)
        .await
        .map_err(service_error)?;
    if departures.is_empty() {
        return Err(not_found(format!(
            "No scheduled departures found for stop '{code}'"
        )));
    }
    Ok(Json(DeparturesResponse {
        stop_code: code,
        timestamp: Utc::now().to_rfc3339(),
        count: departures.len(),
        departures,
        note: "These are scheduled departures. Check OV API for real-time data.".to_string(),
    }))
}

pub fn router(service: Arc<GtfsService>) -> Router {
    let state = DeparturesState { service };
    Router::new()
        .route("/{stop_code}/departures", get(stop_departures))
        .with_state(state)
}
