use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::{bad_request, service_error, ErrorResponse};
use crate::gtfs::{GtfsService, NearbyStop, StopMatch};

const QUERY_MIN_CHARS: usize = 2;
const QUERY_MAX_CHARS: usize = 100;
const LIMIT_DEFAULT: usize = 20;
const LIMIT_MAX: usize = 100;
const RADIUS_DEFAULT_METERS: u32 = 1000;
const RADIUS_MIN_METERS: u32 = 100;
const RADIUS_MAX_METERS: u32 = 10_000;

#[derive(Clone)]
pub struct StopsState {
    pub service: Arc<GtfsService>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchParams {
    /// Text to match against stop names, case-insensitive
    pub query: String,
    /// Maximum number of results (default 20, at most 100)
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NearbyParams {
    /// Latitude of the search center in decimal degrees
    pub lat: f64,
    /// Longitude of the search center in decimal degrees
    pub lon: f64,
    /// Search radius in meters (default 1000, between 100 and 10000)
    pub radius: Option<u32>,
    /// Maximum number of results (default 20, at most 100)
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// Echo of the search text
    pub query: String,
    /// Number of results returned
    pub count: usize,
    pub stops: Vec<StopMatch>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NearbyResponse {
    /// Echo of the search center
    pub location: Location,
    /// Echo of the applied radius
    pub radius_meters: u32,
    /// Number of results returned
    pub count: usize,
    pub stops: Vec<NearbyStop>,
}

/// Search stops by name
#[utoipa::path(
    get,
    path = "/api/stops/search",
    params(SearchParams),
    responses(
        (status = 200, description = "Stops whose name contains the query, prefix matches first", body = SearchResponse),
        (status = 400, description = "Invalid search parameters", body = ErrorResponse),
        (status = 503, description = "Schedule data not ready", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn search_stops(
    State(state): State<StopsState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ErrorResponse>)> {
    let query = params.query.trim();
    let length = query.chars().count();
    if length < QUERY_MIN_CHARS {
        return Err(bad_request(format!(
            "Query must be at least {QUERY_MIN_CHARS} characters"
        )));
    }
    if length > QUERY_MAX_CHARS {
        return Err(bad_request(format!(
            "Query too long (max {QUERY_MAX_CHARS} characters)"
        )));
    }
    let limit = params.limit.unwrap_or(LIMIT_DEFAULT);
    if !(1..=LIMIT_MAX).contains(&limit) {
        return Err(bad_request(format!("Limit must be between 1 and {LIMIT_MAX}")));
    }

    let stops = state
        .service
        .search_stops(query, limit)
        .await
        .map_err(service_error)?;
    Ok(Json(SearchResponse {
        query: query.to_string(),
        count: stops.len(),
        stops,
    }))
}

/// Find stops around a coordinate
#[utoipa::path(
    get,
    path = "/api/stops/nearby",
    params(NearbyParams),
    responses(
        (status = 200, description = "Stops within the radius, nearest first", body = NearbyResponse),
        (status = 400, description = "Invalid search parameters", body = ErrorResponse),
        (status = 503, description = "Schedule data not ready", body = ErrorResponse)
    ),
    tag = "stops"
)]
pub async fn nearby_stops(
    State(state): State<StopsState>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<NearbyResponse>, (StatusCode, Json<ErrorResponse>)> {
    if !(-90.0..=90.0).contains(&params.lat) {
        return Err(bad_request("Latitude must be between -90 and 90"));
    }
    if !(-180.0..=180.0).contains(&params.lon) {
        return Err(bad_request("Longitude must be between -180 and 180"));
    }
    let radius = params.radius.unwrap_or(RADIUS_DEFAULT_METERS);
    if !(RADIUS_MIN_METERS..=RADIUS_MAX_METERS).contains(&radius) {
        return Err(bad_request(format!(
            "Radius must be between {RADIUS_MIN_METERS} and {RADIUS_MAX_METERS} meters"
        )));
    }
    let limit = params.limit.unwrap_or(LIMIT_DEFAULT);
    if !(1..=LIMIT_MAX).contains(&limit) {
        return Err(bad_request(format!("Limit must be between 1 and {LIMIT_MAX}")));
    }

    let stops = state
        .service
        .stops_near(params.lat, params.lon, radius as f64, limit)
        .await
        .map_err(service_error)?;
    Ok(Json(NearbyResponse {
        location: Location {
            lat: params.lat,
            lon: params.lon,
        },
        radius_meters: radius,
        count: stops.len(),
        stops,
    }))
}

pub fn router(service: Arc<GtfsService>) -> Router {
    let state = StopsState { service };
    Router::new()
        .route("/search", get(search_stops))
        .route("/nearby", get(nearby_stops))
        .with_state(state)
}
