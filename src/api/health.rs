use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::gtfs::{GtfsService, StoreStatistics};

const SERVICE_NAME: &str = "NextRide API";

#[derive(Clone)]
pub struct HealthState {
    pub service: Arc<GtfsService>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" once a schedule store is loaded, "unhealthy" before that
    pub status: String,
    /// Present only while unhealthy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Server time of this probe, RFC 3339
    pub timestamp: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EndpointGuide {
    pub search: String,
    pub nearby: String,
    pub departures: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ServiceInfo {
    /// Service name
    pub service: String,
    /// "operational" once a schedule store is loaded, "unavailable" before
    pub status: String,
    /// Crate version
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Example requests, present once operational
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<EndpointGuide>,
    /// Store row counts and coverage, present once operational
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StoreStatistics>,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Schedule store is loaded", body = HealthResponse),
        (status = 503, description = "Schedule store not loaded yet", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    if state.service.store_ready().await {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                reason: None,
                timestamp: Utc::now().to_rfc3339(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
                reason: Some("Schedule store not loaded".to_string()),
                timestamp: Utc::now().to_rfc3339(),
            }),
        )
    }
}

/// Service name, version, endpoint guide and store statistics
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service info with store statistics", body = ServiceInfo),
        (status = 503, description = "Schedule store not loaded yet", body = ServiceInfo)
    ),
    tag = "health"
)]
pub async fn service_info(State(state): State<HealthState>) -> (StatusCode, Json<ServiceInfo>) {
    let Some(stats) = state.service.statistics().await else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ServiceInfo {
                service: SERVICE_NAME.to_string(),
                status: "unavailable".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                message: Some("Schedule data not loaded yet".to_string()),
                endpoints: None,
                stats: None,
            }),
        );
    };
    (
        StatusCode::OK,
        Json(ServiceInfo {
            service: SERVICE_NAME.to_string(),
            status: "operational".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            message: None,
            endpoints: Some(EndpointGuide {
                search: "/api/stops/search?query=Haarlem".to_string(),
                nearby: "/api/stops/nearby?lat=52.38&lon=4.63&radius=1000".to_string(),
                departures: "/api/stops/{stop_code}/departures".to_string(),
            }),
            stats: Some(stats),
        }),
    )
}

pub fn router(service: Arc<GtfsService>) -> Router {
    let state = HealthState { service };
    Router::new()
        .route("/", get(health_check))
        .with_state(state)
}

pub fn root_router(service: Arc<GtfsService>) -> Router {
    let state = HealthState { service };
    Router::new()
        .route("/", get(service_info))
        .with_state(state)
}
