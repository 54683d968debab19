pub mod departures;
pub mod error;
pub mod health;
pub mod stops;

pub use error::{bad_request, not_found, service_error, ErrorResponse};

use std::sync::Arc;

use axum::Router;

use crate::gtfs::GtfsService;

pub fn router(service: Arc<GtfsService>) -> Router {
    Router::new()
        .nest(
            "/stops",
            stops::router(service.clone()).merge(departures::router(service.clone())),
        )
        .nest("/health", health::router(service))
}
