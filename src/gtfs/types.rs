//! Shared types for the GTFS schedule engine.

use serde::Serialize;
use sqlx::FromRow;
use std::sync::Arc;
use tokio::sync::RwLock;
use utoipa::ToSchema;

/// Transport mode derived from the GTFS `route_type` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitMode {
    Tram,
    Metro,
    Train,
    Bus,
    Ferry,
    CableCar,
    Gondola,
    Funicular,
    /// Catch-all for route type codes outside the standard enumeration
    Transit,
}

impl TransitMode {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => TransitMode::Tram,
            1 => TransitMode::Metro,
            2 => TransitMode::Train,
            3 => TransitMode::Bus,
            4 => TransitMode::Ferry,
            5 => TransitMode::CableCar,
            6 => TransitMode::Gondola,
            7 => TransitMode::Funicular,
            _ => TransitMode::Transit,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TransitMode::Tram => "Tram",
            TransitMode::Metro => "Metro",
            TransitMode::Train => "Train",
            TransitMode::Bus => "Bus",
            TransitMode::Ferry => "Ferry",
            TransitMode::CableCar => "Cable Car",
            TransitMode::Gondola => "Gondola",
            TransitMode::Funicular => "Funicular",
            TransitMode::Transit => "Transit",
        }
    }
}

/// A single upcoming departure from a stop.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Departure {
    /// Scheduled departure clock time, feed-local, may exceed 24:00:00
    pub departure_time: String,
    pub arrival_time: String,
    pub route_short_name: String,
    pub route_long_name: String,
    /// Human-readable mode label derived from the route type code
    pub mode: String,
    pub trip_headsign: String,
    pub trip_short_name: String,
    pub stop_name: String,
}

/// A stop returned by text search.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct StopMatch {
    pub stop_code: String,
    pub stop_name: String,
    #[serde(rename = "lat")]
    pub stop_lat: f64,
    #[serde(rename = "lon")]
    pub stop_lon: f64,
    /// Whether at least one scheduled stop time references this stop
    pub has_schedule: bool,
}

/// A stop returned by radius search, with its distance from the query point.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NearbyStop {
    pub stop_code: String,
    pub stop_name: String,
    #[serde(rename = "lat")]
    pub stop_lat: f64,
    #[serde(rename = "lon")]
    pub stop_lon: f64,
    /// Great-circle distance from the query point, rounded to the nearest meter
    pub distance_meters: u32,
    pub has_schedule: bool,
}

/// Aggregate counts over the built store.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct StoreStatistics {
    pub stops_count: i64,
    pub stops_with_schedule: i64,
    pub total_departures: i64,
    /// Share of stops with at least one scheduled time, percent, one decimal
    pub coverage_percent: f64,
}

/// Swappable handle to the currently serving schedule store.
///
/// A rebuild opens a fresh store and replaces the inner value wholesale;
/// readers either see the previous complete store or the new one.
pub type StoreHandle = Arc<RwLock<Option<crate::gtfs::store::ScheduleStore>>>;
