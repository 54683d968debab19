//! Read side of the schedule store.
//!
//! A [`ScheduleStore`] wraps a read-only SQLite pool over the file produced
//! by [`super::import::build_store`]. All queries run against the covering
//! indexes created at build time; nothing here scans tables row by row.

use std::collections::HashSet;
use std::path::Path;

use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::warn;

use super::geo::{bounding_box, haversine_distance};
use super::types::{Departure, NearbyStop, StopMatch, StoreStatistics, TransitMode};

/// Connections kept open against the store file.
const POOL_CONNECTIONS: u32 = 4;

const RESOLVE_STOP_SQL: &str =
    "SELECT stop_id, stop_name FROM stops WHERE stop_code = ? ORDER BY stop_id LIMIT 1";

const DEPARTURES_SQL: &str = "\
    SELECT DISTINCT st.departure_time, st.arrival_time, r.route_short_name, \
           r.route_long_name, r.route_type, t.trip_headsign, t.trip_short_name \
    FROM stop_times st \
    INNER JOIN trips t ON st.trip_id = t.trip_id \
    INNER JOIN routes r ON t.route_id = r.route_id \
    INNER JOIN calendar_dates cd ON t.service_id = cd.service_id \
    WHERE st.stop_id = ? \
      AND st.departure_time >= ? \
      AND cd.date = ? \
      AND cd.exception_type = 1 \
    ORDER BY st.departure_time";

const SEARCH_SQL: &str = "\
    SELECT s.stop_code, s.stop_name, s.stop_lat, s.stop_lon, \
           EXISTS(SELECT 1 FROM stop_times st WHERE st.stop_id = s.stop_id) AS has_schedule \
    FROM stops s \
    WHERE instr(lower(s.stop_name), ?) > 0 \
    ORDER BY instr(lower(s.stop_name), ?) <> 1, s.stop_name \
    LIMIT ?";

const NEARBY_SQL: &str = "\
    SELECT s.stop_code, s.stop_name, s.stop_lat, s.stop_lon, \
           EXISTS(SELECT 1 FROM stop_times st WHERE st.stop_id = s.stop_id) AS has_schedule \
    FROM stops s \
    WHERE s.stop_lat BETWEEN ? AND ? AND s.stop_lon BETWEEN ? AND ? \
    ORDER BY s.stop_name";

#[derive(sqlx::FromRow)]
struct DepartureRow {
    departure_time: String,
    arrival_time: String,
    route_short_name: String,
    route_long_name: String,
    route_type: i64,
    trip_headsign: String,
    trip_short_name: String,
}

/// Handle to one built schedule store file.
#[derive(Clone)]
pub struct ScheduleStore {
    pool: SqlitePool,
}

impl ScheduleStore {
    /// Open an existing store file read-only. Fails when the file does not
    /// exist or is not a SQLite database.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(POOL_CONNECTIONS)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Upcoming departures from the stop with the given code, on the given
    /// service date, at or after the given clock time.
    ///
    /// The code is matched case-insensitively; an unknown code yields an
    /// empty list. Results are deduplicated on departure time, route short
    /// name and headsign, sorted by departure time and cut to `limit`.
    /// Trips past midnight keep their over-24h clock values (`25:10:00`)
    /// and therefore stay visible late in the evening.
    pub async fn departures_at(
        &self,
        stop_code: &str,
        clock: &str,
        service_date: &str,
        limit: usize,
    ) -> Result<Vec<Departure>, sqlx::Error> {
        let code = stop_code.trim().to_lowercase();
        let resolved = sqlx::query_as::<_, (String, String)>(RESOLVE_STOP_SQL)
            .bind(&code)
            .fetch_optional(&self.pool)
            .await?;
        let Some((stop_id, stop_name)) = resolved else {
            return Ok(Vec::new());
        };

        let mut rows = sqlx::query_as::<_, DepartureRow>(DEPARTURES_SQL)
            .bind(&stop_id)
            .bind(clock)
            .bind(service_date)
            .fetch(&self.pool);

        let mut seen = HashSet::new();
        let mut departures = Vec::new();
        while departures.len() < limit {
            let Some(row) = rows.try_next().await? else {
                break;
            };
            let key = (
                row.departure_time.clone(),
                row.route_short_name.clone(),
                row.trip_headsign.clone(),
            );
            if !seen.insert(key) {
                continue;
            }
            let route_short_name = if row.route_short_name.is_empty() {
                "N/A".to_string()
            } else {
                row.route_short_name
            };
            let trip_headsign = if row.trip_headsign.is_empty() {
                "Unknown destination".to_string()
            } else {
                row.trip_headsign
            };
            departures.push(Departure {
                departure_time: row.departure_time,
                arrival_time: row.arrival_time,
                route_short_name,
                route_long_name: row.route_long_name,
                mode: TransitMode::from_code(row.route_type).label().to_string(),
                trip_headsign,
                trip_short_name: row.trip_short_name,
                stop_name: stop_name.clone(),
            });
        }
        Ok(departures)
    }

    /// Stops whose name contains the query, case-insensitively. Stops whose
    /// name starts with the query rank first, ties break alphabetically.
    pub async fn search_stops(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StopMatch>, sqlx::Error> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as(SEARCH_SQL)
            .bind(&needle)
            .bind(&needle)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
    }

    /// Stops within `radius_meters` of a point, nearest first. The bounding
    /// box narrows the candidate set in SQL, the exact great-circle distance
    /// decides membership.
    pub async fn stops_near(
        &self,
        lat: f64,
        lon: f64,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<NearbyStop>, sqlx::Error> {
        let bounds = bounding_box(lat, lon, radius_meters);
        let candidates: Vec<StopMatch> = sqlx::query_as(NEARBY_SQL)
            .bind(bounds.lat_min)
            .bind(bounds.lat_max)
            .bind(bounds.lon_min)
            .bind(bounds.lon_max)
            .fetch_all(&self.pool)
            .await?;

        let mut hits: Vec<(f64, StopMatch)> = candidates
            .into_iter()
            .filter_map(|stop| {
                let distance = haversine_distance(lat, lon, stop.stop_lat, stop.stop_lon);
                (distance <= radius_meters).then_some((distance, stop))
            })
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(limit);

        Ok(hits
            .into_iter()
            .map(|(distance, stop)| NearbyStop {
                stop_code: stop.stop_code,
                stop_name: stop.stop_name,
                stop_lat: stop.stop_lat,
                stop_lon: stop.stop_lon,
                has_schedule: stop.has_schedule,
                distance_meters: distance.round() as u32,
            })
            .collect())
    }

    /// Row counts and coverage for the store. Individual query failures are
    /// logged and reported as zero so a health probe never errors.
    pub async fn statistics(&self) -> StoreStatistics {
        let stops_count = self.count("SELECT COUNT(*) FROM stops").await;
        let stops_with_schedule = self
            .count("SELECT COUNT(DISTINCT stop_id) FROM stop_times")
            .await;
        let total_departures = self.count("SELECT COUNT(*) FROM stop_times").await;
        let coverage_percent = if stops_count > 0 {
            (stops_with_schedule as f64 / stops_count as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        StoreStatistics {
            stops_count,
            stops_with_schedule,
            total_departures,
            coverage_percent,
        }
    }

    async fn count(&self, sql: &str) -> i64 {
        match sqlx::query_scalar(sql).fetch_one(&self.pool).await {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Statistics query failed");
                0
            }
        }
    }
}
