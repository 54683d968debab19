//! Streaming ETL from the feed archive into the SQLite schedule store.
//!
//! The zip/csv side runs on a blocking task and hands fixed-size row batches
//! to the async writer over a bounded channel, so memory use stays flat no
//! matter how large the feed is. The writer bulk-inserts each batch inside
//! its own transaction. Everything goes into a staging file that is renamed
//! over the live store only after the indexes exist, so readers never see a
//! partial schema.

use std::path::{Path, PathBuf};

use sqlx::query_builder::Separated;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::error::GtfsError;

/// Rows per batch handed from the parser to the writer.
const BATCH_ROWS: usize = 50_000;
/// Batches allowed in flight between parser and writer.
const CHANNEL_DEPTH: usize = 4;
/// Bind parameters per INSERT statement, kept under SQLite's 32766 limit.
const MAX_BIND_PARAMS: usize = 32_000;

/// Tabular files every feed archive must contain.
const REQUIRED_FILES: &[&str] = &[
    "stops.txt",
    "routes.txt",
    "trips.txt",
    "stop_times.txt",
    "calendar_dates.txt",
];

const SCHEMA: &[&str] = &[
    "CREATE TABLE stops (stop_id TEXT PRIMARY KEY, stop_code TEXT, stop_name TEXT, \
     stop_lat REAL, stop_lon REAL, zone_id TEXT, stop_url TEXT)",
    "CREATE TABLE routes (route_id TEXT PRIMARY KEY, route_short_name TEXT, \
     route_long_name TEXT, route_type INTEGER, route_color TEXT)",
    "CREATE TABLE trips (trip_id TEXT PRIMARY KEY, route_id TEXT, service_id TEXT, \
     trip_headsign TEXT, trip_short_name TEXT, direction_id INTEGER)",
    "CREATE TABLE stop_times (trip_id TEXT, arrival_time TEXT, departure_time TEXT, \
     stop_id TEXT, stop_sequence INTEGER)",
    "CREATE TABLE calendar_dates (service_id TEXT, date TEXT, exception_type INTEGER)",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX idx_stop_code ON stops (stop_code)",
    "CREATE INDEX idx_stop_name ON stops (stop_name)",
    "CREATE INDEX idx_stop_times_stop_id ON stop_times (stop_id)",
    "CREATE INDEX idx_stop_times_departure ON stop_times (departure_time)",
    "CREATE INDEX idx_stop_times_trip_id ON stop_times (trip_id)",
    "CREATE INDEX idx_trips_service_id ON trips (service_id)",
    "CREATE INDEX idx_trips_route_id ON trips (route_id)",
    "CREATE INDEX idx_calendar_dates_lookup ON calendar_dates (service_id, date)",
];

#[derive(Debug)]
struct StopRow {
    stop_id: String,
    stop_code: String,
    stop_name: String,
    stop_lat: f64,
    stop_lon: f64,
    zone_id: String,
    stop_url: String,
}

#[derive(Debug)]
struct RouteRow {
    route_id: String,
    route_short_name: String,
    route_long_name: String,
    route_type: i64,
    route_color: String,
}

#[derive(Debug)]
struct TripRow {
    trip_id: String,
    route_id: String,
    service_id: String,
    trip_headsign: String,
    trip_short_name: String,
    direction_id: i64,
}

#[derive(Debug)]
struct StopTimeRow {
    trip_id: String,
    arrival_time: String,
    departure_time: String,
    stop_id: String,
    stop_sequence: i64,
}

#[derive(Debug)]
struct ServiceDateRow {
    service_id: String,
    date: String,
    exception_type: i64,
}

enum RowBatch {
    Stops(Vec<StopRow>),
    Routes(Vec<RouteRow>),
    Trips(Vec<TripRow>),
    StopTimes(Vec<StopTimeRow>),
    ServiceDates(Vec<ServiceDateRow>),
}

/// Row counts for a completed build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub stops: u64,
    pub routes: u64,
    pub trips: u64,
    pub stop_times: u64,
    pub service_dates: u64,
}

/// Build a fresh schedule store from the archive, replacing `database`
/// atomically. On any failure the staging file is removed and an existing
/// store stays untouched and servable.
pub async fn build_store(archive: &Path, database: &Path) -> Result<BuildSummary, GtfsError> {
    let staging = staging_path(database);
    // A staging file left behind by an interrupted build
    let _ = tokio::fs::remove_file(&staging).await;

    info!(archive = %archive.display(), "Building schedule store");

    let options = SqliteConnectOptions::new()
        .filename(&staging)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Memory)
        .synchronous(SqliteSynchronous::Off);
    let mut conn = SqliteConnection::connect_with(&options).await?;

    match import_archive(&mut conn, archive).await {
        Ok(summary) => {
            conn.close().await?;
            tokio::fs::rename(&staging, database).await?;
            info!(
                stops = summary.stops,
                routes = summary.routes,
                trips = summary.trips,
                stop_times = summary.stop_times,
                service_dates = summary.service_dates,
                "Schedule store built"
            );
            Ok(summary)
        }
        Err(e) => {
            let _ = conn.close().await;
            let _ = tokio::fs::remove_file(&staging).await;
            Err(e)
        }
    }
}

fn staging_path(database: &Path) -> PathBuf {
    let mut staging = database.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}

async fn import_archive(
    conn: &mut SqliteConnection,
    archive: &Path,
) -> Result<BuildSummary, GtfsError> {
    create_schema(conn).await?;

    let (tx, mut rx) = mpsc::channel::<RowBatch>(CHANNEL_DEPTH);
    let archive = archive.to_path_buf();
    let parser = tokio::task::spawn_blocking(move || read_archive(&archive, tx));

    let mut summary = BuildSummary::default();
    while let Some(batch) = rx.recv().await {
        if let Err(e) = write_batch(conn, &mut summary, batch).await {
            // Closing the channel unblocks the parser on its next send.
            drop(rx);
            let _ = parser.await;
            return Err(e);
        }
    }
    parser.await??;

    create_indexes(conn).await?;
    Ok(summary)
}

pub(crate) async fn create_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn create_indexes(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    for statement in INDEXES {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

async fn write_batch(
    conn: &mut SqliteConnection,
    summary: &mut BuildSummary,
    batch: RowBatch,
) -> Result<(), GtfsError> {
    let stop_times_progress = matches!(batch, RowBatch::StopTimes(_));
    let mut txn = conn.begin().await?;
    match batch {
        RowBatch::Stops(rows) => {
            summary.stops += rows.len() as u64;
            insert_rows(
                &mut txn,
                "INSERT INTO stops (stop_id, stop_code, stop_name, stop_lat, stop_lon, \
                 zone_id, stop_url) ",
                7,
                &rows,
                |b, row| {
                    b.push_bind(&row.stop_id)
                        .push_bind(&row.stop_code)
                        .push_bind(&row.stop_name)
                        .push_bind(row.stop_lat)
                        .push_bind(row.stop_lon)
                        .push_bind(&row.zone_id)
                        .push_bind(&row.stop_url);
                },
            )
            .await?;
        }
        RowBatch::Routes(rows) => {
            summary.routes += rows.len() as u64;
            insert_rows(
                &mut txn,
                "INSERT INTO routes (route_id, route_short_name, route_long_name, \
                 route_type, route_color) ",
                5,
                &rows,
                |b, row| {
                    b.push_bind(&row.route_id)
                        .push_bind(&row.route_short_name)
                        .push_bind(&row.route_long_name)
                        .push_bind(row.route_type)
                        .push_bind(&row.route_color);
                },
            )
            .await?;
        }
        RowBatch::Trips(rows) => {
            summary.trips += rows.len() as u64;
            insert_rows(
                &mut txn,
                "INSERT INTO trips (trip_id, route_id, service_id, trip_headsign, \
                 trip_short_name, direction_id) ",
                6,
                &rows,
                |b, row| {
                    b.push_bind(&row.trip_id)
                        .push_bind(&row.route_id)
                        .push_bind(&row.service_id)
                        .push_bind(&row.trip_headsign)
                        .push_bind(&row.trip_short_name)
                        .push_bind(row.direction_id);
                },
            )
            .await?;
        }
        RowBatch::StopTimes(rows) => {
            summary.stop_times += rows.len() as u64;
            insert_rows(
                &mut txn,
                "INSERT INTO stop_times (trip_id, arrival_time, departure_time, \
                 stop_id, stop_sequence) ",
                5,
                &rows,
                |b, row| {
                    b.push_bind(&row.trip_id)
                        .push_bind(&row.arrival_time)
                        .push_bind(&row.departure_time)
                        .push_bind(&row.stop_id)
                        .push_bind(row.stop_sequence);
                },
            )
            .await?;
        }
        RowBatch::ServiceDates(rows) => {
            summary.service_dates += rows.len() as u64;
            insert_rows(
                &mut txn,
                "INSERT INTO calendar_dates (service_id, date, exception_type) ",
                3,
                &rows,
                |b, row| {
                    b.push_bind(&row.service_id)
                        .push_bind(&row.date)
                        .push_bind(row.exception_type);
                },
            )
            .await?;
        }
    }
    txn.commit().await?;
    if stop_times_progress {
        info!(rows = summary.stop_times, "Loading stop_times");
    }
    Ok(())
}

async fn insert_rows<'r, T>(
    txn: &mut sqlx::Transaction<'_, Sqlite>,
    insert_prefix: &str,
    columns: usize,
    rows: &'r [T],
    mut bind: impl FnMut(&mut Separated<'_, 'r, Sqlite, &'static str>, &'r T),
) -> Result<(), sqlx::Error> {
    for chunk in rows.chunks(MAX_BIND_PARAMS / columns) {
        let mut builder: QueryBuilder<'r, Sqlite> = QueryBuilder::new(insert_prefix);
        builder.push_values(chunk, |mut b, row| bind(&mut b, row));
        builder.build().execute(&mut **txn).await?;
    }
    Ok(())
}

// --- Blocking side: zip + csv ---

fn read_archive(path: &Path, tx: mpsc::Sender<RowBatch>) -> Result<(), GtfsError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for name in REQUIRED_FILES {
        if archive.by_name(name).is_err() {
            return Err(GtfsError::ParseError(format!(
                "feed archive is missing {name}"
            )));
        }
    }

    read_stops(&mut archive, &tx)?;
    read_routes(&mut archive, &tx)?;
    read_trips(&mut archive, &tx)?;
    read_stop_times(&mut archive, &tx)?;
    read_service_dates(&mut archive, &tx)?;
    Ok(())
}

fn send(tx: &mpsc::Sender<RowBatch>, batch: RowBatch) -> Result<(), GtfsError> {
    tx.blocking_send(batch).map_err(|_| GtfsError::BuildInterrupted)
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn required_column(
    headers: &csv::StringRecord,
    file: &str,
    name: &str,
) -> Result<usize, GtfsError> {
    column(headers, name)
        .ok_or_else(|| GtfsError::ParseError(format!("{file} missing {name}")))
}

fn field<'r>(record: &'r csv::StringRecord, index: Option<usize>) -> &'r str {
    index.and_then(|i| record.get(i)).unwrap_or("")
}

/// Numeric column value: absent or empty means 0, unparsable content is a
/// hard build failure.
fn parse_f64(
    record: &csv::StringRecord,
    index: Option<usize>,
    file: &str,
    name: &str,
) -> Result<f64, GtfsError> {
    let raw = field(record, index).trim();
    if raw.is_empty() {
        return Ok(0.0);
    }
    raw.parse()
        .map_err(|_| GtfsError::ParseError(format!("{file} has invalid {name} value {raw:?}")))
}

fn parse_i64(
    record: &csv::StringRecord,
    index: Option<usize>,
    file: &str,
    name: &str,
) -> Result<i64, GtfsError> {
    let raw = field(record, index).trim();
    if raw.is_empty() {
        return Ok(0);
    }
    raw.parse()
        .map_err(|_| GtfsError::ParseError(format!("{file} has invalid {name} value {raw:?}")))
}

fn read_stops(
    archive: &mut zip::ZipArchive<std::fs::File>,
    tx: &mpsc::Sender<RowBatch>,
) -> Result<(), GtfsError> {
    info!("Parsing stops.txt");
    let file = archive.by_name("stops.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "stops.txt", "stop_id")?;
    let idx_code = column(&headers, "stop_code");
    let idx_name = column(&headers, "stop_name");
    let idx_lat = column(&headers, "stop_lat");
    let idx_lon = column(&headers, "stop_lon");
    let idx_zone = column(&headers, "zone_id");
    let idx_url = column(&headers, "stop_url");

    let mut batch = Vec::with_capacity(BATCH_ROWS);
    let mut count = 0u64;
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let stop_id = record.get(idx_id).unwrap_or("");
        if stop_id.is_empty() {
            skipped += 1;
            continue;
        }
        batch.push(StopRow {
            stop_id: stop_id.to_string(),
            // The public lookup surface is case-insensitive
            stop_code: field(&record, idx_code).trim().to_lowercase(),
            stop_name: field(&record, idx_name).to_string(),
            stop_lat: parse_f64(&record, idx_lat, "stops.txt", "stop_lat")?,
            stop_lon: parse_f64(&record, idx_lon, "stops.txt", "stop_lon")?,
            zone_id: field(&record, idx_zone).to_string(),
            stop_url: field(&record, idx_url).to_string(),
        });
        count += 1;
        if batch.len() == BATCH_ROWS {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_ROWS));
            send(tx, RowBatch::Stops(full))?;
        }
    }
    if !batch.is_empty() {
        send(tx, RowBatch::Stops(batch))?;
    }
    if skipped > 0 {
        warn!(skipped, "Skipped stops.txt records with empty stop_id");
    }
    info!(count, "Parsed stops.txt");
    Ok(())
}

fn read_routes(
    archive: &mut zip::ZipArchive<std::fs::File>,
    tx: &mpsc::Sender<RowBatch>,
) -> Result<(), GtfsError> {
    info!("Parsing routes.txt");
    let file = archive.by_name("routes.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "routes.txt", "route_id")?;
    let idx_short = column(&headers, "route_short_name");
    let idx_long = column(&headers, "route_long_name");
    let idx_type = column(&headers, "route_type");
    let idx_color = column(&headers, "route_color");

    let mut batch = Vec::with_capacity(BATCH_ROWS);
    let mut count = 0u64;
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let route_id = record.get(idx_id).unwrap_or("");
        if route_id.is_empty() {
            skipped += 1;
            continue;
        }
        batch.push(RouteRow {
            route_id: route_id.to_string(),
            route_short_name: field(&record, idx_short).to_string(),
            route_long_name: field(&record, idx_long).to_string(),
            route_type: parse_i64(&record, idx_type, "routes.txt", "route_type")?,
            route_color: field(&record, idx_color).to_string(),
        });
        count += 1;
        if batch.len() == BATCH_ROWS {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_ROWS));
            send(tx, RowBatch::Routes(full))?;
        }
    }
    if !batch.is_empty() {
        send(tx, RowBatch::Routes(batch))?;
    }
    if skipped > 0 {
        warn!(skipped, "Skipped routes.txt records with empty route_id");
    }
    info!(count, "Parsed routes.txt");
    Ok(())
}

fn read_trips(
    archive: &mut zip::ZipArchive<std::fs::File>,
    tx: &mpsc::Sender<RowBatch>,
) -> Result<(), GtfsError> {
    info!("Parsing trips.txt");
    let file = archive.by_name("trips.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_id = required_column(&headers, "trips.txt", "trip_id")?;
    let idx_route = column(&headers, "route_id");
    let idx_service = column(&headers, "service_id");
    let idx_headsign = column(&headers, "trip_headsign");
    let idx_short = column(&headers, "trip_short_name");
    let idx_direction = column(&headers, "direction_id");

    let mut batch = Vec::with_capacity(BATCH_ROWS);
    let mut count = 0u64;
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_id).unwrap_or("");
        if trip_id.is_empty() {
            skipped += 1;
            continue;
        }
        batch.push(TripRow {
            trip_id: trip_id.to_string(),
            route_id: field(&record, idx_route).to_string(),
            service_id: field(&record, idx_service).to_string(),
            trip_headsign: field(&record, idx_headsign).to_string(),
            trip_short_name: field(&record, idx_short).to_string(),
            direction_id: parse_i64(&record, idx_direction, "trips.txt", "direction_id")?,
        });
        count += 1;
        if batch.len() == BATCH_ROWS {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_ROWS));
            send(tx, RowBatch::Trips(full))?;
        }
    }
    if !batch.is_empty() {
        send(tx, RowBatch::Trips(batch))?;
    }
    if skipped > 0 {
        warn!(skipped, "Skipped trips.txt records with empty trip_id");
    }
    info!(count, "Parsed trips.txt");
    Ok(())
}

fn read_stop_times(
    archive: &mut zip::ZipArchive<std::fs::File>,
    tx: &mpsc::Sender<RowBatch>,
) -> Result<(), GtfsError> {
    info!("Parsing stop_times.txt");
    let file = archive.by_name("stop_times.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_trip = required_column(&headers, "stop_times.txt", "trip_id")?;
    let idx_stop = required_column(&headers, "stop_times.txt", "stop_id")?;
    let idx_arrival = column(&headers, "arrival_time");
    let idx_departure = column(&headers, "departure_time");
    let idx_sequence = column(&headers, "stop_sequence");

    let mut batch = Vec::with_capacity(BATCH_ROWS);
    let mut count = 0u64;
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let trip_id = record.get(idx_trip).unwrap_or("");
        let stop_id = record.get(idx_stop).unwrap_or("");
        if trip_id.is_empty() || stop_id.is_empty() {
            skipped += 1;
            continue;
        }
        batch.push(StopTimeRow {
            trip_id: trip_id.to_string(),
            arrival_time: field(&record, idx_arrival).to_string(),
            departure_time: field(&record, idx_departure).to_string(),
            stop_id: stop_id.to_string(),
            stop_sequence: parse_i64(&record, idx_sequence, "stop_times.txt", "stop_sequence")?,
        });
        count += 1;
        if batch.len() == BATCH_ROWS {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_ROWS));
            send(tx, RowBatch::StopTimes(full))?;
        }
    }
    if !batch.is_empty() {
        send(tx, RowBatch::StopTimes(batch))?;
    }
    if skipped > 0 {
        warn!(
            skipped,
            "Skipped stop_times.txt records with empty trip_id or stop_id"
        );
    }
    info!(count, "Parsed stop_times.txt");
    Ok(())
}

fn read_service_dates(
    archive: &mut zip::ZipArchive<std::fs::File>,
    tx: &mpsc::Sender<RowBatch>,
) -> Result<(), GtfsError> {
    info!("Parsing calendar_dates.txt");
    let file = archive.by_name("calendar_dates.txt")?;
    let mut rdr = csv::Reader::from_reader(file);
    let headers = rdr.headers()?.clone();

    let idx_service = required_column(&headers, "calendar_dates.txt", "service_id")?;
    let idx_date = column(&headers, "date");
    let idx_exception = column(&headers, "exception_type");

    let mut batch = Vec::with_capacity(BATCH_ROWS);
    let mut count = 0u64;
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        let service_id = record.get(idx_service).unwrap_or("");
        if service_id.is_empty() {
            skipped += 1;
            continue;
        }
        batch.push(ServiceDateRow {
            service_id: service_id.to_string(),
            date: field(&record, idx_date).to_string(),
            exception_type: parse_i64(
                &record,
                idx_exception,
                "calendar_dates.txt",
                "exception_type",
            )?,
        });
        count += 1;
        if batch.len() == BATCH_ROWS {
            let full = std::mem::replace(&mut batch, Vec::with_capacity(BATCH_ROWS));
            send(tx, RowBatch::ServiceDates(full))?;
        }
    }
    if !batch.is_empty() {
        send(tx, RowBatch::ServiceDates(batch))?;
    }
    if skipped > 0 {
        warn!(
            skipped,
            "Skipped calendar_dates.txt records with empty service_id"
        );
    }
    info!(count, "Parsed calendar_dates.txt");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::store::ScheduleStore;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const STOPS: &str = "stop_id,stop_code,stop_name,stop_lat,stop_lon,zone_id,stop_url\n\
        s1, HLMCEN ,Haarlem Centraal,52.3808,4.6380,z1,\n\
        s2,hlmspw,Haarlem Spaarnwoude,52.3899,4.6740,z1,\n";
    const ROUTES: &str = "route_id,route_short_name,route_long_name,route_type,route_color\n\
        r1,2,Centraal - Schalkwijk,0,FF0000\n";
    const TRIPS: &str = "trip_id,route_id,service_id,trip_headsign,trip_short_name,direction_id\n\
        t1,r1,svc1,Schalkwijk,,0\n\
        t2,r1,svc1,Schalkwijk,,0\n";
    const STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
        t1,08:00:00,08:01:00,s1,1\n\
        t2,09:00:00,09:01:00,s1,1\n\
        t1,08:10:00,08:11:00,s2,2\n";
    const SERVICE_DATES: &str = "service_id,date,exception_type\n\
        svc1,20260824,1\n";

    fn write_archive(path: &Path, files: &[(&str, &str)]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in files {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn default_feed() -> Vec<(&'static str, &'static str)> {
        vec![
            ("stops.txt", STOPS),
            ("routes.txt", ROUTES),
            ("trips.txt", TRIPS),
            ("stop_times.txt", STOP_TIMES),
            ("calendar_dates.txt", SERVICE_DATES),
        ]
    }

    #[tokio::test]
    async fn build_creates_a_queryable_store() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        write_archive(&archive, &default_feed());

        let summary = build_store(&archive, &database).await.unwrap();
        assert_eq!(
            summary,
            BuildSummary {
                stops: 2,
                routes: 1,
                trips: 2,
                stop_times: 3,
                service_dates: 1,
            }
        );
        assert!(database.exists());
        assert!(!staging_path(&database).exists());

        let store = ScheduleStore::open(&database).await.unwrap();
        let stats = store.statistics().await;
        assert_eq!(stats.stops_count, 2);
        assert_eq!(stats.stops_with_schedule, 2);
        assert_eq!(stats.total_departures, 3);
        assert_eq!(stats.coverage_percent, 100.0);
    }

    #[tokio::test]
    async fn stop_codes_are_trimmed_and_lowercased() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        write_archive(&archive, &default_feed());
        build_store(&archive, &database).await.unwrap();

        let options = SqliteConnectOptions::new().filename(&database);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        let code: String = sqlx::query_scalar("SELECT stop_code FROM stops WHERE stop_id = 's1'")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(code, "hlmcen");
    }

    #[tokio::test]
    async fn missing_numeric_fields_default_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        let routes = "route_id,route_short_name,route_long_name,route_type,route_color\n\
            r1,2,No type given,,\n";
        let mut feed = default_feed();
        feed[1] = ("routes.txt", routes);
        write_archive(&archive, &feed);
        build_store(&archive, &database).await.unwrap();

        let options = SqliteConnectOptions::new().filename(&database);
        let mut conn = SqliteConnection::connect_with(&options).await.unwrap();
        let route_type: i64 =
            sqlx::query_scalar("SELECT route_type FROM routes WHERE route_id = 'r1'")
                .fetch_one(&mut conn)
                .await
                .unwrap();
        assert_eq!(route_type, 0);
    }

    #[tokio::test]
    async fn malformed_latitude_aborts_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        let stops = "stop_id,stop_code,stop_name,stop_lat,stop_lon,zone_id,stop_url\n\
            s1,code,Broken,not-a-number,4.6,z1,\n";
        let mut feed = default_feed();
        feed[0] = ("stops.txt", stops);
        write_archive(&archive, &feed);

        let err = build_store(&archive, &database).await.unwrap_err();
        assert!(matches!(err, GtfsError::ParseError(_)), "got {err:?}");
        assert!(err.to_string().contains("stop_lat"));
        assert!(!database.exists());
        assert!(!staging_path(&database).exists());
    }

    #[tokio::test]
    async fn build_failure_leaves_previous_store_servable() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        write_archive(&archive, &default_feed());
        build_store(&archive, &database).await.unwrap();

        let broken = "stop_id,stop_code,stop_name,stop_lat,stop_lon,zone_id,stop_url\n\
            s1,code,Broken,oops,4.6,z1,\n";
        let mut feed = default_feed();
        feed[0] = ("stops.txt", broken);
        write_archive(&archive, &feed);
        build_store(&archive, &database).await.unwrap_err();

        // The first build's store still answers queries
        let store = ScheduleStore::open(&database).await.unwrap();
        assert_eq!(store.statistics().await.stops_count, 2);
    }

    #[tokio::test]
    async fn missing_required_file_aborts_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        let feed: Vec<_> = default_feed()
            .into_iter()
            .filter(|(name, _)| *name != "calendar_dates.txt")
            .collect();
        write_archive(&archive, &feed);

        let err = build_store(&archive, &database).await.unwrap_err();
        assert!(err.to_string().contains("calendar_dates.txt"));
        assert!(!database.exists());
    }

    #[tokio::test]
    async fn rows_with_empty_identifiers_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        let stops = "stop_id,stop_code,stop_name,stop_lat,stop_lon,zone_id,stop_url\n\
            ,skip,No id,52.0,4.0,z1,\n\
            s1,keep,Has id,52.0,4.0,z1,\n";
        let mut feed = default_feed();
        feed[0] = ("stops.txt", stops);
        write_archive(&archive, &feed);

        let summary = build_store(&archive, &database).await.unwrap();
        assert_eq!(summary.stops, 1);
    }

    #[tokio::test]
    async fn rebuilding_from_the_same_archive_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        write_archive(&archive, &default_feed());

        let first = build_store(&archive, &database).await.unwrap();
        let first_stats = ScheduleStore::open(&database)
            .await
            .unwrap()
            .statistics()
            .await;
        let second = build_store(&archive, &database).await.unwrap();
        let second_stats = ScheduleStore::open(&database)
            .await
            .unwrap()
            .statistics()
            .await;

        assert_eq!(first, second);
        assert_eq!(first_stats.stops_count, second_stats.stops_count);
        assert_eq!(
            first_stats.total_departures,
            second_stats.total_departures
        );
        assert_eq!(
            first_stats.coverage_percent,
            second_stats.coverage_percent
        );
    }

    #[tokio::test]
    async fn rebuild_replaces_the_previous_store() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("gtfs.zip");
        let database = dir.path().join("gtfs.db");
        write_archive(&archive, &default_feed());
        build_store(&archive, &database).await.unwrap();

        let single_stop = "stop_id,stop_code,stop_name,stop_lat,stop_lon,zone_id,stop_url\n\
            s9,only,Only Stop,52.0,4.0,z1,\n";
        let mut feed = default_feed();
        feed[0] = ("stops.txt", single_stop);
        write_archive(&archive, &feed);
        build_store(&archive, &database).await.unwrap();

        let store = ScheduleStore::open(&database).await.unwrap();
        assert_eq!(store.statistics().await.stops_count, 1);
    }
}
