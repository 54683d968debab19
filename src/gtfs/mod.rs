//! GTFS schedule engine.
//!
//! [`GtfsService`] ties the pieces together: it downloads the national feed
//! archive when it has gone stale, rebuilds the SQLite store from it, and
//! answers departure, search and nearby queries against whichever store is
//! currently swapped in.

pub mod error;
pub mod fetch;
pub mod geo;
pub mod import;
pub mod metadata;
pub mod store;
pub mod types;

pub use error::GtfsError;
pub use types::{Departure, NearbyStop, StopMatch, StoreHandle, StoreStatistics};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

use crate::config::Config;
use fetch::FetchOutcome;
use metadata::FeedMetadata;
use store::ScheduleStore;

/// Locations of the feed artifacts inside the data directory.
#[derive(Debug, Clone)]
pub struct FeedPaths {
    pub data_dir: PathBuf,
    pub archive: PathBuf,
    pub database: PathBuf,
    pub metadata: PathBuf,
}

impl FeedPaths {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            archive: data_dir.join("gtfs.zip"),
            database: data_dir.join("gtfs.db"),
            metadata: data_dir.join("gtfs-metadata.txt"),
        }
    }
}

/// What a refresh pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Archive and store were already fresh.
    Current,
    /// A new store was built and swapped in.
    Rebuilt,
}

/// Schedule engine shared across request handlers and the refresh task.
pub struct GtfsService {
    client: reqwest::Client,
    config: Config,
    timezone: Tz,
    paths: FeedPaths,
    store: StoreHandle,
    refresh_lock: Mutex<()>,
}

impl GtfsService {
    pub fn new(config: Config, timezone: Tz) -> Result<Self, GtfsError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.feed.contact)
            .build()?;
        let paths = FeedPaths::new(&config.feed.data_dir);
        Ok(Self {
            client,
            timezone,
            paths,
            store: Arc::new(RwLock::new(None)),
            refresh_lock: Mutex::new(()),
            config,
        })
    }

    /// Bring the archive and the store up to date. Downloads only when the
    /// archive is older than the cache lifetime, rebuilds only when the
    /// archive is newer than the store, and swaps a finished store in
    /// behind current readers. Concurrent calls serialize.
    pub async fn refresh_if_stale(&self) -> Result<RefreshOutcome, GtfsError> {
        let _guard = self.refresh_lock.lock().await;
        tokio::fs::create_dir_all(&self.paths.data_dir).await?;

        let feed_metadata = FeedMetadata::load(&self.paths.metadata).await;
        let max_age = self.config.feed.cache_ttl();
        if metadata::archive_is_stale(&self.paths.archive, &feed_metadata, max_age) {
            match fetch::fetch_archive(&self.client, &self.config.feed.url, &self.paths).await? {
                FetchOutcome::Downloaded => info!("Feed archive downloaded"),
                FetchOutcome::NotModified => info!("Feed archive unchanged upstream"),
            }
        }

        if metadata::store_is_stale(&self.paths.archive, &self.paths.database) {
            import::build_store(&self.paths.archive, &self.paths.database).await?;
            let fresh = ScheduleStore::open(&self.paths.database).await?;
            *self.store.write().await = Some(fresh);
            return Ok(RefreshOutcome::Rebuilt);
        }

        self.ensure_store_open().await?;
        Ok(RefreshOutcome::Current)
    }

    /// Open the store from disk when none is loaded yet, as after a restart
    /// with a current archive already in place.
    async fn ensure_store_open(&self) -> Result<(), GtfsError> {
        if self.store.read().await.is_some() {
            return Ok(());
        }
        if !self.paths.database.exists() {
            return Ok(());
        }
        let store = ScheduleStore::open(&self.paths.database).await?;
        *self.store.write().await = Some(store);
        Ok(())
    }

    /// Whether a schedule store is open and queryable.
    pub async fn store_ready(&self) -> bool {
        self.store.read().await.is_some()
    }

    /// Upcoming departures for a stop code, with "now" taken in the feed
    /// timezone.
    pub async fn departures(
        &self,
        stop_code: &str,
        limit: usize,
    ) -> Result<Vec<Departure>, GtfsError> {
        let (service_date, clock) = current_service_time(&self.timezone);
        let guard = self.store.read().await;
        let store = guard.as_ref().ok_or(GtfsError::StoreNotReady)?;
        Ok(store
            .departures_at(stop_code, &clock, &service_date, limit)
            .await?)
    }

    pub async fn search_stops(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<StopMatch>, GtfsError> {
        let guard = self.store.read().await;
        let store = guard.as_ref().ok_or(GtfsError::StoreNotReady)?;
        Ok(store.search_stops(query, limit).await?)
    }

    pub async fn stops_near(
        &self,
        lat: f64,
        lon: f64,
        radius_meters: f64,
        limit: usize,
    ) -> Result<Vec<NearbyStop>, GtfsError> {
        let guard = self.store.read().await;
        let store = guard.as_ref().ok_or(GtfsError::StoreNotReady)?;
        Ok(store.stops_near(lat, lon, radius_meters, limit).await?)
    }

    /// Store statistics, or `None` while no store is loaded.
    pub async fn statistics(&self) -> Option<StoreStatistics> {
        match self.store.read().await.as_ref() {
            Some(store) => Some(store.statistics().await),
            None => None,
        }
    }

    /// Periodic refresh driver, meant to run as a background task.
    pub async fn run_refresh_loop(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.refresh.check_interval_secs);
        loop {
            match self.refresh_if_stale().await {
                Ok(RefreshOutcome::Rebuilt) => info!("Schedule store refreshed"),
                Ok(RefreshOutcome::Current) => {}
                Err(e) => error!(error = %e, "Feed refresh failed"),
            }
            tokio::time::sleep(interval).await;
        }
    }
}

/// Service date (YYYYMMDD) and wall clock (HH:MM:SS) for "now" in the given
/// timezone.
pub fn current_service_time(timezone: &Tz) -> (String, String) {
    let now = Utc::now().with_timezone(timezone);
    (
        now.format("%Y%m%d").to_string(),
        now.format("%H:%M:%S").to_string(),
    )
}
