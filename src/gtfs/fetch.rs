//! Conditional download of the static GTFS archive.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::error::GtfsError;
use super::metadata::{FeedMetadata, MAX_TOKEN_LENGTH};
use super::FeedPaths;

/// Retries allowed after 429 responses before giving up.
const MAX_FETCH_RETRIES: u32 = 3;
/// Hard timeout for a single download request.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
/// Log download progress every this many bytes.
const PROGRESS_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// A new archive was written to disk.
    Downloaded,
    /// Upstream copy unchanged; the cached archive stays as-is.
    NotModified,
}

/// Delay before the n-th retry (0-based): 5, 10, then 15 minutes.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(u64::from(attempt + 1) * 300)
}

/// Download the feed archive unless the upstream copy is unchanged.
///
/// Sends `If-None-Match`/`If-Modified-Since` from the sidecar metadata when
/// tokens are known. A 304 refreshes the sidecar timestamp and leaves the
/// archive untouched; 429 is retried with escalating backoff; any other
/// failure status is fatal. The body is streamed to disk chunk by chunk.
pub async fn fetch_archive(
    client: &reqwest::Client,
    url: &str,
    paths: &FeedPaths,
) -> Result<FetchOutcome, GtfsError> {
    let metadata = FeedMetadata::load(&paths.metadata).await;

    let mut attempt: u32 = 0;
    loop {
        let mut request = client.get(url).timeout(DOWNLOAD_TIMEOUT);
        if let Some(etag) = &metadata.etag {
            request = request.header("If-None-Match", etag);
        }
        if let Some(last_modified) = &metadata.last_modified {
            request = request.header("If-Modified-Since", last_modified);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_MODIFIED {
            info!("Feed not modified upstream, keeping cached archive");
            let refreshed = FeedMetadata {
                downloaded_at: Some(Utc::now()),
                ..metadata.clone()
            };
            refreshed.save(&paths.metadata).await?;
            return Ok(FetchOutcome::NotModified);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if attempt >= MAX_FETCH_RETRIES {
                return Err(GtfsError::RetriesExhausted(attempt));
            }
            let delay = backoff_delay(attempt);
            warn!(
                attempt = attempt + 1,
                wait_secs = delay.as_secs(),
                "Feed server rate limited the download, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            continue;
        }

        if !status.is_success() {
            return Err(GtfsError::HttpStatus(status.as_u16()));
        }

        let etag = header_token(&response, "etag");
        let last_modified = header_token(&response, "last-modified");

        if let Err(e) = stream_to_file(response, &paths.archive).await {
            let _ = tokio::fs::remove_file(&paths.archive).await;
            return Err(e);
        }

        let metadata = FeedMetadata {
            downloaded_at: Some(Utc::now()),
            etag,
            last_modified,
        };
        metadata.save(&paths.metadata).await?;
        return Ok(FetchOutcome::Downloaded);
    }
}

fn header_token(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|s| s.len() <= MAX_TOKEN_LENGTH)
        .map(|s| s.to_string())
}

async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<(), GtfsError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut total_bytes: u64 = 0;
    let mut progress_mark: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total_bytes += chunk.len() as u64;
        if total_bytes / PROGRESS_BYTES > progress_mark {
            progress_mark = total_bytes / PROGRESS_BYTES;
            info!(size_mb = total_bytes / (1024 * 1024), "Downloading feed archive");
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    info!(size_mb = total_bytes / (1024 * 1024), "Downloaded feed archive");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gtfs::FeedPaths;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn backoff_escalates_in_five_minute_steps() {
        assert_eq!(backoff_delay(0), Duration::from_secs(5 * 60));
        assert_eq!(backoff_delay(1), Duration::from_secs(10 * 60));
        assert_eq!(backoff_delay(2), Duration::from_secs(15 * 60));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/gtfs.zip")
    }

    #[tokio::test]
    async fn download_writes_archive_and_revalidation_tokens() {
        let app = Router::new().route(
            "/gtfs.zip",
            get(|| async { (StatusCode::OK, [(header::ETAG, "\"v1\"")], "feedbytes") }),
        );
        let url = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let paths = FeedPaths::new(dir.path());

        let outcome = fetch_archive(&reqwest::Client::new(), &url, &paths)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::Downloaded);
        assert_eq!(std::fs::read_to_string(&paths.archive).unwrap(), "feedbytes");
        let metadata = FeedMetadata::load(&paths.metadata).await;
        assert_eq!(metadata.etag.as_deref(), Some("\"v1\""));
        assert!(metadata.downloaded_at.is_some());
    }

    #[tokio::test]
    async fn unchanged_upstream_keeps_the_cached_archive() {
        let hits = Arc::new(AtomicU32::new(0));
        let seen = hits.clone();
        let app = Router::new().route(
            "/gtfs.zip",
            get(move |headers: HeaderMap| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if headers.get(header::IF_NONE_MATCH).is_some() {
                        StatusCode::NOT_MODIFIED.into_response()
                    } else {
                        (StatusCode::OK, [(header::ETAG, "\"v1\"")], "newbytes").into_response()
                    }
                }
            }),
        );
        let url = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let paths = FeedPaths::new(dir.path());
        std::fs::write(&paths.archive, "cachedbytes").unwrap();
        let stale_time = Utc::now() - chrono::Duration::hours(30);
        FeedMetadata {
            downloaded_at: Some(stale_time),
            etag: Some("\"v1\"".into()),
            last_modified: None,
        }
        .save(&paths.metadata)
        .await
        .unwrap();

        let outcome = fetch_archive(&reqwest::Client::new(), &url, &paths)
            .await
            .unwrap();
        assert_eq!(outcome, FetchOutcome::NotModified);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            std::fs::read_to_string(&paths.archive).unwrap(),
            "cachedbytes"
        );
        // The sidecar timestamp moves forward so the next staleness check passes
        let metadata = FeedMetadata::load(&paths.metadata).await;
        assert!(metadata.downloaded_at.unwrap() > stale_time);
        assert_eq!(metadata.etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn failure_status_is_fatal_and_writes_nothing() {
        let app = Router::new().route(
            "/gtfs.zip",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let url = serve(app).await;
        let dir = tempfile::tempdir().unwrap();
        let paths = FeedPaths::new(dir.path());

        let err = fetch_archive(&reqwest::Client::new(), &url, &paths)
            .await
            .unwrap_err();
        assert!(matches!(err, GtfsError::HttpStatus(500)), "got {err:?}");
        assert!(!paths.archive.exists());
    }
}
