//! Sidecar metadata for the downloaded feed archive, plus the staleness
//! checks that gate fetch and rebuild.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::debug;

use super::error::GtfsError;

/// Maximum length for cached HTTP header values (ETag, Last-Modified)
pub(super) const MAX_TOKEN_LENGTH: usize = 1024;

/// Revalidation tokens and download timestamp for the cached archive.
///
/// Stored next to the archive as human-readable `Key: value` lines:
///
/// ```text
/// Downloaded: 2026-08-24T06:00:00+00:00
/// ETag: "5f9a3b"
/// Last-Modified: Sun, 24 Aug 2026 03:14:07 GMT
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMetadata {
    pub downloaded_at: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl FeedMetadata {
    /// Parse the sidecar format. Unknown keys and malformed lines are
    /// ignored, so a corrupt file degrades to an empty record.
    pub fn parse(text: &str) -> Self {
        let mut metadata = FeedMetadata::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() || value.len() > MAX_TOKEN_LENGTH {
                continue;
            }
            match key.trim() {
                "Downloaded" => {
                    metadata.downloaded_at = DateTime::parse_from_rfc3339(value)
                        .ok()
                        .map(|t| t.with_timezone(&Utc));
                }
                "ETag" => metadata.etag = Some(value.to_string()),
                "Last-Modified" => metadata.last_modified = Some(value.to_string()),
                _ => {}
            }
        }
        metadata
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(downloaded_at) = &self.downloaded_at {
            out.push_str(&format!("Downloaded: {}\n", downloaded_at.to_rfc3339()));
        }
        if let Some(etag) = &self.etag {
            out.push_str(&format!("ETag: {etag}\n"));
        }
        if let Some(last_modified) = &self.last_modified {
            out.push_str(&format!("Last-Modified: {last_modified}\n"));
        }
        out
    }

    /// Load from disk; a missing or unreadable file yields an empty record.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No feed metadata to load");
                Self::default()
            }
        }
    }

    pub async fn save(&self, path: &Path) -> Result<(), GtfsError> {
        tokio::fs::write(path, self.render()).await?;
        Ok(())
    }
}

/// True when the archive is missing or its last successful download is
/// older than `max_age`.
///
/// The sidecar timestamp is authoritative; when absent (e.g. a hand-placed
/// archive) the file mtime stands in for it.
pub fn archive_is_stale(archive: &Path, metadata: &FeedMetadata, max_age: Duration) -> bool {
    if !archive.exists() {
        return true;
    }
    let age = match metadata.downloaded_at {
        Some(downloaded_at) => {
            match Utc::now().signed_duration_since(downloaded_at).to_std() {
                Ok(age) => age,
                // Timestamp in the future (clock skew): treat as fresh.
                Err(_) => return false,
            }
        }
        None => match file_age(archive) {
            Some(age) => age,
            None => return true,
        },
    };
    age > max_age
}

/// True when no store has been built yet, or the archive has been replaced
/// since the store was built. A missing archive never marks the store stale:
/// there is nothing to rebuild from.
pub fn store_is_stale(archive: &Path, database: &Path) -> bool {
    let Some(store_mtime) = mtime(database) else {
        return true;
    };
    match mtime(archive) {
        Some(archive_mtime) => archive_mtime > store_mtime,
        None => false,
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn file_age(path: &Path) -> Option<Duration> {
    mtime(path)?.elapsed().ok()
}
