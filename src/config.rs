use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Feed download and storage settings
    #[serde(default)]
    pub feed: FeedConfig,
    /// Background refresh settings
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Allowed CORS origins. Ignored when cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (default: true, the API serves public
    /// read-only data)
    #[serde(default = "Config::default_cors_permissive")]
    pub cors_permissive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed: FeedConfig::default(),
            refresh: RefreshConfig::default(),
            server: ServerConfig::default(),
            cors_origins: Vec::new(),
            cors_permissive: Self::default_cors_permissive(),
        }
    }
}

/// Where the national feed comes from and where its artifacts live
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Feed archive URL (default: the OVapi national GTFS feed)
    #[serde(default = "FeedConfig::default_url")]
    pub url: String,
    /// User-Agent sent with feed requests, so the publisher can reach us
    #[serde(default = "FeedConfig::default_contact")]
    pub contact: String,
    /// Directory holding the archive, store and metadata files (default: ./data)
    #[serde(default = "FeedConfig::default_data_dir")]
    pub data_dir: PathBuf,
    /// Seconds a downloaded archive stays fresh (default: 86400)
    #[serde(default = "FeedConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// IANA timezone the feed's clock times are in (default: Europe/Amsterdam)
    #[serde(default = "FeedConfig::default_timezone")]
    pub timezone: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            contact: Self::default_contact(),
            data_dir: Self::default_data_dir(),
            cache_ttl_secs: Self::default_cache_ttl_secs(),
            timezone: Self::default_timezone(),
        }
    }
}

impl FeedConfig {
    fn default_url() -> String {
        "http://gtfs.ovapi.nl/nl/gtfs-nl.zip".to_string()
    }
    fn default_contact() -> String {
        "nextride-api/0.1 (+contact: ops@nextride.example)".to_string()
    }
    fn default_data_dir() -> PathBuf {
        PathBuf::from("./data")
    }
    fn default_cache_ttl_secs() -> u64 {
        86_400
    }
    fn default_timezone() -> String {
        "Europe/Amsterdam".to_string()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn parsed_timezone(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse()
            .map_err(|_| ConfigError::TimezoneError(self.timezone.clone()))
    }
}

/// Background refresh of the feed archive and schedule store
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    /// Whether the background refresh task runs at all (default: true)
    #[serde(default = "RefreshConfig::default_enabled")]
    pub enabled: bool,
    /// Seconds between staleness checks (default: 3600)
    #[serde(default = "RefreshConfig::default_check_interval_secs")]
    pub check_interval_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            check_interval_secs: Self::default_check_interval_secs(),
        }
    }
}

impl RefreshConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_check_interval_secs() -> u64 {
        3600
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP server binds (default: 0.0.0.0:3000)
    #[serde(default = "ServerConfig::default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
        }
    }
}

impl ServerConfig {
    fn default_listen_addr() -> String {
        "0.0.0.0:3000".to_string()
    }
}

impl Config {
    fn default_cors_permissive() -> bool {
        true
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
    #[error("Unknown timezone: {0}")]
    TimezoneError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_a_missing_config_file() {
        let config = Config::default();
        assert_eq!(config.feed.url, "http://gtfs.ovapi.nl/nl/gtfs-nl.zip");
        assert_eq!(config.feed.cache_ttl(), Duration::from_secs(86_400));
        assert!(config.cors_permissive);
        assert!(config.refresh.enabled);
        config.feed.parsed_timezone().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults_for_missing_keys() {
        let config: Config = serde_yaml::from_str(
            "feed:\n  url: https://example.test/feed.zip\nrefresh:\n  check_interval_secs: 60\n",
        )
        .unwrap();
        assert_eq!(config.feed.url, "https://example.test/feed.zip");
        assert_eq!(config.feed.timezone, "Europe/Amsterdam");
        assert_eq!(config.refresh.check_interval_secs, 60);
        assert!(config.refresh.enabled);
        assert_eq!(config.server.listen_addr, "0.0.0.0:3000");
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let feed = FeedConfig {
            timezone: "Mars/Olympus".into(),
            ..FeedConfig::default()
        };
        let err = feed.parsed_timezone().unwrap_err();
        assert!(err.to_string().contains("Mars/Olympus"));
    }
}
