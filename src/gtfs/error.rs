use thiserror::Error;

#[derive(Debug, Error)]
pub enum GtfsError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Feed request failed with HTTP status {0}")]
    HttpStatus(u16),
    #[error("Feed rate limited, gave up after {0} retries")]
    RetriesExhausted(u32),
    #[error("GTFS parse error: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),
    #[error("Store build was interrupted")]
    BuildInterrupted,
    #[error("Schedule store not ready")]
    StoreNotReady,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_http_status() {
        let err = GtfsError::HttpStatus(503);
        assert_eq!(err.to_string(), "Feed request failed with HTTP status 503");
    }

    #[test]
    fn error_display_retries_exhausted() {
        let err = GtfsError::RetriesExhausted(3);
        assert_eq!(err.to_string(), "Feed rate limited, gave up after 3 retries");
    }

    #[test]
    fn error_display_parse_error() {
        let err = GtfsError::ParseError("invalid latitude".into());
        assert_eq!(err.to_string(), "GTFS parse error: invalid latitude");
    }

    #[test]
    fn error_display_store_not_ready() {
        let err = GtfsError::StoreNotReady;
        assert_eq!(err.to_string(), "Schedule store not ready");
    }

    #[test]
    fn error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GtfsError = io_err.into();
        assert!(err.to_string().contains("file not found"));
        assert!(matches!(err, GtfsError::IoError(_)));
    }

    #[test]
    fn error_from_csv_error() {
        // Force a CSV error by deserializing a row with too few fields
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(b"not,enough" as &[u8]);
        #[derive(serde::Deserialize)]
        struct ThreeFields {
            _a: String,
            _b: String,
            _c: String,
        }
        let result = rdr.deserialize::<ThreeFields>().next().unwrap();
        if let Err(csv_err) = result {
            let err: GtfsError = csv_err.into();
            assert!(matches!(err, GtfsError::CsvError(_)));
        }
    }

    #[test]
    fn error_from_sqlx_error() {
        let err: GtfsError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, GtfsError::DatabaseError(_)));
    }
}
