//! Common error types for the Phenofront services
//!
//! One variant per failure kind. Callers match on the kind; only the HTTP
//! boundary turns a kind into a status code.

use thiserror::Error;

/// Common result type for Phenofront operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure kinds of the query-and-export pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// The experiment datastore could not be reached or failed mid-query
    #[error("Datastore unavailable: {0}")]
    DatastoreUnavailable(String),

    /// Malformed filter input, rejected before any query runs
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Identifier or token could not be resolved
    #[error("Not found: {0}")]
    NotFound(String),

    /// Experiment to datastore mapping is missing or malformed
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A single image could not be opened or read
    #[error("Image unavailable: {locator}: {reason}")]
    ImageUnavailable { locator: String, reason: String },

    /// The peer stopped reading the archive stream
    #[error("Transfer cancelled after {entries_written} entries")]
    TransferCancelled { entries_written: usize },
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound("no matching row".to_string()),
            other => Error::DatastoreUnavailable(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_pool_errors_map_to_datastore_unavailable() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::DatastoreUnavailable(_)));

        let err: Error = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, Error::DatastoreUnavailable(_)));
    }

    #[test]
    fn test_display_messages() {
        let err = Error::ImageUnavailable {
            locator: "snap/42".to_string(),
            reason: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "Image unavailable: snap/42: missing");

        let err = Error::TransferCancelled { entries_written: 3 };
        assert_eq!(err.to_string(), "Transfer cancelled after 3 entries");
    }
}
