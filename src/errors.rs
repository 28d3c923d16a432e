//! Error types for storage calls and mirror runs.
//!
//! [`StorageError`] is what every backend returns.  The engine only cares
//! about one distinction: [`StorageError::NotFound`] is an expected answer
//! (the key is absent) while everything else is a fault that may be retried.

use thiserror::Error;

/// Errors surfaced by a [`crate::storage::backend::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The key does not exist in the container.
    #[error("{container}/{key} not found")]
    NotFound { container: String, key: String },

    /// The key cannot be mapped onto the backend (e.g. path traversal).
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    /// A retry delay was cut short by shutdown.
    #[error("interrupted while waiting to retry")]
    Interrupted,

    /// Any other backend or transport fault.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StorageError {
    /// Shorthand for building a [`StorageError::NotFound`].
    pub fn not_found(container: &str, key: &str) -> Self {
        StorageError::NotFound {
            container: container.to_string(),
            key: key.to_string(),
        }
    }

    /// Whether this error means "the key is absent".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }

    /// Whether another attempt could change the answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Backend(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Backend(anyhow::Error::new(err))
    }
}

/// Errors that end a mirror run as a whole.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The source (or, when pruning, destination) listing could not proceed.
    #[error("listing {container} failed: {source}")]
    Listing {
        container: String,
        #[source]
        source: StorageError,
    },

    /// Options failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The job scheduler was shut down underneath the run.
    #[error("scheduler failure: {0}")]
    Scheduler(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = StorageError::not_found("bucket", "a/b.txt");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "bucket/a/b.txt not found");
    }

    #[test]
    fn test_backend_error_is_retryable() {
        let err = StorageError::from(anyhow::anyhow!("connection reset"));
        assert!(err.is_retryable());
        assert!(!err.is_not_found());
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn test_interrupted_is_terminal() {
        assert!(!StorageError::Interrupted.is_retryable());
    }

    #[test]
    fn test_io_error_maps_to_backend() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(StorageError::from(io), StorageError::Backend(_)));
    }
}
