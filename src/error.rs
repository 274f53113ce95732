//! Error types for the collection pipeline.

use reqwest::StatusCode;
use thiserror::Error;

// ============================================================================
// Collection Error
// ============================================================================

/// Error raised while talking to a controller or storing what it returned.
#[derive(Debug, Error)]
pub enum CollectError {
    /// Login or token refresh was rejected. Fatal to the fabric's pipeline.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The controller refused to return the whole result set in one response.
    /// Never retried; the caller falls back to pagination.
    #[error("result dataset is too big for {resource}")]
    Oversized { resource: String },

    /// Non-success HTTP status.
    #[error("received HTTP status {status} for {path}")]
    Status { status: StatusCode, path: String },

    /// The controller address could not be turned into a URL.
    #[error("invalid controller URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Transport failure (connect, timeout, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not the JSON shape we expected.
    #[error("cannot decode response: {0}")]
    Decode(String),

    /// Every attempt failed.
    #[error("request failed for {resource} after {attempts} attempts: {source}")]
    RetriesExhausted {
        resource: String,
        attempts: u32,
        #[source]
        source: Box<CollectError>,
    },

    /// The result could not be written to the archive.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl CollectError {
    /// True for the "dataset too big" condition that triggers pagination.
    pub fn is_oversized(&self) -> bool {
        matches!(self, CollectError::Oversized { .. })
    }

    /// True when no amount of retrying the same call can help.
    pub fn is_auth(&self) -> bool {
        matches!(self, CollectError::Auth(_))
    }
}

impl From<serde_json::Error> for CollectError {
    fn from(err: serde_json::Error) -> Self {
        CollectError::Decode(err.to_string())
    }
}

// ============================================================================
// Archive Error
// ============================================================================

/// Error type for archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// IO error on the underlying file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip container error.
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The archive was already finalized.
    #[error("archive already closed")]
    Closed,

    /// A writer thread panicked while holding the archive lock.
    #[error("archive lock poisoned")]
    Poisoned,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_is_classified() {
        let err = CollectError::Oversized {
            resource: "faultInst".to_string(),
        };
        assert!(err.is_oversized());
        assert!(!err.is_auth());
        assert_eq!(err.to_string(), "result dataset is too big for faultInst");
    }

    #[test]
    fn test_retries_exhausted_names_resource_and_cause() {
        let err = CollectError::RetriesExhausted {
            resource: "fvBD".to_string(),
            attempts: 4,
            source: Box::new(CollectError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                path: "/api/class/fvBD".to_string(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("fvBD"));
        assert!(msg.contains("4 attempts"));
        assert!(msg.contains("503"));
        assert!(!err.is_oversized());
    }

    #[test]
    fn test_archive_error_converts() {
        let err: CollectError = ArchiveError::Closed.into();
        assert!(matches!(err, CollectError::Archive(ArchiveError::Closed)));
    }
}
