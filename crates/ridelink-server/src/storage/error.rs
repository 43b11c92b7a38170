//! Storage error types.

use ridelink_proto::RideId;
use thiserror::Error;

/// Errors returned by [`super::RideStore`] implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No ride with this id
    #[error("ride not found: {0:032x}")]
    NotFound(RideId),

    /// Compare-and-swap lost: the stored version moved
    #[error("stale version: expected {expected}, stored {actual}")]
    StaleVersion {
        /// Version the caller expected
        expected: u64,
        /// Version actually stored
        actual: u64,
    },

    /// Insert of an id that is already taken
    #[error("ride already exists: {0:032x}")]
    AlreadyExists(RideId),

    /// Backend I/O or transaction failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Stored bytes could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Backend failures, as opposed to outcomes of the operation itself.
    pub fn is_backend_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Serialization(_))
    }
}
