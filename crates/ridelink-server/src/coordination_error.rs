//! Errors returned to callers of the coordination service.
//!
//! Every rejection maps to one HTTP-equivalent status, which is also what an
//! `Error` frame carries for requests made over a session.

use ridelink_core::{RequestError, TransitionError};
use ridelink_proto::{Actor, ErrorPayload, RideId, RideState};
use thiserror::Error;

use crate::storage::StorageError;

/// Why a coordination request was refused.
///
/// Whatever the variant, nothing was persisted and nobody was notified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// Command has no edge from the ride's current state
    #[error("invalid transition: cannot {command} a {from} ride")]
    InvalidTransition {
        /// State the ride was in
        from: RideState,
        /// Attempted command
        command: &'static str,
    },

    /// Actor may not issue this command on this ride
    #[error("unauthorized: {actor} may not {command} this ride")]
    UnauthorizedActor {
        /// Requesting actor
        actor: Actor,
        /// Attempted command
        command: &'static str,
    },

    /// Caller's view of the ride is out of date. Reload and retry.
    #[error("stale version: expected {expected}, ride is at {actual}")]
    StaleVersion {
        /// Version the caller sent
        expected: u64,
        /// Version the ride is at
        actual: u64,
    },

    /// No such ride
    #[error("ride not found: {0:032x}")]
    NotFound(RideId),

    /// Ride id collision on create
    #[error("ride already exists: {0:032x}")]
    AlreadyExists(RideId),

    /// Ride request failed validation
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    /// Storage backend failed
    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl CoordinationError {
    /// HTTP-equivalent status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidTransition { .. } | Self::InvalidRequest(_) => 400,
            Self::UnauthorizedActor { .. } => 403,
            Self::NotFound(_) => 404,
            Self::StaleVersion { .. } | Self::AlreadyExists(_) => 409,
            Self::Storage(_) => 500,
        }
    }

    /// Whether retrying (after reloading the ride) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleVersion { .. } | Self::Storage(StorageError::Io(_)))
    }

    /// Error frame payload for channel callers.
    pub fn to_error_payload(&self) -> ErrorPayload {
        let code = match self {
            Self::InvalidTransition { .. } => ErrorPayload::INVALID_TRANSITION,
            Self::UnauthorizedActor { .. } => ErrorPayload::UNAUTHORIZED_ACTOR,
            Self::StaleVersion { .. } => ErrorPayload::STALE_VERSION,
            Self::NotFound(_) => ErrorPayload::NOT_FOUND,
            Self::AlreadyExists(_) => ErrorPayload::ALREADY_EXISTS,
            Self::InvalidRequest(_) => ErrorPayload::INVALID_PAYLOAD,
            Self::Storage(_) => ErrorPayload::STORAGE_ERROR,
        };
        ErrorPayload::new(code, self.http_status(), self.to_string())
    }
}

impl From<TransitionError> for CoordinationError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::StaleVersion { expected, actual } => {
                Self::StaleVersion { expected, actual }
            },
            TransitionError::InvalidTransition { from, command } => {
                Self::InvalidTransition { from, command }
            },
            TransitionError::UnauthorizedActor { actor, command } => {
                Self::UnauthorizedActor { actor, command }
            },
        }
    }
}

impl From<StorageError> for CoordinationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => Self::NotFound(id),
            StorageError::StaleVersion { expected, actual } => {
                Self::StaleVersion { expected, actual }
            },
            StorageError::AlreadyExists(id) => Self::AlreadyExists(id),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_http_boundary() {
        let cases = [
            (CoordinationError::StaleVersion { expected: 1, actual: 2 }, 409),
            (
                CoordinationError::UnauthorizedActor { actor: Actor::rider(1), command: "start" },
                403,
            ),
            (
                CoordinationError::InvalidTransition {
                    from: RideState::Completed,
                    command: "cancel",
                },
                400,
            ),
            (CoordinationError::NotFound(7), 404),
            (CoordinationError::Storage(StorageError::Io("disk".into())), 500),
        ];

        for (err, status) in cases {
            assert_eq!(err.http_status(), status, "{err}");
            assert_eq!(err.to_error_payload().status, status);
        }
    }

    #[test]
    fn storage_outcomes_are_not_backend_failures() {
        assert_eq!(
            CoordinationError::from(StorageError::StaleVersion { expected: 3, actual: 4 }),
            CoordinationError::StaleVersion { expected: 3, actual: 4 }
        );
        assert_eq!(CoordinationError::from(StorageError::NotFound(9)), CoordinationError::NotFound(9));
        assert!(matches!(
            CoordinationError::from(StorageError::Serialization("bad".into())),
            CoordinationError::Storage(_)
        ));
    }

    #[test]
    fn only_stale_and_io_are_retryable() {
        assert!(CoordinationError::StaleVersion { expected: 1, actual: 2 }.is_retryable());
        assert!(CoordinationError::Storage(StorageError::Io("timeout".into())).is_retryable());
        assert!(!CoordinationError::Storage(StorageError::Serialization("x".into())).is_retryable());
        assert!(!CoordinationError::NotFound(1).is_retryable());
    }
}
