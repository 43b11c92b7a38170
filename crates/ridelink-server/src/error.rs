//! Server runtime errors.

use std::fmt;

use crate::storage::StorageError;

/// Errors that can occur in the server runtime.
///
/// Request-level rejections are [`crate::CoordinationError`]s and never reach
/// this type; these are failures of the server or of one connection.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error (invalid bind address, missing TLS certs, etc.).
    ///
    /// Fatal: prevents startup. Fix configuration and restart.
    Config(String),

    /// Transport/network error (connection failure, I/O error, etc.).
    ///
    /// Usually affects a single connection; the server keeps running.
    Transport(String),

    /// Protocol error (invalid frame format, unsupported version, etc.).
    ///
    /// A peer sent malformed data. Fatal for that connection only.
    Protocol(String),

    /// Internal error (unexpected state, logic bug, etc.).
    Internal(String),

    /// Storage backend could not be opened or failed outside a request.
    Storage(StorageError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for ServerError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ridelink_proto::ProtocolError> for ServerError {
    fn from(err: ridelink_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
