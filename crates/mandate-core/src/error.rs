//! Error taxonomy for the control plane.
//!
//! Every failure surfaced to a caller (the REST layer or the check-in
//! handler) is one of these typed variants. Normal terminal command
//! states (expiry, sequence cancellation) are not errors.

use thiserror::Error;
use uuid::Uuid;

/// Result type for control-plane operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Control-plane error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown device, command, or sequence reference.
    #[error("not found: {0}")]
    NotFound(String),

    /// Enqueue collision on a command UUID.
    #[error("duplicate command UUID: {0}")]
    DuplicateUuid(Uuid),

    /// Status change not permitted from the current state.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A device reported a result for a UUID it does not own, or one
    /// that does not exist.
    #[error("unknown command: {0}")]
    UnknownCommand(Uuid),

    /// Sequence creation referenced an ineligible command.
    #[error("invalid sequence member: {0}")]
    InvalidMember(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Storage/database error.
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this failure is benign on the check-in path: a stale or
    /// replayed device report must not prevent the device from getting
    /// its next command.
    pub fn is_benign_report(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::UnknownCommand(_))
    }
}

// External error conversions

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(format!("redb error: {}", e))
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::Storage(format!("redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::Storage(format!("redb table error: {}", e))
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::Storage(format!("redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::Storage(format!("redb commit error: {}", e))
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::Storage(format!("redb database error: {}", e))
    }
}
