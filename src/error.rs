// error.rs - Centralized error handling using thiserror

use serde::{Deserialize, Serialize};

/// Crate-wide Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the local store and sync engine.
///
/// Uses thiserror for ergonomic error handling and automatic Display impl.
/// Variants are serializable so a host application can forward them to a UI
/// layer without re-deriving the mapping.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "message")]
pub enum Error {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Storage quota exceeded: {0}")]
    StorageQuotaExceeded(String),

    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote rejected: {0}")]
    RemoteReject(String),

    #[error("Receipt not synced yet: {0}")]
    ReceiptNotSynced(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Sync error: {0}")]
    Sync(String),
}

/// The engine's failure taxonomy, derived from an [`Error`] so the
/// drain loop can match on it once instead of re-deriving the mapping from
/// error strings at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncFailureKind {
    Network,
    RemoteReject,
    Unauthenticated,
    NotFound,
    ReceiptNotSynced,
    StorageQuotaExceeded,
    /// Anything else a port returned; treated like `Network` (retried).
    Other,
}

impl Error {
    /// Classify this error into the engine's retry/terminal taxonomy.
    pub fn classify(&self) -> SyncFailureKind {
        match self {
            Error::Network(_) => SyncFailureKind::Network,
            Error::RemoteReject(_) => SyncFailureKind::RemoteReject,
            Error::Unauthenticated => SyncFailureKind::Unauthenticated,
            Error::NotFound(_) => SyncFailureKind::NotFound,
            Error::ReceiptNotSynced(_) => SyncFailureKind::ReceiptNotSynced,
            Error::StorageQuotaExceeded(_) => SyncFailureKind::StorageQuotaExceeded,
            _ => SyncFailureKind::Other,
        }
    }
}

// Implement conversions from common error types
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            // SQLITE_FULL (primary result code 13) signals quota exhaustion.
            if db_err.code().as_deref() == Some("13") {
                return Error::StorageQuotaExceeded(db_err.message().to_string());
            }
        }
        Error::Database(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<chrono::ParseError> for Error {
    fn from(err: chrono::ParseError) -> Self {
        Error::Serialization(err.to_string())
    }
}
