//! Unified error types for the storysdk cache core.
//!
//! Public cache operations never surface these to callers; they are the
//! internal currency that gets logged and degraded into a cache miss.

use tokio_rusqlite::rusqlite;

/// Unified error type for the cache core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No durable store was injected.
    #[error("ADAPTER_UNAVAILABLE: no persistent store injected")]
    AdapterUnavailable,

    /// The durable store rejected or failed an operation.
    #[error("ADAPTER_FAILED: {0}")]
    AdapterFailed(String),

    /// The durable store does not implement an optional operation.
    #[error("ADAPTER_UNSUPPORTED: {0}")]
    AdapterUnsupported(&'static str),

    /// SQLite operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("MIGRATION_FAILED: {0}")]
    MigrationFailed(String),

    /// A bridge envelope was missing fields or was not valid JSON.
    #[error("MALFORMED_MESSAGE: {0}")]
    MalformedMessage(String),

    /// Token change detection could not complete.
    #[error("TOKEN_INIT_FAILED: {0}")]
    TokenInitialization(String),

    /// The embedded peer could not be reached.
    #[error("PEER_UNREACHABLE: {0}")]
    PeerUnreachable(String),

    /// The embedded peer did not acknowledge an invalidation in time.
    #[error("PEER_UNCONFIRMED: {0}")]
    PeerUnconfirmed(String),

    /// A cached payload could not be encoded or decoded.
    #[error("SERIALIZATION: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl Error {
    /// Whether the failure came from the durable adapter rather than from
    /// the cache's own logic.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            Error::AdapterUnavailable
                | Error::AdapterFailed(_)
                | Error::AdapterUnsupported(_)
                | Error::Database(_)
                | Error::MigrationFailed(_)
        )
    }
}
