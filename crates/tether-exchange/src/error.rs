//! Error types for the exchange core.

use crate::remote::RemoteError;

/// Errors surfaced by the handshake coordinator and the stream activation
/// manager.
///
/// `Validation` and `Precondition` are raised before any state is touched.
/// `RemoteDelivery` leaves local state exactly as documented per operation.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// A required field is missing or malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The record is not in a status that permits the operation.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// No record matches the given id or key.
    #[error("not found: {0}")]
    NotFound(String),

    /// The partner instance could not be reached or refused the call.
    #[error("remote delivery failed: {0}")]
    RemoteDelivery(#[from] RemoteError),

    /// A registry read or write failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection was available.
    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Stored JSON could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A blocking registry task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
