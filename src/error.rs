// src/error.rs

//! Crate-wide error and result types.
//!
//! Subsystems with their own taxonomy (validation, the remote API) define
//! dedicated error types and convert into `Error` at the boundary.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::remote::ApiError;
use crate::schema::ValidationErrors;

/// Errors that can occur in the reconciliation core
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk document is not parseable. Operator intervention is
    /// required; the most recent backup is the recovery path.
    #[error("unreadable document: {0}")]
    Format(String),

    /// The document was rejected by the schema.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// A mutation was attempted while the advisory lock is valid.
    #[error("locked for {reason} until {expires_at}")]
    LockHeld {
        reason: String,
        expires_at: DateTime<Utc>,
    },

    /// The remote admin API returned a non-200 response.
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("configuration error: {0}")]
    Config(String),

    /// An operation referenced a user id the engine does not manage.
    #[error("unmanaged user id: {0}")]
    UnmanagedUser(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
