//! Error types for the block store.
//!
//! Every public operation returns [`StoreResult`]. Validation problems are
//! raised before a transaction opens; everything else rolls the transaction
//! back before it reaches the caller.

use blockbase_types::ValidationError;
use thiserror::Error;

use crate::directory::DirectoryError;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Caller-supplied data cannot be stored.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The addressed entity does not exist (or is deleted).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind (`block`, `board`, ...).
        entity: &'static str,
        id: String,
    },

    /// The write would violate an ownership rule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A count or offset does not fit a database integer.
    #[error("{0} out of range")]
    OutOfRange(&'static str),

    /// The configured driver has no executor in this build.
    #[error("unsupported database driver: {0}")]
    UnsupportedDriver(String),

    /// Invalid store configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A cluster lock could not be taken in time.
    #[error("timed out waiting for cluster lock '{name}'")]
    LockTimeout { name: String },

    /// The team directory failed.
    #[error("team directory: {0}")]
    Directory(#[from] DirectoryError),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// `n` as a bindable integer.
    pub(crate) fn sql_int(n: usize, what: &'static str) -> StoreResult<i64> {
        i64::try_from(n).map_err(|_| Self::OutOfRange(what))
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = StoreError::not_found("block", "c1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "block not found: c1");

        let err: StoreError = ValidationError::EmptyRootId.into();
        assert!(err.is_validation());
        assert!(!err.is_conflict());

        assert!(StoreError::conflict("board mismatch").is_conflict());
    }
}
