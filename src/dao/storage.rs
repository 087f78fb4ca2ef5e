use std::error::Error;
use thiserror::Error;

use crate::dao::{entity_store::DocumentKey, models::SchemaError};

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or failed unexpectedly.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human readable summary.
        message: String,
        /// Underlying backend error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A document read by the transaction changed before it could commit.
    #[error("transaction conflict on {key}")]
    Conflict {
        /// Document that moved.
        key: DocumentKey,
    },
    /// A write targeted a document that does not exist.
    #[error("{key} does not exist")]
    MissingDocument {
        /// Document that was expected.
        key: DocumentKey,
    },
    /// A document failed schema validation on its way in or out of the store.
    #[error("invalid document: {0}")]
    InvalidDocument(#[from] SchemaError),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether the error is a read-set conflict worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict { .. })
    }
}
