use mongodb::error::Error as MongoError;
use thiserror::Error;

use crate::dao::models::SchemaError;

/// Result alias for MongoDB backend operations.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures of the MongoDB backend before they are mapped onto storage errors.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The client could not be built from the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The server never answered the startup ping.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Pings attempted.
        attempts: u32,
        /// Last driver error.
        #[source]
        source: MongoError,
    },
    /// A later health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// An index could not be created.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection holding the index.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A read failed.
    #[error("failed to load from collection `{collection}`")]
    Load {
        /// Collection read from.
        collection: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A write failed.
    #[error("failed to write to collection `{collection}`")]
    Write {
        /// Collection written to.
        collection: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A transaction step failed.
    #[error("transaction `{stage}` failed")]
    Transaction {
        /// Step that failed.
        stage: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A filter value could not be encoded to BSON.
    #[error("failed to encode query value")]
    Encode(#[from] mongodb::bson::error::Error),
    /// A stored document violates the entity schema.
    #[error("stored document is malformed")]
    Malformed(#[from] SchemaError),
}

impl MongoDaoError {
    /// Whether the driver aborted the surrounding transaction, typically on a write conflict.
    ///
    /// An unknown commit result is not transient: the commit may have landed and is retried in
    /// place by the store.
    pub fn is_transient(&self) -> bool {
        let source = match self {
            MongoDaoError::Load { source, .. }
            | MongoDaoError::Write { source, .. }
            | MongoDaoError::Transaction { source, .. } => source,
            _ => return false,
        };
        source.contains_label(mongodb::error::TRANSIENT_TRANSACTION_ERROR)
    }
}
