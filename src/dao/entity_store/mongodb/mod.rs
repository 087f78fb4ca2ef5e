//! MongoDB [`EntityStore`](super::EntityStore) backed by multi-document transactions.
//!
//! Transactions need a replica set or sharded cluster; a standalone server answers pings but
//! rejects every commit.

mod config;
mod connection;
mod error;
mod models;
mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoEntityStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Malformed(schema) => StorageError::InvalidDocument(schema),
            err => StorageError::unavailable(err.to_string(), err),
        }
    }
}
