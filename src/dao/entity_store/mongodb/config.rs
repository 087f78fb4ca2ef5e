use mongodb::options::ClientOptions;

use super::error::{MongoDaoError, MongoResult};

/// Database used when no name is configured.
pub const DEFAULT_DATABASE: &str = "maiqueue";

/// Parsed client options and target database of the MongoDB backend.
#[derive(Clone)]
pub struct MongoConfig {
    /// Driver options parsed from the connection string.
    pub options: ClientOptions,
    /// Database holding the queue collections.
    pub database_name: String,
}

impl MongoConfig {
    /// Parse `uri` and pick the database, falling back to [`DEFAULT_DATABASE`].
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> MongoResult<Self> {
        let database_name = db_name.unwrap_or(DEFAULT_DATABASE).to_owned();
        let options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;

        Ok(Self {
            options,
            database_name,
        })
    }
}
