use std::{
    collections::{BTreeSet, HashMap, hash_map::Entry},
    sync::Arc,
};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{Bson, Document, doc, serialize_to_bson as to_bson},
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::IndexOptions,
};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoBranchDocument, MongoGuardDocument, MongoSessionDocument, MongoUserDocument,
        id_filter,
    },
};
use crate::dao::{
    entity_store::{
        ChangeFeed, ChangeNotice, CommitRequest, DocumentKey, EntityStore, Resolved,
        SessionQuery, UserQuery, Versioned,
    },
    models::{Branch, Session, UserIdentity},
    storage::{StorageError, StorageResult},
};

const USER_COLLECTION_NAME: &str = "users";
const SESSION_COLLECTION_NAME: &str = "queue";
const BRANCH_COLLECTION_NAME: &str = "branches";
const GUARD_COLLECTION_NAME: &str = "branch_guards";
const FEED_CAPACITY: usize = 64;

/// [`EntityStore`] over the `users`, `queue`, `branches` and `branch_guards` collections.
#[derive(Clone)]
pub struct MongoEntityStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    feed: ChangeFeed,
}

struct MongoState {
    client: Client,
    database: Database,
}

/// Document loaded inside a transaction and the value it will be written back as.
struct Staged<T> {
    before: Option<T>,
    after: Option<T>,
    version: u64,
    dirty: bool,
}

impl<T: Clone> Staged<T> {
    fn loaded(current: Option<Versioned<T>>) -> Self {
        match current {
            Some(Versioned { data, version }) => Self {
                before: Some(data.clone()),
                after: Some(data),
                version,
                dirty: false,
            },
            None => Self {
                before: None,
                after: None,
                version: 0,
                dirty: false,
            },
        }
    }

    fn apply(&mut self, resolved: Resolved<T>) {
        match resolved {
            Resolved::Write(next) => {
                self.after = Some(next);
                self.dirty = true;
            }
            Resolved::Delete => {
                self.after = None;
                self.dirty = true;
            }
            Resolved::Unchanged => {}
        }
    }
}

/// Commit attempts made while the driver cannot tell whether the previous one landed.
const COMMIT_ATTEMPTS: u32 = 3;

/// How to react to a failed `commitTransaction`.
#[derive(Debug, PartialEq, Eq)]
enum CommitFailure {
    /// The commit may already have landed; commit again on the same session.
    RetryCommit,
    /// The transaction was aborted; rerun it from the start.
    Conflict,
    /// Surface the failure.
    Fatal,
}

fn commit_failure(unknown_result: bool, transient: bool, attempt: u32) -> CommitFailure {
    if unknown_result {
        if attempt < COMMIT_ATTEMPTS {
            CommitFailure::RetryCommit
        } else {
            CommitFailure::Fatal
        }
    } else if transient {
        CommitFailure::Conflict
    } else {
        CommitFailure::Fatal
    }
}

/// Map driver failures onto storage errors, turning retryable transaction errors into conflicts.
fn classify(err: MongoDaoError, key: &DocumentKey) -> StorageError {
    if err.is_transient() {
        StorageError::Conflict { key: key.clone() }
    } else {
        err.into()
    }
}

fn user_filter(query: &UserQuery) -> MongoResult<Document> {
    let mut filter = Document::new();
    if let Some(status) = query.status {
        filter.insert("status", to_bson(&status)?);
    }
    if let Some(branch_id) = &query.branch_id {
        filter.insert("branchId", branch_id.as_str());
    }
    if let Some(host) = query.added_by {
        filter.insert("addedBy", host.to_string());
    }
    Ok(filter)
}

fn session_filter(query: &SessionQuery) -> MongoResult<Document> {
    let mut filter = Document::new();
    if let Some(branch_id) = &query.branch_id {
        filter.insert("branchId", branch_id.as_str());
    }
    if !query.statuses.is_empty() {
        let statuses = query
            .statuses
            .iter()
            .map(to_bson)
            .collect::<Result<Vec<Bson>, _>>()?;
        filter.insert("status", doc! { "$in": statuses });
    }
    if let Some(kind) = query.kind {
        filter.insert("type", to_bson(&kind)?);
    }
    if let Some(count) = query.player_count {
        filter.insert("playerCount", count as i64);
    }
    Ok(filter)
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoEntityStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
            feed: ChangeFeed::new(FEED_CAPACITY),
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;
        let indexes: [(&'static str, &'static str, Document); 3] = [
            (
                USER_COLLECTION_NAME,
                "user_waiting_idx",
                doc! { "status": 1, "branchId": 1, "createdAt": 1 },
            ),
            (USER_COLLECTION_NAME, "user_guest_idx", doc! { "addedBy": 1 }),
            (
                SESSION_COLLECTION_NAME,
                "queue_branch_idx",
                doc! { "branchId": 1, "status": 1, "createdAt": 1 },
            ),
        ];

        for (collection, name, keys) in indexes {
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(Some(name.to_owned())).build())
                .build();
            database
                .collection::<Document>(collection)
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: name,
                    source,
                })?;
        }

        Ok(())
    }

    /// Insert branches that do not exist yet, leaving existing documents untouched.
    pub async fn seed_branches(&self, branches: &[Branch]) -> MongoResult<()> {
        let collection = self.database().await.collection::<Document>(BRANCH_COLLECTION_NAME);
        for branch in branches {
            let status = if branch.open { "OPEN" } else { "CLOSED" };
            collection
                .update_one(
                    doc! { "_id": branch.branch_id.as_str() },
                    doc! { "$setOnInsert": {
                        "branchCode": branch.branch_id.as_str(),
                        "branchName": branch.name.as_str(),
                        "cabinetCount": branch.cabinet_count.map(i64::from),
                        "status": status,
                    } },
                )
                .upsert(true)
                .await
                .map_err(|source| MongoDaoError::Write {
                    collection: BRANCH_COLLECTION_NAME,
                    source,
                })?;
        }
        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn client(&self) -> Client {
        let guard = self.inner.state.read().await;
        guard.client.clone()
    }

    async fn users(&self) -> Collection<MongoUserDocument> {
        self.database().await.collection(USER_COLLECTION_NAME)
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION_NAME)
    }

    async fn guards(&self) -> Collection<MongoGuardDocument> {
        self.database().await.collection(GUARD_COLLECTION_NAME)
    }

    async fn find_user(&self, id: Uuid) -> MongoResult<Option<Versioned<UserIdentity>>> {
        let document = self
            .users()
            .await
            .find_one(id_filter(id))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: USER_COLLECTION_NAME,
                source,
            })?;
        Ok(document.map(Versioned::try_from).transpose()?)
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<Versioned<Session>>> {
        let document = self
            .sessions()
            .await
            .find_one(id_filter(id))
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: SESSION_COLLECTION_NAME,
                source,
            })?;
        Ok(document.map(Versioned::try_from).transpose()?)
    }

    async fn guard_version(&self, branch_id: String) -> MongoResult<u64> {
        let document = self
            .guards()
            .await
            .find_one(doc! { "_id": branch_id })
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: GUARD_COLLECTION_NAME,
                source,
            })?;
        Ok(document.map_or(0, |guard| guard.version.max(0) as u64))
    }

    async fn find_branch(&self, branch_id: String) -> MongoResult<Option<Branch>> {
        let document = self
            .database()
            .await
            .collection::<MongoBranchDocument>(BRANCH_COLLECTION_NAME)
            .find_one(doc! { "_id": branch_id })
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: BRANCH_COLLECTION_NAME,
                source,
            })?;
        Ok(document.map(Branch::from))
    }

    async fn query_users(&self, query: UserQuery) -> MongoResult<Vec<UserIdentity>> {
        let load = |source| MongoDaoError::Load {
            collection: USER_COLLECTION_NAME,
            source,
        };
        let documents: Vec<MongoUserDocument> = self
            .users()
            .await
            .find(user_filter(&query)?)
            .sort(doc! { "createdAt": 1, "_id": 1 })
            .await
            .map_err(load)?
            .try_collect()
            .await
            .map_err(load)?;

        documents
            .into_iter()
            .map(|document| {
                Versioned::<UserIdentity>::try_from(document)
                    .map(|versioned| versioned.data)
                    .map_err(MongoDaoError::from)
            })
            .collect()
    }

    async fn query_sessions(&self, query: SessionQuery) -> MongoResult<Vec<Session>> {
        let load = |source| MongoDaoError::Load {
            collection: SESSION_COLLECTION_NAME,
            source,
        };
        let documents: Vec<MongoSessionDocument> = self
            .sessions()
            .await
            .find(session_filter(&query)?)
            .sort(doc! { "createdAt": 1, "_id": 1 })
            .await
            .map_err(load)?
            .try_collect()
            .await
            .map_err(load)?;

        documents
            .into_iter()
            .map(|document| {
                Versioned::<Session>::try_from(document)
                    .map(|versioned| versioned.data)
                    .map_err(MongoDaoError::from)
            })
            .collect()
    }

    async fn version_in(
        &self,
        transaction: &mut ClientSession,
        key: &DocumentKey,
    ) -> MongoResult<u64> {
        let version = match key {
            DocumentKey::User(id) => self
                .load_user_in(transaction, *id)
                .await?
                .map_or(0, |user| user.version),
            DocumentKey::Session(id) => self
                .load_session_in(transaction, *id)
                .await?
                .map_or(0, |session| session.version),
            DocumentKey::QueueGuard(branch_id) => self
                .guards()
                .await
                .find_one(doc! { "_id": branch_id.as_str() })
                .session(&mut *transaction)
                .await
                .map_err(|source| MongoDaoError::Load {
                    collection: GUARD_COLLECTION_NAME,
                    source,
                })?
                .map_or(0, |guard| guard.version.max(0) as u64),
        };
        Ok(version)
    }

    async fn load_user_in(
        &self,
        transaction: &mut ClientSession,
        id: Uuid,
    ) -> MongoResult<Option<Versioned<UserIdentity>>> {
        let document = self
            .users()
            .await
            .find_one(id_filter(id))
            .session(&mut *transaction)
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: USER_COLLECTION_NAME,
                source,
            })?;
        Ok(document.map(Versioned::try_from).transpose()?)
    }

    async fn load_session_in(
        &self,
        transaction: &mut ClientSession,
        id: Uuid,
    ) -> MongoResult<Option<Versioned<Session>>> {
        let document = self
            .sessions()
            .await
            .find_one(id_filter(id))
            .session(&mut *transaction)
            .await
            .map_err(|source| MongoDaoError::Load {
                collection: SESSION_COLLECTION_NAME,
                source,
            })?;
        Ok(document.map(Versioned::try_from).transpose()?)
    }

    /// Validate reads and apply writes inside an open transaction.
    async fn apply_in(
        &self,
        transaction: &mut ClientSession,
        request: &CommitRequest,
    ) -> StorageResult<ChangeNotice> {
        for (key, seen) in &request.reads {
            let current = self
                .version_in(transaction, key)
                .await
                .map_err(|err| classify(err, key))?;
            if current != *seen {
                return Err(StorageError::Conflict { key: key.clone() });
            }
        }

        let mut users: HashMap<Uuid, Staged<UserIdentity>> = HashMap::new();
        let mut sessions: HashMap<Uuid, Staged<Session>> = HashMap::new();

        for op in &request.writes {
            let key = op.key();
            match key {
                DocumentKey::User(id) => {
                    let staged = match users.entry(id) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            let current = self
                                .load_user_in(transaction, id)
                                .await
                                .map_err(|err| classify(err, &key))?;
                            entry.insert(Staged::loaded(current))
                        }
                    };
                    let resolved = op.resolve_user(staged.after.as_ref())?;
                    staged.apply(resolved);
                }
                DocumentKey::Session(id) => {
                    let staged = match sessions.entry(id) {
                        Entry::Occupied(entry) => entry.into_mut(),
                        Entry::Vacant(entry) => {
                            let current = self
                                .load_session_in(transaction, id)
                                .await
                                .map_err(|err| classify(err, &key))?;
                            entry.insert(Staged::loaded(current))
                        }
                    };
                    let resolved = op.resolve_session(staged.after.as_ref())?;
                    staged.apply(resolved);
                }
                DocumentKey::QueueGuard(_) => {}
            }
        }

        let mut notice = ChangeNotice::default();
        let write_error = |collection| {
            move |source| MongoDaoError::Write { collection, source }
        };

        let user_collection = self.users().await;
        for (id, staged) in users.into_iter().filter(|(_, staged)| staged.dirty) {
            let key = DocumentKey::User(id);
            notice.record_user(staged.before.as_ref(), staged.after.as_ref());
            let outcome = match &staged.after {
                Some(user) => user_collection
                    .replace_one(
                        id_filter(id),
                        MongoUserDocument::from_entity(user, staged.version + 1),
                    )
                    .upsert(true)
                    .session(&mut *transaction)
                    .await
                    .map(|_| ()),
                None => user_collection
                    .delete_one(id_filter(id))
                    .session(&mut *transaction)
                    .await
                    .map(|_| ()),
            };
            outcome
                .map_err(write_error(USER_COLLECTION_NAME))
                .map_err(|err| classify(err, &key))?;
        }

        let session_collection = self.sessions().await;
        let guard_collection = self.guards().await;
        for (id, staged) in sessions.into_iter().filter(|(_, staged)| staged.dirty) {
            let key = DocumentKey::Session(id);
            notice.record_session(staged.before.as_ref(), staged.after.as_ref());
            let outcome = match &staged.after {
                Some(session) => session_collection
                    .replace_one(
                        id_filter(id),
                        MongoSessionDocument::from_entity(session, staged.version + 1),
                    )
                    .upsert(true)
                    .session(&mut *transaction)
                    .await
                    .map(|_| ()),
                None => session_collection
                    .delete_one(id_filter(id))
                    .session(&mut *transaction)
                    .await
                    .map(|_| ()),
            };
            outcome
                .map_err(write_error(SESSION_COLLECTION_NAME))
                .map_err(|err| classify(err, &key))?;

            let branches: BTreeSet<&str> = staged
                .before
                .iter()
                .chain(staged.after.iter())
                .map(|session| session.branch_id.as_str())
                .collect();
            for branch_id in branches {
                let guard_key = DocumentKey::QueueGuard(branch_id.to_owned());
                guard_collection
                    .update_one(doc! { "_id": branch_id }, doc! { "$inc": { "version": 1_i64 } })
                    .upsert(true)
                    .session(&mut *transaction)
                    .await
                    .map_err(write_error(GUARD_COLLECTION_NAME))
                    .map_err(|err| classify(err, &guard_key))?;
            }
        }

        Ok(notice)
    }

    async fn commit(&self, request: CommitRequest) -> StorageResult<()> {
        let Some(first_key) = request.writes.first().map(|op| op.key()) else {
            return Ok(());
        };

        let client = self.client().await;
        let mut transaction = client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                stage: "start session",
                source,
            })?;
        transaction
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction {
                stage: "start",
                source,
            })?;

        let notice = match self.apply_in(&mut transaction, &request).await {
            Ok(notice) => notice,
            Err(err) => {
                if let Err(abort) = transaction.abort_transaction().await {
                    warn!(error = %abort, "failed to abort MongoDB transaction");
                }
                if err.is_conflict() {
                    debug!(error = %err, "MongoDB transaction aborted on conflict");
                }
                return Err(err);
            }
        };

        let mut attempt = 1;
        loop {
            let source = match transaction.commit_transaction().await {
                Ok(()) => break,
                Err(source) => source,
            };
            match commit_failure(
                source.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT),
                source.contains_label(TRANSIENT_TRANSACTION_ERROR),
                attempt,
            ) {
                CommitFailure::RetryCommit => {
                    debug!(
                        attempt,
                        error = %source,
                        "MongoDB commit result unknown, committing again"
                    );
                    attempt += 1;
                }
                CommitFailure::Conflict => {
                    return Err(StorageError::Conflict { key: first_key });
                }
                CommitFailure::Fatal => {
                    return Err(MongoDaoError::Transaction {
                        stage: "commit",
                        source,
                    }
                    .into());
                }
            }
        }

        self.inner.feed.publish(notice);
        Ok(())
    }
}

impl EntityStore for MongoEntityStore {
    fn find_user(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<UserIdentity>>>> {
        let store = self.clone();
        Box::pin(async move { store.find_user(id).await.map_err(Into::into) })
    }

    fn find_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<Session>>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn guard_version(&self, branch_id: String) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.guard_version(branch_id).await.map_err(Into::into) })
    }

    fn find_branch(&self, branch_id: String) -> BoxFuture<'static, StorageResult<Option<Branch>>> {
        let store = self.clone();
        Box::pin(async move { store.find_branch(branch_id).await.map_err(Into::into) })
    }

    fn query_users(
        &self,
        query: UserQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<UserIdentity>>> {
        let store = self.clone();
        Box::pin(async move { store.query_users(query).await.map_err(Into::into) })
    }

    fn query_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<Session>>> {
        let store = self.clone();
        Box::pin(async move { store.query_sessions(query).await.map_err(Into::into) })
    }

    fn commit(&self, request: CommitRequest) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.commit(request).await })
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.inner.feed.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{SessionType, UserStatus};

    #[test]
    fn user_filter_uses_persisted_field_names() {
        let host = Uuid::new_v4();
        let filter = user_filter(&UserQuery {
            status: Some(UserStatus::Waiting),
            branch_id: Some("sisa".into()),
            added_by: Some(host),
        })
        .unwrap();
        assert_eq!(
            filter,
            doc! { "status": "waiting", "branchId": "sisa", "addedBy": host.to_string() }
        );
    }

    #[test]
    fn session_filter_matches_any_listed_status() {
        let filter = session_filter(&SessionQuery {
            kind: Some(SessionType::Sync),
            ..SessionQuery::active_at("jamal")
        })
        .unwrap();
        assert_eq!(
            filter,
            doc! {
                "branchId": "jamal",
                "status": { "$in": ["queued", "playing"] },
                "type": "sync",
            }
        );
    }

    #[test]
    fn unknown_commit_results_are_committed_again_in_place() {
        assert_eq!(commit_failure(true, false, 1), CommitFailure::RetryCommit);
        assert_eq!(commit_failure(true, false, 2), CommitFailure::RetryCommit);
        assert_eq!(commit_failure(true, false, COMMIT_ATTEMPTS), CommitFailure::Fatal);
    }

    #[test]
    fn only_transient_transaction_errors_rerun_the_transaction() {
        assert_eq!(commit_failure(false, true, 1), CommitFailure::Conflict);
        assert_eq!(commit_failure(false, false, 1), CommitFailure::Fatal);
    }
}
