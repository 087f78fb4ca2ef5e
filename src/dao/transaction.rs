//! Optimistic transactions and batched writes on top of an [`EntityStore`].

use std::{collections::HashMap, sync::Arc, time::Duration};

use indexmap::IndexMap;
use rand::Rng;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dao::{
    entity_store::{CommitRequest, DocumentKey, EntityStore, SessionPatch, UserPatch, WriteOp},
    models::{Session, UserIdentity},
    storage::StorageResult,
};

/// Buffered view of one transaction attempt: what was read at which version and what will be
/// written on commit.
#[derive(Default)]
struct TxBuffer {
    reads: IndexMap<DocumentKey, u64>,
    users: HashMap<Uuid, Option<UserIdentity>>,
    sessions: HashMap<Uuid, Option<Session>>,
    writes: Vec<WriteOp>,
}

/// Handle to an in-flight optimistic transaction.
///
/// Reads go to the store once per document and are recorded in the read set; later reads of
/// the same document see the buffered value, including this transaction's own writes. Nothing
/// reaches the store until [`Transaction::commit`], which fails with a conflict when any
/// recorded document changed in the meantime. Clones share the same buffer.
#[derive(Clone)]
pub struct Transaction {
    store: Arc<dyn EntityStore>,
    buffer: Arc<Mutex<TxBuffer>>,
}

impl Transaction {
    /// Start an empty transaction against `store`.
    pub fn begin(store: Arc<dyn EntityStore>) -> Self {
        Self {
            store,
            buffer: Arc::new(Mutex::new(TxBuffer::default())),
        }
    }

    /// Store the transaction reads from; use it for planning queries outside the read set.
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Read a user, recording its version in the read set.
    pub async fn user(&self, id: Uuid) -> StorageResult<Option<UserIdentity>> {
        if let Some(cached) = self.buffer.lock().await.users.get(&id) {
            return Ok(cached.clone());
        }

        let fetched = self.store.find_user(id).await?;
        let (data, version) = match fetched {
            Some(versioned) => (Some(versioned.data), versioned.version),
            None => (None, 0),
        };

        let mut buffer = self.buffer.lock().await;
        buffer.reads.entry(DocumentKey::User(id)).or_insert(version);
        Ok(buffer.users.entry(id).or_insert(data).clone())
    }

    /// Read a session, recording its version in the read set.
    pub async fn session(&self, id: Uuid) -> StorageResult<Option<Session>> {
        if let Some(cached) = self.buffer.lock().await.sessions.get(&id) {
            return Ok(cached.clone());
        }

        let fetched = self.store.find_session(id).await?;
        let (data, version) = match fetched {
            Some(versioned) => (Some(versioned.data), versioned.version),
            None => (None, 0),
        };

        let mut buffer = self.buffer.lock().await;
        buffer.reads.entry(DocumentKey::Session(id)).or_insert(version);
        Ok(buffer.sessions.entry(id).or_insert(data).clone())
    }

    /// Add the queue guard of `branch_id` to the read set so that any concurrent session write
    /// at that branch invalidates this transaction.
    pub async fn guard_branch(&self, branch_id: &str) -> StorageResult<()> {
        let key = DocumentKey::QueueGuard(branch_id.to_owned());
        if self.buffer.lock().await.reads.contains_key(&key) {
            return Ok(());
        }

        let version = self.store.guard_version(branch_id.to_owned()).await?;
        self.buffer.lock().await.reads.entry(key).or_insert(version);
        Ok(())
    }

    /// Buffer an insert or replacement of a user.
    pub async fn put_user(&self, user: UserIdentity) {
        let mut buffer = self.buffer.lock().await;
        buffer.users.insert(user.id, Some(user.clone()));
        buffer.writes.push(WriteOp::PutUser(user));
    }

    /// Buffer the deletion of a user.
    pub async fn delete_user(&self, id: Uuid) {
        let mut buffer = self.buffer.lock().await;
        buffer.users.insert(id, None);
        buffer.writes.push(WriteOp::DeleteUser(id));
    }

    /// Buffer an insert or replacement of a session.
    pub async fn put_session(&self, session: Session) {
        let mut buffer = self.buffer.lock().await;
        buffer.sessions.insert(session.id, Some(session.clone()));
        buffer.writes.push(WriteOp::PutSession(session));
    }

    /// Buffer the deletion of a session.
    pub async fn delete_session(&self, id: Uuid) {
        let mut buffer = self.buffer.lock().await;
        buffer.sessions.insert(id, None);
        buffer.writes.push(WriteOp::DeleteSession(id));
    }

    /// Hand the read set and buffered writes to the store.
    pub async fn commit(&self) -> StorageResult<()> {
        let request = {
            let mut buffer = self.buffer.lock().await;
            CommitRequest {
                reads: std::mem::take(&mut buffer.reads).into_iter().collect(),
                writes: std::mem::take(&mut buffer.writes),
            }
        };

        if request.writes.is_empty() {
            return Ok(());
        }
        self.store.commit(request).await
    }
}

/// Set of writes committed atomically without read-set validation.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an insert or replacement of a user.
    pub fn put_user(&mut self, user: UserIdentity) -> &mut Self {
        self.writes.push(WriteOp::PutUser(user));
        self
    }

    /// Queue a field-level update of a user.
    pub fn patch_user(&mut self, id: Uuid, patch: UserPatch) -> &mut Self {
        self.writes.push(WriteOp::PatchUser(id, patch));
        self
    }

    /// Queue the deletion of a user.
    pub fn delete_user(&mut self, id: Uuid) -> &mut Self {
        self.writes.push(WriteOp::DeleteUser(id));
        self
    }

    /// Queue a field-level update of a session.
    pub fn patch_session(&mut self, id: Uuid, patch: SessionPatch) -> &mut Self {
        self.writes.push(WriteOp::PatchSession(id, patch));
        self
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Apply every queued write atomically, without read-set validation.
    pub async fn commit(self, store: &dyn EntityStore) -> StorageResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        store
            .commit(CommitRequest {
                reads: Vec::new(),
                writes: self.writes,
            })
            .await
    }
}

/// How often and how patiently a conflicting transaction is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound of a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Jittered exponential delay before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_delay);
        let ceiling = exponential.as_millis().max(1) as u64;
        Duration::from_millis(rand::rng().random_range(ceiling / 2..=ceiling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        entity_store::memory::InMemoryEntityStore,
        models::{PlayStyle, UserStatus},
    };

    fn store() -> Arc<dyn EntityStore> {
        Arc::new(InMemoryEntityStore::new())
    }

    async fn seed_user(store: &Arc<dyn EntityStore>) -> UserIdentity {
        let user = UserIdentity::registered("ada".into(), "sisa".into(), 0, PlayStyle::Casual);
        let mut batch = WriteBatch::new();
        batch.put_user(user.clone());
        batch.commit(store.as_ref()).await.unwrap();
        user
    }

    #[tokio::test]
    async fn reads_see_own_writes() {
        let store = store();
        let user = seed_user(&store).await;

        let tx = Transaction::begin(store.clone());
        let mut loaded = tx.user(user.id).await.unwrap().unwrap();
        loaded.status = UserStatus::Waiting;
        tx.put_user(loaded).await;

        let again = tx.user(user.id).await.unwrap().unwrap();
        assert_eq!(again.status, UserStatus::Waiting);

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.data.status, UserStatus::Offline);

        tx.commit().await.unwrap();
        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.data.status, UserStatus::Waiting);
    }

    #[tokio::test]
    async fn concurrent_writer_invalidates_reader() {
        let store = store();
        let user = seed_user(&store).await;

        let slow = Transaction::begin(store.clone());
        let mut mine = slow.user(user.id).await.unwrap().unwrap();

        let fast = Transaction::begin(store.clone());
        let mut theirs = fast.user(user.id).await.unwrap().unwrap();
        theirs.username = "theirs".into();
        fast.put_user(theirs).await;
        fast.commit().await.unwrap();

        mine.username = "mine".into();
        slow.put_user(mine).await;
        assert!(slow.commit().await.unwrap_err().is_conflict());

        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.data.username, "theirs");
    }

    #[tokio::test]
    async fn guard_read_conflicts_with_session_write() {
        use crate::dao::models::{Seat, SessionType};

        let store = store();
        let user = seed_user(&store).await;

        let guarded = Transaction::begin(store.clone());
        guarded.guard_branch("sisa").await.unwrap();
        guarded.delete_user(Uuid::new_v4()).await;

        let writer = Transaction::begin(store.clone());
        writer
            .put_session(Session::open(
                "sisa".into(),
                SessionType::Solo,
                Seat {
                    user_id: user.id,
                    name: user.username.clone(),
                },
            ))
            .await;
        writer.commit().await.unwrap();

        assert!(guarded.commit().await.unwrap_err().is_conflict());
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..20 {
            let delay = policy.backoff(attempt);
            assert!(delay <= policy.max_delay);
        }
    }
}
