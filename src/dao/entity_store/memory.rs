//! In-process [`EntityStore`] used as the default backend and as the test fixture.

use std::{collections::HashMap, hash::Hash, sync::Arc};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    ChangeFeed, ChangeNotice, CommitRequest, DocumentKey, EntityStore, Resolved, SessionQuery,
    UserQuery, Versioned,
};
use crate::dao::{
    models::{Branch, Session, UserIdentity},
    storage::{StorageError, StorageResult},
};

const FEED_CAPACITY: usize = 64;

/// Storage slot keeping its version after deletion so a recreated document never reuses one.
#[derive(Debug, Clone)]
struct Slot<T> {
    version: u64,
    data: Option<T>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            version: 0,
            data: None,
        }
    }
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, Slot<UserIdentity>>,
    sessions: HashMap<Uuid, Slot<Session>>,
    guards: HashMap<String, u64>,
}

/// HashMap-backed store with optimistic commits serialized behind a single lock.
#[derive(Clone)]
pub struct InMemoryEntityStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    state: RwLock<MemoryState>,
    branches: DashMap<String, Branch>,
    feed: ChangeFeed,
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEntityStore {
    /// Create an empty store without any branch.
    pub fn new() -> Self {
        Self::with_branches(Vec::new())
    }

    /// Create a store whose read-only branch table holds `branches`.
    pub fn with_branches(branches: impl IntoIterator<Item = Branch>) -> Self {
        let table = DashMap::new();
        for branch in branches {
            table.insert(branch.branch_id.clone(), branch);
        }

        Self {
            inner: Arc::new(MemoryInner {
                state: RwLock::new(MemoryState::default()),
                branches: table,
                feed: ChangeFeed::new(FEED_CAPACITY),
            }),
        }
    }
}

fn read_slot<K, T>(slots: &HashMap<K, Slot<T>>, key: &K) -> Option<Versioned<T>>
where
    K: Eq + Hash,
    T: Clone,
{
    slots.get(key).and_then(|slot| {
        slot.data.clone().map(|data| Versioned {
            data,
            version: slot.version,
        })
    })
}

fn current<'a, K, T>(
    staged: &'a HashMap<K, Option<T>>,
    slots: &'a HashMap<K, Slot<T>>,
    key: &K,
) -> Option<&'a T>
where
    K: Eq + Hash,
{
    match staged.get(key) {
        Some(pending) => pending.as_ref(),
        None => slots.get(key).and_then(|slot| slot.data.as_ref()),
    }
}

impl MemoryState {
    fn version_of(&self, key: &DocumentKey) -> u64 {
        match key {
            DocumentKey::User(id) => self.users.get(id).map_or(0, |slot| slot.version),
            DocumentKey::Session(id) => self.sessions.get(id).map_or(0, |slot| slot.version),
            DocumentKey::QueueGuard(branch) => self.guards.get(branch).copied().unwrap_or(0),
        }
    }

    /// Validate the read set, stage every write, then apply them all or none.
    fn apply(&mut self, request: CommitRequest) -> StorageResult<ChangeNotice> {
        for (key, seen) in &request.reads {
            if self.version_of(key) != *seen {
                return Err(StorageError::Conflict { key: key.clone() });
            }
        }

        let mut staged_users: HashMap<Uuid, Option<UserIdentity>> = HashMap::new();
        let mut staged_sessions: HashMap<Uuid, Option<Session>> = HashMap::new();

        for op in &request.writes {
            match op.key() {
                DocumentKey::User(id) => {
                    let resolved = op.resolve_user(current(&staged_users, &self.users, &id))?;
                    match resolved {
                        Resolved::Write(user) => {
                            staged_users.insert(id, Some(user));
                        }
                        Resolved::Delete => {
                            staged_users.insert(id, None);
                        }
                        Resolved::Unchanged => {}
                    }
                }
                DocumentKey::Session(id) => {
                    let resolved =
                        op.resolve_session(current(&staged_sessions, &self.sessions, &id))?;
                    match resolved {
                        Resolved::Write(session) => {
                            staged_sessions.insert(id, Some(session));
                        }
                        Resolved::Delete => {
                            staged_sessions.insert(id, None);
                        }
                        Resolved::Unchanged => {}
                    }
                }
                DocumentKey::QueueGuard(_) => {}
            }
        }

        let mut notice = ChangeNotice::default();

        for (id, next) in staged_users {
            let slot = self.users.entry(id).or_default();
            notice.record_user(slot.data.as_ref(), next.as_ref());
            slot.version += 1;
            slot.data = next;
        }

        for (id, next) in staged_sessions {
            let slot = self.sessions.entry(id).or_default();
            for session in slot.data.iter().chain(next.iter()) {
                *self.guards.entry(session.branch_id.clone()).or_default() += 1;
            }
            notice.record_session(slot.data.as_ref(), next.as_ref());
            slot.version += 1;
            slot.data = next;
        }

        Ok(notice)
    }
}

impl EntityStore for InMemoryEntityStore {
    fn find_user(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<UserIdentity>>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            Ok(read_slot(&state.users, &id))
        })
    }

    fn find_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<Session>>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            Ok(read_slot(&state.sessions, &id))
        })
    }

    fn guard_version(&self, branch_id: String) -> BoxFuture<'static, StorageResult<u64>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            Ok(state.guards.get(&branch_id).copied().unwrap_or(0))
        })
    }

    fn find_branch(&self, branch_id: String) -> BoxFuture<'static, StorageResult<Option<Branch>>> {
        let branch = self
            .inner
            .branches
            .get(&branch_id)
            .map(|entry| entry.value().clone());
        Box::pin(async move { Ok(branch) })
    }

    fn query_users(
        &self,
        query: UserQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<UserIdentity>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            let mut users: Vec<UserIdentity> = state
                .users
                .values()
                .filter_map(|slot| slot.data.as_ref())
                .filter(|user| query.matches(user))
                .cloned()
                .collect();
            users.sort_by_key(|user| (user.created_at, user.id));
            Ok(users)
        })
    }

    fn query_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<Session>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let state = inner.state.read().await;
            let mut sessions: Vec<Session> = state
                .sessions
                .values()
                .filter_map(|slot| slot.data.as_ref())
                .filter(|session| query.matches(session))
                .cloned()
                .collect();
            sessions.sort_by_key(|session| (session.created_at, session.id));
            Ok(sessions)
        })
    }

    fn commit(&self, request: CommitRequest) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let notice = {
                let mut state = inner.state.write().await;
                state.apply(request)?
            };
            inner.feed.publish(notice);
            Ok(())
        })
    }

    fn changes(&self) -> broadcast::Receiver<ChangeNotice> {
        self.inner.feed.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::{
        entity_store::{UserPatch, WriteOp},
        models::{PlayStyle, Seat, SessionType, UserStatus},
    };

    fn user(name: &str) -> UserIdentity {
        UserIdentity::registered(name.into(), "sisa".into(), 0, PlayStyle::Casual)
    }

    fn put(op: WriteOp) -> CommitRequest {
        CommitRequest {
            reads: Vec::new(),
            writes: vec![op],
        }
    }

    #[tokio::test]
    async fn stale_read_version_conflicts() {
        let store = InMemoryEntityStore::new();
        let ada = user("ada");
        store.commit(put(WriteOp::PutUser(ada.clone()))).await.unwrap();

        let seen = store.find_user(ada.id).await.unwrap().unwrap();
        assert_eq!(seen.version, 1);

        let mut renamed = ada.clone();
        renamed.username = "ada2".into();
        store.commit(put(WriteOp::PutUser(renamed))).await.unwrap();

        let err = store
            .commit(CommitRequest {
                reads: vec![(DocumentKey::User(ada.id), seen.version)],
                writes: vec![WriteOp::DeleteUser(ada.id)],
            })
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.find_user(ada.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_write_commits_nothing() {
        let store = InMemoryEntityStore::new();
        let ada = user("ada");
        let err = store
            .commit(CommitRequest {
                reads: Vec::new(),
                writes: vec![
                    WriteOp::PutUser(ada.clone()),
                    WriteOp::PatchUser(Uuid::new_v4(), UserPatch::unseat()),
                ],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::MissingDocument { .. }));
        assert!(store.find_user(ada.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn session_writes_bump_branch_guard_and_notify() {
        let store = InMemoryEntityStore::new();
        let mut changes = store.changes();
        let ada = user("ada");
        let session = Session::open(
            "sisa".into(),
            SessionType::Solo,
            Seat {
                user_id: ada.id,
                name: ada.username.clone(),
            },
        );

        assert_eq!(store.guard_version("sisa".into()).await.unwrap(), 0);
        store.commit(put(WriteOp::PutSession(session.clone()))).await.unwrap();
        assert_eq!(store.guard_version("sisa".into()).await.unwrap(), 1);
        assert_eq!(store.guard_version("jamal".into()).await.unwrap(), 0);

        let notice = changes.recv().await.unwrap();
        assert!(notice.touches_sessions_at("sisa"));
        assert!(!notice.users);
    }

    #[tokio::test]
    async fn deleted_documents_keep_their_version() {
        let store = InMemoryEntityStore::new();
        let ada = user("ada");
        store.commit(put(WriteOp::PutUser(ada.clone()))).await.unwrap();
        store.commit(put(WriteOp::DeleteUser(ada.id))).await.unwrap();
        store.commit(put(WriteOp::PutUser(ada.clone()))).await.unwrap();

        let seen = store.find_user(ada.id).await.unwrap().unwrap();
        assert_eq!(seen.version, 3);
    }

    #[tokio::test]
    async fn queries_return_oldest_first() {
        let store = InMemoryEntityStore::new();
        let mut first = user("first");
        first.status = UserStatus::Waiting;
        let mut second = user("second");
        second.status = UserStatus::Waiting;
        second.created_at = first.created_at + std::time::Duration::from_secs(1);

        store.commit(put(WriteOp::PutUser(second.clone()))).await.unwrap();
        store.commit(put(WriteOp::PutUser(first.clone()))).await.unwrap();

        let waiting = store.query_users(UserQuery::waiting_at("sisa")).await.unwrap();
        let names: Vec<_> = waiting.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["first", "second"]);
    }
}
