mod feed;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::{collections::BTreeSet, fmt, time::SystemTime};

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::{
    models::{Branch, Session, SessionStatus, SessionType, UserIdentity, UserStatus},
    storage::{StorageError, StorageResult},
};

pub use self::feed::ChangeFeed;

/// Abstraction over the document store holding users, sessions and branches.
///
/// Reads return the document together with its version; [`EntityStore::commit`] applies a
/// set of writes atomically after checking that every recorded read version is unchanged.
pub trait EntityStore: Send + Sync {
    /// Read a user together with its version.
    fn find_user(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<UserIdentity>>>>;
    /// Read a session together with its version.
    fn find_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Versioned<Session>>>>;
    /// Current version of the queue guard of a branch (zero when never written).
    fn guard_version(&self, branch_id: String) -> BoxFuture<'static, StorageResult<u64>>;
    /// Read a branch; branches are never written through this trait.
    fn find_branch(&self, branch_id: String) -> BoxFuture<'static, StorageResult<Option<Branch>>>;
    /// Users matching the query, oldest first.
    fn query_users(&self, query: UserQuery) -> BoxFuture<'static, StorageResult<Vec<UserIdentity>>>;
    /// Sessions matching the query, oldest first.
    fn query_sessions(
        &self,
        query: SessionQuery,
    ) -> BoxFuture<'static, StorageResult<Vec<Session>>>;
    /// Validate the read set and apply the writes atomically.
    fn commit(&self, request: CommitRequest) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to notices emitted after every successful commit.
    fn changes(&self) -> broadcast::Receiver<ChangeNotice>;
    /// Cheap round trip proving the backend is reachable.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Address of a version-tracked document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DocumentKey {
    /// A document of the `users` collection.
    User(Uuid),
    /// A document of the `queue` collection.
    Session(Uuid),
    /// Virtual document bumped on every session write of the branch.
    QueueGuard(String),
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentKey::User(id) => write!(f, "user `{id}`"),
            DocumentKey::Session(id) => write!(f, "session `{id}`"),
            DocumentKey::QueueGuard(branch) => write!(f, "queue guard of branch `{branch}`"),
        }
    }
}

/// A document together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Document content.
    pub data: T,
    /// Version observed when the document was read.
    pub version: u64,
}

/// Field-level update of a user document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    /// New status.
    pub status: Option<UserStatus>,
    /// New queue link; `Some(None)` clears it.
    pub current_queue_id: Option<Option<Uuid>>,
    /// New branch.
    pub branch_id: Option<String>,
    /// Only touch the user while it is still seated in this session. Users that moved on or
    /// no longer exist are skipped instead of failing the commit.
    pub only_in_session: Option<Uuid>,
}

impl UserPatch {
    /// Seat the user in a session with the given busy status.
    pub fn seat(session_id: Uuid, status: UserStatus) -> Self {
        Self {
            status: Some(status),
            current_queue_id: Some(Some(session_id)),
            ..Self::default()
        }
    }

    /// Send the user back to the waiting pool.
    pub fn unseat() -> Self {
        Self {
            status: Some(UserStatus::Waiting),
            current_queue_id: Some(None),
            ..Self::default()
        }
    }

    fn apply(&self, user: &mut UserIdentity) {
        if let Some(status) = self.status {
            user.status = status;
        }
        if let Some(link) = self.current_queue_id {
            user.current_queue_id = link;
        }
        if let Some(branch_id) = &self.branch_id {
            user.branch_id = branch_id.clone();
        }
    }
}

/// Field-level update of a session document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New status.
    pub status: Option<SessionStatus>,
    /// Start timestamp to set.
    pub started_at: Option<SystemTime>,
    /// End timestamp to set.
    pub ended_at: Option<SystemTime>,
    /// Leave the session untouched when it already has this status.
    pub skip_if_status: Option<SessionStatus>,
}

impl SessionPatch {
    fn apply(&self, session: &mut Session) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(started_at) = self.started_at {
            session.started_at = Some(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            session.ended_at = Some(ended_at);
        }
    }
}

/// A single buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace a user.
    PutUser(UserIdentity),
    /// Update selected fields of an existing user.
    PatchUser(Uuid, UserPatch),
    /// Remove a user.
    DeleteUser(Uuid),
    /// Insert or replace a session.
    PutSession(Session),
    /// Update selected fields of an existing session.
    PatchSession(Uuid, SessionPatch),
    /// Remove a session.
    DeleteSession(Uuid),
}

/// Outcome of resolving a write against the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved<T> {
    /// Store this document.
    Write(T),
    /// Remove the document.
    Delete,
    /// Leave the document as it is.
    Unchanged,
}

impl WriteOp {
    /// Document targeted by this mutation.
    pub fn key(&self) -> DocumentKey {
        match self {
            WriteOp::PutUser(user) => DocumentKey::User(user.id),
            WriteOp::PatchUser(id, _) | WriteOp::DeleteUser(id) => DocumentKey::User(*id),
            WriteOp::PutSession(session) => DocumentKey::Session(session.id),
            WriteOp::PatchSession(id, _) | WriteOp::DeleteSession(id) => DocumentKey::Session(*id),
        }
    }

    /// Compute the new state of a user document, validating the result.
    pub fn resolve_user(
        &self,
        current: Option<&UserIdentity>,
    ) -> StorageResult<Resolved<UserIdentity>> {
        let resolved = match (self, current) {
            (WriteOp::PutUser(user), _) => Resolved::Write(user.clone()),
            (WriteOp::DeleteUser(_), Some(_)) => Resolved::Delete,
            (WriteOp::DeleteUser(_), None) => Resolved::Unchanged,
            (WriteOp::PatchUser(_, patch), Some(user)) => match patch.only_in_session {
                Some(session_id) if user.current_queue_id != Some(session_id) => {
                    Resolved::Unchanged
                }
                _ => {
                    let mut next = user.clone();
                    patch.apply(&mut next);
                    Resolved::Write(next)
                }
            },
            (WriteOp::PatchUser(_, patch), None) if patch.only_in_session.is_some() => {
                Resolved::Unchanged
            }
            (op, _) => return Err(StorageError::MissingDocument { key: op.key() }),
        };

        if let Resolved::Write(user) = &resolved {
            user.validate()?;
        }
        Ok(resolved)
    }

    /// Compute the new state of a session document, validating the result.
    pub fn resolve_session(&self, current: Option<&Session>) -> StorageResult<Resolved<Session>> {
        let resolved = match (self, current) {
            (WriteOp::PutSession(session), _) => Resolved::Write(session.clone()),
            (WriteOp::DeleteSession(_), Some(_)) => Resolved::Delete,
            (WriteOp::DeleteSession(_), None) => Resolved::Unchanged,
            (WriteOp::PatchSession(_, patch), Some(session)) => {
                if patch.skip_if_status == Some(session.status) {
                    Resolved::Unchanged
                } else {
                    let mut next = session.clone();
                    patch.apply(&mut next);
                    Resolved::Write(next)
                }
            }
            (op, _) => return Err(StorageError::MissingDocument { key: op.key() }),
        };

        if let Resolved::Write(session) = &resolved {
            session.validate()?;
        }
        Ok(resolved)
    }
}

/// Everything a transaction or batch hands to the store at commit time.
#[derive(Debug, Clone, Default)]
pub struct CommitRequest {
    /// Documents read by the transaction with the version observed.
    pub reads: Vec<(DocumentKey, u64)>,
    /// Mutations to apply atomically, in order.
    pub writes: Vec<WriteOp>,
}

/// Notification describing which collections and branches a commit touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotice {
    /// Some user document changed.
    pub users: bool,
    /// Some session document changed.
    pub sessions: bool,
    /// Branches of every document before and after the change.
    pub branches: BTreeSet<String>,
}

impl ChangeNotice {
    /// Record a user transition from `before` to `after`.
    pub fn record_user(&mut self, before: Option<&UserIdentity>, after: Option<&UserIdentity>) {
        self.users = true;
        for user in before.into_iter().chain(after) {
            self.branches.insert(user.branch_id.clone());
        }
    }

    /// Record a session transition from `before` to `after`.
    pub fn record_session(&mut self, before: Option<&Session>, after: Option<&Session>) {
        self.sessions = true;
        for session in before.into_iter().chain(after) {
            self.branches.insert(session.branch_id.clone());
        }
    }

    /// Whether the commit touched nothing.
    pub fn is_empty(&self) -> bool {
        !self.users && !self.sessions
    }

    /// Whether a user of `branch_id` changed.
    pub fn touches_users_at(&self, branch_id: &str) -> bool {
        self.users && self.branches.contains(branch_id)
    }

    /// Whether a session of `branch_id` changed.
    pub fn touches_sessions_at(&self, branch_id: &str) -> bool {
        self.sessions && self.branches.contains(branch_id)
    }
}

/// Filter over the `users` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserQuery {
    /// Required status.
    pub status: Option<UserStatus>,
    /// Required branch.
    pub branch_id: Option<String>,
    /// Required sponsoring host.
    pub added_by: Option<Uuid>,
}

impl UserQuery {
    /// The waiting list of a branch.
    pub fn waiting_at(branch_id: &str) -> Self {
        Self {
            status: Some(UserStatus::Waiting),
            branch_id: Some(branch_id.to_owned()),
            ..Self::default()
        }
    }

    /// Every guest sponsored by `host`.
    pub fn guests_of(host: Uuid) -> Self {
        Self {
            added_by: Some(host),
            ..Self::default()
        }
    }

    /// Whether `user` passes the filter.
    pub fn matches(&self, user: &UserIdentity) -> bool {
        self.status.is_none_or(|status| user.status == status)
            && self
                .branch_id
                .as_deref()
                .is_none_or(|branch| user.branch_id == branch)
            && self.added_by.is_none_or(|host| user.added_by == Some(host))
    }
}

/// Filter over the `queue` collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionQuery {
    /// Required branch.
    pub branch_id: Option<String>,
    /// Accepted statuses; empty accepts every status.
    pub statuses: Vec<SessionStatus>,
    /// Required session type.
    pub kind: Option<SessionType>,
    /// Required number of seated players.
    pub player_count: Option<usize>,
}

impl SessionQuery {
    /// Sessions of a branch in the given status.
    pub fn with_status(branch_id: &str, status: SessionStatus) -> Self {
        Self {
            branch_id: Some(branch_id.to_owned()),
            statuses: vec![status],
            ..Self::default()
        }
    }

    /// The live queue of a branch: queued and playing sessions.
    pub fn active_at(branch_id: &str) -> Self {
        Self {
            branch_id: Some(branch_id.to_owned()),
            statuses: vec![SessionStatus::Queued, SessionStatus::Playing],
            ..Self::default()
        }
    }

    /// Queued sync sessions that still have a free seat.
    pub fn open_sync_at(branch_id: &str) -> Self {
        Self {
            branch_id: Some(branch_id.to_owned()),
            statuses: vec![SessionStatus::Queued],
            kind: Some(SessionType::Sync),
            player_count: Some(1),
        }
    }

    /// Playing sessions across every branch.
    pub fn playing_anywhere() -> Self {
        Self {
            statuses: vec![SessionStatus::Playing],
            ..Self::default()
        }
    }

    /// Whether `session` passes the filter.
    pub fn matches(&self, session: &Session) -> bool {
        self.branch_id
            .as_deref()
            .is_none_or(|branch| session.branch_id == branch)
            && (self.statuses.is_empty() || self.statuses.contains(&session.status))
            && self.kind.is_none_or(|kind| session.kind == kind)
            && self
                .player_count
                .is_none_or(|count| session.player_count() == count)
    }
}
