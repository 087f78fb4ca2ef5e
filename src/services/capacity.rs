//! Cabinet capacity lookups and the planning reads taken before admitting a player.

use tracing::warn;
use uuid::Uuid;

use crate::dao::{
    entity_store::{EntityStore, SessionQuery},
    models::{Session, SessionStatus, SessionType},
    storage::StorageResult,
};

/// Number of cabinets of a branch; one when the branch is unknown or unreadable.
pub async fn cabinet_count(store: &dyn EntityStore, branch_id: &str) -> u32 {
    match store.find_branch(branch_id.to_owned()).await {
        Ok(Some(branch)) => branch.capacity(),
        Ok(None) => {
            warn!(branch_id, "branch not found; assuming a single cabinet");
            1
        }
        Err(err) => {
            warn!(branch_id, error = %err, "failed to read branch; assuming a single cabinet");
            1
        }
    }
}

/// Sessions currently holding a cabinet.
pub fn busy_cabs(sessions: &[Session]) -> usize {
    sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Playing)
        .count()
}

/// Earliest queued sync session still waiting for its second player.
pub fn sync_candidate(sessions: &[Session]) -> Option<&Session> {
    sessions.iter().find(|session| {
        session.status == SessionStatus::Queued
            && session.kind == SessionType::Sync
            && session.player_count() == 1
    })
}

/// Snapshot of a branch queue used to decide where a joiner lands.
#[derive(Debug, Clone)]
pub struct AdmissionPlan {
    /// Cabinets of the branch.
    pub capacity: u32,
    /// Sessions currently playing.
    pub busy: usize,
    /// Queued sessions of the branch, oldest first.
    pub queued: Vec<Session>,
    /// Oldest queued sync session with a free seat.
    pub candidate: Option<Uuid>,
}

impl AdmissionPlan {
    /// Build a plan from the live (queued and playing) sessions of a branch, oldest first.
    pub fn from_sessions(capacity: u32, sessions: Vec<Session>) -> Self {
        let busy = busy_cabs(&sessions);
        let candidate = sync_candidate(&sessions).map(|session| session.id);
        let queued = sessions
            .into_iter()
            .filter(|session| session.status == SessionStatus::Queued)
            .collect();
        Self {
            capacity,
            busy,
            queued,
            candidate,
        }
    }

    /// At least one cabinet is not playing a session.
    pub fn cabinet_free(&self) -> bool {
        self.busy < self.capacity as usize
    }

    /// No session is waiting in line.
    pub fn line_empty(&self) -> bool {
        self.queued.is_empty()
    }

    /// No queued session other than `session` was created before it.
    pub fn line_clear_ahead_of(&self, session: &Session) -> bool {
        self.queued
            .iter()
            .filter(|queued| queued.id != session.id)
            .all(|queued| (queued.created_at, queued.id) > (session.created_at, session.id))
    }

    /// Oldest queued session, the next one to get a cabinet.
    pub fn head(&self) -> Option<&Session> {
        self.queued.first()
    }
}

/// Read the branch queue and capacity needed to admit a joiner.
pub async fn plan_admission(
    store: &dyn EntityStore,
    branch_id: &str,
    capacity: u32,
) -> StorageResult<AdmissionPlan> {
    let sessions = store
        .query_sessions(SessionQuery::active_at(branch_id))
        .await?;
    Ok(AdmissionPlan::from_sessions(capacity, sessions))
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::dao::{
        entity_store::memory::InMemoryEntityStore,
        models::{Branch, Seat},
    };

    fn session(kind: SessionType, players: usize, offset_secs: u64) -> Session {
        let mut session = Session::open(
            "sisa".into(),
            kind,
            Seat {
                user_id: Uuid::new_v4(),
                name: "p1".into(),
            },
        );
        for n in 1..players {
            session.seats.push(Seat {
                user_id: Uuid::new_v4(),
                name: format!("p{}", n + 1),
            });
        }
        session.created_at += Duration::from_secs(offset_secs);
        session
    }

    #[test]
    fn candidate_is_the_oldest_half_full_sync_session() {
        let full = session(SessionType::Sync, 2, 0);
        let solo = session(SessionType::Solo, 1, 1);
        let older = session(SessionType::Sync, 1, 2);
        let newer = session(SessionType::Sync, 1, 3);
        let mut playing = session(SessionType::Sync, 1, 4);
        playing.start(playing.created_at);

        let sessions = vec![full, solo, older.clone(), newer, playing];
        assert_eq!(busy_cabs(&sessions), 1);
        assert_eq!(sync_candidate(&sessions).map(|s| s.id), Some(older.id));
    }

    #[test]
    fn line_ahead_only_counts_older_queued_sessions() {
        let first = session(SessionType::Sync, 1, 0);
        let second = session(SessionType::Solo, 1, 5);
        let plan = AdmissionPlan::from_sessions(1, vec![first.clone(), second.clone()]);

        assert!(!plan.line_empty());
        assert!(plan.cabinet_free());
        assert!(plan.line_clear_ahead_of(&first));
        assert!(!plan.line_clear_ahead_of(&second));
        assert_eq!(plan.head().map(|s| s.id), Some(first.id));
    }

    #[tokio::test]
    async fn unknown_branch_defaults_to_one_cabinet() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::with_branches([Branch {
            branch_id: "jamal".into(),
            name: "SM Jmall".into(),
            cabinet_count: Some(2),
            open: true,
        }]));

        assert_eq!(cabinet_count(store.as_ref(), "jamal").await, 2);
        assert_eq!(cabinet_count(store.as_ref(), "nowhere").await, 1);
    }
}
