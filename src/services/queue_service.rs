use std::time::SystemTime;

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        models::{Seat, Session, SessionStatus, SessionType, UserIdentity, UserStatus},
        transaction::Transaction,
    },
    error::ServiceError,
    services::capacity::{AdmissionPlan, cabinet_count, plan_admission},
    state::{SharedState, transaction::run_transaction},
};

/// Where a joiner ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Session the joiner was seated in.
    pub session: Session,
    /// `playing` when the session started right away, `in_queue` otherwise.
    pub status: UserStatus,
}

/// Outcome of leaving a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Identities sent back to the waiting pool, the leaver first.
    pub removed: Vec<Uuid>,
    /// The session lost its last player and was deleted.
    pub session_deleted: bool,
}

pub(crate) async fn require_user(
    tx: &Transaction,
    id: Uuid,
) -> Result<UserIdentity, ServiceError> {
    tx.user(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user `{id}`")))
}

pub(crate) async fn require_session(
    tx: &Transaction,
    id: Uuid,
) -> Result<Session, ServiceError> {
    tx.session(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}`")))
}

/// Admit a waiting identity into the queue of `branch_id`.
///
/// A sync joiner fills the oldest half-full sync session when one is still open at commit time,
/// otherwise a new session is opened. The session starts right away only when a cabinet is free
/// and nobody queued earlier is waiting.
pub async fn join_queue(
    state: &SharedState,
    user_id: Uuid,
    branch_id: &str,
    mode: SessionType,
) -> Result<Admission, ServiceError> {
    let store = state.require_store().await?;
    let capacity = cabinet_count(store.as_ref(), branch_id).await;

    let admission = run_transaction(&store, &state.rules().retry, "join_queue", |tx| async move {
        tx.guard_branch(branch_id).await?;
        let plan = plan_admission(tx.store().as_ref(), branch_id, capacity).await?;
        let user = require_user(&tx, user_id).await?;
        admit(&tx, user, branch_id, mode, &plan).await
    })
    .await?;

    info!(
        %user_id,
        branch_id,
        session_id = %admission.session.id,
        status = ?admission.status,
        "user joined the queue"
    );
    Ok(admission)
}

/// Transactional body of an admission: seat `user` according to `plan`.
///
/// The caller must have read the branch queue guard before taking the plan.
pub(crate) async fn admit(
    tx: &Transaction,
    mut user: UserIdentity,
    branch_id: &str,
    mode: SessionType,
    plan: &AdmissionPlan,
) -> Result<Admission, ServiceError> {
    if user.status != UserStatus::Waiting {
        return Err(ServiceError::IllegalTransition(format!(
            "user `{}` must be waiting to join the queue (currently {:?})",
            user.id, user.status
        )));
    }

    let now = SystemTime::now();
    let seat = Seat {
        user_id: user.id,
        name: user.username.clone(),
    };
    user.branch_id = branch_id.to_owned();

    if mode == SessionType::Sync
        && let Some(candidate_id) = plan.candidate
        && let Some(mut session) = tx.session(candidate_id).await?
        && session.status == SessionStatus::Queued
        && session.has_open_seat()
        && !session.contains(user.id)
    {
        let start = plan.cabinet_free() && plan.line_clear_ahead_of(&session);
        let status = if start {
            session.start(now);
            for partner_id in session.player_ids() {
                let mut partner = require_user(tx, partner_id).await?;
                partner.seat(session.id, UserStatus::Playing);
                tx.put_user(partner).await;
            }
            UserStatus::Playing
        } else {
            UserStatus::InQueue
        };

        session.seats.push(seat);
        user.seat(session.id, status);
        tx.put_session(session.clone()).await;
        tx.put_user(user).await;
        return Ok(Admission { session, status });
    }

    let mut session = Session::open(branch_id.to_owned(), mode, seat);
    let status = if mode == SessionType::Solo && plan.cabinet_free() && plan.line_empty() {
        session.start(now);
        UserStatus::Playing
    } else {
        UserStatus::InQueue
    };

    user.seat(session.id, status);
    tx.put_session(session.clone()).await;
    tx.put_user(user).await;
    Ok(Admission { session, status })
}

/// Remove an identity from a queued or playing session together with every guest it brought
/// into that session.
///
/// The leaver must still be linked to the session. Everyone removed goes back to the waiting
/// pool; a session left without players is deleted. Finished sessions are kept as history.
pub async fn leave_queue(
    state: &SharedState,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<Departure, ServiceError> {
    let store = state.require_store().await?;

    let departure = run_transaction(&store, &state.rules().retry, "leave_queue", |tx| async move {
        let mut session = require_session(&tx, session_id).await?;
        let user = require_user(&tx, user_id).await?;
        if !session.is_active() {
            return Err(ServiceError::IllegalTransition(format!(
                "session `{session_id}` is {:?} and can no longer be left",
                session.status
            )));
        }
        if !session.contains(user_id) || user.current_queue_id != Some(session_id) {
            return Err(ServiceError::IllegalTransition(format!(
                "user `{user_id}` is not part of session `{session_id}`"
            )));
        }

        let mut removed = vec![user_id];
        for player_id in session.player_ids() {
            if player_id == user_id {
                continue;
            }
            if let Some(player) = tx.user(player_id).await?
                && player.added_by == Some(user_id)
                && player.current_queue_id == Some(session_id)
            {
                removed.push(player_id);
            }
        }

        session.remove_players(&removed);
        let session_deleted = session.seats.is_empty();
        if session_deleted {
            tx.delete_session(session_id).await;
        } else {
            tx.put_session(session).await;
        }

        for id in &removed {
            if let Some(mut player) = tx.user(*id).await? {
                player.unseat();
                tx.put_user(player).await;
            }
        }

        Ok(Departure {
            removed,
            session_deleted,
        })
    })
    .await?;

    info!(
        %user_id,
        %session_id,
        removed = departure.removed.len(),
        session_deleted = departure.session_deleted,
        "user left the queue"
    );
    Ok(departure)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::entity_store::{EntityStore, SessionQuery},
        services::lifecycle_service::finish_game,
        state::test_support::{memory_state, waiting_user},
    };

    async fn stored_user(state: &SharedState, id: Uuid) -> UserIdentity {
        let store = state.require_store().await.unwrap();
        store.find_user(id).await.unwrap().unwrap().data
    }

    async fn stored_session(state: &SharedState, id: Uuid) -> Option<Session> {
        let store = state.require_store().await.unwrap();
        store.find_session(id).await.unwrap().map(|versioned| versioned.data)
    }

    #[tokio::test]
    async fn solo_joiner_on_idle_branch_starts_playing() {
        let state = memory_state().await;
        let ada = waiting_user(&state, "ada", "sisa").await;

        let admission = join_queue(&state, ada.id, "sisa", SessionType::Solo)
            .await
            .unwrap();

        assert_eq!(admission.status, UserStatus::Playing);
        assert_eq!(admission.session.status, SessionStatus::Playing);
        assert!(admission.session.started_at.is_some());
        let stored = stored_user(&state, ada.id).await;
        assert_eq!(stored.current_queue_id, Some(admission.session.id));
        assert_eq!(stored.status, UserStatus::Playing);
    }

    #[tokio::test]
    async fn only_waiting_users_may_join() {
        let state = memory_state().await;
        let ada = waiting_user(&state, "ada", "sisa").await;
        join_queue(&state, ada.id, "sisa", SessionType::Solo)
            .await
            .unwrap();

        let err = join_queue(&state, ada.id, "sisa", SessionType::Solo)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));

        let err = join_queue(&state, Uuid::new_v4(), "sisa", SessionType::Solo)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn sync_pair_fills_then_starts_together() {
        let state = memory_state().await;
        let a = waiting_user(&state, "a", "sisa").await;
        let b = waiting_user(&state, "b", "sisa").await;

        let first = join_queue(&state, a.id, "sisa", SessionType::Sync)
            .await
            .unwrap();
        assert_eq!(first.session.status, SessionStatus::Queued);
        assert_eq!(first.status, UserStatus::InQueue);

        let second = join_queue(&state, b.id, "sisa", SessionType::Sync)
            .await
            .unwrap();
        assert_eq!(second.session.id, first.session.id);
        assert_eq!(second.session.player_count(), 2);
        assert_eq!(second.session.player_names(), ["a", "b"]);
        assert_eq!(second.session.status, SessionStatus::Playing);
        assert_eq!(second.status, UserStatus::Playing);

        assert_eq!(stored_user(&state, a.id).await.status, UserStatus::Playing);
        assert_eq!(stored_user(&state, b.id).await.status, UserStatus::Playing);
    }

    #[tokio::test]
    async fn new_joiner_queues_behind_waiting_head() {
        let state = memory_state().await;
        let a = waiting_user(&state, "a", "sisa").await;
        let c = waiting_user(&state, "c", "sisa").await;
        let d = waiting_user(&state, "d", "sisa").await;

        let playing = join_queue(&state, a.id, "sisa", SessionType::Solo)
            .await
            .unwrap();
        assert_eq!(playing.status, UserStatus::Playing);
        let queued = join_queue(&state, c.id, "sisa", SessionType::Solo)
            .await
            .unwrap();
        assert_eq!(queued.status, UserStatus::InQueue);

        // The cabinet frees up while C is still queued.
        leave_queue(&state, a.id, playing.session.id).await.unwrap();

        let late = join_queue(&state, d.id, "sisa", SessionType::Solo)
            .await
            .unwrap();
        assert_eq!(late.status, UserStatus::InQueue);
        assert_eq!(late.session.status, SessionStatus::Queued);
    }

    #[tokio::test]
    async fn full_candidate_falls_through_to_a_new_session() {
        let state = memory_state().await;
        let a = waiting_user(&state, "a", "jamal").await;
        let b = waiting_user(&state, "b", "jamal").await;
        let c = waiting_user(&state, "c", "jamal").await;

        let first = join_queue(&state, a.id, "jamal", SessionType::Sync)
            .await
            .unwrap();
        let stale_plan = {
            let store = state.require_store().await.unwrap();
            plan_admission(store.as_ref(), "jamal", 2).await.unwrap()
        };
        assert_eq!(stale_plan.candidate, Some(first.session.id));

        join_queue(&state, b.id, "jamal", SessionType::Sync)
            .await
            .unwrap();

        // Admit with the plan taken before the candidate filled up.
        let store = state.require_store().await.unwrap();
        let c_id = c.id;
        let admission = run_transaction(&store, &state.rules().retry, "test", |tx| {
            let plan = stale_plan.clone();
            async move {
                let user = require_user(&tx, c_id).await?;
                admit(&tx, user, "jamal", SessionType::Sync, &plan).await
            }
        })
        .await
        .unwrap();

        assert_ne!(admission.session.id, first.session.id);
        assert_eq!(admission.session.player_count(), 1);
        let full = stored_session(&state, first.session.id).await.unwrap();
        assert_eq!(full.player_count(), 2);
    }

    #[tokio::test]
    async fn host_leaving_takes_owned_guest_and_deletes_session() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "sisa").await;
        let store = state.require_store().await.unwrap();

        let guest =
            UserIdentity::guest(host.id, "guest".into(), "sisa".into(), UserStatus::Waiting);
        let mut session = Session::open(
            "sisa".into(),
            SessionType::Sync,
            Seat {
                user_id: host.id,
                name: "host".into(),
            },
        );
        session.seats.push(Seat {
            user_id: guest.id,
            name: "guest".into(),
        });
        let mut seated_host = host.clone();
        seated_host.seat(session.id, UserStatus::InQueue);
        let mut seated_guest = guest.clone();
        seated_guest.seat(session.id, UserStatus::InQueue);

        let tx = Transaction::begin(store.clone());
        tx.put_session(session.clone()).await;
        tx.put_user(seated_host).await;
        tx.put_user(seated_guest).await;
        tx.commit().await.unwrap();

        let departure = leave_queue(&state, host.id, session.id).await.unwrap();
        assert!(departure.session_deleted);
        assert_eq!(departure.removed, vec![host.id, guest.id]);
        assert!(stored_session(&state, session.id).await.is_none());

        for id in [host.id, guest.id] {
            let user = stored_user(&state, id).await;
            assert_eq!(user.status, UserStatus::Waiting);
            assert_eq!(user.current_queue_id, None);
        }
    }

    #[tokio::test]
    async fn partner_leaving_shrinks_the_session() {
        let state = memory_state().await;
        let a = waiting_user(&state, "a", "jamal").await;
        let b = waiting_user(&state, "b", "jamal").await;
        let joined = join_queue(&state, a.id, "jamal", SessionType::Sync)
            .await
            .unwrap();
        join_queue(&state, b.id, "jamal", SessionType::Sync)
            .await
            .unwrap();

        let departure = leave_queue(&state, a.id, joined.session.id).await.unwrap();
        assert!(!departure.session_deleted);
        assert_eq!(departure.removed, vec![a.id]);

        let remaining = stored_session(&state, joined.session.id).await.unwrap();
        assert_eq!(remaining.player_ids(), vec![b.id]);
        assert_eq!(remaining.player_names(), ["b"]);
        assert_eq!(stored_user(&state, a.id).await.status, UserStatus::Waiting);
        assert_eq!(stored_user(&state, b.id).await.status, UserStatus::Playing);
    }

    #[tokio::test]
    async fn leaving_a_foreign_session_is_rejected() {
        let state = memory_state().await;
        let a = waiting_user(&state, "a", "sisa").await;
        let b = waiting_user(&state, "b", "sisa").await;
        let joined = join_queue(&state, a.id, "sisa", SessionType::Solo)
            .await
            .unwrap();

        let err = leave_queue(&state, b.id, joined.session.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));
        let err = leave_queue(&state, a.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn finished_sessions_cannot_be_left() {
        let state = memory_state().await;
        let a = waiting_user(&state, "a", "sisa").await;
        let first = join_queue(&state, a.id, "sisa", SessionType::Solo)
            .await
            .unwrap();
        finish_game(&state, first.session.id, &[a.id]).await.unwrap();
        let second = join_queue(&state, a.id, "sisa", SessionType::Solo)
            .await
            .unwrap();
        assert_eq!(second.status, UserStatus::Playing);

        let err = leave_queue(&state, a.id, first.session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));

        let finished = stored_session(&state, first.session.id).await.unwrap();
        assert_eq!(finished.status, SessionStatus::Completed);
        let user = stored_user(&state, a.id).await;
        assert_eq!(user.status, UserStatus::Playing);
        assert_eq!(user.current_queue_id, Some(second.session.id));
        let live = stored_session(&state, second.session.id).await.unwrap();
        assert!(live.contains(a.id));
    }

    #[tokio::test]
    async fn leaver_must_still_be_linked_to_the_session() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "jamal").await;
        let store = state.require_store().await.unwrap();

        // The guest already moved on to another session but still appears in the old one.
        let elsewhere = Uuid::new_v4();
        let mut guest =
            UserIdentity::guest(host.id, "guest".into(), "jamal".into(), UserStatus::Waiting);
        guest.seat(elsewhere, UserStatus::InQueue);
        let mut session = Session::open(
            "jamal".into(),
            SessionType::Sync,
            Seat {
                user_id: host.id,
                name: "host".into(),
            },
        );
        session.seats.push(Seat {
            user_id: guest.id,
            name: "guest".into(),
        });
        let mut seated_host = host.clone();
        seated_host.seat(session.id, UserStatus::InQueue);

        let tx = Transaction::begin(store.clone());
        tx.put_session(session.clone()).await;
        tx.put_user(seated_host).await;
        tx.put_user(guest.clone()).await;
        tx.commit().await.unwrap();

        let departure = leave_queue(&state, host.id, session.id).await.unwrap();
        assert_eq!(departure.removed, vec![host.id]);
        assert!(!departure.session_deleted);
        let kept = stored_user(&state, guest.id).await;
        assert_eq!(kept.current_queue_id, Some(elsewhere));
        assert_eq!(kept.status, UserStatus::InQueue);

        // A stale link on the leaver is rejected outright.
        let err = leave_queue(&state, host.id, session.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_solo_joiners_never_double_book() {
        let state = memory_state().await;
        let mut joiners = Vec::new();
        for n in 0..5 {
            joiners.push(waiting_user(&state, &format!("p{n}"), "sisa").await);
        }

        let handles: Vec<_> = joiners
            .iter()
            .map(|user| {
                let state = Arc::clone(&state);
                let id = user.id;
                tokio::spawn(async move { join_queue(&state, id, "sisa", SessionType::Solo).await })
            })
            .collect();

        let mut playing = 0;
        for handle in handles {
            let admission = handle.await.unwrap().unwrap();
            if admission.status == UserStatus::Playing {
                playing += 1;
            }
        }
        assert_eq!(playing, 1);

        let store = state.require_store().await.unwrap();
        let sessions = store
            .query_sessions(SessionQuery::active_at("sisa"))
            .await
            .unwrap();
        assert_eq!(sessions.len(), 5);
        assert_eq!(
            sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Playing)
                .count(),
            1
        );
    }
}
