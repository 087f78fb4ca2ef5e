use std::time::SystemTime;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        entity_store::{SessionPatch, UserPatch},
        models::{Session, SessionStatus, UserStatus},
        transaction::WriteBatch,
    },
    error::ServiceError,
    services::{
        capacity::{cabinet_count, plan_admission},
        queue_service::{require_session, require_user},
    },
    state::{SharedState, transaction::run_transaction},
};

/// Put a session on a cabinet and mark the listed players as playing.
///
/// Trusted primitive: capacity is not re-checked, the caller is expected to know a cabinet is
/// free. [`advance_queue`] is the guarded variant.
pub async fn start_game(
    state: &SharedState,
    session_id: Uuid,
    player_ids: &[Uuid],
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let now = SystemTime::now();

    let mut batch = WriteBatch::new();
    batch.patch_session(
        session_id,
        SessionPatch {
            status: Some(SessionStatus::Playing),
            started_at: Some(now),
            ..SessionPatch::default()
        },
    );
    for player_id in player_ids {
        batch.patch_user(*player_id, UserPatch::seat(session_id, UserStatus::Playing));
    }
    batch.commit(store.as_ref()).await?;

    info!(%session_id, players = player_ids.len(), "game started");
    Ok(())
}

/// Complete a session and send the listed players back to the waiting pool.
///
/// Safe to repeat: an already completed session keeps its end time and players that have
/// moved on to another session are left alone.
pub async fn finish_game(
    state: &SharedState,
    session_id: Uuid,
    player_ids: &[Uuid],
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;

    let mut batch = WriteBatch::new();
    batch.patch_session(
        session_id,
        SessionPatch {
            status: Some(SessionStatus::Completed),
            ended_at: Some(SystemTime::now()),
            skip_if_status: Some(SessionStatus::Completed),
            ..SessionPatch::default()
        },
    );
    for player_id in player_ids {
        batch.patch_user(
            *player_id,
            UserPatch {
                only_in_session: Some(session_id),
                ..UserPatch::unseat()
            },
        );
    }
    batch.commit(store.as_ref()).await?;

    info!(%session_id, players = player_ids.len(), "game finished");
    Ok(())
}

/// Start the oldest queued session of a branch when a cabinet is free.
///
/// Returns the started session, or `None` when every cabinet is busy or nobody is queued.
pub async fn advance_queue(
    state: &SharedState,
    branch_id: &str,
) -> Result<Option<Session>, ServiceError> {
    let store = state.require_store().await?;
    let capacity = cabinet_count(store.as_ref(), branch_id).await;

    let started = run_transaction(&store, &state.rules().retry, "advance_queue", |tx| async move {
        tx.guard_branch(branch_id).await?;
        let plan = plan_admission(tx.store().as_ref(), branch_id, capacity).await?;
        if !plan.cabinet_free() {
            return Ok(None);
        }
        let Some(head) = plan.head() else {
            return Ok(None);
        };

        let mut session = require_session(&tx, head.id).await?;
        session.start(SystemTime::now());
        for player_id in session.player_ids() {
            let mut player = require_user(&tx, player_id).await?;
            player.seat(session.id, UserStatus::Playing);
            tx.put_user(player).await;
        }
        tx.put_session(session.clone()).await;
        Ok(Some(session))
    })
    .await?;

    match &started {
        Some(session) => info!(branch_id, session_id = %session.id, "advanced queue head"),
        None => warn!(branch_id, "queue not advanced: no free cabinet or empty line"),
    }
    Ok(started)
}
