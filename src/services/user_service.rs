use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        entity_store::UserQuery,
        models::{PlayStyle, UserIdentity, UserStatus},
        transaction::WriteBatch,
    },
    error::ServiceError,
    services::queue_service::{leave_queue, require_user},
    state::{SharedState, transaction::run_transaction},
};

/// What a logout cleaned up on the way out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutSummary {
    /// Sessions left by the identity or one of its guests.
    pub sessions_left: Vec<Uuid>,
    /// Guests deleted along with the identity.
    pub guests_removed: Vec<Uuid>,
}

/// Provision a registered identity at the default branch, not present anywhere yet.
pub async fn register_user(
    state: &SharedState,
    username: &str,
    rank: u32,
    play_style: PlayStyle,
) -> Result<UserIdentity, ServiceError> {
    let store = state.require_store().await?;
    let username = username.trim();
    if username.is_empty() {
        return Err(ServiceError::InvalidInput("username must not be empty".into()));
    }

    let user = UserIdentity::registered(
        username.to_owned(),
        state.rules().default_branch.clone(),
        rank,
        play_style,
    );
    let mut batch = WriteBatch::new();
    batch.put_user(user.clone());
    batch.commit(store.as_ref()).await?;

    info!(user_id = %user.id, username = %user.username, "user registered");
    Ok(user)
}

/// Read an identity, failing with [`ServiceError::NotFound`] when it does not exist.
pub async fn get_user(state: &SharedState, user_id: Uuid) -> Result<UserIdentity, ServiceError> {
    let store = state.require_store().await?;
    store
        .find_user(user_id)
        .await?
        .map(|versioned| versioned.data)
        .ok_or_else(|| ServiceError::NotFound(format!("user `{user_id}`")))
}

/// Mark an identity as present and waiting at `branch_id`.
///
/// Identities seated in a session must leave the queue first.
pub async fn join_waiting_list(
    state: &SharedState,
    user_id: Uuid,
    branch_id: &str,
) -> Result<UserIdentity, ServiceError> {
    let store = state.require_store().await?;

    let user = run_transaction(&store, &state.rules().retry, "join_waiting_list", |tx| async move {
        let mut user = require_user(&tx, user_id).await?;
        if user.status.is_busy() {
            return Err(ServiceError::IllegalTransition(format!(
                "user `{user_id}` is {:?}; leave the queue before rejoining the waiting list",
                user.status
            )));
        }
        user.status = UserStatus::Waiting;
        user.branch_id = branch_id.to_owned();
        tx.put_user(user.clone()).await;
        Ok(user)
    })
    .await?;

    info!(%user_id, branch_id, "user joined the waiting list");
    Ok(user)
}

/// Take an identity off the waiting list.
pub async fn leave_waiting_list(
    state: &SharedState,
    user_id: Uuid,
) -> Result<UserIdentity, ServiceError> {
    let store = state.require_store().await?;

    let user = run_transaction(&store, &state.rules().retry, "leave_waiting_list", |tx| async move {
        let mut user = require_user(&tx, user_id).await?;
        if user.status.is_busy() {
            return Err(ServiceError::IllegalTransition(format!(
                "user `{user_id}` is {:?}; leave the queue first",
                user.status
            )));
        }
        user.status = UserStatus::Offline;
        user.current_queue_id = None;
        tx.put_user(user.clone()).await;
        Ok(user)
    })
    .await?;

    info!(%user_id, "user left the waiting list");
    Ok(user)
}

/// Change the branch an identity is browsing. Guests stay at the branch they were created for.
pub async fn switch_branch(
    state: &SharedState,
    user_id: Uuid,
    branch_id: &str,
) -> Result<UserIdentity, ServiceError> {
    let store = state.require_store().await?;

    let user = run_transaction(&store, &state.rules().retry, "switch_branch", |tx| async move {
        let mut user = require_user(&tx, user_id).await?;
        if user.is_guest {
            return Err(ServiceError::IllegalTransition(format!(
                "guest `{user_id}` cannot switch branch"
            )));
        }
        user.branch_id = branch_id.to_owned();
        tx.put_user(user.clone()).await;
        Ok(user)
    })
    .await?;

    info!(%user_id, branch_id, "user switched branch");
    Ok(user)
}

/// Leave `session_id` on behalf of `user_id`, tolerating links that went stale meanwhile.
async fn leave_if_seated(
    state: &SharedState,
    user_id: Uuid,
    session_id: Uuid,
) -> Result<bool, ServiceError> {
    match leave_queue(state, user_id, session_id).await {
        Ok(_) => Ok(true),
        Err(ServiceError::NotFound(message) | ServiceError::IllegalTransition(message)) => {
            warn!(%user_id, %session_id, reason = %message, "stale session link during logout");
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// Log an identity out: leave its session, pull its guests out of theirs, delete the guests and
/// mark the identity offline.
pub async fn logout(state: &SharedState, user_id: Uuid) -> Result<LogoutSummary, ServiceError> {
    let store = state.require_store().await?;
    let mut summary = LogoutSummary::default();

    let user = get_user(state, user_id).await?;
    if let Some(session_id) = user.current_queue_id
        && leave_if_seated(state, user_id, session_id).await?
    {
        summary.sessions_left.push(session_id);
    }

    let guests = store.query_users(UserQuery::guests_of(user_id)).await?;
    for guest in &guests {
        if let Some(session_id) = guest.current_queue_id
            && leave_if_seated(state, guest.id, session_id).await?
        {
            summary.sessions_left.push(session_id);
        }
    }

    let guest_ids: Vec<Uuid> = guests.iter().map(|guest| guest.id).collect();
    let guest_ids = &guest_ids;
    run_transaction(&store, &state.rules().retry, "logout", |tx| async move {
        for guest_id in guest_ids {
            if let Some(guest) = tx.user(*guest_id).await?
                && guest.status.is_busy()
            {
                return Err(ServiceError::Conflict(format!(
                    "guest `{guest_id}` was queued again during logout"
                )));
            }
            tx.delete_user(*guest_id).await;
        }

        let mut user = require_user(&tx, user_id).await?;
        if user.status.is_busy() {
            return Err(ServiceError::Conflict(format!(
                "user `{user_id}` was queued again during logout"
            )));
        }
        user.status = UserStatus::Offline;
        user.current_queue_id = None;
        tx.put_user(user).await;
        Ok(())
    })
    .await?;
    summary.guests_removed = guest_ids.clone();

    info!(
        %user_id,
        sessions_left = summary.sessions_left.len(),
        guests_removed = summary.guests_removed.len(),
        "user logged out"
    );
    Ok(summary)
}
