use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        entity_store::UserQuery,
        models::{Seat, Session, SessionType, UserIdentity, UserStatus},
    },
    error::ServiceError,
    services::{
        capacity::{cabinet_count, plan_admission},
        queue_service::{admit, require_user},
    },
    state::{SharedState, transaction::run_transaction},
};

/// A freshly created guest and the session it ended up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestAdmission {
    /// The guest identity just created.
    pub guest: UserIdentity,
    /// Session the guest was seated in.
    pub session: Session,
    /// Status the guest ended up with.
    pub status: UserStatus,
}

fn guest_username(name: &str) -> Result<String, ServiceError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::InvalidInput("guest name must not be empty".into()));
    }
    Ok(trimmed.to_owned())
}

fn ensure_can_sponsor(host: &UserIdentity) -> Result<(), ServiceError> {
    if host.is_guest {
        return Err(ServiceError::IllegalTransition(format!(
            "guest `{}` cannot bring guests of its own",
            host.id
        )));
    }
    Ok(())
}

/// Queue a host together with a new guest as a full sync session.
///
/// The pair always waits in line, even when a cabinet is free.
pub async fn pair_host_with_guest(
    state: &SharedState,
    host_id: Uuid,
    branch_id: &str,
    guest_name: &str,
) -> Result<GuestAdmission, ServiceError> {
    let store = state.require_store().await?;
    let guest_name = guest_username(guest_name)?;

    let admission = run_transaction(&store, &state.rules().retry, "pair_host_with_guest", |tx| {
        let guest_name = guest_name.clone();
        async move {
            let mut host = require_user(&tx, host_id).await?;
            ensure_can_sponsor(&host)?;
            if host.status.is_busy() {
                return Err(ServiceError::IllegalTransition(format!(
                    "host `{host_id}` is already {:?}",
                    host.status
                )));
            }

            let mut guest =
                UserIdentity::guest(host_id, guest_name, branch_id.to_owned(), UserStatus::InQueue);
            let mut session = Session::open(
                branch_id.to_owned(),
                SessionType::Sync,
                Seat {
                    user_id: host.id,
                    name: host.username.clone(),
                },
            );
            session.seats.push(Seat {
                user_id: guest.id,
                name: guest.username.clone(),
            });

            host.branch_id = branch_id.to_owned();
            host.seat(session.id, UserStatus::InQueue);
            guest.seat(session.id, UserStatus::InQueue);
            tx.put_session(session.clone()).await;
            tx.put_user(host).await;
            tx.put_user(guest.clone()).await;

            Ok(GuestAdmission {
                guest,
                session,
                status: UserStatus::InQueue,
            })
        }
    })
    .await?;

    info!(
        %host_id,
        guest_id = %admission.guest.id,
        session_id = %admission.session.id,
        branch_id,
        "host paired with guest"
    );
    Ok(admission)
}

/// Create a guest and admit it alone through the regular admission path.
pub async fn add_guest_solo(
    state: &SharedState,
    host_id: Uuid,
    branch_id: &str,
    guest_name: &str,
) -> Result<GuestAdmission, ServiceError> {
    let store = state.require_store().await?;
    let guest_name = guest_username(guest_name)?;
    let capacity = cabinet_count(store.as_ref(), branch_id).await;

    let admission = run_transaction(&store, &state.rules().retry, "add_guest_solo", |tx| {
        let guest_name = guest_name.clone();
        async move {
            tx.guard_branch(branch_id).await?;
            let plan = plan_admission(tx.store().as_ref(), branch_id, capacity).await?;
            let host = require_user(&tx, host_id).await?;
            ensure_can_sponsor(&host)?;

            let guest =
                UserIdentity::guest(host_id, guest_name, branch_id.to_owned(), UserStatus::Waiting);
            let admission = admit(&tx, guest.clone(), branch_id, SessionType::Solo, &plan).await?;
            let guest = tx.user(guest.id).await?.unwrap_or(guest);
            Ok(GuestAdmission {
                guest,
                session: admission.session,
                status: admission.status,
            })
        }
    })
    .await?;

    info!(
        %host_id,
        guest_id = %admission.guest.id,
        session_id = %admission.session.id,
        status = ?admission.status,
        "solo guest admitted"
    );
    Ok(admission)
}

/// Put a new guest on the waiting list of a branch, bounded by the per-host guest limit.
pub async fn add_guest_to_waiting_list(
    state: &SharedState,
    host_id: Uuid,
    branch_id: &str,
    guest_name: &str,
) -> Result<UserIdentity, ServiceError> {
    let store = state.require_store().await?;
    let guest_name = guest_username(guest_name)?;
    let limit = state.rules().guest_limit;

    let guest = run_transaction(&store, &state.rules().retry, "add_guest_to_waiting_list", |tx| {
        let guest_name = guest_name.clone();
        async move {
            let host = require_user(&tx, host_id).await?;
            ensure_can_sponsor(&host)?;

            let waiting_guests = tx
                .store()
                .query_users(UserQuery {
                    status: Some(UserStatus::Waiting),
                    ..UserQuery::guests_of(host_id)
                })
                .await?;
            if waiting_guests.len() >= limit {
                return Err(ServiceError::IllegalTransition(format!(
                    "host `{host_id}` already has {} waiting guests (limit {limit})",
                    waiting_guests.len()
                )));
            }

            let guest =
                UserIdentity::guest(host_id, guest_name, branch_id.to_owned(), UserStatus::Waiting);
            tx.put_user(guest.clone()).await;
            Ok(guest)
        }
    })
    .await?;

    info!(%host_id, guest_id = %guest.id, branch_id, "guest added to waiting list");
    Ok(guest)
}

/// Delete a guest that is not seated in any session.
pub async fn remove_guest(state: &SharedState, guest_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_store().await?;

    run_transaction(&store, &state.rules().retry, "remove_guest", |tx| async move {
        let guest = require_user(&tx, guest_id).await?;
        if !guest.is_guest {
            return Err(ServiceError::InvalidInput(format!(
                "user `{guest_id}` is not a guest"
            )));
        }
        if guest.status.is_busy() {
            return Err(ServiceError::IllegalTransition(format!(
                "guest `{guest_id}` is seated in a session; leave the queue first"
            )));
        }
        tx.delete_user(guest_id).await;
        Ok(())
    })
    .await?;

    info!(%guest_id, "guest removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::models::SessionStatus,
        services::queue_service::{join_queue, leave_queue},
        state::test_support::{memory_state, stored_user, waiting_user},
    };

    #[tokio::test]
    async fn pairing_queues_both_without_starting() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "jamal").await;

        let paired = pair_host_with_guest(&state, host.id, "jamal", "kid")
            .await
            .unwrap();

        assert_eq!(paired.session.kind, SessionType::Sync);
        assert_eq!(paired.session.status, SessionStatus::Queued);
        assert_eq!(paired.session.player_ids(), vec![host.id, paired.guest.id]);
        assert_eq!(paired.session.player_names(), ["host", "kid"]);
        assert_eq!(paired.guest.added_by, Some(host.id));

        let stored_host = stored_user(&state, host.id).await.unwrap();
        assert_eq!(stored_host.status, UserStatus::InQueue);
        assert_eq!(stored_host.current_queue_id, Some(paired.session.id));
        let stored_guest = stored_user(&state, paired.guest.id).await.unwrap();
        assert_eq!(stored_guest.status, UserStatus::InQueue);
        assert!(stored_guest.is_guest);
    }

    #[tokio::test]
    async fn busy_host_cannot_pair() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "sisa").await;
        join_queue(&state, host.id, "sisa", SessionType::Solo)
            .await
            .unwrap();

        let err = pair_host_with_guest(&state, host.id, "sisa", "kid")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));

        let err = pair_host_with_guest(&state, host.id, "sisa", "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn solo_guest_follows_admission_rules() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "sisa").await;

        let first = add_guest_solo(&state, host.id, "sisa", "kid").await.unwrap();
        assert_eq!(first.status, UserStatus::Playing);
        assert_eq!(first.guest.status, UserStatus::Playing);
        assert_eq!(first.guest.current_queue_id, Some(first.session.id));

        let second = add_guest_solo(&state, host.id, "sisa", "other").await.unwrap();
        assert_eq!(second.status, UserStatus::InQueue);
        assert_eq!(second.session.status, SessionStatus::Queued);

        // The host stays on the waiting list.
        let stored_host = stored_user(&state, host.id).await.unwrap();
        assert_eq!(stored_host.status, UserStatus::Waiting);
    }

    #[tokio::test]
    async fn waiting_guests_are_limited_per_host() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "sisa").await;

        let first = add_guest_to_waiting_list(&state, host.id, "sisa", "a")
            .await
            .unwrap();
        add_guest_to_waiting_list(&state, host.id, "sisa", "b")
            .await
            .unwrap();
        let err = add_guest_to_waiting_list(&state, host.id, "sisa", "c")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));

        // A guest that moved into the queue frees a slot.
        join_queue(&state, first.id, "sisa", SessionType::Solo)
            .await
            .unwrap();
        add_guest_to_waiting_list(&state, host.id, "sisa", "c")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn guests_cannot_sponsor_guests() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "sisa").await;
        let guest = add_guest_to_waiting_list(&state, host.id, "sisa", "kid")
            .await
            .unwrap();

        let err = add_guest_to_waiting_list(&state, guest.id, "sisa", "grandkid")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));
    }

    #[tokio::test]
    async fn removing_guests_checks_kind_and_seat() {
        let state = memory_state().await;
        let host = waiting_user(&state, "host", "sisa").await;
        let seated = add_guest_solo(&state, host.id, "sisa", "kid").await.unwrap();

        let err = remove_guest(&state, host.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        let err = remove_guest(&state, seated.guest.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::IllegalTransition(_)));

        leave_queue(&state, seated.guest.id, seated.session.id)
            .await
            .unwrap();
        remove_guest(&state, seated.guest.id).await.unwrap();
        assert!(stored_user(&state, seated.guest.id).await.is_none());

        let err = remove_guest(&state, seated.guest.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
