//! Live views over the store: streams of full snapshots re-read after every relevant commit.

use std::{future::Future, sync::Arc};

use async_stream::stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use crate::dao::{
    entity_store::{ChangeNotice, EntityStore, SessionQuery, UserQuery},
    models::{Session, UserIdentity},
    storage::StorageResult,
};

fn live_query<T, R, F, Fut>(
    store: Arc<dyn EntityStore>,
    relevant: R,
    fetch: F,
) -> impl Stream<Item = StorageResult<T>> + Send + 'static
where
    T: Send + 'static,
    R: Fn(&ChangeNotice) -> bool + Send + 'static,
    F: Fn(Arc<dyn EntityStore>) -> Fut + Send + 'static,
    Fut: Future<Output = StorageResult<T>> + Send,
{
    stream! {
        // Subscribe before the first read so no commit slips between snapshot and feed.
        let mut changes = store.changes();
        yield fetch(store.clone()).await;

        loop {
            match changes.recv().await {
                Ok(notice) if relevant(&notice) => yield fetch(store.clone()).await,
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "live query lagged; refreshing snapshot");
                    yield fetch(store.clone()).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

/// Waiting identities of a branch, oldest first. Dropping the stream ends the subscription.
pub fn waiting_list(
    store: Arc<dyn EntityStore>,
    branch_id: String,
) -> impl Stream<Item = StorageResult<Vec<UserIdentity>>> + Send + 'static {
    let filter = branch_id.clone();
    live_query(
        store,
        move |notice| notice.touches_users_at(&filter),
        move |store| store.query_users(UserQuery::waiting_at(&branch_id)),
    )
}

/// Queued and playing sessions of a branch, oldest first.
pub fn queue(
    store: Arc<dyn EntityStore>,
    branch_id: String,
) -> impl Stream<Item = StorageResult<Vec<Session>>> + Send + 'static {
    let filter = branch_id.clone();
    live_query(
        store,
        move |notice| notice.touches_sessions_at(&filter),
        move |store| store.query_sessions(SessionQuery::active_at(&branch_id)),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        dao::{
            entity_store::memory::InMemoryEntityStore,
            models::{PlayStyle, Seat, SessionType, UserStatus},
            transaction::WriteBatch,
        },
        state::test_support::memory_state,
    };

    async fn put_waiting(
        store: &Arc<dyn EntityStore>,
        name: &str,
        branch_id: &str,
    ) -> UserIdentity {
        let mut user =
            UserIdentity::registered(name.into(), branch_id.into(), 0, PlayStyle::Casual);
        user.status = UserStatus::Waiting;
        let mut batch = WriteBatch::new();
        batch.put_user(user.clone());
        batch.commit(store.as_ref()).await.unwrap();
        user
    }

    #[tokio::test]
    async fn waiting_list_emits_snapshot_then_relevant_updates() {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let early = put_waiting(&store, "early", "sisa").await;

        let mut live = Box::pin(waiting_list(store.clone(), "sisa".into()));
        let first = live.next().await.unwrap().unwrap();
        assert_eq!(first, vec![early.clone()]);

        // A commit at another branch must not produce a snapshot.
        put_waiting(&store, "elsewhere", "jamal").await;
        let late = put_waiting(&store, "late", "sisa").await;

        let next = timeout(Duration::from_secs(1), live.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let names: Vec<_> = next.iter().map(|user| user.username.as_str()).collect();
        assert_eq!(names, ["early", "late"]);
        assert_eq!(next[1].id, late.id);
    }

    #[tokio::test]
    async fn queue_follows_session_writes() {
        let state = memory_state().await;
        let store = state.require_store().await.unwrap();
        let mut live = Box::pin(queue(store.clone(), "jamal".into()));
        assert!(live.next().await.unwrap().unwrap().is_empty());

        let user = put_waiting(&store, "ada", "jamal").await;
        crate::services::queue_service::join_queue(&state, user.id, "jamal", SessionType::Sync)
            .await
            .unwrap();

        let snapshot = timeout(Duration::from_secs(1), live.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot[0].seats,
            vec![Seat {
                user_id: user.id,
                name: "ada".into()
            }]
        );
    }
}
