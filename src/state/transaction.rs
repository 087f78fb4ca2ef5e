use std::{future::Future, sync::Arc};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    dao::{
        entity_store::EntityStore,
        transaction::{RetryPolicy, Transaction},
    },
    error::ServiceError,
};

/// Run `work` inside an optimistic transaction, retrying the whole body with fresh reads while
/// the commit conflicts.
///
/// An error returned by `work` aborts the attempt without committing anything and is passed
/// through unchanged. Once `policy.attempts` commits have conflicted the caller receives
/// [`ServiceError::Conflict`].
pub async fn run_transaction<T, F, Fut>(
    store: &Arc<dyn EntityStore>,
    policy: &RetryPolicy,
    operation: &'static str,
    mut work: F,
) -> Result<T, ServiceError>
where
    F: FnMut(Transaction) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 1;
    loop {
        let transaction = Transaction::begin(store.clone());
        let value = work(transaction.clone()).await?;

        match transaction.commit().await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(operation, attempt, "transaction committed after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_conflict() && attempt < policy.attempts => {
                debug!(operation, attempt, error = %err, "transaction conflict; retrying");
                sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
            Err(err) if err.is_conflict() => {
                warn!(operation, attempts = attempt, error = %err, "transaction retries exhausted");
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::dao::{
        entity_store::{EntityStore, memory::InMemoryEntityStore},
        models::{PlayStyle, UserIdentity},
        transaction::WriteBatch,
    };

    fn quick_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    async fn seeded() -> (Arc<dyn EntityStore>, UserIdentity) {
        let store: Arc<dyn EntityStore> = Arc::new(InMemoryEntityStore::new());
        let user = UserIdentity::registered("ada".into(), "sisa".into(), 0, PlayStyle::Casual);
        let mut batch = WriteBatch::new();
        batch.put_user(user.clone());
        batch.commit(store.as_ref()).await.unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn conflicting_attempt_is_retried_with_fresh_reads() {
        let (store, user) = seeded().await;
        let user_id = user.id;
        let attempts = AtomicU32::new(0);

        let rank = run_transaction(&store, &quick_policy(5), "bump_rank", |tx| {
            let store = store.clone();
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                let mut loaded = tx
                    .user(user_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("user".into()))?;
                if attempt == 0 {
                    let mut interloper = loaded.clone();
                    interloper.rank = 100;
                    let mut batch = WriteBatch::new();
                    batch.put_user(interloper);
                    batch.commit(store.as_ref()).await?;
                }
                loaded.rank += 1;
                tx.put_user(loaded.clone()).await;
                Ok(loaded.rank)
            }
        })
        .await
        .unwrap();

        assert_eq!(rank, 101);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces_after_the_last_attempt() {
        let (store, user) = seeded().await;
        let user_id = user.id;
        let attempts = AtomicU32::new(0);

        let err = run_transaction(&store, &quick_policy(3), "always_loses", |tx| {
            let store = store.clone();
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                let loaded = tx.user(user_id).await?.expect("seeded");
                let mut batch = WriteBatch::new();
                batch.put_user(loaded.clone());
                batch.commit(store.as_ref()).await?;
                tx.put_user(loaded).await;
                Ok(())
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn body_error_commits_nothing() {
        let (store, user) = seeded().await;
        let user_id = user.id;

        let err = run_transaction(&store, &quick_policy(3), "rejects", |tx| async move {
            let mut loaded = tx.user(user_id).await?.expect("seeded");
            loaded.username = "renamed".into();
            tx.put_user(loaded).await;
            Err::<(), _>(ServiceError::IllegalTransition("nope".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ServiceError::IllegalTransition(_)));
        let stored = store.find_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.data.username, "ada");
    }
}
