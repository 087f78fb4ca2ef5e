use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{entity_store::EntityStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(MAX_DELAY)
}

/// Try to revive an installed store after a failed health check.
///
/// Enters degraded mode on the first failed attempt; returns whether the store came back.
async fn recover(state: &SharedState, store: &Arc<dyn EntityStore>) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded after health check failure");
                state.update_degraded(false).await;
                return true;
            }
            Err(err) if attempt == 0 => {
                warn!(
                    attempt,
                    error = %err,
                    "storage reconnect first attempt failed; entering degraded mode"
                );
                state.update_degraded(true).await;
            }
            Err(err) => warn!(attempt, error = %err, "storage reconnect attempt failed"),
        }
        sleep(delay).await;
        delay = next_delay(delay);
    }
    false
}

/// Keep an installed store healthy; returns once it could not be recovered.
async fn supervise(state: &SharedState, store: &Arc<dyn EntityStore>) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed");
                if !recover(state, store).await {
                    warn!("exhausted storage reconnect attempts; staying in degraded mode");
                    return;
                }
            }
        }
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

/// Connect to the storage backend and keep the shared state in degraded mode while it is
/// unavailable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn EntityStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.set_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;
                supervise(&state, &store).await;
                state.clear_store().await;
            }
            Err(err) => warn!(error = %err, "storage connection attempt failed"),
        }
        sleep(delay).await;
        delay = next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicU32, Ordering},
    };

    use tokio::time::timeout;

    use super::*;
    use crate::{
        config::AppConfig, dao::entity_store::memory::InMemoryEntityStore, state::AppState,
    };

    #[test]
    fn delay_doubles_up_to_the_cap() {
        assert_eq!(next_delay(INITIAL_DELAY), Duration::from_secs(2));
        assert_eq!(next_delay(Duration::from_secs(8)), MAX_DELAY);
    }

    #[tokio::test]
    async fn leaves_degraded_mode_once_connected() {
        let state = AppState::new(AppConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let supervisor = tokio::spawn(run(state.clone(), move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    return Err(StorageError::unavailable(
                        "first connect fails".into(),
                        io::Error::other("refused"),
                    ));
                }
                Ok(Arc::new(InMemoryEntityStore::new()) as Arc<dyn EntityStore>)
            }
        }));

        let mut degraded = state.degraded_watcher();
        timeout(Duration::from_secs(5), degraded.wait_for(|value| !*value))
            .await
            .unwrap()
            .unwrap();
        assert!(state.require_store().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        supervisor.abort();
    }
}
