/// Retrying runner for optimistic transactions.
pub mod transaction;

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    config::{AppConfig, QueueRules},
    dao::entity_store::EntityStore,
    error::ServiceError,
    services::advisory::AdvisoryClient,
};

/// Reference-counted handle to [`AppState`] shared with handlers and background tasks.
pub type SharedState = Arc<AppState>;

/// Central application state: the storage handle, degraded flag and runtime configuration.
pub struct AppState {
    store: RwLock<Option<Arc<dyn EntityStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    advisory: AdvisoryClient,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let advisory = AdvisoryClient::new(&config.advisory);
        Arc::new(Self {
            store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            advisory,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn EntityStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn EntityStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Return the installed store or fail with [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn EntityStore>, ServiceError> {
        if self.is_degraded().await {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Admission rules from the configuration.
    pub fn rules(&self) -> &QueueRules {
        &self.config.rules
    }

    /// Client of the advisory service.
    pub fn advisory(&self) -> &AdvisoryClient {
        &self.advisory
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        let mut watcher = state.degraded_watcher();
        assert!(state.is_degraded().await);
        assert!(matches!(
            state.require_store().await,
            Err(ServiceError::Degraded)
        ));

        let ready = test_support::memory_state().await;
        assert!(!ready.is_degraded().await);
        assert!(ready.require_store().await.is_ok());

        state.update_degraded(false).await;
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
    }
}
