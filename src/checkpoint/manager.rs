//! Checkpoint protocol on top of a [`CheckpointStore`]
//!
//! A stored state is only trusted when its filters equal the current run's
//! filters exactly. Saves only move forward: a `last_batch_index` below the
//! highest one saved for the same key is rejected until the entity is
//! cleared.

use super::error::CheckpointError;
use super::store::CheckpointStore;
use super::types::{Filters, RecoveryState};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    high_water: Mutex<HashMap<(String, String), u64>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            high_water: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// State to resume from, if one exists for exactly these filters.
    ///
    /// Read failures and filter mismatches are logged and reported as no
    /// checkpoint.
    pub async fn can_resume(&self, entity_name: &str, filters: &Filters) -> Option<RecoveryState> {
        let hash = filters.hash();
        let state = match self.store.load(entity_name, &hash).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                debug!("No checkpoint for {} ({})", entity_name, filters);
                return None;
            }
            Err(e) => {
                warn!(
                    "Could not read checkpoint for {}, starting fresh: {}",
                    entity_name, e
                );
                return None;
            }
        };

        if &state.filters != filters {
            warn!(
                "Ignoring checkpoint for {}: stored filters {} do not match run filters {}",
                entity_name, state.filters, filters
            );
            return None;
        }

        self.high_water
            .lock()
            .await
            .entry((entity_name.to_string(), hash))
            .and_modify(|idx| *idx = (*idx).max(state.last_batch_index))
            .or_insert(state.last_batch_index);

        Some(state)
    }

    /// Persist `state` for the run scoped by `state.filters`
    pub async fn save(&self, entity_name: &str, state: &RecoveryState) -> Result<(), CheckpointError> {
        let hash = state.filters.hash();
        let key = (entity_name.to_string(), hash.clone());

        let mut high_water = self.high_water.lock().await;
        let saved = match high_water.get(&key) {
            Some(idx) => Some(*idx),
            None => match self.store.load(entity_name, &hash).await {
                Ok(existing) => existing
                    .filter(|s| s.filters == state.filters)
                    .map(|s| s.last_batch_index),
                Err(e) => {
                    warn!("Could not read existing checkpoint for {}: {}", entity_name, e);
                    None
                }
            },
        };

        if let Some(saved) = saved {
            if state.last_batch_index < saved {
                return Err(CheckpointError::Regression {
                    entity: entity_name.to_string(),
                    saved,
                    attempted: state.last_batch_index,
                });
            }
        }

        self.store.save(entity_name, &hash, state).await?;
        high_water.insert(key, state.last_batch_index);
        debug!(
            "Checkpoint saved for {} at batch #{} ({} processed)",
            entity_name, state.last_batch_index, state.processed_count
        );
        Ok(())
    }

    /// Drop every checkpoint for `entity_name`
    pub async fn clear(&self, entity_name: &str) -> Result<usize, CheckpointError> {
        let removed = self.store.clear(entity_name).await?;
        self.high_water
            .lock()
            .await
            .retain(|(entity, _), _| entity != entity_name);
        if removed > 0 {
            info!("Cleared {} checkpoint(s) for {}", removed, entity_name);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use async_trait::async_trait;

    struct FailingStore;

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn load(&self, _: &str, _: &str) -> Result<Option<RecoveryState>, CheckpointError> {
            Err(CheckpointError::Unavailable("connection refused".into()))
        }
        async fn save(&self, _: &str, _: &str, _: &RecoveryState) -> Result<(), CheckpointError> {
            Err(CheckpointError::Unavailable("connection refused".into()))
        }
        async fn clear(&self, _: &str) -> Result<usize, CheckpointError> {
            Ok(0)
        }
    }

    /// Returns the same state whatever key is asked for
    struct CarelessStore(RecoveryState);

    #[async_trait]
    impl CheckpointStore for CarelessStore {
        async fn load(&self, _: &str, _: &str) -> Result<Option<RecoveryState>, CheckpointError> {
            Ok(Some(self.0.clone()))
        }
        async fn save(&self, _: &str, _: &str, _: &RecoveryState) -> Result<(), CheckpointError> {
            Ok(())
        }
        async fn clear(&self, _: &str) -> Result<usize, CheckpointError> {
            Ok(0)
        }
    }

    fn active() -> Filters {
        Filters::new().with("status", "active")
    }

    fn at_batch(filters: Filters, batch: u64) -> RecoveryState {
        let mut state = RecoveryState::new(filters, 250);
        state.last_batch_index = batch;
        state.processed_count = batch * 50;
        state
    }

    #[tokio::test]
    async fn test_resume_requires_matching_filters() {
        let manager = CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()));
        manager.save("products", &at_batch(active(), 2)).await.unwrap();

        let found = manager.can_resume("products", &active()).await.unwrap();
        assert_eq!(found.last_batch_index, 2);

        let other = Filters::new().with("status", "archived");
        assert!(manager.can_resume("products", &other).await.is_none());
        assert!(manager.can_resume("orders", &active()).await.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_state_from_store_is_rejected() {
        let manager = CheckpointManager::new(Arc::new(CarelessStore(at_batch(active(), 4))));
        let other = Filters::new().with("status", "archived");
        assert!(manager.can_resume("products", &other).await.is_none());
        assert!(manager.can_resume("products", &active()).await.is_some());
    }

    #[tokio::test]
    async fn test_store_failure_means_no_checkpoint() {
        let manager = CheckpointManager::new(Arc::new(FailingStore));
        assert!(manager.can_resume("products", &active()).await.is_none());
        assert!(manager.save("products", &at_batch(active(), 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_save_rejects_regression_until_cleared() {
        let manager = CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()));
        manager.save("products", &at_batch(active(), 3)).await.unwrap();
        manager.save("products", &at_batch(active(), 3)).await.unwrap();

        let err = manager
            .save("products", &at_batch(active(), 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Regression {
                saved: 3,
                attempted: 2,
                ..
            }
        ));

        assert_eq!(manager.clear("products").await.unwrap(), 1);
        manager.save("products", &at_batch(active(), 1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_regression_guard_survives_new_manager() {
        let store = Arc::new(MemoryCheckpointStore::new());
        CheckpointManager::new(store.clone())
            .save("products", &at_batch(active(), 5))
            .await
            .unwrap();

        let fresh = CheckpointManager::new(store);
        assert!(fresh.save("products", &at_batch(active(), 4)).await.is_err());
        fresh.save("products", &at_batch(active(), 6)).await.unwrap();
    }
}
