//! Nested transaction boundary with savepoints
//!
//! The outermost `begin` opens a real transaction; nested `begin`s open
//! savepoints. Closing a level also closes every level nested inside it.

use super::error::TransactionError;
use super::store::TransactionalStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Handle to one open level of the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    id: u64,
    depth: usize,
    label: String,
}

impl TxHandle {
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

#[derive(Debug)]
struct Level {
    id: u64,
    savepoint: Option<String>,
}

pub struct TransactionBoundary {
    store: Arc<dyn TransactionalStore>,
    levels: Mutex<Vec<Level>>,
    next_id: AtomicU64,
}

fn savepoint_name(depth: usize, label: &str) -> String {
    let sanitized: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("sp_{depth}_{sanitized}")
}

impl TransactionBoundary {
    pub fn new(store: Arc<dyn TransactionalStore>) -> Self {
        Self {
            store,
            levels: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn depth(&self) -> usize {
        self.levels.lock().await.len()
    }

    pub async fn in_transaction(&self) -> bool {
        self.depth().await > 0
    }

    /// Open a transaction, or a savepoint if one is already open
    pub async fn begin(&self, label: &str) -> Result<TxHandle, TransactionError> {
        let mut levels = self.levels.lock().await;
        let depth = levels.len() + 1;

        let savepoint = if depth == 1 {
            self.store.begin().await?;
            None
        } else {
            let name = savepoint_name(depth, label);
            self.store.savepoint(&name).await?;
            Some(name)
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!("Opened transaction level {} ({})", depth, label);
        levels.push(Level { id, savepoint });

        Ok(TxHandle {
            id,
            depth,
            label: label.to_string(),
        })
    }

    fn position(levels: &[Level], handle: &TxHandle) -> Option<usize> {
        levels.iter().position(|level| level.id == handle.id)
    }

    /// Commit `handle`'s level. The level stays open if the store rejects the commit.
    pub async fn commit(&self, handle: &TxHandle) -> Result<(), TransactionError> {
        let mut levels = self.levels.lock().await;
        let Some(index) = Self::position(&levels, handle) else {
            warn!(
                "Commit of {} ignored: no open transaction for this handle",
                handle.label
            );
            return Ok(());
        };

        match &levels[index].savepoint {
            None => self.store.commit().await?,
            Some(name) => self.store.release_savepoint(name).await?,
        }

        levels.truncate(index);
        debug!("Committed transaction level {} ({})", handle.depth, handle.label);
        Ok(())
    }

    /// Roll back `handle`'s level. The level is closed even if the store fails.
    pub async fn rollback(&self, handle: &TxHandle) -> Result<(), TransactionError> {
        let mut levels = self.levels.lock().await;
        let Some(index) = Self::position(&levels, handle) else {
            warn!(
                "Rollback of {} ignored: no open transaction for this handle",
                handle.label
            );
            return Ok(());
        };

        let result = match &levels[index].savepoint {
            None => self.store.rollback().await,
            Some(name) => self.store.rollback_to_savepoint(name).await,
        };

        levels.truncate(index);
        match &result {
            Ok(()) => debug!("Rolled back transaction level {} ({})", handle.depth, handle.label),
            Err(e) => warn!("Rollback of {} failed: {}", handle.label, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{JournalingTransactionalStore, NoopTransactionalStore};
    use proptest::prelude::*;

    fn journaled() -> (Arc<JournalingTransactionalStore>, TransactionBoundary) {
        let store = Arc::new(JournalingTransactionalStore::new());
        let boundary = TransactionBoundary::new(store.clone());
        (store, boundary)
    }

    #[tokio::test]
    async fn test_outer_and_nested_statements() {
        let (store, tx) = journaled();
        let outer = tx.begin("batch 1").await.unwrap();
        let inner = tx.begin("item-7").await.unwrap();
        assert_eq!(inner.depth(), 2);
        tx.commit(&inner).await.unwrap();
        tx.commit(&outer).await.unwrap();

        assert_eq!(
            store.statements(),
            vec![
                "BEGIN",
                "SAVEPOINT sp_2_item_7",
                "RELEASE SAVEPOINT sp_2_item_7",
                "COMMIT"
            ]
        );
        assert_eq!(tx.depth().await, 0);
    }

    #[tokio::test]
    async fn test_nested_rollback_leaves_outer_open() {
        let (store, tx) = journaled();
        let outer = tx.begin("batch").await.unwrap();
        let inner = tx.begin("item").await.unwrap();
        tx.rollback(&inner).await.unwrap();

        assert_eq!(tx.depth().await, 1);
        assert!(store
            .statements()
            .contains(&"ROLLBACK TO SAVEPOINT sp_2_item".to_string()));

        tx.commit(&outer).await.unwrap();
        assert_eq!(store.count("COMMIT"), 1);
    }

    #[tokio::test]
    async fn test_unbalanced_calls_are_noops() {
        let (store, tx) = journaled();
        let handle = tx.begin("batch").await.unwrap();
        tx.commit(&handle).await.unwrap();

        tx.commit(&handle).await.unwrap();
        tx.rollback(&handle).await.unwrap();
        assert_eq!(store.statements(), vec!["BEGIN", "COMMIT"]);
        assert_eq!(tx.depth().await, 0);
    }

    #[tokio::test]
    async fn test_closing_outer_closes_inner() {
        let (store, tx) = journaled();
        let outer = tx.begin("batch").await.unwrap();
        let inner = tx.begin("item").await.unwrap();
        tx.rollback(&outer).await.unwrap();

        assert_eq!(tx.depth().await, 0);
        tx.commit(&inner).await.unwrap();
        assert_eq!(store.count("RELEASE"), 0);
        assert_eq!(store.count("ROLLBACK"), 1);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_level_for_rollback() {
        let (store, tx) = journaled();
        store.fail_on("COMMIT");
        let handle = tx.begin("batch").await.unwrap();

        assert!(tx.commit(&handle).await.is_err());
        assert_eq!(tx.depth().await, 1);
        tx.rollback(&handle).await.unwrap();
        assert_eq!(tx.depth().await, 0);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported_and_closes_level() {
        let (store, tx) = journaled();
        store.fail_on("ROLLBACK");
        let handle = tx.begin("batch").await.unwrap();

        let err = tx.rollback(&handle).await.unwrap_err();
        assert!(matches!(err, TransactionError::Statement { .. }));
        assert_eq!(tx.depth().await, 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Begin,
        CommitTop,
        RollbackTop,
        CommitOuter,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Begin),
            2 => Just(Op::CommitTop),
            2 => Just(Op::RollbackTop),
            1 => Just(Op::CommitOuter),
        ]
    }

    proptest! {
        #[test]
        fn prop_depth_tracks_balanced_nesting(ops in prop::collection::vec(op(), 0..40)) {
            tokio_test::block_on(async {
                let tx = TransactionBoundary::new(Arc::new(NoopTransactionalStore));
                let mut handles: Vec<TxHandle> = Vec::new();
                for op in ops {
                    match op {
                        Op::Begin => handles.push(tx.begin("level").await.unwrap()),
                        Op::CommitTop => {
                            if let Some(h) = handles.pop() {
                                tx.commit(&h).await.unwrap();
                            }
                        }
                        Op::RollbackTop => {
                            if let Some(h) = handles.pop() {
                                tx.rollback(&h).await.unwrap();
                            }
                        }
                        Op::CommitOuter => {
                            if let Some(h) = handles.first().cloned() {
                                tx.commit(&h).await.unwrap();
                                handles.clear();
                            }
                        }
                    }
                    assert_eq!(tx.depth().await, handles.len());
                    for (i, h) in handles.iter().enumerate() {
                        assert_eq!(h.depth(), i + 1);
                    }
                }
            });
        }
    }
}
