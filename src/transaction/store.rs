//! Store-side transaction primitives

use super::error::TransactionError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::trace;

/// Transaction control statements of the target store
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    async fn begin(&self) -> Result<(), TransactionError>;
    async fn savepoint(&self, name: &str) -> Result<(), TransactionError>;
    async fn release_savepoint(&self, name: &str) -> Result<(), TransactionError>;
    async fn rollback_to_savepoint(&self, name: &str) -> Result<(), TransactionError>;
    async fn commit(&self) -> Result<(), TransactionError>;
    async fn rollback(&self) -> Result<(), TransactionError>;
}

/// Store without transactions; every statement succeeds
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactionalStore;

#[async_trait]
impl TransactionalStore for NoopTransactionalStore {
    async fn begin(&self) -> Result<(), TransactionError> {
        Ok(())
    }
    async fn savepoint(&self, _name: &str) -> Result<(), TransactionError> {
        Ok(())
    }
    async fn release_savepoint(&self, _name: &str) -> Result<(), TransactionError> {
        Ok(())
    }
    async fn rollback_to_savepoint(&self, _name: &str) -> Result<(), TransactionError> {
        Ok(())
    }
    async fn commit(&self) -> Result<(), TransactionError> {
        Ok(())
    }
    async fn rollback(&self) -> Result<(), TransactionError> {
        Ok(())
    }
}

#[derive(Default)]
struct Journal {
    statements: Vec<String>,
    failing: HashSet<String>,
}

/// Records every statement it receives as SQL text.
///
/// Statements registered with [`fail_on`](Self::fail_on) are recorded and then
/// fail, which lets callers exercise commit and rollback failure paths.
#[derive(Default)]
pub struct JournalingTransactionalStore {
    journal: Mutex<Journal>,
}

impl JournalingTransactionalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make statements starting with `keyword` (e.g. `"ROLLBACK"`) fail
    pub fn fail_on(&self, keyword: impl Into<String>) {
        self.lock().failing.insert(keyword.into());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn count(&self, keyword: &str) -> usize {
        self.lock()
            .statements
            .iter()
            .filter(|s| s.starts_with(keyword))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, statement: String) -> Result<(), TransactionError> {
        trace!("{}", statement);
        let mut journal = self.lock();
        let fails = journal.failing.iter().any(|k| statement.starts_with(k));
        journal.statements.push(statement.clone());
        if fails {
            Err(TransactionError::statement(statement, "injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionalStore for JournalingTransactionalStore {
    async fn begin(&self) -> Result<(), TransactionError> {
        self.record("BEGIN".to_string())
    }
    async fn savepoint(&self, name: &str) -> Result<(), TransactionError> {
        self.record(format!("SAVEPOINT {name}"))
    }
    async fn release_savepoint(&self, name: &str) -> Result<(), TransactionError> {
        self.record(format!("RELEASE SAVEPOINT {name}"))
    }
    async fn rollback_to_savepoint(&self, name: &str) -> Result<(), TransactionError> {
        self.record(format!("ROLLBACK TO SAVEPOINT {name}"))
    }
    async fn commit(&self) -> Result<(), TransactionError> {
        self.record("COMMIT".to_string())
    }
    async fn rollback(&self) -> Result<(), TransactionError> {
        self.record("ROLLBACK".to_string())
    }
}
