//! Transaction Manager (C13, §4.8): snapshot/restore the frame store around
//! a `transaction:` node's body, non-nested.

use flow_store::FrameStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("nested transactions are not supported")]
    AlreadyOpen,

    #[error("all record changes were rolled back: {0}")]
    RolledBack(String),
}

/// One flow run's transaction state. A single boolean is enough since
/// nesting is rejected outright rather than supported with a real stack
/// (§4.8: "nested transactions raise").
pub struct TransactionManager {
    store: Arc<dyn FrameStore>,
    open: AtomicBool,
}

impl TransactionManager {
    pub fn new(store: Arc<dyn FrameStore>) -> Self {
        Self { store, open: AtomicBool::new(false) }
    }

    /// Runs `body` inside a transaction: snapshots every frame first, and
    /// on `Err` restores the snapshot before propagating a wrapped error.
    /// On `Ok`, the snapshot is simply dropped (commit = make it garbage).
    pub async fn run<F, Fut, T, E>(&self, body: F) -> Result<T, TransactionError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if self.open.swap(true, Ordering::SeqCst) {
            return Err(TransactionError::AlreadyOpen);
        }
        let snapshot = self.store.snapshot();
        let result = body().await;
        self.open.store(false, Ordering::SeqCst);
        match result {
            Ok(v) => Ok(v),
            Err(e) => {
                self.store.restore(snapshot);
                Err(TransactionError::RolledBack(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::value::Value;
    use flow_store::InMemoryFrameStore;

    #[tokio::test]
    async fn rollback_restores_pre_transaction_state() {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        store.ensure_frame("widgets");
        let mut row = indexmap::IndexMap::new();
        row.insert("id".to_string(), Value::Int(1));
        store.insert("widgets", row).unwrap();

        let manager = TransactionManager::new(store.clone());
        let result: Result<(), TransactionError> = manager
            .run(|| async {
                let mut row = indexmap::IndexMap::new();
                row.insert("id".to_string(), Value::Int(2));
                store.insert("widgets", row).unwrap();
                Err::<(), _>("boom")
            })
            .await;

        assert!(matches!(result, Err(TransactionError::RolledBack(_))));
        assert_eq!(store.all("widgets").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_keeps_changes() {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        store.ensure_frame("widgets");

        let manager = TransactionManager::new(store.clone());
        let result: Result<(), TransactionError> = manager
            .run(|| async {
                let mut row = indexmap::IndexMap::new();
                row.insert("id".to_string(), Value::Int(1));
                store.insert("widgets", row).unwrap();
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(store.all("widgets").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nested_transactions_are_rejected() {
        let store: Arc<dyn FrameStore> = Arc::new(InMemoryFrameStore::new());
        let manager = TransactionManager::new(store);
        let result: Result<(), TransactionError> = manager
            .run(|| async {
                let inner: Result<(), TransactionError> = manager.run(|| async { Ok(()) }).await;
                assert!(matches!(inner, Err(TransactionError::AlreadyOpen)));
                Ok(())
            })
            .await;
        assert!(result.is_ok());
    }
}
