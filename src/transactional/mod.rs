//! Units of work around transactional handlers.
//!
//! One transaction per request: begun before the handler runs, committed when
//! it returns normally, rolled back when it fails or unwinds. Never both.

use crate::error::{Result, SwitchyardError};

/// Isolation levels a manager may honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// The default for most databases.
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// `None` leaves the choice to the database.
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

/// Begins transactions. Implemented by the persistence integration.
pub trait TransactionManager: Send + Sync + 'static {
    fn begin(&self, options: TransactionOptions) -> Result<Box<dyn Transaction>>;
}

/// A generic transaction abstraction
pub trait Transaction: Send {
    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// An open transaction that rolls back unless committed.
pub struct TransactionScope {
    tx: Option<Box<dyn Transaction>>,
}

impl TransactionScope {
    pub fn begin(manager: &dyn TransactionManager, options: TransactionOptions) -> Result<Self> {
        let tx = manager.begin(options)?;
        Ok(Self { tx: Some(tx) })
    }

    pub fn commit(mut self) -> Result<()> {
        match self.tx.take() {
            Some(mut tx) => tx.commit(),
            None => Err(SwitchyardError::Transaction("already finished".to_string())),
        }
    }

    pub fn rollback(mut self) -> Result<()> {
        match self.tx.take() {
            Some(mut tx) => tx.rollback(),
            None => Err(SwitchyardError::Transaction("already finished".to_string())),
        }
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            tracing::warn!("Transaction scope dropped without outcome, rolling back");
            if let Err(e) = tx.rollback() {
                tracing::error!(error = %e, "Rollback failed");
            }
        }
    }
}

/// Run `f` inside one transaction.
///
/// On `Err` the transaction is rolled back and the error from `f` is returned
/// unchanged, even when the rollback itself fails.
pub fn in_transaction<T, F>(
    manager: &dyn TransactionManager,
    options: TransactionOptions,
    f: F,
) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    let scope = TransactionScope::begin(manager, options)?;
    match f() {
        Ok(value) => {
            scope.commit()?;
            tracing::debug!("Transaction committed");
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = scope.rollback() {
                tracing::error!(error = %rollback_error, "Rollback failed");
            } else {
                tracing::debug!(cause = %error, "Transaction rolled back");
            }
            Err(error)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every transaction outcome.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingManager {
        pub(crate) log: Arc<Mutex<Vec<&'static str>>>,
    }

    struct RecordingTransaction {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TransactionManager for RecordingManager {
        fn begin(&self, _options: TransactionOptions) -> Result<Box<dyn Transaction>> {
            self.log.lock().unwrap().push("begin");
            Ok(Box::new(RecordingTransaction {
                log: self.log.clone(),
            }))
        }
    }

    impl Transaction for RecordingTransaction {
        fn commit(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("commit");
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.log.lock().unwrap().push("rollback");
            Ok(())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("handler failed")]
    struct HandlerFailed;

    #[test]
    fn test_commit_on_success() {
        let manager = RecordingManager::default();
        let value = in_transaction(&manager, TransactionOptions::default(), || Ok(3)).unwrap();
        assert_eq!(value, 3);
        assert_eq!(*manager.log.lock().unwrap(), ["begin", "commit"]);
    }

    #[test]
    fn test_rollback_keeps_original_error() {
        let manager = RecordingManager::default();
        let err = in_transaction(&manager, TransactionOptions::default(), || -> anyhow::Result<()> {
            Err(HandlerFailed.into())
        })
        .unwrap_err();
        assert!(err.downcast_ref::<HandlerFailed>().is_some());
        assert_eq!(*manager.log.lock().unwrap(), ["begin", "rollback"]);
    }

    #[test]
    fn test_dropped_scope_rolls_back() {
        let manager = RecordingManager::default();
        {
            let _scope = TransactionScope::begin(&manager, TransactionOptions::default()).unwrap();
        }
        assert_eq!(*manager.log.lock().unwrap(), ["begin", "rollback"]);
    }
}
