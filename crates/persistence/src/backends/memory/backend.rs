//! The in-memory [`ProviderBackend`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use crate::config::ProviderConfig;
use crate::core::{
    Capabilities, Capability, ProviderBackend, SessionContext, Transaction,
    TransactionCoordinator, TransactionId, TransactionLedger, TransactionOrigin,
    TransactionStatus,
};
use crate::error::{ErrorKind, StorageResult};
use crate::types::{Entity, EntityDescriptor};

use super::data_source::MemoryDataSource;
use super::storage::{LogState, MemoryStorage, WriteSet};

const BACKEND_NAME: &str = "memory";

/// Provider property bounding the number of unresolved transactions.
pub const MAX_TRANSACTIONS_PROPERTY: &str = "max-transactions";

/// Provider property with the transaction timeout, in humantime format.
pub const TRANSACTION_TIMEOUT_PROPERTY: &str = "transaction-timeout";

/// Provider property bounding how many resolved transactions are remembered.
pub const RESOLVED_HISTORY_PROPERTY: &str = "resolved-history";

/// In-memory backend with full transaction support.
///
/// Records live in a [`MemoryStorage`] that can be shared between backend
/// instances to model a restart. Prepared transactions are written to the
/// storage's log and survive such a restart; [`TransactionCoordinator::recover`]
/// reports them.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use helios_storage_spi::backends::memory::{MemoryBackend, MemoryStorage};
///
/// let storage = Arc::new(MemoryStorage::new());
/// let backend = MemoryBackend::with_storage(Arc::clone(&storage));
/// assert!(Arc::ptr_eq(backend.storage(), &storage));
/// ```
pub struct MemoryBackend {
    storage: Arc<MemoryStorage>,
    ledger: RwLock<Arc<TransactionLedger<WriteSet>>>,
}

impl MemoryBackend {
    /// Creates a backend over fresh storage.
    pub fn new() -> Self {
        Self::with_storage(Arc::new(MemoryStorage::new()))
    }

    /// Creates a backend over existing storage.
    pub fn with_storage(storage: Arc<MemoryStorage>) -> Self {
        Self {
            storage,
            ledger: RwLock::new(Arc::new(TransactionLedger::new(BACKEND_NAME))),
        }
    }

    /// Returns the underlying storage.
    pub fn storage(&self) -> &Arc<MemoryStorage> {
        &self.storage
    }

    /// Returns the number of transactions the ledger tracks, resolved ones
    /// included.
    pub fn tracked_transactions(&self) -> usize {
        self.ledger().tracked_count()
    }

    fn ledger(&self) -> Arc<TransactionLedger<WriteSet>> {
        Arc::clone(&self.ledger.read())
    }

    /// Drops the log entry of a transaction the ledger rolled back while
    /// failing `result`.
    fn settle(&self, txn: &Transaction, result: StorageResult<()>) -> StorageResult<()> {
        if result.is_err() && self.status(txn.id()) == Some(TransactionStatus::RolledBack) {
            self.storage.log_remove(txn.id());
        }
        result
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("storage", &self.storage)
            .field("ledger", &self.ledger.read())
            .finish()
    }
}

impl ProviderBackend for MemoryBackend {
    type Session<E: Entity> = MemoryDataSource<E>;

    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::new()
            .with(Capability::Crud)
            .with(Capability::Transactions)
            .with(Capability::TwoPhaseCommit)
            .with(Capability::SchemaCreation)
            .with(Capability::TimeToLive)
            .with(Capability::CacheSupport)
            .with(Capability::Cursors)
    }

    fn on_activate(&self, config: &ProviderConfig) -> StorageResult<()> {
        let mut ledger = TransactionLedger::new(BACKEND_NAME);
        if let Some(max) = config.usize_property(MAX_TRANSACTIONS_PROPERTY)? {
            ledger = ledger.with_max_live(max);
        }
        if let Some(timeout) = config.duration_property(TRANSACTION_TIMEOUT_PROPERTY)? {
            ledger = ledger.with_timeout(timeout);
        }
        if let Some(history) = config.usize_property(RESOLVED_HISTORY_PROPERTY)? {
            ledger = ledger.with_resolved_history(history);
        }
        tracing::debug!(provider = %config.id, ledger = ?ledger, "Memory backend activated");
        *self.ledger.write() = Arc::new(ledger);
        Ok(())
    }

    fn on_shutdown(&self, grace: Duration) -> StorageResult<()> {
        let aborted = self.ledger().abort_all();
        for id in &aborted {
            self.storage.log_remove(id);
        }
        if !aborted.is_empty() {
            tracing::warn!(
                aborted = aborted.len(),
                grace_ms = grace.as_millis() as u64,
                "Rolled back unresolved transactions at shutdown"
            );
        }
        Ok(())
    }

    fn open_session<E: Entity>(
        &self,
        context: SessionContext,
    ) -> StorageResult<MemoryDataSource<E>> {
        self.storage.ensure_table(context.descriptor());
        Ok(MemoryDataSource::new(
            context,
            Arc::clone(&self.storage),
            self.ledger(),
        ))
    }

    fn check_type(&self, descriptor: &EntityDescriptor) -> StorageResult<bool> {
        Ok(self.storage.has_table(descriptor.entity_type.as_str()))
    }

    fn create_type(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        if !self.storage.ensure_table(descriptor) {
            tracing::debug!(entity_type = %descriptor.entity_type, "Table already exists");
        }
        Ok(())
    }

    fn transactions(&self) -> Option<&dyn TransactionCoordinator> {
        Some(self)
    }
}

impl TransactionCoordinator for MemoryBackend {
    fn begin(&self, id: &TransactionId) -> StorageResult<Transaction> {
        self.ledger().begin(id)
    }

    fn join(&self, id: &TransactionId) -> StorageResult<Transaction> {
        self.ledger().join(id)
    }

    fn suspend(&self, txn: &Transaction) -> StorageResult<()> {
        self.ledger().suspend(txn)
    }

    fn resume(&self, txn: &Transaction) -> StorageResult<()> {
        self.ledger().resume(txn)
    }

    fn prepare(&self, txn: &Transaction) -> StorageResult<()> {
        let result = self
            .ledger()
            .prepare(txn, |writes| self.storage.reserve(txn.id(), writes, Utc::now()));
        self.settle(txn, result)
    }

    fn commit(&self, txn: &Transaction) -> StorageResult<()> {
        let result = self.ledger().commit(txn, |writes, from| {
            let check = from != TransactionStatus::Prepared;
            self.storage.commit(txn.id(), &writes, check, Utc::now())
        });
        self.settle(txn, result)
    }

    fn rollback(&self, txn: &Transaction) -> StorageResult<()> {
        self.ledger().rollback(txn, |_| {
            self.storage.log_remove(txn.id());
            Ok(())
        })
    }

    fn forget(&self, txn: &Transaction) -> StorageResult<()> {
        match self.ledger().forget(txn) {
            Ok(()) => {
                self.storage.log_remove(txn.id());
                Ok(())
            }
            // Known only to the log, e.g. prepared before a restart.
            Err(e) if e.kind() == ErrorKind::NotFound && self.storage.log_remove(txn.id()) => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn flush(&self, txn: &Transaction) -> StorageResult<()> {
        self.ledger().flush(txn, |writes| {
            self.storage.log_write(txn.id(), LogState::Flushed, writes);
            Ok(())
        })
    }

    fn recover(&self) -> StorageResult<Vec<Transaction>> {
        let ledger = self.ledger();
        let mut recovered = Vec::new();
        for (id, writes) in self.storage.prepared() {
            match ledger.restore_prepared(id.clone(), writes) {
                Some(txn) => recovered.push(txn),
                None if ledger.status(&id) == Some(TransactionStatus::Prepared) => {
                    recovered.push(Transaction::new(id, TransactionOrigin::Recovered));
                }
                None => {}
            }
        }
        Ok(recovered)
    }

    fn status(&self, id: &TransactionId) -> Option<TransactionStatus> {
        self.ledger().status(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_reads_ledger_properties() {
        let backend = MemoryBackend::new();
        let config =
            ProviderConfig::new("p", BACKEND_NAME).with_property(MAX_TRANSACTIONS_PROPERTY, "1");
        backend.on_activate(&config).unwrap();
        backend.begin(&"a".into()).unwrap();
        let err = backend.begin(&"b".into()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEnoughResource);
    }

    #[test]
    fn test_invalid_property_fails_activation() {
        let backend = MemoryBackend::new();
        let config = ProviderConfig::new("p", BACKEND_NAME)
            .with_property(TRANSACTION_TIMEOUT_PROPERTY, "soon");
        assert!(backend.on_activate(&config).is_err());
    }

    #[test]
    fn test_shutdown_discards_flushed_work() {
        let backend = MemoryBackend::new();
        let txn = backend.begin(&"t".into()).unwrap();
        backend.flush(&txn).unwrap();
        backend.on_shutdown(Duration::ZERO).unwrap();
        assert_eq!(backend.status(txn.id()), Some(TransactionStatus::RolledBack));
        assert!(backend.storage().in_doubt().is_empty());
    }

    #[test]
    fn test_forget_log_only_transaction() {
        let storage = Arc::new(MemoryStorage::new());
        let first = MemoryBackend::with_storage(Arc::clone(&storage));
        let txn = first.begin(&"t".into()).unwrap();
        first.prepare(&txn).unwrap();
        drop(first);

        let second = MemoryBackend::with_storage(storage);
        second.forget(&txn).unwrap();
        assert!(second.recover().unwrap().is_empty());
    }

    #[test]
    fn test_timed_out_flushed_transaction_leaves_no_log() {
        let backend = MemoryBackend::new();
        let config = ProviderConfig::new("p", BACKEND_NAME)
            .with_property(TRANSACTION_TIMEOUT_PROPERTY, "1ms");
        backend.on_activate(&config).unwrap();
        let txn = backend.begin(&"t".into()).unwrap();
        backend.flush(&txn).unwrap();
        assert_eq!(backend.storage().log_len(), 1);

        std::thread::sleep(Duration::from_millis(10));
        let err = backend.commit(&txn).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationTimeout);
        assert_eq!(backend.storage().log_len(), 0);
    }

    #[test]
    fn test_unknown_commit_keeps_in_doubt_log() {
        let storage = Arc::new(MemoryStorage::new());
        let first = MemoryBackend::with_storage(Arc::clone(&storage));
        let txn = first.begin(&"t".into()).unwrap();
        first.prepare(&txn).unwrap();
        drop(first);

        // Not yet recovered, so the new ledger does not know the id.
        let second = MemoryBackend::with_storage(Arc::clone(&storage));
        assert_eq!(second.commit(&txn).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(storage.in_doubt(), vec![TransactionId::from("t")]);
    }
}
