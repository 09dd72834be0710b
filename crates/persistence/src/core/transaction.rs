//! Transaction coordination protocol.
//!
//! Backends that support transactions implement [`TransactionCoordinator`].
//! [`TransactionLedger`] holds the bookkeeping shared by such backends: it
//! enforces which verb is valid in which [`TransactionStatus`], bounds the
//! number of live transactions, and times out transactions that take too
//! long to resolve. Each entry carries a backend-defined write set `W`.
//! Resolved entries are kept for a bounded history so that a repeated
//! `commit` reports `AlreadyResolved`; older ones are dropped and report
//! `NotFound`.
//!
//! ```text
//!            begin           prepare            commit
//!   (none) ───────► Active ──────────► Prepared ───────► Committed
//!                   │  ▲                  │
//!           suspend │  │ resume           │ rollback
//!                   ▼  │                  ▼
//!                 Suspended ──────────► RolledBack
//!                            rollback
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult, TransactionError};

/// Application-supplied transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Creates an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How the caller obtained its transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOrigin {
    /// Created with `begin`.
    Begun,
    /// Attached with `join`.
    Joined,
    /// Returned by `recover` after a restart.
    Recovered,
}

/// A caller's handle to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    id: TransactionId,
    origin: TransactionOrigin,
}

impl Transaction {
    /// Creates a handle.
    pub fn new(id: TransactionId, origin: TransactionOrigin) -> Self {
        Self { id, origin }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    /// Returns how this handle was obtained.
    pub fn origin(&self) -> TransactionOrigin {
        self.origin
    }
}

/// Status of a transaction in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionStatus {
    /// Accepting work.
    Active,
    /// Detached from its caller; accepts no work until resumed.
    Suspended,
    /// First commit phase done; commit can no longer fail for resource reasons.
    Prepared,
    /// Resolved by commit.
    Committed,
    /// Resolved by rollback.
    RolledBack,
}

impl TransactionStatus {
    /// Returns true for committed and rolled back transactions.
    pub fn is_resolved(self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::RolledBack)
    }

    /// Returns true while the transaction may still accept work.
    pub fn is_live(self) -> bool {
        matches!(self, TransactionStatus::Active | TransactionStatus::Suspended)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Active => write!(f, "active"),
            TransactionStatus::Suspended => write!(f, "suspended"),
            TransactionStatus::Prepared => write!(f, "prepared"),
            TransactionStatus::Committed => write!(f, "committed"),
            TransactionStatus::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// The transaction verbs a backend implements.
///
/// Every verb may fail with `OperationTimeout` or `NotEnoughResource`.
pub trait TransactionCoordinator: Send + Sync {
    /// Creates a transaction. Fails if `id` denotes a live transaction.
    fn begin(&self, id: &TransactionId) -> StorageResult<Transaction>;

    /// Attaches to an existing transaction. Fails with `NotFound` if absent.
    fn join(&self, id: &TransactionId) -> StorageResult<Transaction>;

    /// Detaches the transaction from its caller.
    fn suspend(&self, txn: &Transaction) -> StorageResult<()>;

    /// Reattaches a suspended transaction.
    fn resume(&self, txn: &Transaction) -> StorageResult<()>;

    /// First phase of two-phase commit.
    fn prepare(&self, txn: &Transaction) -> StorageResult<()>;

    /// Applies the transaction's work.
    fn commit(&self, txn: &Transaction) -> StorageResult<()>;

    /// Discards the transaction's work.
    fn rollback(&self, txn: &Transaction) -> StorageResult<()>;

    /// Drops bookkeeping of a transaction resolved elsewhere.
    fn forget(&self, txn: &Transaction) -> StorageResult<()>;

    /// Forces buffered work to durable storage without ending the transaction.
    fn flush(&self, txn: &Transaction) -> StorageResult<()>;

    /// Lists prepared but unresolved transactions left by a previous run.
    fn recover(&self) -> StorageResult<Vec<Transaction>>;

    /// Returns the status of a transaction, if known.
    fn status(&self, id: &TransactionId) -> Option<TransactionStatus>;
}

/// Number of resolved transactions a ledger remembers by default.
pub const DEFAULT_RESOLVED_HISTORY: usize = 1024;

struct LedgerEntry<W> {
    status: TransactionStatus,
    started: Instant,
    participants: usize,
    serial: u64,
    writes: W,
}

impl<W: Default> LedgerEntry<W> {
    fn new(status: TransactionStatus, serial: u64, participants: usize, writes: W) -> Self {
        Self {
            status,
            started: Instant::now(),
            participants,
            serial,
            writes,
        }
    }

    fn roll_back(&mut self) {
        self.status = TransactionStatus::RolledBack;
        self.writes = W::default();
    }
}

struct LedgerState<W> {
    entries: HashMap<TransactionId, LedgerEntry<W>>,
    resolved: VecDeque<(TransactionId, u64)>,
    next_serial: u64,
}

impl<W> LedgerState<W> {
    fn serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Queues a just-resolved entry and drops the oldest resolved entries
    /// beyond `history`.
    fn retire(&mut self, id: &TransactionId, history: usize) {
        let Some(serial) = self.entries.get(id).map(|e| e.serial) else {
            return;
        };
        self.resolved.push_back((id.clone(), serial));
        while self.resolved.len() > history {
            let Some((old, serial)) = self.resolved.pop_front() else {
                break;
            };
            // The id may have been forgotten or begun again since.
            if self
                .entries
                .get(&old)
                .is_some_and(|e| e.serial == serial && e.status.is_resolved())
            {
                self.entries.remove(&old);
            }
        }
    }
}

/// Bookkeeping for the transaction verbs.
pub struct TransactionLedger<W> {
    backend_name: String,
    state: Mutex<LedgerState<W>>,
    max_live: Option<usize>,
    timeout: Option<Duration>,
    history: usize,
}

impl<W: Default> TransactionLedger<W> {
    /// Creates a ledger without limits or timeout.
    pub fn new(backend_name: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            state: Mutex::new(LedgerState {
                entries: HashMap::new(),
                resolved: VecDeque::new(),
                next_serial: 0,
            }),
            max_live: None,
            timeout: None,
            history: DEFAULT_RESOLVED_HISTORY,
        }
    }

    /// Bounds the number of unresolved transactions.
    pub fn with_max_live(mut self, max: usize) -> Self {
        self.max_live = Some(max);
        self
    }

    /// Rolls back transactions older than `timeout` at prepare or commit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bounds how many resolved transactions are remembered. At least one
    /// is always kept.
    pub fn with_resolved_history(mut self, history: usize) -> Self {
        self.history = history.max(1);
        self
    }

    /// Returns the status of a transaction, if known.
    pub fn status(&self, id: &TransactionId) -> Option<TransactionStatus> {
        self.state.lock().entries.get(id).map(|e| e.status)
    }

    /// Returns the number of unresolved transactions.
    pub fn unresolved_count(&self) -> usize {
        self.state
            .lock()
            .entries
            .values()
            .filter(|e| !e.status.is_resolved())
            .count()
    }

    /// Returns the number of transactions tracked, resolved ones included.
    pub fn tracked_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Starts a transaction.
    pub fn begin(&self, id: &TransactionId) -> StorageResult<Transaction> {
        let mut state = self.state.lock();
        if state.entries.get(id).is_some_and(|e| !e.status.is_resolved()) {
            return Err(TransactionError::AlreadyExists { id: id.to_string() }.into());
        }
        if let Some(max) = self.max_live {
            let unresolved = state
                .entries
                .values()
                .filter(|e| !e.status.is_resolved())
                .count();
            if unresolved >= max {
                return Err(StorageError::NotEnoughResource {
                    resource: format!("transaction slots ({} in use)", unresolved),
                    operation: "begin".to_string(),
                });
            }
        }
        let serial = state.serial();
        state.entries.insert(
            id.clone(),
            LedgerEntry::new(TransactionStatus::Active, serial, 1, W::default()),
        );
        tracing::debug!(backend = %self.backend_name, txn = %id, "Transaction begun");
        Ok(Transaction::new(id.clone(), TransactionOrigin::Begun))
    }

    /// Attaches another participant to a live transaction.
    pub fn join(&self, id: &TransactionId) -> StorageResult<Transaction> {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| TransactionError::NotFound { id: id.to_string() })?;
        ensure(id, entry.status, "join", |s| s.is_live())?;
        entry.participants += 1;
        tracing::debug!(
            backend = %self.backend_name,
            txn = %id,
            participants = entry.participants,
            "Transaction joined"
        );
        Ok(Transaction::new(id.clone(), TransactionOrigin::Joined))
    }

    /// Moves an active transaction to suspended.
    pub fn suspend(&self, txn: &Transaction) -> StorageResult<()> {
        self.transition(txn, "suspend", TransactionStatus::Active, TransactionStatus::Suspended)
    }

    /// Moves a suspended transaction back to active.
    pub fn resume(&self, txn: &Transaction) -> StorageResult<()> {
        self.transition(txn, "resume", TransactionStatus::Suspended, TransactionStatus::Active)
    }

    /// Runs `f` over the write set of an active transaction.
    pub fn with_writes<R>(
        &self,
        txn: &Transaction,
        f: impl FnOnce(&mut W) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "write through", |s| {
            s == TransactionStatus::Active
        })?;
        f(&mut entry.writes)
    }

    /// Runs `f` over the write set of an unresolved transaction.
    pub fn read_writes<R>(
        &self,
        txn: &Transaction,
        f: impl FnOnce(&W) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "read through", |s| !s.is_resolved())?;
        f(&entry.writes)
    }

    /// First commit phase. `persist` makes the write set durable.
    ///
    /// If `persist` fails the transaction is rolled back and its error is
    /// returned.
    pub fn prepare(
        &self,
        txn: &Transaction,
        persist: impl FnOnce(&W) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "prepare", |s| s == TransactionStatus::Active)?;
        let outcome = self
            .check_timeout(txn.id(), entry, "prepare")
            .and_then(|()| persist(&entry.writes));
        if let Err(e) = outcome {
            entry.roll_back();
            state.retire(txn.id(), self.history);
            tracing::warn!(
                backend = %self.backend_name,
                txn = %txn.id(),
                error = %e,
                "Prepare failed, transaction rolled back"
            );
            return Err(e);
        }
        entry.status = TransactionStatus::Prepared;
        tracing::debug!(backend = %self.backend_name, txn = %txn.id(), "Transaction prepared");
        Ok(())
    }

    /// Resolves by commit. `apply` receives the write set and the status the
    /// transaction had before the call.
    ///
    /// An active transaction is committed in one phase. If `apply` fails the
    /// transaction is rolled back and its error is returned.
    pub fn commit(
        &self,
        txn: &Transaction,
        apply: impl FnOnce(W, TransactionStatus) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "commit", |s| {
            matches!(s, TransactionStatus::Active | TransactionStatus::Prepared)
        })?;
        let from = entry.status;
        let outcome = if from == TransactionStatus::Active {
            self.check_timeout(txn.id(), entry, "commit")
        } else {
            Ok(())
        }
        .and_then(|()| apply(std::mem::take(&mut entry.writes), from));
        if let Err(e) = outcome {
            entry.roll_back();
            state.retire(txn.id(), self.history);
            tracing::warn!(
                backend = %self.backend_name,
                txn = %txn.id(),
                error = %e,
                "Commit failed, transaction rolled back"
            );
            return Err(e);
        }
        entry.status = TransactionStatus::Committed;
        state.retire(txn.id(), self.history);
        tracing::info!(backend = %self.backend_name, txn = %txn.id(), "Transaction committed");
        Ok(())
    }

    /// Resolves by rollback. `discard` receives the write set.
    pub fn rollback(
        &self,
        txn: &Transaction,
        discard: impl FnOnce(W) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "roll back", |s| !s.is_resolved())?;
        entry.status = TransactionStatus::RolledBack;
        let writes = std::mem::take(&mut entry.writes);
        state.retire(txn.id(), self.history);
        discard(writes)?;
        tracing::info!(backend = %self.backend_name, txn = %txn.id(), "Transaction rolled back");
        Ok(())
    }

    /// Drops a prepared or resolved transaction.
    pub fn forget(&self, txn: &Transaction) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "forget", |s| !s.is_live())?;
        state.entries.remove(txn.id());
        tracing::debug!(backend = %self.backend_name, txn = %txn.id(), "Transaction forgotten");
        Ok(())
    }

    /// Makes the write set of an active transaction durable.
    pub fn flush(
        &self,
        txn: &Transaction,
        persist: impl FnOnce(&W) -> StorageResult<()>,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, "flush", |s| s == TransactionStatus::Active)?;
        persist(&entry.writes)
    }

    /// Re-registers a prepared transaction found in durable storage.
    ///
    /// Returns `None` if the id is already tracked.
    pub fn restore_prepared(&self, id: TransactionId, writes: W) -> Option<Transaction> {
        let mut state = self.state.lock();
        if state.entries.contains_key(&id) {
            return None;
        }
        let serial = state.serial();
        state.entries.insert(
            id.clone(),
            LedgerEntry::new(TransactionStatus::Prepared, serial, 0, writes),
        );
        Some(Transaction::new(id, TransactionOrigin::Recovered))
    }

    /// Rolls back every active or suspended transaction.
    pub fn abort_all(&self) -> Vec<TransactionId> {
        let mut state = self.state.lock();
        let mut aborted = Vec::new();
        for (id, entry) in state.entries.iter_mut().filter(|(_, e)| e.status.is_live()) {
            entry.roll_back();
            aborted.push(id.clone());
        }
        for id in &aborted {
            state.retire(id, self.history);
        }
        aborted
    }

    fn transition(
        &self,
        txn: &Transaction,
        operation: &str,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        let entry = lookup(&mut state.entries, txn.id())?;
        ensure(txn.id(), entry.status, operation, |s| s == from)?;
        entry.status = to;
        tracing::debug!(
            backend = %self.backend_name,
            txn = %txn.id(),
            status = %to,
            "Transaction {}",
            operation
        );
        Ok(())
    }

    fn check_timeout(
        &self,
        id: &TransactionId,
        entry: &LedgerEntry<W>,
        operation: &str,
    ) -> StorageResult<()> {
        let Some(timeout) = self.timeout else {
            return Ok(());
        };
        if entry.started.elapsed() <= timeout {
            return Ok(());
        }
        tracing::warn!(backend = %self.backend_name, txn = %id, "Transaction timed out");
        Err(StorageError::OperationTimeout {
            operation: format!("{} of transaction {}", operation, id),
            timeout_ms: Some(timeout.as_millis().try_into().unwrap_or(u64::MAX)),
        })
    }
}

impl<W> fmt::Debug for TransactionLedger<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionLedger")
            .field("backend_name", &self.backend_name)
            .field("tracked", &self.state.lock().entries.len())
            .field("max_live", &self.max_live)
            .field("timeout", &self.timeout)
            .field("history", &self.history)
            .finish()
    }
}

fn lookup<'a, W>(
    entries: &'a mut HashMap<TransactionId, LedgerEntry<W>>,
    id: &TransactionId,
) -> StorageResult<&'a mut LedgerEntry<W>> {
    entries
        .get_mut(id)
        .ok_or_else(|| TransactionError::NotFound { id: id.to_string() }.into())
}

fn ensure(
    id: &TransactionId,
    status: TransactionStatus,
    operation: &str,
    allowed: impl Fn(TransactionStatus) -> bool,
) -> StorageResult<()> {
    if allowed(status) {
        return Ok(());
    }
    let err = if status.is_resolved() {
        TransactionError::AlreadyResolved {
            id: id.to_string(),
            outcome: status.to_string(),
        }
    } else {
        TransactionError::InvalidState {
            id: id.to_string(),
            status: status.to_string(),
            operation: operation.to_string(),
        }
    };
    Err(err.into())
}
