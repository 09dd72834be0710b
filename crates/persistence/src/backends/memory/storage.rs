//! Shared in-process storage and the durable transaction log.
//!
//! Prepared transactions reserve their writes through the log: every later
//! write, autocommit or transactional, is checked against the committed rows
//! overlaid with those reservations.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::config::EvictionPolicy;
use crate::core::TransactionId;
use crate::error::{RecordError, StorageResult};
use crate::types::EntityDescriptor;

use super::record;

/// Bookkeeping kept next to each stored record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RowMeta {
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub hits: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub seq: u64,
}

impl RowMeta {
    pub fn new(now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            created: now,
            accessed: now,
            hits: 0,
            expires_at,
            seq: u64::MAX,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A stored record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Row {
    pub record: Json,
    pub meta: RowMeta,
}

/// Records of one entity type keyed by canonical identity.
pub(crate) type View = BTreeMap<String, Row>;

/// One buffered write of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteOp {
    Put {
        entity_type: String,
        identity: String,
        record: Json,
        expires_at: Option<DateTime<Utc>>,
        /// The identity was absent when the write was staged.
        created: bool,
    },
    Delete {
        entity_type: String,
        identity: String,
    },
}

impl WriteOp {
    fn entity_type(&self) -> &str {
        match self {
            WriteOp::Put { entity_type, .. } | WriteOp::Delete { entity_type, .. } => entity_type,
        }
    }
}

/// Writes buffered by a transaction, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSet {
    ops: Vec<WriteOp>,
}

impl WriteSet {
    /// Returns the number of buffered writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn extend(&mut self, ops: Vec<WriteOp>) {
        self.ops.extend(ops);
    }

    /// Applies the writes for one entity type over a view.
    pub(crate) fn overlay(&self, entity_type: &str, view: &mut View, now: DateTime<Utc>) {
        for op in self.ops.iter().filter(|op| op.entity_type() == entity_type) {
            apply_op(view, op, now);
        }
    }
}

pub(crate) fn apply_op(rows: &mut View, op: &WriteOp, now: DateTime<Utc>) {
    match op {
        WriteOp::Put {
            identity,
            record,
            expires_at,
            ..
        } => match rows.get_mut(identity) {
            Some(row) => {
                row.record = record.clone();
                row.meta.expires_at = *expires_at;
            }
            None => {
                rows.insert(
                    identity.clone(),
                    Row {
                        record: record.clone(),
                        meta: RowMeta::new(now, *expires_at),
                    },
                );
            }
        },
        WriteOp::Delete { identity, .. } => {
            rows.remove(identity);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Table {
    pub rows: View,
    next_seq: u64,
    descriptor: Option<EntityDescriptor>,
}

impl Table {
    /// Returns the unexpired rows.
    pub fn view(&self, now: DateTime<Utc>) -> View {
        self.rows
            .iter()
            .filter(|(_, row)| !row.meta.is_expired(now))
            .map(|(id, row)| (id.clone(), row.clone()))
            .collect()
    }

    /// Returns the number of unexpired rows.
    pub fn live_len(&self, now: DateTime<Utc>) -> usize {
        self.rows.values().filter(|r| !r.meta.is_expired(now)).count()
    }

    fn apply(&mut self, op: &WriteOp, now: DateTime<Utc>) {
        apply_op(&mut self.rows, op, now);
        if let WriteOp::Put { identity, .. } = op {
            if let Some(row) = self.rows.get_mut(identity) {
                if row.meta.seq == u64::MAX {
                    self.next_seq += 1;
                    row.meta.seq = self.next_seq;
                }
            }
        }
    }

    /// Picks the row the eviction policy would remove first.
    pub fn victim(&self, policy: EvictionPolicy, now: DateTime<Utc>) -> Option<String> {
        let live = self.rows.iter().filter(|(_, r)| !r.meta.is_expired(now));
        let chosen = match policy {
            EvictionPolicy::None => None,
            EvictionPolicy::Lru => live.min_by_key(|(_, r)| (r.meta.accessed, r.meta.seq)),
            EvictionPolicy::Lfu => live.min_by_key(|(_, r)| (r.meta.hits, r.meta.seq)),
            EvictionPolicy::Fifo => live.min_by_key(|(_, r)| r.meta.seq),
            EvictionPolicy::Random => {
                let candidates: Vec<_> = live.collect();
                if candidates.is_empty() {
                    None
                } else {
                    let pick = (uuid::Uuid::new_v4().as_u128() % candidates.len() as u128) as usize;
                    candidates.get(pick).copied()
                }
            }
        };
        chosen.map(|(id, _)| id.clone())
    }
}

/// State of a transaction in the durable log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogState {
    Flushed,
    Prepared,
}

#[derive(Debug, Clone)]
struct LogEntry {
    state: LogState,
    writes: WriteSet,
}

/// Process-wide storage shared by every [`super::MemoryBackend`] built over
/// it.
///
/// Building a second backend over the same storage after dropping the first
/// one without a shutdown simulates a crash and restart: committed records
/// and prepared transactions survive, everything else is lost.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<HashMap<String, Table>>,
    log: Mutex<BTreeMap<TransactionId, LogEntry>>,
}

impl MemoryStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entity types with storage.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.tables.lock().keys().cloned().collect();
        types.sort();
        types
    }

    /// Returns the number of stored records of a type, expired ones included.
    pub fn record_count(&self, entity_type: &str) -> usize {
        self.tables
            .lock()
            .get(entity_type)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }

    /// Returns the ids of prepared transactions in the log.
    pub fn in_doubt(&self) -> Vec<TransactionId> {
        self.log
            .lock()
            .iter()
            .filter(|(_, e)| e.state == LogState::Prepared)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn has_table(&self, entity_type: &str) -> bool {
        self.tables.lock().contains_key(entity_type)
    }

    /// Creates the table if missing and records its descriptor. Returns
    /// true if it was created.
    pub(crate) fn ensure_table(&self, descriptor: &EntityDescriptor) -> bool {
        let mut tables = self.tables.lock();
        let entity_type = descriptor.entity_type.as_str();
        let created = !tables.contains_key(entity_type);
        let table = tables.entry(entity_type.to_string()).or_default();
        if table.descriptor.is_none() {
            table.descriptor = Some(descriptor.clone());
        }
        created
    }

    pub(crate) fn view(&self, entity_type: &str, now: DateTime<Utc>) -> View {
        self.tables
            .lock()
            .get(entity_type)
            .map(|t| t.view(now))
            .unwrap_or_default()
    }

    /// Runs `f` with exclusive access to one table.
    pub(crate) fn with_table<R>(&self, entity_type: &str, f: impl FnOnce(&mut Table) -> R) -> R {
        let mut tables = self.tables.lock();
        let table = tables.entry(entity_type.to_string()).or_default();
        f(table)
    }

    /// Runs an autocommit write on one table.
    ///
    /// `stage` computes the writes from the committed rows. They are checked
    /// against prepared transactions and applied, then `settle` runs over
    /// the updated table. Nothing is applied if either step fails.
    pub(crate) fn autocommit<R>(
        &self,
        entity_type: &str,
        now: DateTime<Utc>,
        stage: impl FnOnce(&Table) -> StorageResult<(R, Vec<WriteOp>)>,
        settle: impl FnOnce(&mut Table),
    ) -> StorageResult<R> {
        let mut tables = self.tables.lock();
        let (result, ops) = stage(tables.entry(entity_type.to_string()).or_default())?;
        check_writes(&tables, &self.log.lock(), None, &ops, now)?;
        let table = tables.entry(entity_type.to_string()).or_default();
        for op in &ops {
            table.apply(op, now);
        }
        settle(table);
        Ok(result)
    }

    /// Checks a transaction's writes and records them as prepared.
    ///
    /// Once recorded, the writes are reserved: later writes that would
    /// conflict with them fail, so committing them cannot.
    pub(crate) fn reserve(
        &self,
        id: &TransactionId,
        writes: &WriteSet,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let tables = self.tables.lock();
        let mut log = self.log.lock();
        check_writes(&tables, &log, Some(id), &writes.ops, now)?;
        log.insert(
            id.clone(),
            LogEntry {
                state: LogState::Prepared,
                writes: writes.clone(),
            },
        );
        Ok(())
    }

    /// Applies a transaction's writes atomically and drops its log entry.
    ///
    /// `check` re-validates the writes first; prepared writes were validated
    /// when they were reserved.
    pub(crate) fn commit(
        &self,
        id: &TransactionId,
        writes: &WriteSet,
        check: bool,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock();
        let mut log = self.log.lock();
        if check {
            check_writes(&tables, &log, Some(id), &writes.ops, now)?;
        }
        for op in &writes.ops {
            tables
                .entry(op.entity_type().to_string())
                .or_default()
                .apply(op, now);
        }
        log.remove(id);
        Ok(())
    }

    /// Records a read for the eviction statistics.
    pub(crate) fn record_access(&self, entity_type: &str, identity: &str, now: DateTime<Utc>) {
        if let Some(row) = self
            .tables
            .lock()
            .get_mut(entity_type)
            .and_then(|t| t.rows.get_mut(identity))
        {
            row.meta.hits += 1;
            row.meta.accessed = now;
        }
    }

    pub(crate) fn log_write(&self, id: &TransactionId, state: LogState, writes: &WriteSet) {
        self.log.lock().insert(
            id.clone(),
            LogEntry {
                state,
                writes: writes.clone(),
            },
        );
    }

    pub(crate) fn log_remove(&self, id: &TransactionId) -> bool {
        self.log.lock().remove(id).is_some()
    }

    /// Returns the number of log entries, flushed ones included.
    pub fn log_len(&self) -> usize {
        self.log.lock().len()
    }

    pub(crate) fn prepared(&self) -> Vec<(TransactionId, WriteSet)> {
        self.log
            .lock()
            .iter()
            .filter(|(_, e)| e.state == LogState::Prepared)
            .map(|(id, e)| (id.clone(), e.writes.clone()))
            .collect()
    }
}

/// Replays `ops` over the committed rows overlaid with the writes of every
/// prepared transaction other than `owner`.
///
/// Fails with `KeyViolation` when a create finds its identity taken or when
/// a written record shares its primary key or an alternate key with another
/// row.
fn check_writes(
    tables: &HashMap<String, Table>,
    log: &BTreeMap<TransactionId, LogEntry>,
    owner: Option<&TransactionId>,
    ops: &[WriteOp],
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let mut entity_types: Vec<&str> = ops.iter().map(WriteOp::entity_type).collect();
    entity_types.sort_unstable();
    entity_types.dedup();

    for entity_type in entity_types {
        let table = tables.get(entity_type);
        let mut view = table.map(|t| t.view(now)).unwrap_or_default();
        for (_, entry) in log
            .iter()
            .filter(|(id, e)| e.state == LogState::Prepared && Some(*id) != owner)
        {
            entry.writes.overlay(entity_type, &mut view, now);
        }

        let mut written = BTreeSet::new();
        for op in ops.iter().filter(|op| op.entity_type() == entity_type) {
            if let WriteOp::Put {
                identity, created, ..
            } = op
            {
                if *created && view.contains_key(identity) {
                    return Err(RecordError::KeyViolation {
                        entity_type: entity_type.to_string(),
                        key_name: "identity".to_string(),
                        key: identity.clone(),
                    }
                    .into());
                }
                written.insert(identity.as_str());
            }
            apply_op(&mut view, op, now);
        }

        let Some(descriptor) = table.and_then(|t| t.descriptor.as_ref()) else {
            continue;
        };
        for identity in written {
            if let Some(row) = view.get(identity) {
                record::check_unique(descriptor, &view, identity, &row.record)?;
            }
        }
    }
    Ok(())
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("tables", &self.tables.lock().len())
            .field("log", &self.log.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn put(identity: &str, expires_at: Option<DateTime<Utc>>) -> WriteOp {
        WriteOp::Put {
            entity_type: "T".to_string(),
            identity: identity.to_string(),
            record: json!({"id": identity}),
            expires_at,
            created: true,
        }
    }

    fn writes(ops: Vec<WriteOp>) -> WriteSet {
        let mut writes = WriteSet::default();
        writes.extend(ops);
        writes
    }

    #[test]
    fn test_apply_and_expiry() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let batch = writes(vec![put("a", None), put("b", Some(now))]);
        storage.commit(&"t".into(), &batch, true, now).unwrap();
        assert_eq!(storage.record_count("T"), 2);
        assert_eq!(storage.view("T", now).len(), 1);
    }

    #[test]
    fn test_reserved_identity_blocks_later_writes() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        storage
            .reserve(&"t1".into(), &writes(vec![put("a", None)]), now)
            .unwrap();

        let err = storage
            .commit(&"t2".into(), &writes(vec![put("a", None)]), true, now)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::KeyViolation);
        let err = storage
            .autocommit("T", now, |_| Ok(((), vec![put("a", None)])), |_| {})
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::KeyViolation);

        // The reservation does not block its owner.
        storage
            .commit(&"t1".into(), &writes(vec![put("a", None)]), false, now)
            .unwrap();
        assert_eq!(storage.record_count("T"), 1);
        assert_eq!(storage.log_len(), 0);
    }

    #[test]
    fn test_fifo_and_lfu_victims() {
        let storage = MemoryStorage::new();
        let now = Utc::now();
        let batch = writes(vec![put("a", None), put("b", None)]);
        storage.commit(&"t".into(), &batch, true, now).unwrap();
        storage.record_access("T", "a", now);
        storage.with_table("T", |t| {
            assert_eq!(t.victim(EvictionPolicy::Fifo, now).as_deref(), Some("a"));
            assert_eq!(t.victim(EvictionPolicy::Lfu, now).as_deref(), Some("b"));
            assert_eq!(t.victim(EvictionPolicy::None, now), None);
        });
    }

    #[test]
    fn test_overlay_only_touches_its_type() {
        let now = Utc::now();
        let batch = writes(vec![
            put("a", None),
            WriteOp::Delete {
                entity_type: "Other".to_string(),
                identity: "a".to_string(),
            },
        ]);
        let mut view = View::new();
        batch.overlay("T", &mut view, now);
        assert!(view.contains_key("a"));
    }

    #[test]
    fn test_log_tracks_prepared_only() {
        let storage = MemoryStorage::new();
        storage.log_write(&"t1".into(), LogState::Prepared, &WriteSet::default());
        storage.log_write(&"t2".into(), LogState::Flushed, &WriteSet::default());
        assert_eq!(storage.in_doubt(), vec![TransactionId::from("t1")]);
        assert!(storage.log_remove(&"t1".into()));
        assert!(storage.in_doubt().is_empty());
    }
}
