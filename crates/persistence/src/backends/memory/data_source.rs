//! [`DataSource`] over [`MemoryStorage`].
//!
//! Autocommit writes run under the table lock and are applied at once.
//! Transactional writes are staged against the committed rows overlaid
//! with the transaction's own writes and appended to its [`WriteSet`].

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use crate::config::EvictionPolicy;
use crate::core::{
    CachePolicy, Cursor, DataSource, DataSourceControl, NativeQuery, SessionContext, Transaction,
    TransactionLedger,
};
use crate::error::{StorageError, StorageResult};
use crate::query::{Query, QueryEvaluator};
use crate::types::{Entity, EntityDescriptor, Key};

use super::record::{self, KeyKind};
use super::storage::{MemoryStorage, Row, Table, View, WriteOp, WriteSet, apply_op};

/// Compares a caller-supplied key with one extracted from a record.
fn same_key(wanted: &Key, found: &Key) -> bool {
    wanted.len() == found.len()
        && wanted
            .values()
            .iter()
            .zip(found.values())
            .all(|(w, f)| w.compare_json(&f.to_json()) == Some(CmpOrdering::Equal))
}

fn find<'v>(
    view: &'v View,
    descriptor: &EntityDescriptor,
    kind: KeyKind<'_>,
    key: &Key,
) -> Option<(&'v String, &'v Row)> {
    if let KeyKind::Identity = kind {
        if let Some(found) = view.get_key_value(&key.canonical()) {
            return Some(found);
        }
    }
    view.iter().find(|(_, row)| {
        kind.extract(descriptor, &row.record)
            .is_some_and(|found| same_key(key, &found))
    })
}

fn select(view: View, descriptor: &EntityDescriptor, kind: KeyKind<'_>, keys: &[Key]) -> Vec<Json> {
    view.into_values()
        .filter(|row| {
            keys.is_empty()
                || kind
                    .extract(descriptor, &row.record)
                    .is_some_and(|found| keys.iter().any(|k| same_key(k, &found)))
        })
        .map(|row| row.record)
        .collect()
}

/// Removes rows chosen by the eviction policy until the table fits its
/// hard limit.
fn evict_over_limit(table: &mut Table, policy: &CachePolicy, now: DateTime<Utc>) -> u64 {
    let Some(limit) = policy.hard_limit_size else {
        return 0;
    };
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let mut evicted = 0;
    while table.live_len(now) > limit {
        let Some(victim) = table.victim(policy.eviction_policy, now) else {
            break;
        };
        table.rows.remove(&victim);
        evicted += 1;
    }
    if evicted > 0 {
        tracing::debug!(
            cache = %policy.id,
            eviction_policy = %policy.eviction_policy,
            evicted,
            "Evicted records over hard limit"
        );
    }
    evicted
}

/// Writes being assembled for one operation.
struct Staging<'a> {
    descriptor: &'a EntityDescriptor,
    policy: Option<&'a CachePolicy>,
    view: View,
    initial_len: usize,
    ops: Vec<WriteOp>,
    now: DateTime<Utc>,
}

impl<'a> Staging<'a> {
    fn new(
        descriptor: &'a EntityDescriptor,
        policy: Option<&'a CachePolicy>,
        view: View,
        now: DateTime<Utc>,
    ) -> Self {
        let initial_len = view.len();
        Self {
            descriptor,
            policy,
            view,
            initial_len,
            ops: Vec::new(),
            now,
        }
    }

    /// Explicit TTL first, then the policy's. Zero never expires.
    fn expiry(&self, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
        ttl.or_else(|| self.policy.and_then(|p| p.ttl))
            .filter(|d| !d.is_zero())
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| self.now.checked_add_signed(d))
    }

    fn next_integer(&self) -> i64 {
        let fields = self.descriptor.identity_fields();
        self.view
            .values()
            .filter_map(|row| {
                fields
                    .iter()
                    .filter_map(|f| row.record.get(*f).and_then(Json::as_i64))
                    .max()
            })
            .max()
            .unwrap_or(0)
            .saturating_add(1)
    }

    fn identity_of(&self, record: &Json) -> StorageResult<Key> {
        self.descriptor.identity_key(record).ok_or_else(|| {
            record::constraint(self.descriptor, "identity", "identity is missing".to_string())
        })
    }

    fn locate(
        &self,
        kind: KeyKind<'_>,
        key: &Key,
    ) -> StorageResult<(String, Json, Option<DateTime<Utc>>)> {
        find(&self.view, self.descriptor, kind, key)
            .map(|(id, row)| (id.clone(), row.record.clone(), row.meta.expires_at))
            .ok_or_else(|| record::not_found(self.descriptor, key))
    }

    fn check_capacity(&self, operation: &str) -> StorageResult<()> {
        let Some(policy) = self.policy else {
            return Ok(());
        };
        let Some(limit) = policy.hard_limit_size else {
            return Ok(());
        };
        let size = self.view.len() as u64;
        if policy.eviction_policy == EvictionPolicy::None
            && size > limit
            && self.view.len() > self.initial_len
        {
            return Err(StorageError::NotEnoughResource {
                resource: format!("cache '{}' ({} of {} records)", policy.id, size, limit),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn put(
        &mut self,
        identity: String,
        record: Json,
        expires_at: Option<DateTime<Utc>>,
        created: bool,
    ) {
        let op = WriteOp::Put {
            entity_type: self.descriptor.entity_type.to_string(),
            identity,
            record,
            expires_at,
            created,
        };
        apply_op(&mut self.view, &op, self.now);
        self.ops.push(op);
    }

    fn delete(&mut self, identity: String) {
        let op = WriteOp::Delete {
            entity_type: self.descriptor.entity_type.to_string(),
            identity,
        };
        apply_op(&mut self.view, &op, self.now);
        self.ops.push(op);
    }

    /// Creates, or with `replace` upserts, a record.
    fn insert(
        &mut self,
        mut record: Json,
        ttl: Option<Duration>,
        replace: bool,
    ) -> StorageResult<Json> {
        let next = self.next_integer();
        record::assign_identity(self.descriptor, &mut record, next)?;
        let identity = self.identity_of(&record)?;
        let id = identity.canonical();
        let stored = self.view.get(&id).map(|row| row.record.clone());
        if stored.is_some() && !replace {
            return Err(record::key_violation(self.descriptor, "identity", identity));
        }
        let expires_at = self.expiry(ttl);
        self.finish(id, record, stored.as_ref(), expires_at)
    }

    fn update(&mut self, record: Json) -> StorageResult<Json> {
        let identity = self.identity_of(&record)?;
        let (id, stored, expires_at) = self.locate(KeyKind::Identity, &identity)?;
        self.finish(id, record, Some(&stored), expires_at)
    }

    fn patch(&mut self, key: &Key, changes: &Json) -> StorageResult<Json> {
        let (id, stored, expires_at) = self.locate(KeyKind::Identity, key)?;
        let mut merged = stored.clone();
        json_patch::merge(&mut merged, changes);
        let identity = self.identity_of(&merged)?;
        if identity.canonical() != id {
            return Err(record::constraint(
                self.descriptor,
                "identity",
                "identity cannot be changed by a patch".to_string(),
            ));
        }
        self.finish(id, merged, Some(&stored), expires_at)
    }

    fn touch(&mut self, key: &Key, ttl: Option<Duration>) -> StorageResult<()> {
        let (id, stored, expires_at) = self.locate(KeyKind::Identity, key)?;
        let mut record = stored.clone();
        record::stamp_audit(self.descriptor, &mut record, Some(&stored), self.now)?;
        let expires_at = self.expiry(ttl).or(expires_at);
        self.put(id, record, expires_at, false);
        Ok(())
    }

    fn finish(
        &mut self,
        id: String,
        mut record: Json,
        stored: Option<&Json>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StorageResult<Json> {
        record::stamp_audit(self.descriptor, &mut record, stored, self.now)?;
        if let Some(stored) = stored {
            record::check_immutable(self.descriptor, stored, &record)?;
        }
        record::validate(self.descriptor, &record)?;
        record::check_unique(self.descriptor, &self.view, &id, &record)?;
        self.put(id, record.clone(), expires_at, stored.is_none());
        Ok(record)
    }
}

/// A data source over the in-memory store.
pub struct MemoryDataSource<E> {
    context: SessionContext,
    storage: Arc<MemoryStorage>,
    ledger: Arc<TransactionLedger<WriteSet>>,
    open: AtomicBool,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> MemoryDataSource<E> {
    pub(crate) fn new(
        context: SessionContext,
        storage: Arc<MemoryStorage>,
        ledger: Arc<TransactionLedger<WriteSet>>,
    ) -> Self {
        Self {
            context,
            storage,
            ledger,
            open: AtomicBool::new(false),
            _entity: PhantomData,
        }
    }

    fn descriptor(&self) -> &EntityDescriptor {
        self.context.descriptor()
    }

    fn table(&self) -> &str {
        self.context.descriptor().entity_type.as_str()
    }

    fn ensure_open(&self, operation: &str) -> StorageResult<()> {
        if !self.is_open() {
            return Err(StorageError::illegal_state(format!(
                "cannot {}: data source for '{}' is closed",
                operation,
                self.table()
            )));
        }
        Ok(())
    }

    fn check_key(&self, kind: KeyKind<'_>, key: &Key) -> StorageResult<()> {
        if key.is_empty() || key.has_null() {
            return Err(StorageError::illegal_argument(format!(
                "{} key must have non-null components",
                kind.name()
            )));
        }
        self.check_kind(kind)
    }

    fn check_keys(&self, kind: KeyKind<'_>, keys: &[Key]) -> StorageResult<()> {
        self.check_kind(kind)?;
        keys.iter().try_for_each(|k| self.check_key(kind, k))
    }

    fn check_kind(&self, kind: KeyKind<'_>) -> StorageResult<()> {
        match kind {
            KeyKind::Alternate(name) if self.descriptor().alternate(name).is_none() => {
                Err(StorageError::illegal_argument(format!(
                    "entity type '{}' has no alternate key '{}'",
                    self.table(),
                    name
                )))
            }
            _ => Ok(()),
        }
    }

    /// Committed rows overlaid with the transaction's writes.
    fn snapshot(&self, txn: Option<&Transaction>, now: DateTime<Utc>) -> StorageResult<View> {
        let mut view = self.storage.view(self.table(), now);
        if let Some(txn) = txn {
            self.ledger.read_writes(txn, |writes| {
                writes.overlay(self.table(), &mut view, now);
                Ok(())
            })?;
        }
        Ok(view)
    }

    fn read(&self, txn: Option<&Transaction>, operation: &str) -> StorageResult<View> {
        self.ensure_open(operation)?;
        self.snapshot(txn, Utc::now())
    }

    fn write<R>(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        operation: &str,
        f: impl FnOnce(&mut Staging<'_>) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.ensure_open(operation)?;
        self.context.ensure_writable(operation)?;
        let policy = self.context.cache_policy(cache);
        let descriptor = self.descriptor();
        let now = Utc::now();

        match txn {
            None => self.storage.autocommit(
                self.table(),
                now,
                |table| {
                    let mut staging = Staging::new(descriptor, policy, table.view(now), now);
                    let result = f(&mut staging)?;
                    staging.check_capacity(operation)?;
                    tracing::trace!(
                        entity_type = %descriptor.entity_type,
                        operation,
                        writes = staging.ops.len(),
                        "Applying writes"
                    );
                    Ok((result, staging.ops))
                },
                |table| {
                    if let Some(policy) = policy {
                        evict_over_limit(table, policy, now);
                    }
                },
            ),
            Some(txn) => self.ledger.with_writes(txn, |writes| {
                let mut view = self.storage.view(self.table(), now);
                writes.overlay(self.table(), &mut view, now);
                let mut staging = Staging::new(descriptor, policy, view, now);
                let result = f(&mut staging)?;
                staging.check_capacity(operation)?;
                tracing::trace!(
                    entity_type = %descriptor.entity_type,
                    operation,
                    txn = %txn.id(),
                    writes = staging.ops.len(),
                    "Staged writes"
                );
                writes.extend(staging.ops);
                Ok(result)
            }),
        }
    }

    fn encode(entity: &E) -> StorageResult<Json> {
        Ok(serde_json::to_value(entity)?)
    }

    fn decode(record: Json) -> StorageResult<E> {
        Ok(serde_json::from_value(record)?)
    }

    fn contains(
        &self,
        txn: Option<&Transaction>,
        kind: KeyKind<'_>,
        key: &Key,
    ) -> StorageResult<bool> {
        self.check_key(kind, key)?;
        let view = self.read(txn, "check existence")?;
        Ok(find(&view, self.descriptor(), kind, key).is_some())
    }

    fn fetch(&self, txn: Option<&Transaction>, kind: KeyKind<'_>, key: &Key) -> StorageResult<E> {
        self.check_key(kind, key)?;
        let now = Utc::now();
        self.ensure_open("fetch")?;
        let view = self.snapshot(txn, now)?;
        let (id, row) = find(&view, self.descriptor(), kind, key)
            .ok_or_else(|| record::not_found(self.descriptor(), key))?;
        self.storage.record_access(self.table(), id, now);
        Self::decode(row.record.clone())
    }

    fn delete(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        kind: KeyKind<'_>,
        key: &Key,
    ) -> StorageResult<()> {
        self.check_key(kind, key)?;
        self.write(txn, cache, "delete", |staging| {
            let (id, _, _) = staging.locate(kind, key)?;
            staging.delete(id);
            Ok(())
        })
    }

    fn keyed(
        &self,
        txn: Option<&Transaction>,
        kind: KeyKind<'_>,
        keys: &[Key],
    ) -> StorageResult<Vec<Json>> {
        self.check_keys(kind, keys)?;
        let view = self.read(txn, "read")?;
        Ok(select(view, self.descriptor(), kind, keys))
    }

    fn by_example(&self, txn: Option<&Transaction>, example: &E) -> StorageResult<Vec<Json>> {
        let example = Self::encode(example)?;
        let view = self.read(txn, "read")?;
        Ok(view
            .into_values()
            .map(|row| row.record)
            .filter(|r| record::matches_example(&example, r))
            .collect())
    }

    fn query(&self, txn: Option<&Transaction>, query: &Query) -> StorageResult<Vec<Json>> {
        let evaluator = QueryEvaluator::compile(query)?;
        let view = self.read(txn, "query")?;
        let records: Vec<Json> = view.into_values().map(|row| row.record).collect();
        Ok(evaluator.apply(records, |r| r))
    }

    fn native_unsupported<R>(&self) -> StorageResult<R> {
        self.ensure_open("run native query")?;
        Err(StorageError::unsupported("memory", "native-query"))
    }

    /// Runs a cache operation against committed rows.
    fn cache_op<R>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Table, DateTime<Utc>) -> R,
    ) -> StorageResult<R> {
        self.ensure_open(operation)?;
        let now = Utc::now();
        let result = self.storage.with_table(self.table(), |table| f(table, now));
        tracing::debug!(entity_type = %self.table(), operation, "Cache operation applied");
        Ok(result)
    }
}

impl<E: Entity> DataSourceControl for MemoryDataSource<E> {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn open(&self) -> StorageResult<()> {
        self.context.ensure_leased("open data source for")?;
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) -> StorageResult<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn entity_type(&self) -> &str {
        self.table()
    }
}

impl<E: Entity> DataSource<E> for MemoryDataSource<E> {
    fn contains_by_identity(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<bool> {
        self.contains(txn, KeyKind::Identity, key)
    }

    fn contains_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<bool> {
        self.contains(txn, KeyKind::PrimaryKey, key)
    }

    fn contains_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        name: &str,
        key: &Key,
    ) -> StorageResult<bool> {
        self.contains(txn, KeyKind::Alternate(name), key)
    }

    fn fetch_by_identity(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<E> {
        self.fetch(txn, KeyKind::Identity, key)
    }

    fn fetch_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<E> {
        self.fetch(txn, KeyKind::PrimaryKey, key)
    }

    fn fetch_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        name: &str,
        key: &Key,
    ) -> StorageResult<E> {
        self.fetch(txn, KeyKind::Alternate(name), key)
    }

    fn create(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
    ) -> StorageResult<E> {
        let record = Self::encode(entity)?;
        let stored = self.write(txn, cache, "create", |s| s.insert(record, None, false))?;
        Self::decode(stored)
    }

    fn create_with_ttl(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
        ttl: Duration,
    ) -> StorageResult<E> {
        let record = Self::encode(entity)?;
        let stored = self.write(txn, cache, "create", |s| s.insert(record, Some(ttl), false))?;
        Self::decode(stored)
    }

    fn create_all(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entities: &[E],
    ) -> StorageResult<Vec<E>> {
        let records = entities.iter().map(Self::encode).collect::<StorageResult<Vec<_>>>()?;
        let stored = self.write(txn, cache, "create", |s| {
            records.into_iter().map(|r| s.insert(r, None, false)).collect::<StorageResult<Vec<_>>>()
        })?;
        stored.into_iter().map(Self::decode).collect()
    }

    fn save(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
    ) -> StorageResult<E> {
        let record = Self::encode(entity)?;
        let stored = self.write(txn, cache, "save", |s| s.insert(record, None, true))?;
        Self::decode(stored)
    }

    fn save_with_ttl(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
        ttl: Duration,
    ) -> StorageResult<E> {
        let record = Self::encode(entity)?;
        let stored = self.write(txn, cache, "save", |s| s.insert(record, Some(ttl), true))?;
        Self::decode(stored)
    }

    fn save_all(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entities: &[E],
    ) -> StorageResult<Vec<E>> {
        let records = entities.iter().map(Self::encode).collect::<StorageResult<Vec<_>>>()?;
        let stored = self.write(txn, cache, "save", |s| {
            records.into_iter().map(|r| s.insert(r, None, true)).collect::<StorageResult<Vec<_>>>()
        })?;
        stored.into_iter().map(Self::decode).collect()
    }

    fn update(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
    ) -> StorageResult<E> {
        let record = Self::encode(entity)?;
        let stored = self.write(txn, cache, "update", |s| s.update(record))?;
        Self::decode(stored)
    }

    fn patch(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
        changes: &Json,
    ) -> StorageResult<E> {
        self.check_key(KeyKind::Identity, key)?;
        if !changes.is_object() {
            return Err(StorageError::illegal_argument("patch must be a JSON object"));
        }
        let stored = self.write(txn, cache, "patch", |s| s.patch(key, changes))?;
        Self::decode(stored)
    }

    fn touch(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
        ttl: Option<Duration>,
    ) -> StorageResult<()> {
        self.check_key(KeyKind::Identity, key)?;
        self.write(txn, cache, "touch", |s| s.touch(key, ttl))
    }

    fn delete_by_identity(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<()> {
        self.delete(txn, cache, KeyKind::Identity, key)
    }

    fn delete_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<()> {
        self.delete(txn, cache, KeyKind::PrimaryKey, key)
    }

    fn delete_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        name: &str,
        key: &Key,
    ) -> StorageResult<()> {
        self.delete(txn, cache, KeyKind::Alternate(name), key)
    }

    fn delete_by_example(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        example: &E,
    ) -> StorageResult<u64> {
        let example = Self::encode(example)?;
        self.write(txn, cache, "delete", |s| {
            let matched: Vec<String> = s
                .view
                .iter()
                .filter(|(_, row)| record::matches_example(&example, &row.record))
                .map(|(id, _)| id.clone())
                .collect();
            let count = matched.len() as u64;
            for id in matched {
                s.delete(id);
            }
            Ok(count)
        })
    }

    fn cursor_by_identity(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<Cursor<E>> {
        Ok(Cursor::new(self.keyed(txn, KeyKind::Identity, keys)?))
    }

    fn cursor_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<Cursor<E>> {
        Ok(Cursor::new(self.keyed(txn, KeyKind::PrimaryKey, keys)?))
    }

    fn cursor_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        name: &str,
        keys: &[Key],
    ) -> StorageResult<Cursor<E>> {
        Ok(Cursor::new(self.keyed(txn, KeyKind::Alternate(name), keys)?))
    }

    fn cursor_by_example(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        example: &E,
    ) -> StorageResult<Cursor<E>> {
        Ok(Cursor::new(self.by_example(txn, example)?))
    }

    fn cursor(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        query: &Query,
    ) -> StorageResult<Cursor<E>> {
        Ok(Cursor::new(self.query(txn, query)?))
    }

    fn cursor_native(
        &self,
        _txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        _query: &NativeQuery,
    ) -> StorageResult<Cursor<E>> {
        self.native_unsupported()
    }

    fn count_by_identity(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<u64> {
        Ok(self.keyed(txn, KeyKind::Identity, keys)?.len() as u64)
    }

    fn count_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<u64> {
        Ok(self.keyed(txn, KeyKind::PrimaryKey, keys)?.len() as u64)
    }

    fn count_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        name: &str,
        keys: &[Key],
    ) -> StorageResult<u64> {
        Ok(self.keyed(txn, KeyKind::Alternate(name), keys)?.len() as u64)
    }

    fn count_by_example(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        example: &E,
    ) -> StorageResult<u64> {
        Ok(self.by_example(txn, example)?.len() as u64)
    }

    fn count(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        query: &Query,
    ) -> StorageResult<u64> {
        Ok(self.query(txn, query)?.len() as u64)
    }

    fn count_native(
        &self,
        _txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
        _query: &NativeQuery,
    ) -> StorageResult<u64> {
        self.native_unsupported()
    }

    fn count_all(
        &self,
        txn: Option<&Transaction>,
        _cache: Option<&CachePolicy>,
    ) -> StorageResult<u64> {
        Ok(self.read(txn, "count")?.len() as u64)
    }

    fn expire(&self, _cache: Option<&CachePolicy>) -> StorageResult<()> {
        self.cache_op("expire", |table, now| {
            for row in table.rows.values_mut().filter(|r| !r.meta.is_expired(now)) {
                row.meta.expires_at = Some(now);
            }
        })
    }

    fn expire_matching(&self, _cache: Option<&CachePolicy>, query: &Query) -> StorageResult<u64> {
        let evaluator = QueryEvaluator::compile(query)?;
        self.cache_op("expire", |table, now| {
            let mut expired = 0;
            for row in table.rows.values_mut() {
                if !row.meta.is_expired(now) && evaluator.matches(&row.record) {
                    row.meta.expires_at = Some(now);
                    expired += 1;
                }
            }
            expired
        })
    }

    fn invalidate(&self, _cache: Option<&CachePolicy>, key: &Key) -> StorageResult<()> {
        self.check_key(KeyKind::Identity, key)?;
        let descriptor = self.descriptor();
        self.cache_op("invalidate", |table, now| {
            let view = table.view(now);
            if let Some((id, _)) = find(&view, descriptor, KeyKind::Identity, key) {
                if let Some(row) = table.rows.get_mut(id) {
                    row.meta.expires_at = Some(now);
                }
            }
        })
    }

    fn prune(&self, _cache: Option<&CachePolicy>, query: &Query) -> StorageResult<u64> {
        let evaluator = QueryEvaluator::compile(query)?;
        self.cache_op("prune", |table, now| {
            let before = table.rows.len();
            table
                .rows
                .retain(|_, row| !(row.meta.is_expired(now) && evaluator.matches(&row.record)));
            (before - table.rows.len()) as u64
        })
    }

    fn clear(&self, _cache: Option<&CachePolicy>) -> StorageResult<()> {
        self.cache_op("clear", |table, _| table.rows.clear())
    }

    fn evict(&self, cache: Option<&CachePolicy>) -> StorageResult<u64> {
        let Some(policy) = self.context.cache_policy(cache) else {
            self.ensure_open("evict")?;
            return Ok(0);
        };
        self.cache_op("evict", |table, now| evict_over_limit(table, policy, now))
    }
}

impl<E> fmt::Debug for MemoryDataSource<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDataSource")
            .field("provider", &self.context.provider_id())
            .field("entity_type", &self.context.descriptor().entity_type)
            .field("open", &self.open.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_same_key_compares_semantically() {
        let wanted = Key::new(vec![Value::from("acme"), Value::Integer(7)]);
        let found = Key::new(vec![Value::Text("acme".to_string()), Value::Integer(7)]);
        assert!(same_key(&wanted, &found));
        assert!(!same_key(&Key::from("acme"), &found));
    }

    #[test]
    fn test_key_kind_names() {
        assert_eq!(KeyKind::Identity.name(), "identity");
        assert_eq!(KeyKind::Alternate("email").name(), "email");
    }
}
