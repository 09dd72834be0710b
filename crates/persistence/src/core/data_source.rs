//! Data source contract and the provider's data source registry.
//!
//! A data source is an open session against one entity type. Every
//! operation takes an optional [`Transaction`] (`None` autocommits) and an
//! optional [`CachePolicy`] (`None` uses the policy resolved when the data
//! source was opened).
//!
//! Data sources are handed out as [`DataSourceHandle`]s. The provider keeps
//! a weak entry for each live handle in a [`DataSourceRegistry`] so that
//! shutdown can force-close them; closing or dropping the handle releases
//! the entry.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value as Json;

use crate::error::{StorageError, StorageResult};
use crate::query::Query;
use crate::types::{Entity, EntityDescriptor, Key, Value};

use super::cache::CachePolicy;
use super::transaction::Transaction;

/// A backend-specific query.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeQuery {
    /// Statement in the backend's query language.
    pub statement: String,
    /// Positional parameters.
    pub parameters: Vec<Value>,
}

impl NativeQuery {
    /// Creates a query without parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Vec::new(),
        }
    }

    /// Appends a positional parameter.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.parameters.push(value.into());
        self
    }
}

/// Iterator over query results, decoding records lazily.
pub struct Cursor<E> {
    records: VecDeque<Json>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Cursor<E> {
    /// Creates a cursor over serialized records.
    pub fn new(records: Vec<Json>) -> Self {
        Self {
            records: records.into(),
            _entity: PhantomData,
        }
    }

    /// Returns the number of records not yet consumed.
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

impl<E: Entity> Iterator for Cursor<E> {
    type Item = StorageResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records
            .pop_front()
            .map(|record| serde_json::from_value(record).map_err(StorageError::from))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.records.len(), Some(self.records.len()))
    }
}

impl<E> fmt::Debug for Cursor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("remaining", &self.records.len())
            .finish()
    }
}

/// What a data source knows about the provider that opened it.
///
/// The lease is true for the provider activation the data source was opened
/// in and turns false for good when that activation ends.
#[derive(Debug, Clone)]
pub struct SessionContext {
    provider_id: String,
    descriptor: EntityDescriptor,
    cache_policy: Option<CachePolicy>,
    read_only: Arc<AtomicBool>,
    lease: Arc<AtomicBool>,
}

impl SessionContext {
    /// Creates a context.
    pub fn new(
        provider_id: impl Into<String>,
        descriptor: EntityDescriptor,
        cache_policy: Option<CachePolicy>,
        read_only: Arc<AtomicBool>,
        lease: Arc<AtomicBool>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            descriptor,
            cache_policy,
            read_only,
            lease,
        }
    }

    /// Returns the owning provider's id.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Returns the entity descriptor.
    pub fn descriptor(&self) -> &EntityDescriptor {
        &self.descriptor
    }

    /// Returns the explicit policy, falling back to the session default.
    pub fn cache_policy<'a>(
        &'a self,
        explicit: Option<&'a CachePolicy>,
    ) -> Option<&'a CachePolicy> {
        explicit.or(self.cache_policy.as_ref())
    }

    /// Returns the provider's current read-only flag.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Returns true while the provider activation that opened this session
    /// lasts.
    pub fn is_leased(&self) -> bool {
        self.lease.load(Ordering::Acquire)
    }

    /// Fails with `IllegalState` once the opening activation has ended.
    pub fn ensure_leased(&self, operation: &str) -> StorageResult<()> {
        if !self.is_leased() {
            return Err(StorageError::illegal_state(format!(
                "cannot {} {}: provider '{}' has shut down since it was opened",
                operation, self.descriptor.entity_type, self.provider_id
            )));
        }
        Ok(())
    }

    /// Fails with `IllegalState` if the provider is read-only.
    pub fn ensure_writable(&self, operation: &str) -> StorageResult<()> {
        if self.is_read_only() {
            return Err(StorageError::illegal_state(format!(
                "cannot {} {}: provider '{}' is read-only",
                operation, self.descriptor.entity_type, self.provider_id
            )));
        }
        Ok(())
    }
}

/// Open/close state shared by every data source.
pub trait DataSourceControl: Send + Sync {
    /// Returns true while the data source accepts operations.
    fn is_open(&self) -> bool;

    /// Reopens a closed data source.
    ///
    /// Fails with `IllegalState` once the provider activation that opened
    /// it has ended; open a new data source from the provider instead.
    fn open(&self) -> StorageResult<()>;

    /// Closes the data source. Closing a closed data source is a no-op.
    fn close(&self) -> StorageResult<()>;

    /// Returns the entity type this data source is bound to.
    fn entity_type(&self) -> &str;
}

/// The per-entity-type storage contract.
///
/// Operations on a closed data source fail with `IllegalState`. Mutating
/// operations may fail with `KeyViolation`, `DataConstraintViolation`,
/// `NotFound`, `OperationTimeout`, `NotEnoughResource` or a provider error.
///
/// Keys passed to `*_by_identity`, `*_by_primary_key` and
/// `*_by_alternate_key` are matched exactly. Cursor and count variants take
/// a set of keys; an empty set selects every record.
pub trait DataSource<E: Entity>: DataSourceControl {
    // Existence checks.

    /// Returns true if a record with this identity exists.
    fn contains_by_identity(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<bool>;

    /// Returns true if a record with this primary key exists.
    fn contains_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<bool>;

    /// Returns true if a record with this alternate key exists.
    fn contains_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        name: &str,
        key: &Key,
    ) -> StorageResult<bool>;

    // Point reads.

    /// Reads the record with this identity, failing with `NotFound`.
    fn fetch_by_identity(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<E>;

    /// Reads the record with this primary key, failing with `NotFound`.
    fn fetch_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<E>;

    /// Reads the record with this alternate key, failing with `NotFound`.
    fn fetch_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        name: &str,
        key: &Key,
    ) -> StorageResult<E>;

    // Writes.

    /// Inserts a new record and returns it as stored.
    ///
    /// A missing identity is generated. Fails with `KeyViolation` if any
    /// unique key is taken.
    fn create(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
    ) -> StorageResult<E>;

    /// Inserts a new record that expires after `ttl`.
    fn create_with_ttl(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
        ttl: Duration,
    ) -> StorageResult<E>;

    /// Inserts several records; nothing is written if one fails.
    fn create_all(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entities: &[E],
    ) -> StorageResult<Vec<E>>;

    /// Inserts or replaces a record.
    fn save(&self, txn: Option<&Transaction>, cache: Option<&CachePolicy>, entity: &E)
    -> StorageResult<E>;

    /// Inserts or replaces a record that expires after `ttl`.
    fn save_with_ttl(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
        ttl: Duration,
    ) -> StorageResult<E>;

    /// Inserts or replaces several records; nothing is written if one fails.
    fn save_all(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entities: &[E],
    ) -> StorageResult<Vec<E>>;

    /// Replaces the whole record addressed by the entity's identity.
    fn update(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        entity: &E,
    ) -> StorageResult<E>;

    /// Merges `changes` (an RFC 7396 merge patch) into the record with this
    /// identity. Fields absent from `changes` keep their value.
    fn patch(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
        changes: &Json,
    ) -> StorageResult<E>;

    /// Refreshes expiry and audit fields without changing the payload.
    ///
    /// `ttl` of `None` reapplies the cache policy's expiry.
    fn touch(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
        ttl: Option<Duration>,
    ) -> StorageResult<()>;

    // Deletes.

    /// Deletes the record with this identity, failing with `NotFound`.
    fn delete_by_identity(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<()>;

    /// Deletes the record with this primary key, failing with `NotFound`.
    fn delete_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        key: &Key,
    ) -> StorageResult<()>;

    /// Deletes the record with this alternate key, failing with `NotFound`.
    fn delete_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        name: &str,
        key: &Key,
    ) -> StorageResult<()>;

    /// Deletes every record matching the example's non-null fields.
    fn delete_by_example(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        example: &E,
    ) -> StorageResult<u64>;

    // Cursors.

    /// Iterates over records whose identity is in `keys`.
    fn cursor_by_identity(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<Cursor<E>>;

    /// Iterates over records whose primary key is in `keys`.
    fn cursor_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<Cursor<E>>;

    /// Iterates over records whose named alternate key is in `keys`.
    fn cursor_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        name: &str,
        keys: &[Key],
    ) -> StorageResult<Cursor<E>>;

    /// Iterates over records matching the example's non-null fields.
    fn cursor_by_example(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        example: &E,
    ) -> StorageResult<Cursor<E>>;

    /// Iterates over records matching a structured query.
    fn cursor(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        query: &Query,
    ) -> StorageResult<Cursor<E>>;

    /// Iterates over the results of a backend-specific query.
    fn cursor_native(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        query: &NativeQuery,
    ) -> StorageResult<Cursor<E>>;

    // Counts.

    /// Counts records whose identity is in `keys`.
    fn count_by_identity(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<u64>;

    /// Counts records whose primary key is in `keys`.
    fn count_by_primary_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        keys: &[Key],
    ) -> StorageResult<u64>;

    /// Counts records whose named alternate key is in `keys`.
    fn count_by_alternate_key(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        name: &str,
        keys: &[Key],
    ) -> StorageResult<u64>;

    /// Counts records matching the example's non-null fields.
    fn count_by_example(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        example: &E,
    ) -> StorageResult<u64>;

    /// Counts the records `cursor(query)` would return.
    fn count(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        query: &Query,
    ) -> StorageResult<u64>;

    /// Counts the results of a backend-specific query.
    fn count_native(
        &self,
        txn: Option<&Transaction>,
        cache: Option<&CachePolicy>,
        query: &NativeQuery,
    ) -> StorageResult<u64>;

    /// Counts every record of the entity type.
    fn count_all(&self, txn: Option<&Transaction>, cache: Option<&CachePolicy>)
    -> StorageResult<u64>;

    // Cache support. Backends without a cache tier keep the defaults.

    /// Expires every cached record of the entity type.
    fn expire(&self, cache: Option<&CachePolicy>) -> StorageResult<()> {
        let _ = cache;
        Err(self.unsupported("expire"))
    }

    /// Expires cached records matching `query`, returning how many.
    fn expire_matching(&self, cache: Option<&CachePolicy>, query: &Query) -> StorageResult<u64> {
        let _ = (cache, query);
        Err(self.unsupported("expire"))
    }

    /// Expires the cached record with this identity.
    fn invalidate(&self, cache: Option<&CachePolicy>, key: &Key) -> StorageResult<()> {
        let _ = (cache, key);
        Err(self.unsupported("invalidate"))
    }

    /// Removes expired records matching `query`, returning how many.
    fn prune(&self, cache: Option<&CachePolicy>, query: &Query) -> StorageResult<u64> {
        let _ = (cache, query);
        Err(self.unsupported("prune"))
    }

    /// Removes every cached record of the entity type.
    fn clear(&self, cache: Option<&CachePolicy>) -> StorageResult<()> {
        let _ = cache;
        Err(self.unsupported("clear"))
    }

    /// Applies the eviction policy down to the hard limit, returning how
    /// many records were evicted.
    fn evict(&self, cache: Option<&CachePolicy>) -> StorageResult<u64> {
        let _ = cache;
        Err(self.unsupported("evict"))
    }

    /// Builds the unsupported-operation error for this data source.
    fn unsupported(&self, operation: &str) -> StorageError {
        StorageError::unsupported(format!("{} data source", self.entity_type()), operation)
    }
}

/// Generated handle of a registered data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataSourceId(u64);

impl fmt::Display for DataSourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ds-{}", self.0)
    }
}

/// Arena of the data sources a provider has issued.
///
/// Entries are weak: the handle owns the data source.
#[derive(Default)]
pub struct DataSourceRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<DataSourceId, Weak<dyn DataSourceControl>>>,
}

impl DataSourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a data source and returns its handle id.
    pub fn register(&self, source: Weak<dyn DataSourceControl>) -> DataSourceId {
        let id = DataSourceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.lock().insert(id, source);
        id
    }

    /// Drops the entry of a handle.
    pub fn release(&self, id: DataSourceId) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    /// Returns the number of live, open entries.
    pub fn open_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|s| s.is_open())
            .count()
    }

    /// Closes every live entry, returning the number closed.
    ///
    /// Dead entries are skipped. A failing close is logged and does not stop
    /// the others.
    pub fn close_all(&self, provider_id: &str) -> usize {
        let live: Vec<(DataSourceId, Arc<dyn DataSourceControl>)> = self
            .entries
            .lock()
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|s| (*id, s)))
            .collect();

        let mut closed = 0;
        for (id, source) in live {
            match source.close() {
                Ok(()) => closed += 1,
                Err(e) => tracing::warn!(
                    provider = %provider_id,
                    data_source = %id,
                    entity_type = %source.entity_type(),
                    error = %e,
                    "Failed to close data source during shutdown"
                ),
            }
        }
        closed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

/// Owning handle to an open data source.
///
/// Dereferences to the [`DataSource`] contract.
pub struct DataSourceHandle<E: Entity> {
    id: DataSourceId,
    source: Arc<dyn DataSource<E>>,
    registry: Arc<DataSourceRegistry>,
}

impl<E: Entity> DataSourceHandle<E> {
    /// Registers `source` and wraps it in a handle.
    pub fn register<S>(source: S, registry: Arc<DataSourceRegistry>) -> Self
    where
        S: DataSource<E> + 'static,
    {
        let source = Arc::new(source);
        let weak: Weak<S> = Arc::downgrade(&source);
        let id = registry.register(weak);
        Self {
            id,
            source,
            registry,
        }
    }

    /// Returns the handle id.
    pub fn id(&self) -> DataSourceId {
        self.id
    }

    /// Closes the data source and releases its registry entry.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> StorageResult<()> {
        self.source.close()?;
        if self.registry.release(self.id) {
            tracing::debug!(
                data_source = %self.id,
                entity_type = %self.source.entity_type(),
                "Data source closed"
            );
        }
        Ok(())
    }
}

impl<E: Entity> Deref for DataSourceHandle<E> {
    type Target = dyn DataSource<E>;

    fn deref(&self) -> &Self::Target {
        self.source.as_ref()
    }
}

impl<E: Entity> Drop for DataSourceHandle<E> {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

impl<E: Entity> fmt::Debug for DataSourceHandle<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceHandle")
            .field("id", &self.id)
            .field("entity_type", &self.source.entity_type())
            .field("open", &self.source.is_open())
            .finish()
    }
}
