//! Provider lifecycle.
//!
//! A [`Provider`] owns one [`ProviderBackend`] and moves through
//! `Inactive -> Active -> ShuttingDown -> Inactive`. Transitions use atomic
//! compare-and-set so that exactly one of several concurrent callers wins;
//! the others see the resulting error. A completed shutdown leaves the
//! provider ready to be activated again.
//!
//! Each activation hands its data sources a lease. Shutdown revokes it, so
//! a data source closed by shutdown cannot be reopened; the caller opens a
//! new one after the next activation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{ProviderConfig, Settings};
use crate::error::{StorageError, StorageResult};
use crate::types::{Entity, EntityDescriptor, EntityType, TimeUnit};

use super::capabilities::{Capabilities, Capability};
use super::data_source::{
    DataSource, DataSourceControl, DataSourceHandle, DataSourceRegistry, SessionContext,
};
use super::transaction::{Transaction, TransactionCoordinator, TransactionId, TransactionStatus};

/// Backend-specific half of a provider.
///
/// The provider handles lifecycle state and bookkeeping and calls these
/// hooks at the matching transitions.
pub trait ProviderBackend: Send + Sync + 'static {
    /// Data source type opened for an entity type.
    type Session<E: Entity>: DataSource<E> + 'static;

    /// Returns the backend name.
    fn backend_name(&self) -> &str;

    /// Returns the optional features this backend implements.
    fn capabilities(&self) -> Capabilities;

    /// Called once per activation, before the provider reports active.
    fn on_activate(&self, config: &ProviderConfig) -> StorageResult<()>;

    /// Called on shutdown after every data source has been closed.
    ///
    /// `grace` bounds how long orderly teardown may take; enforcing it is
    /// up to the backend.
    fn on_shutdown(&self, grace: Duration) -> StorageResult<()>;

    /// Opens a data source for an entity type.
    fn open_session<E: Entity>(&self, context: SessionContext) -> StorageResult<Self::Session<E>>;

    /// Returns true if storage for the entity type exists.
    fn check_type(&self, descriptor: &EntityDescriptor) -> StorageResult<bool>;

    /// Creates storage for the entity type.
    fn create_type(&self, descriptor: &EntityDescriptor) -> StorageResult<()> {
        let _ = descriptor;
        Err(StorageError::unsupported(self.backend_name(), "create-type"))
    }

    /// Returns the transaction coordinator, if transactions are supported.
    fn transactions(&self) -> Option<&dyn TransactionCoordinator> {
        None
    }
}

/// Factory and lifecycle owner for the data sources of one backend.
///
/// # Examples
///
/// ```
/// use helios_storage_spi::backends::memory::MemoryBackend;
/// use helios_storage_spi::config::ProviderConfig;
/// use helios_storage_spi::core::Provider;
/// use helios_storage_spi::types::TimeUnit;
///
/// let provider = Provider::new(ProviderConfig::new("main", "memory"), MemoryBackend::new());
/// provider.activate()?;
/// assert!(provider.is_active());
///
/// provider.shutdown(5, Some(TimeUnit::Seconds))?;
/// assert!(!provider.is_active());
///
/// // The lifecycle is repeatable.
/// provider.activate()?;
/// # Ok::<(), helios_storage_spi::StorageError>(())
/// ```
pub struct Provider<B: ProviderBackend> {
    config: ProviderConfig,
    backend: B,
    active: AtomicBool,
    shutting_down: AtomicBool,
    read_only: Arc<AtomicBool>,
    lease: RwLock<Arc<AtomicBool>>,
    types: RwLock<BTreeMap<EntityType, EntityDescriptor>>,
    registry: Arc<DataSourceRegistry>,
}

impl<B: ProviderBackend> Provider<B> {
    /// Creates an inactive provider.
    pub fn new(config: ProviderConfig, backend: B) -> Self {
        let read_only = Arc::new(AtomicBool::new(config.read_only));
        Self {
            config,
            backend,
            active: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            read_only,
            lease: RwLock::new(Arc::new(AtomicBool::new(false))),
            types: RwLock::new(BTreeMap::new()),
            registry: Arc::new(DataSourceRegistry::new()),
        }
    }

    /// Creates an inactive provider from the `providers` entry `id`.
    pub fn from_settings(settings: &Settings, id: &str, backend: B) -> StorageResult<Self> {
        let config = settings.provider_config(id)?;
        if !config.backend_name.is_empty() && config.backend_name != backend.backend_name() {
            return Err(StorageError::illegal_argument(format!(
                "provider '{}' is configured for backend '{}' but was given '{}'",
                id,
                config.backend_name,
                backend.backend_name()
            )));
        }
        Ok(Self::new(config, backend))
    }

    /// Returns the provider id.
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Returns the backend name.
    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Returns the backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Returns true between a successful activation and shutdown.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true while a shutdown is running.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Returns the read-only flag.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    /// Sets the read-only flag. Open data sources observe the change.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Release);
        tracing::debug!(provider = %self.id(), read_only, "Read-only flag changed");
    }

    /// Returns the backend's capabilities.
    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    /// Returns true if the backend declares the capability.
    pub fn supports(&self, capability: Capability) -> bool {
        self.backend.capabilities().supports(capability)
    }

    /// Activates the provider.
    ///
    /// # Errors
    ///
    /// `IllegalState` if already active or shutting down. If the backend's
    /// activation hook fails the provider stays inactive and the hook's
    /// error is returned.
    pub fn activate(&self) -> StorageResult<()> {
        if self.is_shutting_down() {
            return Err(StorageError::illegal_state(format!(
                "provider '{}' is shutting down",
                self.id()
            )));
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StorageError::illegal_state(format!(
                "provider '{}' is already active",
                self.id()
            )));
        }

        if let Err(e) = self.backend.on_activate(&self.config) {
            self.active.store(false, Ordering::Release);
            tracing::warn!(provider = %self.id(), error = %e, "Activation failed");
            return Err(e);
        }
        *self.lease.write() = Arc::new(AtomicBool::new(true));

        tracing::info!(
            provider = %self.id(),
            backend = %self.backend_name(),
            read_only = self.is_read_only(),
            "Provider activated"
        );
        Ok(())
    }

    /// Shuts the provider down.
    ///
    /// Every open data source is closed first; individual close failures are
    /// logged and do not stop the shutdown. Calling again while a shutdown
    /// is running is a no-op.
    ///
    /// # Errors
    ///
    /// `IllegalArgument` if `grace_time` is negative or `unit` is absent,
    /// `IllegalState` if the provider is not active. If the backend's
    /// shutdown hook fails the provider stays active and can retry.
    pub fn shutdown(&self, grace_time: i64, unit: Option<TimeUnit>) -> StorageResult<()> {
        let grace_time = u64::try_from(grace_time).map_err(|_| {
            StorageError::illegal_argument(format!("negative grace time: {}", grace_time))
        })?;
        let unit =
            unit.ok_or_else(|| StorageError::illegal_argument("grace time unit is required"))?;

        if self.is_shutting_down() {
            return Ok(());
        }
        if !self.is_active() {
            return Err(StorageError::illegal_state(format!(
                "provider '{}' is not active",
                self.id()
            )));
        }
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let grace = unit.to_duration(grace_time);
        let lease = Arc::clone(&self.lease.read());
        lease.store(false, Ordering::Release);
        let closed = self.registry.close_all(self.id());

        if let Err(e) = self.backend.on_shutdown(grace) {
            lease.store(true, Ordering::Release);
            self.shutting_down.store(false, Ordering::Release);
            tracing::warn!(provider = %self.id(), error = %e, "Shutdown failed");
            return Err(e);
        }

        self.registry.clear();
        self.active.store(false, Ordering::Release);
        self.shutting_down.store(false, Ordering::Release);
        tracing::info!(
            provider = %self.id(),
            closed_data_sources = closed,
            grace_ms = grace.as_millis() as u64,
            "Provider shut down"
        );
        Ok(())
    }

    /// Registers an entity type as managed by this provider.
    pub fn register<E: Entity>(&self) {
        let descriptor = E::descriptor();
        let entity_type = descriptor.entity_type.clone();
        if self.types.write().insert(entity_type.clone(), descriptor).is_none() {
            tracing::debug!(
                provider = %self.id(),
                entity_type = %entity_type,
                "Entity type registered"
            );
        }
    }

    /// Returns the managed entity types.
    pub fn get_types(&self) -> StorageResult<Vec<EntityType>> {
        self.ensure_active("list types")?;
        Ok(self.types.read().keys().cloned().collect())
    }

    /// Returns true if the backend has storage for the entity type.
    pub fn check_type<E: Entity>(&self) -> StorageResult<bool> {
        self.ensure_active("check type")?;
        self.backend.check_type(&E::descriptor())
    }

    /// Creates backend storage for the entity type and registers it.
    pub fn create_type<E: Entity>(&self) -> StorageResult<()> {
        self.ensure_active("create type")?;
        let descriptor = E::descriptor();
        self.backend.create_type(&descriptor)?;
        tracing::info!(
            provider = %self.id(),
            entity_type = %descriptor.entity_type,
            "Entity type created"
        );
        self.register::<E>();
        Ok(())
    }

    /// Opens a data source for an entity type.
    ///
    /// # Errors
    ///
    /// `IllegalState` if the provider is not active, `IllegalArgument` if
    /// the provider only accepts registered types and `E` is not one.
    pub fn open_data_source<E: Entity>(&self) -> StorageResult<DataSourceHandle<E>> {
        self.ensure_active("open data source")?;
        let descriptor = E::descriptor();
        let entity_type = descriptor.entity_type.clone();

        if !self.types.read().contains_key(&entity_type) {
            if self.config.managed_types_only {
                return Err(StorageError::illegal_argument(format!(
                    "entity type '{}' is not managed by provider '{}'",
                    entity_type,
                    self.id()
                )));
            }
            self.register::<E>();
        }

        let cache_policy = self
            .config
            .cache_policy_for(entity_type.as_str())
            .cloned();
        let context = SessionContext::new(
            self.id(),
            descriptor,
            cache_policy,
            Arc::clone(&self.read_only),
            Arc::clone(&self.lease.read()),
        );
        let session = self.backend.open_session::<E>(context)?;
        session.open()?;

        let handle = DataSourceHandle::register(session, Arc::clone(&self.registry));
        tracing::debug!(
            provider = %self.id(),
            data_source = %handle.id(),
            entity_type = %entity_type,
            "Data source opened"
        );
        Ok(handle)
    }

    /// Returns the number of open data sources.
    pub fn open_data_source_count(&self) -> usize {
        self.registry.open_count()
    }

    // Transaction protocol.

    /// Returns true if the backend implements the transaction protocol.
    pub fn is_transaction_supported(&self) -> bool {
        self.backend.transactions().is_some()
    }

    /// Starts a transaction.
    pub fn begin(&self, id: impl Into<TransactionId>) -> StorageResult<Transaction> {
        let id = id.into();
        self.coordinator("begin")?.begin(&id)
    }

    /// Attaches to an existing transaction.
    pub fn join(&self, id: impl Into<TransactionId>) -> StorageResult<Transaction> {
        let id = id.into();
        self.coordinator("join")?.join(&id)
    }

    /// Detaches a transaction from its caller.
    pub fn suspend(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("suspend")?.suspend(txn)
    }

    /// Reattaches a suspended transaction.
    pub fn resume(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("resume")?.resume(txn)
    }

    /// First phase of two-phase commit.
    pub fn prepare(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("prepare")?.prepare(txn)
    }

    /// Commits a transaction.
    pub fn commit(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("commit")?.commit(txn)
    }

    /// Rolls a transaction back.
    pub fn rollback(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("rollback")?.rollback(txn)
    }

    /// Drops bookkeeping for a transaction resolved elsewhere.
    pub fn forget(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("forget")?.forget(txn)
    }

    /// Forces a transaction's buffered writes to durable storage.
    pub fn flush(&self, txn: &Transaction) -> StorageResult<()> {
        self.coordinator("flush")?.flush(txn)
    }

    /// Lists prepared but unresolved transactions from a previous run.
    pub fn recover(&self) -> StorageResult<Vec<Transaction>> {
        let recovered = self.coordinator("recover")?.recover()?;
        if !recovered.is_empty() {
            tracing::warn!(
                provider = %self.id(),
                count = recovered.len(),
                "Recovered in-doubt transactions"
            );
        }
        Ok(recovered)
    }

    /// Returns the status of a transaction, if known.
    pub fn transaction_status(&self, id: &TransactionId) -> Option<TransactionStatus> {
        self.backend.transactions().and_then(|c| c.status(id))
    }

    fn coordinator(&self, operation: &str) -> StorageResult<&dyn TransactionCoordinator> {
        self.ensure_active(operation)?;
        self.backend
            .transactions()
            .ok_or_else(|| StorageError::unsupported(self.backend_name(), operation))
    }

    fn ensure_active(&self, operation: &str) -> StorageResult<()> {
        if !self.is_active() || self.is_shutting_down() {
            return Err(StorageError::illegal_state(format!(
                "cannot {}: provider '{}' is not active",
                operation,
                self.id()
            )));
        }
        Ok(())
    }
}

impl<B: ProviderBackend> fmt::Debug for Provider<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.config.id)
            .field("backend", &self.backend.backend_name())
            .field("active", &self.is_active())
            .field("shutting_down", &self.is_shutting_down())
            .field("read_only", &self.is_read_only())
            .field("registry", &self.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use crate::error::ErrorKind;

    fn provider() -> Provider<MemoryBackend> {
        Provider::new(ProviderConfig::new("p", "memory"), MemoryBackend::new())
    }

    #[test]
    fn test_double_activation_fails() {
        let provider = provider();
        provider.activate().unwrap();
        assert_eq!(provider.activate().unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_shutdown_argument_validation_precedes_state() {
        let provider = provider();
        assert_eq!(
            provider.shutdown(-1, Some(TimeUnit::Seconds)).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );
        assert_eq!(
            provider.shutdown(1, None).unwrap_err().kind(),
            ErrorKind::IllegalArgument
        );
        assert_eq!(
            provider.shutdown(1, Some(TimeUnit::Seconds)).unwrap_err().kind(),
            ErrorKind::IllegalState
        );
    }

    #[test]
    fn test_operations_require_active() {
        let provider = provider();
        assert_eq!(provider.get_types().unwrap_err().kind(), ErrorKind::IllegalState);
        assert_eq!(provider.begin("t").unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[test]
    fn test_from_settings_rejects_backend_mismatch() {
        let settings = Settings::load(&crate::config::SettingsSource::Toml(
            "[providers.p]\nbackend-name = \"sql\"\n".to_string(),
        ))
        .unwrap();
        let err = Provider::from_settings(&settings, "p", MemoryBackend::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    }
}
