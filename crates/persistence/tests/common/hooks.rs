//! A backend whose lifecycle hooks can be made to fail or block.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use helios_storage_spi::backends::memory::{MemoryBackend, MemoryDataSource};
use helios_storage_spi::config::ProviderConfig;
use helios_storage_spi::core::{
    Capabilities, Provider, ProviderBackend, SessionContext, TransactionCoordinator,
};
use helios_storage_spi::error::{StorageError, StorageResult};
use helios_storage_spi::types::{Entity, EntityDescriptor};

use super::harness::init_tracing;

/// Memory backend with switchable activation and shutdown hooks.
#[derive(Default)]
pub struct HookedBackend {
    inner: MemoryBackend,
    fail_activate: AtomicBool,
    fail_shutdown: AtomicBool,
    gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
    activations: AtomicUsize,
    shutdowns: AtomicUsize,
}

/// Controls a shutdown held inside the backend's hook.
pub struct ShutdownGate {
    /// Receives once the hook has been entered.
    pub entered: Receiver<()>,
    /// Lets the hook return when sent to.
    pub release: Sender<()>,
}

impl HookedBackend {
    /// Makes the activation hook fail while set.
    pub fn fail_activation(&self, fail: bool) {
        self.fail_activate.store(fail, Ordering::SeqCst);
    }

    /// Makes the shutdown hook fail while set.
    pub fn fail_shutdown(&self, fail: bool) {
        self.fail_shutdown.store(fail, Ordering::SeqCst);
    }

    /// Makes the next shutdown hook wait until released.
    pub fn block_next_shutdown(&self) -> ShutdownGate {
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        *self.gate.lock() = Some((entered_tx, release_rx));
        ShutdownGate { entered, release }
    }

    /// Returns how often the activation hook ran.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    /// Returns how often the shutdown hook ran.
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

impl ProviderBackend for HookedBackend {
    type Session<E: Entity> = MemoryDataSource<E>;

    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn on_activate(&self, config: &ProviderConfig) -> StorageResult<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if self.fail_activate.load(Ordering::SeqCst) {
            return Err(StorageError::provider("hooked", "activation refused"));
        }
        self.inner.on_activate(config)
    }

    fn on_shutdown(&self, grace: Duration) -> StorageResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some((entered, release)) = gate {
            entered.send(()).expect("gate dropped");
            release.recv().expect("gate dropped");
        }
        if self.fail_shutdown.load(Ordering::SeqCst) {
            return Err(StorageError::provider("hooked", "shutdown refused"));
        }
        self.inner.on_shutdown(grace)
    }

    fn open_session<E: Entity>(&self, context: SessionContext) -> StorageResult<Self::Session<E>> {
        self.inner.open_session(context)
    }

    fn check_type(&self, descriptor: &EntityDescriptor) -> StorageResult<bool> {
        self.inner.check_type(descriptor)
    }

    fn transactions(&self) -> Option<&dyn TransactionCoordinator> {
        self.inner.transactions()
    }
}

/// Returns an inactive provider over a [`HookedBackend`].
pub fn hooked_provider() -> Provider<HookedBackend> {
    init_tracing();
    Provider::new(ProviderConfig::new("hooked", "memory"), HookedBackend::default())
}
