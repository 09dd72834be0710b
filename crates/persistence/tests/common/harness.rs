//! Provider construction helpers.

use std::sync::{Arc, Once};

use helios_storage_spi::backends::memory::{MemoryBackend, MemoryStorage};
use helios_storage_spi::config::ProviderConfig;
use helios_storage_spi::core::{DataSourceHandle, Provider};

use super::fixtures::{Person, people};

static TRACING: Once = Once::new();

/// Installs a test subscriber once per test binary. Honors `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Returns an inactive provider over fresh memory storage.
pub fn inactive_provider(config: ProviderConfig) -> Provider<MemoryBackend> {
    init_tracing();
    Provider::new(config, MemoryBackend::new())
}

/// Returns an active provider with the given configuration.
pub fn provider_with(config: ProviderConfig) -> Provider<MemoryBackend> {
    let provider = inactive_provider(config);
    provider.activate().expect("activation failed");
    provider
}

/// Returns an active provider with a default configuration.
pub fn memory_provider() -> Provider<MemoryBackend> {
    provider_with(ProviderConfig::new("test", "memory"))
}

/// Returns an active provider over shared storage.
pub fn provider_over(storage: &Arc<MemoryStorage>) -> Provider<MemoryBackend> {
    provider_over_with(storage, ProviderConfig::new("test", "memory"))
}

/// Returns an active provider over shared storage with the given
/// configuration.
pub fn provider_over_with(
    storage: &Arc<MemoryStorage>,
    config: ProviderConfig,
) -> Provider<MemoryBackend> {
    init_tracing();
    let provider = Provider::new(config, MemoryBackend::with_storage(Arc::clone(storage)));
    provider.activate().expect("activation failed");
    provider
}

/// Opens a person data source seeded with [`people`].
pub fn seeded_people(provider: &Provider<MemoryBackend>) -> DataSourceHandle<Person> {
    let source = provider
        .open_data_source::<Person>()
        .expect("open data source failed");
    source
        .create_all(None, None, &people())
        .expect("seeding failed");
    source
}
