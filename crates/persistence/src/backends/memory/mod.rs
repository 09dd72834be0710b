//! In-memory backend.
//!
//! Keeps every entity type in a table of JSON records keyed by identity.
//! It implements the whole data source contract except native queries,
//! including TTL expiry, cache limits with eviction, and the transaction
//! protocol with two-phase commit and recovery.
//!
//! # Example
//!
//! ```
//! use helios_storage_spi::backends::memory::MemoryBackend;
//! use helios_storage_spi::config::ProviderConfig;
//! use helios_storage_spi::core::{Capability, Provider};
//!
//! let provider = Provider::new(ProviderConfig::new("cache", "memory"), MemoryBackend::new());
//! assert!(provider.supports(Capability::TwoPhaseCommit));
//! assert!(!provider.supports(Capability::NativeQuery));
//! ```

mod backend;
mod data_source;
mod record;
mod storage;

pub use backend::{
    MAX_TRANSACTIONS_PROPERTY, MemoryBackend, RESOLVED_HISTORY_PROPERTY,
    TRANSACTION_TIMEOUT_PROPERTY,
};
pub use data_source::MemoryDataSource;
pub use storage::{MemoryStorage, WriteSet};
