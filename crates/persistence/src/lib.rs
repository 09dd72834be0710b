//! Helios Storage SPI
//!
//! This crate defines a storage service-provider interface: the contracts a
//! storage backend implements so applications can persist typed entities
//! without depending on a particular database, cache or grid.
//!
//! # Features
//!
//! - **Provider lifecycle**: activation, graceful shutdown with a grace
//!   period, repeatable cycles, entity type registration
//! - **Data sources**: per-entity-type CRUD by identity, primary key and
//!   alternate keys, cursors, counts, TTL and cache management
//! - **Transactions**: begin/join/suspend/resume, one- and two-phase commit,
//!   flush, forget and recovery of in-doubt transactions
//! - **Queries**: a fluent, backend-neutral predicate builder
//! - **Configuration**: layered TOML or JSON settings for caches, schemas,
//!   providers and storage units
//!
//! # Architecture
//!
//! - [`types`] - Values, keys, entity descriptors and shared enums
//! - [`error`] - Error types for all operations
//! - [`query`] - The query builder and its in-memory evaluator
//! - [`config`] - The settings schema and loader
//! - [`core`] - Provider, data source and transaction contracts
//! - [`backends`] - Backend implementations
//!
//! # Quick Start
//!
//! ```
//! use helios_storage_spi::backends::memory::MemoryBackend;
//! use helios_storage_spi::config::ProviderConfig;
//! use helios_storage_spi::core::{DataSource, DataSourceControl, Provider};
//! use helios_storage_spi::types::{
//!     Entity, EntityDescriptor, FieldDescriptor, FieldRole, Key, SemanticType, TimeUnit,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! struct Person {
//!     id: String,
//!     name: String,
//! }
//!
//! impl Entity for Person {
//!     fn descriptor() -> EntityDescriptor {
//!         EntityDescriptor::builder("Person")
//!             .field(
//!                 FieldDescriptor::new("id", SemanticType::Text).with_role(FieldRole::Identity),
//!             )
//!             .field(
//!                 FieldDescriptor::new("name", SemanticType::Text).with_role(FieldRole::Required),
//!             )
//!             .build()
//!     }
//! }
//!
//! let provider = Provider::new(ProviderConfig::new("main", "memory"), MemoryBackend::new());
//! provider.activate()?;
//!
//! let people = provider.open_data_source::<Person>()?;
//! let ann = Person { id: "p1".into(), name: "Ann".into() };
//! people.create(None, None, &ann)?;
//! assert_eq!(people.fetch_by_identity(None, None, &Key::from("p1"))?, ann);
//!
//! people.delete_by_identity(None, None, &Key::from("p1"))?;
//! assert!(!people.contains_by_identity(None, None, &Key::from("p1"))?);
//!
//! provider.shutdown(10, Some(TimeUnit::Seconds))?;
//! assert!(!people.is_open());
//! # Ok::<(), helios_storage_spi::StorageError>(())
//! ```
//!
//! # Transactions
//!
//! ```
//! use helios_storage_spi::backends::memory::MemoryBackend;
//! use helios_storage_spi::config::ProviderConfig;
//! use helios_storage_spi::core::{Provider, TransactionStatus};
//!
//! let provider = Provider::new(ProviderConfig::new("main", "memory"), MemoryBackend::new());
//! provider.activate()?;
//!
//! let txn = provider.begin("order-42")?;
//! provider.prepare(&txn)?;
//! provider.commit(&txn)?;
//! assert_eq!(
//!     provider.transaction_status(txn.id()),
//!     Some(TransactionStatus::Committed)
//! );
//! assert!(provider.commit(&txn).is_err());
//! # Ok::<(), helios_storage_spi::StorageError>(())
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod query;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{
    ConfigError, ConfigResult, ErrorKind, RecordError, StorageError, StorageResult,
    TransactionError,
};
pub use query::Query;
pub use types::{Entity, EntityDescriptor, Key, Value};

// Re-export core contracts
pub use core::{
    Capability, DataSource, DataSourceHandle, Provider, ProviderBackend, Transaction,
    TransactionCoordinator,
};

// Re-export configuration
pub use config::{ProviderConfig, Settings, SettingsSource};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
