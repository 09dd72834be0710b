//! Core contracts of the storage SPI.
//!
//! - [`Provider`] and [`ProviderBackend`] - Lifecycle and backend hooks
//! - [`DataSource`] - Per-entity-type CRUD, cursor, count and cache operations
//! - [`TransactionCoordinator`] and [`TransactionLedger`] - Transaction protocol
//! - [`Capability`] - Runtime capability discovery
//! - [`CachePolicy`] - Resolved cache policy handles
//!
//! # Control flow
//!
//! ```text
//! Provider::new ──► activate ──► open_data_source::<E> ──► DataSourceHandle<E>
//!                      │                                      │ create / fetch / cursor / ...
//!                      │         begin / join ──► Transaction ┘
//!                      ▼
//!                  shutdown (closes every open data source)
//! ```

mod cache;
mod capabilities;
mod data_source;
mod provider;
mod transaction;

pub use cache::CachePolicy;
pub use capabilities::{Capabilities, Capability};
pub use data_source::{
    Cursor, DataSource, DataSourceControl, DataSourceHandle, DataSourceId, DataSourceRegistry,
    NativeQuery, SessionContext,
};
pub use provider::{Provider, ProviderBackend};
pub use transaction::{
    DEFAULT_RESOLVED_HISTORY, Transaction, TransactionCoordinator, TransactionId,
    TransactionLedger, TransactionOrigin, TransactionStatus,
};
