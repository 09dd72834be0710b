//! Configuration schema.
//!
//! Settings are organized in four collections keyed by id:
//!
//! - `caches` - [`CacheEntry`] policies with a level, default flag, limits and nodes
//! - `schemas` - [`SchemaEntry`] groups of [`EntityEntry`] declarations
//! - `providers` - [`ProviderEntry`] backend declarations with free-form properties
//! - `storage-units` - [`StorageUnitEntry`] groups of schemas and providers
//!
//! [`Settings`] loads one or more [`SettingsSource`]s, merging each pass
//! over the previous one, and resolves a [`ProviderConfig`] for
//! [`crate::core::Provider::new`].

mod cache;
mod provider;
mod schema;
mod settings;
mod storage_unit;

pub use cache::{CacheEntry, CacheNode, EvictionPolicy, TimeToLive};
pub use provider::{ProviderConfig, ProviderEntry};
pub use schema::{EntityEntry, SchemaEntry};
pub use settings::{Settings, SettingsSource};
pub use storage_unit::StorageUnitEntry;
