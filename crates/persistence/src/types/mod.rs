//! Core value types for the storage SPI.
//!
//! - [`Value`], [`Key`] - Tagged scalars and composite keys
//! - [`EntityDescriptor`], [`Entity`] - Explicit storage metadata for stored types
//! - [`ConsistencyLevel`], [`PersistenceType`], [`InstanceType`] - Boundary enumerations
//! - [`TimeUnit`] - Units for grace periods and time-to-live values
//!
//! # Examples
//!
//! ```
//! use helios_storage_spi::types::{Key, TimeUnit, Value};
//! use std::time::Duration;
//!
//! let key = Key::new(vec![Value::from("acme"), Value::from(42)]);
//! assert_eq!(key.to_string(), "acme:42");
//!
//! assert_eq!(TimeUnit::Seconds.to_duration(30), Duration::from_secs(30));
//! ```

mod entity;
mod enums;
mod value;

pub use entity::{
    AlternateKey, Entity, EntityDescriptor, EntityDescriptorBuilder, EntityType, FieldDescriptor,
    FieldRole, SemanticType,
};
pub use enums::{ConsistencyLevel, InstanceType, PersistenceType, TimeUnit};
pub use value::{Key, Value};
