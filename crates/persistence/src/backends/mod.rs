//! Backend implementations of the storage contracts.
//!
//! # Available Backends
//!
//! | Backend | Name | Description |
//! |---------|------|-------------|
//! | Memory | `memory` | Process-local tables with TTL, eviction and two-phase commit |
//!
//! Other backends implement [`crate::core::ProviderBackend`] and a
//! [`crate::core::DataSource`] per entity type in their own crates.

pub mod memory;
