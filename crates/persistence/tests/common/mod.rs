//! Test infrastructure for the storage SPI.
//!
//! Fixtures define the entity types used across the integration tests, the
//! harness builds activated providers over the memory backend, the hooked
//! backend lets lifecycle hooks fail or block, and the assertions check
//! error kinds.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;
pub mod harness;
pub mod hooks;

// Re-export commonly used items
pub use assertions::*;
pub use fixtures::*;
pub use harness::*;
pub use hooks::*;
