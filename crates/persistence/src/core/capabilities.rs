//! Backend capability discovery.
//!
//! Optional parts of the contract (transactions, schema creation, cache
//! support, native queries) fail with an unsupported-operation error when a
//! backend lacks them. [`Capability`] lets callers check for them up front.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Optional features a backend may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    /// Create, read, update and delete.
    Crud,
    /// The transaction protocol (begin through recover).
    Transactions,
    /// Prepare and recover of in-doubt transactions.
    TwoPhaseCommit,
    /// `create_type` for entity types.
    SchemaCreation,
    /// Per-record time-to-live on writes.
    TimeToLive,
    /// Expire, invalidate, prune, clear and evict.
    CacheSupport,
    /// Backend-specific queries.
    NativeQuery,
    /// Cursors over query results.
    Cursors,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Crud => write!(f, "crud"),
            Capability::Transactions => write!(f, "transactions"),
            Capability::TwoPhaseCommit => write!(f, "two-phase-commit"),
            Capability::SchemaCreation => write!(f, "schema-creation"),
            Capability::TimeToLive => write!(f, "time-to-live"),
            Capability::CacheSupport => write!(f, "cache-support"),
            Capability::NativeQuery => write!(f, "native-query"),
            Capability::Cursors => write!(f, "cursors"),
        }
    }
}

/// The set of capabilities a backend declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(HashSet<Capability>);

impl Capabilities {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a capability.
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Returns true if the capability is declared.
    pub fn supports(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Iterates over the declared capabilities.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
