//! Cache entries.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::TimeUnit;

/// Eviction algorithm requested from the cache backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently used.
    #[default]
    Lru,
    /// Least frequently used.
    Lfu,
    /// First in, first out.
    Fifo,
    /// Random victim.
    Random,
    /// Never evict; writes past the hard limit fail.
    None,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "lru"),
            EvictionPolicy::Lfu => write!(f, "lfu"),
            EvictionPolicy::Fifo => write!(f, "fifo"),
            EvictionPolicy::Random => write!(f, "random"),
            EvictionPolicy::None => write!(f, "none"),
        }
    }
}

/// A time-to-live amount with its unit. A zero value means no expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimeToLive {
    /// Amount of `unit`.
    pub value: u64,
    /// Unit of `value`.
    pub unit: TimeUnit,
}

impl TimeToLive {
    /// Creates a time-to-live.
    pub fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    /// Returns the duration, or `None` when no expiry is configured.
    pub fn to_duration(self) -> Option<Duration> {
        (self.value > 0).then(|| self.unit.to_duration(self.value))
    }
}

/// A physical cache endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheNode {
    /// Endpoint kind, interpreted by the cache backend.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Free-form endpoint properties.
    pub properties: BTreeMap<String, String>,
}

/// Cache policy declaration under `caches.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CacheEntry {
    /// Priority tier. At most one cache per level may be the default.
    pub level: u32,
    /// Whether this cache is the default for its level.
    #[serde(rename = "default")]
    pub is_default: bool,
    /// Maximum number of entries; zero means unbounded.
    pub hard_limit_size: u64,
    /// Expiry applied to cached entries.
    pub time_to_live: TimeToLive,
    /// Eviction algorithm.
    pub eviction_policy: EvictionPolicy,
    /// Physical endpoints keyed by node id.
    pub nodes: BTreeMap<String, CacheNode>,
}
