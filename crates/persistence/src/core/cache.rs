//! Cache policy handles.

use std::time::Duration;

use crate::config::{CacheEntry, EvictionPolicy};

/// A resolved cache policy passed to data source operations.
///
/// The core only carries policy values; evicting entries is the backend's
/// job.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicy {
    /// Cache id from the `caches` collection.
    pub id: String,
    /// Priority tier.
    pub level: u32,
    /// Maximum number of entries, if bounded.
    pub hard_limit_size: Option<u64>,
    /// Expiry applied to cached entries, if any.
    pub ttl: Option<Duration>,
    /// Eviction algorithm.
    pub eviction_policy: EvictionPolicy,
}

impl CachePolicy {
    /// Creates an unbounded policy without expiry.
    pub fn new(id: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            level,
            hard_limit_size: None,
            ttl: None,
            eviction_policy: EvictionPolicy::default(),
        }
    }

    /// Resolves a configured cache entry.
    pub fn from_entry(id: impl Into<String>, entry: &CacheEntry) -> Self {
        Self {
            id: id.into(),
            level: entry.level,
            hard_limit_size: (entry.hard_limit_size > 0).then_some(entry.hard_limit_size),
            ttl: entry.time_to_live.to_duration(),
            eviction_policy: entry.eviction_policy,
        }
    }

    /// Sets the entry limit.
    pub fn with_hard_limit(mut self, size: u64) -> Self {
        self.hard_limit_size = Some(size);
        self
    }

    /// Sets the expiry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the eviction algorithm.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeToLive;
    use crate::types::TimeUnit;

    #[test]
    fn test_from_entry_maps_zero_to_unbounded() {
        let entry = CacheEntry {
            level: 3,
            time_to_live: TimeToLive::new(5, TimeUnit::Seconds),
            ..Default::default()
        };
        let policy = CachePolicy::from_entry("c", &entry);
        assert_eq!(policy.level, 3);
        assert_eq!(policy.hard_limit_size, None);
        assert_eq!(policy.ttl, Some(Duration::from_secs(5)));
    }
}
