//! Provider entries and the resolved provider configuration.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::CachePolicy;
use crate::error::{ConfigError, ConfigResult};

/// Provider declaration under `providers.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProviderEntry {
    /// Backend implementing the provider.
    pub backend_name: String,
    /// Provider type, interpreted by the backend.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Whether writes are refused.
    pub read_only: bool,
    /// Whether only registered entity types may be opened.
    pub managed_beans_only: bool,
    /// Default cache for entities of this provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    /// Free-form backend properties.
    pub properties: BTreeMap<String, String>,
}

/// Resolved, immutable configuration handed to a provider at construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderConfig {
    /// Provider id, unique per application.
    pub id: String,
    /// Backend implementing the provider.
    pub backend_name: String,
    /// Provider type, interpreted by the backend.
    pub provider_type: String,
    /// Initial read-only flag.
    pub read_only: bool,
    /// Whether only registered entity types may be opened.
    pub managed_types_only: bool,
    /// Storage unit the provider was declared in, if any.
    pub storage_unit: Option<String>,
    /// Backing-store location inherited from the storage unit.
    pub uri: Option<String>,
    /// Default cache policy for entities without their own.
    pub cache_policy: Option<CachePolicy>,
    /// Cache policies declared per entity type.
    pub entity_cache_policies: HashMap<String, CachePolicy>,
    /// Free-form backend properties.
    pub properties: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Creates a configuration with defaults.
    pub fn new(id: impl Into<String>, backend_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend_name: backend_name.into(),
            ..Default::default()
        }
    }

    /// Sets the initial read-only flag.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Restricts the provider to registered entity types.
    pub fn with_managed_types_only(mut self, managed: bool) -> Self {
        self.managed_types_only = managed;
        self
    }

    /// Sets the default cache policy.
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Sets the cache policy of one entity type.
    pub fn with_entity_cache_policy(
        mut self,
        entity_type: impl Into<String>,
        policy: CachePolicy,
    ) -> Self {
        self.entity_cache_policies.insert(entity_type.into(), policy);
        self
    }

    /// Sets a backend property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Returns a backend property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Parses a property in `humantime` syntax (`"30s"`, `"5m"`).
    pub fn duration_property(&self, key: &str) -> ConfigResult<Option<Duration>> {
        self.property(key)
            .map(|raw| {
                humantime::parse_duration(raw).map_err(|e| ConfigError::InvalidSettings {
                    message: format!("property '{}' is not a duration: '{}'", key, raw),
                    source: Some(Box::new(e)),
                })
            })
            .transpose()
    }

    /// Parses a non-negative integer property.
    pub fn usize_property(&self, key: &str) -> ConfigResult<Option<usize>> {
        self.property(key)
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|e| ConfigError::InvalidSettings {
                        message: format!("property '{}' is not a count: '{}'", key, raw),
                        source: Some(Box::new(e)),
                    })
            })
            .transpose()
    }

    /// Returns the cache policy that applies to an entity type.
    pub fn cache_policy_for(&self, entity_type: &str) -> Option<&CachePolicy> {
        self.entity_cache_policies
            .get(entity_type)
            .or(self.cache_policy.as_ref())
    }
}
