//! Settings loading, merging and resolution.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::core::CachePolicy;
use crate::error::{ConfigError, ConfigResult};

use super::cache::CacheEntry;
use super::provider::{ProviderConfig, ProviderEntry};
use super::schema::{EntityEntry, SchemaEntry};
use super::storage_unit::StorageUnitEntry;

/// Where a settings pass is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    /// A file; `.json` files are JSON, everything else is TOML.
    File(PathBuf),
    /// Inline TOML text.
    Toml(String),
    /// Inline JSON text.
    Json(String),
}

impl SettingsSource {
    /// Creates a file source.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SettingsSource::File(path.into())
    }

    fn read(&self) -> ConfigResult<Json> {
        match self {
            SettingsSource::File(path) => {
                let text =
                    std::fs::read_to_string(path).map_err(|source| ConfigError::Unreachable {
                        location: path.display().to_string(),
                        source,
                    })?;
                let is_json = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
                if is_json {
                    parse_json(&text)
                } else {
                    parse_toml(&text)
                }
            }
            SettingsSource::Toml(text) => parse_toml(text),
            SettingsSource::Json(text) => parse_json(text),
        }
    }
}

impl fmt::Display for SettingsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsSource::File(path) => write!(f, "{}", path.display()),
            SettingsSource::Toml(_) => write!(f, "<inline toml>"),
            SettingsSource::Json(_) => write!(f, "<inline json>"),
        }
    }
}

fn parse_toml(text: &str) -> ConfigResult<Json> {
    toml::from_str::<Json>(text).map_err(|e| ConfigError::InvalidSettings {
        message: format!("malformed TOML: {}", e),
        source: Some(Box::new(e)),
    })
}

fn parse_json(text: &str) -> ConfigResult<Json> {
    let json: Json = serde_json::from_str(text).map_err(|e| ConfigError::InvalidSettings {
        message: format!("malformed JSON: {}", e),
        source: Some(Box::new(e)),
    })?;
    if !json.is_object() {
        return Err(ConfigError::InvalidSettings {
            message: "settings root must be an object".to_string(),
            source: None,
        });
    }
    Ok(json)
}

/// The resolved settings tree.
///
/// # Examples
///
/// ```
/// use helios_storage_spi::config::{Settings, SettingsSource};
///
/// let mut settings = Settings::load(&SettingsSource::Toml(r#"
///     [caches.local]
///     level = 1
///     default = true
///
///     [providers.mem]
///     backend-name = "memory"
///     cache-id = "local"
/// "#.to_string()))?;
///
/// settings.merge_from(&SettingsSource::Toml(r#"
///     [providers.mem]
///     read-only = true
/// "#.to_string()))?;
///
/// let provider = settings.provider_config("mem")?;
/// assert!(provider.read_only);
/// assert_eq!(provider.cache_policy.map(|p| p.id), Some("local".to_string()));
/// # Ok::<(), helios_storage_spi::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Cache policies keyed by id.
    pub caches: BTreeMap<String, CacheEntry>,
    /// Schemas keyed by id.
    pub schemas: BTreeMap<String, SchemaEntry>,
    /// Providers keyed by id.
    pub providers: BTreeMap<String, ProviderEntry>,
    /// Storage units keyed by id.
    pub storage_units: BTreeMap<String, StorageUnitEntry>,
}

impl Settings {
    /// Loads settings from a single source.
    pub fn load(source: &SettingsSource) -> ConfigResult<Self> {
        let mut settings = Settings::default();
        settings.merge_from(source)?;
        Ok(settings)
    }

    /// Loads and merges several sources in order.
    pub fn load_all<'a, I>(sources: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = &'a SettingsSource>,
    {
        let mut settings = Settings::default();
        for source in sources {
            settings.merge_from(source)?;
        }
        Ok(settings)
    }

    /// Merges another pass onto the resolved settings.
    ///
    /// Fields present in the new pass override; absent fields keep their
    /// resolved value. On error the settings are left unchanged.
    pub fn merge_from(&mut self, source: &SettingsSource) -> ConfigResult<()> {
        let patch = source.read()?;
        let mut tree = serde_json::to_value(&*self).map_err(|e| ConfigError::InvalidSettings {
            message: format!("cannot serialize resolved settings: {}", e),
            source: Some(Box::new(e)),
        })?;
        json_patch::merge(&mut tree, &patch);

        let merged: Settings =
            serde_json::from_value(tree).map_err(|e| ConfigError::InvalidSettings {
                message: format!("{} does not match the settings schema: {}", source, e),
                source: Some(Box::new(e)),
            })?;
        merged.validate()?;

        tracing::info!(
            source = %source,
            caches = merged.caches.len(),
            providers = merged.providers.len(),
            storage_units = merged.storage_units.len(),
            "Loaded settings"
        );
        *self = merged;
        Ok(())
    }

    /// Checks cross-entry invariants.
    ///
    /// # Errors
    ///
    /// `SettingsConflict` when two different caches are the default for the
    /// same level, `InvalidSettings` when an entry references an unknown
    /// cache.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut defaults: HashMap<u32, &str> = HashMap::new();
        for (id, cache) in self.caches.iter().filter(|(_, c)| c.is_default) {
            if let Some(first) = defaults.insert(cache.level, id) {
                return Err(ConfigError::SettingsConflict {
                    level: cache.level,
                    first: first.to_string(),
                    second: id.clone(),
                });
            }
        }

        for (owner, cache_id) in self.cache_references() {
            if !self.caches.contains_key(cache_id) {
                return Err(ConfigError::InvalidSettings {
                    message: format!("{} references unknown cache '{}'", owner, cache_id),
                    source: None,
                });
            }
        }
        Ok(())
    }

    fn cache_references(&self) -> Vec<(String, &str)> {
        let mut refs = Vec::new();
        schema_cache_refs("", &self.schemas, &mut refs);
        for (id, provider) in &self.providers {
            if let Some(cache) = provider.cache_id.as_deref() {
                refs.push((format!("provider '{}'", id), cache));
            }
        }
        for (unit_id, unit) in &self.storage_units {
            if let Some(cache) = unit.cache_id.as_deref() {
                refs.push((format!("storage unit '{}'", unit_id), cache));
            }
            let prefix = format!("storage unit '{}' ", unit_id);
            schema_cache_refs(&prefix, &unit.schemas, &mut refs);
            for (id, provider) in &unit.providers {
                if let Some(cache) = provider.cache_id.as_deref() {
                    refs.push((format!("{}provider '{}'", prefix, id), cache));
                }
            }
        }
        refs
    }

    /// Resolves a cache entry into a policy handle.
    pub fn cache_policy(&self, id: &str) -> ConfigResult<CachePolicy> {
        self.caches
            .get(id)
            .map(|entry| CachePolicy::from_entry(id, entry))
            .ok_or_else(|| ConfigError::UnknownEntry {
                section: "caches".to_string(),
                id: id.to_string(),
            })
    }

    /// Returns the id and entry of the default cache of a level.
    pub fn default_cache(&self, level: u32) -> Option<(&str, &CacheEntry)> {
        self.caches
            .iter()
            .find(|(_, c)| c.is_default && c.level == level)
            .map(|(id, c)| (id.as_str(), c))
    }

    /// Finds a provider at top level or inside a storage unit.
    pub fn provider_entry(
        &self,
        id: &str,
    ) -> Option<(&ProviderEntry, Option<(&str, &StorageUnitEntry)>)> {
        if let Some(entry) = self.providers.get(id) {
            return Some((entry, None));
        }
        self.storage_units.iter().find_map(|(unit_id, unit)| {
            unit.providers
                .get(id)
                .map(|entry| (entry, Some((unit_id.as_str(), unit))))
        })
    }

    /// Returns the cache id declared for an entity type in the top-level
    /// schemas.
    pub fn entity_cache_id(&self, entity_type: &str) -> Option<&str> {
        find_entity(&self.schemas, entity_type)
            .filter(|e| e.cacheable)
            .and_then(|e| e.cache_id.as_deref())
    }

    /// Builds the configuration of a provider.
    ///
    /// A provider without its own `cache-id` inherits its storage unit's.
    /// Entity cache policies come from the top-level schemas and, for
    /// providers inside a storage unit, from the unit's schemas which take
    /// precedence.
    pub fn provider_config(&self, id: &str) -> ConfigResult<ProviderConfig> {
        let (entry, unit) = self
            .provider_entry(id)
            .ok_or_else(|| ConfigError::UnknownEntry {
                section: "providers".to_string(),
                id: id.to_string(),
            })?;

        let cache_id = entry
            .cache_id
            .as_deref()
            .or_else(|| unit.and_then(|(_, u)| u.cache_id.as_deref()));
        let cache_policy = cache_id.map(|c| self.cache_policy(c)).transpose()?;

        let mut entity_cache_policies = HashMap::new();
        let unit_schemas = unit.map(|(_, u)| &u.schemas);
        for schemas in std::iter::once(&self.schemas).chain(unit_schemas) {
            for schema in schemas.values() {
                for (name, entity) in &schema.entities {
                    let Some(cache) = entity.cache_id.as_deref().filter(|_| entity.cacheable)
                    else {
                        continue;
                    };
                    let entity_type = if entity.entity_type.is_empty() {
                        name.clone()
                    } else {
                        entity.entity_type.clone()
                    };
                    entity_cache_policies.insert(entity_type, self.cache_policy(cache)?);
                }
            }
        }

        Ok(ProviderConfig {
            id: id.to_string(),
            backend_name: entry.backend_name.clone(),
            provider_type: entry.provider_type.clone(),
            read_only: entry.read_only,
            managed_types_only: entry.managed_beans_only,
            storage_unit: unit.map(|(unit_id, _)| unit_id.to_string()),
            uri: unit
                .map(|(_, u)| u.uri.clone())
                .filter(|uri| !uri.is_empty()),
            cache_policy,
            entity_cache_policies,
            properties: entry.properties.clone(),
        })
    }
}

fn schema_cache_refs<'a>(
    prefix: &str,
    schemas: &'a BTreeMap<String, SchemaEntry>,
    refs: &mut Vec<(String, &'a str)>,
) {
    for (schema_id, schema) in schemas {
        for (name, entity) in &schema.entities {
            if let Some(id) = entity.cache_id.as_deref() {
                refs.push((
                    format!("{}schema '{}' entity '{}'", prefix, schema_id, name),
                    id,
                ));
            }
        }
    }
}

fn find_entity<'a>(
    schemas: &'a BTreeMap<String, SchemaEntry>,
    entity_type: &str,
) -> Option<&'a EntityEntry> {
    schemas.values().find_map(|s| s.entity(entity_type))
}
