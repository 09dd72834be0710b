//! Schema and entity entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-entity storage declaration under `schemas.<id>.entities.<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EntityEntry {
    /// Entity type identifier. Empty means the entry key is the type.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Whether the backend tracks modified fields before writing.
    pub dirty_checking: bool,
    /// Whether records of this type are cached.
    pub cacheable: bool,
    /// Cache used for this type when cacheable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
}

/// A group of entity declarations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchemaEntry {
    /// Entities keyed by entry name.
    pub entities: BTreeMap<String, EntityEntry>,
}

impl SchemaEntry {
    /// Finds the entry declaring the given entity type.
    pub fn entity(&self, entity_type: &str) -> Option<&EntityEntry> {
        self.entities.iter().find_map(|(name, entry)| {
            let declared = if entry.entity_type.is_empty() {
                name.as_str()
            } else {
                entry.entity_type.as_str()
            };
            (declared == entity_type).then_some(entry)
        })
    }
}
