//! Storage unit entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::provider::ProviderEntry;
use super::schema::SchemaEntry;

/// A deployable group of schemas and providers under `storage-units.<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StorageUnitEntry {
    /// Location of the unit's backing store.
    pub uri: String,
    /// Whether this unit is the application's default.
    #[serde(rename = "default")]
    pub is_default: bool,
    /// Cache inherited by providers of this unit that declare none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    /// Schemas scoped to this unit.
    pub schemas: BTreeMap<String, SchemaEntry>,
    /// Providers scoped to this unit.
    pub providers: BTreeMap<String, ProviderEntry>,
}
