//! Entity metadata descriptors.
//!
//! Storable types describe their storage mapping with an explicit
//! [`EntityDescriptor`] built at compile time, instead of runtime
//! reflection. The descriptor names each field, its [`SemanticType`] and
//! the [`FieldRole`]s it plays (identity, primary key, audit, ...).

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::enums::{ConsistencyLevel, InstanceType, PersistenceType};
use super::value::{Key, Value};

/// Opaque identifier of a stored entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    /// Creates a new entity type identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The semantic type of a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    /// UTF-8 text.
    Text,
    /// Signed integer.
    Integer,
    /// Floating point number.
    Float,
    /// Boolean flag.
    Boolean,
    /// RFC 3339 instant.
    Timestamp,
    /// Base64-encoded bytes.
    Bytes,
    /// Arbitrary nested JSON.
    Json,
}

impl SemanticType {
    /// Checks whether a serialized JSON value conforms to this type.
    ///
    /// `null` conforms to every type; requiredness is checked separately.
    pub fn accepts(self, value: &Json) -> bool {
        match (self, value) {
            (_, Json::Null) => true,
            (SemanticType::Text, Json::String(_)) => true,
            (SemanticType::Integer, Json::Number(n)) => n.is_i64() || n.is_u64(),
            (SemanticType::Float, Json::Number(_)) => true,
            (SemanticType::Boolean, Json::Bool(_)) => true,
            (SemanticType::Timestamp, Json::String(s)) => {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
            }
            (SemanticType::Bytes, Json::String(_)) => true,
            (SemanticType::Bytes, Json::Array(_)) => true,
            (SemanticType::Json, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SemanticType::Text => "text",
            SemanticType::Integer => "integer",
            SemanticType::Float => "float",
            SemanticType::Boolean => "boolean",
            SemanticType::Timestamp => "timestamp",
            SemanticType::Bytes => "bytes",
            SemanticType::Json => "json",
        };
        write!(f, "{}", name)
    }
}

/// Role a field plays in the storage mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldRole {
    /// Part of the system identity. Generated on create when absent.
    Identity,
    /// Part of the natural primary key.
    PrimaryKey,
    /// Must not be null.
    Required,
    /// Cannot change after creation.
    Immutable,
    /// Maintained by the storage layer (created/modified stamps).
    Audit,
}

/// Describes one stored field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as it appears in the serialized record.
    pub name: String,
    /// Semantic type of the field.
    pub semantic_type: SemanticType,
    /// Roles this field plays.
    pub roles: Vec<FieldRole>,
}

impl FieldDescriptor {
    /// Creates a field with no roles.
    pub fn new(name: impl Into<String>, semantic_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            semantic_type,
            roles: Vec::new(),
        }
    }

    /// Adds a role.
    pub fn with_role(mut self, role: FieldRole) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    /// Returns true if the field plays the given role.
    pub fn has_role(&self, role: FieldRole) -> bool {
        self.roles.contains(&role)
    }
}

/// A named secondary unique lookup path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateKey {
    /// Name used to address this key.
    pub name: String,
    /// Ordered fields forming the key.
    pub fields: Vec<String>,
}

/// Storage metadata of an entity type.
///
/// # Examples
///
/// ```
/// use helios_storage_spi::types::{
///     EntityDescriptor, FieldDescriptor, FieldRole, SemanticType,
/// };
///
/// let descriptor = EntityDescriptor::builder("Person")
///     .field(FieldDescriptor::new("id", SemanticType::Text).with_role(FieldRole::Identity))
///     .field(FieldDescriptor::new("email", SemanticType::Text))
///     .alternate_key("by-email", &["email"])
///     .build();
///
/// assert_eq!(descriptor.identity_fields(), vec!["id"]);
/// assert!(descriptor.alternate("by-email").is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// The entity type.
    pub entity_type: EntityType,
    /// Stored fields.
    pub fields: Vec<FieldDescriptor>,
    /// Alternate unique keys.
    pub alternate_keys: Vec<AlternateKey>,
    /// Requested replica consistency.
    pub consistency: ConsistencyLevel,
    /// Durability tier.
    pub persistence: PersistenceType,
    /// Availability class.
    pub instance: InstanceType,
}

impl EntityDescriptor {
    /// Starts building a descriptor for the given type.
    pub fn builder(entity_type: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder {
            descriptor: EntityDescriptor {
                entity_type: EntityType::new(entity_type),
                fields: Vec::new(),
                alternate_keys: Vec::new(),
                consistency: ConsistencyLevel::default(),
                persistence: PersistenceType::default(),
                instance: InstanceType::default(),
            },
        }
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Names of fields with the given role, in declaration order.
    pub fn fields_with_role(&self, role: FieldRole) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.has_role(role))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Names of the identity fields.
    pub fn identity_fields(&self) -> Vec<&str> {
        self.fields_with_role(FieldRole::Identity)
    }

    /// Names of the primary key fields.
    pub fn primary_key_fields(&self) -> Vec<&str> {
        self.fields_with_role(FieldRole::PrimaryKey)
    }

    /// Looks up an alternate key by name.
    pub fn alternate(&self, name: &str) -> Option<&AlternateKey> {
        self.alternate_keys.iter().find(|k| k.name == name)
    }

    /// Extracts the identity key from a serialized record.
    pub fn identity_key(&self, record: &Json) -> Option<Key> {
        extract_key(record, &self.identity_fields())
    }

    /// Extracts the primary key from a serialized record.
    ///
    /// Falls back to the identity key when no primary key fields are
    /// declared.
    pub fn primary_key(&self, record: &Json) -> Option<Key> {
        let fields = self.primary_key_fields();
        if fields.is_empty() {
            return self.identity_key(record);
        }
        extract_key(record, &fields)
    }

    /// Extracts the named alternate key from a serialized record.
    pub fn alternate_key(&self, name: &str, record: &Json) -> Option<Key> {
        let key = self.alternate(name)?;
        let fields: Vec<&str> = key.fields.iter().map(String::as_str).collect();
        extract_key(record, &fields)
    }
}

fn extract_key(record: &Json, fields: &[&str]) -> Option<Key> {
    if fields.is_empty() {
        return None;
    }
    let mut values = Vec::with_capacity(fields.len());
    for field in fields {
        let value = Value::from_json(record.get(*field)?)?;
        if value.is_null() {
            return None;
        }
        values.push(value);
    }
    Some(Key::new(values))
}

/// Builder for [`EntityDescriptor`].
#[derive(Debug, Clone)]
pub struct EntityDescriptorBuilder {
    descriptor: EntityDescriptor,
}

impl EntityDescriptorBuilder {
    /// Adds a field.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.descriptor.fields.push(field);
        self
    }

    /// Adds an alternate key over the given fields.
    pub fn alternate_key(mut self, name: impl Into<String>, fields: &[&str]) -> Self {
        self.descriptor.alternate_keys.push(AlternateKey {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    /// Sets the consistency level.
    pub fn consistency(mut self, level: ConsistencyLevel) -> Self {
        self.descriptor.consistency = level;
        self
    }

    /// Sets the persistence type.
    pub fn persistence(mut self, persistence: PersistenceType) -> Self {
        self.descriptor.persistence = persistence;
        self
    }

    /// Sets the instance type.
    pub fn instance(mut self, instance: InstanceType) -> Self {
        self.descriptor.instance = instance;
        self
    }

    /// Finishes the descriptor.
    pub fn build(self) -> EntityDescriptor {
        self.descriptor
    }
}

/// A type that can be stored through the SPI.
///
/// Records travel through backends in their `serde` JSON form; the
/// descriptor tells the backend how to address and validate them.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Returns the storage descriptor of this type.
    fn descriptor() -> EntityDescriptor;

    /// Returns the entity type identifier.
    fn entity_type() -> EntityType {
        Self::descriptor().entity_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account() -> EntityDescriptor {
        EntityDescriptor::builder("Account")
            .field(FieldDescriptor::new("id", SemanticType::Text).with_role(FieldRole::Identity))
            .field(
                FieldDescriptor::new("tenant", SemanticType::Text)
                    .with_role(FieldRole::PrimaryKey)
                    .with_role(FieldRole::Immutable),
            )
            .field(
                FieldDescriptor::new("number", SemanticType::Integer)
                    .with_role(FieldRole::PrimaryKey),
            )
            .field(FieldDescriptor::new("email", SemanticType::Text))
            .alternate_key("by-email", &["email"])
            .consistency(ConsistencyLevel::Quorum)
            .build()
    }

    #[test]
    fn test_key_extraction() {
        let d = account();
        let record = json!({"id": "a1", "tenant": "acme", "number": 7, "email": "x@y"});
        assert_eq!(d.identity_key(&record), Some(Key::from("a1")));
        assert_eq!(
            d.primary_key(&record),
            Some(Key::new(vec![Value::from("acme"), Value::from(7)]))
        );
        assert_eq!(d.alternate_key("by-email", &record), Some(Key::from("x@y")));
        assert_eq!(d.alternate_key("missing", &record), None);
    }

    #[test]
    fn test_null_key_component_yields_none() {
        let d = account();
        let record = json!({"id": "a1", "tenant": null, "number": 7});
        assert_eq!(d.primary_key(&record), None);
    }

    #[test]
    fn test_primary_key_falls_back_to_identity() {
        let d = EntityDescriptor::builder("Tag")
            .field(FieldDescriptor::new("id", SemanticType::Integer).with_role(FieldRole::Identity))
            .build();
        assert_eq!(d.primary_key(&json!({"id": 3})), Some(Key::from(3)));
    }

    #[test]
    fn test_semantic_type_accepts() {
        assert!(SemanticType::Integer.accepts(&json!(4)));
        assert!(!SemanticType::Integer.accepts(&json!(4.5)));
        assert!(SemanticType::Timestamp.accepts(&json!("2024-01-01T00:00:00Z")));
        assert!(!SemanticType::Timestamp.accepts(&json!("yesterday")));
        assert!(SemanticType::Text.accepts(&json!(null)));
    }

    #[test]
    fn test_with_role_is_idempotent() {
        let field = FieldDescriptor::new("id", SemanticType::Text)
            .with_role(FieldRole::Identity)
            .with_role(FieldRole::Identity);
        assert_eq!(field.roles.len(), 1);
    }
}
