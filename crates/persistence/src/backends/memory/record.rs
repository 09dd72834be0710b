//! Descriptor-driven record handling: identity generation, validation,
//! audit stamping, key uniqueness and example matching.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

use crate::error::{RecordError, StorageError, StorageResult};
use crate::types::{EntityDescriptor, FieldRole, Key, SemanticType};

use super::storage::View;

/// Which key of a record an operation addresses.
#[derive(Debug, Clone, Copy)]
pub(crate) enum KeyKind<'a> {
    Identity,
    PrimaryKey,
    Alternate(&'a str),
}

impl<'a> KeyKind<'a> {
    pub fn name(self) -> &'a str {
        match self {
            KeyKind::Identity => "identity",
            KeyKind::PrimaryKey => "primary-key",
            KeyKind::Alternate(name) => name,
        }
    }

    pub fn extract(self, descriptor: &EntityDescriptor, record: &Json) -> Option<Key> {
        match self {
            KeyKind::Identity => descriptor.identity_key(record),
            KeyKind::PrimaryKey => descriptor.primary_key(record),
            KeyKind::Alternate(name) => descriptor.alternate_key(name, record),
        }
    }
}

/// Fails with `KeyViolation` if a row of `view` other than `identity` shares
/// the primary key or an alternate key of `record`.
pub(crate) fn check_unique(
    descriptor: &EntityDescriptor,
    view: &View,
    identity: &str,
    record: &Json,
) -> StorageResult<()> {
    let mut kinds = Vec::new();
    if !descriptor.primary_key_fields().is_empty() {
        kinds.push(KeyKind::PrimaryKey);
    }
    kinds.extend(
        descriptor
            .alternate_keys
            .iter()
            .map(|k| KeyKind::Alternate(k.name.as_str())),
    );
    for kind in kinds {
        let Some(key) = kind.extract(descriptor, record) else {
            continue;
        };
        let taken = view.iter().any(|(id, row)| {
            id != identity && kind.extract(descriptor, &row.record).as_ref() == Some(&key)
        });
        if taken {
            return Err(key_violation(descriptor, kind.name(), key));
        }
    }
    Ok(())
}

pub(crate) fn as_object_mut<'a>(
    descriptor: &EntityDescriptor,
    record: &'a mut Json,
) -> StorageResult<&'a mut Map<String, Json>> {
    record.as_object_mut().ok_or_else(|| {
        constraint(
            descriptor,
            "$",
            "entity must serialize to a JSON object".to_string(),
        )
    })
}

/// Fills identity fields that are missing or null.
///
/// Text identities get a random UUID; integer identities get `next_integer`.
pub(crate) fn assign_identity(
    descriptor: &EntityDescriptor,
    record: &mut Json,
    next_integer: i64,
) -> StorageResult<()> {
    let object = as_object_mut(descriptor, record)?;
    for field in descriptor.fields.iter().filter(|f| f.has_role(FieldRole::Identity)) {
        if object.get(&field.name).is_some_and(|v| !v.is_null()) {
            continue;
        }
        let generated = match field.semantic_type {
            SemanticType::Text => Json::String(Uuid::new_v4().to_string()),
            SemanticType::Integer => Json::from(next_integer),
            other => {
                return Err(constraint(
                    descriptor,
                    &field.name,
                    format!("cannot generate a {} identity", other),
                ));
            }
        };
        object.insert(field.name.clone(), generated);
    }
    Ok(())
}

/// Checks semantic types and required fields.
pub(crate) fn validate(descriptor: &EntityDescriptor, record: &Json) -> StorageResult<()> {
    let object = record.as_object().ok_or_else(|| {
        constraint(
            descriptor,
            "$",
            "entity must serialize to a JSON object".to_string(),
        )
    })?;
    for field in &descriptor.fields {
        let value = object.get(&field.name).unwrap_or(&Json::Null);
        if value.is_null() {
            if field.has_role(FieldRole::Required) || field.has_role(FieldRole::Identity) {
                return Err(constraint(descriptor, &field.name, "value is required".to_string()));
            }
            continue;
        }
        if !field.semantic_type.accepts(value) {
            return Err(constraint(
                descriptor,
                &field.name,
                format!("expected {} but found {}", field.semantic_type, value),
            ));
        }
    }
    Ok(())
}

/// Fails if an immutable field differs from its stored value.
pub(crate) fn check_immutable(
    descriptor: &EntityDescriptor,
    stored: &Json,
    replacement: &Json,
) -> StorageResult<()> {
    for field in descriptor.fields.iter().filter(|f| f.has_role(FieldRole::Immutable)) {
        let before = stored.get(&field.name).unwrap_or(&Json::Null);
        let after = replacement.get(&field.name).unwrap_or(&Json::Null);
        if before != after {
            return Err(constraint(descriptor, &field.name, "field is immutable".to_string()));
        }
    }
    Ok(())
}

/// Maintains audit fields.
///
/// Immutable audit fields are creation stamps and keep their stored value.
/// Other audit fields are refreshed on every write: timestamps to `now`,
/// integers incremented as a version counter.
pub(crate) fn stamp_audit(
    descriptor: &EntityDescriptor,
    record: &mut Json,
    stored: Option<&Json>,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let object = as_object_mut(descriptor, record)?;
    for field in descriptor.fields.iter().filter(|f| f.has_role(FieldRole::Audit)) {
        let previous = stored.and_then(|s| s.get(&field.name)).filter(|v| !v.is_null());
        let creation = field.has_role(FieldRole::Immutable);
        let value = match (field.semantic_type, previous) {
            (_, Some(previous)) if creation => previous.clone(),
            (SemanticType::Timestamp, _) => Json::String(now.to_rfc3339()),
            (SemanticType::Integer, previous) if !creation => {
                Json::from(previous.and_then(Json::as_i64).unwrap_or(0) + 1)
            }
            (SemanticType::Integer, None) => Json::from(1),
            (other, _) => {
                return Err(constraint(
                    descriptor,
                    &field.name,
                    format!("audit fields cannot be {}", other),
                ));
            }
        };
        object.insert(field.name.clone(), value);
    }
    Ok(())
}

/// Returns true if every non-null field of `example` matches `record`.
/// Nested objects match recursively.
pub(crate) fn matches_example(example: &Json, record: &Json) -> bool {
    match (example, record) {
        (Json::Object(wanted), Json::Object(actual)) => wanted
            .iter()
            .filter(|(_, v)| !v.is_null())
            .all(|(k, v)| actual.get(k).is_some_and(|a| matches_example(v, a))),
        (wanted, actual) => wanted == actual,
    }
}

pub(crate) fn not_found(descriptor: &EntityDescriptor, key: impl ToString) -> StorageError {
    RecordError::NotFound {
        entity_type: descriptor.entity_type.to_string(),
        key: key.to_string(),
    }
    .into()
}

pub(crate) fn key_violation(
    descriptor: &EntityDescriptor,
    key_name: &str,
    key: impl ToString,
) -> StorageError {
    RecordError::KeyViolation {
        entity_type: descriptor.entity_type.to_string(),
        key_name: key_name.to_string(),
        key: key.to_string(),
    }
    .into()
}

pub(crate) fn constraint(
    descriptor: &EntityDescriptor,
    field: &str,
    message: String,
) -> StorageError {
    RecordError::DataConstraintViolation {
        entity_type: descriptor.entity_type.to_string(),
        field: field.to_string(),
        message,
    }
    .into()
}
