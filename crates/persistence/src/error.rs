//! Error types for the storage SPI.
//!
//! Every fallible operation returns [`StorageResult`]. The top-level
//! [`StorageError`] groups record-level, transaction and configuration
//! failures into nested enums, and [`StorageError::kind`] flattens them into
//! an [`ErrorKind`] so callers can branch on the failure class without
//! matching every variant.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all provider, data source and transaction
/// operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed caller input, detected before any side effect.
    #[error("illegal argument: {message}")]
    IllegalArgument { message: String },

    /// The operation is not allowed in the current lifecycle state.
    #[error("illegal state: {message}")]
    IllegalState { message: String },

    /// Record-level failures (absence, uniqueness, constraints).
    #[error(transparent)]
    Record(#[from] RecordError),

    /// The backend did not complete the operation in time.
    #[error("operation '{operation}' timed out{}", format_timeout(.timeout_ms))]
    OperationTimeout {
        operation: String,
        timeout_ms: Option<u64>,
    },

    /// The backend ran out of a bounded resource.
    #[error("not enough {resource} to perform '{operation}'")]
    NotEnoughResource { resource: String, operation: String },

    /// The backend does not implement the requested capability.
    #[error("operation '{operation}' not supported by {backend_name}")]
    Unsupported {
        backend_name: String,
        operation: String,
    },

    /// Transaction protocol failures.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Configuration failures surfaced while building a provider.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Unexpected backend failure with its root cause preserved.
    #[error("provider error in {backend_name}: {message}")]
    Provider {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

fn format_timeout(timeout_ms: &Option<u64>) -> String {
    match timeout_ms {
        Some(ms) => format!(" after {}ms", ms),
        None => String::new(),
    }
}

/// Errors related to individual records.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The referenced record does not exist.
    #[error("record not found: {entity_type}/{key}")]
    NotFound { entity_type: String, key: String },

    /// A uniqueness constraint would be violated.
    #[error("key violation on {entity_type}: {key_name} {key} already exists")]
    KeyViolation {
        entity_type: String,
        key_name: String,
        key: String,
    },

    /// A schema or type constraint would be violated.
    #[error("constraint violation on {entity_type}.{field}: {message}")]
    DataConstraintViolation {
        entity_type: String,
        field: String,
        message: String,
    },
}

/// Errors raised by the transaction protocol.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// No transaction is known under this id.
    #[error("transaction not found: {id}")]
    NotFound { id: String },

    /// `begin` was called with the id of a live transaction.
    #[error("transaction already exists: {id}")]
    AlreadyExists { id: String },

    /// The transaction has already been committed or rolled back.
    #[error("transaction {id} already resolved as {outcome}")]
    AlreadyResolved { id: String, outcome: String },

    /// The verb is not valid for the transaction's current status.
    #[error("cannot {operation} transaction {id} while it is {status}")]
    InvalidState {
        id: String,
        status: String,
        operation: String,
    },

    /// A participant failed to apply the transaction's writes.
    #[error("transaction {id} failed: {reason}")]
    Failed { id: String, reason: String },
}

/// Errors raised while loading or resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The backing store holding the settings could not be read.
    #[error("settings backing-store unreachable: {location}")]
    Unreachable {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// The settings content is structurally invalid.
    #[error("invalid settings: {message}")]
    InvalidSettings {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Two different caches claim to be the default for the same level.
    #[error("settings conflict: caches '{first}' and '{second}' are both default for level {level}")]
    SettingsConflict {
        level: u32,
        first: String,
        second: String,
    },

    /// A referenced entry does not exist.
    #[error("unknown {section} entry '{id}'")]
    UnknownEntry { section: String, id: String },
}

/// Flattened classification of a [`StorageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IllegalArgument,
    IllegalState,
    NotFound,
    KeyViolation,
    DataConstraintViolation,
    OperationTimeout,
    NotEnoughResource,
    UnsupportedOperation,
    Transaction,
    Configuration,
    Provider,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::IllegalArgument => "illegal-argument",
            ErrorKind::IllegalState => "illegal-state",
            ErrorKind::NotFound => "not-found",
            ErrorKind::KeyViolation => "key-violation",
            ErrorKind::DataConstraintViolation => "data-constraint-violation",
            ErrorKind::OperationTimeout => "operation-timeout",
            ErrorKind::NotEnoughResource => "not-enough-resource",
            ErrorKind::UnsupportedOperation => "unsupported-operation",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Provider => "provider",
        };
        write!(f, "{}", name)
    }
}

impl StorageError {
    /// Returns the error classification.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::IllegalArgument { .. } => ErrorKind::IllegalArgument,
            StorageError::IllegalState { .. } => ErrorKind::IllegalState,
            StorageError::Record(RecordError::NotFound { .. }) => ErrorKind::NotFound,
            StorageError::Record(RecordError::KeyViolation { .. }) => ErrorKind::KeyViolation,
            StorageError::Record(RecordError::DataConstraintViolation { .. }) => {
                ErrorKind::DataConstraintViolation
            }
            StorageError::OperationTimeout { .. } => ErrorKind::OperationTimeout,
            StorageError::NotEnoughResource { .. } => ErrorKind::NotEnoughResource,
            StorageError::Unsupported { .. } => ErrorKind::UnsupportedOperation,
            StorageError::Transaction(TransactionError::NotFound { .. }) => ErrorKind::NotFound,
            StorageError::Transaction(_) => ErrorKind::Transaction,
            StorageError::Config(_) => ErrorKind::Configuration,
            StorageError::Provider { .. } => ErrorKind::Provider,
        }
    }

    /// Returns true if this error signals a missing capability.
    pub fn is_unsupported(&self) -> bool {
        self.kind() == ErrorKind::UnsupportedOperation
    }

    /// Creates an [`StorageError::IllegalArgument`].
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        StorageError::IllegalArgument {
            message: message.into(),
        }
    }

    /// Creates an [`StorageError::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        StorageError::IllegalState {
            message: message.into(),
        }
    }

    /// Creates an [`StorageError::Unsupported`].
    pub fn unsupported(backend_name: impl Into<String>, operation: impl Into<String>) -> Self {
        StorageError::Unsupported {
            backend_name: backend_name.into(),
            operation: operation.into(),
        }
    }

    /// Creates a [`StorageError::Provider`] without an underlying cause.
    pub fn provider(backend_name: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::Provider {
            backend_name: backend_name.into(),
            message: message.into(),
            source: None,
        }
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Provider {
            backend_name: "unknown".to_string(),
            message: format!("serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_display() {
        let err = StorageError::Record(RecordError::NotFound {
            entity_type: "Person".to_string(),
            key: "42".to_string(),
        });
        assert_eq!(err.to_string(), "record not found: Person/42");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_transaction_not_found_is_not_found_kind() {
        let err: StorageError = TransactionError::NotFound {
            id: "t1".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: StorageError = TransactionError::AlreadyResolved {
            id: "t1".to_string(),
            outcome: "committed".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Transaction);
        assert!(err.to_string().contains("already resolved"));
    }

    #[test]
    fn test_timeout_display() {
        let err = StorageError::OperationTimeout {
            operation: "commit".to_string(),
            timeout_ms: Some(250),
        };
        assert_eq!(err.to_string(), "operation 'commit' timed out after 250ms");

        let err = StorageError::OperationTimeout {
            operation: "fetch".to_string(),
            timeout_ms: None,
        };
        assert_eq!(err.to_string(), "operation 'fetch' timed out");
    }

    #[test]
    fn test_unsupported_is_detectable() {
        let err = StorageError::unsupported("memory", "native-query");
        assert!(err.is_unsupported());
        assert!(!StorageError::illegal_state("closed").is_unsupported());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::SettingsConflict {
            level: 1,
            first: "local".to_string(),
            second: "remote".to_string(),
        };
        assert!(err.to_string().contains("level 1"));
        let err: StorageError = err.into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::KeyViolation.to_string(), "key-violation");
        assert_eq!(
            ErrorKind::UnsupportedOperation.to_string(),
            "unsupported-operation"
        );
    }
}
