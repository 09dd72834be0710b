//! Error assertions.

use std::fmt::Debug;

use helios_storage_spi::error::{ErrorKind, StorageResult};

/// Asserts that an operation failed with the given kind.
///
/// # Panics
///
/// Panics if the operation succeeded or failed with another kind.
#[track_caller]
pub fn assert_kind<T: Debug>(result: StorageResult<T>, expected: ErrorKind) {
    match result {
        Ok(value) => panic!("expected {} error, got Ok({:?})", expected, value),
        Err(e) => assert_eq!(
            e.kind(),
            expected,
            "expected {} error, got {}: {}",
            expected,
            e.kind(),
            e
        ),
    }
}

/// Asserts that an operation failed as unsupported.
#[track_caller]
pub fn assert_unsupported<T: Debug>(result: StorageResult<T>) {
    assert_kind(result, ErrorKind::UnsupportedOperation);
}
