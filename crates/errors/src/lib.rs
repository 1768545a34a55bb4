//! The named error taxonomy for the optimistic collection engine.
//!
//! Every user-facing failure is represented as an [`ErrorMetadata`] value
//! attached to an error chain, following the convention that a `short_msg`
//! is a stable, ScreamingCamelCase tag suitable for test assertions and a
//! `msg` is the developer-facing description. Call sites should prefer the
//! named constructors below over building an [`ErrorMetadata`] by hand so the
//! taxonomy in one place matches the taxonomy callers match against.

use std::borrow::Cow;

/// A structured error tag that can be attached to an `anyhow::Error` chain
/// via `.context(metadata)`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{msg}")]
pub struct ErrorMetadata {
    pub code: ErrorCode,
    /// Stable ScreamingCamelCase tag, e.g. `DuplicateKeyError`.
    pub short_msg: Cow<'static, str>,
    /// Human-readable, developer-facing description.
    pub msg: Cow<'static, str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The caller did something the API doesn't allow (bad arguments, wrong
    /// lifecycle state, missing configuration).
    BadRequest,
    /// A mutation couldn't be validated against the collection's schema.
    ValidationFailed,
    /// The engine was torn down while the error's subject was still pending.
    Canceled,
}

impl ErrorMetadata {
    pub fn bad_request(
        short_msg: impl Into<Cow<'static, str>>,
        msg: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            short_msg: short_msg.into(),
            msg: msg.into(),
        }
    }

    pub fn validation_failed(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::ValidationFailed,
            short_msg: Cow::Borrowed("SchemaValidationError"),
            msg: msg.into(),
        }
    }

    pub fn canceled(msg: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code: ErrorCode::Canceled,
            short_msg: Cow::Borrowed("CollectionDisposedError"),
            msg: msg.into(),
        }
    }

    /// True if `err`'s chain carries an [`ErrorMetadata`] with this
    /// `short_msg`. Intended for tests: `assert!(is_named(&err, "DuplicateKeyError"))`.
    pub fn is_named(err: &anyhow::Error, short_msg: &str) -> bool {
        err.chain()
            .filter_map(|cause| cause.downcast_ref::<ErrorMetadata>())
            .any(|m| m.short_msg == short_msg)
    }
}

pub fn missing_insert_handler() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "MissingInsertHandlerError",
        "insert() was called outside an active transaction and the collection has no onInsert \
         handler configured",
    )
}

pub fn missing_update_handler() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "MissingUpdateHandlerError",
        "update() was called outside an active transaction and the collection has no onUpdate \
         handler configured",
    )
}

pub fn missing_delete_handler() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "MissingDeleteHandlerError",
        "delete() was called outside an active transaction and the collection has no onDelete \
         handler configured",
    )
}

pub fn duplicate_key(key: impl std::fmt::Display) -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "DuplicateKeyError",
        format!("insert() called with key {key} that already exists in the collection"),
    )
}

pub fn key_not_found(key: impl std::fmt::Display) -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "KeyNotFoundError",
        format!("no record exists for key {key}"),
    )
}

pub fn key_update_not_allowed(key: impl std::fmt::Display) -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "KeyUpdateNotAllowedError",
        format!("update() mutator changed the key of record {key}, which is not allowed"),
    )
}

pub fn collection_requires_config(field: &'static str) -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "CollectionRequiresConfigError",
        format!("collection configuration is missing required field `{field}`"),
    )
}

pub fn transaction_not_pending(state: &'static str) -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "TransactionNotPendingError",
        format!("operation requires a pending transaction, but it is {state}"),
    )
}

pub fn nested_mutate_in_sync_write() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "NestedTransactionError",
        "a sync batch write callback may not open or mutate through a transaction",
    )
}

pub fn nan_key() -> ErrorMetadata {
    ErrorMetadata::bad_request(
        "NanKeyError",
        "NaN is not a valid index key",
    )
}

/// A validation issue at a field path, as produced by a `Schema::validate`
/// implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: Vec<String>,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Copy)]
pub enum MutationKind {
    Insert,
    Update,
}

/// `SchemaValidationError{ type, issues }` from the spec's error taxonomy.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("schema validation failed for {kind:?}: {issues:?}")]
pub struct SchemaValidationError {
    pub kind: MutationKind,
    pub issues: Vec<ValidationIssue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_error_is_matched_through_anyhow_chain() {
        let err = anyhow::Error::msg("insert failed").context(duplicate_key(42));
        assert!(ErrorMetadata::is_named(&err, "DuplicateKeyError"));
        assert!(!ErrorMetadata::is_named(&err, "KeyUpdateNotAllowedError"));
    }
}
