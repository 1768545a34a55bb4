//! The schema validation hook (`spec.md` §4.1 Non-goals: "a full schema
//! language is out of scope"). `Collection` only needs something it can call
//! before accepting an insert/update; what validates is the embedder's
//! business.

use errors::ValidationIssue;

/// Validates a candidate record before it's staged as a mutation. `Ok`
/// returns the (possibly normalized) value to store; `Err` lists every
/// issue found so the caller can report them all at once, matching the
/// teacher's `SchemaValidationError` shape.
pub trait Schema<T> {
    fn validate(&self, value: T) -> Result<T, Vec<ValidationIssue>>;
}

/// A `Schema` that accepts everything unchanged, for collections that don't
/// configure one.
pub struct NoopSchema;

impl<T> Schema<T> for NoopSchema {
    fn validate(&self, value: T) -> Result<T, Vec<ValidationIssue>> {
        Ok(value)
    }
}
