//! A single staged write, as described in `spec.md` §3.

use common::Metadata;
use value::Key;

use crate::collection_registry::CollectionId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationType {
    Insert,
    Update,
    Delete,
}

/// One record's staged change within a [`crate::Transaction`].
///
/// `original`/`modified` use `Option` to realize the spec's `T | {}` /
/// `T | {_deleted:true}` union: `original` is `None` for an insert,
/// `modified` is `None` for a delete.
#[derive(Clone, Debug)]
pub struct PendingMutation<T> {
    pub mutation_id: u64,
    pub mutation_type: MutationType,
    pub key: Key,
    pub original: Option<T>,
    pub modified: Option<T>,
    /// The diff between `original` and `modified`, as a JSON merge-patch
    /// shaped object. `None` for inserts and deletes, which carry a whole
    /// value rather than a partial one.
    pub changes: Option<serde_json::Value>,
    pub optimistic: bool,
    pub metadata: Option<Metadata>,
    pub sync_metadata: Option<Metadata>,
    pub created_at: i64,
    pub updated_at: i64,
    pub collection: CollectionId,
}
