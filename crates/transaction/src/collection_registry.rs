//! Generalizes the spec's single `touchCollection()` callback to a registry
//! so a transaction spanning mutations against more than one collection
//! notifies every distinct collection it touched (`SPEC_FULL.md` §4.11).

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{
        Rc,
        Weak,
    },
};

/// Implemented by `collection::Collection` so it can be registered here
/// without this crate depending on the `collection` crate.
pub trait Touchable {
    /// Called after any transaction's state transitions to a terminal
    /// state. Implementations should retry committing deferred sync
    /// batches.
    fn touch(&self);

    /// Called once a `mutate` callback returns, for every collection it
    /// touched, so changes staged during the callback are observed as one
    /// atomic batch rather than one notification per mutator call.
    fn flush_mutation_batch(&self, _transaction_id: u64) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionId(u64);

#[derive(Default)]
pub struct CollectionRegistry {
    next_id: RefCell<u64>,
    collections: RefCell<HashMap<CollectionId, Weak<dyn Touchable>>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, collection: &Rc<dyn Touchable>) -> CollectionId {
        let mut next_id = self.next_id.borrow_mut();
        let id = CollectionId(*next_id);
        *next_id += 1;
        self.collections.borrow_mut().insert(id, Rc::downgrade(collection));
        id
    }

    pub fn touch(&self, id: CollectionId) {
        if let Some(collection) = self.collections.borrow().get(&id).and_then(Weak::upgrade) {
            collection.touch();
        }
    }

    pub fn touch_all(&self, ids: impl IntoIterator<Item = CollectionId>) {
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            if seen.insert(id) {
                self.touch(id);
            }
        }
    }

    pub fn flush_mutation_batch(&self, ids: impl IntoIterator<Item = CollectionId>, transaction_id: u64) {
        let mut seen = std::collections::HashSet::new();
        for id in ids {
            if seen.insert(id) {
                if let Some(collection) = self.collections.borrow().get(&id).and_then(Weak::upgrade) {
                    collection.flush_mutation_batch(transaction_id);
                }
            }
        }
    }
}
