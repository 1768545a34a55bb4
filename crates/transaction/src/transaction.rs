//! The transaction state machine (`spec.md` §3, §4.6, "State machine
//! (transaction)").

use std::{
    cell::RefCell,
    cmp::Ordering,
    rc::Rc,
};

use futures::future::LocalBoxFuture;
use value::Key;

use crate::{
    collection_registry::CollectionId,
    deferred::Deferred,
    pending_mutation::PendingMutation,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Persisting,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Failed)
    }
}

/// The argument passed to a transaction's `mutation_fn`.
pub struct MutationContext<T> {
    pub transaction_id: u64,
    pub mutations: Vec<PendingMutation<T>>,
}

/// `async ({transaction}) -> any` from `spec.md` §3/§6, realized as a
/// single-shot boxed closure. `Local` because the engine's concurrency model
/// is single-threaded cooperative (`spec.md` §5); the mutation callback and
/// the futures it drives never need to cross a thread.
pub type MutationFn<T> =
    Box<dyn FnOnce(MutationContext<T>) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

pub struct TransactionConfig<T> {
    pub auto_commit: bool,
    /// Supplemented from the original implementation: a diagnostic label
    /// surfaced in `tracing` spans, not otherwise interpreted.
    pub label: Option<String>,
    pub mutation_fn: Option<MutationFn<T>>,
}

impl<T> Default for TransactionConfig<T> {
    fn default() -> Self {
        Self {
            auto_commit: true,
            label: None,
            mutation_fn: None,
        }
    }
}

pub struct Transaction<T> {
    pub id: u64,
    pub created_at: i64,
    pub sequence_number: u64,
    pub label: Option<String>,
    pub(crate) state: TransactionState,
    /// At most one entry per key; insertion order of first occurrence.
    pub(crate) mutations: Vec<PendingMutation<T>>,
    pub(crate) auto_commit: bool,
    pub(crate) mutation_fn: Option<MutationFn<T>>,
    pub is_persisted: Deferred<()>,
    pub error: Option<Rc<anyhow::Error>>,
}

impl<T> Transaction<T> {
    pub fn new(
        id: u64,
        sequence_number: u64,
        created_at: i64,
        config: TransactionConfig<T>,
    ) -> Self {
        Self {
            id,
            created_at,
            sequence_number,
            label: config.label,
            state: TransactionState::Pending,
            mutations: Vec::new(),
            auto_commit: config.auto_commit,
            mutation_fn: config.mutation_fn,
            is_persisted: Deferred::new(),
            error: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn mutations(&self) -> &[PendingMutation<T>] {
        &self.mutations
    }

    /// Keys this transaction has staged a mutation for, used by the rollback
    /// cascade to find conflicting transactions.
    pub fn mutated_keys(&self) -> impl Iterator<Item = &Key> {
        self.mutations.iter().map(|m| &m.key)
    }

    pub fn collections_touched(&self) -> impl Iterator<Item = CollectionId> + '_ {
        self.mutations.iter().map(|m| m.collection)
    }

    /// `createdAt` descending, tiebreak by monotonic `sequenceNumber`
    /// (`spec.md` §4.6).
    pub fn compare_created_at(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.sequence_number.cmp(&other.sequence_number))
    }

    /// Replaces the existing mutation with the same key if present (keeping
    /// its position), else appends (`spec.md` §4.6 `applyMutations`).
    pub(crate) fn apply_mutations(&mut self, incoming: Vec<PendingMutation<T>>) {
        for mutation in incoming {
            if let Some(existing) = self.mutations.iter_mut().find(|m| m.key == mutation.key) {
                *existing = mutation;
            } else {
                self.mutations.push(mutation);
            }
        }
    }
}

/// A shared handle to a transaction. Cloning is cheap (`Rc` clone); all
/// clones observe the same state, matching the spec's single-threaded
/// cooperative model where a `Transaction` is effectively process-wide
/// shared state rather than owned data.
pub struct TransactionHandle<T>(pub(crate) Rc<RefCell<Transaction<T>>>);

impl<T> Clone for TransactionHandle<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> TransactionHandle<T> {
    pub fn id(&self) -> u64 {
        self.0.borrow().id
    }

    pub fn state(&self) -> TransactionState {
        self.0.borrow().state
    }

    pub fn is_persisted(&self) -> Deferred<()> {
        self.0.borrow().is_persisted.clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Transaction<T>) -> R) -> R {
        f(&self.0.borrow())
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut Transaction<T>) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
