//! The transaction manager (`spec.md` §4.6): lifecycle, the active-transaction
//! stack, and cross-transaction rollback cascades.
//!
//! Per `SPEC_FULL.md` §5, the "module-level singletons" the spec describes
//! (`registry`, `activeStack`) are realized as fields of a value the
//! embedder constructs explicitly and threads through `Collection::new`,
//! rather than process globals — tests get a fresh, isolated manager for
//! free instead of needing a teardown hook.

use std::{
    cell::RefCell,
    collections::BTreeSet,
    rc::Rc,
};

use value::Key;

use crate::{
    collection_registry::CollectionRegistry,
    transaction::{
        Transaction,
        TransactionConfig,
        TransactionHandle,
        TransactionState,
    },
};

fn state_name(state: TransactionState) -> &'static str {
    match state {
        TransactionState::Pending => "pending",
        TransactionState::Persisting => "persisting",
        TransactionState::Completed => "completed",
        TransactionState::Failed => "failed",
    }
}

/// The result of [`TransactionManager::mutate`]: the callback's return value,
/// plus whether the transaction's `auto_commit` means the caller must now
/// drive [`TransactionManager::commit`] to completion.
pub struct MutateOutcome<R> {
    pub result: R,
    pub should_commit: bool,
}

pub struct TransactionManager<T> {
    next_id: RefCell<u64>,
    next_sequence: RefCell<u64>,
    now: Box<dyn Fn() -> i64>,
    /// Non-terminal transactions only, per the spec's invariant that a
    /// terminal transaction is removed from the registry.
    registry: RefCell<Vec<TransactionHandle<T>>>,
    active_stack: RefCell<Vec<TransactionHandle<T>>>,
    collections: Rc<CollectionRegistry>,
}

impl<T> TransactionManager<T> {
    pub fn new(collections: Rc<CollectionRegistry>) -> Self {
        Self::with_clock(collections, || {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0)
        })
    }

    pub fn with_clock(collections: Rc<CollectionRegistry>, now: impl Fn() -> i64 + 'static) -> Self {
        Self {
            next_id: RefCell::new(0),
            next_sequence: RefCell::new(0),
            now: Box::new(now),
            registry: RefCell::new(Vec::new()),
            active_stack: RefCell::new(Vec::new()),
            collections,
        }
    }

    pub fn create(&self, config: TransactionConfig<T>) -> TransactionHandle<T> {
        let id = {
            let mut next = self.next_id.borrow_mut();
            let id = *next;
            *next += 1;
            id
        };
        let sequence_number = {
            let mut next = self.next_sequence.borrow_mut();
            let seq = *next;
            *next += 1;
            seq
        };
        let created_at = (self.now)();
        let handle = TransactionHandle(Rc::new(RefCell::new(Transaction::new(
            id,
            sequence_number,
            created_at,
            config,
        ))));
        self.registry.borrow_mut().push(handle.clone());
        handle
    }

    pub fn get_active(&self) -> Option<TransactionHandle<T>> {
        self.active_stack.borrow().last().cloned()
    }

    /// Runs `callback` with `tx` pushed onto the active-transaction stack, so
    /// nested `Collection` mutators can discover it via [`Self::get_active`].
    /// The stack is popped even if `callback` panics.
    pub fn mutate<R>(
        &self,
        tx: &TransactionHandle<T>,
        callback: impl FnOnce() -> R,
    ) -> anyhow::Result<MutateOutcome<R>> {
        anyhow::ensure!(
            tx.state() == TransactionState::Pending,
            errors::transaction_not_pending(state_name(tx.state()))
        );
        self.active_stack.borrow_mut().push(tx.clone());
        struct PopGuard<'a, T> {
            stack: &'a RefCell<Vec<TransactionHandle<T>>>,
        }
        impl<T> Drop for PopGuard<'_, T> {
            fn drop(&mut self) {
                self.stack.borrow_mut().pop();
            }
        }
        let _guard = PopGuard {
            stack: &self.active_stack,
        };
        let result = callback();
        drop(_guard);
        let touched: Vec<_> = tx.with(|t| t.collections_touched().collect());
        self.collections.flush_mutation_batch(touched, tx.id());
        let should_commit = tx.with(|t| t.auto_commit);
        Ok(MutateOutcome { result, should_commit })
    }

    pub fn apply_mutations(
        &self,
        tx: &TransactionHandle<T>,
        mutations: Vec<crate::pending_mutation::PendingMutation<T>>,
    ) {
        tx.with_mut(|t| t.apply_mutations(mutations));
    }

    /// Requires `pending`. With no staged mutations, completes immediately;
    /// otherwise awaits the transaction's `mutation_fn` and completes or
    /// rolls back based on its result.
    pub async fn commit(&self, tx: &TransactionHandle<T>) -> anyhow::Result<()>
    where
        T: Clone,
    {
        anyhow::ensure!(
            tx.state() == TransactionState::Pending,
            errors::transaction_not_pending(state_name(tx.state()))
        );
        tx.with_mut(|t| t.state = TransactionState::Persisting);

        let mutation_fn = tx.with_mut(|t| t.mutation_fn.take());
        let has_mutations = tx.with(|t| !t.mutations.is_empty());
        let Some(mutation_fn) = mutation_fn.filter(|_| has_mutations) else {
            self.finish_success(tx);
            return Ok(());
        };

        let mutations = tx.with(|t| t.mutations.clone());
        let id = tx.id();
        let label = tx.with(|t| t.label.clone());
        let span = tracing::debug_span!("transaction_commit", transaction_id = id, label = label.as_deref());
        let context = crate::transaction::MutationContext {
            transaction_id: id,
            mutations,
        };
        match {
            use tracing::Instrument;
            mutation_fn(context).instrument(span).await
        } {
            Ok(()) => {
                self.finish_success(tx);
                Ok(())
            },
            Err(err) => {
                tracing::warn!(transaction_id = id, error = %err, "transaction mutationFn failed");
                tx.with_mut(|t| t.error = Some(Rc::new(anyhow::anyhow!("{err}"))));
                self.rollback(tx, false);
                Err(err)
            },
        }
    }

    fn finish_success(&self, tx: &TransactionHandle<T>) {
        tx.with_mut(|t| t.state = TransactionState::Completed);
        tx.is_persisted().resolve(());
        self.remove_from_registry(tx);
        let touched: Vec<_> = tx.with(|t| t.collections_touched().collect());
        self.collections.touch_all(touched);
    }

    /// Transitions `tx` to `failed` and rejects its `isPersisted`. Unless
    /// `secondary`, cascades to every other pending transaction that mutates
    /// an overlapping key.
    pub fn rollback(&self, tx: &TransactionHandle<T>, secondary: bool) {
        if tx.state().is_terminal() {
            return;
        }
        tx.with_mut(|t| t.state = TransactionState::Failed);
        let error_msg = tx
            .with(|t| t.error.as_ref().map(|e| e.to_string()))
            .unwrap_or_else(|| "transaction rolled back".to_string());
        tx.is_persisted().reject(anyhow::anyhow!(error_msg.clone()));
        self.remove_from_registry(tx);

        if !secondary {
            let mutated_keys: BTreeSet<Key> = tx.with(|t| t.mutated_keys().cloned().collect());
            let cascaded: Vec<TransactionHandle<T>> = self
                .registry
                .borrow()
                .iter()
                .filter(|other| {
                    !other.ptr_eq(tx)
                        && other.state() == TransactionState::Pending
                        && other.with(|o| o.mutated_keys().any(|k| mutated_keys.contains(k)))
                })
                .cloned()
                .collect();
            for other in cascaded {
                other.with_mut(|o| {
                    if o.error.is_none() {
                        o.error = Some(Rc::new(anyhow::anyhow!(error_msg.clone())));
                    }
                });
                self.rollback(&other, true);
            }
        }

        let touched: Vec<_> = tx.with(|t| t.collections_touched().collect());
        self.collections.touch_all(touched);
    }

    fn remove_from_registry(&self, tx: &TransactionHandle<T>) {
        self.registry.borrow_mut().retain(|other| !other.ptr_eq(tx));
    }
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;
    use value::Key;

    use super::*;
    use crate::pending_mutation::{
        MutationType,
        PendingMutation,
    };

    fn mutation(key: &str, collection: crate::collection_registry::CollectionId) -> PendingMutation<i32> {
        PendingMutation {
            mutation_id: 0,
            mutation_type: MutationType::Insert,
            key: Key::from(key),
            original: None,
            modified: Some(1),
            changes: None,
            optimistic: true,
            metadata: None,
            sync_metadata: None,
            created_at: 0,
            updated_at: 0,
            collection,
        }
    }

    fn manager() -> TransactionManager<i32> {
        TransactionManager::with_clock(Rc::new(CollectionRegistry::new()), || 0)
    }

    #[tokio::test]
    async fn commit_with_no_mutations_completes_immediately() {
        let mgr = manager();
        let tx = mgr.create(TransactionConfig::default());
        mgr.commit(&tx).await.unwrap();
        assert_eq!(tx.state(), TransactionState::Completed);
    }

    #[tokio::test]
    async fn failed_mutation_fn_triggers_rollback() {
        let mgr = manager();
        let collection = crate::collection_registry::CollectionRegistry::new().register(
            &(Rc::new(NoopTouch) as Rc<dyn crate::collection_registry::Touchable>),
        );
        let config = TransactionConfig {
            auto_commit: true,
            label: None,
            mutation_fn: Some(Box::new(|_ctx| {
                async { Err(anyhow::anyhow!("boom")) }.boxed_local()
            })),
        };
        let tx = mgr.create(config);
        mgr.apply_mutations(&tx, vec![mutation("k1", collection)]);
        let result = mgr.commit(&tx).await;
        assert!(result.is_err());
        assert_eq!(tx.state(), TransactionState::Failed);
        assert!(tx.is_persisted().wait().await.is_err());
    }

    #[test]
    fn rollback_cascades_to_overlapping_pending_transactions() {
        let mgr = manager();
        let collection = crate::collection_registry::CollectionRegistry::new().register(
            &(Rc::new(NoopTouch) as Rc<dyn crate::collection_registry::Touchable>),
        );
        let t1 = mgr.create(TransactionConfig::default());
        let t2 = mgr.create(TransactionConfig::default());
        mgr.apply_mutations(&t1, vec![mutation("shared", collection)]);
        mgr.apply_mutations(&t2, vec![mutation("shared", collection)]);
        mgr.rollback(&t1, false);
        assert_eq!(t1.state(), TransactionState::Failed);
        assert_eq!(t2.state(), TransactionState::Failed);
    }

    struct NoopTouch;
    impl crate::collection_registry::Touchable for NoopTouch {
        fn touch(&self) {}
    }
}
