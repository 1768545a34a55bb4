//! The optimistic action wrapper (`spec.md` §4.7): turns a
//! `{mutation_fn, on_mutate}` pair into a `(variables) -> Transaction`
//! function.

use std::rc::Rc;

use futures::{
    future::LocalBoxFuture,
    FutureExt,
};

use crate::{
    manager::TransactionManager,
    transaction::{
        MutationContext,
        TransactionConfig,
        TransactionHandle,
    },
};

pub struct OptimisticActionConfig<V, T> {
    pub auto_commit: bool,
    pub label: Option<String>,
    /// Invoked synchronously inside `mutate`'s callback; the convention is
    /// that this closure calls `Collection` mutators, which wire themselves
    /// to the active transaction via `TransactionManager::get_active`.
    pub on_mutate: Rc<dyn Fn(&V)>,
    pub mutation_fn: Rc<dyn Fn(V, MutationContext<T>) -> LocalBoxFuture<'static, anyhow::Result<()>>>,
}

/// Builds the `(variables) -> Transaction` function described by `config`.
/// The returned future resolves once `on_mutate` has run and, if
/// `auto_commit`, once `commit` has completed or failed — mirroring the
/// spec's synchronous `mutate` followed by an implicit `commit()` trigger.
pub fn optimistic_action<V, T>(
    manager: Rc<TransactionManager<T>>,
    config: OptimisticActionConfig<V, T>,
) -> impl Fn(V) -> LocalBoxFuture<'static, anyhow::Result<TransactionHandle<T>>>
where
    V: Clone + 'static,
    T: Clone + 'static,
{
    move |variables: V| {
        let manager = manager.clone();
        let mutation_fn = config.mutation_fn.clone();
        let on_mutate = config.on_mutate.clone();
        let auto_commit = config.auto_commit;
        let label = config.label.clone();

        async move {
            let variables_for_mutation = variables.clone();
            let tx_config = TransactionConfig {
                auto_commit,
                label,
                mutation_fn: Some(Box::new(move |ctx: MutationContext<T>| {
                    mutation_fn(variables_for_mutation, ctx)
                })),
            };
            let tx = manager.create(tx_config);
            let outcome = manager.mutate(&tx, || on_mutate(&variables))?;
            if outcome.should_commit {
                // `commit`'s own error is already reflected in `tx`'s state
                // and `is_persisted`; the caller inspects those rather than
                // this call's `Result`.
                let _ = manager.commit(&tx).await;
            }
            Ok(tx)
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{
        collection_registry::CollectionRegistry,
        transaction::TransactionState,
    };

    #[tokio::test]
    async fn on_mutate_runs_before_commit_and_transaction_completes() {
        let manager = Rc::new(TransactionManager::<i32>::with_clock(
            Rc::new(CollectionRegistry::new()),
            || 0,
        ));
        let observed: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
        let observed_for_mutate = observed.clone();
        let action = optimistic_action(
            manager,
            OptimisticActionConfig {
                auto_commit: true,
                label: Some("increment".to_string()),
                on_mutate: Rc::new(move |v: &i32| observed_for_mutate.borrow_mut().push(*v)),
                mutation_fn: Rc::new(|_v, _ctx| async { Ok(()) }.boxed_local()),
            },
        );
        let tx = action(42).await.unwrap();
        assert_eq!(*observed.borrow(), vec![42]);
        assert_eq!(tx.state(), TransactionState::Completed);
    }
}
