//! End-to-end scenarios exercising the collection, its transaction-backed
//! mutators, sync intake, and filtered subscriptions together.

use std::{
    cell::RefCell,
    rc::Rc,
};

use collection::{
    Collection,
    CollectionConfig,
    SubscribeOptions,
    SyncMutationType,
    SyncSink,
    SyncWrite,
};
use common::ChangeType;
use futures::FutureExt;
use serde::{
    Deserialize,
    Serialize,
};
use transaction::{
    CollectionRegistry,
    TransactionConfig,
    TransactionManager,
    TransactionState,
};
use value::{
    FieldPath,
    Key,
    Value,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct Todo {
    id: i64,
    v: String,
    done: bool,
}

fn todo(id: i64, v: &str) -> Todo {
    Todo {
        id,
        v: v.to_string(),
        done: false,
    }
}

fn new_manager() -> (Rc<CollectionRegistry>, Rc<TransactionManager<Todo>>) {
    let registry = Rc::new(CollectionRegistry::new());
    let manager = Rc::new(TransactionManager::with_clock(registry.clone(), || 0));
    (registry, manager)
}

fn config_with_handlers() -> CollectionConfig<Todo> {
    CollectionConfig {
        get_key: Box::new(|t: &Todo| Key::from(t.id)),
        on_insert: Some(Rc::new(|_mutations| async { Ok(()) }.boxed_local())),
        on_update: Some(Rc::new(|_mutations| async { Ok(()) }.boxed_local())),
        on_delete: Some(Rc::new(|_mutations| async { Ok(()) }.boxed_local())),
        ..Default::default()
    }
}

/// S1: an optimistic insert is visible immediately; once the mutation
/// resolves and sync later confirms the same value, nothing further is
/// emitted.
#[tokio::test]
async fn optimistic_insert_then_sync_confirms() {
    let (registry, manager) = new_manager();
    let collection = Collection::new(config_with_handlers(), manager, &registry);

    let events: Rc<RefCell<Vec<common::ChangeMessage<Todo>>>> = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let _subscription = collection.subscribe_changes(SubscribeOptions::default(), move |changes| {
        events_for_cb.borrow_mut().extend(changes);
    });

    let outcome = collection.insert(todo(1, "a")).unwrap();
    assert_eq!(collection.get(&Key::from(1i64)), Some(todo(1, "a")));
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(events.borrow()[0].change_type, ChangeType::Insert);

    outcome.commit.unwrap().await.unwrap();
    assert_eq!(outcome.transaction.state(), TransactionState::Completed);

    let sink = SyncSink::new(collection.clone());
    sink.begin();
    sink.write(SyncWrite::upsert(Key::from(1i64), SyncMutationType::Insert, todo(1, "a")))
        .unwrap();
    sink.commit();

    assert_eq!(
        events.borrow().len(),
        1,
        "sync confirming the same value emits nothing further"
    );
    assert_eq!(collection.get(&Key::from(1i64)), Some(todo(1, "a")));
}

/// S2: when the mutation function rejects, the optimistic insert rolls back
/// to a compensating delete.
#[tokio::test]
async fn failed_mutation_rolls_back_to_compensating_delete() {
    let (registry, manager) = new_manager();
    let config = CollectionConfig {
        get_key: Box::new(|t: &Todo| Key::from(t.id)),
        on_insert: Some(Rc::new(|_mutations| {
            async { Err(anyhow::anyhow!("server rejected")) }.boxed_local()
        })),
        ..Default::default()
    };
    let collection = Collection::new(config, manager, &registry);

    let events: Rc<RefCell<Vec<common::ChangeMessage<Todo>>>> = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let _subscription = collection.subscribe_changes(SubscribeOptions::default(), move |changes| {
        events_for_cb.borrow_mut().extend(changes);
    });

    let outcome = collection.insert(todo(1, "a")).unwrap();
    assert!(collection.has(&Key::from(1i64)));

    let result = outcome.commit.unwrap().await;
    assert!(result.is_err());
    assert!(
        !collection.has(&Key::from(1i64)),
        "rollback must revert the optimistic insert"
    );

    let types: Vec<_> = events.borrow().iter().map(|c| c.change_type).collect();
    assert_eq!(types, vec![ChangeType::Insert, ChangeType::Delete]);
}

/// S3: a sync batch that overlaps a key claimed by a still-pending
/// transaction is deferred; once the transaction completes and the overlay
/// is relinquished, the deferred batch applies.
#[tokio::test]
async fn sync_batch_is_deferred_while_an_overlapping_transaction_is_pending() {
    let (registry, manager) = new_manager();
    let collection = Collection::new(
        CollectionConfig {
            get_key: Box::new(|t: &Todo| Key::from(t.id)),
            ..Default::default()
        },
        manager.clone(),
        &registry,
    );

    let sink = SyncSink::new(collection.clone());
    sink.begin();
    sink.write(SyncWrite::upsert(Key::from(1i64), SyncMutationType::Insert, todo(1, "a")))
        .unwrap();
    sink.commit();

    let (resolve_tx, resolve_rx) = futures::channel::oneshot::channel::<()>();
    let tx = manager.create(TransactionConfig {
        auto_commit: true,
        label: None,
        mutation_fn: Some(Box::new(move |_ctx| {
            async move {
                resolve_rx.await.ok();
                Ok(())
            }
            .boxed_local()
        })),
    });
    manager
        .mutate(&tx, || {
            collection.update(Key::from(1i64), |t| t.v = "b".to_string()).unwrap();
        })
        .unwrap();
    assert_eq!(collection.get(&Key::from(1i64)).unwrap().v, "b");

    sink.begin();
    sink.write(SyncWrite::upsert(Key::from(1i64), SyncMutationType::Update, todo(1, "c")))
        .unwrap();
    sink.commit();
    assert_eq!(
        collection.get(&Key::from(1i64)).unwrap().v,
        "b",
        "the sync batch is deferred while tx is pending, so the optimistic overlay still wins"
    );

    resolve_tx.send(()).unwrap();
    manager.commit(&tx).await.unwrap();

    assert_eq!(
        collection.get(&Key::from(1i64)).unwrap().v,
        "c",
        "once the transaction completes the overlay is relinquished and the deferred batch applies"
    );
}

/// S4: two pending transactions mutate the same key; one fails and the
/// rollback cascades to the other, producing a single coalesced reversion.
#[tokio::test]
async fn failing_transaction_cascades_to_overlapping_transaction() {
    let (registry, manager) = new_manager();
    let collection = Collection::new(
        CollectionConfig {
            get_key: Box::new(|t: &Todo| Key::from(t.id)),
            ..Default::default()
        },
        manager.clone(),
        &registry,
    );

    let sink = SyncSink::new(collection.clone());
    sink.begin();
    sink.write(SyncWrite::upsert(Key::from(7i64), SyncMutationType::Insert, todo(7, "base")))
        .unwrap();
    sink.commit();

    let events: Rc<RefCell<Vec<common::ChangeMessage<Todo>>>> = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let _subscription = collection.subscribe_changes(SubscribeOptions::default(), move |changes| {
        events_for_cb.borrow_mut().extend(changes);
    });

    let tx1 = manager.create(TransactionConfig {
        auto_commit: false,
        label: None,
        mutation_fn: Some(Box::new(|_ctx| async { Err(anyhow::anyhow!("boom")) }.boxed_local())),
    });
    let tx2 = manager.create(TransactionConfig::default());

    manager
        .mutate(&tx1, || {
            collection
                .update(Key::from(7i64), |t| t.v = "from-tx1".to_string())
                .unwrap();
        })
        .unwrap();
    manager
        .mutate(&tx2, || {
            collection
                .update(Key::from(7i64), |t| t.v = "from-tx2".to_string())
                .unwrap();
        })
        .unwrap();
    events.borrow_mut().clear();

    let result = manager.commit(&tx1).await;
    assert!(result.is_err());
    assert_eq!(tx1.state(), TransactionState::Failed);
    assert_eq!(tx2.state(), TransactionState::Failed);
    assert_eq!(collection.get(&Key::from(7i64)).unwrap().v, "base");
    assert_eq!(
        events.borrow().len(),
        1,
        "a single coalesced reversion, not one per cascaded transaction"
    );
}

/// S5: a filtered subscription sees a record cross into/out of its `where`
/// clause as a synthetic insert/delete rather than a plain update.
#[tokio::test]
async fn filtered_subscription_emits_enter_and_leave_transitions() {
    let (registry, manager) = new_manager();
    let collection = Collection::new(config_with_handlers(), manager, &registry);
    collection
        .insert(todo(1, "a"))
        .unwrap()
        .commit
        .unwrap()
        .await
        .unwrap();

    let events: Rc<RefCell<Vec<common::ChangeMessage<Todo>>>> = Rc::new(RefCell::new(Vec::new()));
    let events_for_cb = events.clone();
    let filter = query::Expr::eq(query::Expr::field("done"), query::Expr::val(Value::Bool(true)));
    let _subscription = collection.subscribe_changes(
        SubscribeOptions {
            include_initial_state: true,
            filter: Some(filter),
        },
        move |changes| events_for_cb.borrow_mut().extend(changes),
    );
    assert!(
        events.borrow().is_empty(),
        "the record doesn't match the filter yet, so no initial emission"
    );

    let outcome = collection.update(Key::from(1i64), |t| t.done = true).unwrap();
    outcome.commit.unwrap().await.unwrap();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(
        events.borrow()[0].change_type,
        ChangeType::Insert,
        "crossing into the filter reads as an insert"
    );
    events.borrow_mut().clear();

    let outcome = collection.update(Key::from(1i64), |t| t.done = false).unwrap();
    outcome.commit.unwrap().await.unwrap();
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(
        events.borrow()[0].change_type,
        ChangeType::Delete,
        "leaving the filter reads as a delete"
    );
}

/// S6: a compound range filter (two inequalities on the same field) is
/// satisfied through a single registered index rather than a full scan,
/// and still returns exactly the matching keys.
#[tokio::test]
async fn compound_range_query_uses_the_registered_index() {
    let (registry, manager) = new_manager();
    let collection = Collection::new(
        CollectionConfig {
            get_key: Box::new(|t: &Todo| Key::from(t.id)),
            ..Default::default()
        },
        manager,
        &registry,
    );
    let path = FieldPath::new(vec!["id".to_string()]).unwrap();
    collection.with_index(Box::new(indexing::FieldIndex::<Todo>::new("by_id", path)));

    let sink = SyncSink::new(collection.clone());
    sink.begin();
    for id in 0..10 {
        sink.write(SyncWrite::upsert(
            Key::from(id),
            SyncMutationType::Insert,
            todo(id, "row"),
        ))
        .unwrap();
    }
    sink.commit();

    let expr = query::Expr::and(vec![
        query::Expr::gt(query::Expr::field("id"), query::Expr::val(Value::number(2.0))),
        query::Expr::lt(query::Expr::field("id"), query::Expr::val(Value::number(6.0))),
    ]);
    let mut matching: Vec<i64> = collection
        .query_keys(&expr)
        .into_iter()
        .map(|k| k.as_int().unwrap())
        .collect();
    matching.sort_unstable();
    assert_eq!(matching, vec![3, 4, 5]);
}
