//! The collection (`spec.md` §4.8, component C8): a synced baseline plus an
//! optimistic overlay that compose into one derived view, with mutators
//! that write the overlay synchronously and hand the durable half of the
//! work to a [`transaction::TransactionManager`].
//!
//! Grounded on the teacher's `database::Database`/`database::Transaction`
//! split between an in-memory working set and the durable write path, scaled
//! down to a single in-memory collection with no storage engine underneath.

use std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::{
        BTreeSet,
        HashMap,
        HashSet,
        VecDeque,
    },
    ops::Bound,
    rc::Rc,
};

use common::ChangeMessage;
use errors::MutationKind;
use futures::{
    future::LocalBoxFuture,
    FutureExt,
};
use indexing::{
    Index,
    IndexSet,
};
use serde::Serialize;
use transaction::{
    CollectionId,
    CollectionRegistry,
    Deferred,
    MutationContext,
    MutationType,
    PendingMutation,
    Touchable,
    TransactionConfig,
    TransactionHandle,
    TransactionManager,
};
use value::{
    FieldPath,
    Key,
    Value,
};

use crate::{
    pending::{
        apply_index_change,
        derive_change,
        diff_changes,
        now_ms,
    },
    schema::Schema,
    subscription::{
        filter_changes,
        record_matches,
        SubscribeOptions,
        Subscriber,
        Subscription,
    },
    sync::{
        SyncBatch,
        SyncMutationType,
        SyncSink,
        SyncSource,
        SyncWrite,
    },
};

pub type MutationHandler<T> = Rc<dyn Fn(Vec<PendingMutation<T>>) -> LocalBoxFuture<'static, anyhow::Result<()>>>;

/// Configuration accepted by [`Collection::new`]. `on_insert`/`on_update`/
/// `on_delete` are required only for mutators called with no active
/// transaction (`spec.md` §4.8's "synthesize a transaction" path); a
/// collection used exclusively inside explicit `mutate` blocks can leave
/// them unset.
pub struct CollectionConfig<T> {
    pub get_key: Box<dyn Fn(&T) -> Key>,
    pub schema: Option<Rc<dyn Schema<T>>>,
    pub on_insert: Option<MutationHandler<T>>,
    pub on_update: Option<MutationHandler<T>>,
    pub on_delete: Option<MutationHandler<T>>,
    pub sync_source: Option<Rc<dyn SyncSource<T>>>,
}

impl<T> Default for CollectionConfig<T> {
    fn default() -> Self {
        Self {
            get_key: Box::new(|_| panic!("CollectionConfig::get_key must be set")),
            schema: None,
            on_insert: None,
            on_update: None,
            on_delete: None,
            sync_source: None,
        }
    }
}

/// Per-mutation options accepted by `insert`/`update`/`delete` (`spec.md`
/// §4.8). `optimistic: false` still stages the mutation on the active
/// transaction, but skips writing it into the optimistic overlay — the
/// derived view won't reflect it until the real sync commit lands.
#[derive(Clone, Copy, Debug)]
pub struct MutateOpts {
    pub optimistic: bool,
}

impl Default for MutateOpts {
    fn default() -> Self {
        Self { optimistic: true }
    }
}

/// Returned by `insert`/`update`/`delete`. `commit` is `Some` only when the
/// call synthesized its own auto-commit transaction (no active transaction
/// was found); the caller is expected to drive it, e.g. via `.await`, or to
/// track completion through `transaction.is_persisted()` instead.
pub struct MutationOutcome<T> {
    pub transaction: TransactionHandle<T>,
    pub commit: Option<LocalBoxFuture<'static, anyhow::Result<()>>>,
}

pub(crate) struct CollectionState<T> {
    synced: HashMap<Key, T>,
    synced_metadata: HashMap<Key, common::Metadata>,
    optimistic_upserts: HashMap<Key, T>,
    optimistic_deletes: HashSet<Key>,
    /// Last writer per key among non-terminal (or not-yet-reconciled)
    /// transactions; used both to decide whether a sync batch must be
    /// deferred and to know which overlay entries to drop once a
    /// transaction reaches a terminal state.
    overlay_owner: HashMap<Key, TransactionHandle<T>>,
    indexes: IndexSet<T>,
    building_sync_batch: Option<SyncBatch<T>>,
    pending_sync_batches: VecDeque<SyncBatch<T>>,
    /// From `SyncSource::sync_metadata`, merged into a write's
    /// `synced_metadata` whenever the write itself carries none.
    sync_source_metadata: Option<common::Metadata>,
    subscribers: Vec<Rc<Subscriber<T>>>,
    next_subscriber_id: u64,
    next_mutation_id: u64,
    /// Changes staged while a transaction's `mutate` callback is still
    /// running, keyed by transaction id. Flushed as one `emit` once the
    /// callback returns, so mutations within one transaction are observed
    /// atomically (`spec.md` §4.6's ordering guarantee) instead of one
    /// notification per mutator call.
    pending_emission: HashMap<u64, Vec<ChangeMessage<T>>>,
}

impl<T> CollectionState<T> {
    fn new() -> Self {
        Self {
            synced: HashMap::new(),
            synced_metadata: HashMap::new(),
            optimistic_upserts: HashMap::new(),
            optimistic_deletes: HashSet::new(),
            overlay_owner: HashMap::new(),
            indexes: IndexSet::new(),
            building_sync_batch: None,
            pending_sync_batches: VecDeque::new(),
            sync_source_metadata: None,
            subscribers: Vec::new(),
            next_subscriber_id: 0,
            next_mutation_id: 0,
            pending_emission: HashMap::new(),
        }
    }

    /// The derived view (`spec.md` §4.8): optimistic deletes win over
    /// everything, then the optimistic upsert, then the synced baseline.
    fn derived_get(&self, key: &Key) -> Option<T>
    where
        T: Clone,
    {
        if self.optimistic_deletes.contains(key) {
            return None;
        }
        if let Some(value) = self.optimistic_upserts.get(key) {
            return Some(value.clone());
        }
        self.synced.get(key).cloned()
    }

    fn all_keys(&self) -> Vec<Key> {
        let mut keys: BTreeSet<Key> = self.synced.keys().cloned().collect();
        keys.extend(self.optimistic_upserts.keys().cloned());
        keys.into_iter()
            .filter(|k| !self.optimistic_deletes.contains(k))
            .collect()
    }
}

pub struct Collection<T> {
    get_key: Box<dyn Fn(&T) -> Key>,
    schema: Option<Rc<dyn Schema<T>>>,
    on_insert: Option<MutationHandler<T>>,
    on_update: Option<MutationHandler<T>>,
    on_delete: Option<MutationHandler<T>>,
    sync_source: Option<Rc<dyn SyncSource<T>>>,
    manager: Rc<TransactionManager<T>>,
    collection_id: Cell<Option<CollectionId>>,
    ready: Deferred<()>,
    state: RefCell<CollectionState<T>>,
}

impl<T: Clone + Serialize + 'static> Collection<T> {
    pub fn new(
        config: CollectionConfig<T>,
        manager: Rc<TransactionManager<T>>,
        collections: &Rc<CollectionRegistry>,
    ) -> Rc<Self> {
        let collection = Rc::new(Self {
            get_key: config.get_key,
            schema: config.schema,
            on_insert: config.on_insert,
            on_update: config.on_update,
            on_delete: config.on_delete,
            sync_source: config.sync_source,
            manager,
            collection_id: Cell::new(None),
            ready: Deferred::new(),
            state: RefCell::new(CollectionState::new()),
        });
        let touchable: Rc<dyn Touchable> = collection.clone();
        let id = collections.register(&touchable);
        collection.collection_id.set(Some(id));
        collection
    }

    pub fn with_index(&self, index: Box<dyn Index<T>>) -> &Self {
        self.state.borrow_mut().indexes.register(index);
        self
    }

    /// Registers a range-capable index over `path`, sized by
    /// [`crate::knobs::DEFAULT_BTREE_FANOUT`] rather than the library
    /// default, so a deployment can tune it without a recompile.
    pub fn with_field_index(&self, name: impl Into<String>, path: value::FieldPath) -> &Self {
        let index = indexing::FieldIndex::with_branching_factor(name, path, *crate::knobs::DEFAULT_BTREE_FANOUT);
        self.with_index(Box::new(index))
    }

    fn collection_id(&self) -> CollectionId {
        self.collection_id
            .get()
            .expect("collection_id is set by Collection::new before any other method can run")
    }

    pub fn get(&self, key: &Key) -> Option<T> {
        self.state.borrow().derived_get(key)
    }

    pub fn has(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.state.borrow().all_keys()
    }

    /// Evaluates `expr` against the derived view, using the registered
    /// indexes to narrow candidates when the evaluator can satisfy it
    /// without a full scan (`spec.md` §4.4), then always post-filtering
    /// with an exact per-record check since an AND with unoptimized
    /// children yields a conservative superset.
    pub fn query_keys(&self, expr: &query::Expr) -> Vec<Key> {
        let state = self.state.borrow();
        let optimization = query::evaluate(expr, &state.indexes);
        let candidates: Vec<Key> = if optimization.can_optimize {
            optimization.matching_keys.into_iter().collect()
        } else {
            state.all_keys()
        };
        candidates
            .into_iter()
            .filter(|key| {
                state
                    .derived_get(key)
                    .and_then(|value| serde_json::to_value(&value).ok())
                    .is_some_and(|json| query::matches(expr, &json))
            })
            .collect()
    }

    /// A page of keys ordered by an indexed field, starting at `cursor` and
    /// capped at `limit` — the "ordered subscription" read primitive backed
    /// by that index's `SortedMap` scan. `None` if no index is registered
    /// over `path`.
    pub fn ordered_keys(&self, path: &FieldPath, cursor: Bound<&Value>, reverse: bool, limit: usize) -> Option<Vec<Key>> {
        self.state.borrow_mut().indexes.ordered_keys(path, cursor, reverse, limit)
    }

    /// Resolves once [`crate::sync::SyncSink::mark_ready`] has been called,
    /// i.e. the initial backfill from the sync source has landed.
    pub fn ready(&self) -> Deferred<()> {
        self.ready.clone()
    }

    /// Suspends until the collection is ready, then returns every key's
    /// current derived value (`spec.md` §3: "queries on an unready
    /// collection may suspend via `stateWhenReady()`").
    pub fn state_when_ready(self: &Rc<Self>) -> LocalBoxFuture<'static, anyhow::Result<Vec<(Key, T)>>> {
        let collection = self.clone();
        async move {
            collection
                .ready()
                .wait()
                .await
                .map_err(|err| anyhow::anyhow!("{err}"))?;
            let state = collection.state.borrow();
            Ok(state
                .all_keys()
                .into_iter()
                .filter_map(|key| {
                    let value = state.derived_get(&key)?;
                    Some((key, value))
                })
                .collect())
        }
        .boxed_local()
    }

    /// Drives this collection's `SyncSource` to completion. The embedder is
    /// expected to spawn/await the returned future for the collection's
    /// lifetime; per the single-threaded cooperative model, its only
    /// suspension points are awaits inside the sync source itself.
    pub fn start_sync(self: &Rc<Self>) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        let Some(source) = self.sync_source.clone() else {
            return futures::future::ready(Ok(())).boxed_local();
        };
        self.state.borrow_mut().sync_source_metadata = source.sync_metadata();
        let sink = SyncSink {
            collection: self.clone(),
        };
        source.sync(sink)
    }

    fn validate(&self, value: T, kind: MutationKind) -> anyhow::Result<T> {
        match &self.schema {
            None => Ok(value),
            Some(schema) => schema.validate(value).map_err(|issues| {
                anyhow::Error::new(errors::SchemaValidationError { kind, issues })
            }),
        }
    }

    pub fn insert(&self, value: T) -> anyhow::Result<MutationOutcome<T>> {
        self.insert_many(vec![value], MutateOpts::default())
    }

    /// Batch form of [`Self::insert`] (`spec.md` §4.8's `insert(value[],
    /// opts?)`): every resulting mutation is staged on one transaction and,
    /// when optimistic, observed as a single atomic overlay update.
    pub fn insert_many(&self, values: Vec<T>, opts: MutateOpts) -> anyhow::Result<MutationOutcome<T>> {
        let mut mutations = Vec::with_capacity(values.len());
        let mut overlays = Vec::with_capacity(values.len());
        for value in values {
            let value = self.validate(value, MutationKind::Insert)?;
            let key = (self.get_key)(&value);
            anyhow::ensure!(!self.has(&key), errors::duplicate_key(&key));
            mutations.push(self.new_mutation(MutationType::Insert, key, None, Some(value.clone()), opts));
            overlays.push(Some(value));
        }
        self.stage(mutations, overlays, &self.on_insert, errors::missing_insert_handler())
    }

    pub fn update(&self, key: Key, mutator: impl Fn(&mut T)) -> anyhow::Result<MutationOutcome<T>> {
        self.update_many(vec![key], MutateOpts::default(), mutator)
    }

    /// Batch form of [`Self::update`] (`spec.md` §4.8's `update(keyOrKeys,
    /// opts?, mutator)`): `mutator` runs once per key, and every resulting
    /// mutation is staged on one transaction.
    pub fn update_many(
        &self,
        keys: Vec<Key>,
        opts: MutateOpts,
        mutator: impl Fn(&mut T),
    ) -> anyhow::Result<MutationOutcome<T>> {
        let mut mutations = Vec::with_capacity(keys.len());
        let mut overlays = Vec::with_capacity(keys.len());
        for key in keys {
            let current = self
                .get(&key)
                .ok_or_else(|| anyhow::Error::new(errors::key_not_found(&key)))?;
            let mut modified = current.clone();
            mutator(&mut modified);
            let modified = self.validate(modified, MutationKind::Update)?;
            anyhow::ensure!(
                (self.get_key)(&modified) == key,
                errors::key_update_not_allowed(&key)
            );
            mutations.push(self.new_mutation(
                MutationType::Update,
                key,
                Some(current),
                Some(modified.clone()),
                opts,
            ));
            overlays.push(Some(modified));
        }
        self.stage(mutations, overlays, &self.on_update, errors::missing_update_handler())
    }

    pub fn delete(&self, key: Key) -> anyhow::Result<MutationOutcome<T>> {
        self.delete_many(vec![key], MutateOpts::default())
    }

    /// Batch form of [`Self::delete`] (`spec.md` §4.8's `delete(keyOrKeys,
    /// opts?)`).
    pub fn delete_many(&self, keys: Vec<Key>, opts: MutateOpts) -> anyhow::Result<MutationOutcome<T>> {
        let mut mutations = Vec::with_capacity(keys.len());
        let mut overlays = Vec::with_capacity(keys.len());
        for key in keys {
            let current = self
                .get(&key)
                .ok_or_else(|| anyhow::Error::new(errors::key_not_found(&key)))?;
            mutations.push(self.new_mutation(MutationType::Delete, key, Some(current), None, opts));
            overlays.push(None);
        }
        self.stage(mutations, overlays, &self.on_delete, errors::missing_delete_handler())
    }

    fn new_mutation(
        &self,
        mutation_type: MutationType,
        key: Key,
        original: Option<T>,
        modified: Option<T>,
        opts: MutateOpts,
    ) -> PendingMutation<T> {
        let mut state = self.state.borrow_mut();
        let mutation_id = state.next_mutation_id;
        state.next_mutation_id += 1;
        let now = now_ms();
        let changes = match (&original, &modified) {
            (Some(before), Some(after)) => diff_changes(before, after),
            _ => None,
        };
        PendingMutation {
            mutation_id,
            mutation_type,
            key,
            original,
            modified,
            changes,
            optimistic: opts.optimistic,
            metadata: None,
            sync_metadata: None,
            created_at: now,
            updated_at: now,
            collection: self.collection_id(),
        }
    }

    /// Registers `mutations` on the active transaction (synthesizing an
    /// auto-commit one via `handler` if there is none), applies every
    /// overlay write, then flushes the resulting changes as one atomic
    /// emission (`spec.md` §4.6's ordering guarantee). When no transaction
    /// was already active — this call synthesized its own — the flush
    /// happens immediately, since nothing else will trigger it.
    fn stage(
        &self,
        mutations: Vec<PendingMutation<T>>,
        overlay_values: Vec<Option<T>>,
        handler: &Option<MutationHandler<T>>,
        missing_handler_error: errors::ErrorMetadata,
    ) -> anyhow::Result<MutationOutcome<T>> {
        debug_assert_eq!(mutations.len(), overlay_values.len());
        let (tx, synthesized) = match self.manager.get_active() {
            Some(tx) => (tx, false),
            None => {
                let handler = handler
                    .clone()
                    .ok_or_else(|| anyhow::Error::new(missing_handler_error))?;
                let config = TransactionConfig {
                    auto_commit: true,
                    label: None,
                    mutation_fn: Some(Box::new(move |ctx: MutationContext<T>| handler(ctx.mutations))),
                };
                (self.manager.create(config), true)
            },
        };
        let writes: Vec<(Key, Option<T>, bool)> = mutations
            .iter()
            .zip(overlay_values)
            .map(|(m, overlay)| (m.key.clone(), overlay, m.optimistic))
            .collect();
        self.manager.apply_mutations(&tx, mutations);
        for (key, overlay_value, optimistic) in writes {
            self.apply_overlay_and_emit(&tx, key, overlay_value, optimistic);
        }
        if synthesized {
            self.flush_pending_emission(tx.id());
        }

        let commit = synthesized.then(|| {
            let manager = self.manager.clone();
            let tx = tx.clone();
            async move { manager.commit(&tx).await }.boxed_local()
        });
        Ok(MutationOutcome { transaction: tx, commit })
    }

    /// Writes one key's overlay entry (unless `optimistic` is false, in
    /// which case only `overlay_owner` is updated so sync deferral still
    /// sees this transaction as claiming the key) and buffers the resulting
    /// change for [`Self::flush_pending_emission`] rather than emitting it
    /// directly, so a multi-mutation `stage` call observes as one batch.
    fn apply_overlay_and_emit(&self, tx: &TransactionHandle<T>, key: Key, overlay_value: Option<T>, optimistic: bool) {
        let mut state = self.state.borrow_mut();
        if !optimistic {
            state.overlay_owner.insert(key, tx.clone());
            return;
        }
        let before = state.derived_get(&key);
        match &overlay_value {
            Some(value) => {
                state.optimistic_upserts.insert(key.clone(), value.clone());
                state.optimistic_deletes.remove(&key);
            },
            None => {
                state.optimistic_deletes.insert(key.clone());
                state.optimistic_upserts.remove(&key);
            },
        }
        state.overlay_owner.insert(key.clone(), tx.clone());
        let after = state.derived_get(&key);
        let change = derive_change(key.clone(), before.clone(), after.clone());
        let Some(change) = change else { return };
        if let Err(err) = apply_index_change(&mut state.indexes, &key, before.as_ref(), after.as_ref()) {
            tracing::error!(%key, error = %err, "index update rejected this change, dropping it");
            return;
        }
        state.pending_emission.entry(tx.id()).or_default().push(change);
    }

    /// Emits whatever changes accumulated for `transaction_id` while its
    /// `mutate` callback was running. Called directly by `stage` for a
    /// synthesized auto-commit transaction, and via [`Touchable`] by
    /// `TransactionManager::mutate` for a caller-driven one.
    pub(crate) fn flush_pending_emission(&self, transaction_id: u64) {
        let changes = self.state.borrow_mut().pending_emission.remove(&transaction_id);
        if let Some(changes) = changes {
            self.emit(changes);
        }
    }

    /// Called by [`Touchable::touch`]: drops overlay entries owned by
    /// transactions that have since become terminal (completed or failed —
    /// `spec.md` §8's testable property that a terminal transaction
    /// contributes no overlay entries), then retries deferred sync batches.
    fn reconcile_and_drain(&self) {
        let mut changes = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let terminal_keys: Vec<Key> = state
                .overlay_owner
                .iter()
                .filter(|(_, tx)| tx.state().is_terminal())
                .map(|(key, _)| key.clone())
                .collect();
            for key in terminal_keys {
                state.overlay_owner.remove(&key);
                let before = state.derived_get(&key);
                state.optimistic_upserts.remove(&key);
                state.optimistic_deletes.remove(&key);
                let after = state.derived_get(&key);
                if let Some(change) = derive_change(key.clone(), before.clone(), after.clone()) {
                    if let Err(err) = apply_index_change(&mut state.indexes, &key, before.as_ref(), after.as_ref()) {
                        tracing::error!(%key, error = %err, "index update rejected this reconciled change, dropping it");
                        continue;
                    }
                    changes.push(change);
                }
            }
        }
        if !changes.is_empty() {
            self.emit(changes);
        }
        self.try_drain_pending_sync();
    }

    pub(crate) fn begin_sync_batch(&self) {
        self.state.borrow_mut().building_sync_batch = Some(SyncBatch { writes: Vec::new() });
    }

    /// Rejects re-entrant sync writes: a `SyncSource` that calls back into
    /// `mutate` (or otherwise activates a transaction) while its own batch is
    /// still being written would corrupt `building_sync_batch`.
    pub(crate) fn write_sync_batch(&self, write: SyncWrite<T>) -> anyhow::Result<()> {
        anyhow::ensure!(self.manager.get_active().is_none(), errors::nested_mutate_in_sync_write());
        let mut state = self.state.borrow_mut();
        state
            .building_sync_batch
            .get_or_insert_with(|| SyncBatch { writes: Vec::new() })
            .writes
            .push(write);
        Ok(())
    }

    pub(crate) fn commit_sync_batch(&self) {
        // The first sync batch to commit is the signal that backfill has
        // landed, regardless of whether this particular batch ends up
        // applied immediately or deferred — `resolve` is a no-op once
        // already settled, so later commits are free to call this too.
        self.ready.resolve(());
        let batch = {
            let mut state = self.state.borrow_mut();
            state.building_sync_batch.take()
        };
        let Some(batch) = batch.filter(|b| !b.writes.is_empty()) else {
            return;
        };
        self.state.borrow_mut().pending_sync_batches.push_back(batch);
        self.try_drain_pending_sync();
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.resolve(());
    }

    /// Applies as many queued batches as are unblocked, in FIFO order. A
    /// batch is blocked while any of its keys is still claimed by a
    /// non-terminal transaction's overlay entry (`spec.md` §4.9).
    fn try_drain_pending_sync(&self) {
        loop {
            let can_apply = {
                let state = self.state.borrow();
                let Some(batch) = state.pending_sync_batches.front() else {
                    return;
                };
                !batch.writes.iter().any(|write| {
                    state
                        .overlay_owner
                        .get(&write.key)
                        .is_some_and(|tx| !tx.state().is_terminal())
                })
            };
            if !can_apply {
                return;
            }
            self.apply_next_sync_batch();
        }
    }

    fn apply_next_sync_batch(&self) {
        let mut changes = Vec::new();
        {
            let mut state = self.state.borrow_mut();
            let Some(batch) = state.pending_sync_batches.pop_front() else {
                return;
            };
            for write in batch.writes {
                let before = state.derived_get(&write.key);
                match write.mutation_type {
                    SyncMutationType::Insert | SyncMutationType::Update => {
                        let value = write.value.expect("insert/update sync write carries a value");
                        state.synced.insert(write.key.clone(), value);
                        let metadata = write.metadata.or_else(|| state.sync_source_metadata.clone());
                        if let Some(metadata) = metadata {
                            state.synced_metadata.insert(write.key.clone(), metadata);
                        }
                    },
                    SyncMutationType::Delete => {
                        state.synced.remove(&write.key);
                        state.synced_metadata.remove(&write.key);
                    },
                }
                let after = state.derived_get(&write.key);
                if let Some(change) = derive_change(write.key.clone(), before.clone(), after.clone()) {
                    if let Err(err) = apply_index_change(&mut state.indexes, &write.key, before.as_ref(), after.as_ref()) {
                        tracing::error!(key = %write.key, error = %err, "index update rejected this synced change, dropping it");
                        continue;
                    }
                    changes.push(change);
                }
            }
        }
        if !changes.is_empty() {
            self.emit(changes);
        }
    }

    pub fn subscribe_changes(
        self: &Rc<Self>,
        opts: SubscribeOptions,
        callback: impl Fn(Vec<ChangeMessage<T>>) + 'static,
    ) -> Subscription<T> {
        let id = {
            let mut state = self.state.borrow_mut();
            let id = state.next_subscriber_id;
            state.next_subscriber_id += 1;
            id
        };
        if opts.include_initial_state {
            let initial: Vec<ChangeMessage<T>> = {
                let state = self.state.borrow();
                let candidates = match &opts.filter {
                    Some(expr) => {
                        let optimization = query::evaluate(expr, &state.indexes);
                        if optimization.can_optimize {
                            optimization.matching_keys.into_iter().collect()
                        } else {
                            state.all_keys()
                        }
                    },
                    None => state.all_keys(),
                };
                candidates
                    .into_iter()
                    .filter_map(|key| {
                        let value = state.derived_get(&key)?;
                        record_matches(&opts.filter, &value).then(|| ChangeMessage::insert(key, value))
                    })
                    .collect()
            };
            if !initial.is_empty() {
                callback(initial);
            }
        }
        self.state.borrow_mut().subscribers.push(Rc::new(Subscriber {
            id,
            filter: opts.filter,
            callback: Box::new(callback),
        }));
        Subscription::new(self.clone(), id)
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.state.borrow_mut().subscribers.retain(|s| s.id != id);
    }

    fn emit(&self, changes: Vec<ChangeMessage<T>>) {
        if changes.is_empty() {
            return;
        }
        let subscribers: Vec<Rc<Subscriber<T>>> = self.state.borrow().subscribers.clone();
        for subscriber in subscribers {
            let filtered = filter_changes(&subscriber.filter, &changes);
            if !filtered.is_empty() {
                (subscriber.callback)(filtered);
            }
        }
    }
}

impl<T> Touchable for Collection<T>
where
    T: Clone + Serialize + 'static,
{
    fn touch(&self) {
        self.reconcile_and_drain();
    }

    fn flush_mutation_batch(&self, transaction_id: u64) {
        self.flush_pending_emission(transaction_id);
    }
}
