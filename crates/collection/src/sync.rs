//! Sync intake (`spec.md` §4.9, component C9): a `SyncSource` streams
//! server-confirmed state into a collection's `synced` map through a
//! `SyncSink`, deferring any batch that overlaps a key still claimed by a
//! non-terminal optimistic transaction.

use std::rc::Rc;

use common::Metadata;
use futures::future::LocalBoxFuture;
use serde::Serialize;
use value::Key;

use crate::collection::Collection;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMutationType {
    Insert,
    Update,
    Delete,
}

/// One write inside an in-progress sync batch (`spec.md`'s
/// `{type, value, metadata}`).
#[derive(Clone, Debug)]
pub struct SyncWrite<T> {
    pub key: Key,
    pub mutation_type: SyncMutationType,
    pub value: Option<T>,
    pub metadata: Option<Metadata>,
}

impl<T> SyncWrite<T> {
    pub fn upsert(key: Key, mutation_type: SyncMutationType, value: T) -> Self {
        Self {
            key,
            mutation_type,
            value: Some(value),
            metadata: None,
        }
    }

    pub fn delete(key: Key) -> Self {
        Self {
            key,
            mutation_type: SyncMutationType::Delete,
            value: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SyncBatch<T> {
    pub writes: Vec<SyncWrite<T>>,
}

/// A long-running process that feeds confirmed server state into a
/// collection. `sync` runs for the collection's lifetime; the returned
/// future resolves only if the source gives up permanently.
pub trait SyncSource<T>: 'static {
    fn sync(&self, sink: SyncSink<T>) -> LocalBoxFuture<'static, anyhow::Result<()>>;

    /// Per-sync metadata the original implementation's `getSyncMetadata()`
    /// hook contributes to every write whose own `SyncWrite::metadata` is
    /// unset. Most sources have none.
    fn sync_metadata(&self) -> Option<Metadata> {
        None
    }
}

/// The handle a `SyncSource` uses to stream writes into its collection:
/// `begin` opens a batch, `write` stages one change into it, `commit`
/// queues the batch for application (deferring it if a non-terminal
/// optimistic transaction still claims one of its keys), and `mark_ready`
/// signals that the initial backfill has completed.
pub struct SyncSink<T> {
    pub(crate) collection: Rc<Collection<T>>,
}

impl<T> Clone for SyncSink<T> {
    fn clone(&self) -> Self {
        Self {
            collection: self.collection.clone(),
        }
    }
}

impl<T: Clone + Serialize + 'static> SyncSink<T> {
    /// Builds a sink directly, for a `SyncSource` implementation that wants
    /// to hold onto it outside of [`Collection::start_sync`]'s call, or for
    /// tests driving sync intake without a full `SyncSource`.
    pub fn new(collection: Rc<Collection<T>>) -> Self {
        Self { collection }
    }

    pub fn begin(&self) {
        self.collection.begin_sync_batch();
    }

    pub fn write(&self, write: SyncWrite<T>) -> anyhow::Result<()> {
        self.collection.write_sync_batch(write)
    }

    pub fn commit(&self) {
        self.collection.commit_sync_batch();
    }

    pub fn mark_ready(&self) {
        self.collection.mark_ready();
    }
}
