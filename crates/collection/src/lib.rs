mod collection;
pub mod knobs;
mod pending;
mod schema;
mod subscription;
mod sync;

pub use collection::{
    Collection,
    CollectionConfig,
    MutateOpts,
    MutationHandler,
    MutationOutcome,
};
pub use schema::{
    NoopSchema,
    Schema,
};
pub use subscription::{
    SubscribeOptions,
    Subscription,
};
pub use sync::{
    SyncMutationType,
    SyncSink,
    SyncSource,
    SyncWrite,
};
