mod collection_registry;
mod deferred;
mod manager;
mod optimistic_action;
mod pending_mutation;
mod transaction;

pub use collection_registry::{
    CollectionId,
    CollectionRegistry,
    Touchable,
};
pub use deferred::{
    Deferred,
    DeferredFuture,
};
pub use manager::{
    MutateOutcome,
    TransactionManager,
};
pub use optimistic_action::{
    optimistic_action,
    OptimisticActionConfig,
};
pub use pending_mutation::{
    MutationType,
    PendingMutation,
};
pub use transaction::{
    MutationContext,
    MutationFn,
    Transaction,
    TransactionConfig,
    TransactionHandle,
    TransactionState,
};
