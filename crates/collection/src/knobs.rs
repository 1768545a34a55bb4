//! Environment-overridable tunables, mirroring the teacher's `common::knobs`
//! convention of env-var-overridable statics rather than hardcoded literals.

use std::sync::LazyLock;

use cmd_util::env::env_config;

/// Branching factor for a `FieldIndex`'s backing `SortedMap`, unless a
/// caller constructs one with an explicit factor.
pub static DEFAULT_BTREE_FANOUT: LazyLock<usize> =
    LazyLock::new(|| env_config("COLLECTION_DEFAULT_BTREE_FANOUT", 32usize));

/// Hint for how many changes to batch per subscriber dispatch. Not currently
/// consulted by `Collection::emit` (subscriber dispatch is synchronous and
/// unbatched today), but kept as a tunable per the original's devtools
/// surface for a future batched-dispatch mode.
pub static SUBSCRIBER_DISPATCH_QUEUE_HINT: LazyLock<usize> =
    LazyLock::new(|| env_config("COLLECTION_SUBSCRIBER_DISPATCH_QUEUE_HINT", 64usize));
