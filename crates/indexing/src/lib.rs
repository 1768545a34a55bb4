mod index;
mod sorted_map;

pub use index::{
    FieldIndex,
    HashIndex,
    Index,
    IndexSet,
    Op,
    RangeQuery,
};
pub use sorted_map::{
    EditAction,
    SortedMap,
    DEFAULT_BRANCHING_FACTOR,
    MAX_BRANCHING_FACTOR,
    MIN_BRANCHING_FACTOR,
};
