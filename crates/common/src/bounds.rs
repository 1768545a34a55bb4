//! Lower and upper bound wrappers on [`std::ops::Bound`].
//!
//! `Bound` can't directly implement `Ord` because `Unbounded` is either the
//! minimum or the maximum value depending on whether it's used as a lower or
//! an upper bound. We define dedicated wrappers that can be ordered, used by
//! the query evaluator (`query` crate) to merge the `gt/gte/lt/lte` bounds
//! produced for a single field into the tightest `{from, to}` pair before
//! handing them to an index's `range_query`.

use std::{
    cmp::Ordering,
    ops::Bound,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LowerBound<K>(pub Bound<K>);

impl<K: Ord> Ord for LowerBound<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Bound::Included(l), Bound::Included(r)) => l.cmp(r),
            (Bound::Excluded(l), Bound::Excluded(r)) => l.cmp(r),
            (Bound::Included(l), Bound::Excluded(r)) => {
                if l == r {
                    Ordering::Less
                } else {
                    l.cmp(r)
                }
            },
            (Bound::Excluded(l), Bound::Included(r)) => {
                if l == r {
                    Ordering::Greater
                } else {
                    l.cmp(r)
                }
            },
            (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
            (_, Bound::Unbounded) => Ordering::Greater,
            (Bound::Unbounded, _) => Ordering::Less,
        }
    }
}

impl<K: Ord> PartialOrd for LowerBound<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpperBound<K>(pub Bound<K>);

impl<K: Ord> Ord for UpperBound<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Bound::Included(l), Bound::Included(r)) => l.cmp(r),
            (Bound::Excluded(l), Bound::Excluded(r)) => l.cmp(r),
            (Bound::Included(l), Bound::Excluded(r)) => {
                if l == r {
                    Ordering::Greater
                } else {
                    l.cmp(r)
                }
            },
            (Bound::Excluded(l), Bound::Included(r)) => {
                if l == r {
                    Ordering::Less
                } else {
                    l.cmp(r)
                }
            },
            (Bound::Unbounded, Bound::Unbounded) => Ordering::Equal,
            (_, Bound::Unbounded) => Ordering::Less,
            (Bound::Unbounded, _) => Ordering::Greater,
        }
    }
}

impl<K: Ord> PartialOrd for UpperBound<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Intersects two lower bounds, keeping the tighter (larger) one.
pub fn tightest_lower<K: Ord + Clone>(a: &LowerBound<K>, b: &LowerBound<K>) -> LowerBound<K> {
    if a >= b {
        a.clone()
    } else {
        b.clone()
    }
}

/// Intersects two upper bounds, keeping the tighter (smaller) one.
pub fn tightest_upper<K: Ord + Clone>(a: &UpperBound<K>, b: &UpperBound<K>) -> UpperBound<K> {
    if a <= b {
        a.clone()
    } else {
        b.clone()
    }
}
