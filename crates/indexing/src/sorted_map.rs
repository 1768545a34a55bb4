//! A sorted keyed map (`spec.md` §4.2, component C2) used as the range/scan
//! primitive behind per-field indexes and ordered subscriptions.
//!
//! The teacher's `indexing` crate maintains its in-memory index maps as
//! `imbl::OrdMap`/`OrdSet` (`crates::backend_in_memory_indexes`) specifically
//! because `imbl`'s trees are persistent: a `.clone()` is O(1) and shares
//! substructure with the original until one of the two is mutated, which is
//! exactly the "copy-on-write clones share substructure" requirement in the
//! spec's B+tree section. Rather than hand-roll node splitting and a
//! shared-flag bitset to get that property from scratch, `SortedMap` wraps
//! `imbl::OrdMap` and layers the spec's additional required operations
//! (`next_higher`/`next_lower`, bidirectional scan-with-edit) on top using
//! its range API. See DESIGN.md for the branching-factor caveat this choice
//! implies.

use std::ops::Bound;

use imbl::OrdMap;

/// Branching factor bounds from the spec; `imbl`'s internal node arity is
/// fixed by the library, so this is validated and retained for API
/// compatibility rather than passed down to the backing store.
pub const MIN_BRANCHING_FACTOR: usize = 4;
pub const MAX_BRANCHING_FACTOR: usize = 256;
pub const DEFAULT_BRANCHING_FACTOR: usize = 32;

#[derive(Clone)]
pub struct SortedMap<K: Ord + Clone, V: Clone> {
    branching_factor: usize,
    tree: OrdMap<K, V>,
}

/// The result of visiting one `(key, value)` pair during [`SortedMap::scan`].
pub enum EditAction<V> {
    /// Leave the entry untouched.
    Keep,
    /// Replace the entry's value.
    Set(V),
    /// Remove the entry.
    Delete,
    /// Apply no further edit (the entry is left as-is, same as `Keep`) and
    /// stop visiting the remaining keys in the scan's range.
    Break,
}

/// Lets [`SortedMap::upsert`] reject NaN keys without constraining every
/// other method to a type that can answer the question. `spec.md` §4.2: "NaN
/// keys must raise an error." Implemented locally for `value::Value` in the
/// `indexing` crate to dodge the orphan rule.
pub trait RejectsNan {
    fn is_nan_key(&self) -> bool {
        false
    }
}

impl RejectsNan for i64 {}

impl<K: Ord + Clone, V: Clone> SortedMap<K, V> {
    pub fn new(branching_factor: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(
            (MIN_BRANCHING_FACTOR..=MAX_BRANCHING_FACTOR).contains(&branching_factor),
            "branching factor {branching_factor} out of range [{MIN_BRANCHING_FACTOR}, \
             {MAX_BRANCHING_FACTOR}]"
        );
        Ok(Self {
            branching_factor,
            tree: OrdMap::new(),
        })
    }

    pub fn branching_factor(&self) -> usize {
        self.branching_factor
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.tree.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.tree.contains_key(key)
    }

    /// Insert or overwrite `key`. Returns the previous value, if any.
    pub fn upsert(&mut self, key: K, value: V) -> anyhow::Result<Option<V>>
    where
        K: RejectsNan,
    {
        anyhow::ensure!(!key.is_nan_key(), errors::nan_key());
        Ok(self.tree.insert(key, value))
    }

    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.tree.remove(key)
    }

    pub fn min_key(&self) -> Option<&K> {
        self.tree.get_min().map(|(k, _)| k)
    }

    pub fn max_key(&self) -> Option<&K> {
        self.tree.get_max().map(|(k, _)| k)
    }

    /// The smallest entry strictly greater than `key` (or `>=` when
    /// `inclusive`).
    pub fn next_higher(&self, key: &K, inclusive: bool) -> Option<(&K, &V)> {
        let lower = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.tree.range((lower, Bound::Unbounded)).next()
    }

    /// The largest entry strictly less than `key` (or `<=` when
    /// `inclusive`).
    pub fn next_lower(&self, key: &K, inclusive: bool) -> Option<(&K, &V)> {
        let upper = if inclusive {
            Bound::Included(key)
        } else {
            Bound::Excluded(key)
        };
        self.tree.range((Bound::Unbounded, upper)).next_back()
    }

    /// Iterate `[from, to)`-bounded entries in ascending (or, with
    /// `reverse`, descending) order.
    pub fn range<'a>(
        &'a self,
        from: Bound<&'a K>,
        to: Bound<&'a K>,
        reverse: bool,
    ) -> Box<dyn DoubleEndedIterator<Item = (&'a K, &'a V)> + 'a> {
        let iter = self.tree.range((from, to));
        if reverse {
            Box::new(iter.rev())
        } else {
            Box::new(iter)
        }
    }

    /// Bidirectional range scan with an in-scan edit callback. The spec
    /// requires at-most-once visitation per existing key even though the map
    /// is being mutated concurrently with the scan; we get that for free by
    /// taking a point-in-time snapshot (an O(1) `imbl` clone) to drive
    /// iteration and applying edits to the live map afterward, which also
    /// sidesteps the classic "mutate while iterating" hazard entirely.
    pub fn scan(
        &mut self,
        from: Bound<&K>,
        to: Bound<&K>,
        reverse: bool,
        mut edit: impl FnMut(&K, &V) -> EditAction<V>,
    ) {
        let snapshot = self.tree.clone();
        let keys: Vec<K> = {
            let iter = snapshot.range((from, to));
            let keys = iter.map(|(k, _)| k.clone());
            if reverse {
                keys.rev().collect()
            } else {
                keys.collect()
            }
        };
        for key in keys {
            let Some(value) = snapshot.get(&key) else {
                continue;
            };
            match edit(&key, value) {
                EditAction::Keep => {},
                EditAction::Set(new_value) => {
                    self.tree.insert(key, new_value);
                },
                EditAction::Delete => {
                    self.tree.remove(&key);
                },
                EditAction::Break => break,
            }
        }
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &V)> {
        self.tree.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> SortedMap<i64, &'static str> {
        let mut m = SortedMap::new(DEFAULT_BRANCHING_FACTOR).unwrap();
        for (k, v) in [(1, "a"), (3, "b"), (5, "c"), (7, "d")] {
            m.upsert(k, v).unwrap();
        }
        m
    }

    #[test]
    fn rejects_out_of_range_branching_factor() {
        assert!(SortedMap::<i64, ()>::new(1).is_err());
        assert!(SortedMap::<i64, ()>::new(1000).is_err());
    }

    #[test]
    fn min_max_key() {
        let m = map();
        assert_eq!(m.min_key(), Some(&1));
        assert_eq!(m.max_key(), Some(&7));
    }

    #[test]
    fn next_higher_and_lower_respect_inclusivity() {
        let m = map();
        assert_eq!(m.next_higher(&3, false), Some((&5, &"c")));
        assert_eq!(m.next_higher(&3, true), Some((&3, &"b")));
        assert_eq!(m.next_lower(&5, false), Some((&3, &"b")));
        assert_eq!(m.next_lower(&5, true), Some((&5, &"c")));
        assert_eq!(m.next_higher(&7, false), None);
        assert_eq!(m.next_lower(&1, false), None);
    }

    #[test]
    fn scan_visits_each_existing_key_once_and_applies_edits() {
        let mut m = map();
        let mut visited = Vec::new();
        m.scan(Bound::Unbounded, Bound::Unbounded, false, |k, v| {
            visited.push(*k);
            if *k == 3 {
                EditAction::Delete
            } else if *k == 5 {
                EditAction::Set("C")
            } else {
                EditAction::Keep
            }
        });
        assert_eq!(visited, vec![1, 3, 5, 7]);
        assert_eq!(m.get(&3), None);
        assert_eq!(m.get(&5), Some(&"C"));
        assert_eq!(m.get(&1), Some(&"a"));
        assert_eq!(m.len(), 3);
    }

    #[test]
    fn clone_shares_substructure_until_mutated() {
        let original = map();
        let mut cloned = original.clone();
        cloned.upsert(9, "e").unwrap();
        // The original is untouched: this is the COW guarantee `imbl` gives
        // us, not a deep copy taken eagerly on `.clone()`.
        assert_eq!(original.len(), 4);
        assert_eq!(cloned.len(), 5);
    }

    #[test]
    fn scan_break_stops_visiting_remaining_keys() {
        let mut m = map();
        let mut visited = Vec::new();
        m.scan(Bound::Unbounded, Bound::Unbounded, false, |k, _v| {
            visited.push(*k);
            if *k == 3 {
                EditAction::Break
            } else {
                EditAction::Keep
            }
        });
        assert_eq!(visited, vec![1, 3]);
        // Nothing was edited; `Break` only halts iteration.
        assert_eq!(m.len(), 4);
    }
}
