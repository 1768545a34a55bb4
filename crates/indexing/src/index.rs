//! Per-field indexes (`spec.md` §4.3, component C3) maintained incrementally
//! off a collection's derived view, and queried by the evaluator in the
//! `query` crate.
//!
//! Grounded on the teacher's `indexing::index_registry` /
//! `backend_in_memory_indexes`: a registry of named indexes, each bound to a
//! field path, each able to report what operators it can serve so the query
//! planner can decide whether to use it or fall back to a full scan.

use std::{
    collections::{
        BTreeSet,
        HashMap,
    },
    ops::Bound,
};

use serde::Serialize;
use value::{
    FieldPath,
    Key,
    ObjectIdAllocator,
    Value,
};

use crate::sorted_map::{
    EditAction,
    RejectsNan,
    SortedMap,
    DEFAULT_BRANCHING_FACTOR,
};

impl RejectsNan for Value {
    fn is_nan_key(&self) -> bool {
        self.contains_nan()
    }
}

/// A comparison operator a query can ask an index to serve directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// An inclusive/exclusive bounded range over an index's values, as produced
/// by the query evaluator's compound-range optimization.
#[derive(Clone, Debug, Default)]
pub struct RangeQuery {
    pub from: Option<Value>,
    pub from_inclusive: bool,
    pub to: Option<Value>,
    pub to_inclusive: bool,
}

/// An index over `T`, bound to a single field path. Implementations may
/// support only a subset of [`Op`] (an eq-only hash index is valid, per the
/// spec's Design Notes); `supports` lets the planner check before using one
/// for a range query.
pub trait Index<T>: Send + Sync {
    fn name(&self) -> &str;
    fn matches_field(&self, path: &FieldPath) -> bool;
    fn supports(&self, op: Op) -> bool;

    /// Keys whose extracted field value satisfies `op` against `value`. Only
    /// meaningful for `Eq`/`Gt`/`Gte`/`Lt`/`Lte`; callers use [`Index::lookup_in`]
    /// for `In`.
    fn lookup(&self, op: Op, value: &Value) -> BTreeSet<Key>;
    fn lookup_in(&self, values: &[Value]) -> BTreeSet<Key>;
    fn range_query(&self, range: &RangeQuery) -> BTreeSet<Key>;

    fn add(&mut self, key: &Key, value: &T) -> anyhow::Result<()>;
    fn remove(&mut self, key: &Key, value: &T);

    /// Default implementation is remove-then-add; overridden only when an
    /// index can do better than that.
    fn update(&mut self, key: &Key, old: &T, new: &T) -> anyhow::Result<()> {
        self.remove(key, old);
        self.add(key, new)
    }

    /// Ordered keys starting at `cursor` (or unbounded), capped at `limit` —
    /// the primitive behind a paginated "ordered subscription" over this
    /// index (`spec.md`'s C2 range/scan primitive, "used by indexes and
    /// ordered subscriptions"). Indexes with no intrinsic order (`HashIndex`)
    /// return whatever keys they have, in an unspecified order.
    fn ordered_keys(&mut self, cursor: Bound<&Value>, reverse: bool, limit: usize) -> Vec<Key>;
}

/// Extracts the JSON value at `path` out of `record`, then converts it into
/// the comparator's [`Value`] domain via `objects` so object-typed field
/// values get a stable id across calls on the same index.
fn extract<T: Serialize>(
    record: &T,
    path: &FieldPath,
    objects: &mut ObjectIdAllocator<String>,
) -> Value {
    // `T: Serialize` failing to serialize would mean the record can't be
    // stored in the collection at all, so collapsing the error to `Null`
    // here (the spec's "undefined") rather than propagating it is safe.
    let Ok(json) = serde_json::to_value(record) else {
        return Value::Null;
    };
    match path.get(&json) {
        Some(field) => value::from_json(field, objects),
        None => Value::Null,
    }
}

/// A range-capable index backed by [`SortedMap`], supporting every [`Op`].
pub struct FieldIndex<T> {
    name: String,
    path: FieldPath,
    tree: SortedMap<Value, BTreeSet<Key>>,
    objects: ObjectIdAllocator<String>,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T> FieldIndex<T> {
    pub fn new(name: impl Into<String>, path: FieldPath) -> Self {
        Self::with_branching_factor(name, path, DEFAULT_BRANCHING_FACTOR)
    }

    /// Like [`Self::new`], but with an explicit `SortedMap` branching factor
    /// (e.g. from `collection::knobs::DEFAULT_BTREE_FANOUT`) instead of the
    /// library default.
    pub fn with_branching_factor(name: impl Into<String>, path: FieldPath, branching_factor: usize) -> Self {
        Self {
            name: name.into(),
            path,
            tree: SortedMap::new(branching_factor).expect("branching factor out of range"),
            objects: ObjectIdAllocator::new(),
            _marker: std::marker::PhantomData,
        }
    }

    fn insert_key(&mut self, field_value: Value, key: Key) -> anyhow::Result<()> {
        let mut keys = self.tree.get(&field_value).cloned().unwrap_or_default();
        keys.insert(key);
        self.tree.upsert(field_value, keys)?;
        Ok(())
    }

    fn remove_key(&mut self, field_value: &Value, key: &Key) {
        let Some(mut keys) = self.tree.get(field_value).cloned() else {
            return;
        };
        keys.remove(key);
        if keys.is_empty() {
            self.tree.delete(field_value);
        } else {
            // `field_value` is already present as a key, so it can't be the
            // NaN this index rejected on insertion; safe to unwrap.
            self.tree.upsert(field_value.clone(), keys).expect("existing key is not NaN");
        }
    }

    fn union_range(
        &self,
        from: std::ops::Bound<&Value>,
        to: std::ops::Bound<&Value>,
    ) -> BTreeSet<Key> {
        self.tree
            .range(from, to, false)
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect()
    }
}

impl<T: Serialize> Index<T> for FieldIndex<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches_field(&self, path: &FieldPath) -> bool {
        &self.path == path
    }

    fn supports(&self, _op: Op) -> bool {
        true
    }

    fn lookup(&self, op: Op, value: &Value) -> BTreeSet<Key> {
        use std::ops::Bound;
        match op {
            Op::Eq => self.tree.get(value).cloned().unwrap_or_default(),
            Op::Gt => self.union_range(Bound::Excluded(value), Bound::Unbounded),
            Op::Gte => self.union_range(Bound::Included(value), Bound::Unbounded),
            Op::Lt => self.union_range(Bound::Unbounded, Bound::Excluded(value)),
            Op::Lte => self.union_range(Bound::Unbounded, Bound::Included(value)),
            Op::In => self.lookup_in(std::slice::from_ref(value)),
        }
    }

    fn lookup_in(&self, values: &[Value]) -> BTreeSet<Key> {
        values
            .iter()
            .flat_map(|v| self.tree.get(v).cloned().unwrap_or_default())
            .collect()
    }

    fn range_query(&self, range: &RangeQuery) -> BTreeSet<Key> {
        use std::ops::Bound;
        let from = match (&range.from, range.from_inclusive) {
            (None, _) => Bound::Unbounded,
            (Some(v), true) => Bound::Included(v),
            (Some(v), false) => Bound::Excluded(v),
        };
        let to = match (&range.to, range.to_inclusive) {
            (None, _) => Bound::Unbounded,
            (Some(v), true) => Bound::Included(v),
            (Some(v), false) => Bound::Excluded(v),
        };
        self.union_range(from, to)
    }

    fn add(&mut self, key: &Key, value: &T) -> anyhow::Result<()> {
        let field_value = extract(value, &self.path, &mut self.objects);
        self.insert_key(field_value, key.clone())
    }

    fn remove(&mut self, key: &Key, value: &T) {
        let field_value = extract(value, &self.path, &mut self.objects);
        self.remove_key(&field_value, key);
    }

    fn update(&mut self, key: &Key, old: &T, new: &T) -> anyhow::Result<()> {
        let old_value = extract(old, &self.path, &mut self.objects);
        let new_value = extract(new, &self.path, &mut self.objects);
        if old_value == new_value {
            return Ok(());
        }
        self.remove_key(&old_value, key);
        self.insert_key(new_value, key.clone())
    }

    fn ordered_keys(&mut self, cursor: Bound<&Value>, reverse: bool, limit: usize) -> Vec<Key> {
        let (from, to) = if reverse {
            (Bound::Unbounded, cursor)
        } else {
            (cursor, Bound::Unbounded)
        };
        let mut collected = Vec::new();
        self.tree.scan(from, to, reverse, |_, keys| {
            collected.extend(keys.iter().cloned());
            if collected.len() >= limit {
                EditAction::Break
            } else {
                EditAction::Keep
            }
        });
        collected.truncate(limit);
        collected
    }
}

/// An eq/in-only index backed by a plain hash map. Cheaper to maintain than
/// a [`FieldIndex`] when a query path only ever does equality lookups, and
/// demonstrates that the `Index` trait doesn't require range support.
pub struct HashIndex<T> {
    name: String,
    path: FieldPath,
    buckets: HashMap<Value, BTreeSet<Key>>,
    objects: ObjectIdAllocator<String>,
    _marker: std::marker::PhantomData<fn(&T)>,
}

impl<T> HashIndex<T> {
    pub fn new(name: impl Into<String>, path: FieldPath) -> Self {
        Self {
            name: name.into(),
            path,
            buckets: HashMap::new(),
            objects: ObjectIdAllocator::new(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: Serialize> Index<T> for HashIndex<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches_field(&self, path: &FieldPath) -> bool {
        &self.path == path
    }

    fn supports(&self, op: Op) -> bool {
        matches!(op, Op::Eq | Op::In)
    }

    fn lookup(&self, op: Op, value: &Value) -> BTreeSet<Key> {
        match op {
            Op::Eq => self.buckets.get(value).cloned().unwrap_or_default(),
            Op::In => self.lookup_in(std::slice::from_ref(value)),
            _ => BTreeSet::new(),
        }
    }

    fn lookup_in(&self, values: &[Value]) -> BTreeSet<Key> {
        values
            .iter()
            .flat_map(|v| self.buckets.get(v).cloned().unwrap_or_default())
            .collect()
    }

    fn range_query(&self, _range: &RangeQuery) -> BTreeSet<Key> {
        BTreeSet::new()
    }

    fn add(&mut self, key: &Key, value: &T) -> anyhow::Result<()> {
        let field_value = extract(value, &self.path, &mut self.objects);
        anyhow::ensure!(!field_value.contains_nan(), errors::nan_key());
        self.buckets.entry(field_value).or_default().insert(key.clone());
        Ok(())
    }

    fn remove(&mut self, key: &Key, value: &T) {
        let field_value = extract(value, &self.path, &mut self.objects);
        if let Some(keys) = self.buckets.get_mut(&field_value) {
            keys.remove(key);
            if keys.is_empty() {
                self.buckets.remove(&field_value);
            }
        }
    }

    fn ordered_keys(&mut self, _cursor: Bound<&Value>, _reverse: bool, limit: usize) -> Vec<Key> {
        self.buckets.values().flatten().take(limit).cloned().collect()
    }
}

/// The set of indexes maintained for one collection, kept in sync with its
/// derived view on every insert/update/delete.
#[derive(Default)]
pub struct IndexSet<T> {
    indexes: Vec<Box<dyn Index<T>>>,
}

impl<T> IndexSet<T> {
    pub fn new() -> Self {
        Self { indexes: Vec::new() }
    }

    pub fn register(&mut self, index: Box<dyn Index<T>>) {
        self.indexes.push(index);
    }

    pub fn on_insert(&mut self, key: &Key, value: &T) -> anyhow::Result<()> {
        for index in &mut self.indexes {
            index.add(key, value)?;
        }
        Ok(())
    }

    pub fn on_remove(&mut self, key: &Key, value: &T) {
        for index in &mut self.indexes {
            index.remove(key, value);
        }
    }

    pub fn on_update(&mut self, key: &Key, old: &T, new: &T) -> anyhow::Result<()> {
        for index in &mut self.indexes {
            index.update(key, old, new)?;
        }
        Ok(())
    }

    /// The best index for `path` that can serve `op` directly, if any.
    pub fn find(&self, path: &FieldPath, op: Op) -> Option<&dyn Index<T>> {
        self.indexes
            .iter()
            .find(|index| index.matches_field(path) && index.supports(op))
            .map(|b| b.as_ref())
    }

    /// A page of keys ordered by `path`'s index, or `None` if no index over
    /// `path` is registered.
    pub fn ordered_keys(
        &mut self,
        path: &FieldPath,
        cursor: Bound<&Value>,
        reverse: bool,
        limit: usize,
    ) -> Option<Vec<Key>> {
        let index = self.indexes.iter_mut().find(|index| index.matches_field(path))?;
        Some(index.ordered_keys(cursor, reverse, limit))
    }
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize, Clone)]
    struct Doc {
        status: String,
        priority: i64,
    }

    fn doc(status: &str, priority: i64) -> Doc {
        Doc {
            status: status.to_string(),
            priority,
        }
    }

    #[test]
    fn field_index_eq_and_range_lookup() {
        let mut index: FieldIndex<Doc> = FieldIndex::new("by_priority", "priority".into());
        index.add(&Key::from("a"), &doc("open", 1)).unwrap();
        index.add(&Key::from("b"), &doc("open", 5)).unwrap();
        index.add(&Key::from("c"), &doc("closed", 9)).unwrap();

        let eq = index.lookup(Op::Eq, &Value::number(5.0));
        assert_eq!(eq, BTreeSet::from([Key::from("b")]));

        let gte = index.lookup(Op::Gte, &Value::number(5.0));
        assert_eq!(gte, BTreeSet::from([Key::from("b"), Key::from("c")]));
    }

    #[test]
    fn field_index_range_query_both_bounds() {
        let mut index: FieldIndex<Doc> = FieldIndex::new("by_priority", "priority".into());
        for (k, p) in [("a", 1), ("b", 5), ("c", 9), ("d", 15)] {
            index.add(&Key::from(k), &doc("open", p)).unwrap();
        }
        let range = RangeQuery {
            from: Some(Value::number(5.0)),
            from_inclusive: true,
            to: Some(Value::number(9.0)),
            to_inclusive: false,
        };
        assert_eq!(index.range_query(&range), BTreeSet::from([Key::from("b")]));
    }

    #[test]
    fn update_moves_key_between_buckets() {
        let mut index: FieldIndex<Doc> = FieldIndex::new("by_status", "status".into());
        index.add(&Key::from("a"), &doc("open", 1)).unwrap();
        index.update(&Key::from("a"), &doc("open", 1), &doc("closed", 1)).unwrap();
        assert!(index.lookup(Op::Eq, &Value::String("open".into())).is_empty());
        assert_eq!(
            index.lookup(Op::Eq, &Value::String("closed".into())),
            BTreeSet::from([Key::from("a")])
        );
    }

    #[test]
    fn hash_index_does_not_support_range() {
        let mut index: HashIndex<Doc> = HashIndex::new("by_status_hash", "status".into());
        index.add(&Key::from("a"), &doc("open", 1)).unwrap();
        assert!(index.supports(Op::Eq));
        assert!(!index.supports(Op::Gt));
        assert_eq!(
            index.lookup(Op::Eq, &Value::String("open".into())),
            BTreeSet::from([Key::from("a")])
        );
    }

    #[test]
    fn index_set_dispatches_to_matching_field() {
        let mut set: IndexSet<Doc> = IndexSet::new();
        set.register(Box::new(FieldIndex::<Doc>::new("by_priority", "priority".into())));
        set.register(Box::new(HashIndex::<Doc>::new("by_status", "status".into())));

        set.on_insert(&Key::from("a"), &doc("open", 3)).unwrap();
        let priority_path: FieldPath = "priority".into();
        let status_path: FieldPath = "status".into();
        assert!(set.find(&priority_path, Op::Gt).is_some());
        assert!(set.find(&status_path, Op::Gt).is_none());
        assert!(set.find(&status_path, Op::Eq).is_some());
    }

    #[test]
    fn rejects_nan_key() {
        let mut index: FieldIndex<Doc> = FieldIndex::new("by_priority", "priority".into());
        let err = index.insert_key(Value::number(f64::NAN), Key::from("a"));
        assert!(err.is_err());
    }

    #[test]
    fn ordered_keys_respects_limit_and_cursor() {
        let mut index: FieldIndex<Doc> = FieldIndex::new("by_priority", "priority".into());
        for (k, p) in [("a", 1), ("b", 2), ("c", 3), ("d", 4)] {
            index.add(&Key::from(k), &doc("open", p)).unwrap();
        }
        let page = index.ordered_keys(Bound::Unbounded, false, 2);
        assert_eq!(page, vec![Key::from("a"), Key::from("b")]);

        let rest = index.ordered_keys(Bound::Excluded(&Value::number(2.0)), false, 10);
        assert_eq!(rest, vec![Key::from("c"), Key::from("d")]);
    }
}
