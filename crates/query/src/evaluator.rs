//! Index-assisted evaluator for the expression IR (`spec.md` §4.4).
//!
//! Grounded on the teacher's `database::query::index_range` compound-bound
//! narrowing (multiple `gt/gte/lt/lte` clauses on one field collapse to a
//! single `Interval`) and `common::bounds` tightest-bound reduction, scaled
//! down from the teacher's cross-table query planner to a single
//! collection's index set.

use std::collections::BTreeSet;

use common::bounds::{
    tightest_lower,
    tightest_upper,
    LowerBound,
    UpperBound,
};
use indexing::{
    Index,
    IndexSet,
    Op,
    RangeQuery,
};
use value::{
    FieldPath,
    Key,
    Value,
};

use crate::expr::{
    Expr,
    Func,
};

/// The result of attempting to satisfy an expression using indexes alone.
/// `matching_keys` is meaningful only when `can_optimize` is true; an AND
/// with some unoptimized children returns a conservative superset that the
/// caller must still post-filter with [`matches`].
#[derive(Clone, Debug)]
pub struct OptimizationResult {
    pub can_optimize: bool,
    pub matching_keys: BTreeSet<Key>,
}

impl OptimizationResult {
    fn unoptimized() -> Self {
        Self {
            can_optimize: false,
            matching_keys: BTreeSet::new(),
        }
    }

    fn optimized(matching_keys: BTreeSet<Key>) -> Self {
        Self {
            can_optimize: true,
            matching_keys,
        }
    }
}

fn comparison_op(func: Func) -> Option<Op> {
    match func {
        Func::Eq => Some(Op::Eq),
        Func::Gt => Some(Op::Gt),
        Func::Gte => Some(Op::Gte),
        Func::Lt => Some(Op::Lt),
        Func::Lte => Some(Op::Lte),
        _ => None,
    }
}

/// Normalizes a binary comparison's operands to `(path, op, literal)`,
/// flipping the operator if the field reference is the right-hand operand.
fn as_leaf(func: Func, args: &[Expr]) -> Option<(FieldPath, Func, Value)> {
    let [a, b] = args else { return None };
    match (a, b) {
        (Expr::Ref(path), Expr::Val(v)) => Some((path.clone(), func, v.clone())),
        (Expr::Val(v), Expr::Ref(path)) => Some((path.clone(), func.flip(), v.clone())),
        _ => None,
    }
}

/// Evaluates `expr` against `indexes`, trying to avoid a full scan.
pub fn evaluate<T>(expr: &Expr, indexes: &IndexSet<T>) -> OptimizationResult {
    match expr {
        Expr::Func(Func::And, children) => evaluate_and(children, indexes),
        Expr::Func(Func::Or, children) => evaluate_or(children, indexes),
        Expr::Func(Func::In, args) => evaluate_in(args, indexes),
        Expr::Func(func, args) if comparison_op(*func).is_some() => {
            evaluate_leaf(*func, args, indexes)
        },
        _ => OptimizationResult::unoptimized(),
    }
}

fn evaluate_leaf<T>(func: Func, args: &[Expr], indexes: &IndexSet<T>) -> OptimizationResult {
    let Some((path, func, literal)) = as_leaf(func, args) else {
        return OptimizationResult::unoptimized();
    };
    let Some(op) = comparison_op(func) else {
        return OptimizationResult::unoptimized();
    };
    match indexes.find(&path, op) {
        Some(index) => OptimizationResult::optimized(index.lookup(op, &literal)),
        None => OptimizationResult::unoptimized(),
    }
}

fn evaluate_in<T>(args: &[Expr], indexes: &IndexSet<T>) -> OptimizationResult {
    let [Expr::Ref(path), Expr::Val(Value::Array(values))] = args else {
        return OptimizationResult::unoptimized();
    };
    if let Some(index) = indexes.find(path, Op::In) {
        return OptimizationResult::optimized(index.lookup_in(values));
    }
    // No index supports `in` directly: fall back to the union of `eq`
    // lookups, still requiring an index that at least supports `eq`.
    let Some(index) = indexes.find(path, Op::Eq) else {
        return OptimizationResult::unoptimized();
    };
    let keys = values
        .iter()
        .flat_map(|v| index.lookup(Op::Eq, v))
        .collect();
    OptimizationResult::optimized(keys)
}

/// A normalized range leaf within an AND, used for compound-bound grouping.
struct RangeLeaf {
    path: FieldPath,
    func: Func,
    literal: Value,
}

fn as_range_leaf(expr: &Expr) -> Option<RangeLeaf> {
    let Expr::Func(func, args) = expr else {
        return None;
    };
    if !func.is_range() {
        return None;
    }
    let (path, func, literal) = as_leaf(*func, args)?;
    Some(RangeLeaf { path, func, literal })
}

fn evaluate_and<T>(children: &[Expr], indexes: &IndexSet<T>) -> OptimizationResult {
    let mut by_path: std::collections::HashMap<FieldPath, Vec<&RangeLeaf>> = Default::default();
    let mut range_leaves = Vec::new();
    for child in children {
        if let Some(leaf) = as_range_leaf(child) {
            range_leaves.push(leaf);
        }
    }
    for leaf in &range_leaves {
        by_path.entry(leaf.path.clone()).or_default().push(leaf);
    }

    let mut optimized_keysets: Vec<BTreeSet<Key>> = Vec::new();
    let mut compound_handled_paths: BTreeSet<FieldPath> = BTreeSet::new();

    for (path, leaves) in &by_path {
        if leaves.len() < 2 {
            continue;
        }
        if let Some(keys) = compound_range_query(path, leaves, indexes) {
            optimized_keysets.push(keys);
            compound_handled_paths.insert(path.clone());
        }
    }

    for child in children {
        if let Some(leaf) = as_range_leaf(child) {
            if compound_handled_paths.contains(&leaf.path) {
                continue;
            }
        }
        let result = evaluate(child, indexes);
        if result.can_optimize {
            optimized_keysets.push(result.matching_keys);
        }
    }

    if optimized_keysets.is_empty() {
        return OptimizationResult::unoptimized();
    }
    let mut iter = optimized_keysets.into_iter();
    let mut intersection = iter.next().expect("non-empty");
    for keys in iter {
        intersection = intersection.intersection(&keys).cloned().collect();
    }
    OptimizationResult::optimized(intersection)
}

fn compound_range_query<T>(
    path: &FieldPath,
    leaves: &[&RangeLeaf],
    indexes: &IndexSet<T>,
) -> Option<BTreeSet<Key>> {
    use std::ops::Bound;

    let mut lower = LowerBound(Bound::Unbounded);
    let mut upper = UpperBound(Bound::Unbounded);
    for leaf in leaves {
        match leaf.func {
            Func::Gt => {
                lower = tightest_lower(&lower, &LowerBound(Bound::Excluded(leaf.literal.clone())))
            },
            Func::Gte => {
                lower = tightest_lower(&lower, &LowerBound(Bound::Included(leaf.literal.clone())))
            },
            Func::Lt => {
                upper = tightest_upper(&upper, &UpperBound(Bound::Excluded(leaf.literal.clone())))
            },
            Func::Lte => {
                upper = tightest_upper(&upper, &UpperBound(Bound::Included(leaf.literal.clone())))
            },
            _ => unreachable!("as_range_leaf only returns range funcs"),
        }
    }
    let (from, from_inclusive) = match lower.0 {
        Bound::Included(v) => (Some(v), true),
        Bound::Excluded(v) => (Some(v), false),
        Bound::Unbounded => (None, false),
    };
    let (to, to_inclusive) = match upper.0 {
        Bound::Included(v) => (Some(v), true),
        Bound::Excluded(v) => (Some(v), false),
        Bound::Unbounded => (None, false),
    };
    let index = indexes.find(path, Op::Gte)?;
    Some(index.range_query(&RangeQuery {
        from,
        from_inclusive,
        to,
        to_inclusive,
    }))
}

fn evaluate_or<T>(children: &[Expr], indexes: &IndexSet<T>) -> OptimizationResult {
    if children.is_empty() {
        return OptimizationResult::unoptimized();
    }
    let mut union = BTreeSet::new();
    for child in children {
        let result = evaluate(child, indexes);
        if !result.can_optimize {
            return OptimizationResult::unoptimized();
        }
        union.extend(result.matching_keys);
    }
    OptimizationResult::optimized(union)
}

#[cfg(test)]
mod tests {
    use indexing::FieldIndex;
    use serde::Serialize;
    use value::Key;

    use super::*;

    #[derive(Serialize, Clone)]
    struct Doc {
        age: i64,
    }

    fn set_with_age_index() -> IndexSet<Doc> {
        let mut set = IndexSet::new();
        set.register(Box::new(FieldIndex::<Doc>::new("by_age", "age".into())));
        set
    }

    #[test]
    fn compound_range_reduces_to_single_range_query() {
        let mut set = set_with_age_index();
        for (k, age) in [("1", 3), ("2", 7), ("3", 9), ("4", 11)] {
            set.on_insert(&Key::from(k), &Doc { age }).unwrap();
        }
        let expr = Expr::and(vec![
            Expr::gt(Expr::field("age"), Expr::val(Value::number(5.0))),
            Expr::lt(Expr::field("age"), Expr::val(Value::number(10.0))),
        ]);
        let result = evaluate(&expr, &set);
        assert!(result.can_optimize);
        assert_eq!(
            result.matching_keys,
            BTreeSet::from([Key::from("2"), Key::from("3")])
        );
    }

    #[test]
    fn flips_operator_when_ref_is_on_the_right() {
        let mut set = set_with_age_index();
        set.on_insert(&Key::from("1"), &Doc { age: 3 }).unwrap();
        set.on_insert(&Key::from("2"), &Doc { age: 11 }).unwrap();
        let expr = Expr::gt(Expr::val(Value::number(5.0)), Expr::field("age"));
        let result = evaluate(&expr, &set);
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys, BTreeSet::from([Key::from("1")]));
    }

    #[test]
    fn or_is_unoptimized_if_any_branch_cannot_use_an_index() {
        let set = set_with_age_index();
        let expr = Expr::or(vec![
            Expr::eq(Expr::field("age"), Expr::val(Value::number(1.0))),
            Expr::eq(Expr::field("name"), Expr::val(Value::String("a".into()))),
        ]);
        let result = evaluate(&expr, &set);
        assert!(!result.can_optimize);
    }

    #[test]
    fn and_optimizes_if_at_least_one_child_does() {
        let mut set = set_with_age_index();
        set.on_insert(&Key::from("1"), &Doc { age: 3 }).unwrap();
        set.on_insert(&Key::from("2"), &Doc { age: 9 }).unwrap();
        let expr = Expr::and(vec![
            Expr::eq(Expr::field("age"), Expr::val(Value::number(9.0))),
            Expr::eq(Expr::field("name"), Expr::val(Value::String("unindexed".into()))),
        ]);
        let result = evaluate(&expr, &set);
        // The age child optimizes; name has no index. AND still optimizes,
        // conservatively, on the age child's keys alone.
        assert!(result.can_optimize);
        assert_eq!(result.matching_keys, BTreeSet::from([Key::from("2")]));
    }
}
