//! Direct boolean evaluation of the expression IR against one record.
//!
//! [`crate::evaluator::evaluate`] only ever narrows a candidate key set using
//! indexes; it can return a conservative superset (an unoptimized AND child,
//! or no index at all). Filtered subscriptions (`spec.md` §4.10) need an
//! exact per-record membership test to compute enter/leave/update
//! transitions and to post-filter that superset, which is what this module
//! provides.

use value::{
    ObjectIdAllocator,
    Value,
};

use crate::expr::{
    Expr,
    Func,
};

/// Evaluates `expr` against `record` (already projected to JSON), returning
/// whether the record satisfies the filter. Unknown/malformed shapes (e.g. a
/// non-boolean top-level result) evaluate to `false` rather than erroring,
/// matching the spec's "unknown expression shapes: canOptimize=false" stance
/// applied to exact evaluation.
pub fn matches(expr: &Expr, record: &serde_json::Value) -> bool {
    let mut objects = ObjectIdAllocator::new();
    eval_bool(expr, record, &mut objects)
}

fn eval_bool(expr: &Expr, record: &serde_json::Value, objects: &mut ObjectIdAllocator<String>) -> bool {
    let Expr::Func(func, args) = expr else {
        return false;
    };
    match func {
        Func::And => args.iter().all(|a| eval_bool(a, record, objects)),
        Func::Or => args.iter().any(|a| eval_bool(a, record, objects)),
        Func::In => {
            let [field, Expr::Val(Value::Array(values))] = args.as_slice() else {
                return false;
            };
            let Some(v) = resolve(field, record, objects) else {
                return false;
            };
            values.contains(&v)
        },
        Func::Eq | Func::Gt | Func::Gte | Func::Lt | Func::Lte => {
            let [a, b] = args.as_slice() else {
                return false;
            };
            let (Some(va), Some(vb)) = (resolve(a, record, objects), resolve(b, record, objects))
            else {
                return false;
            };
            let ordering = va.cmp(&vb);
            match func {
                Func::Eq => ordering.is_eq(),
                Func::Gt => ordering.is_gt(),
                Func::Gte => ordering.is_ge(),
                Func::Lt => ordering.is_lt(),
                Func::Lte => ordering.is_le(),
                _ => unreachable!(),
            }
        },
    }
}

fn resolve(
    expr: &Expr,
    record: &serde_json::Value,
    objects: &mut ObjectIdAllocator<String>,
) -> Option<Value> {
    match expr {
        Expr::Val(v) => Some(v.clone()),
        Expr::Ref(path) => {
            let field = path.get(record)?;
            Some(value::from_json(field, objects))
        },
        Expr::Func(..) => None,
    }
}
