//! Filter expression IR (`spec.md` §4.4, component C4).
//!
//! Mirrors the teacher's `common::query` expression tree shape (leaf
//! comparisons composed with `and`/`or`) but scoped to what a single
//! collection's `where` filter needs, rather than the teacher's full
//! cross-table query language.

use value::{
    FieldPath,
    Value,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    And,
    Or,
}

impl Func {
    /// The operator that holds when operands are swapped, e.g. `5 < age` is
    /// `age > 5`. `Eq`/`And`/`Or` are symmetric under swap.
    pub fn flip(self) -> Self {
        match self {
            Func::Gt => Func::Lt,
            Func::Gte => Func::Lte,
            Func::Lt => Func::Gt,
            Func::Lte => Func::Gte,
            other => other,
        }
    }

    pub fn is_range(self) -> bool {
        matches!(self, Func::Gt | Func::Gte | Func::Lt | Func::Lte)
    }
}

/// An expression tree node. `ref` is spelled `Ref` since `ref` is a
/// reserved word.
#[derive(Clone, Debug)]
pub enum Expr {
    Ref(FieldPath),
    Val(Value),
    Func(Func, Vec<Expr>),
}

impl Expr {
    pub fn field(path: impl Into<FieldPath>) -> Self {
        Expr::Ref(path.into())
    }

    pub fn val(v: Value) -> Self {
        Expr::Val(v)
    }

    pub fn eq(a: Expr, b: Expr) -> Self {
        Expr::Func(Func::Eq, vec![a, b])
    }

    pub fn gt(a: Expr, b: Expr) -> Self {
        Expr::Func(Func::Gt, vec![a, b])
    }

    pub fn gte(a: Expr, b: Expr) -> Self {
        Expr::Func(Func::Gte, vec![a, b])
    }

    pub fn lt(a: Expr, b: Expr) -> Self {
        Expr::Func(Func::Lt, vec![a, b])
    }

    pub fn lte(a: Expr, b: Expr) -> Self {
        Expr::Func(Func::Lte, vec![a, b])
    }

    pub fn in_(field: Expr, values: Vec<Value>) -> Self {
        Expr::Func(Func::In, vec![field, Expr::Val(Value::Array(values))])
    }

    pub fn and(children: Vec<Expr>) -> Self {
        Expr::Func(Func::And, children)
    }

    pub fn or(children: Vec<Expr>) -> Self {
        Expr::Func(Func::Or, children)
    }
}
