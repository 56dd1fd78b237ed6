//! Front-end builders.
//!
//! A thin fluent layer for producing operator trees in code:
//!
//! ```
//! use relq::expr::{Expr, Query};
//! use relq::value::Type;
//!
//! let q = Query::from("Employee")
//!     .filter("e", |e| {
//!         Expr::Member { base: Box::new(e), name: "Age".into(), ty: Type::int32() }
//!             .gt(Expr::constant(18))
//!     })
//!     .count();
//! ```

use crate::expr::{AggregateFunc, ElementKind, Expr, Lambda, QueryOp, SetOpKind};
use crate::value::Type;

/// One-parameter lambda.
pub fn lambda(name: &str, ty: Type, body: impl FnOnce(Expr) -> Expr) -> Lambda {
    let param = Expr::param(name, ty.clone());
    Lambda::new(vec![(name.to_string(), ty)], body(param))
}

/// Two-parameter lambda.
pub fn lambda2(
    (a, a_ty): (&str, Type),
    (b, b_ty): (&str, Type),
    body: impl FnOnce(Expr, Expr) -> Expr,
) -> Lambda {
    let pa = Expr::param(a, a_ty.clone());
    let pb = Expr::param(b, b_ty.clone());
    Lambda::new(
        vec![(a.to_string(), a_ty), (b.to_string(), b_ty)],
        body(pa, pb),
    )
}

/// A sequence-valued operator tree under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    expr: Expr,
}

impl Query {
    pub fn from(entity: &str) -> Query {
        Query::new(Expr::query(QueryOp::Source {
            entity: entity.to_string(),
        }))
    }

    pub fn new(expr: Expr) -> Query {
        Query { expr }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    /// Element type of the sequence.
    pub fn element_type(&self) -> Type {
        self.expr.ty().element().cloned().unwrap_or_else(Type::bool)
    }

    fn lambda(&self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Lambda {
        lambda(name, self.element_type(), f)
    }

    fn then(op: QueryOp) -> Query {
        Query::new(Expr::query(op))
    }

    // ── sequence operators ──

    pub fn filter(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Query {
        let predicate = self.lambda(name, f);
        Query::then(QueryOp::Where {
            source: self.expr,
            predicate,
        })
    }

    pub fn select(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Query {
        let selector = self.lambda(name, f);
        Query::then(QueryOp::Select {
            source: self.expr,
            selector,
        })
    }

    pub fn select_many(self, name: &str, collection: impl FnOnce(Expr) -> Expr) -> Query {
        let collection = self.lambda(name, collection);
        Query::then(QueryOp::SelectMany {
            source: self.expr,
            collection,
            result: None,
        })
    }

    /// `SelectMany` with a result selector over `(outer, inner)`.
    pub fn select_many_with(
        self,
        name: &str,
        collection: impl FnOnce(Expr) -> Expr,
        inner_name: &str,
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let outer_ty = self.element_type();
        let collection = self.lambda(name, collection);
        let inner_ty = collection.body.ty().element().cloned().unwrap_or_else(Type::bool);
        let result = lambda2((name, outer_ty), (inner_name, inner_ty), result);
        Query::then(QueryOp::SelectMany {
            source: self.expr,
            collection,
            result: Some(result),
        })
    }

    pub fn join(
        self,
        inner: Query,
        (o, outer_key): (&str, impl FnOnce(Expr) -> Expr),
        (i, inner_key): (&str, impl FnOnce(Expr) -> Expr),
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let outer_ty = self.element_type();
        let inner_ty = inner.element_type();
        let outer_key = lambda(o, outer_ty.clone(), outer_key);
        let inner_key = lambda(i, inner_ty.clone(), inner_key);
        let result = lambda2((o, outer_ty), (i, inner_ty), result);
        Query::then(QueryOp::Join {
            outer: self.expr,
            inner: inner.expr,
            outer_key,
            inner_key,
            result,
        })
    }

    pub fn group_join(
        self,
        inner: Query,
        (o, outer_key): (&str, impl FnOnce(Expr) -> Expr),
        (i, inner_key): (&str, impl FnOnce(Expr) -> Expr),
        (g, result): (&str, impl FnOnce(Expr, Expr) -> Expr),
    ) -> Query {
        let outer_ty = self.element_type();
        let inner_ty = inner.element_type();
        let outer_key = lambda(o, outer_ty.clone(), outer_key);
        let inner_key = lambda(i, inner_ty.clone(), inner_key);
        let result = lambda2((o, outer_ty), (g, Type::sequence(inner_ty)), result);
        Query::then(QueryOp::GroupJoin {
            outer: self.expr,
            inner: inner.expr,
            outer_key,
            inner_key,
            result,
        })
    }

    pub fn group_by(self, name: &str, key: impl FnOnce(Expr) -> Expr) -> Query {
        let key = self.lambda(name, key);
        Query::then(QueryOp::GroupBy {
            source: self.expr,
            key,
            element: None,
            result: None,
        })
    }

    /// `GroupBy` with explicit element and/or result selectors.
    pub fn group_by_with(self, key: Lambda, element: Option<Lambda>, result: Option<Lambda>) -> Query {
        Query::then(QueryOp::GroupBy {
            source: self.expr,
            key,
            element,
            result,
        })
    }

    fn ordering(self, name: &str, f: impl FnOnce(Expr) -> Expr, descending: bool, then_by: bool) -> Query {
        let key = self.lambda(name, f);
        Query::then(QueryOp::OrderBy {
            source: self.expr,
            key,
            descending,
            then_by,
        })
    }

    pub fn order_by(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering(name, f, false, false)
    }

    pub fn order_by_descending(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering(name, f, true, false)
    }

    pub fn then_by(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering(name, f, false, true)
    }

    pub fn then_by_descending(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Query {
        self.ordering(name, f, true, true)
    }

    pub fn reverse(self) -> Query {
        Query::then(QueryOp::Reverse { source: self.expr })
    }

    pub fn skip(self, count: Expr) -> Query {
        Query::then(QueryOp::Skip {
            source: self.expr,
            count,
        })
    }

    pub fn take(self, count: Expr) -> Query {
        Query::then(QueryOp::Take {
            source: self.expr,
            count,
        })
    }

    pub fn distinct(self) -> Query {
        Query::then(QueryOp::Distinct { source: self.expr })
    }

    pub fn default_if_empty(self) -> Query {
        Query::then(QueryOp::DefaultIfEmpty { source: self.expr })
    }

    fn set_op(self, op: SetOpKind, other: Query) -> Query {
        Query::then(QueryOp::SetOp {
            op,
            left: self.expr,
            right: other.expr,
        })
    }

    pub fn concat(self, other: Query) -> Query {
        self.set_op(SetOpKind::Concat, other)
    }

    pub fn union(self, other: Query) -> Query {
        self.set_op(SetOpKind::Union, other)
    }

    pub fn except(self, other: Query) -> Query {
        self.set_op(SetOpKind::Except, other)
    }

    pub fn intersect(self, other: Query) -> Query {
        self.set_op(SetOpKind::Intersect, other)
    }

    pub fn zip(
        self,
        other: Query,
        (a, b): (&str, &str),
        result: impl FnOnce(Expr, Expr) -> Expr,
    ) -> Query {
        let result = lambda2((a, self.element_type()), (b, other.element_type()), result);
        Query::then(QueryOp::Zip {
            left: self.expr,
            right: other.expr,
            result,
        })
    }

    pub fn of_type(self, entity: &str) -> Query {
        Query::then(QueryOp::OfType {
            source: self.expr,
            entity: entity.to_string(),
        })
    }

    // ── terminal operators ──

    fn aggregate(self, func: AggregateFunc, selector: Option<Lambda>) -> Expr {
        Expr::query(QueryOp::Aggregate {
            func,
            source: self.expr,
            selector,
        })
    }

    pub fn count(self) -> Expr {
        self.aggregate(AggregateFunc::Count, None)
    }

    /// `Count(predicate)`, expressed as `Where(predicate).Count()`.
    pub fn count_where(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        self.filter(name, f).count()
    }

    pub fn long_count(self) -> Expr {
        self.aggregate(AggregateFunc::LongCount, None)
    }

    pub fn sum(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        let selector = self.lambda(name, f);
        self.aggregate(AggregateFunc::Sum, Some(selector))
    }

    pub fn average(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        let selector = self.lambda(name, f);
        self.aggregate(AggregateFunc::Average, Some(selector))
    }

    pub fn min(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        let selector = self.lambda(name, f);
        self.aggregate(AggregateFunc::Min, Some(selector))
    }

    pub fn max(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        let selector = self.lambda(name, f);
        self.aggregate(AggregateFunc::Max, Some(selector))
    }

    pub fn any(self) -> Expr {
        Expr::query(QueryOp::Any {
            source: self.expr,
            predicate: None,
        })
    }

    pub fn any_where(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        let predicate = self.lambda(name, f);
        Expr::query(QueryOp::Any {
            source: self.expr,
            predicate: Some(predicate),
        })
    }

    pub fn all(self, name: &str, f: impl FnOnce(Expr) -> Expr) -> Expr {
        let predicate = self.lambda(name, f);
        Expr::query(QueryOp::All {
            source: self.expr,
            predicate,
        })
    }

    pub fn contains(self, item: Expr) -> Expr {
        Expr::query(QueryOp::Contains {
            source: self.expr,
            item,
        })
    }

    pub fn element(self, kind: ElementKind) -> Expr {
        Expr::query(QueryOp::Element {
            kind,
            source: self.expr,
            predicate: None,
            index: None,
        })
    }

    pub fn first(self) -> Expr {
        self.element(ElementKind::First)
    }

    pub fn first_or_default(self) -> Expr {
        self.element(ElementKind::FirstOrDefault)
    }

    pub fn single(self) -> Expr {
        self.element(ElementKind::Single)
    }

    pub fn single_or_default(self) -> Expr {
        self.element(ElementKind::SingleOrDefault)
    }

    pub fn last(self) -> Expr {
        self.element(ElementKind::Last)
    }

    pub fn last_or_default(self) -> Expr {
        self.element(ElementKind::LastOrDefault)
    }

    pub fn element_at(self, index: Expr, or_default: bool) -> Expr {
        let kind = if or_default {
            ElementKind::ElementAtOrDefault
        } else {
            ElementKind::ElementAt
        };
        Expr::query(QueryOp::Element {
            kind,
            source: self.expr,
            predicate: None,
            index: Some(index),
        })
    }
}

impl From<Query> for Expr {
    fn from(q: Query) -> Expr {
        q.into_expr()
    }
}
