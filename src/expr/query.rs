//! Query operator tags.
//!
//! The front end produces these directly; the compiler never inspects
//! method metadata, only the tag and its operands.

use std::collections::HashSet;

use crate::error::QueryError;
use crate::expr::{Expr, Lambda};
use crate::value::{ScalarType, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFunc {
    Count,
    LongCount,
    Sum,
    Average,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "Count",
            AggregateFunc::LongCount => "LongCount",
            AggregateFunc::Sum => "Sum",
            AggregateFunc::Average => "Average",
            AggregateFunc::Min => "Min",
            AggregateFunc::Max => "Max",
        }
    }

    /// Result type given the aggregated element type.
    pub fn result_type(self, input: &Type) -> Type {
        match self {
            AggregateFunc::Count => Type::int32(),
            AggregateFunc::LongCount => Type::int64(),
            AggregateFunc::Sum => input.clone(),
            AggregateFunc::Average => Type::Scalar {
                scalar: ScalarType::Float64,
                nullable: input.is_nullable(),
            },
            AggregateFunc::Min | AggregateFunc::Max => input.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    First,
    FirstOrDefault,
    Single,
    SingleOrDefault,
    Last,
    LastOrDefault,
    ElementAt,
    ElementAtOrDefault,
}

impl ElementKind {
    pub fn or_default(self) -> bool {
        matches!(
            self,
            ElementKind::FirstOrDefault
                | ElementKind::SingleOrDefault
                | ElementKind::LastOrDefault
                | ElementKind::ElementAtOrDefault
        )
    }

    pub fn is_single(self) -> bool {
        matches!(self, ElementKind::Single | ElementKind::SingleOrDefault)
    }

    pub fn is_last(self) -> bool {
        matches!(self, ElementKind::Last | ElementKind::LastOrDefault)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    Concat,
    Union,
    Except,
    Intersect,
}

/// A query operator call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueryOp {
    Source {
        entity: String,
    },
    Where {
        source: Expr,
        predicate: Lambda,
    },
    Select {
        source: Expr,
        selector: Lambda,
    },
    SelectMany {
        source: Expr,
        collection: Lambda,
        result: Option<Lambda>,
    },
    Join {
        outer: Expr,
        inner: Expr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    /// `result` receives the outer element and the sequence of matches.
    GroupJoin {
        outer: Expr,
        inner: Expr,
        outer_key: Lambda,
        inner_key: Lambda,
        result: Lambda,
    },
    GroupBy {
        source: Expr,
        key: Lambda,
        element: Option<Lambda>,
        result: Option<Lambda>,
    },
    /// `then_by` continues an existing ordering instead of replacing it.
    OrderBy {
        source: Expr,
        key: Lambda,
        descending: bool,
        then_by: bool,
    },
    Reverse {
        source: Expr,
    },
    Skip {
        source: Expr,
        count: Expr,
    },
    Take {
        source: Expr,
        count: Expr,
    },
    Distinct {
        source: Expr,
    },
    DefaultIfEmpty {
        source: Expr,
    },
    SetOp {
        op: SetOpKind,
        left: Expr,
        right: Expr,
    },
    Zip {
        left: Expr,
        right: Expr,
        result: Lambda,
    },
    OfType {
        source: Expr,
        entity: String,
    },
    Aggregate {
        func: AggregateFunc,
        source: Expr,
        selector: Option<Lambda>,
    },
    Any {
        source: Expr,
        predicate: Option<Lambda>,
    },
    All {
        source: Expr,
        predicate: Lambda,
    },
    Contains {
        source: Expr,
        item: Expr,
    },
    Element {
        kind: ElementKind,
        source: Expr,
        predicate: Option<Lambda>,
        index: Option<Expr>,
    },
}

impl QueryOp {
    pub fn name(&self) -> &'static str {
        match self {
            QueryOp::Source { .. } => "Source",
            QueryOp::Where { .. } => "Where",
            QueryOp::Select { .. } => "Select",
            QueryOp::SelectMany { .. } => "SelectMany",
            QueryOp::Join { .. } => "Join",
            QueryOp::GroupJoin { .. } => "GroupJoin",
            QueryOp::GroupBy { .. } => "GroupBy",
            QueryOp::OrderBy { then_by: false, .. } => "OrderBy",
            QueryOp::OrderBy { then_by: true, .. } => "ThenBy",
            QueryOp::Reverse { .. } => "Reverse",
            QueryOp::Skip { .. } => "Skip",
            QueryOp::Take { .. } => "Take",
            QueryOp::Distinct { .. } => "Distinct",
            QueryOp::DefaultIfEmpty { .. } => "DefaultIfEmpty",
            QueryOp::SetOp { .. } => "SetOp",
            QueryOp::Zip { .. } => "Zip",
            QueryOp::OfType { .. } => "OfType",
            QueryOp::Aggregate { func, .. } => func.name(),
            QueryOp::Any { .. } => "Any",
            QueryOp::All { .. } => "All",
            QueryOp::Contains { .. } => "Contains",
            QueryOp::Element { .. } => "Element",
        }
    }

    /// The primary input sequence, if the operator has one.
    pub fn source(&self) -> Option<&Expr> {
        match self {
            QueryOp::Source { .. } => None,
            QueryOp::Join { outer, .. } | QueryOp::GroupJoin { outer, .. } => Some(outer),
            QueryOp::SetOp { left, .. } | QueryOp::Zip { left, .. } => Some(left),
            QueryOp::Where { source, .. }
            | QueryOp::Select { source, .. }
            | QueryOp::SelectMany { source, .. }
            | QueryOp::GroupBy { source, .. }
            | QueryOp::OrderBy { source, .. }
            | QueryOp::Reverse { source }
            | QueryOp::Skip { source, .. }
            | QueryOp::Take { source, .. }
            | QueryOp::Distinct { source }
            | QueryOp::DefaultIfEmpty { source }
            | QueryOp::OfType { source, .. }
            | QueryOp::Aggregate { source, .. }
            | QueryOp::Any { source, .. }
            | QueryOp::All { source, .. }
            | QueryOp::Contains { source, .. }
            | QueryOp::Element { source, .. } => Some(source),
        }
    }

    /// Whether the operator yields a single value rather than a sequence.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryOp::Aggregate { .. }
                | QueryOp::Any { .. }
                | QueryOp::All { .. }
                | QueryOp::Contains { .. }
                | QueryOp::Element { .. }
        )
    }

    /// Static result type.
    pub fn ty(&self) -> Type {
        let element_of = |e: &Expr| e.ty().element().cloned().unwrap_or_else(Type::bool);
        match self {
            QueryOp::Source { entity } => Type::sequence(Type::Entity(entity.clone())),
            QueryOp::Where { source, .. }
            | QueryOp::OrderBy { source, .. }
            | QueryOp::Reverse { source }
            | QueryOp::Skip { source, .. }
            | QueryOp::Take { source, .. }
            | QueryOp::Distinct { source }
            | QueryOp::DefaultIfEmpty { source } => Type::sequence(element_of(source)),
            QueryOp::Select { selector, .. } => Type::sequence(selector.body.ty()),
            QueryOp::SelectMany {
                collection, result, ..
            } => match result {
                Some(r) => Type::sequence(r.body.ty()),
                None => Type::sequence(element_of(&collection.body)),
            },
            QueryOp::Join { result, .. }
            | QueryOp::GroupJoin { result, .. }
            | QueryOp::Zip { result, .. } => Type::sequence(result.body.ty()),
            QueryOp::GroupBy {
                source,
                key,
                element,
                result,
            } => match result {
                Some(r) => Type::sequence(r.body.ty()),
                None => Type::sequence(Type::Grouping {
                    key: Box::new(key.body.ty()),
                    element: Box::new(
                        element
                            .as_ref()
                            .map(|e| e.body.ty())
                            .unwrap_or_else(|| element_of(source)),
                    ),
                }),
            },
            QueryOp::SetOp { left, .. } => Type::sequence(element_of(left)),
            QueryOp::OfType { entity, .. } => Type::sequence(Type::Entity(entity.clone())),
            QueryOp::Aggregate {
                func,
                source,
                selector,
            } => {
                let input = selector
                    .as_ref()
                    .map(|s| s.body.ty())
                    .unwrap_or_else(|| element_of(source));
                func.result_type(&input)
            }
            QueryOp::Any { .. } | QueryOp::All { .. } | QueryOp::Contains { .. } => Type::bool(),
            QueryOp::Element { source, .. } => element_of(source),
        }
    }

    fn lambdas(&self) -> Vec<&Lambda> {
        match self {
            QueryOp::Source { .. }
            | QueryOp::Reverse { .. }
            | QueryOp::Skip { .. }
            | QueryOp::Take { .. }
            | QueryOp::Distinct { .. }
            | QueryOp::DefaultIfEmpty { .. }
            | QueryOp::SetOp { .. }
            | QueryOp::OfType { .. }
            | QueryOp::Contains { .. } => Vec::new(),
            QueryOp::Where { predicate, .. } | QueryOp::All { predicate, .. } => vec![predicate],
            QueryOp::Select { selector, .. } => vec![selector],
            QueryOp::SelectMany {
                collection, result, ..
            } => std::iter::once(collection).chain(result.as_ref()).collect(),
            QueryOp::Join {
                outer_key,
                inner_key,
                result,
                ..
            }
            | QueryOp::GroupJoin {
                outer_key,
                inner_key,
                result,
                ..
            } => vec![outer_key, inner_key, result],
            QueryOp::GroupBy {
                key,
                element,
                result,
                ..
            } => std::iter::once(key)
                .chain(element.as_ref())
                .chain(result.as_ref())
                .collect(),
            QueryOp::OrderBy { key, .. } => vec![key],
            QueryOp::Zip { result, .. } => vec![result],
            QueryOp::Aggregate { selector, .. } => selector.iter().collect(),
            QueryOp::Any { predicate, .. } | QueryOp::Element { predicate, .. } => {
                predicate.iter().collect()
            }
        }
    }

    fn operands(&self) -> Vec<&Expr> {
        match self {
            QueryOp::Source { .. } => Vec::new(),
            QueryOp::Join { outer, inner, .. } | QueryOp::GroupJoin { outer, inner, .. } => {
                vec![outer, inner]
            }
            QueryOp::SetOp { left, right, .. } | QueryOp::Zip { left, right, .. } => {
                vec![left, right]
            }
            QueryOp::Skip { source, count } | QueryOp::Take { source, count } => {
                vec![source, count]
            }
            QueryOp::Contains { source, item } => vec![source, item],
            QueryOp::Element { source, index, .. } => {
                std::iter::once(source).chain(index.as_ref()).collect()
            }
            other => other.source().into_iter().collect(),
        }
    }

    /// Operand expressions followed by lambda bodies.
    pub fn children(&self) -> Vec<&Expr> {
        let mut out = self.operands();
        out.extend(self.lambdas().into_iter().map(|l| &l.body));
        out
    }

    /// Rebuild with `f` applied to every operand and lambda body.
    pub fn map_children(
        self,
        f: &mut dyn FnMut(Expr) -> Result<Expr, QueryError>,
    ) -> Result<QueryOp, QueryError> {
        self.rebuild(f, &mut |lambda, f| {
            Ok(Lambda {
                params: lambda.params,
                body: f(lambda.body)?,
            })
        })
    }

    pub(crate) fn substitute(self, bindings: &[(&str, &Expr)]) -> Result<QueryOp, QueryError> {
        self.rebuild(&mut |e| e.substitute(bindings), &mut |lambda, _| {
            lambda.substitute_shadowed(bindings)
        })
    }

    pub(crate) fn collect_free(&self, bound: &mut Vec<String>, out: &mut HashSet<String>) {
        for operand in self.operands() {
            operand.collect_free(bound, out);
        }
        for lambda in self.lambdas() {
            let depth = bound.len();
            bound.extend(lambda.params.iter().map(|(n, _)| n.clone()));
            lambda.body.collect_free(bound, out);
            bound.truncate(depth);
        }
    }

    fn rebuild(
        self,
        f: &mut dyn FnMut(Expr) -> Result<Expr, QueryError>,
        g: &mut dyn FnMut(
            Lambda,
            &mut dyn FnMut(Expr) -> Result<Expr, QueryError>,
        ) -> Result<Lambda, QueryError>,
    ) -> Result<QueryOp, QueryError> {
        Ok(match self {
            QueryOp::Source { entity } => QueryOp::Source { entity },
            QueryOp::Where { source, predicate } => QueryOp::Where {
                source: f(source)?,
                predicate: g(predicate, f)?,
            },
            QueryOp::Select { source, selector } => QueryOp::Select {
                source: f(source)?,
                selector: g(selector, f)?,
            },
            QueryOp::SelectMany {
                source,
                collection,
                result,
            } => QueryOp::SelectMany {
                source: f(source)?,
                collection: g(collection, f)?,
                result: result.map(|r| g(r, f)).transpose()?,
            },
            QueryOp::Join {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => QueryOp::Join {
                outer: f(outer)?,
                inner: f(inner)?,
                outer_key: g(outer_key, f)?,
                inner_key: g(inner_key, f)?,
                result: g(result, f)?,
            },
            QueryOp::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
                result,
            } => QueryOp::GroupJoin {
                outer: f(outer)?,
                inner: f(inner)?,
                outer_key: g(outer_key, f)?,
                inner_key: g(inner_key, f)?,
                result: g(result, f)?,
            },
            QueryOp::GroupBy {
                source,
                key,
                element,
                result,
            } => QueryOp::GroupBy {
                source: f(source)?,
                key: g(key, f)?,
                element: element.map(|e| g(e, f)).transpose()?,
                result: result.map(|r| g(r, f)).transpose()?,
            },
            QueryOp::OrderBy {
                source,
                key,
                descending,
                then_by,
            } => QueryOp::OrderBy {
                source: f(source)?,
                key: g(key, f)?,
                descending,
                then_by,
            },
            QueryOp::Reverse { source } => QueryOp::Reverse { source: f(source)? },
            QueryOp::Skip { source, count } => QueryOp::Skip {
                source: f(source)?,
                count: f(count)?,
            },
            QueryOp::Take { source, count } => QueryOp::Take {
                source: f(source)?,
                count: f(count)?,
            },
            QueryOp::Distinct { source } => QueryOp::Distinct { source: f(source)? },
            QueryOp::DefaultIfEmpty { source } => QueryOp::DefaultIfEmpty { source: f(source)? },
            QueryOp::SetOp { op, left, right } => QueryOp::SetOp {
                op,
                left: f(left)?,
                right: f(right)?,
            },
            QueryOp::Zip {
                left,
                right,
                result,
            } => QueryOp::Zip {
                left: f(left)?,
                right: f(right)?,
                result: g(result, f)?,
            },
            QueryOp::OfType { source, entity } => QueryOp::OfType {
                source: f(source)?,
                entity,
            },
            QueryOp::Aggregate {
                func,
                source,
                selector,
            } => QueryOp::Aggregate {
                func,
                source: f(source)?,
                selector: selector.map(|s| g(s, f)).transpose()?,
            },
            QueryOp::Any { source, predicate } => QueryOp::Any {
                source: f(source)?,
                predicate: predicate.map(|p| g(p, f)).transpose()?,
            },
            QueryOp::All { source, predicate } => QueryOp::All {
                source: f(source)?,
                predicate: g(predicate, f)?,
            },
            QueryOp::Contains { source, item } => QueryOp::Contains {
                source: f(source)?,
                item: f(item)?,
            },
            QueryOp::Element {
                kind,
                source,
                predicate,
                index,
            } => QueryOp::Element {
                kind,
                source: f(source)?,
                predicate: predicate.map(|p| g(p, f)).transpose()?,
                index: index.map(&mut *f).transpose()?,
            },
        })
    }
}
