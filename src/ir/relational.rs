//! A select together with how its rows are consumed.

use crate::error::QueryError;
use crate::expr::{AggregateFunc, ElementKind};
use crate::ir::SelectExpr;
use crate::value::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Every row is an element of the result.
    Sequence,
    /// One element picked by an element operator.
    Element(ElementKind),
    /// One value in one column; the aggregate (if any) decides what an
    /// empty or null result means.
    Scalar(Option<AggregateFunc>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationalQuery {
    pub select: SelectExpr,
    pub kind: QueryKind,
    /// An empty sequence yields one default element.
    pub default_if_empty: bool,
    /// Static type of one row.
    pub row_type: Type,
}

impl RelationalQuery {
    pub fn new(select: SelectExpr, kind: QueryKind) -> Result<RelationalQuery, QueryError> {
        let row_type = select.projection.ty()?;
        Ok(RelationalQuery {
            select,
            kind,
            default_if_empty: false,
            row_type,
        })
    }

    pub fn sequence(select: SelectExpr) -> Result<RelationalQuery, QueryError> {
        RelationalQuery::new(select, QueryKind::Sequence)
    }

    /// Scalar queries carry their result type explicitly; the projection
    /// type of an aggregate may be wider than the host result.
    pub fn scalar(select: SelectExpr, func: Option<AggregateFunc>, ty: Type) -> RelationalQuery {
        RelationalQuery {
            select,
            kind: QueryKind::Scalar(func),
            default_if_empty: false,
            row_type: ty,
        }
    }

    pub fn ty(&self) -> Type {
        match self.kind {
            QueryKind::Sequence => Type::sequence(self.row_type.clone()),
            QueryKind::Element(_) | QueryKind::Scalar(_) => self.row_type.clone(),
        }
    }

    pub fn is_sequence(&self) -> bool {
        self.kind == QueryKind::Sequence
    }
}
