//! GROUP BY in its two forms.
//!
//! [`GroupByResult`] is what a group-by lambda parameter binds to while
//! the grouped select is still open: aggregates over it collapse into SQL
//! aggregate functions of that select. Whatever survives composition is
//! turned into a [`GroupingExpr`], where the group's elements are a
//! correlated query over a fresh copy of the source filtered by key.

use crate::error::QueryError;
use crate::expr::Expr;
use crate::ir::projection::sql_leaves;
use crate::ir::{Projection, RelationalQuery, SelectExpr, SqlExpr, TableIds};
use crate::value::Type;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupByResult {
    /// The ungrouped source. It shares table ids with the grouped select.
    pub select: Box<SelectExpr>,
    /// Key, bound against the source row.
    pub key: Expr,
    /// Element, bound against the source row.
    pub element: Expr,
}

impl GroupByResult {
    pub fn ty(&self) -> Type {
        Type::Grouping {
            key: Box::new(self.key.ty()),
            element: Box::new(self.element.ty()),
        }
    }

    /// Build the correlated form. The outer key keeps referencing the
    /// grouped select; the elements read a uniquified copy of the source
    /// whose key equals the outer key, nulls included.
    pub fn into_grouping(self, ids: &mut TableIds) -> Result<GroupingExpr, QueryError> {
        let GroupByResult {
            select,
            key,
            element,
        } = self;
        let mut source = *select;
        source.projection = Projection::Server(Expr::Record {
            entity: None,
            fields: vec![("key".to_string(), key.clone()), ("element".to_string(), element)],
        });
        source.uniquify(ids)?;

        let Expr::Record { mut fields, .. } = source.projection.flatten()? else {
            return Err(QueryError::internal("grouping source lost its record"));
        };
        let (Some((_, inner_element)), Some((_, inner_key))) = (fields.pop(), fields.pop()) else {
            return Err(QueryError::internal("grouping source lost its key"));
        };

        let outer: Vec<SqlExpr> = sql_leaves(&key).into_iter().cloned().collect();
        let inner: Vec<SqlExpr> = sql_leaves(&inner_key).into_iter().cloned().collect();
        if outer.len() != inner.len() {
            return Err(QueryError::internal("grouping key shapes differ"));
        }
        let correlation = SqlExpr::conjunction(
            inner
                .into_iter()
                .zip(outer)
                .map(|(i, o)| SqlExpr::equal_null_safe(i, o)),
        );

        source.projection = Projection::Server(inner_element);
        source.order_by.clear();
        if let Some(predicate) = correlation {
            source.add_to_predicate(predicate, ids)?;
        }
        Ok(GroupingExpr {
            key,
            elements: Box::new(RelationalQuery::sequence(source)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupingExpr {
    pub key: Expr,
    pub elements: Box<RelationalQuery>,
}

impl GroupingExpr {
    pub fn ty(&self) -> Type {
        Type::Grouping {
            key: Box::new(self.key.ty()),
            element: Box::new(self.elements.row_type.clone()),
        }
    }
}
