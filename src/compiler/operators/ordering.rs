//! OrderBy / ThenBy and Reverse.
//!
//! A key selector returning an anonymous record orders by each field in
//! turn. `OrderBy` replaces any existing ordering; `ThenBy` appends to it.
//! `Reverse` flips the direction of every key and requires an ordering to
//! flip.

use crate::compiler::compose::ComposeContext;
use crate::compiler::translate::require_scalar;
use crate::error::QueryError;
use crate::expr::{Expr, QueryOp};
use crate::ir::{Clause, Ordering, RelationalQuery, SqlExpr};

/// Lower an OrderBy node.
pub fn lower_order_by(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::OrderBy {
        source,
        key,
        descending,
        then_by,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_order_by called on non-OrderBy node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::OrderBy, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;
    let bound = ctx.bind(key, &[row])?;
    let keys = ordering_keys(&bound)?;

    for (i, expr) in keys.into_iter().enumerate() {
        let ordering = Ordering {
            expr,
            descending: *descending,
        };
        if i == 0 && !then_by {
            query.select.set_order_by(ordering, &mut ctx.ids)?;
        } else {
            query.select.add_to_order_by(ordering, &mut ctx.ids)?;
        }
    }
    Ok(query)
}

fn ordering_keys(bound: &Expr) -> Result<Vec<SqlExpr>, QueryError> {
    match bound {
        Expr::Record { entity: None, fields } => fields
            .iter()
            .map(|(_, field)| require_scalar(field, "OrderBy"))
            .collect(),
        other => Ok(vec![require_scalar(other, "OrderBy")?]),
    }
}

/// Lower a Reverse node.
pub fn lower_reverse(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Reverse { source } = op else {
        return Err(QueryError::InternalError(
            "lower_reverse called on non-Reverse node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::OrderBy, &mut ctx.ids)?;
    if !query.select.reverse_order() {
        return Err(QueryError::unsupported("Reverse over an unordered sequence"));
    }
    Ok(query)
}
