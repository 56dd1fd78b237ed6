//! Join and GroupJoin.
//!
//! `Join` is an inner join on key equality. Keys may be scalars,
//! anonymous records (compared field by field) or entities (compared by
//! primary key). As in the host, null keys never match: the comparison is
//! a plain `=`.
//!
//! `GroupJoin` does not join at all. The inner sequence is correlated to
//! the outer row by the key predicate and handed to the result selector
//! as a nested query.

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::compiler::passes::equality::entity_key_members;
use crate::compiler::translate::require_scalar;
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, QueryOp};
use crate::ir::{
    Clause, JoinKind, Ordering, RelationalQuery, SelectExpr, SqlExpr, TableExpr,
};
use crate::value::Type;

/// One side of a join, taken apart.
pub(crate) struct JoinOperand {
    pub table: TableExpr,
    pub predicate: Option<SqlExpr>,
    pub order_by: Vec<Ordering>,
    pub row: Expr,
}

impl JoinOperand {
    /// Split `select` into its parts, pushing it down first when it
    /// carries clauses a join would change the meaning of.
    pub fn new(ctx: &mut ComposeContext, mut select: SelectExpr) -> Result<Self, QueryError> {
        if !select.is_simple() {
            select = select.pushdown(&mut ctx.ids)?;
        }
        let row = select.projection.flatten()?;
        let Some(table) = select.table else {
            return Err(QueryError::internal("join operand has no table"));
        };
        Ok(JoinOperand {
            table,
            predicate: select.predicate,
            order_by: select.order_by,
            row,
        })
    }
}

/// `outer = inner` over bound keys.
pub(crate) fn key_predicate(
    ctx: &mut ComposeContext,
    outer: Expr,
    inner: Expr,
) -> Result<SqlExpr, QueryError> {
    let mut conditions = Vec::new();
    key_pairs(ctx, outer, inner, &mut conditions)?;
    SqlExpr::conjunction(conditions)
        .ok_or_else(|| QueryError::InvalidArgument("join keys have no members".into()))
}

fn key_pairs(
    ctx: &mut ComposeContext,
    outer: Expr,
    inner: Expr,
    out: &mut Vec<SqlExpr>,
) -> Result<(), QueryError> {
    match (outer, inner) {
        (
            Expr::Record {
                entity: None,
                fields: o,
            },
            Expr::Record {
                entity: None,
                fields: i,
            },
        ) => {
            if o.len() != i.len() {
                return Err(QueryError::TypeMismatch(format!(
                    "join keys have {} and {} members",
                    o.len(),
                    i.len()
                )));
            }
            for ((_, o), (_, i)) in o.into_iter().zip(i) {
                key_pairs(ctx, o, i, out)?;
            }
            Ok(())
        }
        (outer, inner) => {
            if let (Type::Entity(oe), Type::Entity(ie)) = (outer.ty(), inner.ty()) {
                let descriptors = ctx.descriptors;
                let o = entity_key_members(&outer, &oe, descriptors)?;
                let i = entity_key_members(&inner, &ie, descriptors)?;
                if o.len() != i.len() {
                    return Err(QueryError::TypeMismatch(format!(
                        "join keys {oe} and {ie} differ in shape"
                    )));
                }
                for (o, i) in o.into_iter().zip(i) {
                    let o = ctx.resolve(o)?;
                    let i = ctx.resolve(i)?;
                    key_pairs(ctx, o, i, out)?;
                }
                return Ok(());
            }
            let o = require_scalar(&outer, "join key")?;
            let i = require_scalar(&inner, "join key")?;
            out.push(SqlExpr::binary(BinaryOp::Eq, o, i));
            Ok(())
        }
    }
}

/// Lower a Join node.
pub fn lower_join(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Join {
        outer,
        inner,
        outer_key,
        inner_key,
        result,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_join called on non-Join node".into(),
        ));
    };

    let mut outer = ctx.sequence(outer)?;
    outer.select.prepare(Clause::Join, &mut ctx.ids)?;
    let outer = JoinOperand::new(ctx, outer.select)?;
    let inner = ctx.sequence(inner)?;
    let inner = JoinOperand::new(ctx, inner.select)?;

    let outer_key = ctx.bind(outer_key, std::slice::from_ref(&outer.row))?;
    let inner_key = ctx.bind(inner_key, std::slice::from_ref(&inner.row))?;
    let mut on = key_predicate(ctx, outer_key, inner_key)?;
    if let Some(predicate) = inner.predicate {
        on = on.and(predicate);
    }

    trace!("inner join");
    let table = TableExpr::join(JoinKind::Inner, outer.table, inner.table, Some(on))?;
    let body = ctx.bind(result, &[outer.row, inner.row])?;
    let mut select = SelectExpr::new(ctx.reclassify(body)?, Some(table));
    select.predicate = outer.predicate;
    select.order_by = outer.order_by;
    select.order_by.extend(inner.order_by);
    RelationalQuery::sequence(select)
}

/// Lower a GroupJoin node.
pub fn lower_group_join(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::GroupJoin {
        outer,
        inner,
        outer_key,
        inner_key,
        result,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_group_join called on non-GroupJoin node".into(),
        ));
    };

    let mut query = ctx.sequence(outer)?;
    query.select.prepare(Clause::Projection, &mut ctx.ids)?;
    let outer_row = query.select.projection.flatten()?;
    let outer_key = ctx.bind(outer_key, std::slice::from_ref(&outer_row))?;

    let mut group = ctx.sequence(inner)?;
    group.select.prepare(Clause::Predicate, &mut ctx.ids)?;
    let inner_row = group.select.projection.flatten()?;
    let inner_key = ctx.bind(inner_key, &[inner_row])?;
    let correlation = key_predicate(ctx, outer_key, inner_key)?;
    group.select.add_to_predicate(correlation, &mut ctx.ids)?;
    let group = ctx.nested_expr(group)?;

    let body = ctx.bind(result, &[outer_row, group])?;
    query.select.projection = ctx.reclassify(body)?;
    query.row_type = query.select.projection.ty()?;
    Ok(query)
}
