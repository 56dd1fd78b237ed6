//! SelectMany: flatten one collection per outer row.
//!
//! The collection selector is bound against the outer row and lowered to
//! a (possibly correlated) query. How it joins the outer table depends on
//! where the correlation lives:
//!
//! | inner select                                   | join                        |
//! |------------------------------------------------|-----------------------------|
//! | plain, correlated only through its predicate   | `INNER JOIN ... ON pred`    |
//! | plain, uncorrelated, no predicate              | `CROSS JOIN`                |
//! | limited/distinct/grouped, uncorrelated         | `CROSS JOIN (subquery)`     |
//! | limited/distinct/grouped, correlated           | `CROSS APPLY (subquery)`    |
//!
//! A collection ending in `DefaultIfEmpty` turns each form into its outer
//! variant (`LEFT JOIN`, `OUTER APPLY`), and the inner row reads as null
//! when an outer row has no match.

use std::collections::HashSet;

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::compiler::operators::join::JoinOperand;
use crate::compiler::translate::constant_predicate;
use crate::error::QueryError;
use crate::expr::{Expr, QueryOp};
use crate::ir::walk::{free_tables_of_table, make_nullable};
use crate::ir::{
    Clause, JoinKind, RelationalQuery, SelectExpr, SqlExpr, SqlFunction, TableExpr, TableId,
};
use crate::value::Type;

/// Lower a SelectMany node.
pub fn lower_select_many(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::SelectMany {
        source,
        collection,
        result,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_select_many called on non-SelectMany node".into(),
        ));
    };

    let mut outer = ctx.sequence(source)?;
    outer.select.prepare(Clause::Join, &mut ctx.ids)?;
    let outer = JoinOperand::new(ctx, outer.select)?;
    let outer_tables: HashSet<TableId> = outer.table.leaf_ids().into_iter().collect();

    let bound = ctx.bind(collection, std::slice::from_ref(&outer.row))?;
    let inner = ctx.lower_source(&bound)?;
    if !inner.is_sequence() {
        return Err(QueryError::TypeMismatch(format!(
            "SelectMany collection is {}",
            inner.ty().display_name()
        )));
    }
    let left = inner.default_if_empty;
    let inner_type = inner.row_type;
    let select = inner.select;

    let movable = select.is_simple()
        && select
            .table
            .as_ref()
            .is_some_and(|t| free_tables_of_table(t).is_disjoint(&outer_tables));
    let correlated = !crate::ir::walk::free_tables(&select).is_disjoint(&outer_tables);

    let (kind, inner, on) = if movable {
        let inner = JoinOperand::new(ctx, select)?;
        let on = inner.predicate.clone();
        let kind = match (left, &on) {
            (true, _) => JoinKind::Left,
            (false, Some(_)) => JoinKind::Inner,
            (false, None) => JoinKind::Cross,
        };
        let on = match kind {
            JoinKind::Left => Some(on.unwrap_or_else(|| constant_predicate(true))),
            _ => on,
        };
        (kind, inner, on)
    } else if !correlated {
        let inner = JoinOperand::new(ctx, select)?;
        if left {
            let on = inner.predicate.clone().unwrap_or_else(|| constant_predicate(true));
            (JoinKind::Left, inner, Some(on))
        } else {
            let on = inner.predicate.clone();
            let kind = if on.is_some() {
                JoinKind::Inner
            } else {
                JoinKind::Cross
            };
            (kind, inner, on)
        }
    } else {
        if !ctx.dialect().supports_apply() {
            return Err(QueryError::unsupported(format!(
                "correlated collection in SelectMany on {:?}",
                ctx.dialect()
            )));
        }
        let pushed = select.pushdown(&mut ctx.ids)?;
        let inner = JoinOperand::new(ctx, pushed)?;
        let kind = if left {
            JoinKind::OuterApply
        } else {
            JoinKind::CrossApply
        };
        (kind, inner, None)
    };
    trace!(kind = ?kind, "select many");

    let JoinOperand {
        table: inner_table,
        order_by: inner_order,
        row: mut inner_row,
        ..
    } = inner;
    if kind.is_outer() {
        let optional: HashSet<TableId> = inner_table.leaf_ids().into_iter().collect();
        make_nullable(&mut inner_row, &optional)?;
        inner_row = default_for_missing(inner_row, &inner_type);
    }

    let table = TableExpr::join(kind, outer.table, inner_table, on)?;
    let body = match result {
        Some(result) => ctx.bind(result, &[outer.row, inner_row])?,
        None => inner_row,
    };
    let mut select = SelectExpr::new(ctx.reclassify(body)?, Some(table));
    select.predicate = outer.predicate;
    select.order_by = outer.order_by;
    select.order_by.extend(inner_order);
    RelationalQuery::sequence(select)
}

/// A non-nullable scalar row read from the optional side of an outer
/// join defaults instead of reading null.
fn default_for_missing(row: Expr, row_type: &Type) -> Expr {
    match (row, row_type) {
        (
            Expr::Sql(sql),
            Type::Scalar {
                scalar,
                nullable: false,
            },
        ) => Expr::Sql(SqlExpr::Function {
            func: SqlFunction::Coalesce,
            args: vec![
                sql,
                SqlExpr::Literal {
                    value: row_type.default_value(),
                    ty: *scalar,
                },
            ],
            ty: *scalar,
            nullable: false,
        }),
        (row, _) => row,
    }
}
