//! Concat, Union, Except and Intersect.
//!
//! Each side is flattened into one column per leaf of its row shape
//! (constants included, so both sides line up position by position) and
//! the two selects become the operands of a set-operator table. The row
//! shape is read back from the left side's columns; a column is nullable
//! when it is nullable on either side.

use std::collections::HashSet;

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::{QueryOp, SetOpKind};
use crate::ir::walk::{self, IrRewriter};
use crate::ir::{RelationalQuery, SelectExpr, SetOperator, SqlExpr, TableExpr, TableId};

/// Marks the named columns of the set table nullable.
struct WidenNullability {
    table: TableId,
    names: HashSet<String>,
}

impl IrRewriter for WidenNullability {
    fn rewrite_sql(&mut self, sql: &SqlExpr) -> Option<SqlExpr> {
        match sql {
            SqlExpr::Column {
                table, name, ty, ..
            } if *table == self.table && self.names.contains(name) => Some(SqlExpr::Column {
                table: *table,
                name: name.clone(),
                ty: *ty,
                nullable: true,
            }),
            _ => None,
        }
    }
}

fn set_operator(kind: SetOpKind) -> SetOperator {
    match kind {
        SetOpKind::Concat => SetOperator::UnionAll,
        SetOpKind::Union => SetOperator::Union,
        SetOpKind::Except => SetOperator::Except,
        SetOpKind::Intersect => SetOperator::Intersect,
    }
}

/// Lower a SetOp node.
pub fn lower_set_op(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::SetOp {
        op: kind,
        left,
        right,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_set_op called on non-SetOp node".into(),
        ));
    };

    let left = ctx.sequence(left)?;
    let right = ctx.sequence(right)?;
    let row_type = left.row_type;

    let id = ctx.ids.next();
    let (left_select, mut shape) = left.select.into_set_operand(id, &mut ctx.ids)?;
    let (right_select, _) = right.select.into_set_operand(id, &mut ctx.ids)?;

    let left_columns = left_select.projected_columns()?;
    let right_columns = right_select.projected_columns()?;
    let names: HashSet<String> = left_columns
        .iter()
        .zip(&right_columns)
        .filter(|((_, l), (_, r))| !l.is_nullable() && r.is_nullable())
        .map(|((name, _), _)| name.clone())
        .collect();
    if !names.is_empty() {
        walk::rewrite_expr(&mut WidenNullability { table: id, names }, &mut shape)?;
    }

    let operator = set_operator(*kind);
    trace!(operator = operator.keyword(), columns = left_columns.len(), %id, "set operation");
    let table = TableExpr::set_operation(id, operator, left_select, right_select)?;
    let select = SelectExpr::new(ctx.reclassify(shape)?, Some(table));
    let mut query = RelationalQuery::sequence(select)?;
    query.row_type = row_type;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::{Expr, Query};
    use crate::ir::Projection;
    use crate::value::Type;

    fn ages() -> Query {
        Query::from("Employee").select("e", |e| m(e, "Age"))
    }

    #[test]
    fn test_lower_set_op_concat_is_union_all() {
        let query = with_ctx(|ctx| lower(ctx, ages().concat(ages())));
        let Some(TableExpr::SetOperator { op, .. }) = &query.select.table else {
            panic!("expected a set operator, got {:?}", query.select.table);
        };
        assert_eq!(*op, SetOperator::UnionAll);
        assert_eq!(query.row_type, Type::int32());
    }

    #[test]
    fn test_lower_set_op_operands_drop_ordering() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                ages()
                    .order_by("a", |a| a)
                    .union(ages()),
            )
        });
        let Some(TableExpr::SetOperator { left, .. }) = &query.select.table else {
            panic!("expected a set operator");
        };
        assert!(left.order_by.is_empty());
    }

    #[test]
    fn test_lower_set_op_nullability_is_widened() {
        let names = Query::from("Customer").select("c", |c| m(c, "City"));
        let ids = Query::from("Customer").select("c", |c| m(c, "Name"));
        let query = with_ctx(|ctx| lower(ctx, names.intersect(ids)));
        assert!(server_sql(&query.select.projection).is_nullable());

        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .select("e", |e| m(e, "Name"))
                    .except(Query::from("Customer").select("c", |c| m(c, "Name"))),
            )
        });
        assert!(matches!(
            query.select.projection,
            Projection::Server(Expr::Sql(SqlExpr::Column { .. }))
        ));
    }

    #[test]
    fn test_lower_set_op_constants_become_columns() {
        let left = Query::from("Employee").select("e", |e| {
            Expr::record(vec![("Id", m(e, "Id")), ("Tag", Expr::constant(1))])
        });
        let right = Query::from("Order").select("o", |o| {
            Expr::record(vec![("Id", m(o, "Id")), ("Tag", Expr::constant(2))])
        });
        let query = with_ctx(|ctx| lower(ctx, left.concat(right)));
        let Some(TableExpr::SetOperator { left, right, .. }) = &query.select.table else {
            panic!("expected a set operator");
        };
        assert_eq!(left.projected_columns().unwrap().len(), 2);
        assert_eq!(right.projected_columns().unwrap().len(), 2);
    }

    #[test]
    fn test_lower_set_op_type_mismatch() {
        let err = with_ctx_err(|ctx| {
            lower(
                ctx,
                ages().concat(Query::from("Employee").select("e", |e| m(e, "Name"))),
            )
        });
        assert!(matches!(err, QueryError::TypeMismatch(_)));
    }

    #[test]
    fn test_lower_set_op_widens_non_nullable_left() {
        let ages_or_missing = Query::from("Employee").select("e", |e| m(e, "DepartmentId"));
        let query = with_ctx(|ctx| lower(ctx, ages().union(ages_or_missing)));
        assert!(server_sql(&query.select.projection).is_nullable());
    }
}
