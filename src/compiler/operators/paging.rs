//! Skip and Take.
//!
//! Counts are values: constants, captured variables (parameterized
//! before composition) or expressions over them. `Skip` after `Take`, or
//! `Take` after `Take`, pushes the select down so the second clause
//! applies to the first one's output.

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::QueryOp;
use crate::ir::RelationalQuery;

/// Lower a Skip node.
pub fn lower_skip(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Skip { source, count } = op else {
        return Err(QueryError::InternalError(
            "lower_skip called on non-Skip node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    let offset = ctx.resolve_value(count, "Skip")?;
    query.select.update_offset(offset, &mut ctx.ids)?;
    Ok(query)
}

/// Lower a Take node.
pub fn lower_take(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Take { source, count } = op else {
        return Err(QueryError::InternalError(
            "lower_take called on non-Take node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    let limit = ctx.resolve_value(count, "Take")?;
    query.select.update_limit(limit, &mut ctx.ids)?;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::{Expr, Query};
    use crate::ir::{SqlExpr, TableExpr};
    use crate::value::Type;

    #[test]
    fn test_lower_skip_take() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .order_by("e", |e| m(e, "Id"))
                    .skip(Expr::constant(20))
                    .take(Expr::constant(10)),
            )
        });
        assert_eq!(query.select.offset, Some(SqlExpr::int(20)));
        assert_eq!(query.select.limit, Some(SqlExpr::int(10)));
        assert!(matches!(query.select.table, Some(TableExpr::Base { .. })));
    }

    #[test]
    fn test_lower_take_then_skip_wraps() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .take(Expr::constant(10))
                    .skip(Expr::constant(2)),
            )
        });
        assert!(matches!(query.select.table, Some(TableExpr::Subquery { .. })));
        assert_eq!(query.select.offset, Some(SqlExpr::int(2)));
        assert!(query.select.limit.is_none());
    }

    #[test]
    fn test_lower_take_parameter_count() {
        let count = Expr::Parameter {
            index: 0,
            path: Vec::new(),
            ty: Type::int32(),
        };
        let query = with_ctx(|ctx| lower(ctx, Query::from("Employee").take(count)));
        assert!(matches!(
            query.select.limit,
            Some(SqlExpr::Parameter { index: 0, .. })
        ));
    }

    #[test]
    fn test_lower_take_non_value_count() {
        let count = Expr::param("n", Type::int32());
        let err = with_ctx_err(|ctx| lower(ctx, Query::from("Employee").take(count)));
        assert!(matches!(err, QueryError::UntranslatablePredicate(_)));
    }
}
