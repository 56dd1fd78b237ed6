//! Distinct.
//!
//! Only rows that are entirely server-side can be compared by the
//! database. Rows holding a client transform or a nested collection are
//! rejected.

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::{Expr, QueryOp};
use crate::ir::{Projection, RelationalQuery};

/// Lower a Distinct node.
pub fn lower_distinct(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Distinct { source } = op else {
        return Err(QueryError::InternalError(
            "lower_distinct called on non-Distinct node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    let Projection::Server(body) = &query.select.projection else {
        return Err(QueryError::unsupported(
            "Distinct over rows computed after materialization",
        ));
    };
    let nested = |e: &Expr| {
        matches!(
            e,
            Expr::Relational(_) | Expr::Grouping(_) | Expr::GroupByResult(_)
        )
    };
    if body.any(&nested) {
        return Err(QueryError::unsupported(
            "Distinct over rows with nested collections",
        ));
    }
    query.select.as_distinct(&mut ctx.ids)?;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::Query;
    use crate::ir::TableExpr;

    #[test]
    fn test_lower_distinct_basic() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .select("e", |e| m(e, "DepartmentId"))
                    .distinct(),
            )
        });
        assert!(query.select.is_distinct);
        assert!(matches!(query.select.table, Some(TableExpr::Base { .. })));
    }

    #[test]
    fn test_lower_distinct_after_take_wraps() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .select("e", |e| m(e, "Age"))
                    .take(Expr::constant(5))
                    .distinct(),
            )
        });
        assert!(query.select.is_distinct);
        assert!(matches!(query.select.table, Some(TableExpr::Subquery { .. })));
    }

    #[test]
    fn test_lower_distinct_rejects_nested_collections() {
        let err = with_ctx_err(|ctx| {
            lower(
                ctx,
                Query::from("Customer")
                    .select("c", |c| m(c, "Orders"))
                    .distinct(),
            )
        });
        assert!(matches!(err, QueryError::Unsupported(_)));
    }
}
