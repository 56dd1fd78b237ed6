//! Select: replace the projection.
//!
//! The selector is bound against the current row and the result is split
//! again into a server part and a client transform. Nothing is added to
//! the SQL unless the selector reads new expressions.

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::QueryOp;
use crate::ir::{Clause, RelationalQuery};

/// Lower a Select node.
pub fn lower_project(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Select { source, selector } = op else {
        return Err(QueryError::InternalError(
            "lower_project called on non-Select node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Projection, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;
    let body = ctx.bind(selector, &[row])?;
    query.select.projection = ctx.reclassify(body)?;
    query.row_type = query.select.projection.ty()?;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::{Expr, Method, Query};
    use crate::ir::{Projection, SqlExpr, TableExpr};
    use crate::value::Type;

    #[test]
    fn test_lower_project_member() {
        let query = with_ctx(|ctx| lower(ctx, Query::from("Employee").select("e", |e| m(e, "Age"))));
        assert!(matches!(
            server_sql(&query.select.projection),
            SqlExpr::Column { name, .. } if name == "Age"
        ));
        assert_eq!(query.row_type, Type::int32());
    }

    #[test]
    fn test_lower_project_record() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee").select("e", |e| {
                    Expr::record(vec![
                        ("Name", m(e.clone(), "Name")),
                        ("Next", m(e, "Age").add(Expr::constant(1))),
                    ])
                }),
            )
        });
        assert_eq!(field_names(&query.select.projection), vec!["Name", "Next"]);
    }

    #[test]
    fn test_lower_project_untranslatable_goes_client_side() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee").select("e", |e| {
                    Expr::call(Method::ToUpper, vec![Expr::param("free", Type::string())])
                        .add(m(e, "Name"))
                }),
            )
        });
        assert!(matches!(query.select.projection, Projection::Client { .. }));
        assert_eq!(
            query.row_type.as_scalar(),
            Some(crate::value::ScalarType::String)
        );
    }

    #[test]
    fn test_lower_project_after_distinct_wraps() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .select("e", |e| m(e, "Age"))
                    .distinct()
                    .select("a", |a| a.add(Expr::constant(1))),
            )
        });
        assert!(matches!(query.select.table, Some(TableExpr::Subquery { .. })));
        assert!(!query.select.is_distinct);
    }
}
