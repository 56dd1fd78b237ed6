//! GroupBy.
//!
//! The source select gains a `GROUP BY` over the SQL leaves of the bound
//! key. Each group is represented by a [`GroupByResult`] that keeps the
//! ungrouped source around: aggregates over it collapse into aggregate
//! functions of the grouped select (see the group-aggregation pass), and
//! whatever else reads the group's elements is expanded into a correlated
//! query when the query is finalized.

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::compiler::translate::is_server_shaped;
use crate::error::QueryError;
use crate::expr::{Expr, QueryOp};
use crate::ir::projection::sql_leaves;
use crate::ir::{Clause, GroupByResult, RelationalQuery, SqlExpr};

/// Lower a GroupBy node.
pub fn lower_group_by(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::GroupBy {
        source,
        key,
        element,
        result,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_group_by called on non-GroupBy node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Grouping, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;

    let key = ctx.bind(key, std::slice::from_ref(&row))?;
    if !is_server_shaped(&key, false) {
        return Err(QueryError::unsupported(format!(
            "grouping key of type {} has no SQL form",
            key.ty().display_name()
        )));
    }
    let element = match element {
        Some(element) => ctx.bind(element, std::slice::from_ref(&row))?,
        None => row,
    };

    let keys: Vec<SqlExpr> = sql_leaves(&key)
        .into_iter()
        .filter(|sql| !matches!(sql, SqlExpr::Literal { .. } | SqlExpr::Parameter { .. }))
        .cloned()
        .collect();
    trace!(keys = keys.len(), "group by");

    let group = Expr::GroupByResult(Box::new(GroupByResult {
        select: Box::new(query.select.clone()),
        key: key.clone(),
        element,
    }));
    query.select.update_grouping(keys, &mut ctx.ids)?;

    let body = match result {
        Some(result) => ctx.bind(result, &[key, group])?,
        None => group,
    };
    query.select.projection = ctx.reclassify(body)?;
    query.row_type = query.select.projection.ty()?;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::{Query, lambda, lambda2};
    use crate::ir::{Projection, SqlAggregate};
    use crate::value::{ScalarType, Type};

    fn by_department() -> Query {
        Query::from("Employee").group_by("e", |e| m(e, "DepartmentId"))
    }

    #[test]
    fn test_lower_group_by_sets_grouping_keys() {
        let query = with_ctx(|ctx| lower(ctx, by_department()));
        let keys = query.select.grouping.as_ref().expect("grouped");
        assert_eq!(keys.len(), 1);
        assert!(matches!(&keys[0], SqlExpr::Column { name, .. } if name == "DepartmentId"));
        assert!(matches!(query.row_type, Type::Grouping { .. }));
    }

    #[test]
    fn test_lower_group_by_count_becomes_aggregate() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                by_department().select("g", |g| {
                    Expr::record(vec![
                        ("Department", m(g.clone(), "Key")),
                        ("Headcount", Query::new(g).count()),
                    ])
                }),
            )
        });
        let Projection::Server(Expr::Record { fields, .. }) = &query.select.projection else {
            panic!("expected a server record, got {:?}", query.select.projection);
        };
        assert!(matches!(
            &fields[1].1,
            Expr::Sql(SqlExpr::Aggregate {
                func: SqlAggregate::Count,
                ..
            })
        ));
        assert!(query.select.grouping.is_some());
    }

    #[test]
    fn test_lower_group_by_with_result_selector() {
        let key = lambda("e", Type::Entity("Employee".into()), |e| m(e, "Active"));
        let group_ty = Type::Grouping {
            key: Box::new(Type::bool()),
            element: Box::new(Type::Entity("Employee".into())),
        };
        let result = lambda2(("k", Type::bool()), ("g", group_ty), |k, g| {
            Expr::record(vec![("Active", k), ("Total", Query::new(g).sum("x", |x| m(x, "Salary")))])
        });
        let query = with_ctx(|ctx| {
            lower(ctx, Query::from("Employee").group_by_with(key, None, Some(result)))
        });
        assert_eq!(field_names(&query.select.projection), vec!["Active", "Total"]);
        assert_eq!(
            query.row_type,
            Type::Record(vec![
                ("Active".into(), Type::bool()),
                ("Total".into(), Type::float64()),
            ])
        );
    }

    #[test]
    fn test_lower_group_by_constant_key_has_no_columns() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .group_by("e", |_| Expr::constant(1))
                    .select("g", |g| Query::new(g).count()),
            )
        });
        assert_eq!(query.select.grouping, Some(Vec::new()));
    }

    #[test]
    fn test_lower_group_by_clears_ordering() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .order_by("e", |e| m(e, "Age"))
                    .group_by("e", |e| m(e, "DepartmentId")),
            )
        });
        assert!(query.select.order_by.is_empty());
    }

    #[test]
    fn test_lower_group_by_after_take_wraps() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .take(Expr::constant(10))
                    .group_by("e", |e| m(e, "DepartmentId")),
            )
        });
        assert!(matches!(
            query.select.table,
            Some(crate::ir::TableExpr::Subquery { .. })
        ));
        let keys = query.select.grouping.as_ref().expect("grouped");
        assert!(matches!(
            &keys[0],
            SqlExpr::Column {
                ty: ScalarType::Int32,
                nullable: true,
                ..
            }
        ));
    }
}
