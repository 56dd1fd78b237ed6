//! Any, All and Contains.
//!
//! All three become `EXISTS` over the source:
//!
//! | host              | SQL                                          |
//! |-------------------|----------------------------------------------|
//! | `s.Any()`         | `EXISTS (SELECT 1 FROM s)`                   |
//! | `s.Any(p)`        | `EXISTS (SELECT 1 FROM s WHERE p)`           |
//! | `s.All(p)`        | `NOT EXISTS (SELECT 1 FROM s WHERE NOT p)`   |
//! | `s.Contains(x)`   | `EXISTS (SELECT 1 FROM s WHERE row = x)`     |
//!
//! The negated predicate of `All` keeps host null semantics: a row whose
//! comparison reads a null fails `p`, so it counts against `All`.

use crate::compiler::compose::ComposeContext;
use crate::compiler::translate::require_predicate;
use crate::error::QueryError;
use crate::expr::{Expr, Lambda, QueryOp};
use crate::ir::{Clause, Projection, RelationalQuery, SelectExpr, SqlExpr};
use crate::value::Type;

/// `SELECT EXISTS (select)` as a scalar query, negated for All.
fn exists_query(mut select: SelectExpr, negated: bool) -> RelationalQuery {
    if select.limit.is_none() && select.offset.is_none() {
        select.order_by.clear();
    }
    let exists = SqlExpr::Exists(Box::new(select));
    let predicate = if negated { exists.not() } else { exists };
    let outer = SelectExpr::new(Projection::Server(Expr::Sql(predicate)), None);
    RelationalQuery::scalar(outer, None, Type::bool())
}

/// Lower an Any node.
pub fn lower_any(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Any { source, predicate } = op else {
        return Err(QueryError::InternalError(
            "lower_any called on non-Any node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    if let Some(predicate) = predicate {
        query.select.prepare(Clause::Predicate, &mut ctx.ids)?;
        let row = query.select.projection.flatten()?;
        let sql = ctx.bind_predicate(predicate, &[row], "Any")?;
        query.select.add_to_predicate(sql, &mut ctx.ids)?;
    }
    Ok(exists_query(query.select, false))
}

/// Lower an All node.
pub fn lower_all(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::All { source, predicate } = op else {
        return Err(QueryError::InternalError(
            "lower_all called on non-All node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Predicate, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;
    let negated = Lambda::new(predicate.params.clone(), Expr::not(predicate.body.clone()));
    let sql = ctx.bind_predicate(&negated, &[row], "All")?;
    query.select.add_to_predicate(sql, &mut ctx.ids)?;
    Ok(exists_query(query.select, true))
}

/// Lower a Contains node whose source is a relational sequence.
pub fn lower_contains(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Contains { source, item } = op else {
        return Err(QueryError::InternalError(
            "lower_contains called on non-Contains node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Predicate, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;
    let equal = ctx.resolve(row.eq(item.clone()))?;
    let sql = require_predicate(&equal, "Contains")?;
    query.select.add_to_predicate(sql, &mut ctx.ids)?;
    Ok(exists_query(query.select, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::Query;
    use crate::ir::{QueryKind, SqlUnaryOp};

    fn exists_body(query: &RelationalQuery) -> &SelectExpr {
        match server_sql(&query.select.projection) {
            SqlExpr::Exists(select) => select,
            SqlExpr::Unary {
                op: SqlUnaryOp::Not,
                operand,
            } => match operand.as_ref() {
                SqlExpr::Exists(select) => select,
                other => panic!("expected EXISTS, got {other:?}"),
            },
            other => panic!("expected EXISTS, got {other:?}"),
        }
    }

    #[test]
    fn test_lower_any_basic() {
        let query = compose(Query::from("Employee").any());
        assert_eq!(query.kind, QueryKind::Scalar(None));
        assert_eq!(query.row_type, Type::bool());
        assert!(query.select.table.is_none());
        assert!(exists_body(&query).predicate.is_none());
    }

    #[test]
    fn test_lower_any_with_predicate_drops_ordering() {
        let query = compose(
            Query::from("Employee")
                .order_by("e", |e| m(e, "Age"))
                .any_where("e", |e| m(e, "Active")),
        );
        let inner = exists_body(&query);
        assert!(inner.predicate.is_some());
        assert!(inner.order_by.is_empty());
    }

    #[test]
    fn test_lower_all_is_not_exists_of_negation() {
        let query = compose(
            Query::from("Employee").all("e", |e| m(e, "Age").gt(Expr::constant(18))),
        );
        assert!(matches!(
            server_sql(&query.select.projection),
            SqlExpr::Unary {
                op: SqlUnaryOp::Not,
                ..
            }
        ));
        assert!(exists_body(&query).predicate.is_some());
    }

    #[test]
    fn test_lower_contains_scalar() {
        let query = compose(
            Query::from("Employee")
                .select("e", |e| m(e, "Age"))
                .contains(Expr::constant(42)),
        );
        let inner = exists_body(&query);
        assert!(matches!(
            inner.predicate,
            Some(SqlExpr::Binary {
                op: crate::expr::BinaryOp::Eq,
                ..
            })
        ));
    }

    #[test]
    fn test_lower_contains_entity_compares_keys() {
        let query = with_ctx(|ctx| {
            let customers = lower(ctx, Query::from("Customer"))?;
            let row = customers.select.projection.flatten()?;
            let op = QueryOp::Contains {
                source: Query::from("Customer").into_expr(),
                item: row,
            };
            lower_contains(ctx, &op)
        });
        let inner = exists_body(&query);
        let Some(SqlExpr::Binary { left, right, .. }) = &inner.predicate else {
            panic!("expected a key comparison");
        };
        assert!(matches!(left.as_ref(), SqlExpr::Column { name, .. } if name == "Id"));
        assert!(matches!(right.as_ref(), SqlExpr::Column { name, .. } if name == "Id"));
    }
}
