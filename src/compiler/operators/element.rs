//! Element operators: First, Single, Last, ElementAt and their
//! `OrDefault` forms.
//!
//! The select is limited to the rows needed to decide the result:
//! one for First, Last and ElementAt, two for Single so that a second
//! match can be reported. Last reverses the existing ordering. What an
//! empty or oversized result means is decided by the materializer from
//! the query kind.

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::{ElementKind, QueryOp};
use crate::ir::{Clause, QueryKind, RelationalQuery, SqlExpr};

/// Lower an Element node.
pub fn lower_element(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Element {
        kind,
        source,
        predicate,
        index,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_element called on non-Element node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    if let Some(predicate) = predicate {
        query.select.prepare(Clause::Predicate, &mut ctx.ids)?;
        let row = query.select.projection.flatten()?;
        let sql = ctx.bind_predicate(predicate, &[row], "element predicate")?;
        query.select.add_to_predicate(sql, &mut ctx.ids)?;
    }

    match kind {
        ElementKind::First | ElementKind::FirstOrDefault => {
            query.select.update_limit(SqlExpr::int(1), &mut ctx.ids)?;
        }
        ElementKind::Single | ElementKind::SingleOrDefault => {
            query.select.update_limit(SqlExpr::int(2), &mut ctx.ids)?;
        }
        ElementKind::Last | ElementKind::LastOrDefault => {
            query.select.prepare(Clause::OrderBy, &mut ctx.ids)?;
            if !query.select.reverse_order() {
                return Err(QueryError::unsupported("Last over an unordered sequence"));
            }
            query.select.update_limit(SqlExpr::int(1), &mut ctx.ids)?;
        }
        ElementKind::ElementAt | ElementKind::ElementAtOrDefault => {
            let Some(index) = index else {
                return Err(QueryError::InvalidArgument(
                    "ElementAt requires an index".into(),
                ));
            };
            let offset = ctx.resolve_value(index, "ElementAt")?;
            query.select.update_offset(offset, &mut ctx.ids)?;
            query.select.update_limit(SqlExpr::int(1), &mut ctx.ids)?;
        }
    }

    trace!(kind = ?kind, "element operator");
    query.kind = QueryKind::Element(*kind);
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::{Expr, Query};
    use crate::ir::TableExpr;

    #[test]
    fn test_lower_element_first() {
        let query = compose(Query::from("Employee").first());
        assert_eq!(query.kind, QueryKind::Element(ElementKind::First));
        assert_eq!(query.select.limit, Some(SqlExpr::int(1)));
        assert!(!query.is_sequence());
    }

    #[test]
    fn test_lower_element_single_reads_two_rows() {
        let query = compose(Query::from("Employee").single_or_default());
        assert_eq!(query.select.limit, Some(SqlExpr::int(2)));
        assert_eq!(query.kind, QueryKind::Element(ElementKind::SingleOrDefault));
    }

    #[test]
    fn test_lower_element_with_predicate() {
        let e = Expr::query(QueryOp::Element {
            kind: ElementKind::First,
            source: Query::from("Employee").into_expr(),
            predicate: Some(crate::expr::lambda(
                "e",
                crate::value::Type::Entity("Employee".into()),
                |e| m(e, "Active"),
            )),
            index: None,
        });
        let query = compose(e);
        assert!(query.select.predicate.is_some());
        assert_eq!(query.select.limit, Some(SqlExpr::int(1)));
    }

    #[test]
    fn test_lower_element_last_reverses_ordering() {
        let query = compose(
            Query::from("Employee")
                .order_by("e", |e| m(e, "Age"))
                .last(),
        );
        assert!(query.select.order_by[0].descending);
        assert_eq!(query.select.limit, Some(SqlExpr::int(1)));
    }

    #[test]
    fn test_lower_element_last_requires_ordering() {
        let e: Expr = Query::from("Employee").last();
        let err = with_ctx_err(|ctx| ctx.compose(&e));
        assert!(matches!(err, QueryError::Unsupported(_)));
    }

    #[test]
    fn test_lower_element_at() {
        let query = compose(
            Query::from("Employee")
                .order_by("e", |e| m(e, "Id"))
                .element_at(Expr::constant(3), true),
        );
        assert_eq!(query.select.offset, Some(SqlExpr::int(3)));
        assert_eq!(query.select.limit, Some(SqlExpr::int(1)));
        assert_eq!(
            query.kind,
            QueryKind::Element(ElementKind::ElementAtOrDefault)
        );
    }

    #[test]
    fn test_lower_element_first_after_take_wraps() {
        let query = compose(Query::from("Employee").take(Expr::constant(5)).first());
        assert!(matches!(query.select.table, Some(TableExpr::Subquery { .. })));
    }
}
