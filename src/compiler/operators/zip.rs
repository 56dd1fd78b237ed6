//! Zip: pair the n-th rows of two sequences.
//!
//! Both sides are numbered with `ROW_NUMBER() OVER (ORDER BY ...)` in
//! their own ordering and joined on equal numbers. The result keeps the
//! left side's order. Surplus rows of the longer side have no partner and
//! are dropped, as in the host.

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, QueryOp};
use crate::ir::{
    Clause, JoinKind, Ordering, Projection, RelationalQuery, SelectExpr, SqlExpr, TableExpr,
    WindowFunc,
};

struct Numbered {
    table: TableExpr,
    row: Expr,
    number: SqlExpr,
}

fn numbered(ctx: &mut ComposeContext, query: RelationalQuery) -> Result<Numbered, QueryError> {
    let mut select = query.select;
    select.prepare(Clause::Join, &mut ctx.ids)?;
    let row = select.projection.flatten()?;
    let number = SqlExpr::Window {
        func: WindowFunc::RowNumber,
        partition_by: Vec::new(),
        order_by: select.order_by.clone(),
    };
    select.projection = Projection::Server(Expr::Record {
        entity: None,
        fields: vec![("row".to_string(), row), ("rn".to_string(), Expr::Sql(number))],
    });
    select.is_windowed = true;

    let pushed = select.pushdown(&mut ctx.ids)?;
    let Expr::Record { mut fields, .. } = pushed.projection.flatten()? else {
        return Err(QueryError::internal("numbered select lost its record"));
    };
    let (Some((_, Expr::Sql(number))), Some((_, row))) = (fields.pop(), fields.pop()) else {
        return Err(QueryError::internal("numbered select lost its row number"));
    };
    let Some(table) = pushed.table else {
        return Err(QueryError::internal("pushdown produced a table-less select"));
    };
    Ok(Numbered { table, row, number })
}

/// Lower a Zip node.
pub fn lower_zip(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Zip {
        left,
        right,
        result,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_zip called on non-Zip node".into(),
        ));
    };

    let left = ctx.sequence(left)?;
    let right = ctx.sequence(right)?;
    let left = numbered(ctx, left)?;
    let right = numbered(ctx, right)?;

    let on = SqlExpr::binary(BinaryOp::Eq, left.number.clone(), right.number);
    let table = TableExpr::join(JoinKind::Inner, left.table, right.table, Some(on))?;
    let body = ctx.bind(result, &[left.row, right.row])?;

    let mut select = SelectExpr::new(ctx.reclassify(body)?, Some(table));
    select.order_by.push(Ordering {
        expr: left.number,
        descending: false,
    });
    RelationalQuery::sequence(select)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::Query;

    #[test]
    fn test_lower_zip_joins_on_row_numbers() {
        let query = with_ctx(|ctx| {
            lower(
                ctx,
                Query::from("Employee")
                    .order_by("e", |e| m(e, "Age"))
                    .zip(
                        Query::from("Customer"),
                        ("e", "c"),
                        |e, c| Expr::record(vec![("E", m(e, "Name")), ("C", m(c, "Name"))]),
                    ),
            )
        });
        let Some(TableExpr::Join {
            kind, outer, inner, ..
        }) = &query.select.table
        else {
            panic!("expected a join");
        };
        assert_eq!(*kind, JoinKind::Inner);
        let TableExpr::Subquery { select, .. } = outer.as_ref() else {
            panic!("expected a numbered subquery");
        };
        assert!(select.is_windowed);
        let has_window = select
            .projected_columns()
            .unwrap()
            .iter()
            .any(|(_, sql)| matches!(sql, SqlExpr::Window { order_by, .. } if order_by.len() == 1));
        assert!(has_window);
        assert!(matches!(inner.as_ref(), TableExpr::Subquery { .. }));
        assert_eq!(query.select.order_by.len(), 1);
        assert_eq!(field_names(&query.select.projection), vec!["E", "C"]);
    }
}
