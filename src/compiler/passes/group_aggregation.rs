//! Aggregates over the group of an open GROUP BY.
//!
//! `g.Count()`, `g.Where(p).Count()`, `g.Select(f).Sum()`,
//! `g.Select(f).Distinct().Count()` and the like collapse into SQL
//! aggregate functions of the grouped select:
//!
//! | host                                  | SQL                                   |
//! |---------------------------------------|---------------------------------------|
//! | `g.Count()`                           | `COUNT(*)`                            |
//! | `g.Where(p).Count()`                  | `COUNT(CASE WHEN p THEN 1 END)`       |
//! | `g.Select(f).Distinct().Count()`      | `COUNT(DISTINCT f)`                   |
//! | `g.Where(p).Sum(f)`                   | `COALESCE(SUM(CASE WHEN p THEN f END), 0)` |
//!
//! Chains containing any other operator, or selectors with no SQL form,
//! are left untouched; composition later expands the group into a
//! correlated subquery instead.

use crate::compiler::compose::ComposeContext;
use crate::compiler::operators::aggregate::SqlAggregateCall;
use crate::compiler::passes::Pass;
use crate::compiler::translate::{translate_predicate, translate_scalar};
use crate::error::QueryError;
use crate::expr::{AggregateFunc, Expr, Lambda, QueryOp};
use crate::ir::SqlExpr;
use crate::value::Type;

pub struct GroupAggregationRewriter;

impl Pass for GroupAggregationRewriter {
    fn name(&self) -> &'static str {
        "group-aggregation"
    }

    fn apply(&self, expr: Expr, ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| {
            let Expr::Query(op) = &e else {
                return Ok(e);
            };
            let QueryOp::Aggregate {
                func,
                source,
                selector,
            } = op.as_ref()
            else {
                return Ok(e);
            };
            let result = op.ty();
            match aggregate_over_group(ctx, *func, source, selector.as_ref(), &result)? {
                Some(sql) => Ok(Expr::Sql(sql)),
                None => Ok(e),
            }
        })
    }
}

enum Step<'a> {
    Where(&'a Lambda),
    Select(&'a Lambda),
    Distinct,
}

fn aggregate_over_group(
    ctx: &mut ComposeContext<'_>,
    func: AggregateFunc,
    source: &Expr,
    selector: Option<&Lambda>,
    result: &Type,
) -> Result<Option<SqlExpr>, QueryError> {
    let mut steps = Vec::new();
    let mut current = source;
    let group = loop {
        match current {
            Expr::GroupByResult(group) => break group,
            Expr::Query(op) => match op.as_ref() {
                QueryOp::Where { source, predicate } => {
                    steps.push(Step::Where(predicate));
                    current = source;
                }
                QueryOp::Select { source, selector } => {
                    steps.push(Step::Select(selector));
                    current = source;
                }
                QueryOp::Distinct { source } => {
                    steps.push(Step::Distinct);
                    current = source;
                }
                _ => return Ok(None),
            },
            _ => return Ok(None),
        }
    };
    steps.reverse();

    let mut element = group.element.clone();
    let mut filter: Option<SqlExpr> = None;
    let mut distinct = false;
    for step in steps {
        match step {
            Step::Where(predicate) => {
                let bound = ctx.bind(predicate, std::slice::from_ref(&element))?;
                let Some(sql) = translate_predicate(&bound) else {
                    return Ok(None);
                };
                filter = Some(match filter {
                    Some(existing) => existing.and(sql),
                    None => sql,
                });
            }
            // A projection after DISTINCT changes which rows are distinct.
            Step::Select(_) if distinct => return Ok(None),
            Step::Select(selector) => element = ctx.bind(selector, &[element])?,
            Step::Distinct => distinct = true,
        }
    }

    let counting = matches!(func, AggregateFunc::Count | AggregateFunc::LongCount);
    let arg = match selector {
        Some(_) if distinct => return Ok(None),
        Some(selector) => Some(ctx.bind(selector, &[element])?),
        None if distinct || !counting => Some(element),
        None => None,
    };
    let arg = match arg {
        Some(arg) => match translate_scalar(&arg) {
            Some(sql) => Some(sql),
            None => return Ok(None),
        },
        None => None,
    };

    let call = SqlAggregateCall {
        func,
        arg,
        distinct,
        filter,
        grouped: true,
    };
    call.build(result, ctx.config.dialect).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::Query;
    use crate::ir::{GroupByResult, Projection, SelectExpr, SqlAggregate, TableExpr, TableId};
    use crate::value::ScalarType;

    fn salary() -> Expr {
        Expr::Sql(SqlExpr::Column {
            table: TableId(0),
            name: "Salary".into(),
            ty: ScalarType::Float64,
            nullable: false,
        })
    }

    fn group() -> Expr {
        let element = Expr::record(vec![("Salary", salary())]);
        let select = SelectExpr::new(
            Projection::Server(element.clone()),
            Some(TableExpr::base(TableId(0), "Employees", None)),
        );
        Expr::GroupByResult(Box::new(GroupByResult {
            select: Box::new(select),
            key: Expr::constant(1),
            element,
        }))
    }

    fn row_salary(row: Expr) -> Expr {
        Expr::Member {
            base: Box::new(row),
            name: "Salary".into(),
            ty: Type::float64(),
        }
    }

    #[test]
    fn test_count_becomes_count_star() {
        let e = Query::new(group()).count();
        let out = with_ctx(|ctx| GroupAggregationRewriter.apply(e, ctx));
        assert_eq!(out, Expr::Sql(SqlExpr::count_star(false)));
    }

    #[test]
    fn test_filtered_count_uses_case() {
        let e = Query::new(group()).count_where("x", |x| row_salary(x).gt(Expr::constant(10.0)));
        let out = with_ctx(|ctx| GroupAggregationRewriter.apply(e, ctx));
        let Expr::Sql(SqlExpr::Aggregate {
            func: SqlAggregate::Count,
            arg: Some(arg),
            ..
        }) = out
        else {
            panic!("expected COUNT, got {out:?}");
        };
        assert!(matches!(*arg, SqlExpr::Case { .. }));
    }

    #[test]
    fn test_sum_is_coalesced() {
        let e = Query::new(group()).sum("x", row_salary);
        let out = with_ctx(|ctx| GroupAggregationRewriter.apply(e, ctx));
        let Expr::Sql(sql) = out else {
            panic!("expected SQL")
        };
        assert!(!sql.is_nullable());
        assert!(sql.contains_aggregate());
    }

    #[test]
    fn test_distinct_count() {
        let e = Query::new(group()).select("x", row_salary).distinct().count();
        let out = with_ctx(|ctx| GroupAggregationRewriter.apply(e, ctx));
        assert!(matches!(
            out,
            Expr::Sql(SqlExpr::Aggregate {
                distinct: true,
                arg: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_other_operators_back_off() {
        let e = Query::new(group()).take(Expr::constant(2)).count();
        let out = with_ctx(|ctx| GroupAggregationRewriter.apply(e.clone(), ctx));
        assert_eq!(out, e);
    }
}
