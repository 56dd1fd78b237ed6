//! Aggregate operators: Count, LongCount, Sum, Average, Min, Max.
//!
//! An aggregate over a whole sequence becomes a scalar query
//! `SELECT AGG(x) FROM ...`. The same SQL shapes are produced for
//! aggregates over an open group by the group-aggregation pass, which
//! goes through [`SqlAggregateCall`] as well.
//!
//! Result semantics follow the host:
//!
//! | host          | SQL                         | empty input          |
//! |---------------|-----------------------------|----------------------|
//! | `Count()`     | `COUNT(*)`                  | 0                    |
//! | `LongCount()` | `COUNT_BIG(*)` on SQL Server| 0                    |
//! | `Sum(f)`      | `COALESCE(SUM(f), 0)`       | 0                    |
//! | `Average(f)`  | `AVG(CAST(f AS float))`     | null, or NoElements  |
//! | `Min/Max(f)`  | `MIN(f)` / `MAX(f)`         | null, or NoElements  |

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::compiler::translate::require_scalar;
use crate::config::Dialect;
use crate::error::QueryError;
use crate::expr::{AggregateFunc, Expr, QueryOp};
use crate::ir::{Clause, Projection, RelationalQuery, SqlAggregate, SqlExpr, SqlFunction};
use crate::value::{ScalarType, Type};

/// One SQL aggregate call under construction.
#[derive(Debug, Clone)]
pub(crate) struct SqlAggregateCall {
    pub func: AggregateFunc,
    /// `None` counts rows.
    pub arg: Option<SqlExpr>,
    pub distinct: bool,
    /// Rows failing the filter do not contribute.
    pub filter: Option<SqlExpr>,
    /// Aggregating over a group, which is never empty.
    pub grouped: bool,
}

impl SqlAggregateCall {
    pub fn build(self, result: &Type, dialect: Dialect) -> Result<SqlExpr, QueryError> {
        let Some(scalar) = result.as_scalar() else {
            return Err(QueryError::InvalidArgument(format!(
                "{} produces {}, not a scalar",
                self.func.name(),
                result.display_name()
            )));
        };

        match self.func {
            AggregateFunc::Count | AggregateFunc::LongCount => {
                let big = self.func == AggregateFunc::LongCount && dialect == Dialect::SqlServer;
                let arg = match self.filter {
                    Some(filter) => Some(case_when(
                        filter,
                        self.arg.unwrap_or_else(|| SqlExpr::int(1)),
                    )),
                    None => self.arg,
                };
                Ok(SqlExpr::Aggregate {
                    func: if big {
                        SqlAggregate::CountBig
                    } else {
                        SqlAggregate::Count
                    },
                    arg: arg.map(Box::new),
                    distinct: self.distinct,
                    ty: scalar,
                    nullable: false,
                })
            }
            AggregateFunc::Sum => {
                let arg = self.filtered_arg()?;
                let sum = SqlExpr::Aggregate {
                    func: SqlAggregate::Sum,
                    arg: Some(Box::new(arg)),
                    distinct: self.distinct,
                    ty: scalar,
                    nullable: true,
                };
                let zero = SqlExpr::Literal {
                    value: Type::scalar(scalar).default_value(),
                    ty: scalar,
                };
                Ok(SqlExpr::Function {
                    func: SqlFunction::Coalesce,
                    args: vec![sum, zero],
                    ty: scalar,
                    nullable: false,
                })
            }
            AggregateFunc::Average | AggregateFunc::Min | AggregateFunc::Max => {
                let has_filter = self.filter.is_some();
                let mut arg = self.filtered_arg()?;
                let func = match self.func {
                    AggregateFunc::Average => {
                        if arg.scalar_type().is_integral() {
                            arg = SqlExpr::Cast {
                                expr: Box::new(arg),
                                ty: ScalarType::Float64,
                            };
                        }
                        SqlAggregate::Avg
                    }
                    AggregateFunc::Min => SqlAggregate::Min,
                    _ => SqlAggregate::Max,
                };
                let nullable = !self.grouped || has_filter || arg.is_nullable();
                Ok(SqlExpr::Aggregate {
                    func,
                    arg: Some(Box::new(arg)),
                    distinct: self.distinct,
                    ty: scalar,
                    nullable,
                })
            }
        }
    }

    fn filtered_arg(&self) -> Result<SqlExpr, QueryError> {
        let Some(arg) = self.arg.clone() else {
            return Err(QueryError::InvalidArgument(format!(
                "{} requires a value to aggregate",
                self.func.name()
            )));
        };
        Ok(match &self.filter {
            Some(filter) => case_when(filter.clone(), arg),
            None => arg,
        })
    }
}

/// `CASE WHEN filter THEN value END`
fn case_when(filter: SqlExpr, value: SqlExpr) -> SqlExpr {
    let ty = value.scalar_type();
    SqlExpr::Case {
        arms: vec![(filter, value)],
        otherwise: Box::new(SqlExpr::null(ty)),
        ty,
        nullable: true,
    }
}

/// Lower an Aggregate node over a whole sequence.
pub fn lower_aggregate(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Aggregate {
        func,
        source,
        selector,
    } = op
    else {
        return Err(QueryError::InternalError(
            "lower_aggregate called on non-Aggregate node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Aggregate, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;

    let counting = matches!(func, AggregateFunc::Count | AggregateFunc::LongCount);
    let arg = match selector {
        Some(selector) => Some(ctx.bind_value(selector, &[row], func.name())?),
        None if counting => None,
        None => Some(require_scalar(&row, func.name())?),
    };

    let result = op.ty();
    let call = SqlAggregateCall {
        func: *func,
        arg,
        distinct: false,
        filter: None,
        grouped: false,
    };
    let sql = call.build(&result, ctx.dialect())?;
    trace!(aggregate = func.name(), "aggregate over sequence");

    let mut select = query.select;
    select.projection = Projection::Server(Expr::Sql(sql));
    select.order_by.clear();
    Ok(RelationalQuery::scalar(select, Some(*func), result))
}
