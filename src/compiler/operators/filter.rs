//! Where: add a predicate to the select.
//!
//! The predicate is bound against the source row and must translate to a
//! SQL search condition. A select that is limited, distinct, grouped or
//! windowed is pushed down first so the predicate filters its output.

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::QueryOp;
use crate::ir::{Clause, RelationalQuery};

/// Lower a Where node.
pub fn lower_filter(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Where { source, predicate } = op else {
        return Err(QueryError::InternalError(
            "lower_filter called on non-Where node".into(),
        ));
    };

    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Predicate, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;
    let sql = ctx.bind_predicate(predicate, &[row], "Where")?;
    query.select.add_to_predicate(sql, &mut ctx.ids)?;
    Ok(query)
}
