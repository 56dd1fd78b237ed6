//! DefaultIfEmpty.
//!
//! Lowering only marks the query. The flag is realized as a left join
//! against a one-row anchor by the next operator that consumes the
//! sequence, or left for the materializer when the query is the result
//! itself. Left-joining `SelectMany` sources read it directly as "outer".

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::QueryOp;
use crate::ir::RelationalQuery;

/// Lower a DefaultIfEmpty node.
pub fn lower_default_if_empty(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::DefaultIfEmpty { source } = op else {
        return Err(QueryError::InternalError(
            "lower_default_if_empty called on non-DefaultIfEmpty node".into(),
        ));
    };

    let mut query = ctx.lower_source(source)?;
    if !query.is_sequence() {
        return Err(QueryError::TypeMismatch(format!(
            "DefaultIfEmpty over {}",
            query.ty().display_name()
        )));
    }
    query.default_if_empty = true;
    Ok(query)
}
