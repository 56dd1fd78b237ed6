//! OfType: narrow a sequence of entities to one type of a hierarchy.
//!
//! Over a polymorphic row the arms not assignable to the target are
//! dropped and the rows are filtered by the remaining arms' discriminator
//! tests. Over a plain entity row the operator is either an upcast (no
//! change) or selects nothing.

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::compiler::translate::{constant_predicate, require_predicate};
use crate::error::QueryError;
use crate::expr::{Expr, QueryOp};
use crate::ir::{Clause, RelationalQuery};
use crate::value::Type;

/// Lower an OfType node.
pub fn lower_of_type(
    ctx: &mut ComposeContext,
    op: &QueryOp,
) -> Result<RelationalQuery, QueryError> {
    let QueryOp::OfType { source, entity } = op else {
        return Err(QueryError::InternalError(
            "lower_of_type called on non-OfType node".into(),
        ));
    };

    let descriptors = ctx.descriptors;
    descriptors.entity(entity)?;
    let mut query = ctx.sequence(source)?;
    query.select.prepare(Clause::Predicate, &mut ctx.ids)?;
    let row = query.select.projection.flatten()?;

    match row {
        Expr::Polymorphic(poly) => {
            let narrowed = poly.filter(entity, descriptors);
            trace!(
                target = %entity,
                arms = narrowed.arms.len(),
                of = poly.arms.len(),
                "narrowing polymorphic row"
            );
            if narrowed.arms.len() < poly.arms.len() {
                let predicate = match narrowed.any_test() {
                    Some(test) => require_predicate(&test, "OfType")?,
                    None => constant_predicate(false),
                };
                query.select.add_to_predicate(predicate, &mut ctx.ids)?;
            }
            let body = match narrowed.arms.as_slice() {
                [only] => only.shape.clone(),
                _ => Expr::Polymorphic(Box::new(narrowed)),
            };
            query.select.projection = ctx.reclassify(body)?;
        }
        other => {
            let Type::Entity(static_type) = other.ty() else {
                return Err(QueryError::unsupported(format!(
                    "OfType over {}",
                    other.ty().display_name()
                )));
            };
            if !descriptors.is_assignable(&static_type, entity) {
                query
                    .select
                    .add_to_predicate(constant_predicate(false), &mut ctx.ids)?;
            }
        }
    }

    query.row_type = Type::Entity(entity.clone());
    Ok(query)
}
