//! Equality rewriting.
//!
//! - [`EqualsCallRewriter`]: `a.Equals(b)` becomes `a == b`.
//! - [`EqualityNormalizer`]: a null literal moves to the right, record
//!   comparisons become member-wise, and comparisons with boolean
//!   constants collapse.
//! - [`KeyEqualityRewriter`]: entity comparisons become primary-key
//!   comparisons, and `x.Nav.Key` is reduced to `x.ForeignKey`.

use crate::compiler::compose::ComposeContext;
use crate::compiler::passes::Pass;
use crate::compiler::passes::optimize::{conjoin, disjoin, negate};
use crate::descriptor::DescriptorSet;
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, Method};
use crate::ir::projection::reduce_members;
use crate::value::Type;

// ── Equals calls ───────────────────────────────────────────────────────

pub struct EqualsCallRewriter;

impl Pass for EqualsCallRewriter {
    fn name(&self) -> &'static str {
        "equals-call"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| match e {
            Expr::Call {
                method: Method::Equals,
                mut args,
                ..
            } if args.len() == 2 => {
                let right = args.pop();
                let left = args.pop();
                match (left, right) {
                    (Some(l), Some(r)) => Ok(l.eq(r)),
                    _ => Err(QueryError::internal("Equals lost its operands")),
                }
            }
            other => Ok(other),
        })
    }
}

// ── Normalization ──────────────────────────────────────────────────────

pub struct EqualityNormalizer;

fn is_anonymous_record(expr: &Expr) -> bool {
    matches!(expr, Expr::Record { entity: None, .. })
}

fn normalize(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    if left.is_null_constant() && !right.is_null_constant() {
        return normalize(op, right, left);
    }

    if is_anonymous_record(&left) && is_anonymous_record(&right) {
        let (Expr::Record { fields: lf, .. }, Expr::Record { fields: rf, .. }) = (&left, &right)
        else {
            return Expr::binary(op, left, right);
        };
        let same_shape =
            lf.len() == rf.len() && lf.iter().zip(rf.iter()).all(|((a, _), (b, _))| a == b);
        if same_shape {
            let pairs = lf.iter().zip(rf.iter()).map(|((_, l), (_, r))| {
                normalize(op, l.clone(), r.clone())
            });
            let combined = if op == BinaryOp::Eq {
                pairs.reduce(conjoin)
            } else {
                pairs.reduce(disjoin)
            };
            if let Some(combined) = combined {
                return combined;
            }
        }
    }

    if let Some(b) = right.as_bool_constant()
        && matches!(left.ty(), Type::Scalar { nullable: false, .. })
        && left.ty().is_bool()
    {
        // x == true, x != false => x ; x == false, x != true => !x
        return if b == (op == BinaryOp::Eq) {
            left
        } else {
            negate(left)
        };
    }

    Expr::binary(op, left, right)
}

impl Pass for EqualityNormalizer {
    fn name(&self) -> &'static str {
        "equality-normalizer"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| {
            Ok(match e {
                Expr::Binary {
                    op: op @ (BinaryOp::Eq | BinaryOp::Ne),
                    left,
                    right,
                } => normalize(op, *left, *right),
                other => other,
            })
        })
    }
}

// ── Key equality ───────────────────────────────────────────────────────

pub struct KeyEqualityRewriter;

/// `base.property`, reduced through a reference navigation when
/// `base` is `x.Nav` and `property` is part of the target's key.
pub(crate) fn key_member(
    base: &Expr,
    property: &str,
    descriptors: &DescriptorSet,
) -> Result<Expr, QueryError> {
    if let Some(reduced) = reduce_navigation_key(base, property, descriptors)? {
        return reduce_members(reduced);
    }
    reduce_members(base.clone().member(property, descriptors)?)
}

/// `x.Nav.Key` where `Nav` is a reference navigation → `x.ForeignKey`.
fn reduce_navigation_key(
    base: &Expr,
    property: &str,
    descriptors: &DescriptorSet,
) -> Result<Option<Expr>, QueryError> {
    let Expr::Member {
        base: owner,
        name: nav,
        ..
    } = base
    else {
        return Ok(None);
    };
    let Type::Entity(owner_entity) = owner.ty() else {
        return Ok(None);
    };
    let Some((navigation, pk)) = descriptors.reference_key(&owner_entity, nav) else {
        return Ok(None);
    };
    let Some(position) = pk.iter().position(|k| k == property) else {
        return Ok(None);
    };
    let fk = &navigation.foreign_key[position];
    Ok(Some((**owner).clone().member(fk, descriptors)?))
}

/// Primary-key members of an entity-typed value, in key order.
pub(crate) fn entity_key_members(
    expr: &Expr,
    entity: &str,
    descriptors: &DescriptorSet,
) -> Result<Vec<Expr>, QueryError> {
    let keys = descriptors.primary_key(entity)?.to_vec();
    keys.iter()
        .map(|k| {
            if expr.is_null_constant() {
                Ok(Expr::null(descriptors.member_type(entity, k)?))
            } else {
                key_member(expr, k, descriptors)
            }
        })
        .collect()
}

fn entity_of(expr: &Expr) -> Option<String> {
    match expr.ty() {
        Type::Entity(name) => Some(name),
        _ => None,
    }
}

fn rewrite_key_equality(
    op: BinaryOp,
    left: Expr,
    right: Expr,
    descriptors: &DescriptorSet,
) -> Result<Expr, QueryError> {
    let entity = match (entity_of(&left), entity_of(&right)) {
        (Some(l), _) if !left.is_null_constant() => l,
        (_, Some(r)) if !right.is_null_constant() => r,
        _ => return Ok(Expr::binary(op, left, right)),
    };
    let other_is_entity = right.is_null_constant()
        || left.is_null_constant()
        || (entity_of(&left).is_some() && entity_of(&right).is_some());
    if !other_is_entity {
        return Ok(Expr::binary(op, left, right));
    }
    let l = entity_key_members(&left, &entity, descriptors)?;
    let r = entity_key_members(&right, &entity, descriptors)?;
    let pairs = l.into_iter().zip(r).map(|(a, b)| Expr::binary(op, a, b));
    let combined = if op == BinaryOp::Eq {
        pairs.reduce(conjoin)
    } else {
        pairs.reduce(disjoin)
    };
    combined.ok_or_else(|| QueryError::InvalidArgument(format!("entity {entity} has no key")))
}

impl Pass for KeyEqualityRewriter {
    fn name(&self) -> &'static str {
        "key-equality"
    }

    fn apply(&self, expr: Expr, ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        let descriptors = ctx.descriptors;
        expr.transform_up(&mut |e| match e {
            Expr::Binary {
                op: op @ (BinaryOp::Eq | BinaryOp::Ne),
                left,
                right,
            } => rewrite_key_equality(op, *left, *right, descriptors),
            Expr::Member { base, name, ty } => {
                match reduce_navigation_key(&base, &name, descriptors)? {
                    Some(reduced) => Ok(reduced),
                    None => Ok(Expr::Member { base, name, ty }),
                }
            }
            other => Ok(other),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;

    #[test]
    fn test_equals_call_becomes_operator() {
        let a = Expr::param("a", Type::int32());
        let b = Expr::param("b", Type::int32());
        let e = Expr::call(Method::Equals, vec![a.clone(), b.clone()]);
        let out = with_ctx(|ctx| EqualsCallRewriter.apply(e, ctx));
        assert_eq!(out, a.eq(b));
    }

    #[test]
    fn test_null_moves_right() {
        let a = Expr::param("a", Type::string());
        let e = Expr::null(Type::string()).eq(a.clone());
        let out = with_ctx(|ctx| EqualityNormalizer.apply(e, ctx));
        assert_eq!(out, a.eq(Expr::null(Type::string())));
    }

    #[test]
    fn test_record_equality_is_member_wise() {
        let a = Expr::param("a", Type::int32());
        let b = Expr::param("b", Type::int32());
        let l = Expr::record(vec![("X", a.clone()), ("Y", b.clone())]);
        let r = Expr::record(vec![("X", Expr::constant(1)), ("Y", Expr::constant(2))]);
        let out = with_ctx(|ctx| EqualityNormalizer.apply(l.eq(r), ctx));
        assert_eq!(out, a.eq(Expr::constant(1)).and(b.eq(Expr::constant(2))));
    }

    #[test]
    fn test_bool_constant_comparison_collapses() {
        let flag = Expr::Sql(crate::ir::SqlExpr::Column {
            table: crate::ir::TableId(0),
            name: "Active".into(),
            ty: crate::value::ScalarType::Bool,
            nullable: false,
        });
        let out = with_ctx(|ctx| EqualityNormalizer.apply(flag.clone().eq(Expr::constant(false)), ctx));
        assert_eq!(out, Expr::not(flag));
    }

    #[test]
    fn test_navigation_key_reduces_to_foreign_key() {
        let descriptors = sample_descriptors();
        let order = Expr::param("o", Type::Entity("Order".into()));
        let customer_id = order
            .clone()
            .member("Customer", &descriptors)
            .unwrap()
            .member("Id", &descriptors)
            .unwrap();
        let out = with_ctx(|ctx| KeyEqualityRewriter.apply(customer_id, ctx));
        assert_eq!(out, order.member("CustomerId", &descriptors).unwrap());
    }

    #[test]
    fn test_entity_equality_compares_keys() {
        let descriptors = sample_descriptors();
        let a = Expr::param("a", Type::Entity("Customer".into()));
        let b = Expr::param("b", Type::Entity("Customer".into()));
        let out = with_ctx(|ctx| KeyEqualityRewriter.apply(a.clone().eq(b.clone()), ctx));
        assert_eq!(
            out,
            a.member("Id", &descriptors)
                .unwrap()
                .eq(b.member("Id", &descriptors).unwrap())
        );
    }

    #[test]
    fn test_entity_compared_with_null() {
        let descriptors = sample_descriptors();
        let order = Expr::param("o", Type::Entity("Order".into()));
        let customer = order.clone().member("Customer", &descriptors).unwrap();
        let e = customer.ne(Expr::null(Type::Entity("Customer".into())));
        let out = with_ctx(|ctx| KeyEqualityRewriter.apply(e, ctx));
        assert_eq!(
            out,
            order
                .member("CustomerId", &descriptors)
                .unwrap()
                .ne(Expr::null(Type::int32()))
        );
    }
}
