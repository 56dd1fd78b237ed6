//! Member and flag rewriting.

use crate::compiler::compose::ComposeContext;
use crate::compiler::passes::Pass;
use crate::error::QueryError;
use crate::expr::{AggregateFunc, BinaryOp, Expr, Method, QueryOp};
use crate::value::Type;

/// `flags.HasFlag(f)` becomes `(flags & f) == f`.
pub struct EnumFlagsRewriter;

impl Pass for EnumFlagsRewriter {
    fn name(&self) -> &'static str {
        "enum-flags"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| match e {
            Expr::Call {
                method: Method::HasFlag,
                args,
                ty,
            } => match <[Expr; 2]>::try_from(args) {
                Ok([value, flag]) => {
                    Ok(Expr::binary(BinaryOp::BitAnd, value, flag.clone()).eq(flag))
                }
                Err(args) => Ok(Expr::Call {
                    method: Method::HasFlag,
                    args,
                    ty,
                }),
            },
            other => Ok(other),
        })
    }
}

/// `HasValue`, `Value` on nullable scalars and `Count` on sequences.
pub struct MemberRewriter;

impl Pass for MemberRewriter {
    fn name(&self) -> &'static str {
        "members"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| {
            let Expr::Member { base, name, ty } = e else {
                return Ok(e);
            };
            let base_ty = base.ty();
            Ok(match (&base_ty, name.as_str()) {
                (Type::Scalar { nullable: true, .. }, "HasValue") => {
                    let null = Expr::null(base_ty.clone());
                    (*base).ne(null)
                }
                (Type::Scalar { nullable: true, .. }, "Value") => Expr::Convert {
                    operand: base,
                    ty: base_ty.with_nullable(false),
                },
                (Type::Sequence(_) | Type::Grouping { .. }, "Count") => {
                    Expr::query(QueryOp::Aggregate {
                        func: AggregateFunc::Count,
                        source: *base,
                        selector: None,
                    })
                }
                _ => Expr::Member { base, name, ty },
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::value::ScalarType;

    #[test]
    fn test_has_flag() {
        let flags = Expr::param("f", Type::int32());
        let e = Expr::call(Method::HasFlag, vec![flags.clone(), Expr::constant(4)]);
        let out = with_ctx(|ctx| EnumFlagsRewriter.apply(e, ctx));
        assert_eq!(
            out,
            Expr::binary(BinaryOp::BitAnd, flags, Expr::constant(4)).eq(Expr::constant(4))
        );
    }

    #[test]
    fn test_has_value_and_value() {
        let set = sample_descriptors();
        let x = Expr::param("x", Type::nullable(ScalarType::Int32));
        let has = x.clone().member("HasValue", &set).unwrap();
        let out = with_ctx(|ctx| MemberRewriter.apply(has, ctx));
        assert_eq!(out, x.clone().ne(Expr::null(Type::nullable(ScalarType::Int32))));

        let value = x.clone().member("Value", &set).unwrap();
        let out = with_ctx(|ctx| MemberRewriter.apply(value, ctx));
        assert_eq!(out.ty(), Type::int32());
    }

    #[test]
    fn test_sequence_count_becomes_aggregate() {
        let set = sample_descriptors();
        let d = Expr::param("d", Type::Entity("Department".into()));
        let count = d.member("Employees", &set).unwrap().member("Count", &set).unwrap();
        let out = with_ctx(|ctx| MemberRewriter.apply(count, ctx));
        assert!(matches!(out, Expr::Query(op) if matches!(*op, QueryOp::Aggregate { func: AggregateFunc::Count, .. })));
    }
}
