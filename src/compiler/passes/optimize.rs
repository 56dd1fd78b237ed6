//! Optimizers: boolean simplification and null/default folding.
//!
//! Both produce a normal form that they leave unchanged on a second run.
//! The boolean form has no double negation, no negated constant, no
//! negated equality, no negated conjunction or disjunction, no `&&`/`||`
//! with a constant operand and no conditional with a constant test.

use crate::compiler::compose::ComposeContext;
use crate::compiler::passes::Pass;
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::value::{Type, Value};

// ── Smart constructors ─────────────────────────────────────────────────

fn bool_constant(value: bool) -> Expr {
    Expr::Constant {
        value: Value::Bool(value),
        ty: Type::bool(),
    }
}

/// `!e` in normal form.
pub fn negate(expr: Expr) -> Expr {
    if let Some(b) = expr.as_bool_constant() {
        return bool_constant(!b);
    }
    match expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => *operand,
        Expr::Binary {
            op: op @ (BinaryOp::Eq | BinaryOp::Ne),
            left,
            right,
        } => Expr::Binary {
            op: if op == BinaryOp::Eq {
                BinaryOp::Ne
            } else {
                BinaryOp::Eq
            },
            left,
            right,
        },
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => disjoin(negate(*left), negate(*right)),
        Expr::Binary {
            op: BinaryOp::Or,
            left,
            right,
        } => conjoin(negate(*left), negate(*right)),
        other => Expr::not(other),
    }
}

/// `l && r` with constant operands folded.
pub fn conjoin(left: Expr, right: Expr) -> Expr {
    match (left.as_bool_constant(), right.as_bool_constant()) {
        (Some(false), _) | (_, Some(false)) => bool_constant(false),
        (Some(true), _) => right,
        (_, Some(true)) => left,
        _ => left.and(right),
    }
}

/// `l || r` with constant operands folded.
pub fn disjoin(left: Expr, right: Expr) -> Expr {
    match (left.as_bool_constant(), right.as_bool_constant()) {
        (Some(true), _) | (_, Some(true)) => bool_constant(true),
        (Some(false), _) => right,
        (_, Some(false)) => left,
        _ => left.or(right),
    }
}

// ── Boolean optimizer ──────────────────────────────────────────────────

pub struct BooleanOptimizer;

impl BooleanOptimizer {
    pub fn optimize(expr: Expr) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| {
            Ok(match e {
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand,
                } => negate(*operand),
                Expr::Binary {
                    op: BinaryOp::And,
                    left,
                    right,
                } => conjoin(*left, *right),
                Expr::Binary {
                    op: BinaryOp::Or,
                    left,
                    right,
                } => disjoin(*left, *right),
                Expr::Conditional {
                    test,
                    if_true,
                    if_false,
                } => match test.as_bool_constant() {
                    Some(true) => *if_true,
                    Some(false) => *if_false,
                    None => Expr::Conditional {
                        test,
                        if_true,
                        if_false,
                    },
                },
                other => other,
            })
        })
    }
}

impl Pass for BooleanOptimizer {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        BooleanOptimizer::optimize(expr)
    }
}

// ── Null/default optimizer ─────────────────────────────────────────────

pub struct NullDefaultOptimizer;

/// Whether the static type of `expr` is a trustworthy statement about
/// nullability. Member and parameter types come from declarations and do
/// not account for rows read from the optional side of an outer join.
fn known_non_nullable(expr: &Expr) -> bool {
    let declared = matches!(expr, Expr::Member { .. } | Expr::Param { .. });
    !declared && matches!(expr.ty(), Type::Scalar { nullable: false, .. })
}

fn default_constant(ty: &Type) -> Expr {
    Expr::Constant {
        value: ty.default_value(),
        ty: ty.clone(),
    }
}

impl NullDefaultOptimizer {
    pub fn optimize(expr: Expr) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| {
            Ok(match e {
                Expr::Binary {
                    op: op @ (BinaryOp::Eq | BinaryOp::Ne),
                    left,
                    right,
                } => {
                    let left = match *left {
                        Expr::Default(ty) => default_constant(&ty),
                        other => other,
                    };
                    let right = match *right {
                        Expr::Default(ty) => default_constant(&ty),
                        other => other,
                    };
                    let against_null = (left.is_null_constant() && known_non_nullable(&right))
                        || (right.is_null_constant() && known_non_nullable(&left));
                    if against_null {
                        bool_constant(op == BinaryOp::Ne)
                    } else {
                        Expr::binary(op, left, right)
                    }
                }
                Expr::Coalesce { left, right } => {
                    if left.is_null_constant() {
                        *right
                    } else if known_non_nullable(&left) {
                        *left
                    } else {
                        Expr::Coalesce { left, right }
                    }
                }
                other => other,
            })
        })
    }
}

impl Pass for NullDefaultOptimizer {
    fn name(&self) -> &'static str {
        "null-default"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        NullDefaultOptimizer::optimize(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{SqlExpr, TableId};
    use crate::value::ScalarType;

    fn flag(name: &str) -> Expr {
        Expr::param(name, Type::bool())
    }

    fn col(nullable: bool) -> Expr {
        Expr::Sql(SqlExpr::Column {
            table: TableId(0),
            name: "Age".into(),
            ty: ScalarType::Int32,
            nullable,
        })
    }

    #[test]
    fn test_double_negation() {
        let e = Expr::not(Expr::not(flag("a")));
        assert_eq!(BooleanOptimizer::optimize(e).unwrap(), flag("a"));
    }

    #[test]
    fn test_de_morgan() {
        let e = Expr::not(flag("a").and(flag("b")));
        let expected = Expr::not(flag("a")).or(Expr::not(flag("b")));
        assert_eq!(BooleanOptimizer::optimize(e).unwrap(), expected);
    }

    #[test]
    fn test_negated_equality_flips() {
        let e = Expr::not(col(false).eq(Expr::constant(3)));
        assert_eq!(
            BooleanOptimizer::optimize(e).unwrap(),
            col(false).ne(Expr::constant(3))
        );
    }

    #[test]
    fn test_constant_folding() {
        let e = flag("a").and(Expr::constant(true)).or(Expr::constant(false));
        assert_eq!(BooleanOptimizer::optimize(e).unwrap(), flag("a"));
        let e = flag("a").and(Expr::not(Expr::constant(true)));
        assert_eq!(BooleanOptimizer::optimize(e).unwrap(), Expr::constant(false));
    }

    #[test]
    fn test_boolean_idempotent() {
        let e = Expr::not(flag("a").or(Expr::not(flag("b").and(Expr::constant(true)))));
        let once = BooleanOptimizer::optimize(e).unwrap();
        let twice = BooleanOptimizer::optimize(once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_nullable_compared_with_null() {
        let e = col(false).eq(Expr::null(Type::int32()));
        assert_eq!(NullDefaultOptimizer::optimize(e).unwrap(), Expr::constant(false));
        let e = col(false).ne(Expr::null(Type::int32()));
        assert_eq!(NullDefaultOptimizer::optimize(e).unwrap(), Expr::constant(true));
        // nullable columns keep the comparison
        let e = col(true).eq(Expr::null(Type::int32()));
        assert_eq!(NullDefaultOptimizer::optimize(e.clone()).unwrap(), e);
    }

    #[test]
    fn test_declared_members_are_not_folded() {
        let member = Expr::Member {
            base: Box::new(Expr::param("o", Type::Entity("Order".into()))),
            name: "Id".into(),
            ty: Type::int32(),
        };
        let e = member.eq(Expr::null(Type::int32()));
        assert_eq!(NullDefaultOptimizer::optimize(e.clone()).unwrap(), e);
    }

    #[test]
    fn test_default_becomes_constant() {
        let e = col(false).eq(Expr::Default(Type::int32()));
        assert_eq!(
            NullDefaultOptimizer::optimize(e).unwrap(),
            col(false).eq(Expr::Constant {
                value: Value::Int32(0),
                ty: Type::int32()
            })
        );
    }

    #[test]
    fn test_coalesce_of_non_nullable() {
        let e = Expr::Coalesce {
            left: Box::new(col(false)),
            right: Box::new(Expr::constant(0)),
        };
        assert_eq!(NullDefaultOptimizer::optimize(e).unwrap(), col(false));
    }
}
