//! Parameterization: separating a query's shape from its values.
//!
//! Before a query is hashed, every captured value and every literal of a
//! type that is unsafe to inline is replaced by a numbered
//! [`Expr::Parameter`] slot, and captured sub-queries are inlined. Two
//! queries that differ only in those values produce identical trees, and
//! so share one cache key and one compiled plan.
//!
//! Slots are numbered in post-order, so the numbering depends on the tree
//! shape alone.

use tracing::trace;

use crate::config::CompilerConfig;
use crate::error::QueryError;
use crate::expr::Expr;
use crate::hash::structural_hash;
use crate::value::{ScalarType, Type, Value};

/// A query tree with its values lifted out.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterizedQuery {
    pub expr: Expr,
    /// Runtime values, indexed by slot.
    pub values: Vec<Value>,
}

impl ParameterizedQuery {
    /// Plan cache key.
    pub fn key(&self) -> u128 {
        structural_hash(&self.expr)
    }
}

/// Lift values out of `expr`.
pub fn parameterize(expr: Expr, config: &CompilerConfig) -> Result<ParameterizedQuery, QueryError> {
    let mut values = Vec::new();
    let expr = inline_captured_queries(expr)?;
    let expr = expr.transform_up(&mut |node| {
        Ok(match node {
            Expr::Captured { value, ty } => slot(&mut values, value, ty),
            Expr::Constant { value, ty } if lifts_constant(&value, &ty, config) => {
                slot(&mut values, value, ty)
            }
            other => other,
        })
    })?;
    trace!(parameters = values.len(), "parameterized query");
    Ok(ParameterizedQuery { expr, values })
}

fn slot(values: &mut Vec<Value>, value: Value, ty: Type) -> Expr {
    let index = values.len();
    values.push(value);
    Expr::Parameter {
        index,
        path: Vec::new(),
        ty,
    }
}

/// Replace captured sub-queries with their body, at every depth.
fn inline_captured_queries(expr: Expr) -> Result<Expr, QueryError> {
    match expr {
        Expr::CapturedQuery(inner) => inline_captured_queries(*inner),
        other => other.map_children(&mut inline_captured_queries),
    }
}

/// Literals stay in the SQL text when they are null, when their type is
/// safe to inline, or when they are strings and string parameterization
/// is off. Constant lists stay too: they are expanded into `IN` lists.
fn lifts_constant(value: &Value, ty: &Type, config: &CompilerConfig) -> bool {
    if value.is_null() {
        return false;
    }
    match ty.as_scalar() {
        Some(ScalarType::String) => config.parameterize_strings,
        Some(scalar) => !scalar.is_safe_literal(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::m;
    use crate::expr::Query;

    fn by_name(name: Expr) -> Expr {
        Query::from("Employee")
            .filter("e", |e| m(e, "Name").eq(name))
            .into_expr()
    }

    #[test]
    fn test_captured_values_share_a_key() {
        let config = CompilerConfig::default();
        let a = parameterize(by_name(Expr::captured("Ann", Type::string())), &config).unwrap();
        let b = parameterize(by_name(Expr::captured("Bob", Type::string())), &config).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.values, vec![Value::from("Ann")]);
        assert_eq!(b.values, vec![Value::from("Bob")]);
    }

    #[test]
    fn test_string_constants_are_lifted_by_default() {
        let config = CompilerConfig::default();
        let a = parameterize(by_name(Expr::constant("Ann")), &config).unwrap();
        let b = parameterize(by_name(Expr::constant("Bob")), &config).unwrap();
        assert_eq!(a.key(), b.key());
        assert_eq!(a.values, vec![Value::from("Ann")]);
    }

    #[test]
    fn test_string_constants_inline_when_disabled() {
        let config = CompilerConfig {
            parameterize_strings: false,
            ..CompilerConfig::default()
        };
        let a = parameterize(by_name(Expr::constant("Ann")), &config).unwrap();
        let b = parameterize(by_name(Expr::constant("Bob")), &config).unwrap();
        assert_ne!(a.key(), b.key());
        assert!(a.values.is_empty());
    }

    #[test]
    fn test_safe_literals_stay_in_the_key() {
        let config = CompilerConfig::default();
        let take = |n: i32| {
            parameterize(Query::from("Employee").take(Expr::constant(n)).into_expr(), &config)
                .unwrap()
        };
        assert_ne!(take(1).key(), take(2).key());
        assert!(take(1).values.is_empty());
    }

    #[test]
    fn test_null_constants_are_not_lifted() {
        let config = CompilerConfig::default();
        let q = parameterize(by_name(Expr::null(Type::string())), &config).unwrap();
        assert!(q.values.is_empty());
    }

    #[test]
    fn test_captured_query_is_inlined() {
        let config = CompilerConfig::default();
        let inner = Query::from("Employee").into_expr();
        let captured = Query::new(Expr::CapturedQuery(Box::new(inner.clone())))
            .take(Expr::constant(3))
            .into_expr();
        let direct = Query::new(inner).take(Expr::constant(3)).into_expr();
        let a = parameterize(captured, &config).unwrap();
        let b = parameterize(direct, &config).unwrap();
        assert_eq!(a.expr, b.expr);
    }

    #[test]
    fn test_slots_number_in_post_order() {
        let config = CompilerConfig::default();
        let expr = Query::from("Employee")
            .filter("e", |e| {
                m(e.clone(), "Age")
                    .gt(Expr::captured(30, Type::int32()))
                    .and(m(e, "Age").lt(Expr::captured(60, Type::int32())))
            })
            .into_expr();
        let q = parameterize(expr, &config).unwrap();
        assert_eq!(q.values, vec![Value::Int32(30), Value::Int32(60)]);
    }
}
