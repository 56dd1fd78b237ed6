//! Containment over in-memory lists.
//!
//! `list.Contains(x)` arrives either as a method call on a captured list
//! or as the query form `Contains(list, x)`. The first pass normalizes
//! the call to the query form; the second turns the query form into an
//! `IN` predicate when the list is a runtime parameter or a literal and
//! the item has a SQL form. Anything else is left for the quantifier
//! operator, which lowers containment over a relational source to
//! `EXISTS`.

use crate::compiler::compose::ComposeContext;
use crate::compiler::passes::Pass;
use crate::compiler::translate::{constant_predicate, translate_scalar};
use crate::error::QueryError;
use crate::expr::{Expr, Method, QueryOp};
use crate::ir::{InSet, SqlExpr};
use crate::value::Value;

pub struct ListContainsRewriter;

impl Pass for ListContainsRewriter {
    fn name(&self) -> &'static str {
        "list-contains"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| match e {
            Expr::Call {
                method: Method::ListContains,
                args,
                ty,
            } => match <[Expr; 2]>::try_from(args) {
                Ok([source, item]) => Ok(Expr::query(QueryOp::Contains { source, item })),
                Err(args) => Err(QueryError::InvalidArgument(format!(
                    "Contains takes a list and an item, got {} argument(s) of {}",
                    args.len(),
                    ty.display_name()
                ))),
            },
            other => Ok(other),
        })
    }
}

pub struct ContainsToInRewriter;

impl Pass for ContainsToInRewriter {
    fn name(&self) -> &'static str {
        "contains-to-in"
    }

    fn apply(&self, expr: Expr, _ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        expr.transform_up(&mut |e| {
            let Expr::Query(op) = e else {
                return Ok(e);
            };
            let QueryOp::Contains { source, item } = *op else {
                return Ok(Expr::Query(op));
            };
            match in_predicate(&source, &item) {
                Some(sql) => Ok(Expr::Sql(sql)),
                None => Ok(Expr::query(QueryOp::Contains { source, item })),
            }
        })
    }
}

fn in_predicate(source: &Expr, item: &Expr) -> Option<SqlExpr> {
    match source {
        Expr::Parameter { index, path, ty } => {
            let scalar = ty.element()?.as_scalar()?;
            let item = translate_scalar(item)?;
            Some(SqlExpr::In {
                expr: Box::new(item),
                set: InSet::Parameter {
                    index: *index,
                    path: path.clone(),
                    ty: scalar,
                },
            })
        }
        Expr::Constant {
            value: Value::List(values),
            ..
        }
        | Expr::Captured {
            value: Value::List(values),
            ..
        } => {
            let item = translate_scalar(item)?;
            Some(in_values(item, values))
        }
        _ => None,
    }
}

/// `item IN (v1, v2, ...)` over literal values. Nulls never match in
/// `IN`, so a null in the list becomes an `IS NULL` alternative.
fn in_values(item: SqlExpr, values: &[Value]) -> SqlExpr {
    let has_null = values.iter().any(Value::is_null);
    let literals: Vec<SqlExpr> = values
        .iter()
        .filter(|v| !v.is_null())
        .map(|v| SqlExpr::literal(v.clone()))
        .collect();
    let null_test = (has_null && item.is_nullable()).then(|| item.clone().is_null());
    let membership = (!literals.is_empty()).then(|| SqlExpr::In {
        expr: Box::new(item),
        set: InSet::Values(literals),
    });
    match (membership, null_test) {
        (Some(m), Some(n)) => m.or(n),
        (Some(m), None) => m,
        (None, Some(n)) => n,
        (None, None) => constant_predicate(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::ir::TableId;
    use crate::value::{ScalarType, Type};

    fn age(nullable: bool) -> Expr {
        Expr::Sql(SqlExpr::Column {
            table: TableId(0),
            name: "Age".into(),
            ty: ScalarType::Int32,
            nullable,
        })
    }

    #[test]
    fn test_list_contains_call_becomes_query() {
        let list = Expr::captured(
            Value::List(vec![Value::Int32(1)]),
            Type::sequence(Type::int32()),
        );
        let e = Expr::call(Method::ListContains, vec![list.clone(), age(false)]);
        let out = with_ctx(|ctx| ListContainsRewriter.apply(e, ctx));
        assert_eq!(
            out,
            Expr::query(QueryOp::Contains {
                source: list,
                item: age(false)
            })
        );
    }

    #[test]
    fn test_parameter_list_becomes_in_parameter() {
        let list = Expr::Parameter {
            index: 0,
            path: Vec::new(),
            ty: Type::sequence(Type::int32()),
        };
        let e = Expr::query(QueryOp::Contains {
            source: list,
            item: age(false),
        });
        let out = with_ctx(|ctx| ContainsToInRewriter.apply(e, ctx));
        let Expr::Sql(SqlExpr::In { set, .. }) = out else {
            panic!("expected IN, got {out:?}");
        };
        assert_eq!(
            set,
            InSet::Parameter {
                index: 0,
                path: Vec::new(),
                ty: ScalarType::Int32
            }
        );
    }

    #[test]
    fn test_literal_list_with_null() {
        let list = Expr::Constant {
            value: Value::List(vec![Value::Int32(1), Value::Null, Value::Int32(2)]),
            ty: Type::sequence(Type::nullable(ScalarType::Int32)),
        };
        let e = Expr::query(QueryOp::Contains {
            source: list,
            item: age(true),
        });
        let out = with_ctx(|ctx| ContainsToInRewriter.apply(e, ctx));
        let Expr::Sql(sql) = out else {
            panic!("expected SQL")
        };
        let expected = SqlExpr::In {
            expr: Box::new(SqlExpr::Column {
                table: TableId(0),
                name: "Age".into(),
                ty: ScalarType::Int32,
                nullable: true,
            }),
            set: InSet::Values(vec![SqlExpr::int(1), SqlExpr::int(2)]),
        }
        .or(SqlExpr::Column {
            table: TableId(0),
            name: "Age".into(),
            ty: ScalarType::Int32,
            nullable: true,
        }
        .is_null());
        assert_eq!(sql, expected);
    }

    #[test]
    fn test_empty_literal_list_is_false() {
        let list = Expr::Constant {
            value: Value::List(Vec::new()),
            ty: Type::sequence(Type::int32()),
        };
        let e = Expr::query(QueryOp::Contains {
            source: list,
            item: age(false),
        });
        let out = with_ctx(|ctx| ContainsToInRewriter.apply(e, ctx));
        assert_eq!(out, Expr::Sql(constant_predicate(false)));
    }

    #[test]
    fn test_untranslatable_item_is_left_alone() {
        let list = Expr::Parameter {
            index: 0,
            path: Vec::new(),
            ty: Type::sequence(Type::int32()),
        };
        let e = Expr::query(QueryOp::Contains {
            source: list,
            item: Expr::param("x", Type::int32()),
        });
        let out = with_ctx(|ctx| ContainsToInRewriter.apply(e.clone(), ctx));
        assert_eq!(out, e);
    }
}
