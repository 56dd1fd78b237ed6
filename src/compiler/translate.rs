//! Translatability analysis and scalar translation.
//!
//! [`translate_scalar`] turns a host expression whose leaves are SQL
//! nodes, constants and parameters into one [`SqlExpr`], or returns `None`
//! when some node has no SQL form. Equality and negation are expanded so
//! that SQL's three-valued logic gives the host's two-valued answer:
//!
//! | host        | nullable operands | SQL                                                     |
//! |-------------|-------------------|---------------------------------------------------------|
//! | `a == null` | -                 | `a IS NULL`                                             |
//! | `a == b`    | both              | `a = b OR (a IS NULL AND b IS NULL)`                    |
//! | `a != b`    | both              | `(a <> b OR a IS NULL OR b IS NULL) AND (a IS NOT NULL OR b IS NOT NULL)` |
//! | `a != b`    | `a` only          | `a <> b OR a IS NULL`                                   |
//! | `!(a < b)`  | any               | `NOT (a < b) OR a IS NULL OR b IS NULL`                 |

use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, Method, UnaryOp};
use crate::ir::{DatePart, SqlExpr, SqlFunction, SqlUnaryOp};
use crate::value::{ScalarType, Type, Value};

// ── Classification ─────────────────────────────────────────────────────

/// Whether `expr` has a SQL scalar form.
pub fn is_translatable(expr: &Expr) -> bool {
    translate_scalar(expr).is_some()
}

/// Whether `expr` can be read straight from a result row: SQL leaves,
/// constants, parameters and records or polymorphic rows made of them.
/// Nested queries count only when the dialect supports complex nested
/// queries.
pub fn is_server_shaped(expr: &Expr, complex_nested: bool) -> bool {
    match expr {
        Expr::Sql(_)
        | Expr::Constant { .. }
        | Expr::Captured { .. }
        | Expr::Parameter { .. }
        | Expr::Default(_) => true,
        Expr::Record { fields, .. } => fields
            .iter()
            .all(|(_, f)| is_server_shaped(f, complex_nested)),
        Expr::Polymorphic(poly) => poly.arms.iter().all(|arm| {
            is_server_shaped(&arm.test, complex_nested)
                && is_server_shaped(&arm.shape, complex_nested)
        }),
        Expr::Relational(_) | Expr::Grouping(_) | Expr::GroupByResult(_) => complex_nested,
        _ => false,
    }
}

/// Replace translatable subtrees that read the row with one SQL leaf.
pub fn lift(expr: Expr) -> Result<Expr, QueryError> {
    match expr {
        Expr::Sql(_)
        | Expr::Relational(_)
        | Expr::Polymorphic(_)
        | Expr::GroupByResult(_)
        | Expr::Grouping(_)
        | Expr::Query(_) => Ok(expr),
        e if e.ty().is_scalar() && reads_row(&e) => match translate_scalar(&e) {
            Some(sql) => Ok(Expr::Sql(sql)),
            None => e.map_children(&mut lift),
        },
        e => e.map_children(&mut lift),
    }
}

fn reads_row(expr: &Expr) -> bool {
    expr.any(&|e| matches!(e, Expr::Sql(_)))
}

// ── Translation ────────────────────────────────────────────────────────

/// Value-position translation.
pub fn translate_scalar(expr: &Expr) -> Option<SqlExpr> {
    match expr {
        Expr::Sql(sql) => Some(sql.clone()),
        Expr::Constant { value, ty } | Expr::Captured { value, ty } => literal(value, ty),
        Expr::Default(ty) => literal(&ty.default_value(), ty),
        Expr::Parameter { index, path, ty } => {
            let scalar = ty.as_scalar()?;
            Some(SqlExpr::Parameter {
                index: *index,
                path: path.clone(),
                ty: scalar,
                nullable: ty.is_nullable(),
            })
        }
        Expr::Binary { op, left, right } => translate_binary(*op, left, right),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => translate_not(operand),
        Expr::Unary {
            op: UnaryOp::Negate,
            operand,
        } => Some(SqlExpr::unary(SqlUnaryOp::Negate, translate_scalar(operand)?)),
        Expr::Convert { operand, ty } => {
            let target = ty.as_scalar()?;
            let inner = translate_scalar(operand)?;
            if inner.scalar_type() == target {
                Some(inner)
            } else {
                Some(SqlExpr::Cast {
                    expr: Box::new(inner),
                    ty: target,
                })
            }
        }
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            let ty = expr.ty();
            Some(SqlExpr::Case {
                arms: vec![(translate_predicate(test)?, translate_scalar(if_true)?)],
                otherwise: Box::new(translate_scalar(if_false)?),
                ty: ty.as_scalar()?,
                nullable: ty.is_nullable(),
            })
        }
        Expr::Coalesce { left, right } => {
            let r = translate_scalar(right)?;
            let nullable = r.is_nullable();
            Some(SqlExpr::Function {
                func: SqlFunction::Coalesce,
                ty: r.scalar_type(),
                args: vec![translate_scalar(left)?, r],
                nullable,
            })
        }
        Expr::Call { method, args, ty } => translate_call(*method, args, ty),
        _ => None,
    }
}

/// Predicate-position translation: boolean values are compared with
/// `true`.
pub fn translate_predicate(expr: &Expr) -> Option<SqlExpr> {
    let sql = translate_scalar(expr)?;
    if sql.is_predicate() {
        return Some(sql);
    }
    if sql.scalar_type() != ScalarType::Bool {
        return None;
    }
    Some(SqlExpr::binary(BinaryOp::Eq, sql, SqlExpr::bool(true)))
}

/// Translate a predicate or fail with the expression in the message.
pub fn require_predicate(expr: &Expr, context: &str) -> Result<SqlExpr, QueryError> {
    translate_predicate(expr).ok_or_else(|| {
        QueryError::UntranslatablePredicate(format!("{context}: {}", describe(expr)))
    })
}

/// Translate a value or fail with the expression in the message.
pub fn require_scalar(expr: &Expr, context: &str) -> Result<SqlExpr, QueryError> {
    translate_scalar(expr).ok_or_else(|| {
        QueryError::UntranslatablePredicate(format!("{context}: {}", describe(expr)))
    })
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Member { name, .. } => format!("member {name}"),
        Expr::Call { method, .. } => format!("call {method:?}"),
        Expr::Query(op) => format!("query operator {}", op.name()),
        other => format!("expression of type {}", other.ty().display_name()),
    }
}

fn literal(value: &Value, ty: &Type) -> Option<SqlExpr> {
    let scalar = ty.as_scalar().or_else(|| value.scalar_type())?;
    match value {
        Value::List(_) | Value::Record(_) | Value::Grouping { .. } => None,
        v => Some(SqlExpr::Literal {
            value: v.clone(),
            ty: scalar,
        }),
    }
}

fn translate_binary(op: BinaryOp, left: &Expr, right: &Expr) -> Option<SqlExpr> {
    match op {
        BinaryOp::And | BinaryOp::Or => Some(SqlExpr::binary(
            op,
            translate_predicate(left)?,
            translate_predicate(right)?,
        )),
        BinaryOp::Eq | BinaryOp::Ne => {
            if right.is_null_constant() {
                return null_test(op, translate_scalar(left)?);
            }
            if left.is_null_constant() {
                return null_test(op, translate_scalar(right)?);
            }
            let l = translate_scalar(left)?;
            let r = translate_scalar(right)?;
            Some(equality(op == BinaryOp::Eq, l, r))
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Some(SqlExpr::binary(
            op,
            translate_scalar(left)?,
            translate_scalar(right)?,
        )),
        BinaryOp::Add if left.ty().as_scalar() == Some(ScalarType::String) => {
            let mut parts = Vec::new();
            push_concat(&mut parts, translate_scalar(left)?);
            push_concat(&mut parts, translate_scalar(right)?);
            Some(SqlExpr::Concat(parts))
        }
        _ => Some(SqlExpr::binary(
            op,
            translate_scalar(left)?,
            translate_scalar(right)?,
        )),
    }
}

fn push_concat(parts: &mut Vec<SqlExpr>, sql: SqlExpr) {
    match sql {
        SqlExpr::Concat(inner) => parts.extend(inner),
        other => parts.push(other),
    }
}

fn null_test(op: BinaryOp, operand: SqlExpr) -> Option<SqlExpr> {
    if !operand.is_nullable() {
        // A value that cannot be null is never equal to null.
        let holds = op == BinaryOp::Ne;
        return Some(constant_predicate(holds));
    }
    Some(if op == BinaryOp::Eq {
        operand.is_null()
    } else {
        operand.is_not_null()
    })
}

/// `1 = 1` or `1 = 0`.
pub fn constant_predicate(holds: bool) -> SqlExpr {
    SqlExpr::binary(
        BinaryOp::Eq,
        SqlExpr::int(1),
        SqlExpr::int(if holds { 1 } else { 0 }),
    )
}

/// Equality or inequality with host null semantics.
pub fn equality(equal: bool, l: SqlExpr, r: SqlExpr) -> SqlExpr {
    let (ln, rn) = (l.is_nullable(), r.is_nullable());
    if equal {
        if ln && rn {
            return SqlExpr::equal_null_safe(l, r);
        }
        return SqlExpr::binary(BinaryOp::Eq, l, r);
    }
    let ne = SqlExpr::binary(BinaryOp::Ne, l.clone(), r.clone());
    match (ln, rn) {
        (true, true) => {
            let differs = ne.or(l.clone().is_null()).or(r.clone().is_null());
            let not_both_null = l.is_not_null().or(r.is_not_null());
            differs.and(not_both_null)
        }
        (true, false) => ne.or(l.is_null()),
        (false, true) => ne.or(r.is_null()),
        (false, false) => ne,
    }
}

fn translate_not(operand: &Expr) -> Option<SqlExpr> {
    match operand {
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => translate_predicate(operand),
        Expr::Binary { op, left, right } => match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                let negated = op.negated()?;
                translate_binary(negated, left, right)
            }
            BinaryOp::And => Some(translate_not(left)?.or(translate_not(right)?)),
            BinaryOp::Or => Some(translate_not(left)?.and(translate_not(right)?)),
            op if op.is_comparison() => {
                let l = translate_scalar(left)?;
                let r = translate_scalar(right)?;
                let mut out = SqlExpr::binary(*op, l.clone(), r.clone()).not();
                if l.is_nullable() {
                    out = out.or(l.is_null());
                }
                if r.is_nullable() {
                    out = out.or(r.is_null());
                }
                Some(out)
            }
            _ => negate_value(operand),
        },
        _ => negate_value(operand),
    }
}

fn negate_value(operand: &Expr) -> Option<SqlExpr> {
    let sql = translate_scalar(operand)?;
    if sql.is_predicate() {
        return Some(sql.not());
    }
    if sql.scalar_type() != ScalarType::Bool {
        return None;
    }
    Some(SqlExpr::binary(BinaryOp::Eq, sql, SqlExpr::bool(false)))
}

// ── Method calls ───────────────────────────────────────────────────────

fn function(func: SqlFunction, args: Vec<SqlExpr>, ty: &Type) -> Option<SqlExpr> {
    Some(SqlExpr::Function {
        func,
        args,
        ty: ty.as_scalar()?,
        nullable: ty.is_nullable(),
    })
}

fn translate_call(method: Method, args: &[Expr], ty: &Type) -> Option<SqlExpr> {
    let sql: Vec<SqlExpr> = match method {
        // handled by rewriting passes before translation
        Method::Equals | Method::ListContains | Method::HasFlag => return None,
        _ => args.iter().map(translate_scalar).collect::<Option<_>>()?,
    };
    let arg = |i: usize| sql.get(i).cloned();
    match method {
        Method::StringLength => function(SqlFunction::Length, sql, ty),
        Method::ToUpper => function(SqlFunction::Upper, sql, ty),
        Method::ToLower => function(SqlFunction::Lower, sql, ty),
        Method::Trim => function(SqlFunction::Trim, sql, ty),
        Method::TrimStart => function(SqlFunction::LTrim, sql, ty),
        Method::TrimEnd => function(SqlFunction::RTrim, sql, ty),
        Method::Substring => {
            // SQL positions are 1-based.
            let start = SqlExpr::binary(BinaryOp::Add, arg(1)?, SqlExpr::int(1));
            let mut out = vec![arg(0)?, start];
            if let Some(len) = arg(2) {
                out.push(len);
            }
            function(SqlFunction::Substring, out, ty)
        }
        Method::Replace => function(SqlFunction::Replace, sql, ty),
        Method::IndexOf => function(SqlFunction::IndexOf, sql, ty),
        Method::StringContains => like(arg(0)?, args.get(1)?, arg(1)?, true, true),
        Method::StartsWith => like(arg(0)?, args.get(1)?, arg(1)?, false, true),
        Method::EndsWith => like(arg(0)?, args.get(1)?, arg(1)?, true, false),
        Method::IsNullOrEmpty => {
            let s = arg(0)?;
            let empty = SqlExpr::binary(
                BinaryOp::Eq,
                s.clone(),
                SqlExpr::literal(Value::String(String::new())),
            );
            Some(if s.is_nullable() {
                s.is_null().or(empty)
            } else {
                empty
            })
        }
        Method::Year => date_part(DatePart::Year, sql, ty),
        Method::Month => date_part(DatePart::Month, sql, ty),
        Method::Day => date_part(DatePart::Day, sql, ty),
        Method::Hour => date_part(DatePart::Hour, sql, ty),
        Method::Minute => date_part(DatePart::Minute, sql, ty),
        Method::Second => date_part(DatePart::Second, sql, ty),
        Method::AddDays => function(SqlFunction::DateAdd(DatePart::Day), sql, ty),
        Method::AddMonths => function(SqlFunction::DateAdd(DatePart::Month), sql, ty),
        Method::AddYears => function(SqlFunction::DateAdd(DatePart::Year), sql, ty),
        Method::AddHours => function(SqlFunction::DateAdd(DatePart::Hour), sql, ty),
        Method::AddMinutes => function(SqlFunction::DateAdd(DatePart::Minute), sql, ty),
        Method::AddSeconds => function(SqlFunction::DateAdd(DatePart::Second), sql, ty),
        Method::Abs => function(SqlFunction::Abs, sql, ty),
        Method::Round => function(SqlFunction::Round, sql, ty),
        Method::Floor => function(SqlFunction::Floor, sql, ty),
        Method::Ceiling => function(SqlFunction::Ceiling, sql, ty),
        Method::Power => function(SqlFunction::Power, sql, ty),
        Method::Sqrt => function(SqlFunction::Sqrt, sql, ty),
        Method::Equals | Method::ListContains | Method::HasFlag => None,
    }
}

fn date_part(part: DatePart, args: Vec<SqlExpr>, ty: &Type) -> Option<SqlExpr> {
    function(SqlFunction::DatePart(part), args, ty)
}

/// `LIKE` for the string containment methods. Literal patterns are
/// escaped; other patterns are concatenated with the wildcards.
fn like(
    subject: SqlExpr,
    pattern_expr: &Expr,
    pattern: SqlExpr,
    leading: bool,
    trailing: bool,
) -> Option<SqlExpr> {
    let literal = match pattern_expr {
        Expr::Constant {
            value: Value::String(s),
            ..
        } => Some(s.clone()),
        _ => None,
    };
    let (pattern, escape) = match literal {
        Some(text) => {
            let mut p = String::new();
            if leading {
                p.push('%');
            }
            p.push_str(&escape_like(&text));
            if trailing {
                p.push('%');
            }
            (SqlExpr::literal(Value::String(p)), Some('\\'))
        }
        None => {
            let wildcard = || SqlExpr::literal(Value::String("%".into()));
            let mut parts = Vec::new();
            if leading {
                parts.push(wildcard());
            }
            parts.push(pattern);
            if trailing {
                parts.push(wildcard());
            }
            (SqlExpr::Concat(parts), None)
        }
    };
    Some(SqlExpr::Like {
        expr: Box::new(subject),
        pattern: Box::new(pattern),
        escape,
    })
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '[' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
