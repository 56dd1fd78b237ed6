//! Client-side evaluation of host expressions.
//!
//! Projections that cannot run on the server keep a host-expression
//! remainder (see [`crate::ir::Projection::Client`]). After a row is read,
//! the remainder is evaluated here over the materialized pieces, which are
//! bound to named slots.
//!
//! Semantics follow the host, not SQL: `null == null` holds, comparisons
//! with null are false, arithmetic on null yields null, and integer
//! arithmetic wraps.

use std::collections::HashMap;

use chrono::{Datelike, Months, NaiveDateTime, TimeDelta, Timelike};

use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, Method, UnaryOp};
use crate::value::{Record, ScalarType, Type, Value};

/// Named values visible to an expression.
pub type Env = HashMap<String, Value>;

/// Evaluate `expr` with lambda parameters bound in `env` and runtime
/// parameter slots read from `params`.
pub fn evaluate(expr: &Expr, env: &Env, params: &[Value]) -> Result<Value, QueryError> {
    Evaluator { env, params }.eval(expr)
}

struct Evaluator<'a> {
    env: &'a Env,
    params: &'a [Value],
}

impl Evaluator<'_> {
    fn eval(&self, expr: &Expr) -> Result<Value, QueryError> {
        match expr {
            Expr::Constant { value, .. } | Expr::Captured { value, .. } => Ok(value.clone()),
            Expr::Default(ty) => Ok(ty.default_value()),
            Expr::Param { name, .. } => self
                .env
                .get(name)
                .cloned()
                .ok_or_else(|| QueryError::internal(format!("unbound parameter {name}"))),
            Expr::Parameter { index, path, .. } => self
                .params
                .get(*index)
                .ok_or_else(|| {
                    QueryError::ParameterMismatch(format!("no value for parameter {index}"))
                })?
                .field_path(path),
            Expr::Member { base, name, .. } => member(self.eval(base)?, name),
            Expr::Record { entity, fields } => {
                let fields = fields
                    .iter()
                    .map(|(n, e)| Ok((n.clone(), self.eval(e)?)))
                    .collect::<Result<_, QueryError>>()?;
                Ok(Value::Record(Record {
                    type_name: entity.clone(),
                    fields,
                }))
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right),
            Expr::Unary { op, operand } => unary(*op, self.eval(operand)?),
            Expr::Convert { operand, ty } => convert(self.eval(operand)?, ty),
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => {
                if truthy(&self.eval(test)?)? {
                    self.eval(if_true)
                } else {
                    self.eval(if_false)
                }
            }
            Expr::Coalesce { left, right } => match self.eval(left)? {
                Value::Null => self.eval(right),
                v => Ok(v),
            },
            Expr::Call { method, args, .. } => {
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                call(*method, args)
            }
            Expr::CapturedQuery(_)
            | Expr::Query(_)
            | Expr::Sql(_)
            | Expr::Relational(_)
            | Expr::Polymorphic(_)
            | Expr::GroupByResult(_)
            | Expr::Grouping(_) => Err(QueryError::unsupported(format!(
                "expression of type {} cannot be evaluated on the client",
                expr.ty().display_name()
            ))),
        }
    }

    fn binary(&self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Value, QueryError> {
        match op {
            BinaryOp::And => {
                if !truthy(&self.eval(left)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&self.eval(right)?)?))
            }
            BinaryOp::Or => {
                if truthy(&self.eval(left)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&self.eval(right)?)?))
            }
            op => binary(op, self.eval(left)?, self.eval(right)?),
        }
    }
}

fn truthy(value: &Value) -> Result<bool, QueryError> {
    match value {
        Value::Null => Ok(false),
        v => v.as_bool(),
    }
}

fn member(base: Value, name: &str) -> Result<Value, QueryError> {
    if let Value::Record(_) | Value::Grouping { .. } = base {
        if name == "Count"
            && let Value::Grouping { elements, .. } = &base
        {
            return Ok(Value::Int32(count(elements.len())?));
        }
        return base.field(name).cloned();
    }
    match name {
        "HasValue" => Ok(Value::Bool(!base.is_null())),
        "Value" if base.is_null() => Err(QueryError::Materialization(
            "nullable value has no value".into(),
        )),
        "Value" => Ok(base),
        "Count" if !base.is_null() => Ok(Value::Int32(count(base.as_list()?.len())?)),
        _ if base.is_null() => Ok(Value::Null),
        _ => Err(QueryError::Materialization(format!(
            "value {base:?} has no member {name}"
        ))),
    }
}

fn count(n: usize) -> Result<i32, QueryError> {
    i32::try_from(n).map_err(|_| QueryError::Materialization(format!("count {n} overflows int32")))
}

// ── Operators ──────────────────────────────────────────────────────────

/// Operands after numeric promotion.
enum Numeric {
    I32(i32, i32),
    I64(i64, i64),
    F64(f64, f64),
}

fn promote(left: &Value, right: &Value) -> Option<Numeric> {
    use Value::*;
    Some(match (left, right) {
        (Int32(a), Int32(b)) => Numeric::I32(*a, *b),
        (Int32(_) | Int64(_), Int32(_) | Int64(_)) => {
            Numeric::I64(left.as_i64().ok()?, right.as_i64().ok()?)
        }
        (Int32(_) | Int64(_) | Float64(_), Int32(_) | Int64(_) | Float64(_)) => {
            Numeric::F64(left.as_f64().ok()?, right.as_f64().ok()?)
        }
        _ => return None,
    })
}

fn equals(left: &Value, right: &Value) -> bool {
    match promote(left, right) {
        Some(Numeric::I32(a, b)) => a == b,
        Some(Numeric::I64(a, b)) => a == b,
        Some(Numeric::F64(a, b)) => a == b,
        None => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match promote(left, right) {
        Some(Numeric::I32(a, b)) => Some(a.cmp(&b)),
        Some(Numeric::I64(a, b)) => Some(a.cmp(&b)),
        Some(Numeric::F64(a, b)) => a.partial_cmp(&b),
        None => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        },
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, QueryError> {
    use std::cmp::Ordering::*;
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(equals(&left, &right))),
        BinaryOp::Ne => return Ok(Value::Bool(!equals(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(&left, &right);
            let holds = match (op, ord) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Less,
                (BinaryOp::Le, Some(o)) => o != Greater,
                (BinaryOp::Gt, Some(o)) => o == Greater,
                (_, Some(o)) => o != Less,
            };
            return Ok(Value::Bool(holds));
        }
        _ => {}
    }

    if op == BinaryOp::Add
        && (matches!(left, Value::String(_)) || matches!(right, Value::String(_)))
    {
        let text = |v: &Value| match v {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_json().to_string(),
        };
        return Ok(Value::String(text(&left) + &text(&right)));
    }
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    if let (Value::Bool(a), Value::Bool(b)) = (&left, &right) {
        return match op {
            BinaryOp::BitAnd => Ok(Value::Bool(*a & *b)),
            BinaryOp::BitOr => Ok(Value::Bool(*a | *b)),
            _ => Err(invalid(op, &left, &right)),
        };
    }
    match promote(&left, &right) {
        Some(Numeric::I32(a, b)) => integer(op, a, b).map(Value::Int32),
        Some(Numeric::I64(a, b)) => integer(op, a, b).map(Value::Int64),
        Some(Numeric::F64(a, b)) => Ok(Value::Float64(match op {
            BinaryOp::Add => a + b,
            BinaryOp::Subtract => a - b,
            BinaryOp::Multiply => a * b,
            BinaryOp::Divide => a / b,
            BinaryOp::Modulo => a % b,
            _ => return Err(invalid(op, &left, &right)),
        })),
        None => Err(invalid(op, &left, &right)),
    }
}

trait WrappingInt: Copy + PartialEq + Default {
    fn wrapping_add(self, rhs: Self) -> Self;
    fn wrapping_sub(self, rhs: Self) -> Self;
    fn wrapping_mul(self, rhs: Self) -> Self;
    fn wrapping_div(self, rhs: Self) -> Self;
    fn wrapping_rem(self, rhs: Self) -> Self;
    fn bitand(self, rhs: Self) -> Self;
    fn bitor(self, rhs: Self) -> Self;
}

macro_rules! wrapping_int {
    ($t:ty) => {
        impl WrappingInt for $t {
            fn wrapping_add(self, rhs: Self) -> Self {
                <$t>::wrapping_add(self, rhs)
            }
            fn wrapping_sub(self, rhs: Self) -> Self {
                <$t>::wrapping_sub(self, rhs)
            }
            fn wrapping_mul(self, rhs: Self) -> Self {
                <$t>::wrapping_mul(self, rhs)
            }
            fn wrapping_div(self, rhs: Self) -> Self {
                <$t>::wrapping_div(self, rhs)
            }
            fn wrapping_rem(self, rhs: Self) -> Self {
                <$t>::wrapping_rem(self, rhs)
            }
            fn bitand(self, rhs: Self) -> Self {
                self & rhs
            }
            fn bitor(self, rhs: Self) -> Self {
                self | rhs
            }
        }
    };
}

wrapping_int!(i32);
wrapping_int!(i64);

fn integer<T: WrappingInt>(op: BinaryOp, a: T, b: T) -> Result<T, QueryError> {
    if matches!(op, BinaryOp::Divide | BinaryOp::Modulo) && b == T::default() {
        return Err(QueryError::Materialization("division by zero".into()));
    }
    match op {
        BinaryOp::Add => Ok(a.wrapping_add(b)),
        BinaryOp::Subtract => Ok(a.wrapping_sub(b)),
        BinaryOp::Multiply => Ok(a.wrapping_mul(b)),
        BinaryOp::Divide => Ok(a.wrapping_div(b)),
        BinaryOp::Modulo => Ok(a.wrapping_rem(b)),
        BinaryOp::BitAnd => Ok(a.bitand(b)),
        BinaryOp::BitOr => Ok(a.bitor(b)),
        _ => Err(QueryError::internal(format!("{op:?} is not arithmetic"))),
    }
}

fn invalid(op: BinaryOp, left: &Value, right: &Value) -> QueryError {
    QueryError::TypeMismatch(format!("cannot apply {op:?} to {left:?} and {right:?}"))
}

fn unary(op: UnaryOp, value: Value) -> Result<Value, QueryError> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.as_bool()?)),
        (UnaryOp::Negate, Value::Int32(i)) => Ok(Value::Int32(i.wrapping_neg())),
        (UnaryOp::Negate, Value::Int64(i)) => Ok(Value::Int64(i.wrapping_neg())),
        (UnaryOp::Negate, Value::Float64(f)) => Ok(Value::Float64(-f)),
        (UnaryOp::Negate, other) => Err(QueryError::TypeMismatch(format!(
            "cannot negate {other:?}"
        ))),
    }
}

fn convert(value: Value, ty: &Type) -> Result<Value, QueryError> {
    let Some(target) = ty.as_scalar() else {
        return Ok(value);
    };
    match (target, value) {
        (_, Value::Null) => Ok(Value::Null),
        (ScalarType::Int32, Value::Float64(f)) => Ok(Value::Int32(f.trunc() as i32)),
        (ScalarType::Int32, Value::Int64(i)) => Ok(Value::Int32(i as i32)),
        (ScalarType::Int64, Value::Float64(f)) => Ok(Value::Int64(f.trunc() as i64)),
        (ScalarType::String, Value::String(s)) => Ok(Value::String(s)),
        (ScalarType::String, Value::DateTime(d)) => {
            Ok(Value::String(d.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
        }
        (ScalarType::String, v @ (Value::Int32(_) | Value::Int64(_) | Value::Float64(_) | Value::Bool(_))) => {
            Ok(Value::String(v.to_json().to_string()))
        }
        (target, v) => v.coerce(target),
    }
}

// ── Methods ────────────────────────────────────────────────────────────

fn arg(args: &[Value], i: usize, method: Method) -> Result<&Value, QueryError> {
    args.get(i)
        .ok_or_else(|| QueryError::InvalidArgument(format!("{method:?} is missing argument {i}")))
}

fn call(method: Method, args: Vec<Value>) -> Result<Value, QueryError> {
    use Method::*;
    match method {
        Equals => return Ok(Value::Bool(equals(arg(&args, 0, method)?, arg(&args, 1, method)?))),
        ListContains => {
            let item = arg(&args, 1, method)?;
            return Ok(Value::Bool(match arg(&args, 0, method)? {
                Value::Null => false,
                list => list.as_list()?.iter().any(|v| equals(v, item)),
            }));
        }
        IsNullOrEmpty => {
            return Ok(Value::Bool(match arg(&args, 0, method)? {
                Value::Null => true,
                v => v.as_str()?.is_empty(),
            }));
        }
        _ => {}
    }
    // Every remaining method is null-propagating in its receiver.
    let receiver = arg(&args, 0, method)?;
    if receiver.is_null() {
        return Ok(Value::Null);
    }
    match method {
        StringLength => Ok(Value::Int32(count(receiver.as_str()?.chars().count())?)),
        ToUpper => Ok(Value::String(receiver.as_str()?.to_uppercase())),
        ToLower => Ok(Value::String(receiver.as_str()?.to_lowercase())),
        Trim => Ok(Value::String(receiver.as_str()?.trim().to_string())),
        TrimStart => Ok(Value::String(receiver.as_str()?.trim_start().to_string())),
        TrimEnd => Ok(Value::String(receiver.as_str()?.trim_end().to_string())),
        Substring => {
            let s: Vec<char> = receiver.as_str()?.chars().collect();
            let start = index(arg(&args, 1, method)?)?;
            let len = match args.get(2) {
                Some(len) => index(len)?,
                None => s.len().saturating_sub(start),
            };
            if start + len > s.len() {
                return Err(QueryError::Materialization(format!(
                    "substring {start}..{} is out of range for length {}",
                    start + len,
                    s.len()
                )));
            }
            Ok(Value::String(s[start..start + len].iter().collect()))
        }
        Replace => {
            let from = arg(&args, 1, method)?.as_str()?;
            let to = match arg(&args, 2, method)? {
                Value::Null => "",
                v => v.as_str()?,
            };
            Ok(Value::String(receiver.as_str()?.replace(from, to)))
        }
        StringContains | StartsWith | EndsWith => {
            let s = receiver.as_str()?;
            let needle = arg(&args, 1, method)?.as_str()?;
            Ok(Value::Bool(match method {
                StringContains => s.contains(needle),
                StartsWith => s.starts_with(needle),
                _ => s.ends_with(needle),
            }))
        }
        IndexOf => {
            let s = receiver.as_str()?;
            let needle = arg(&args, 1, method)?.as_str()?;
            let position = match s.find(needle) {
                Some(byte) => count(s[..byte].chars().count())?,
                None => -1,
            };
            Ok(Value::Int32(position))
        }
        Year | Month | Day | Hour | Minute | Second => {
            let d = datetime(receiver)?;
            let part = match method {
                Year => d.year(),
                Month => d.month() as i32,
                Day => d.day() as i32,
                Hour => d.hour() as i32,
                Minute => d.minute() as i32,
                _ => d.second() as i32,
            };
            Ok(Value::Int32(part))
        }
        AddMonths | AddYears => {
            let d = datetime(receiver)?;
            let amount = arg(&args, 1, method)?;
            if amount.is_null() {
                return Ok(Value::Null);
            }
            let mut months = amount.as_i64()?;
            if method == AddYears {
                months = months.saturating_mul(12);
            }
            add_months(d, months).map(Value::DateTime)
        }
        AddDays | AddHours | AddMinutes | AddSeconds => {
            let d = datetime(receiver)?;
            let amount = arg(&args, 1, method)?;
            if amount.is_null() {
                return Ok(Value::Null);
            }
            let unit_ms: f64 = match method {
                AddDays => 86_400_000.0,
                AddHours => 3_600_000.0,
                AddMinutes => 60_000.0,
                _ => 1_000.0,
            };
            let ms = (amount.as_f64()? * unit_ms).round();
            TimeDelta::try_milliseconds(ms as i64)
                .and_then(|delta| d.checked_add_signed(delta))
                .map(Value::DateTime)
                .ok_or_else(|| QueryError::Materialization("date arithmetic overflowed".into()))
        }
        Abs => match receiver {
            Value::Int32(i) => Ok(Value::Int32(i.wrapping_abs())),
            Value::Int64(i) => Ok(Value::Int64(i.wrapping_abs())),
            v => Ok(Value::Float64(v.as_f64()?.abs())),
        },
        Round | Floor | Ceiling => match receiver {
            Value::Int32(_) | Value::Int64(_) => Ok(receiver.clone()),
            v => {
                let f = v.as_f64()?;
                Ok(Value::Float64(match method {
                    Round => f.round(),
                    Floor => f.floor(),
                    _ => f.ceil(),
                }))
            }
        },
        Power => {
            let exponent = arg(&args, 1, method)?;
            if exponent.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::Float64(receiver.as_f64()?.powf(exponent.as_f64()?)))
        }
        Sqrt => Ok(Value::Float64(receiver.as_f64()?.sqrt())),
        HasFlag => {
            let flag = arg(&args, 1, method)?.as_i64()?;
            Ok(Value::Bool(receiver.as_i64()? & flag == flag))
        }
        Equals | ListContains | IsNullOrEmpty => Err(QueryError::internal("handled above")),
    }
}

fn index(value: &Value) -> Result<usize, QueryError> {
    let i = value.as_i64()?;
    usize::try_from(i)
        .map_err(|_| QueryError::Materialization(format!("index {i} is out of range")))
}

fn datetime(value: &Value) -> Result<NaiveDateTime, QueryError> {
    match value.clone().coerce(ScalarType::DateTime)? {
        Value::DateTime(d) => Ok(d),
        other => Err(QueryError::TypeMismatch(format!("{other:?} is not a date-time"))),
    }
}

fn add_months(d: NaiveDateTime, months: i64) -> Result<NaiveDateTime, QueryError> {
    let magnitude = u32::try_from(months.unsigned_abs())
        .map_err(|_| QueryError::Materialization("date arithmetic overflowed".into()))?;
    let shifted = if months >= 0 {
        d.checked_add_months(Months::new(magnitude))
    } else {
        d.checked_sub_months(Months::new(magnitude))
    };
    shifted.ok_or_else(|| QueryError::Materialization("date arithmetic overflowed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn eval(expr: &Expr) -> Value {
        evaluate(expr, &Env::new(), &[]).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap()
    }

    #[test]
    fn test_null_equality_is_two_valued() {
        let null = Expr::null(Type::string());
        assert_eq!(eval(&null.clone().eq(Expr::null(Type::string()))), Value::Bool(true));
        assert_eq!(eval(&null.clone().eq(Expr::constant("a"))), Value::Bool(false));
        assert_eq!(eval(&null.ne(Expr::constant("a"))), Value::Bool(true));
    }

    #[test]
    fn test_comparison_with_null_is_false() {
        let null = Expr::null(Type::nullable(ScalarType::Int32));
        assert_eq!(eval(&null.clone().gt(Expr::constant(1))), Value::Bool(false));
        assert_eq!(eval(&null.le(Expr::constant(1))), Value::Bool(false));
    }

    #[test]
    fn test_arithmetic_widens_and_propagates_null() {
        assert_eq!(
            eval(&Expr::constant(2).add(Expr::constant(3i64))),
            Value::Int64(5)
        );
        assert_eq!(
            eval(&Expr::constant(2).add(Expr::constant(0.5))),
            Value::Float64(2.5)
        );
        assert_eq!(
            eval(&Expr::constant(i32::MAX).add(Expr::constant(1))),
            Value::Int32(i32::MIN)
        );
        assert_eq!(
            eval(&Expr::constant(1).add(Expr::null(Type::nullable(ScalarType::Int32)))),
            Value::Null
        );
    }

    #[test]
    fn test_integer_division_by_zero_fails() {
        let expr = Expr::binary(BinaryOp::Divide, Expr::constant(1), Expr::constant(0));
        assert!(matches!(
            evaluate(&expr, &Env::new(), &[]),
            Err(QueryError::Materialization(_))
        ));
    }

    #[test]
    fn test_string_concat_treats_null_as_empty() {
        let expr = Expr::constant("a").add(Expr::null(Type::string()));
        assert_eq!(eval(&expr), Value::from("a"));
    }

    #[test]
    fn test_and_short_circuits() {
        let boom = Expr::binary(BinaryOp::Divide, Expr::constant(1), Expr::constant(0))
            .eq(Expr::constant(1));
        let expr = Expr::constant(false).and(boom);
        assert_eq!(eval(&expr), Value::Bool(false));
    }

    #[test]
    fn test_string_methods() {
        let s = Expr::constant("héllo world");
        assert_eq!(
            eval(&Expr::call(Method::StringLength, vec![s.clone()])),
            Value::Int32(11)
        );
        assert_eq!(
            eval(&Expr::call(
                Method::Substring,
                vec![s.clone(), Expr::constant(1), Expr::constant(4)]
            )),
            Value::from("éllo")
        );
        assert_eq!(
            eval(&Expr::call(Method::IndexOf, vec![s.clone(), Expr::constant("w")])),
            Value::Int32(6)
        );
        assert_eq!(
            eval(&Expr::call(Method::IndexOf, vec![s.clone(), Expr::constant("z")])),
            Value::Int32(-1)
        );
        assert_eq!(
            eval(&Expr::call(Method::ToUpper, vec![Expr::constant("ab")])),
            Value::from("AB")
        );
        assert_eq!(
            eval(&Expr::call(Method::ToUpper, vec![Expr::null(Type::string())])),
            Value::Null
        );
    }

    #[test]
    fn test_substring_out_of_range_fails() {
        let expr = Expr::call(
            Method::Substring,
            vec![Expr::constant("abc"), Expr::constant(2), Expr::constant(5)],
        );
        assert!(evaluate(&expr, &Env::new(), &[]).is_err());
    }

    #[test]
    fn test_date_methods() {
        let d = Expr::constant(date(2024, 1, 31));
        assert_eq!(eval(&Expr::call(Method::Year, vec![d.clone()])), Value::Int32(2024));
        assert_eq!(
            eval(&Expr::call(Method::AddMonths, vec![d.clone(), Expr::constant(1)])),
            Value::DateTime(date(2024, 2, 29))
        );
        assert_eq!(
            eval(&Expr::call(Method::AddDays, vec![d, Expr::constant(-31.0)])),
            Value::DateTime(date(2023, 12, 31))
        );
    }

    #[test]
    fn test_params_and_members() {
        let mut env = Env::new();
        env.insert(
            "row".into(),
            Value::Record(Record {
                type_name: None,
                fields: vec![("Name".into(), Value::from("Ann"))],
            }),
        );
        let row = Expr::param("row", Type::Record(vec![("Name".into(), Type::string())]));
        let expr = Expr::Member {
            base: Box::new(row),
            name: "Name".into(),
            ty: Type::string(),
        };
        assert_eq!(evaluate(&expr, &env, &[]).unwrap(), Value::from("Ann"));

        let param = Expr::Parameter {
            index: 0,
            path: Vec::new(),
            ty: Type::int32(),
        };
        assert_eq!(
            evaluate(&param, &env, &[Value::Int32(7)]).unwrap(),
            Value::Int32(7)
        );
    }

    #[test]
    fn test_query_nodes_are_not_evaluable() {
        let expr = crate::expr::Query::from("Employee").into_expr();
        assert!(matches!(
            evaluate(&expr, &Env::new(), &[]),
            Err(QueryError::Unsupported(_))
        ));
    }
}
