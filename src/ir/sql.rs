//! Scalar SQL expressions.

use crate::expr::BinaryOp;
use crate::ir::{Ordering, SelectExpr, TableId};
use crate::value::{ScalarType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl DatePart {
    pub fn keyword(self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Hour => "hour",
            DatePart::Minute => "minute",
            DatePart::Second => "second",
        }
    }
}

/// Dialect-neutral scalar functions; the emitter picks the spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    Length,
    Upper,
    Lower,
    Trim,
    LTrim,
    RTrim,
    /// `(string, one-based start[, length])`
    Substring,
    Replace,
    /// Zero-based position of `needle` in `haystack`, -1 when absent.
    IndexOf,
    Abs,
    Round,
    Floor,
    Ceiling,
    Power,
    Sqrt,
    DatePart(DatePart),
    /// `(datetime, amount)`
    DateAdd(DatePart),
    Now,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlAggregate {
    Count,
    CountBig,
    Sum,
    Avg,
    Min,
    Max,
}

impl SqlAggregate {
    pub fn name(self) -> &'static str {
        match self {
            SqlAggregate::Count => "COUNT",
            SqlAggregate::CountBig => "COUNT_BIG",
            SqlAggregate::Sum => "SUM",
            SqlAggregate::Avg => "AVG",
            SqlAggregate::Min => "MIN",
            SqlAggregate::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowFunc {
    RowNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlUnaryOp {
    Not,
    Negate,
    IsNull,
    IsNotNull,
}

/// Right-hand side of an `IN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InSet {
    Values(Vec<SqlExpr>),
    /// A list-valued runtime parameter, expanded at invocation.
    Parameter {
        index: usize,
        path: Vec<String>,
        ty: ScalarType,
    },
    Subquery(Box<SelectExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlExpr {
    Column {
        table: TableId,
        name: String,
        ty: ScalarType,
        nullable: bool,
    },
    Literal {
        value: Value,
        ty: ScalarType,
    },
    Parameter {
        index: usize,
        path: Vec<String>,
        ty: ScalarType,
        nullable: bool,
    },
    Function {
        func: SqlFunction,
        args: Vec<SqlExpr>,
        ty: ScalarType,
        nullable: bool,
    },
    Aggregate {
        func: SqlAggregate,
        arg: Option<Box<SqlExpr>>,
        distinct: bool,
        ty: ScalarType,
        nullable: bool,
    },
    Cast {
        expr: Box<SqlExpr>,
        ty: ScalarType,
    },
    Alias {
        expr: Box<SqlExpr>,
        alias: String,
    },
    Concat(Vec<SqlExpr>),
    Exists(Box<SelectExpr>),
    In {
        expr: Box<SqlExpr>,
        set: InSet,
    },
    Like {
        expr: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
        escape: Option<char>,
    },
    Window {
        func: WindowFunc,
        partition_by: Vec<SqlExpr>,
        order_by: Vec<Ordering>,
    },
    Binary {
        op: BinaryOp,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    Unary {
        op: SqlUnaryOp,
        operand: Box<SqlExpr>,
    },
    Case {
        arms: Vec<(SqlExpr, SqlExpr)>,
        otherwise: Box<SqlExpr>,
        ty: ScalarType,
        nullable: bool,
    },
    ScalarSubquery(Box<SelectExpr>),
    /// Verbatim SQL text with no operands.
    Fragment {
        text: String,
        ty: ScalarType,
    },
}

impl SqlExpr {
    // ── constructors ──

    pub fn literal(value: Value) -> SqlExpr {
        let ty = value.scalar_type().unwrap_or(ScalarType::Int32);
        SqlExpr::Literal { value, ty }
    }

    pub fn null(ty: ScalarType) -> SqlExpr {
        SqlExpr::Literal {
            value: Value::Null,
            ty,
        }
    }

    pub fn int(v: i32) -> SqlExpr {
        SqlExpr::literal(Value::Int32(v))
    }

    pub fn bool(v: bool) -> SqlExpr {
        SqlExpr::literal(Value::Bool(v))
    }

    pub fn binary(op: BinaryOp, left: SqlExpr, right: SqlExpr) -> SqlExpr {
        SqlExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: SqlUnaryOp, operand: SqlExpr) -> SqlExpr {
        SqlExpr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn and(self, other: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: SqlExpr) -> SqlExpr {
        SqlExpr::binary(BinaryOp::Or, self, other)
    }

    pub fn is_null(self) -> SqlExpr {
        SqlExpr::unary(SqlUnaryOp::IsNull, self)
    }

    pub fn is_not_null(self) -> SqlExpr {
        SqlExpr::unary(SqlUnaryOp::IsNotNull, self)
    }

    pub fn not(self) -> SqlExpr {
        SqlExpr::unary(SqlUnaryOp::Not, self)
    }

    /// `a = b`, where two nulls compare equal.
    pub fn equal_null_safe(a: SqlExpr, b: SqlExpr) -> SqlExpr {
        if !(a.is_nullable() && b.is_nullable()) {
            return SqlExpr::binary(BinaryOp::Eq, a, b);
        }
        let both_null = a.clone().is_null().and(b.clone().is_null());
        SqlExpr::binary(BinaryOp::Eq, a, b).or(both_null)
    }

    /// `1 = 0`, an always-false predicate.
    pub fn false_predicate() -> SqlExpr {
        SqlExpr::binary(BinaryOp::Eq, SqlExpr::int(1), SqlExpr::int(0))
    }

    /// `COUNT(*)`
    pub fn count_star(big: bool) -> SqlExpr {
        SqlExpr::Aggregate {
            func: if big {
                SqlAggregate::CountBig
            } else {
                SqlAggregate::Count
            },
            arg: None,
            distinct: false,
            ty: if big {
                ScalarType::Int64
            } else {
                ScalarType::Int32
            },
            nullable: false,
        }
    }

    /// Conjunction of all predicates, `None` when empty.
    pub fn conjunction(predicates: impl IntoIterator<Item = SqlExpr>) -> Option<SqlExpr> {
        predicates.into_iter().reduce(SqlExpr::and)
    }

    // ── typing ──

    pub fn scalar_type(&self) -> ScalarType {
        match self {
            SqlExpr::Column { ty, .. }
            | SqlExpr::Literal { ty, .. }
            | SqlExpr::Parameter { ty, .. }
            | SqlExpr::Function { ty, .. }
            | SqlExpr::Aggregate { ty, .. }
            | SqlExpr::Cast { ty, .. }
            | SqlExpr::Case { ty, .. }
            | SqlExpr::Fragment { ty, .. } => *ty,
            SqlExpr::Alias { expr, .. } => expr.scalar_type(),
            SqlExpr::Concat(_) => ScalarType::String,
            SqlExpr::Exists(_) | SqlExpr::In { .. } | SqlExpr::Like { .. } => ScalarType::Bool,
            SqlExpr::Window { .. } => ScalarType::Int64,
            SqlExpr::Binary { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    ScalarType::Bool
                } else {
                    widen(left.scalar_type(), right.scalar_type())
                }
            }
            SqlExpr::Unary { op, operand } => match op {
                SqlUnaryOp::Negate => operand.scalar_type(),
                _ => ScalarType::Bool,
            },
            SqlExpr::ScalarSubquery(select) => select
                .single_column()
                .map(|c| c.scalar_type())
                .unwrap_or(ScalarType::Int32),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            SqlExpr::Column { nullable, .. }
            | SqlExpr::Parameter { nullable, .. }
            | SqlExpr::Function { nullable, .. }
            | SqlExpr::Aggregate { nullable, .. }
            | SqlExpr::Case { nullable, .. } => *nullable,
            SqlExpr::Literal { value, .. } => value.is_null(),
            SqlExpr::Cast { expr, .. } | SqlExpr::Alias { expr, .. } => expr.is_nullable(),
            SqlExpr::Concat(parts) => parts.iter().any(SqlExpr::is_nullable),
            SqlExpr::Exists(_)
            | SqlExpr::In { .. }
            | SqlExpr::Like { .. }
            | SqlExpr::Window { .. }
            | SqlExpr::Fragment { .. } => false,
            SqlExpr::Binary { op, left, right } => {
                !(op.is_comparison() || op.is_logical())
                    && (left.is_nullable() || right.is_nullable())
            }
            SqlExpr::Unary { op, operand } => {
                matches!(op, SqlUnaryOp::Negate) && operand.is_nullable()
            }
            // An empty subquery yields NULL unless it is a bare COUNT.
            SqlExpr::ScalarSubquery(select) => !matches!(
                select.single_column(),
                Some(SqlExpr::Aggregate {
                    func: SqlAggregate::Count | SqlAggregate::CountBig,
                    ..
                })
            ),
        }
    }

    /// Whether the expression is a predicate (a search condition) rather
    /// than a value. Predicates need a surrogate in value position on
    /// dialects without a boolean type, and values need a comparison in
    /// predicate position.
    pub fn is_predicate(&self) -> bool {
        match self {
            SqlExpr::Binary { op, .. } => op.is_comparison() || op.is_logical(),
            SqlExpr::Unary { op, .. } => !matches!(op, SqlUnaryOp::Negate),
            SqlExpr::Exists(_) | SqlExpr::In { .. } | SqlExpr::Like { .. } => true,
            SqlExpr::Alias { expr, .. } => expr.is_predicate(),
            _ => false,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, SqlExpr::Aggregate { .. })
    }

    /// Whether the expression contains an aggregate outside any subquery.
    pub fn contains_aggregate(&self) -> bool {
        self.is_aggregate() || self.children().into_iter().any(SqlExpr::contains_aggregate)
    }

    pub fn as_int_literal(&self) -> Option<i64> {
        match self {
            SqlExpr::Literal { value, .. } => value.as_i64().ok(),
            _ => None,
        }
    }

    // ── traversal (subqueries are not entered) ──

    pub fn children(&self) -> Vec<&SqlExpr> {
        match self {
            SqlExpr::Column { .. }
            | SqlExpr::Literal { .. }
            | SqlExpr::Parameter { .. }
            | SqlExpr::Fragment { .. }
            | SqlExpr::Exists(_)
            | SqlExpr::ScalarSubquery(_) => Vec::new(),
            SqlExpr::Function { args, .. } | SqlExpr::Concat(args) => args.iter().collect(),
            SqlExpr::Aggregate { arg, .. } => arg.iter().map(|a| a.as_ref()).collect(),
            SqlExpr::Cast { expr, .. } | SqlExpr::Alias { expr, .. } => vec![expr],
            SqlExpr::In { expr, set } => {
                let mut out = vec![expr.as_ref()];
                if let InSet::Values(values) = set {
                    out.extend(values.iter());
                }
                out
            }
            SqlExpr::Like { expr, pattern, .. } => vec![expr, pattern],
            SqlExpr::Window {
                partition_by,
                order_by,
                ..
            } => partition_by
                .iter()
                .chain(order_by.iter().map(|o| &o.expr))
                .collect(),
            SqlExpr::Binary { left, right, .. } => vec![left, right],
            SqlExpr::Unary { operand, .. } => vec![operand],
            SqlExpr::Case {
                arms, otherwise, ..
            } => arms
                .iter()
                .flat_map(|(w, t)| [w, t])
                .chain(std::iter::once(otherwise.as_ref()))
                .collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut SqlExpr> {
        match self {
            SqlExpr::Column { .. }
            | SqlExpr::Literal { .. }
            | SqlExpr::Parameter { .. }
            | SqlExpr::Fragment { .. }
            | SqlExpr::Exists(_)
            | SqlExpr::ScalarSubquery(_) => Vec::new(),
            SqlExpr::Function { args, .. } | SqlExpr::Concat(args) => args.iter_mut().collect(),
            SqlExpr::Aggregate { arg, .. } => arg.iter_mut().map(|a| a.as_mut()).collect(),
            SqlExpr::Cast { expr, .. } | SqlExpr::Alias { expr, .. } => vec![expr],
            SqlExpr::In { expr, set } => {
                let mut out = vec![expr.as_mut()];
                if let InSet::Values(values) = set {
                    out.extend(values.iter_mut());
                }
                out
            }
            SqlExpr::Like { expr, pattern, .. } => vec![expr, pattern],
            SqlExpr::Window {
                partition_by,
                order_by,
                ..
            } => partition_by
                .iter_mut()
                .chain(order_by.iter_mut().map(|o| &mut o.expr))
                .collect(),
            SqlExpr::Binary { left, right, .. } => vec![left, right],
            SqlExpr::Unary { operand, .. } => vec![operand],
            SqlExpr::Case {
                arms, otherwise, ..
            } => {
                let mut out: Vec<&mut SqlExpr> = Vec::new();
                for (w, t) in arms.iter_mut() {
                    out.push(w);
                    out.push(t);
                }
                out.push(otherwise);
                out
            }
        }
    }

    /// Subqueries directly owned by this node.
    pub fn subqueries(&self) -> Vec<&SelectExpr> {
        match self {
            SqlExpr::Exists(s) | SqlExpr::ScalarSubquery(s) => vec![s],
            SqlExpr::In {
                set: InSet::Subquery(s),
                ..
            } => vec![s],
            _ => Vec::new(),
        }
    }

    pub fn subqueries_mut(&mut self) -> Vec<&mut SelectExpr> {
        match self {
            SqlExpr::Exists(s) | SqlExpr::ScalarSubquery(s) => vec![s],
            SqlExpr::In {
                set: InSet::Subquery(s),
                ..
            } => vec![s],
            _ => Vec::new(),
        }
    }
}

fn widen(l: ScalarType, r: ScalarType) -> ScalarType {
    match (l, r) {
        (ScalarType::String, _) | (_, ScalarType::String) => ScalarType::String,
        (ScalarType::Float64, _) | (_, ScalarType::Float64) => ScalarType::Float64,
        (ScalarType::Int64, _) | (_, ScalarType::Int64) => ScalarType::Int64,
        (l, _) => l,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, nullable: bool) -> SqlExpr {
        SqlExpr::Column {
            table: TableId(0),
            name: name.into(),
            ty: ScalarType::Int32,
            nullable,
        }
    }

    #[test]
    fn test_comparison_is_predicate_and_not_nullable() {
        let e = SqlExpr::binary(BinaryOp::Eq, col("a", true), col("b", true));
        assert!(e.is_predicate());
        assert!(!e.is_nullable());
        assert_eq!(e.scalar_type(), ScalarType::Bool);
    }

    #[test]
    fn test_arithmetic_nullability_propagates() {
        let e = SqlExpr::binary(BinaryOp::Add, col("a", false), col("b", true));
        assert!(e.is_nullable());
        assert!(!e.is_predicate());
    }

    #[test]
    fn test_conjunction() {
        assert!(SqlExpr::conjunction(Vec::new()).is_none());
        let c = SqlExpr::conjunction(vec![SqlExpr::bool(true), SqlExpr::bool(false)]).unwrap();
        assert!(matches!(
            c,
            SqlExpr::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_contains_aggregate() {
        let sum = SqlExpr::Aggregate {
            func: SqlAggregate::Sum,
            arg: Some(Box::new(col("a", false))),
            distinct: false,
            ty: ScalarType::Int32,
            nullable: true,
        };
        let e = SqlExpr::binary(BinaryOp::Add, sum, SqlExpr::int(1));
        assert!(e.contains_aggregate());
        assert!(!col("a", false).contains_aggregate());
    }
}
