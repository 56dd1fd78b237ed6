//! Host expression tree.
//!
//! [`Expr`] is the object-shaped input the compiler consumes: constants,
//! captured closure values, lambda parameters, member access, operators,
//! method calls and query operator calls ([`QueryOp`]). During composition
//! the same tree also carries relational nodes (SQL leaves, nested
//! relational queries, polymorphic rows, group-by results), so a bound
//! lambda body is a mix of host operations over IR leaves.

mod build;
mod query;

pub use build::{Query, lambda, lambda2};
pub use query::{AggregateFunc, ElementKind, QueryOp, SetOpKind};

use std::collections::HashSet;
use std::ops::RangeInclusive;

use crate::descriptor::DescriptorSet;
use crate::error::QueryError;
use crate::ir::{GroupByResult, GroupingExpr, PolymorphicExpr, RelationalQuery, SqlExpr};
use crate::value::{ScalarType, Type, Value};

// ── Operators and method tags ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// The comparison that holds exactly when `self` does not
    /// (two-valued; null handling is the translator's job).
    pub fn negated(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Ne),
            BinaryOp::Ne => Some(BinaryOp::Eq),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

/// Closed set of host methods and properties the compiler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    // string
    StringLength,
    ToUpper,
    ToLower,
    Trim,
    TrimStart,
    TrimEnd,
    Substring,
    Replace,
    StringContains,
    StartsWith,
    EndsWith,
    IndexOf,
    IsNullOrEmpty,
    // date
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    AddDays,
    AddMonths,
    AddYears,
    AddHours,
    AddMinutes,
    AddSeconds,
    // math
    Abs,
    Round,
    Floor,
    Ceiling,
    Power,
    Sqrt,
    // equality and containers
    /// `a.Equals(b)`
    Equals,
    /// `list.Contains(item)` on an in-memory list.
    ListContains,
    /// `flags.HasFlag(flag)` on an integer-backed flags enum.
    HasFlag,
}

impl Method {
    /// Resolve a property-style member on a scalar (`s.Length`, `d.Year`).
    pub fn property(scalar: ScalarType, name: &str) -> Option<Method> {
        match (scalar, name) {
            (ScalarType::String, "Length") => Some(Method::StringLength),
            (ScalarType::DateTime, "Year") => Some(Method::Year),
            (ScalarType::DateTime, "Month") => Some(Method::Month),
            (ScalarType::DateTime, "Day") => Some(Method::Day),
            (ScalarType::DateTime, "Hour") => Some(Method::Hour),
            (ScalarType::DateTime, "Minute") => Some(Method::Minute),
            (ScalarType::DateTime, "Second") => Some(Method::Second),
            _ => None,
        }
    }

    /// Accepted argument counts, receiver included.
    pub fn arity(self) -> RangeInclusive<usize> {
        use Method::*;
        match self {
            StringLength | ToUpper | ToLower | Trim | TrimStart | TrimEnd | IsNullOrEmpty
            | Year | Month | Day | Hour | Minute | Second | Abs | Round | Floor | Ceiling
            | Sqrt => 1..=1,
            Substring => 2..=3,
            Replace => 3..=3,
            StringContains | StartsWith | EndsWith | IndexOf | AddDays | AddMonths | AddYears
            | AddHours | AddMinutes | AddSeconds | Power | Equals | ListContains | HasFlag => 2..=2,
        }
    }

    /// Result type given the receiver (first argument) type.
    pub fn result_type(self, receiver: &Type) -> Type {
        let nullable = receiver.is_nullable();
        match self {
            Method::StringLength | Method::IndexOf => Type::Scalar {
                scalar: ScalarType::Int32,
                nullable,
            },
            Method::ToUpper
            | Method::ToLower
            | Method::Trim
            | Method::TrimStart
            | Method::TrimEnd
            | Method::Substring
            | Method::Replace => Type::Scalar {
                scalar: ScalarType::String,
                nullable,
            },
            Method::StringContains
            | Method::StartsWith
            | Method::EndsWith
            | Method::IsNullOrEmpty
            | Method::Equals
            | Method::ListContains
            | Method::HasFlag => Type::bool(),
            Method::Year
            | Method::Month
            | Method::Day
            | Method::Hour
            | Method::Minute
            | Method::Second => Type::Scalar {
                scalar: ScalarType::Int32,
                nullable,
            },
            Method::AddDays
            | Method::AddMonths
            | Method::AddYears
            | Method::AddHours
            | Method::AddMinutes
            | Method::AddSeconds => Type::Scalar {
                scalar: ScalarType::DateTime,
                nullable,
            },
            Method::Abs | Method::Round | Method::Floor | Method::Ceiling => receiver.clone(),
            Method::Power | Method::Sqrt => Type::Scalar {
                scalar: ScalarType::Float64,
                nullable,
            },
        }
    }
}

// ── Lambda ─────────────────────────────────────────────────────────────

/// A lambda with named, typed parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lambda {
    pub params: Vec<(String, Type)>,
    pub body: Expr,
}

impl Lambda {
    pub fn new(params: Vec<(String, Type)>, body: Expr) -> Self {
        Lambda { params, body }
    }

    /// The identity lambda over one parameter.
    pub fn identity(name: &str, ty: Type) -> Self {
        Lambda {
            params: vec![(name.to_string(), ty.clone())],
            body: Expr::Param {
                name: name.to_string(),
                ty,
            },
        }
    }

    pub fn param(&self, i: usize) -> Result<Expr, QueryError> {
        self.params
            .get(i)
            .map(|(name, ty)| Expr::Param {
                name: name.clone(),
                ty: ty.clone(),
            })
            .ok_or_else(|| QueryError::internal(format!("lambda has no parameter {i}")))
    }

    /// Substitute `args` for the parameters in the body.
    pub fn apply(&self, args: &[Expr]) -> Result<Expr, QueryError> {
        if args.len() != self.params.len() {
            return Err(QueryError::InvalidArgument(format!(
                "lambda takes {} argument(s), got {}",
                self.params.len(),
                args.len()
            )));
        }
        let bindings: Vec<(&str, &Expr)> = self
            .params
            .iter()
            .map(|(n, _)| n.as_str())
            .zip(args.iter())
            .collect();
        self.body.clone().substitute(&bindings)
    }

    /// `f ∘ self`: a lambda with `self`'s parameters whose body is `outer`
    /// applied to `self`'s body.
    pub fn compose(&self, outer: &Lambda) -> Result<Lambda, QueryError> {
        let body = outer.apply(std::slice::from_ref(&self.body))?;
        Ok(Lambda {
            params: self.params.clone(),
            body,
        })
    }
}

// ── Expression ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// A literal written in the query.
    Constant { value: Value, ty: Type },
    /// A value captured from the caller's scope.
    Captured { value: Value, ty: Type },
    /// A query captured from the caller's scope; inlined before hashing.
    CapturedQuery(Box<Expr>),
    /// A runtime parameter slot, optionally reaching into a captured
    /// record through `path`.
    Parameter {
        index: usize,
        path: Vec<String>,
        ty: Type,
    },
    /// Reference to a lambda parameter.
    Param { name: String, ty: Type },
    Member {
        base: Box<Expr>,
        name: String,
        ty: Type,
    },
    /// Record construction. `entity` names the entity type when the
    /// record is an entity row.
    Record {
        entity: Option<String>,
        fields: Vec<(String, Expr)>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Convert { operand: Box<Expr>, ty: Type },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Coalesce { left: Box<Expr>, right: Box<Expr> },
    Call {
        method: Method,
        args: Vec<Expr>,
        ty: Type,
    },
    Query(Box<QueryOp>),
    Default(Type),

    // ── Relational nodes ───────────────────────────────────────────────
    Sql(SqlExpr),
    Relational(Box<RelationalQuery>),
    Polymorphic(Box<PolymorphicExpr>),
    GroupByResult(Box<GroupByResult>),
    Grouping(Box<GroupingExpr>),
}

impl Expr {
    // ── constructors ──

    pub fn constant(value: impl Into<Value>) -> Expr {
        let value = value.into();
        let ty = match value.scalar_type() {
            Some(ScalarType::String) => Type::string(),
            Some(s) => Type::scalar(s),
            None => Type::nullable(ScalarType::Int32),
        };
        Expr::Constant { value, ty }
    }

    pub fn null(ty: Type) -> Expr {
        Expr::Constant {
            value: Value::Null,
            ty: ty.with_nullable(true),
        }
    }

    pub fn captured(value: impl Into<Value>, ty: Type) -> Expr {
        Expr::Captured {
            value: value.into(),
            ty,
        }
    }

    pub fn param(name: &str, ty: Type) -> Expr {
        Expr::Param {
            name: name.to_string(),
            ty,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(operand: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(operand),
        }
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Or, self, other)
    }

    pub fn eq(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Eq, self, other)
    }

    pub fn ne(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Ne, self, other)
    }

    pub fn gt(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Gt, self, other)
    }

    pub fn ge(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Ge, self, other)
    }

    pub fn lt(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Lt, self, other)
    }

    pub fn le(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Le, self, other)
    }

    pub fn add(self, other: Expr) -> Expr {
        Expr::binary(BinaryOp::Add, self, other)
    }

    pub fn call(method: Method, args: Vec<Expr>) -> Expr {
        let receiver = args.first().map(Expr::ty).unwrap_or_else(Type::bool);
        let ty = method.result_type(&receiver);
        Expr::Call { method, args, ty }
    }

    pub fn record(fields: Vec<(&str, Expr)>) -> Expr {
        Expr::Record {
            entity: None,
            fields: fields
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        }
    }

    pub fn query(op: QueryOp) -> Expr {
        Expr::Query(Box::new(op))
    }

    /// Type-aware member access.
    ///
    /// Entity members resolve through the descriptor set, record members by
    /// field, `Key` on a grouping, and scalar properties such as
    /// `Length`/`Year` become method calls. `Count` on a sequence and
    /// `HasValue`/`Value` on a nullable scalar stay member nodes; the
    /// member rewriter lowers them.
    pub fn member(self, name: &str, descriptors: &DescriptorSet) -> Result<Expr, QueryError> {
        let base_ty = self.ty();
        let ty = match &base_ty {
            Type::Entity(entity) => descriptors.member_type(entity, name)?,
            Type::Record(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t.clone())
                .ok_or_else(|| QueryError::UnknownMember {
                    ty: base_ty.display_name(),
                    member: name.to_string(),
                })?,
            Type::Grouping { key, .. } if name == "Key" => (**key).clone(),
            Type::Sequence(_) | Type::Grouping { .. } if name == "Count" => Type::int32(),
            Type::Scalar { nullable: true, .. } if name == "HasValue" => Type::bool(),
            Type::Scalar { nullable: true, .. } if name == "Value" => base_ty.with_nullable(false),
            Type::Scalar { scalar, .. } => {
                return match Method::property(*scalar, name) {
                    Some(method) => Ok(Expr::call(method, vec![self])),
                    None => Err(QueryError::UnknownMember {
                        ty: base_ty.display_name(),
                        member: name.to_string(),
                    }),
                };
            }
            _ => {
                return Err(QueryError::UnknownMember {
                    ty: base_ty.display_name(),
                    member: name.to_string(),
                });
            }
        };
        Ok(Expr::Member {
            base: Box::new(self),
            name: name.to_string(),
            ty,
        })
    }

    // ── typing ──

    /// Static type of the expression.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Constant { ty, .. }
            | Expr::Captured { ty, .. }
            | Expr::Parameter { ty, .. }
            | Expr::Param { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::Convert { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Default(ty) => ty.clone(),
            Expr::CapturedQuery(inner) => inner.ty(),
            Expr::Record { entity, fields } => match entity {
                Some(name) => Type::Entity(name.clone()),
                None => Type::Record(fields.iter().map(|(n, e)| (n.clone(), e.ty())).collect()),
            },
            Expr::Binary { op, left, right } => binary_type(*op, &left.ty(), &right.ty()),
            Expr::Unary { op, operand } => match op {
                UnaryOp::Not => operand.ty().with_nullable(false),
                UnaryOp::Negate => operand.ty(),
            },
            Expr::Conditional { if_true, if_false, .. } => {
                let t = if_true.ty();
                if if_false.ty().is_nullable() {
                    t.with_nullable(true)
                } else {
                    t
                }
            }
            Expr::Coalesce { right, .. } => right.ty(),
            Expr::Query(op) => op.ty(),
            Expr::Sql(sql) => Type::Scalar {
                scalar: sql.scalar_type(),
                nullable: sql.is_nullable(),
            },
            Expr::Relational(query) => query.ty(),
            Expr::Polymorphic(poly) => poly.ty(),
            Expr::GroupByResult(group) => group.ty(),
            Expr::Grouping(group) => group.ty(),
        }
    }

    // ── traversal ──

    /// Immediate children, including lambda bodies of query operators.
    /// Relational nodes are leaves.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant { .. }
            | Expr::Captured { .. }
            | Expr::Parameter { .. }
            | Expr::Param { .. }
            | Expr::Default(_)
            | Expr::Sql(_)
            | Expr::Relational(_)
            | Expr::Polymorphic(_)
            | Expr::GroupByResult(_)
            | Expr::Grouping(_) => Vec::new(),
            Expr::CapturedQuery(inner) => vec![inner],
            Expr::Member { base, .. } => vec![base],
            Expr::Record { fields, .. } => fields.iter().map(|(_, e)| e).collect(),
            Expr::Binary { left, right, .. } | Expr::Coalesce { left, right } => {
                vec![left, right]
            }
            Expr::Unary { operand, .. } | Expr::Convert { operand, .. } => vec![operand],
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => vec![test, if_true, if_false],
            Expr::Call { args, .. } => args.iter().collect(),
            Expr::Query(op) => op.children(),
        }
    }

    /// Rebuild this node with `f` applied to each immediate child.
    pub fn map_children(
        self,
        f: &mut dyn FnMut(Expr) -> Result<Expr, QueryError>,
    ) -> Result<Expr, QueryError> {
        Ok(match self {
            Expr::CapturedQuery(inner) => Expr::CapturedQuery(Box::new(f(*inner)?)),
            Expr::Member { base, name, ty } => Expr::Member {
                base: Box::new(f(*base)?),
                name,
                ty,
            },
            Expr::Record { entity, fields } => Expr::Record {
                entity,
                fields: fields
                    .into_iter()
                    .map(|(n, e)| Ok((n, f(e)?)))
                    .collect::<Result<_, QueryError>>()?,
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
            },
            Expr::Unary { op, operand } => Expr::Unary {
                op,
                operand: Box::new(f(*operand)?),
            },
            Expr::Convert { operand, ty } => Expr::Convert {
                operand: Box::new(f(*operand)?),
                ty,
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => Expr::Conditional {
                test: Box::new(f(*test)?),
                if_true: Box::new(f(*if_true)?),
                if_false: Box::new(f(*if_false)?),
            },
            Expr::Coalesce { left, right } => Expr::Coalesce {
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
            },
            Expr::Call { method, args, ty } => Expr::Call {
                method,
                args: args.into_iter().map(&mut *f).collect::<Result<_, _>>()?,
                ty,
            },
            Expr::Query(op) => Expr::Query(Box::new(op.map_children(f)?)),
            leaf => leaf,
        })
    }

    /// Post-order rewrite: children first, then `f` on the rebuilt node.
    pub fn transform_up<F>(self, f: &mut F) -> Result<Expr, QueryError>
    where
        F: FnMut(Expr) -> Result<Expr, QueryError>,
    {
        let rebuilt = self.map_children(&mut |child| child.transform_up(f))?;
        f(rebuilt)
    }

    /// Whether any node in the tree (this one included) satisfies `pred`.
    pub fn any(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        pred(self) || self.children().into_iter().any(|c| c.any(pred))
    }

    /// Replace free occurrences of the named parameters.
    pub fn substitute(self, bindings: &[(&str, &Expr)]) -> Result<Expr, QueryError> {
        match self {
            Expr::Param { ref name, .. } => Ok(bindings
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| (*e).clone())
                .unwrap_or(self)),
            Expr::Query(op) => Ok(Expr::Query(Box::new(op.substitute(bindings)?))),
            other => other.map_children(&mut |c| c.substitute(bindings)),
        }
    }

    /// Names of free lambda parameters.
    pub fn free_params(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        self.collect_free(&mut Vec::new(), &mut out);
        out
    }

    fn collect_free(&self, bound: &mut Vec<String>, out: &mut HashSet<String>) {
        match self {
            Expr::Param { name, .. } => {
                if !bound.contains(name) {
                    out.insert(name.clone());
                }
            }
            Expr::Query(op) => op.collect_free(bound, out),
            _ => {
                for child in self.children() {
                    child.collect_free(bound, out);
                }
            }
        }
    }

    pub fn is_null_constant(&self) -> bool {
        matches!(
            self,
            Expr::Constant {
                value: Value::Null,
                ..
            } | Expr::Sql(SqlExpr::Literal {
                value: Value::Null,
                ..
            })
        )
    }

    pub fn as_bool_constant(&self) -> Option<bool> {
        match self {
            Expr::Constant {
                value: Value::Bool(b),
                ..
            }
            | Expr::Sql(SqlExpr::Literal {
                value: Value::Bool(b),
                ..
            }) => Some(*b),
            _ => None,
        }
    }

    /// Whether this node is a relational node produced by composition.
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            Expr::Sql(_)
                | Expr::Relational(_)
                | Expr::Polymorphic(_)
                | Expr::GroupByResult(_)
                | Expr::Grouping(_)
        )
    }
}

impl Lambda {
    pub(crate) fn substitute_shadowed(
        &self,
        bindings: &[(&str, &Expr)],
    ) -> Result<Lambda, QueryError> {
        let visible: Vec<(&str, &Expr)> = bindings
            .iter()
            .filter(|(n, _)| !self.params.iter().any(|(p, _)| p == n))
            .copied()
            .collect();
        Ok(Lambda {
            params: self.params.clone(),
            body: self.body.clone().substitute(&visible)?,
        })
    }
}

fn binary_type(op: BinaryOp, left: &Type, right: &Type) -> Type {
    if op.is_comparison() || op.is_logical() {
        return Type::bool();
    }
    let nullable = left.is_nullable() || right.is_nullable();
    match (left.as_scalar(), right.as_scalar()) {
        (Some(ScalarType::String), _) | (_, Some(ScalarType::String)) => Type::Scalar {
            scalar: ScalarType::String,
            nullable,
        },
        (Some(l), Some(r)) => {
            let scalar = if l == ScalarType::Float64 || r == ScalarType::Float64 {
                ScalarType::Float64
            } else if l == ScalarType::Int64 || r == ScalarType::Int64 {
                ScalarType::Int64
            } else {
                l
            };
            Type::Scalar { scalar, nullable }
        }
        _ => left.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_type_widening() {
        let e = Expr::param("a", Type::int32()).add(Expr::param("b", Type::nullable(ScalarType::Int64)));
        assert_eq!(e.ty(), Type::nullable(ScalarType::Int64));
        let c = Expr::param("a", Type::int32()).gt(Expr::constant(1));
        assert_eq!(c.ty(), Type::bool());
    }

    #[test]
    fn test_substitute_respects_shadowing() {
        // outer x is replaced, the inner lambda's own x is not
        let inner = Lambda::identity("x", Type::int32());
        let body = Expr::query(QueryOp::Select {
            source: Expr::param("x", Type::sequence(Type::int32())),
            selector: inner.clone(),
        });
        let replaced = body.substitute(&[("x", &Expr::constant(5))]).unwrap();
        let Expr::Query(op) = replaced else { panic!() };
        let QueryOp::Select { source, selector } = *op else {
            panic!()
        };
        assert_eq!(source, Expr::constant(5));
        assert_eq!(selector, inner);
    }

    #[test]
    fn test_free_params() {
        let e = Expr::param("a", Type::int32()).add(Expr::param("b", Type::int32()));
        let free = e.free_params();
        assert!(free.contains("a") && free.contains("b"));
    }

    #[test]
    fn test_scalar_property_becomes_call() {
        let set = DescriptorSet::new();
        let e = Expr::param("s", Type::string()).member("Length", &set).unwrap();
        assert!(matches!(
            e,
            Expr::Call {
                method: Method::StringLength,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_record_member() {
        let set = DescriptorSet::new();
        let rec = Expr::record(vec![("A", Expr::constant(1))]);
        let err = rec.member("B", &set).unwrap_err();
        assert!(matches!(err, QueryError::UnknownMember { .. }));
    }
}
