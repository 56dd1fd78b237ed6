//! Runtime values and the host-level type system.
//!
//! [`Value`] is what parameters are bound with and what materializers
//! produce. [`Type`] is the static type carried by host expressions;
//! [`ScalarType`] is the subset that maps onto a single database column.

use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// A type that maps onto exactly one database column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarType {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    DateTime,
    Bytes,
    /// A JSON document stored in a text/json column.
    Json,
}

impl ScalarType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64)
    }

    pub fn is_integral(self) -> bool {
        matches!(self, ScalarType::Int32 | ScalarType::Int64)
    }

    /// Literal constants of these types are inlined and hashed by value;
    /// everything else is parameterized.
    pub fn is_safe_literal(self) -> bool {
        matches!(
            self,
            ScalarType::Bool | ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float64 => "float64",
            ScalarType::String => "string",
            ScalarType::DateTime => "datetime",
            ScalarType::Bytes => "bytes",
            ScalarType::Json => "json",
        }
    }
}

/// Static type of a host expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// A single-column value.
    Scalar { scalar: ScalarType, nullable: bool },
    /// An entity declared in the descriptor set.
    Entity(String),
    /// An anonymous record shape, fields in declaration order.
    Record(Vec<(String, Type)>),
    /// A sequence of elements.
    Sequence(Box<Type>),
    /// A group produced by GroupBy: a key plus a sequence of elements.
    Grouping { key: Box<Type>, element: Box<Type> },
}

impl Type {
    pub fn scalar(scalar: ScalarType) -> Type {
        Type::Scalar {
            scalar,
            nullable: false,
        }
    }

    pub fn nullable(scalar: ScalarType) -> Type {
        Type::Scalar {
            scalar,
            nullable: true,
        }
    }

    pub fn bool() -> Type {
        Type::scalar(ScalarType::Bool)
    }

    pub fn int32() -> Type {
        Type::scalar(ScalarType::Int32)
    }

    pub fn int64() -> Type {
        Type::scalar(ScalarType::Int64)
    }

    pub fn float64() -> Type {
        Type::scalar(ScalarType::Float64)
    }

    pub fn string() -> Type {
        Type::nullable(ScalarType::String)
    }

    pub fn sequence(element: Type) -> Type {
        Type::Sequence(Box::new(element))
    }

    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            Type::Scalar { scalar, .. } => Some(*scalar),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar { .. })
    }

    pub fn is_bool(&self) -> bool {
        matches!(
            self,
            Type::Scalar {
                scalar: ScalarType::Bool,
                ..
            }
        )
    }

    /// Whether a value of this type may be null. Entities, records and
    /// groupings are reference-like and therefore nullable.
    pub fn is_nullable(&self) -> bool {
        match self {
            Type::Scalar { nullable, .. } => *nullable,
            Type::Sequence(_) => false,
            _ => true,
        }
    }

    pub fn with_nullable(&self, nullable: bool) -> Type {
        match self {
            Type::Scalar { scalar, .. } => Type::Scalar {
                scalar: *scalar,
                nullable,
            },
            other => other.clone(),
        }
    }

    /// Element type of a sequence or grouping.
    pub fn element(&self) -> Option<&Type> {
        match self {
            Type::Sequence(elem) => Some(elem),
            Type::Grouping { element, .. } => Some(element),
            _ => None,
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, Type::Sequence(_) | Type::Grouping { .. })
    }

    /// The `default(T)` value of this type.
    pub fn default_value(&self) -> Value {
        match self {
            Type::Scalar {
                nullable: false,
                scalar,
            } => match scalar {
                ScalarType::Bool => Value::Bool(false),
                ScalarType::Int32 => Value::Int32(0),
                ScalarType::Int64 => Value::Int64(0),
                ScalarType::Float64 => Value::Float64(0.0),
                _ => Value::Null,
            },
            Type::Sequence(_) => Value::List(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Human-readable type name used in error messages.
    pub fn display_name(&self) -> String {
        match self {
            Type::Scalar { scalar, nullable } => {
                if *nullable {
                    format!("{}?", scalar.name())
                } else {
                    scalar.name().to_string()
                }
            }
            Type::Entity(name) => name.clone(),
            Type::Record(fields) => {
                let names: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
                format!("{{{}}}", names.join(", "))
            }
            Type::Sequence(elem) => format!("seq<{}>", elem.display_name()),
            Type::Grouping { key, element } => {
                format!("group<{}, {}>", key.display_name(), element.display_name())
            }
        }
    }
}

/// A record value: optional type name plus ordered fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record {
    pub type_name: Option<String>,
    pub fields: Vec<(String, Value)>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    DateTime(NaiveDateTime),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    List(Vec<Value>),
    Record(Record),
    Grouping { key: Box<Value>, elements: Vec<Value> },
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            // Bitwise, so that NaN == NaN and hashing agrees with equality.
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (
                Value::Grouping {
                    key: ka,
                    elements: ea,
                },
                Value::Grouping {
                    key: kb,
                    elements: eb,
                },
            ) => ka == kb && ea == eb,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::DateTime(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
            // serde_json::Value has no Hash impl; its canonical text does.
            Value::Json(v) => v.to_string().hash(state),
            Value::List(v) => v.hash(state),
            Value::Record(v) => v.hash(state),
            Value::Grouping { key, elements } => {
                key.hash(state);
                elements.hash(state);
            }
        }
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The scalar type of a non-null scalar value.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Value::Bool(_) => Some(ScalarType::Bool),
            Value::Int32(_) => Some(ScalarType::Int32),
            Value::Int64(_) => Some(ScalarType::Int64),
            Value::Float64(_) => Some(ScalarType::Float64),
            Value::String(_) => Some(ScalarType::String),
            Value::DateTime(_) => Some(ScalarType::DateTime),
            Value::Bytes(_) => Some(ScalarType::Bytes),
            Value::Json(_) => Some(ScalarType::Json),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Result<bool, QueryError> {
        match self {
            Value::Bool(b) => Ok(*b),
            // Boolean surrogate columns come back as integers.
            Value::Int32(i) => Ok(*i != 0),
            Value::Int64(i) => Ok(*i != 0),
            other => Err(QueryError::Materialization(format!(
                "expected a boolean, found {other:?}"
            ))),
        }
    }

    pub fn as_i64(&self) -> Result<i64, QueryError> {
        match self {
            Value::Int32(i) => Ok(i64::from(*i)),
            Value::Int64(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(QueryError::Materialization(format!(
                "expected an integer, found {other:?}"
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64, QueryError> {
        match self {
            Value::Int32(i) => Ok(f64::from(*i)),
            // Precision loss above 2^53 matches the database's float conversion.
            Value::Int64(i) => Ok(*i as f64),
            Value::Float64(f) => Ok(*f),
            other => Err(QueryError::Materialization(format!(
                "expected a number, found {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, QueryError> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(QueryError::Materialization(format!(
                "expected a string, found {other:?}"
            ))),
        }
    }

    pub fn as_list(&self) -> Result<&[Value], QueryError> {
        match self {
            Value::List(items) => Ok(items),
            Value::Grouping { elements, .. } => Ok(elements),
            other => Err(QueryError::Materialization(format!(
                "expected a sequence, found {other:?}"
            ))),
        }
    }

    /// Look up a field of a record (or the `Key` of a grouping).
    pub fn field(&self, name: &str) -> Result<&Value, QueryError> {
        match self {
            Value::Record(record) => record.get(name).ok_or_else(|| {
                QueryError::Materialization(format!("record has no field {name}"))
            }),
            Value::Grouping { key, .. } if name == "Key" => Ok(key),
            Value::Null => Err(QueryError::Materialization(format!(
                "member {name} accessed on a null value"
            ))),
            other => Err(QueryError::Materialization(format!(
                "value {other:?} has no field {name}"
            ))),
        }
    }

    /// Follow a field path through nested records.
    pub fn field_path(&self, path: &[String]) -> Result<Value, QueryError> {
        let mut current = self;
        for name in path {
            if current.is_null() {
                return Ok(Value::Null);
            }
            current = current.field(name)?;
        }
        Ok(current.clone())
    }

    /// Convert a value read from a row to the requested scalar type.
    ///
    /// Integer widths are coerced, boolean surrogates are unpacked and
    /// date-times are parsed from text when a driver returns them as
    /// strings.
    pub fn coerce(self, target: ScalarType) -> Result<Value, QueryError> {
        if self.is_null() {
            return Ok(Value::Null);
        }
        match (target, self) {
            (ScalarType::Bool, v) => Ok(Value::Bool(v.as_bool()?)),
            (ScalarType::Int32, Value::Int32(i)) => Ok(Value::Int32(i)),
            (ScalarType::Int32, Value::Int64(i)) => i32::try_from(i)
                .map(Value::Int32)
                .map_err(|_| QueryError::Materialization(format!("{i} overflows int32"))),
            (ScalarType::Int32, Value::Bool(b)) => Ok(Value::Int32(i32::from(b))),
            (ScalarType::Int64, v @ (Value::Int32(_) | Value::Int64(_) | Value::Bool(_))) => {
                Ok(Value::Int64(v.as_i64()?))
            }
            (ScalarType::Float64, v @ (Value::Int32(_) | Value::Int64(_) | Value::Float64(_))) => {
                Ok(Value::Float64(v.as_f64()?))
            }
            (ScalarType::String, Value::String(s)) => Ok(Value::String(s)),
            (ScalarType::DateTime, Value::DateTime(d)) => Ok(Value::DateTime(d)),
            (ScalarType::DateTime, Value::String(s)) => parse_datetime(&s).map(Value::DateTime),
            (ScalarType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (ScalarType::Json, Value::Json(j)) => Ok(Value::Json(j)),
            (ScalarType::Json, Value::String(s)) => serde_json::from_str(&s)
                .map(Value::Json)
                .map_err(|e| QueryError::Materialization(format!("invalid JSON column: {e}"))),
            (target, other) => Err(QueryError::Materialization(format!(
                "cannot convert {other:?} to {}",
                target.name()
            ))),
        }
    }

    /// Render the value as JSON (used for diagnostics and by callers that
    /// serialize query results).
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int32(i) => J::from(*i),
            Value::Int64(i) => J::from(*i),
            Value::Float64(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Value::String(s) => J::String(s.clone()),
            Value::DateTime(d) => J::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Value::Bytes(b) => J::Array(b.iter().map(|x| J::from(*x)).collect()),
            Value::Json(j) => j.clone(),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(record) => J::Object(
                record
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect(),
            ),
            Value::Grouping { key, elements } => serde_json::json!({
                "Key": key.to_json(),
                "Elements": elements.iter().map(Value::to_json).collect::<Vec<_>>(),
            }),
        }
    }

    /// Build a value of the given host type from a JSON document.
    pub fn from_json(json: &serde_json::Value, ty: &Type) -> Result<Value, QueryError> {
        use serde_json::Value as J;
        if json.is_null() {
            return Ok(Value::Null);
        }
        match ty {
            Type::Scalar { scalar, .. } => match (scalar, json) {
                (ScalarType::Bool, J::Bool(b)) => Ok(Value::Bool(*b)),
                (ScalarType::Bool, J::Number(n)) => Ok(Value::Bool(n.as_i64() != Some(0))),
                (ScalarType::Int32, J::Number(n)) => n
                    .as_i64()
                    .and_then(|i| i32::try_from(i).ok())
                    .map(Value::Int32)
                    .ok_or_else(|| QueryError::Materialization(format!("{n} is not an int32"))),
                (ScalarType::Int64, J::Number(n)) => n
                    .as_i64()
                    .map(Value::Int64)
                    .ok_or_else(|| QueryError::Materialization(format!("{n} is not an int64"))),
                (ScalarType::Float64, J::Number(n)) => n
                    .as_f64()
                    .map(Value::Float64)
                    .ok_or_else(|| QueryError::Materialization(format!("{n} is not a float"))),
                (ScalarType::String, J::String(s)) => Ok(Value::String(s.clone())),
                (ScalarType::DateTime, J::String(s)) => parse_datetime(s).map(Value::DateTime),
                (ScalarType::Json, other) => Ok(Value::Json(other.clone())),
                (scalar, other) => Err(QueryError::Materialization(format!(
                    "cannot read JSON {other} as {}",
                    scalar.name()
                ))),
            },
            Type::Record(fields) => {
                let object = json.as_object().ok_or_else(|| {
                    QueryError::Materialization(format!("expected a JSON object, found {json}"))
                })?;
                let mut out = Vec::with_capacity(fields.len());
                for (name, field_ty) in fields {
                    let value = match object.get(name) {
                        Some(v) => Value::from_json(v, field_ty)?,
                        None => Value::Null,
                    };
                    out.push((name.clone(), value));
                }
                Ok(Value::Record(Record {
                    type_name: None,
                    fields: out,
                }))
            }
            Type::Sequence(elem) => {
                let items = json.as_array().ok_or_else(|| {
                    QueryError::Materialization(format!("expected a JSON array, found {json}"))
                })?;
                items
                    .iter()
                    .map(|item| Value::from_json(item, elem))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::List)
            }
            // Entities and groupings have no JSON schema of their own.
            _ => Ok(Value::Json(json.clone())),
        }
    }
}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, QueryError> {
    const FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d"];
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(parsed);
        }
        if format == "%Y-%m-%d"
            && let Ok(date) = chrono::NaiveDate::parse_from_str(s, format)
            && let Some(midnight) = date.and_hms_opt(0, 0, 0)
        {
            return Ok(midnight);
        }
    }
    Err(QueryError::Materialization(format!(
        "cannot parse '{s}' as a date-time"
    )))
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Value::Float64(f64::NAN), Value::Float64(f64::NAN));
        assert_ne!(Value::Float64(0.0), Value::Float64(-0.0));
    }

    #[test]
    fn test_coerce_boolean_surrogate() {
        assert_eq!(
            Value::Int32(1).coerce(ScalarType::Bool).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::Int64(0).coerce(ScalarType::Bool).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_coerce_int_overflow() {
        let err = Value::Int64(i64::MAX).coerce(ScalarType::Int32).unwrap_err();
        assert!(matches!(err, QueryError::Materialization(_)));
    }

    #[test]
    fn test_coerce_datetime_from_text() {
        let v = Value::String("2024-03-01 10:30:00".into())
            .coerce(ScalarType::DateTime)
            .unwrap();
        assert!(matches!(v, Value::DateTime(_)));
        let d = Value::String("2024-03-01".into())
            .coerce(ScalarType::DateTime)
            .unwrap();
        assert!(matches!(d, Value::DateTime(_)));
    }

    #[test]
    fn test_coerce_null_passes_through() {
        assert_eq!(Value::Null.coerce(ScalarType::Int32).unwrap(), Value::Null);
    }

    #[test]
    fn test_from_json_record() {
        let ty = Type::Record(vec![
            ("Name".into(), Type::string()),
            ("Age".into(), Type::int32()),
        ]);
        let json = serde_json::json!({"Name": "Ada", "Age": 36});
        let value = Value::from_json(&json, &ty).unwrap();
        assert_eq!(value.field("Name").unwrap(), &Value::String("Ada".into()));
        assert_eq!(value.field("Age").unwrap(), &Value::Int32(36));
    }

    #[test]
    fn test_field_path_through_null() {
        let record = Value::Record(Record {
            type_name: None,
            fields: vec![("Customer".into(), Value::Null)],
        });
        assert_eq!(
            record
                .field_path(&["Customer".into(), "Name".into()])
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_default_values() {
        assert_eq!(Type::int32().default_value(), Value::Int32(0));
        assert_eq!(Type::nullable(ScalarType::Int32).default_value(), Value::Null);
        assert_eq!(Type::Entity("Customer".into()).default_value(), Value::Null);
    }
}
