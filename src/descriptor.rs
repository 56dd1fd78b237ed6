//! Entity descriptors and type mappings.
//!
//! The descriptor set is the metadata collaborator of the compiler: it
//! names each entity's table, its columns, its primary key and its
//! navigations (foreign-key relationships). Table-per-hierarchy
//! inheritance is described by a discriminator column on the root and a
//! discriminator value on every concrete type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::Dialect;
use crate::error::QueryError;
use crate::value::{ScalarType, Type, Value};

/// A mapped column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Host-side member name.
    pub property: String,
    /// Database column name.
    pub column: String,
    pub scalar: ScalarType,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn ty(&self) -> Type {
        Type::Scalar {
            scalar: self.scalar,
            nullable: self.nullable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationKind {
    /// Many-to-one: the foreign key lives on the declaring entity.
    Reference,
    /// One-to-many: the foreign key lives on the target entity.
    Collection,
}

/// A relationship member such as `Order.Customer` or `Customer.Orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationDescriptor {
    pub name: String,
    pub target: String,
    pub kind: NavigationKind,
    /// Foreign-key properties, positionally matched to the principal's
    /// primary key. For a reference they belong to the declaring entity,
    /// for a collection to the target.
    pub foreign_key: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub table: String,
    pub schema: Option<String>,
    /// Columns declared on this type (inherited columns live on the base).
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: Vec<String>,
    pub navigations: Vec<NavigationDescriptor>,
    pub base: Option<String>,
    /// Discriminator property, declared on the hierarchy root.
    pub discriminator_property: Option<String>,
    /// Discriminator value of this concrete type.
    #[serde(skip)]
    pub discriminator: Option<Value>,
}

impl EntityDescriptor {
    pub fn new(name: &str, table: &str) -> Self {
        EntityDescriptor {
            name: name.to_string(),
            table: table.to_string(),
            schema: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            navigations: Vec::new(),
            base: None,
            discriminator_property: None,
            discriminator: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    /// Add a non-nullable column whose name matches the property.
    pub fn column(self, property: &str, scalar: ScalarType) -> Self {
        self.mapped_column(property, property, scalar, false)
    }

    pub fn nullable_column(self, property: &str, scalar: ScalarType) -> Self {
        self.mapped_column(property, property, scalar, true)
    }

    pub fn mapped_column(
        mut self,
        property: &str,
        column: &str,
        scalar: ScalarType,
        nullable: bool,
    ) -> Self {
        self.columns.push(ColumnDescriptor {
            property: property.to_string(),
            column: column.to_string(),
            scalar,
            nullable,
        });
        self
    }

    pub fn key(mut self, properties: &[&str]) -> Self {
        self.primary_key = properties.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn reference(mut self, name: &str, target: &str, foreign_key: &[&str]) -> Self {
        self.navigations.push(NavigationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            kind: NavigationKind::Reference,
            foreign_key: foreign_key.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    pub fn collection(mut self, name: &str, target: &str, foreign_key: &[&str]) -> Self {
        self.navigations.push(NavigationDescriptor {
            name: name.to_string(),
            target: target.to_string(),
            kind: NavigationKind::Collection,
            foreign_key: foreign_key.iter().map(|p| p.to_string()).collect(),
        });
        self
    }

    /// Declare this type as derived from `base` (sharing its table).
    pub fn derives(mut self, base: &str) -> Self {
        self.base = Some(base.to_string());
        self
    }

    pub fn discriminated_by(mut self, property: &str) -> Self {
        self.discriminator_property = Some(property.to_string());
        self
    }

    pub fn discriminator_value(mut self, value: impl Into<Value>) -> Self {
        self.discriminator = Some(value.into());
        self
    }
}

/// All entity metadata known to the compiler.
#[derive(Debug, Clone, Default)]
pub struct DescriptorSet {
    entities: HashMap<String, EntityDescriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity: EntityDescriptor) -> Self {
        self.add(entity);
        self
    }

    pub fn add(&mut self, entity: EntityDescriptor) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDescriptor, QueryError> {
        self.entities
            .get(name)
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    /// Chain from the hierarchy root down to `name`.
    fn lineage(&self, name: &str) -> Result<Vec<&EntityDescriptor>, QueryError> {
        let mut chain = Vec::new();
        let mut current = Some(name.to_string());
        while let Some(n) = current {
            let entity = self.entity(&n)?;
            if chain.iter().any(|e: &&EntityDescriptor| e.name == entity.name) {
                return Err(QueryError::InvalidArgument(format!(
                    "inheritance cycle at {n}"
                )));
            }
            current = entity.base.clone();
            chain.push(entity);
        }
        chain.reverse();
        Ok(chain)
    }

    /// The root of `name`'s hierarchy; it owns the table.
    pub fn root(&self, name: &str) -> Result<&EntityDescriptor, QueryError> {
        self.lineage(name)?
            .into_iter()
            .next()
            .ok_or_else(|| QueryError::UnknownEntity(name.to_string()))
    }

    /// Columns visible on `name`, inherited ones first.
    pub fn columns(&self, name: &str) -> Result<Vec<&ColumnDescriptor>, QueryError> {
        Ok(self
            .lineage(name)?
            .into_iter()
            .flat_map(|e| e.columns.iter())
            .collect())
    }

    pub fn column(&self, entity: &str, property: &str) -> Result<&ColumnDescriptor, QueryError> {
        self.columns(entity)?
            .into_iter()
            .find(|c| c.property == property)
            .ok_or_else(|| QueryError::UnknownMember {
                ty: entity.to_string(),
                member: property.to_string(),
            })
    }

    pub fn primary_key(&self, name: &str) -> Result<&[String], QueryError> {
        let root = self.root(name)?;
        if root.primary_key.is_empty() {
            return Err(QueryError::InvalidArgument(format!(
                "entity {name} declares no primary key"
            )));
        }
        Ok(&root.primary_key)
    }

    pub fn navigation(&self, entity: &str, member: &str) -> Option<&NavigationDescriptor> {
        self.lineage(entity)
            .ok()?
            .into_iter()
            .flat_map(|e| e.navigations.iter())
            .find(|n| n.name == member)
    }

    /// Static type of `entity.member`, for columns and navigations alike.
    pub fn member_type(&self, entity: &str, member: &str) -> Result<Type, QueryError> {
        if let Some(nav) = self.navigation(entity, member) {
            return Ok(match nav.kind {
                NavigationKind::Reference => Type::Entity(nav.target.clone()),
                NavigationKind::Collection => Type::sequence(Type::Entity(nav.target.clone())),
            });
        }
        self.column(entity, member).map(ColumnDescriptor::ty)
    }

    pub fn is_assignable(&self, derived: &str, base: &str) -> bool {
        self.lineage(derived)
            .map(|chain| chain.iter().any(|e| e.name == base))
            .unwrap_or(false)
    }

    /// Whether `name` is part of a discriminated hierarchy.
    pub fn is_polymorphic(&self, name: &str) -> bool {
        self.root(name)
            .map(|r| r.discriminator_property.is_some())
            .unwrap_or(false)
    }

    /// Concrete types assignable to `name`, most-derived first so that a
    /// first-match test chain picks the most specific shape.
    pub fn concrete_types(&self, name: &str) -> Result<Vec<&EntityDescriptor>, QueryError> {
        let mut found: Vec<(usize, &EntityDescriptor)> = Vec::new();
        for entity in self.entities.values() {
            if entity.discriminator.is_some() && self.is_assignable(&entity.name, name) {
                found.push((self.lineage(&entity.name)?.len(), entity));
            }
        }
        found.sort_by(|(da, a), (db, b)| db.cmp(da).then_with(|| a.name.cmp(&b.name)));
        Ok(found.into_iter().map(|(_, e)| e).collect())
    }

    /// Resolve a reference navigation to `(target, fk properties, target pk)`.
    pub fn reference_key(
        &self,
        entity: &str,
        member: &str,
    ) -> Option<(&NavigationDescriptor, &[String])> {
        let nav = self.navigation(entity, member)?;
        if nav.kind != NavigationKind::Reference {
            return None;
        }
        let pk = self.primary_key(&nav.target).ok()?;
        (pk.len() == nav.foreign_key.len()).then_some((nav, pk))
    }
}

// ── Type mappings ──────────────────────────────────────────────────────

/// Provider-neutral parameter type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    Boolean,
    Int32,
    Int64,
    Double,
    String,
    DateTime,
    Binary,
    Json,
}

/// Conversion applied to a value crossing the database boundary.
pub type ValueConversion = fn(Value) -> Result<Value, QueryError>;

/// How one scalar type is represented in the database.
#[derive(Debug, Clone)]
pub struct TypeMapping {
    pub db_type_name: String,
    pub db_type: Option<DbType>,
    /// Applied to parameter values before binding.
    pub to_db: Option<ValueConversion>,
    /// Applied to column values after reading.
    pub from_db: Option<ValueConversion>,
}

pub trait TypeMappingProvider: Send + Sync {
    fn mapping(&self, scalar: ScalarType, dialect: Dialect) -> TypeMapping;
}

/// Built-in mappings for the supported dialects.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTypeMappings;

impl TypeMappingProvider for DefaultTypeMappings {
    fn mapping(&self, scalar: ScalarType, dialect: Dialect) -> TypeMapping {
        let (name, db_type) = match (dialect, scalar) {
            (Dialect::SqlServer, ScalarType::Bool) => ("BIT", DbType::Boolean),
            (Dialect::SqlServer, ScalarType::Int32) => ("INT", DbType::Int32),
            (Dialect::SqlServer, ScalarType::Int64) => ("BIGINT", DbType::Int64),
            (Dialect::SqlServer, ScalarType::Float64) => ("FLOAT", DbType::Double),
            (Dialect::SqlServer, ScalarType::String) => ("NVARCHAR(MAX)", DbType::String),
            (Dialect::SqlServer, ScalarType::DateTime) => ("DATETIME2", DbType::DateTime),
            (Dialect::SqlServer, ScalarType::Bytes) => ("VARBINARY(MAX)", DbType::Binary),
            (Dialect::SqlServer, ScalarType::Json) => ("NVARCHAR(MAX)", DbType::Json),
            (Dialect::Postgres, ScalarType::Bool) => ("boolean", DbType::Boolean),
            (Dialect::Postgres, ScalarType::Int32) => ("integer", DbType::Int32),
            (Dialect::Postgres, ScalarType::Int64) => ("bigint", DbType::Int64),
            (Dialect::Postgres, ScalarType::Float64) => ("double precision", DbType::Double),
            (Dialect::Postgres, ScalarType::String) => ("text", DbType::String),
            (Dialect::Postgres, ScalarType::DateTime) => ("timestamp", DbType::DateTime),
            (Dialect::Postgres, ScalarType::Bytes) => ("bytea", DbType::Binary),
            (Dialect::Postgres, ScalarType::Json) => ("jsonb", DbType::Json),
            (Dialect::Sqlite, ScalarType::Bool) => ("INTEGER", DbType::Boolean),
            (Dialect::Sqlite, ScalarType::Int32 | ScalarType::Int64) => ("INTEGER", DbType::Int64),
            (Dialect::Sqlite, ScalarType::Float64) => ("REAL", DbType::Double),
            (Dialect::Sqlite, ScalarType::String | ScalarType::Json) => ("TEXT", DbType::String),
            (Dialect::Sqlite, ScalarType::DateTime) => ("TEXT", DbType::DateTime),
            (Dialect::Sqlite, ScalarType::Bytes) => ("BLOB", DbType::Binary),
        };

        let to_db: Option<ValueConversion> = match (dialect, scalar) {
            (Dialect::Sqlite, ScalarType::Bool) => Some(bool_to_int),
            (Dialect::Sqlite, ScalarType::DateTime) => Some(datetime_to_text),
            (Dialect::Sqlite, ScalarType::Json) => Some(json_to_text),
            _ => None,
        };

        TypeMapping {
            db_type_name: name.to_string(),
            db_type: Some(db_type),
            to_db,
            from_db: None,
        }
    }
}

fn bool_to_int(value: Value) -> Result<Value, QueryError> {
    Ok(match value {
        Value::Bool(b) => Value::Int64(i64::from(b)),
        other => other,
    })
}

fn datetime_to_text(value: Value) -> Result<Value, QueryError> {
    Ok(match value {
        Value::DateTime(d) => Value::String(d.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
        other => other,
    })
}

fn json_to_text(value: Value) -> Result<Value, QueryError> {
    Ok(match value {
        Value::Json(j) => Value::String(j.to_string()),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> DescriptorSet {
        DescriptorSet::new()
            .with(
                EntityDescriptor::new("Person", "People")
                    .column("Id", ScalarType::Int32)
                    .nullable_column("Name", ScalarType::String)
                    .column("Kind", ScalarType::String)
                    .key(&["Id"])
                    .discriminated_by("Kind")
                    .discriminator_value("Person"),
            )
            .with(
                EntityDescriptor::new("Student", "People")
                    .derives("Person")
                    .nullable_column("School", ScalarType::String)
                    .discriminator_value("Student"),
            )
    }

    #[test]
    fn test_inherited_columns_come_first() {
        let set = people();
        let names: Vec<&str> = set
            .columns("Student")
            .unwrap()
            .iter()
            .map(|c| c.property.as_str())
            .collect();
        assert_eq!(names, vec!["Id", "Name", "Kind", "School"]);
    }

    #[test]
    fn test_primary_key_inherited() {
        assert_eq!(people().primary_key("Student").unwrap(), &["Id".to_string()]);
    }

    #[test]
    fn test_concrete_types_most_derived_first() {
        let set = people();
        let names: Vec<&str> = set
            .concrete_types("Person")
            .unwrap()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["Student", "Person"]);
        assert!(set.is_polymorphic("Student"));
    }

    #[test]
    fn test_unknown_member() {
        let err = people().member_type("Person", "Salary").unwrap_err();
        assert_eq!(err.to_string(), "type Person has no member Salary");
    }

    #[test]
    fn test_sqlite_bool_conversion() {
        let mapping = DefaultTypeMappings.mapping(ScalarType::Bool, Dialect::Sqlite);
        let convert = mapping.to_db.unwrap();
        assert_eq!(convert(Value::Bool(true)).unwrap(), Value::Int64(1));
    }
}
