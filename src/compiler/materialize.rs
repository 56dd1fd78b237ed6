//! Materializer builder: from a finished query to a row reader.
//!
//! The builder walks the flattened projection body once. Every SQL leaf
//! gets the next column of the command's select list (identical leaves
//! share one), and the body's structure becomes a [`Materializer`] tree
//! that rebuilds the row shape from those columns.
//!
//! Nested queries left in a projection are compiled into their own
//! command. Columns of the enclosing select that a nested query reads are
//! replaced by parameters appended after the enclosing query's own, and
//! the enclosing select projects them as extra columns; each outer row
//! supplies their values when the nested command runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::compiler::emit::{CommandTemplate, emit_query};
use crate::compiler::eval::{Env, evaluate};
use crate::config::Dialect;
use crate::descriptor::{TypeMappingProvider, ValueConversion};
use crate::error::QueryError;
use crate::execute::Connection;
use crate::expr::{AggregateFunc, Expr};
use crate::ir::walk::{self, IrRewriter};
use crate::ir::{NameSet, QueryKind, RelationalQuery, SqlExpr, TableId};
use crate::value::{Record, ScalarType, Type, Value};

// ── Read-value strategies ──────────────────────────────────────────────

/// How a column value of some scalar type is turned into a [`Value`].
pub trait ReadValueStrategy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn can_read(&self, scalar: ScalarType) -> bool;

    fn read(&self, raw: Value, scalar: ScalarType) -> Result<Value, QueryError>;
}

/// Plain scalar columns, coerced to the expected type.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarRead;

impl ReadValueStrategy for ScalarRead {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn can_read(&self, scalar: ScalarType) -> bool {
        scalar != ScalarType::Json
    }

    fn read(&self, raw: Value, scalar: ScalarType) -> Result<Value, QueryError> {
        raw.coerce(scalar)
    }
}

/// JSON documents stored as text, bytes or a native JSON column.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRead;

impl ReadValueStrategy for JsonRead {
    fn name(&self) -> &'static str {
        "json"
    }

    fn can_read(&self, scalar: ScalarType) -> bool {
        scalar == ScalarType::Json
    }

    fn read(&self, raw: Value, _scalar: ScalarType) -> Result<Value, QueryError> {
        match raw {
            Value::Null | Value::Json(_) => Ok(raw),
            Value::String(text) => serde_json::from_str(&text)
                .map(Value::Json)
                .map_err(|e| QueryError::Materialization(format!("invalid JSON column: {e}"))),
            Value::Bytes(bytes) => serde_json::from_slice(&bytes)
                .map(Value::Json)
                .map_err(|e| QueryError::Materialization(format!("invalid JSON column: {e}"))),
            other => Err(QueryError::Materialization(format!(
                "cannot read {other:?} as JSON"
            ))),
        }
    }
}

/// The strategies an engine starts with. Earlier entries win.
pub fn default_strategies() -> Vec<Arc<dyn ReadValueStrategy>> {
    vec![Arc::new(JsonRead), Arc::new(ScalarRead)]
}

// ── Materializers ──────────────────────────────────────────────────────

/// Rebuilds one result element from one physical row.
#[derive(Debug, Clone)]
pub enum Materializer {
    Column {
        index: usize,
        scalar: ScalarType,
        strategy: Arc<dyn ReadValueStrategy>,
        from_db: Option<ValueConversion>,
    },
    Constant(Value),
    /// A runtime parameter value, optionally through a record path.
    Parameter { index: usize, path: Vec<String> },
    Record {
        type_name: Option<String>,
        fields: Vec<(String, Materializer)>,
    },
    /// `(test, shape)` pairs; the first arm whose test holds wins, and a
    /// row no arm matches is null.
    Polymorphic { arms: Vec<(Materializer, Materializer)> },
    Nested(Arc<NestedPlan>),
    Grouping {
        key: Box<Materializer>,
        elements: Arc<NestedPlan>,
    },
    /// A host expression over slot values, bound as `$slot0`, `$slot1`...
    Compute { body: Expr, slots: Vec<Materializer> },
}

/// A nested query compiled into its own command.
#[derive(Debug, Clone)]
pub struct NestedPlan {
    pub template: CommandTemplate,
    pub materializer: Materializer,
    /// Enclosing-row columns appended to the parameters, in order.
    pub correlation: Vec<usize>,
    /// Number of parameters the enclosing query already has.
    pub param_base: usize,
    pub kind: QueryKind,
    pub default_if_empty: bool,
    pub row_type: Type,
}

/// What a materializer needs besides the row itself.
pub struct ReadContext<'a> {
    pub params: &'a [Value],
    pub connection: &'a mut dyn Connection,
    pub mappings: &'a dyn TypeMappingProvider,
}

impl Materializer {
    /// Build the element for `row`.
    pub fn read(&self, row: &[Value], ctx: &mut ReadContext<'_>) -> Result<Value, QueryError> {
        match self {
            Materializer::Column {
                index,
                scalar,
                strategy,
                from_db,
            } => {
                let raw = row.get(*index).cloned().ok_or_else(|| {
                    QueryError::Materialization(format!(
                        "row has {} columns, expected at least {}",
                        row.len(),
                        index + 1
                    ))
                })?;
                let raw = match from_db {
                    Some(convert) if !raw.is_null() => convert(raw)?,
                    _ => raw,
                };
                strategy.read(raw, *scalar)
            }
            Materializer::Constant(value) => Ok(value.clone()),
            Materializer::Parameter { index, path } => ctx
                .params
                .get(*index)
                .ok_or_else(|| {
                    QueryError::ParameterMismatch(format!("no value for parameter {index}"))
                })?
                .field_path(path),
            Materializer::Record { type_name, fields } => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    out.push((name.clone(), field.read(row, ctx)?));
                }
                Ok(Value::Record(Record {
                    type_name: type_name.clone(),
                    fields: out,
                }))
            }
            Materializer::Polymorphic { arms } => {
                for (test, shape) in arms {
                    if matches!(test.read(row, ctx)?, Value::Bool(true)) {
                        return shape.read(row, ctx);
                    }
                }
                Ok(Value::Null)
            }
            Materializer::Nested(plan) => plan.run(row, ctx),
            Materializer::Grouping { key, elements } => {
                let key = key.read(row, ctx)?;
                let elements = match elements.run(row, ctx)? {
                    Value::List(items) => items,
                    other => {
                        return Err(QueryError::internal(format!(
                            "group elements materialized as {other:?}"
                        )));
                    }
                };
                Ok(Value::Grouping {
                    key: Box::new(key),
                    elements,
                })
            }
            Materializer::Compute { body, slots } => {
                let mut env = Env::with_capacity(slots.len());
                for (i, slot) in slots.iter().enumerate() {
                    env.insert(slot_name(i), slot.read(row, ctx)?);
                }
                evaluate(body, &env, ctx.params)
            }
        }
    }

    /// Number of nested commands this materializer may run per row.
    pub fn nested_count(&self) -> usize {
        match self {
            Materializer::Column { .. }
            | Materializer::Constant(_)
            | Materializer::Parameter { .. } => 0,
            Materializer::Record { fields, .. } => fields.iter().map(|(_, f)| f.nested_count()).sum(),
            Materializer::Polymorphic { arms } => arms
                .iter()
                .map(|(t, s)| t.nested_count() + s.nested_count())
                .sum(),
            Materializer::Nested(_) => 1,
            Materializer::Grouping { key, .. } => 1 + key.nested_count(),
            Materializer::Compute { slots, .. } => slots.iter().map(Materializer::nested_count).sum(),
        }
    }
}

impl NestedPlan {
    fn run(&self, row: &[Value], ctx: &mut ReadContext<'_>) -> Result<Value, QueryError> {
        if ctx.params.len() != self.param_base {
            return Err(QueryError::internal(format!(
                "nested query expects {} enclosing parameters, got {}",
                self.param_base,
                ctx.params.len()
            )));
        }
        let mut params = ctx.params.to_vec();
        for &index in &self.correlation {
            let value = row.get(index).cloned().ok_or_else(|| {
                QueryError::Materialization(format!("row has no correlation column {index}"))
            })?;
            params.push(value);
        }
        let command = self.template.instantiate(&params, ctx.mappings)?;
        let mut reader = ctx.connection.execute(&command)?;
        let mut nested = ReadContext {
            params: &params,
            connection: &mut *ctx.connection,
            mappings: ctx.mappings,
        };
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row()? {
            rows.push(self.materializer.read(&row, &mut nested)?);
        }
        shape_result(self.kind, self.default_if_empty, &self.row_type, rows)
    }
}

fn slot_name(i: usize) -> String {
    format!("$slot{i}")
}

/// Turn materialized rows into the query's result value.
pub fn shape_result(
    kind: QueryKind,
    default_if_empty: bool,
    row_type: &Type,
    mut rows: Vec<Value>,
) -> Result<Value, QueryError> {
    match kind {
        QueryKind::Sequence => {
            if rows.is_empty() && default_if_empty {
                rows.push(row_type.default_value());
            }
            Ok(Value::List(rows))
        }
        QueryKind::Element(element) => {
            if element.is_single() && rows.len() > 1 {
                return Err(QueryError::MoreThanOneElement);
            }
            match rows.into_iter().next() {
                Some(row) => Ok(row),
                None if element.or_default() => Ok(row_type.default_value()),
                None => Err(QueryError::NoElements),
            }
        }
        QueryKind::Scalar(func) => {
            let value = rows.into_iter().next().unwrap_or(Value::Null);
            scalar_result(func, row_type, value)
        }
    }
}

/// Aggregates over no rows come back as null. Sums and counts of a
/// non-nullable type mean zero; averages and extrema have no value.
fn scalar_result(
    func: Option<AggregateFunc>,
    row_type: &Type,
    value: Value,
) -> Result<Value, QueryError> {
    if value.is_null() {
        if row_type.is_nullable() {
            return Ok(Value::Null);
        }
        return match func {
            Some(AggregateFunc::Average | AggregateFunc::Min | AggregateFunc::Max) => {
                Err(QueryError::NoElements)
            }
            _ => Ok(row_type.default_value()),
        };
    }
    match row_type.as_scalar() {
        Some(scalar) => value.coerce(scalar),
        None => Ok(value),
    }
}

// ── Builder ────────────────────────────────────────────────────────────

/// A query ready to run: its command template and row materializer.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub template: CommandTemplate,
    pub materializer: Materializer,
}

/// Build the command and materializer for a finished query whose own
/// parameters occupy indices `0..param_count`.
pub fn build_query(
    query: &RelationalQuery,
    param_count: usize,
    dialect: Dialect,
    mappings: &dyn TypeMappingProvider,
    strategies: &[Arc<dyn ReadValueStrategy>],
) -> Result<BuiltQuery, QueryError> {
    let mut builder = MaterializerBuilder {
        dialect,
        mappings,
        strategies,
        param_count,
        columns: Vec::new(),
        names: NameSet::new(),
    };
    let body = query.select.projection.flatten()?;
    let materializer = builder.build(&body, &mut Vec::new())?;
    let template = emit_query(&query.select, &builder.columns, dialect, mappings)?;
    trace!(
        columns = builder.columns.len(),
        nested = materializer.nested_count(),
        "built materializer"
    );
    Ok(BuiltQuery {
        template,
        materializer,
    })
}

struct MaterializerBuilder<'a> {
    dialect: Dialect,
    mappings: &'a dyn TypeMappingProvider,
    strategies: &'a [Arc<dyn ReadValueStrategy>],
    param_count: usize,
    columns: Vec<(String, SqlExpr)>,
    names: NameSet,
}

impl MaterializerBuilder<'_> {
    fn build(&mut self, expr: &Expr, path: &mut Vec<String>) -> Result<Materializer, QueryError> {
        match expr {
            Expr::Sql(sql) => self.column(sql, path),
            Expr::Constant { value, .. } | Expr::Captured { value, .. } => {
                Ok(Materializer::Constant(value.clone()))
            }
            Expr::Default(ty) => Ok(Materializer::Constant(ty.default_value())),
            Expr::Parameter { index, path, .. } => Ok(Materializer::Parameter {
                index: *index,
                path: path.clone(),
            }),
            Expr::Record { entity, fields } => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    path.push(name.clone());
                    let built = self.build(field, path);
                    path.pop();
                    out.push((name.clone(), built?));
                }
                Ok(Materializer::Record {
                    type_name: entity.clone(),
                    fields: out,
                })
            }
            Expr::Polymorphic(poly) => {
                let mut arms = Vec::with_capacity(poly.arms.len());
                for arm in &poly.arms {
                    arms.push((self.build(&arm.test, path)?, self.build(&arm.shape, path)?));
                }
                Ok(Materializer::Polymorphic { arms })
            }
            Expr::Relational(query) => Ok(Materializer::Nested(Arc::new(self.nested(query)?))),
            Expr::Grouping(group) => {
                path.push("Key".to_string());
                let key = self.build(&group.key, path);
                path.pop();
                Ok(Materializer::Grouping {
                    key: Box::new(key?),
                    elements: Arc::new(self.nested(&group.elements)?),
                })
            }
            Expr::GroupByResult(_) => Err(QueryError::internal(
                "group-by result survived finalization",
            )),
            Expr::Query(_) | Expr::CapturedQuery(_) => Err(QueryError::unsupported(
                "query operator inside a client projection",
            )),
            other => self.compute(other, path),
        }
    }

    /// Column index for `sql`, adding it to the select list when new.
    fn column_index(&mut self, sql: &SqlExpr, path: &[String]) -> usize {
        if let Some(index) = self.columns.iter().position(|(_, c)| c == sql) {
            return index;
        }
        let name = match (path.is_empty(), sql) {
            (true, SqlExpr::Column { name, .. }) => self.names.unique(name),
            _ => self.names.column_name(path),
        };
        self.columns.push((name, sql.clone()));
        self.columns.len() - 1
    }

    fn column(&mut self, sql: &SqlExpr, path: &[String]) -> Result<Materializer, QueryError> {
        let scalar = sql.scalar_type();
        let strategy = self
            .strategies
            .iter()
            .find(|s| s.can_read(scalar))
            .cloned()
            .ok_or_else(|| {
                QueryError::unsupported(format!("no read strategy for {}", scalar.name()))
            })?;
        Ok(Materializer::Column {
            index: self.column_index(sql, path),
            scalar,
            strategy,
            from_db: self.mappings.mapping(scalar, self.dialect).from_db,
        })
    }

    /// Split a host expression into slots the row provides and a body
    /// evaluated over them.
    fn compute(&mut self, expr: &Expr, path: &mut Vec<String>) -> Result<Materializer, QueryError> {
        if expr.any(&|e| matches!(e, Expr::Query(_) | Expr::CapturedQuery(_))) {
            return Err(QueryError::unsupported(
                "query operator inside a client projection",
            ));
        }
        let mut slots = Vec::new();
        let body = self.extract_slots(expr.clone(), path, &mut slots)?;
        Ok(Materializer::Compute { body, slots })
    }

    fn extract_slots(
        &mut self,
        expr: Expr,
        path: &mut Vec<String>,
        slots: &mut Vec<Materializer>,
    ) -> Result<Expr, QueryError> {
        match expr {
            Expr::Sql(_)
            | Expr::Relational(_)
            | Expr::Grouping(_)
            | Expr::Polymorphic(_)
            | Expr::GroupByResult(_) => {
                let ty = expr.ty();
                slots.push(self.build(&expr, path)?);
                Ok(Expr::Param {
                    name: slot_name(slots.len() - 1),
                    ty,
                })
            }
            other => other.map_children(&mut |child| self.extract_slots(child, path, slots)),
        }
    }

    /// Compile a nested query, correlating it to the select being built.
    fn nested(&mut self, query: &RelationalQuery) -> Result<NestedPlan, QueryError> {
        let mut query = query.clone();
        let free = walk::free_tables(&query.select);
        let mut correlate = Correlate {
            free: &free,
            next: self.param_count,
            params: HashMap::new(),
        };
        walk::rewrite_select(&mut correlate, &mut query.select)?;

        let mut outer_columns: Vec<(usize, SqlExpr)> = correlate
            .params
            .into_iter()
            .map(|(column, index)| (index, column))
            .collect();
        outer_columns.sort_by_key(|(index, _)| *index);
        let correlation: Vec<usize> = outer_columns
            .iter()
            .map(|(_, column)| self.column_index(column, &[]))
            .collect();

        let param_base = self.param_count;
        let built = build_query(
            &query,
            param_base + correlation.len(),
            self.dialect,
            self.mappings,
            self.strategies,
        )?;
        trace!(correlation = correlation.len(), "nested query");
        Ok(NestedPlan {
            template: built.template,
            materializer: built.materializer,
            correlation,
            param_base,
            kind: query.kind,
            default_if_empty: query.default_if_empty,
            row_type: query.row_type,
        })
    }
}

/// Replaces columns of enclosing tables with parameters.
struct Correlate<'a> {
    free: &'a std::collections::HashSet<TableId>,
    next: usize,
    params: HashMap<SqlExpr, usize>,
}

impl IrRewriter for Correlate<'_> {
    fn rewrite_sql(&mut self, sql: &SqlExpr) -> Option<SqlExpr> {
        let SqlExpr::Column {
            table,
            ty,
            nullable,
            ..
        } = sql
        else {
            return None;
        };
        if !self.free.contains(table) {
            return None;
        }
        let next = self.next + self.params.len();
        let index = *self.params.entry(sql.clone()).or_insert(next);
        Some(SqlExpr::Parameter {
            index,
            path: Vec::new(),
            ty: *ty,
            nullable: *nullable,
        })
    }
}
