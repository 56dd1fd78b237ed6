//! SQL text generation.
//!
//! A finished [`SelectExpr`] is rendered once per plan into a
//! [`CommandTemplate`]: SQL text with holes for runtime parameters. Each
//! execution fills the holes from the query's parameter values
//! ([`CommandTemplate::instantiate`]) without touching the IR again.
//!
//! List-valued parameters (`x IN @list`) are expanded at instantiation,
//! one placeholder per element, so one template serves lists of any
//! length.
//!
//! Table aliases are allocated while the FROM clause is written, in
//! order of appearance, starting from each table's preferred alias and
//! suffixing on collision (`e`, `e0`, ...). Every alias in one command is
//! distinct, which keeps self-joins and correlated subqueries
//! unambiguous.

use std::collections::HashMap;

use tracing::trace;

use crate::config::Dialect;
use crate::descriptor::{DbType, TypeMappingProvider};
use crate::error::QueryError;
use crate::expr::BinaryOp;
use crate::ir::{
    DatePart, InSet, JoinKind, NameSet, Ordering, SelectExpr, SqlExpr, SqlFunction, SqlUnaryOp,
    TableExpr, TableId, WindowFunc,
};
use crate::value::{ScalarType, Value};

// ── Command templates ──────────────────────────────────────────────────

/// One piece of a command template.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// A scalar parameter; the index points into the template's slots.
    Param(usize),
    /// `item IN (list)` over a list parameter, expanded to one
    /// placeholder per element. When the bound list holds a null and the
    /// item is nullable, `OR item IS NULL` is added.
    ListIn {
        slot: usize,
        item: Vec<Segment>,
        nullable: bool,
    },
}

/// Where a parameter's value comes from: a runtime value, optionally
/// reached through a field path of a captured record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParameterSlot {
    pub index: usize,
    pub path: Vec<String>,
    /// Scalar type of the value (of each element, for list slots).
    pub ty: ScalarType,
}

/// SQL text with parameter holes.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTemplate {
    pub segments: Vec<Segment>,
    pub slots: Vec<ParameterSlot>,
    pub dialect: Dialect,
}

/// A bound parameter of an executable command.
#[derive(Debug, Clone, PartialEq)]
pub struct DbParameter {
    /// The placeholder as written in the command text.
    pub name: String,
    pub value: Value,
    pub db_type: Option<DbType>,
    pub type_name: String,
}

/// An executable command: final SQL text plus bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub text: String,
    pub parameters: Vec<DbParameter>,
}

impl CommandTemplate {
    /// Bind `values` into the template.
    ///
    /// Placeholders are numbered by first occurrence. A slot used twice
    /// binds once and reuses its placeholder. Null elements of a list
    /// parameter never match under `IN`; they become an `IS NULL`
    /// alternative on a nullable item instead.
    pub fn instantiate(
        &self,
        values: &[Value],
        mappings: &dyn TypeMappingProvider,
    ) -> Result<Command, QueryError> {
        let mut binder = Binder {
            template: self,
            values,
            mappings,
            text: String::new(),
            parameters: Vec::new(),
            bound: HashMap::new(),
        };
        binder.write(&self.segments)?;
        Ok(Command {
            text: binder.text,
            parameters: binder.parameters,
        })
    }

    fn slot(&self, slot: usize) -> Result<&ParameterSlot, QueryError> {
        self.slots
            .get(slot)
            .ok_or_else(|| QueryError::internal(format!("template has no slot {slot}")))
    }

    fn resolve(&self, slot: &ParameterSlot, values: &[Value]) -> Result<Value, QueryError> {
        let value = values
            .get(slot.index)
            .ok_or_else(|| missing(slot.index, values.len()))?
            .field_path(&slot.path)?;
        coerce_parameter(value, slot.ty, slot.index)
    }

    fn bind(
        &self,
        parameters: &mut Vec<DbParameter>,
        value: Value,
        ty: ScalarType,
        mappings: &dyn TypeMappingProvider,
    ) -> Result<String, QueryError> {
        let mapping = mappings.mapping(ty, self.dialect);
        let value = match mapping.to_db {
            Some(convert) if !value.is_null() => convert(value)?,
            _ => value,
        };
        let n = parameters.len();
        let name = match self.dialect {
            Dialect::SqlServer => format!("@p{n}"),
            Dialect::Postgres => format!("${}", n + 1),
            Dialect::Sqlite => format!("?{}", n + 1),
        };
        parameters.push(DbParameter {
            name: name.clone(),
            value,
            db_type: mapping.db_type,
            type_name: mapping.db_type_name,
        });
        Ok(name)
    }

    /// Postgres infers parameter types from context and cannot in
    /// projections or function arguments, so every placeholder is typed.
    fn write_placeholder(
        &self,
        text: &mut String,
        name: &str,
        ty: ScalarType,
        mappings: &dyn TypeMappingProvider,
    ) {
        match self.dialect {
            Dialect::Postgres => {
                let type_name = mappings.mapping(ty, self.dialect).db_type_name;
                text.push_str(&format!("CAST({name} AS {type_name})"));
            }
            _ => text.push_str(name),
        }
    }

    fn write_empty_set(&self, text: &mut String, ty: ScalarType, mappings: &dyn TypeMappingProvider) {
        match self.dialect {
            Dialect::Postgres => {
                let type_name = mappings.mapping(ty, self.dialect).db_type_name;
                text.push_str(&format!("SELECT CAST(NULL AS {type_name}) WHERE 1 = 0"));
            }
            _ => text.push_str("SELECT NULL WHERE 1 = 0"),
        }
    }
}

/// Instantiation state: the text written so far and the parameters bound.
struct Binder<'t> {
    template: &'t CommandTemplate,
    values: &'t [Value],
    mappings: &'t dyn TypeMappingProvider,
    text: String,
    parameters: Vec<DbParameter>,
    bound: HashMap<usize, String>,
}

impl Binder<'_> {
    fn write(&mut self, segments: &[Segment]) -> Result<(), QueryError> {
        for segment in segments {
            match segment {
                Segment::Text(t) => self.text.push_str(t),
                Segment::Param(slot) => {
                    let template = self.template;
                    let slot_def = template.slot(*slot)?;
                    let name = match self.bound.get(slot) {
                        Some(name) => name.clone(),
                        None => {
                            let value = template.resolve(slot_def, self.values)?;
                            let name = self.bind(value, slot_def.ty)?;
                            self.bound.insert(*slot, name.clone());
                            name
                        }
                    };
                    self.placeholder(&name, slot_def.ty);
                }
                Segment::ListIn {
                    slot,
                    item,
                    nullable,
                } => self.list_in(*slot, item, *nullable)?,
            }
        }
        Ok(())
    }

    fn list_in(&mut self, slot: usize, item: &[Segment], nullable: bool) -> Result<(), QueryError> {
        let template = self.template;
        let slot_def = template.slot(slot)?;
        let list = self
            .values
            .get(slot_def.index)
            .ok_or_else(|| missing(slot_def.index, self.values.len()))?
            .field_path(&slot_def.path)?;
        let items = match list {
            Value::Null => Vec::new(),
            Value::List(items) => items,
            other => {
                return Err(QueryError::ParameterMismatch(format!(
                    "parameter {} is not a list: {other:?}",
                    slot_def.index
                )));
            }
        };
        let has_null = items.iter().any(Value::is_null);
        let items: Vec<Value> = items.into_iter().filter(|v| !v.is_null()).collect();
        let null_test = has_null && nullable;

        if null_test && items.is_empty() {
            self.write(item)?;
            self.text.push_str(" IS NULL");
            return Ok(());
        }
        if null_test {
            self.text.push('(');
        }
        self.write(item)?;
        self.text.push_str(" IN (");
        if items.is_empty() {
            template.write_empty_set(&mut self.text, slot_def.ty, self.mappings);
        }
        for (i, value) in items.into_iter().enumerate() {
            if i > 0 {
                self.text.push_str(", ");
            }
            let value = coerce_parameter(value, slot_def.ty, slot_def.index)?;
            let name = self.bind(value, slot_def.ty)?;
            self.placeholder(&name, slot_def.ty);
        }
        self.text.push(')');
        if null_test {
            self.text.push_str(" OR ");
            self.write(item)?;
            self.text.push_str(" IS NULL)");
        }
        Ok(())
    }

    fn bind(&mut self, value: Value, ty: ScalarType) -> Result<String, QueryError> {
        self.template
            .bind(&mut self.parameters, value, ty, self.mappings)
    }

    fn placeholder(&mut self, name: &str, ty: ScalarType) {
        self.template
            .write_placeholder(&mut self.text, name, ty, self.mappings);
    }
}

fn missing(index: usize, len: usize) -> QueryError {
    QueryError::ParameterMismatch(format!(
        "plan reads parameter {index} but only {len} values were supplied"
    ))
}

fn coerce_parameter(value: Value, ty: ScalarType, index: usize) -> Result<Value, QueryError> {
    value
        .coerce(ty)
        .map_err(|e| QueryError::ParameterMismatch(format!("parameter {index}: {e}")))
}

// ── Entry point ────────────────────────────────────────────────────────

/// Render a top-level select projecting exactly `columns`, in order.
pub fn emit_query(
    select: &SelectExpr,
    columns: &[(String, SqlExpr)],
    dialect: Dialect,
    mappings: &dyn TypeMappingProvider,
) -> Result<CommandTemplate, QueryError> {
    let mut emitter = Emitter::new(dialect, mappings);
    emitter.select(select, SelectMode::Top(columns))?;
    trace!(
        segments = emitter.out.len(),
        slots = emitter.slots.len(),
        "emitted command template"
    );
    Ok(CommandTemplate {
        segments: emitter.out,
        slots: emitter.slots,
        dialect,
    })
}

/// What a select's column list looks like.
#[derive(Clone, Copy)]
enum SelectMode<'c> {
    /// An explicit column list.
    Top(&'c [(String, SqlExpr)]),
    /// A derived table or set operand: its projected record, named.
    Derived,
    /// Under `EXISTS`: the columns do not matter.
    Exists,
    /// A scalar or `IN` subquery: its single column.
    Scalar,
}

// ── Emitter ────────────────────────────────────────────────────────────

struct Emitter<'m> {
    dialect: Dialect,
    mappings: &'m dyn TypeMappingProvider,
    out: Vec<Segment>,
    slots: Vec<ParameterSlot>,
    slot_index: HashMap<ParameterSlot, usize>,
    aliases: HashMap<TableId, String>,
    alias_names: NameSet,
}

impl<'m> Emitter<'m> {
    fn new(dialect: Dialect, mappings: &'m dyn TypeMappingProvider) -> Self {
        Emitter {
            dialect,
            mappings,
            out: Vec::new(),
            slots: Vec::new(),
            slot_index: HashMap::new(),
            aliases: HashMap::new(),
            alias_names: NameSet::new(),
        }
    }

    fn push(&mut self, text: &str) {
        if let Some(Segment::Text(last)) = self.out.last_mut() {
            last.push_str(text);
        } else {
            self.out.push(Segment::Text(text.to_string()));
        }
    }

    fn extend(&mut self, segments: Vec<Segment>) {
        for segment in segments {
            match segment {
                Segment::Text(t) => self.push(&t),
                other => self.out.push(other),
            }
        }
    }

    /// Run `f` against an empty buffer and return what it wrote.
    fn capture(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), QueryError>,
    ) -> Result<Vec<Segment>, QueryError> {
        let saved = std::mem::take(&mut self.out);
        let result = f(self);
        let captured = std::mem::replace(&mut self.out, saved);
        result.map(|()| captured)
    }

    fn quote(&self, ident: &str) -> String {
        match self.dialect {
            Dialect::SqlServer => format!("[{}]", ident.replace(']', "]]")),
            Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    fn slot(&mut self, index: usize, path: &[String], ty: ScalarType) -> usize {
        let slot = ParameterSlot {
            index,
            path: path.to_vec(),
            ty,
        };
        if let Some(&existing) = self.slot_index.get(&slot) {
            return existing;
        }
        let n = self.slots.len();
        self.slots.push(slot.clone());
        self.slot_index.insert(slot, n);
        n
    }

    // ── Selects ──

    fn select(&mut self, select: &SelectExpr, mode: SelectMode<'_>) -> Result<(), QueryError> {
        // FROM first, so the tables have aliases before anything reads them.
        let from = match &select.table {
            Some(table) => Some(self.capture(|e| e.table(table))?),
            None => None,
        };

        let limited = select.limit.is_some() || select.offset.is_some();
        self.push("SELECT ");
        if select.is_distinct {
            self.push("DISTINCT ");
        }
        if self.dialect == Dialect::SqlServer
            && let (Some(limit), None) = (&select.limit, &select.offset)
        {
            self.push("TOP (");
            self.value(limit)?;
            self.push(") ");
        }
        self.select_list(select, mode)?;

        if let Some(from) = from {
            self.push(" FROM ");
            self.extend(from);
        }
        if let Some(predicate) = &select.predicate {
            self.push(" WHERE ");
            self.predicate(predicate)?;
        }
        if let Some(keys) = &select.grouping
            && !keys.is_empty()
        {
            self.push(" GROUP BY ");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.value(key)?;
            }
        }

        let top = matches!(mode, SelectMode::Top(_));
        if !select.order_by.is_empty() && (top || limited) {
            self.push(" ORDER BY ");
            self.orderings(&select.order_by)?;
        } else if select.offset.is_some() && self.dialect == Dialect::SqlServer {
            self.push(" ORDER BY (SELECT NULL)");
        }
        self.paging(select)
    }

    fn select_list(&mut self, select: &SelectExpr, mode: SelectMode<'_>) -> Result<(), QueryError> {
        let columns: Vec<(String, SqlExpr)> = match mode {
            SelectMode::Top(columns) => columns.to_vec(),
            SelectMode::Derived => match select.projected_columns() {
                Ok(columns) => columns,
                Err(_) => select.columns()?,
            },
            SelectMode::Exists => Vec::new(),
            SelectMode::Scalar => {
                let column = match select.single_column() {
                    Some(sql) => sql.clone(),
                    None => {
                        let mut columns = select.columns()?;
                        if columns.len() != 1 {
                            return Err(QueryError::internal(format!(
                                "scalar subquery projects {} columns",
                                columns.len()
                            )));
                        }
                        columns.remove(0).1
                    }
                };
                self.projected(&column)?;
                return Ok(());
            }
        };
        if columns.is_empty() {
            self.push("1");
            return Ok(());
        }
        for (i, (name, sql)) in columns.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.projected(sql)?;
            let same_name = matches!(sql, SqlExpr::Column { name: column, .. } if column == name);
            if !same_name {
                let quoted = self.quote(name);
                self.push(" AS ");
                self.push(&quoted);
            }
        }
        Ok(())
    }

    /// A select-list item. Computed booleans are cast to `BIT` on SQL
    /// Server so the column reads back as a boolean.
    fn projected(&mut self, sql: &SqlExpr) -> Result<(), QueryError> {
        let computed_bool = sql.scalar_type() == ScalarType::Bool
            && !matches!(sql, SqlExpr::Column { .. } | SqlExpr::Literal { .. });
        if self.dialect == Dialect::SqlServer && computed_bool {
            self.push("CAST(");
            self.value(sql)?;
            self.push(" AS BIT)");
            return Ok(());
        }
        self.value(sql)
    }

    fn orderings(&mut self, order_by: &[Ordering]) -> Result<(), QueryError> {
        for (i, ordering) in order_by.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.value(&ordering.expr)?;
            if ordering.descending {
                self.push(" DESC");
            }
        }
        Ok(())
    }

    fn paging(&mut self, select: &SelectExpr) -> Result<(), QueryError> {
        match self.dialect {
            Dialect::SqlServer => {
                if let Some(offset) = &select.offset {
                    self.push(" OFFSET ");
                    self.value(offset)?;
                    self.push(" ROWS");
                    if let Some(limit) = &select.limit {
                        self.push(" FETCH NEXT ");
                        self.value(limit)?;
                        self.push(" ROWS ONLY");
                    }
                }
            }
            Dialect::Postgres | Dialect::Sqlite => {
                match (&select.limit, &select.offset) {
                    (Some(limit), _) => {
                        self.push(" LIMIT ");
                        self.value(limit)?;
                    }
                    (None, Some(_)) if self.dialect == Dialect::Sqlite => self.push(" LIMIT -1"),
                    _ => {}
                }
                if let Some(offset) = &select.offset {
                    self.push(" OFFSET ");
                    self.value(offset)?;
                }
            }
        }
        Ok(())
    }

    // ── Tables ──

    fn alias(&mut self, id: TableId, preferred: &str) -> String {
        let alias = self.alias_names.unique(preferred);
        self.aliases.insert(id, alias.clone());
        alias
    }

    fn table(&mut self, table: &TableExpr) -> Result<(), QueryError> {
        match table {
            TableExpr::Base {
                id,
                name,
                schema,
                alias,
            } => {
                if let Some(schema) = schema {
                    let schema = self.quote(schema);
                    self.push(&schema);
                    self.push(".");
                }
                let name = self.quote(name);
                self.push(&name);
                let alias = self.alias(*id, alias);
                let alias = self.quote(&alias);
                self.push(" AS ");
                self.push(&alias);
            }
            TableExpr::Subquery { id, alias, select } => {
                let alias = self.alias(*id, alias);
                self.push("(");
                self.select(select, SelectMode::Derived)?;
                self.push(") AS ");
                let alias = self.quote(&alias);
                self.push(&alias);
            }
            TableExpr::SetOperator {
                id,
                alias,
                op,
                left,
                right,
            } => {
                let alias = self.alias(*id, alias);
                self.push("(");
                self.select(left, SelectMode::Derived)?;
                self.push(" ");
                self.push(op.keyword());
                self.push(" ");
                self.select(right, SelectMode::Derived)?;
                self.push(") AS ");
                let alias = self.quote(&alias);
                self.push(&alias);
            }
            TableExpr::Join {
                kind,
                outer,
                inner,
                predicate,
            } => {
                self.table(outer)?;
                let (keyword, lateral_on) = self.join_keyword(*kind)?;
                self.push(" ");
                self.push(keyword);
                self.push(" ");
                let nested = matches!(inner.as_ref(), TableExpr::Join { .. });
                if nested {
                    self.push("(");
                }
                self.table(inner)?;
                if nested {
                    self.push(")");
                }
                if let Some(predicate) = predicate {
                    self.push(" ON ");
                    self.predicate(predicate)?;
                } else if lateral_on {
                    self.push(" ON TRUE");
                }
            }
        }
        Ok(())
    }

    /// Join keyword, and whether the join needs a dummy `ON TRUE`.
    fn join_keyword(&self, kind: JoinKind) -> Result<(&'static str, bool), QueryError> {
        Ok(match (kind, self.dialect) {
            (JoinKind::Inner, _) => ("INNER JOIN", false),
            (JoinKind::Left, _) => ("LEFT JOIN", false),
            (JoinKind::Full, _) => ("FULL JOIN", false),
            (JoinKind::Cross, _) => ("CROSS JOIN", false),
            (JoinKind::CrossApply, Dialect::SqlServer) => ("CROSS APPLY", false),
            (JoinKind::OuterApply, Dialect::SqlServer) => ("OUTER APPLY", false),
            (JoinKind::CrossApply, Dialect::Postgres) => ("CROSS JOIN LATERAL", false),
            (JoinKind::OuterApply, Dialect::Postgres) => ("LEFT JOIN LATERAL", true),
            (JoinKind::CrossApply | JoinKind::OuterApply, Dialect::Sqlite) => {
                return Err(QueryError::unsupported(
                    "correlated joins (APPLY) on SQLite",
                ));
            }
        })
    }

    // ── Scalars ──

    /// Value position. Predicates become 0/1 where booleans are not
    /// first-class.
    fn value(&mut self, sql: &SqlExpr) -> Result<(), QueryError> {
        if sql.is_predicate()
            && !self.dialect.has_native_boolean()
            && !matches!(sql, SqlExpr::Alias { .. })
        {
            self.push("CASE WHEN ");
            self.raw(sql)?;
            self.push(" THEN 1 ELSE 0 END");
            return Ok(());
        }
        self.raw(sql)
    }

    /// Predicate position. Boolean values are compared with 1 where
    /// booleans are not first-class.
    fn predicate(&mut self, sql: &SqlExpr) -> Result<(), QueryError> {
        if sql.is_predicate() {
            return match sql {
                SqlExpr::Alias { expr, .. } => self.predicate(expr),
                _ => self.raw(sql),
            };
        }
        if let SqlExpr::Literal {
            value: Value::Bool(b),
            ..
        } = sql
        {
            self.push(match (self.dialect.has_native_boolean(), *b) {
                (true, true) => "TRUE",
                (true, false) => "FALSE",
                (false, true) => "1 = 1",
                (false, false) => "1 = 0",
            });
            return Ok(());
        }
        if self.dialect.has_native_boolean() {
            return self.raw(sql);
        }
        self.operand(sql, BinaryOp::Eq)?;
        self.push(" = 1");
        Ok(())
    }

    /// An operand of `parent`, parenthesized when it binds looser.
    fn operand(&mut self, sql: &SqlExpr, parent: BinaryOp) -> Result<(), QueryError> {
        let wrap = match sql {
            // Comparisons bind tighter than AND/OR; only a different
            // connective needs brackets under a logical parent.
            SqlExpr::Binary { op, .. } if parent.is_logical() => {
                op.is_logical() && *op != parent
            }
            SqlExpr::Binary { .. } => true,
            SqlExpr::Unary { .. } | SqlExpr::Like { .. } | SqlExpr::In { .. } => {
                !parent.is_logical()
            }
            _ => false,
        };
        if wrap {
            self.push("(");
        }
        if parent.is_logical() {
            self.predicate(sql)?;
        } else {
            self.value(sql)?;
        }
        if wrap {
            self.push(")");
        }
        Ok(())
    }

    fn list(&mut self, items: &[SqlExpr]) -> Result<(), QueryError> {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.value(item)?;
        }
        Ok(())
    }

    fn raw(&mut self, sql: &SqlExpr) -> Result<(), QueryError> {
        match sql {
            SqlExpr::Column { table, name, .. } => {
                let alias = self.aliases.get(table).cloned().ok_or_else(|| {
                    QueryError::internal(format!("column {name} reads unknown table {table}"))
                })?;
                let text = format!("{}.{}", self.quote(&alias), self.quote(name));
                self.push(&text);
            }
            SqlExpr::Literal { value, ty } => {
                let text = self.literal(value, *ty)?;
                self.push(&text);
            }
            SqlExpr::Parameter {
                index, path, ty, ..
            } => {
                let slot = self.slot(*index, path, *ty);
                self.out.push(Segment::Param(slot));
            }
            SqlExpr::Function { func, args, .. } => self.function(*func, args)?,
            SqlExpr::Aggregate {
                func,
                arg,
                distinct,
                ..
            } => {
                self.push(func.name());
                self.push("(");
                match arg {
                    Some(arg) => {
                        if *distinct {
                            self.push("DISTINCT ");
                        }
                        self.value(arg)?;
                    }
                    None => self.push("*"),
                }
                self.push(")");
            }
            SqlExpr::Cast { expr, ty } => {
                let type_name = self.mappings.mapping(*ty, self.dialect).db_type_name;
                self.push("CAST(");
                self.value(expr)?;
                self.push(" AS ");
                self.push(&type_name);
                self.push(")");
            }
            SqlExpr::Alias { expr, .. } => self.value(expr)?,
            SqlExpr::Concat(parts) => self.concat(parts)?,
            SqlExpr::Exists(select) => {
                self.push("EXISTS (");
                self.select(select, SelectMode::Exists)?;
                self.push(")");
            }
            SqlExpr::In { expr, set } => match set {
                InSet::Values(values) if values.is_empty() => self.push("1 = 0"),
                InSet::Values(values) => {
                    self.operand(expr, BinaryOp::Eq)?;
                    self.push(" IN (");
                    self.list(values)?;
                    self.push(")");
                }
                InSet::Parameter { index, path, ty } => {
                    let item = self.capture(|e| e.operand(expr, BinaryOp::Eq))?;
                    let slot = self.slot(*index, path, *ty);
                    self.out.push(Segment::ListIn {
                        slot,
                        item,
                        nullable: expr.is_nullable(),
                    });
                }
                InSet::Subquery(select) => {
                    self.operand(expr, BinaryOp::Eq)?;
                    self.push(" IN (");
                    self.select(select, SelectMode::Scalar)?;
                    self.push(")");
                }
            },
            SqlExpr::Like {
                expr,
                pattern,
                escape,
            } => {
                self.operand(expr, BinaryOp::Eq)?;
                self.push(" LIKE ");
                self.operand(pattern, BinaryOp::Eq)?;
                if let Some(escape) = escape {
                    let text = format!(" ESCAPE '{}'", escape.to_string().replace('\'', "''"));
                    self.push(&text);
                }
            }
            SqlExpr::Window {
                func: WindowFunc::RowNumber,
                partition_by,
                order_by,
            } => {
                self.push("ROW_NUMBER() OVER (");
                if !partition_by.is_empty() {
                    self.push("PARTITION BY ");
                    self.list(partition_by)?;
                    if !order_by.is_empty() || self.dialect == Dialect::SqlServer {
                        self.push(" ");
                    }
                }
                if !order_by.is_empty() {
                    self.push("ORDER BY ");
                    self.orderings(order_by)?;
                } else if self.dialect == Dialect::SqlServer {
                    self.push("ORDER BY (SELECT NULL)");
                }
                self.push(")");
            }
            SqlExpr::Binary { op, left, right } => {
                self.operand(left, *op)?;
                self.push(" ");
                self.push(op.symbol());
                self.push(" ");
                self.operand(right, *op)?;
            }
            SqlExpr::Unary { op, operand } => match op {
                SqlUnaryOp::Not => {
                    self.push("NOT (");
                    self.predicate(operand)?;
                    self.push(")");
                }
                SqlUnaryOp::Negate => {
                    self.push("-");
                    self.operand(operand, BinaryOp::Multiply)?;
                }
                SqlUnaryOp::IsNull => {
                    self.operand(operand, BinaryOp::Eq)?;
                    self.push(" IS NULL");
                }
                SqlUnaryOp::IsNotNull => {
                    self.operand(operand, BinaryOp::Eq)?;
                    self.push(" IS NOT NULL");
                }
            },
            SqlExpr::Case {
                arms, otherwise, ..
            } => {
                self.push("CASE");
                for (test, value) in arms {
                    self.push(" WHEN ");
                    self.predicate(test)?;
                    self.push(" THEN ");
                    self.value(value)?;
                }
                self.push(" ELSE ");
                self.value(otherwise)?;
                self.push(" END");
            }
            SqlExpr::ScalarSubquery(select) => {
                self.push("(");
                self.select(select, SelectMode::Scalar)?;
                self.push(")");
            }
            SqlExpr::Fragment { text, .. } => self.push(text),
        }
        Ok(())
    }

    fn concat(&mut self, parts: &[SqlExpr]) -> Result<(), QueryError> {
        match (self.dialect, parts) {
            (_, []) => self.push("''"),
            (Dialect::Sqlite, parts) => {
                self.push("(");
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        self.push(" || ");
                    }
                    self.push("COALESCE(");
                    self.value(part)?;
                    self.push(", '')");
                }
                self.push(")");
            }
            (_, [single]) => {
                self.push("COALESCE(");
                self.value(single)?;
                self.push(", '')");
            }
            (_, parts) => {
                self.push("CONCAT(");
                self.list(parts)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn call(&mut self, name: &str, args: &[SqlExpr]) -> Result<(), QueryError> {
        self.push(name);
        self.push("(");
        self.list(args)?;
        self.push(")");
        Ok(())
    }

    fn arg<'a>(func: SqlFunction, args: &'a [SqlExpr], i: usize) -> Result<&'a SqlExpr, QueryError> {
        args.get(i).ok_or_else(|| {
            QueryError::internal(format!("{func:?} is missing argument {i}"))
        })
    }

    fn function(&mut self, func: SqlFunction, args: &[SqlExpr]) -> Result<(), QueryError> {
        let dialect = self.dialect;
        match func {
            SqlFunction::Length => {
                let name = match dialect {
                    Dialect::SqlServer => "LEN",
                    Dialect::Postgres => "LENGTH",
                    Dialect::Sqlite => "length",
                };
                self.call(name, args)
            }
            SqlFunction::Upper => self.call("UPPER", args),
            SqlFunction::Lower => self.call("LOWER", args),
            SqlFunction::Trim if dialect == Dialect::SqlServer => {
                self.push("LTRIM(");
                self.call("RTRIM", args)?;
                self.push(")");
                Ok(())
            }
            SqlFunction::Trim => self.call("TRIM", args),
            SqlFunction::LTrim => self.call("LTRIM", args),
            SqlFunction::RTrim => self.call("RTRIM", args),
            SqlFunction::Substring => {
                let s = Self::arg(func, args, 0)?;
                let start = Self::arg(func, args, 1)?;
                let len = args.get(2);
                match dialect {
                    Dialect::SqlServer => {
                        self.push("SUBSTRING(");
                        self.value(s)?;
                        self.push(", ");
                        self.value(start)?;
                        self.push(", ");
                        match len {
                            Some(len) => self.value(len)?,
                            None => self.call("LEN", std::slice::from_ref(s))?,
                        }
                        self.push(")");
                        Ok(())
                    }
                    Dialect::Postgres => {
                        self.push("SUBSTRING(");
                        self.value(s)?;
                        self.push(" FROM ");
                        self.value(start)?;
                        if let Some(len) = len {
                            self.push(" FOR ");
                            self.value(len)?;
                        }
                        self.push(")");
                        Ok(())
                    }
                    Dialect::Sqlite => self.call("substr", args),
                }
            }
            SqlFunction::Replace => self.call("REPLACE", args),
            SqlFunction::IndexOf => {
                let haystack = Self::arg(func, args, 0)?.clone();
                let needle = Self::arg(func, args, 1)?.clone();
                self.push("(");
                match dialect {
                    Dialect::SqlServer => self.call("CHARINDEX", &[needle, haystack])?,
                    Dialect::Postgres => self.call("STRPOS", &[haystack, needle])?,
                    Dialect::Sqlite => self.call("INSTR", &[haystack, needle])?,
                }
                self.push(" - 1)");
                Ok(())
            }
            SqlFunction::Abs => self.call("ABS", args),
            SqlFunction::Round => {
                self.push("ROUND(");
                self.value(Self::arg(func, args, 0)?)?;
                if dialect == Dialect::SqlServer {
                    self.push(", 0");
                }
                self.push(")");
                Ok(())
            }
            SqlFunction::Floor => self.call("FLOOR", args),
            SqlFunction::Ceiling => match dialect {
                Dialect::SqlServer => self.call("CEILING", args),
                _ => self.call("CEIL", args),
            },
            SqlFunction::Power => self.call("POWER", args),
            SqlFunction::Sqrt => self.call("SQRT", args),
            SqlFunction::DatePart(part) => {
                let x = Self::arg(func, args, 0)?;
                match dialect {
                    Dialect::SqlServer => {
                        self.push("DATEPART(");
                        self.push(part.keyword());
                        self.push(", ");
                        self.value(x)?;
                        self.push(")");
                    }
                    Dialect::Postgres => {
                        let field = part.keyword().to_ascii_uppercase();
                        self.push("CAST(FLOOR(EXTRACT(");
                        self.push(&field);
                        self.push(" FROM ");
                        self.value(x)?;
                        self.push(")) AS integer)");
                    }
                    Dialect::Sqlite => {
                        self.push("CAST(strftime('");
                        self.push(strftime_format(part));
                        self.push("', ");
                        self.value(x)?;
                        self.push(") AS INTEGER)");
                    }
                }
                Ok(())
            }
            SqlFunction::DateAdd(part) => {
                let x = Self::arg(func, args, 0)?;
                let amount = Self::arg(func, args, 1)?;
                match dialect {
                    Dialect::SqlServer => {
                        self.push("DATEADD(");
                        self.push(part.keyword());
                        self.push(", ");
                        self.value(amount)?;
                        self.push(", ");
                        self.value(x)?;
                        self.push(")");
                    }
                    Dialect::Postgres => {
                        self.push("(");
                        self.value(x)?;
                        self.push(" + ");
                        self.operand(amount, BinaryOp::Multiply)?;
                        self.push(" * INTERVAL '1 ");
                        self.push(part.keyword());
                        self.push("')");
                    }
                    Dialect::Sqlite => {
                        self.push("datetime(");
                        self.value(x)?;
                        self.push(", printf('%+d ");
                        self.push(part.keyword());
                        self.push("s', ");
                        self.value(amount)?;
                        self.push("))");
                    }
                }
                Ok(())
            }
            SqlFunction::Now => {
                self.push(match dialect {
                    Dialect::SqlServer => "GETDATE()",
                    Dialect::Postgres => "LOCALTIMESTAMP",
                    Dialect::Sqlite => "CURRENT_TIMESTAMP",
                });
                Ok(())
            }
            SqlFunction::Coalesce => self.call("COALESCE", args),
        }
    }

    fn literal(&self, value: &Value, ty: ScalarType) -> Result<String, QueryError> {
        let dialect = self.dialect;
        Ok(match value {
            Value::Null if dialect == Dialect::Postgres => format!(
                "CAST(NULL AS {})",
                self.mappings.mapping(ty, dialect).db_type_name
            ),
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match (dialect.has_native_boolean(), *b) {
                (true, true) => "TRUE".to_string(),
                (true, false) => "FALSE".to_string(),
                (false, b) => i32::from(b).to_string(),
            },
            Value::Int32(i) => i.to_string(),
            Value::Int64(i) => i.to_string(),
            Value::Float64(f) if f.is_finite() => format!("{f:?}"),
            Value::Float64(f) => {
                return Err(QueryError::unsupported(format!("non-finite literal {f}")));
            }
            Value::String(s) => self.string_literal(s),
            Value::DateTime(d) => {
                let text = d.format("%Y-%m-%d %H:%M:%S%.f").to_string();
                match dialect {
                    Dialect::SqlServer => format!("CAST('{text}' AS DATETIME2)"),
                    Dialect::Postgres => format!("TIMESTAMP '{text}'"),
                    Dialect::Sqlite => format!("'{text}'"),
                }
            }
            Value::Bytes(bytes) => {
                let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
                match dialect {
                    Dialect::SqlServer => format!("0x{hex}"),
                    Dialect::Postgres => format!("decode('{hex}', 'hex')"),
                    Dialect::Sqlite => format!("X'{hex}'"),
                }
            }
            Value::Json(json) => {
                let text = self.string_literal(&json.to_string());
                match dialect {
                    Dialect::Postgres => format!("CAST({text} AS jsonb)"),
                    _ => text,
                }
            }
            Value::List(_) | Value::Record(_) | Value::Grouping { .. } => {
                return Err(QueryError::unsupported(format!(
                    "literal of type {} in SQL text",
                    ty.name()
                )));
            }
        })
    }

    fn string_literal(&self, s: &str) -> String {
        let escaped = s.replace('\'', "''");
        match self.dialect {
            Dialect::SqlServer => format!("N'{escaped}'"),
            Dialect::Postgres | Dialect::Sqlite => format!("'{escaped}'"),
        }
    }
}

fn strftime_format(part: DatePart) -> &'static str {
    match part {
        DatePart::Year => "%Y",
        DatePart::Month => "%m",
        DatePart::Day => "%d",
        DatePart::Hour => "%H",
        DatePart::Minute => "%M",
        DatePart::Second => "%S",
    }
}
