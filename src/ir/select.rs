//! The SELECT node and its clause-level invariants.
//!
//! Every mutator first checks whether the new clause may be added to the
//! select as it stands. When it may not (a predicate over a limited
//! select, a limit over a limited select, a group over a distinct
//! select, ...) the current select is pushed down into a subquery and the
//! clause is added to a fresh outer select. Callers that bind lambdas
//! against the projection call [`SelectExpr::prepare`] first, so the SQL
//! they produce already references the outer select.

use std::collections::{HashMap, HashSet};

use crate::error::QueryError;
use crate::expr::Expr;
use crate::ir::walk::{self, IrRewriter};
use crate::ir::{NameSet, Projection, SqlExpr, TableExpr, TableId, TableIds};
use crate::value::{Type, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ordering {
    pub expr: SqlExpr,
    pub descending: bool,
}

/// A clause about to be added to a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clause {
    Predicate,
    OrderBy,
    Limit,
    Offset,
    Distinct,
    Grouping,
    /// A new projection that replaces the current one.
    Projection,
    /// An aggregate over all rows of the select.
    Aggregate,
    /// The select becomes one side of a join.
    Join,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectExpr {
    pub projection: Projection,
    /// `None` for a table-less select (`SELECT 1`, `SELECT EXISTS(...)`).
    pub table: Option<TableExpr>,
    pub predicate: Option<SqlExpr>,
    pub order_by: Vec<Ordering>,
    pub offset: Option<SqlExpr>,
    pub limit: Option<SqlExpr>,
    pub is_distinct: bool,
    pub grouping: Option<Vec<SqlExpr>>,
    /// The projection computes window functions over the rows.
    pub is_windowed: bool,
}

impl SelectExpr {
    pub fn new(projection: Projection, table: Option<TableExpr>) -> SelectExpr {
        SelectExpr {
            projection,
            table,
            predicate: None,
            order_by: Vec::new(),
            offset: None,
            limit: None,
            is_distinct: false,
            grouping: None,
            is_windowed: false,
        }
    }

    // ── clause legality ──

    /// Whether `clause` can only be added after a pushdown.
    pub fn needs_pushdown(&self, clause: Clause) -> bool {
        let limited = self.limit.is_some() || self.offset.is_some();
        match clause {
            Clause::Predicate
            | Clause::OrderBy
            | Clause::Grouping
            | Clause::Aggregate
            | Clause::Join => {
                self.is_distinct || self.grouping.is_some() || limited || self.is_windowed
            }
            Clause::Limit => self.limit.is_some(),
            Clause::Offset => limited,
            Clause::Distinct => limited || self.is_windowed,
            Clause::Projection => self.is_distinct,
        }
    }

    /// Push down if `clause` requires it. Returns whether it did.
    pub fn prepare(&mut self, clause: Clause, ids: &mut TableIds) -> Result<bool, QueryError> {
        if !self.needs_pushdown(clause) {
            return Ok(false);
        }
        self.wrap(ids)?;
        Ok(true)
    }

    /// A select with a table and no clause that changes row identity:
    /// suitable as the inner side of a plain join.
    pub fn is_simple(&self) -> bool {
        self.table.is_some()
            && !self.is_distinct
            && self.grouping.is_none()
            && self.limit.is_none()
            && self.offset.is_none()
            && !self.is_windowed
    }

    // ── mutators ──

    pub fn add_to_predicate(
        &mut self,
        predicate: SqlExpr,
        ids: &mut TableIds,
    ) -> Result<(), QueryError> {
        let predicate = self.admit(Clause::Predicate, predicate, ids)?;
        self.predicate = Some(match self.predicate.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        Ok(())
    }

    /// Replace the ordering (`OrderBy`).
    pub fn set_order_by(
        &mut self,
        ordering: Ordering,
        ids: &mut TableIds,
    ) -> Result<(), QueryError> {
        let expr = self.admit(Clause::OrderBy, ordering.expr, ids)?;
        self.order_by = vec![Ordering {
            expr,
            descending: ordering.descending,
        }];
        Ok(())
    }

    /// Append a key to the ordering (`ThenBy`).
    pub fn add_to_order_by(
        &mut self,
        ordering: Ordering,
        ids: &mut TableIds,
    ) -> Result<(), QueryError> {
        let expr = self.admit(Clause::OrderBy, ordering.expr, ids)?;
        self.order_by.push(Ordering {
            expr,
            descending: ordering.descending,
        });
        Ok(())
    }

    /// Flip every ordering key. Returns false when there is no ordering
    /// to reverse.
    pub fn reverse_order(&mut self) -> bool {
        if self.order_by.is_empty() {
            return false;
        }
        for ordering in &mut self.order_by {
            ordering.descending = !ordering.descending;
        }
        true
    }

    pub fn update_limit(&mut self, limit: SqlExpr, ids: &mut TableIds) -> Result<(), QueryError> {
        let limit = self.admit(Clause::Limit, limit, ids)?;
        self.limit = Some(limit);
        Ok(())
    }

    pub fn update_offset(&mut self, offset: SqlExpr, ids: &mut TableIds) -> Result<(), QueryError> {
        let offset = self.admit(Clause::Offset, offset, ids)?;
        self.offset = Some(offset);
        Ok(())
    }

    /// Make the select DISTINCT. Without a limit the ordering is dropped:
    /// SQL does not keep it through DISTINCT.
    pub fn as_distinct(&mut self, ids: &mut TableIds) -> Result<(), QueryError> {
        self.prepare(Clause::Distinct, ids)?;
        if self.limit.is_none() {
            self.order_by.clear();
        }
        self.is_distinct = true;
        Ok(())
    }

    pub fn update_grouping(
        &mut self,
        keys: Vec<SqlExpr>,
        ids: &mut TableIds,
    ) -> Result<(), QueryError> {
        let keys = if self.prepare(Clause::Grouping, ids)? {
            keys.into_iter()
                .map(|k| self.rebase(k))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            keys
        };
        self.order_by.clear();
        self.grouping = Some(keys);
        Ok(())
    }

    fn admit(
        &mut self,
        clause: Clause,
        sql: SqlExpr,
        ids: &mut TableIds,
    ) -> Result<SqlExpr, QueryError> {
        if self.prepare(clause, ids)? {
            self.rebase(sql)
        } else {
            Ok(sql)
        }
    }

    fn wrap(&mut self, ids: &mut TableIds) -> Result<(), QueryError> {
        let inner = std::mem::replace(
            self,
            SelectExpr::new(Projection::Server(Expr::Default(Type::bool())), None),
        );
        *self = inner.pushdown(ids)?;
        Ok(())
    }

    // ── pushdown ──

    /// Move this select into a subquery and return the select over it.
    ///
    /// Non-constant SQL leaves of the projection become columns of the
    /// subquery; identical leaves share a column. Ordering moves to the
    /// outer select, and stays on the inner one as well when a limit or
    /// offset depends on it.
    pub fn pushdown(mut self, ids: &mut TableIds) -> Result<SelectExpr, QueryError> {
        self.expand_groupings(ids)?;
        let sub = ids.next();
        let body = self.projection.flatten()?;
        let mut folder = LeafFolder::new(sub, false, true);
        let outer_body = folder.fold(body, &mut Vec::new())?;

        let limited = self.limit.is_some() || self.offset.is_some();
        let ordering = if limited {
            self.order_by.clone()
        } else {
            std::mem::take(&mut self.order_by)
        };
        let inner_distinct = self.is_distinct;
        self.projection = Projection::Server(folder.into_record());

        let mut outer = SelectExpr::new(
            Projection::Server(outer_body),
            Some(TableExpr::subquery(sub, self)),
        );
        for Ordering { expr, descending } in ordering {
            // A DISTINCT subquery cannot grow hidden columns.
            if let Some(expr) = outer.rebase_opt(expr, !inner_distinct)? {
                outer.order_by.push(Ordering { expr, descending });
            }
        }
        outer.rebase_projection()?;
        Ok(outer)
    }

    /// Split the projection into flat columns for a set-operator operand.
    /// Returns the operand (projecting a record of every leaf, constants
    /// included, no sharing) and the row shape over the set table `id`.
    pub fn into_set_operand(
        mut self,
        id: TableId,
        ids: &mut TableIds,
    ) -> Result<(SelectExpr, Expr), QueryError> {
        if !self.order_by.is_empty() || self.limit.is_some() || self.offset.is_some() {
            if self.limit.is_some() || self.offset.is_some() {
                self = self.pushdown(ids)?;
            }
            self.order_by.clear();
        }
        self.expand_groupings(ids)?;
        let body = self.projection.flatten()?;
        if body.any(&|e| matches!(e, Expr::Relational(_) | Expr::Grouping(_))) {
            return Err(QueryError::unsupported(
                "set operations over rows with nested collections",
            ));
        }
        let mut folder = LeafFolder::new(id, true, false);
        let shape = folder.fold(body, &mut Vec::new())?;
        self.projection = Projection::Server(folder.into_record());
        Ok((self, shape))
    }

    /// Turn pending group-by results in the projection into correlated
    /// groupings.
    pub fn expand_groupings(&mut self, ids: &mut TableIds) -> Result<(), QueryError> {
        let has_group = walk_has_group(&self.projection);
        if !has_group {
            return Ok(());
        }
        let projection = std::mem::replace(
            &mut self.projection,
            Projection::Server(Expr::Default(Type::bool())),
        );
        self.projection = projection.map_bodies(&mut |body| {
            body.transform_up(&mut |e| match e {
                Expr::GroupByResult(group) => Ok(Expr::Grouping(Box::new(group.into_grouping(ids)?))),
                other => Ok(other),
            })
        })?;
        Ok(())
    }

    // ── rebasing ──

    /// Rewrite `sql`, written against the tables of the pushed-down
    /// subquery, to read through it. Expressions the subquery does not
    /// project yet are added to it as hidden columns.
    pub fn rebase(&mut self, sql: SqlExpr) -> Result<SqlExpr, QueryError> {
        self.rebase_opt(sql, true)?
            .ok_or_else(|| QueryError::internal("rebase failed with hidden columns allowed"))
    }

    /// Like [`SelectExpr::rebase`]; when hidden columns are not allowed
    /// and one would be needed, returns `None`.
    pub fn rebase_opt(
        &mut self,
        mut sql: SqlExpr,
        allow_hidden: bool,
    ) -> Result<Option<SqlExpr>, QueryError> {
        let Some(TableExpr::Subquery { id, select, .. }) = &mut self.table else {
            return Ok(Some(sql));
        };
        let mut rebaser = Rebaser::new(*id, select, allow_hidden)?;
        walk::rewrite_sql(&mut rebaser, &mut sql)?;
        if rebaser.failed {
            return Ok(None);
        }
        select.push_columns(rebaser.hidden)?;
        Ok(Some(sql))
    }

    /// Rebase the IR nodes nested in the projection (correlated queries,
    /// groupings) after a pushdown.
    fn rebase_projection(&mut self) -> Result<(), QueryError> {
        let Some(TableExpr::Subquery { id, select, .. }) = &mut self.table else {
            return Ok(());
        };
        let mut rebaser = Rebaser::new(*id, select, true)?;
        walk::rewrite_projection(&mut rebaser, &mut self.projection)?;
        select.push_columns(rebaser.hidden)
    }

    /// Columns of a flat record projection, as produced by a pushdown.
    pub fn projected_columns(&self) -> Result<Vec<(String, SqlExpr)>, QueryError> {
        let Projection::Server(Expr::Record { fields, .. }) = &self.projection else {
            return Err(QueryError::internal("subquery projection is not a flat record"));
        };
        fields
            .iter()
            .map(|(name, e)| match e {
                Expr::Sql(sql) => Ok((name.clone(), sql.clone())),
                _ => Err(QueryError::internal("subquery column is not a SQL expression")),
            })
            .collect()
    }

    fn push_columns(&mut self, columns: Vec<(String, SqlExpr)>) -> Result<(), QueryError> {
        if columns.is_empty() {
            return Ok(());
        }
        let Projection::Server(Expr::Record { fields, .. }) = &mut self.projection else {
            return Err(QueryError::internal("subquery projection is not a flat record"));
        };
        fields.extend(columns.into_iter().map(|(n, sql)| (n, Expr::Sql(sql))));
        Ok(())
    }

    // ── inspection ──

    /// The select's output columns, named by their path in the row shape.
    pub fn columns(&self) -> Result<Vec<(String, SqlExpr)>, QueryError> {
        let body = self.projection.flatten()?;
        let mut out = Vec::new();
        let mut names = NameSet::new();
        let mut seen = HashSet::new();
        collect_columns(&body, &mut Vec::new(), &mut names, &mut seen, &mut out);
        Ok(out)
    }

    /// The projected SQL expression when the select projects exactly one.
    pub fn single_column(&self) -> Option<&SqlExpr> {
        match &self.projection {
            Projection::Server(Expr::Sql(sql)) => Some(sql),
            Projection::Server(Expr::Record { fields, .. }) if fields.len() == 1 => {
                match &fields[0].1 {
                    Expr::Sql(sql) => Some(sql),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Replace every table id defined in this select with a fresh one.
    /// Returns the mapping.
    pub fn uniquify(
        &mut self,
        ids: &mut TableIds,
    ) -> Result<HashMap<TableId, TableId>, QueryError> {
        let mut defined: Vec<TableId> = walk::defined_tables(self).into_iter().collect();
        defined.sort();
        let map: HashMap<TableId, TableId> = defined.into_iter().map(|t| (t, ids.next())).collect();
        walk::remap_tables(self, &map)?;
        Ok(map)
    }

    /// Ids of the aliased leaves of the FROM clause.
    pub fn leaf_ids(&self) -> Vec<TableId> {
        self.table.as_ref().map(TableExpr::leaf_ids).unwrap_or_default()
    }
}

fn walk_has_group(projection: &Projection) -> bool {
    match projection {
        Projection::Server(body) => body.any(&|e| matches!(e, Expr::GroupByResult(_))),
        Projection::Client { server, result } => {
            walk_has_group(server) || result.body.any(&|e| matches!(e, Expr::GroupByResult(_)))
        }
        Projection::Composite {
            outer,
            inner,
            result,
        } => {
            walk_has_group(outer)
                || walk_has_group(inner)
                || result.body.any(&|e| matches!(e, Expr::GroupByResult(_)))
        }
    }
}

fn collect_columns(
    expr: &Expr,
    path: &mut Vec<String>,
    names: &mut NameSet,
    seen: &mut HashSet<SqlExpr>,
    out: &mut Vec<(String, SqlExpr)>,
) {
    match expr {
        Expr::Sql(sql) => {
            if seen.insert(sql.clone()) {
                out.push((names.column_name(path), sql.clone()));
            }
        }
        Expr::Record { fields, .. } => {
            for (name, field) in fields {
                path.push(name.clone());
                collect_columns(field, path, names, seen, out);
                path.pop();
            }
        }
        Expr::Polymorphic(poly) => {
            for arm in &poly.arms {
                collect_columns(&arm.test, path, names, seen, out);
                collect_columns(&arm.shape, path, names, seen, out);
            }
        }
        Expr::Relational(_) | Expr::Grouping(_) | Expr::GroupByResult(_) => {}
        other => {
            for child in other.children() {
                collect_columns(child, path, names, seen, out);
            }
        }
    }
}

// ── Leaf folding ───────────────────────────────────────────────────────

/// Replaces SQL leaves of a row shape with columns of table `table`,
/// collecting the leaves as that table's projection.
struct LeafFolder {
    table: TableId,
    include_constants: bool,
    share: bool,
    names: NameSet,
    index: HashMap<SqlExpr, String>,
    columns: Vec<(String, SqlExpr)>,
}

impl LeafFolder {
    fn new(table: TableId, include_constants: bool, share: bool) -> Self {
        LeafFolder {
            table,
            include_constants,
            share,
            names: NameSet::new(),
            index: HashMap::new(),
            columns: Vec::new(),
        }
    }

    fn fold(&mut self, expr: Expr, path: &mut Vec<String>) -> Result<Expr, QueryError> {
        match expr {
            Expr::Sql(sql) => {
                let constant = matches!(sql, SqlExpr::Literal { .. } | SqlExpr::Parameter { .. });
                if constant && !self.include_constants {
                    return Ok(Expr::Sql(sql));
                }
                Ok(Expr::Sql(self.column_for(sql, path)))
            }
            Expr::Constant { value, ty } if self.include_constants => {
                match constant_literal(&value, &ty) {
                    Some(sql) => Ok(Expr::Sql(self.column_for(sql, path))),
                    None => Ok(Expr::Constant { value, ty }),
                }
            }
            Expr::Default(ty) if self.include_constants => {
                match constant_literal(&ty.default_value(), &ty) {
                    Some(sql) => Ok(Expr::Sql(self.column_for(sql, path))),
                    None => Ok(Expr::Default(ty)),
                }
            }
            Expr::Record { entity, fields } => {
                let mut folded = Vec::with_capacity(fields.len());
                for (name, field) in fields {
                    path.push(name.clone());
                    let field = self.fold(field, path);
                    path.pop();
                    folded.push((name, field?));
                }
                Ok(Expr::Record {
                    entity,
                    fields: folded,
                })
            }
            Expr::Polymorphic(mut poly) => {
                for arm in &mut poly.arms {
                    let test = std::mem::replace(&mut arm.test, Expr::Default(Type::bool()));
                    arm.test = self.fold(test, path)?;
                    let shape = std::mem::replace(&mut arm.shape, Expr::Default(Type::bool()));
                    arm.shape = self.fold(shape, path)?;
                }
                Ok(Expr::Polymorphic(poly))
            }
            e @ (Expr::Relational(_) | Expr::Grouping(_) | Expr::GroupByResult(_)) => Ok(e),
            other => other.map_children(&mut |child| self.fold(child, path)),
        }
    }

    fn column_for(&mut self, sql: SqlExpr, path: &[String]) -> SqlExpr {
        let existing = if self.share { self.index.get(&sql).cloned() } else { None };
        let name = match existing {
            Some(name) => name,
            None => {
                let name = self.names.column_name(path);
                if self.share {
                    self.index.insert(sql.clone(), name.clone());
                }
                self.columns.push((name.clone(), sql.clone()));
                name
            }
        };
        SqlExpr::Column {
            table: self.table,
            name,
            ty: sql.scalar_type(),
            nullable: sql.is_nullable(),
        }
    }

    fn into_record(self) -> Expr {
        Expr::Record {
            entity: None,
            fields: self
                .columns
                .into_iter()
                .map(|(n, sql)| (n, Expr::Sql(sql)))
                .collect(),
        }
    }
}

/// A host constant as a typed SQL literal; `None` for non-scalar values.
fn constant_literal(value: &Value, ty: &Type) -> Option<SqlExpr> {
    let scalar = ty.as_scalar().or_else(|| value.scalar_type())?;
    match value {
        Value::List(_) | Value::Record(_) | Value::Grouping { .. } => None,
        v => Some(SqlExpr::Literal {
            value: v.clone(),
            ty: scalar,
        }),
    }
}

// ── Rebasing ───────────────────────────────────────────────────────────

struct Rebaser {
    table: TableId,
    /// Projected inner expression -> column name.
    projected: HashMap<SqlExpr, String>,
    /// Tables only visible inside the subquery.
    inner_tables: HashSet<TableId>,
    grouped: bool,
    allow_hidden: bool,
    names: NameSet,
    hidden: Vec<(String, SqlExpr)>,
    failed: bool,
}

impl Rebaser {
    fn new(table: TableId, inner: &SelectExpr, allow_hidden: bool) -> Result<Self, QueryError> {
        let mut names = NameSet::new();
        let mut projected = HashMap::new();
        for (name, sql) in inner.projected_columns()? {
            names.reserve(&name);
            projected.entry(sql).or_insert(name);
        }
        Ok(Rebaser {
            table,
            projected,
            inner_tables: walk::defined_tables(inner),
            grouped: inner.grouping.is_some(),
            allow_hidden,
            names,
            hidden: Vec::new(),
            failed: false,
        })
    }

    fn column(&self, name: String, sql: &SqlExpr) -> SqlExpr {
        SqlExpr::Column {
            table: self.table,
            name,
            ty: sql.scalar_type(),
            nullable: sql.is_nullable(),
        }
    }
}

impl IrRewriter for Rebaser {
    fn rewrite_sql(&mut self, sql: &SqlExpr) -> Option<SqlExpr> {
        if let Some(name) = self.projected.get(sql) {
            return Some(self.column(name.clone(), sql));
        }
        let base = match sql {
            SqlExpr::Column { table, name, .. } if self.inner_tables.contains(table) => {
                name.clone()
            }
            SqlExpr::Aggregate { func, .. } if self.grouped => func.name().to_ascii_lowercase(),
            _ => return None,
        };
        if !self.allow_hidden {
            self.failed = true;
            return None;
        }
        let name = self.names.unique(&base);
        self.projected.insert(sql.clone(), name.clone());
        self.hidden.push((name.clone(), sql.clone()));
        Some(self.column(name, sql))
    }
}
