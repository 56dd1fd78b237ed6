//! Generic traversal over the relational IR.
//!
//! [`IrRewriter`] rewrites in place: scalars top-down (a replacement stops
//! descent) and table ids at their defining positions. [`IrVisitor`] is the
//! read-only counterpart. Both reach every node of a select graph,
//! including projection bodies, nested relational queries and subqueries
//! inside scalar expressions.

use std::collections::{HashMap, HashSet};

use crate::error::QueryError;
use crate::expr::Expr;
use crate::ir::{Projection, SelectExpr, SqlExpr, TableExpr, TableId};
use crate::value::Type;

pub trait IrRewriter {
    /// Called top-down on every scalar. `Some` replaces the node and
    /// stops descent into it.
    fn rewrite_sql(&mut self, _sql: &SqlExpr) -> Option<SqlExpr> {
        None
    }

    /// Called on every table id where the table is defined.
    fn rewrite_table_id(&mut self, id: TableId) -> TableId {
        id
    }
}

pub trait IrVisitor {
    fn visit_sql(&mut self, _sql: &SqlExpr) {}

    fn visit_table(&mut self, _table: &TableExpr) {}
}

// ── Rewriting ──────────────────────────────────────────────────────────

pub fn rewrite_select<R: IrRewriter + ?Sized>(
    r: &mut R,
    select: &mut SelectExpr,
) -> Result<(), QueryError> {
    if let Some(table) = &mut select.table {
        rewrite_table(r, table)?;
    }
    rewrite_projection(r, &mut select.projection)?;
    if let Some(p) = &mut select.predicate {
        rewrite_sql(r, p)?;
    }
    for ordering in &mut select.order_by {
        rewrite_sql(r, &mut ordering.expr)?;
    }
    if let Some(o) = &mut select.offset {
        rewrite_sql(r, o)?;
    }
    if let Some(l) = &mut select.limit {
        rewrite_sql(r, l)?;
    }
    if let Some(keys) = &mut select.grouping {
        for key in keys {
            rewrite_sql(r, key)?;
        }
    }
    Ok(())
}

pub fn rewrite_table<R: IrRewriter + ?Sized>(
    r: &mut R,
    table: &mut TableExpr,
) -> Result<(), QueryError> {
    match table {
        TableExpr::Base { id, .. } => *id = r.rewrite_table_id(*id),
        TableExpr::Subquery { id, select, .. } => {
            *id = r.rewrite_table_id(*id);
            rewrite_select(r, select)?;
        }
        TableExpr::SetOperator {
            id, left, right, ..
        } => {
            *id = r.rewrite_table_id(*id);
            rewrite_select(r, left)?;
            rewrite_select(r, right)?;
        }
        TableExpr::Join {
            outer,
            inner,
            predicate,
            ..
        } => {
            rewrite_table(r, outer)?;
            rewrite_table(r, inner)?;
            if let Some(p) = predicate {
                rewrite_sql(r, p)?;
            }
        }
    }
    Ok(())
}

pub fn rewrite_sql<R: IrRewriter + ?Sized>(r: &mut R, sql: &mut SqlExpr) -> Result<(), QueryError> {
    if let Some(replacement) = r.rewrite_sql(sql) {
        *sql = replacement;
        return Ok(());
    }
    for sub in sql.subqueries_mut() {
        rewrite_select(r, sub)?;
    }
    for child in sql.children_mut() {
        rewrite_sql(r, child)?;
    }
    Ok(())
}

pub fn rewrite_projection<R: IrRewriter + ?Sized>(
    r: &mut R,
    projection: &mut Projection,
) -> Result<(), QueryError> {
    match projection {
        Projection::Server(body) => rewrite_expr(r, body),
        Projection::Client { server, result } => {
            rewrite_projection(r, server)?;
            rewrite_expr(r, &mut result.body)
        }
        Projection::Composite {
            outer,
            inner,
            result,
        } => {
            rewrite_projection(r, outer)?;
            rewrite_projection(r, inner)?;
            rewrite_expr(r, &mut result.body)
        }
    }
}

/// Rewrite the IR reachable from a host expression.
pub fn rewrite_expr<R: IrRewriter + ?Sized>(r: &mut R, expr: &mut Expr) -> Result<(), QueryError> {
    match expr {
        Expr::Sql(sql) => rewrite_sql(r, sql),
        Expr::Relational(query) => rewrite_select(r, &mut query.select),
        Expr::Polymorphic(poly) => {
            for arm in &mut poly.arms {
                rewrite_expr(r, &mut arm.test)?;
                rewrite_expr(r, &mut arm.shape)?;
            }
            Ok(())
        }
        Expr::GroupByResult(group) => {
            rewrite_select(r, &mut group.select)?;
            rewrite_expr(r, &mut group.key)?;
            rewrite_expr(r, &mut group.element)
        }
        Expr::Grouping(group) => {
            rewrite_expr(r, &mut group.key)?;
            rewrite_select(r, &mut group.elements.select)
        }
        _ => {
            let taken = std::mem::replace(expr, Expr::Default(Type::bool()));
            *expr = taken.map_children(&mut |mut child| {
                rewrite_expr(r, &mut child)?;
                Ok(child)
            })?;
            Ok(())
        }
    }
}

// ── Visiting ───────────────────────────────────────────────────────────

pub fn visit_select<V: IrVisitor + ?Sized>(v: &mut V, select: &SelectExpr) {
    if let Some(table) = &select.table {
        visit_table(v, table);
    }
    visit_projection(v, &select.projection);
    let scalars = select
        .predicate
        .iter()
        .chain(select.order_by.iter().map(|o| &o.expr))
        .chain(select.offset.iter())
        .chain(select.limit.iter())
        .chain(select.grouping.iter().flatten());
    for sql in scalars {
        visit_sql(v, sql);
    }
}

pub fn visit_table<V: IrVisitor + ?Sized>(v: &mut V, table: &TableExpr) {
    v.visit_table(table);
    match table {
        TableExpr::Base { .. } => {}
        TableExpr::Subquery { select, .. } => visit_select(v, select),
        TableExpr::SetOperator { left, right, .. } => {
            visit_select(v, left);
            visit_select(v, right);
        }
        TableExpr::Join {
            outer,
            inner,
            predicate,
            ..
        } => {
            visit_table(v, outer);
            visit_table(v, inner);
            if let Some(p) = predicate {
                visit_sql(v, p);
            }
        }
    }
}

pub fn visit_sql<V: IrVisitor + ?Sized>(v: &mut V, sql: &SqlExpr) {
    v.visit_sql(sql);
    for sub in sql.subqueries() {
        visit_select(v, sub);
    }
    for child in sql.children() {
        visit_sql(v, child);
    }
}

pub fn visit_projection<V: IrVisitor + ?Sized>(v: &mut V, projection: &Projection) {
    match projection {
        Projection::Server(body) => visit_expr(v, body),
        Projection::Client { server, result } => {
            visit_projection(v, server);
            visit_expr(v, &result.body);
        }
        Projection::Composite {
            outer,
            inner,
            result,
        } => {
            visit_projection(v, outer);
            visit_projection(v, inner);
            visit_expr(v, &result.body);
        }
    }
}

pub fn visit_expr<V: IrVisitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Sql(sql) => visit_sql(v, sql),
        Expr::Relational(query) => visit_select(v, &query.select),
        Expr::Polymorphic(poly) => {
            for arm in &poly.arms {
                visit_expr(v, &arm.test);
                visit_expr(v, &arm.shape);
            }
        }
        Expr::GroupByResult(group) => {
            visit_select(v, &group.select);
            visit_expr(v, &group.key);
            visit_expr(v, &group.element);
        }
        Expr::Grouping(group) => {
            visit_expr(v, &group.key);
            visit_select(v, &group.elements.select);
        }
        other => {
            for child in other.children() {
                visit_expr(v, child);
            }
        }
    }
}

// ── Table bookkeeping ──────────────────────────────────────────────────

#[derive(Default)]
struct TableCollector {
    defined: HashSet<TableId>,
    referenced: HashSet<TableId>,
}

impl IrVisitor for TableCollector {
    fn visit_sql(&mut self, sql: &SqlExpr) {
        if let SqlExpr::Column { table, .. } = sql {
            self.referenced.insert(*table);
        }
    }

    fn visit_table(&mut self, table: &TableExpr) {
        if let Some(id) = table.id() {
            self.defined.insert(id);
        }
    }
}

/// Every table id defined anywhere inside `select`.
pub fn defined_tables(select: &SelectExpr) -> HashSet<TableId> {
    let mut c = TableCollector::default();
    visit_select(&mut c, select);
    c.defined
}

/// Tables referenced by `select` but defined outside it: the tables a
/// correlated subquery depends on.
pub fn free_tables(select: &SelectExpr) -> HashSet<TableId> {
    let mut c = TableCollector::default();
    visit_select(&mut c, select);
    c.referenced.difference(&c.defined).copied().collect()
}

/// Tables a table expression reads without defining them.
pub fn free_tables_of_table(table: &TableExpr) -> HashSet<TableId> {
    let mut c = TableCollector::default();
    visit_table(&mut c, table);
    c.referenced.difference(&c.defined).copied().collect()
}

/// Tables referenced by columns inside `sql` (subqueries included).
pub fn referenced_tables(sql: &SqlExpr) -> HashSet<TableId> {
    let mut c = TableCollector::default();
    visit_sql(&mut c, sql);
    c.referenced.difference(&c.defined).copied().collect()
}

/// Tables referenced by IR leaves of a host expression.
pub fn expr_tables(expr: &Expr) -> HashSet<TableId> {
    let mut c = TableCollector::default();
    visit_expr(&mut c, expr);
    c.referenced.difference(&c.defined).copied().collect()
}

struct Remapper<'a> {
    map: &'a HashMap<TableId, TableId>,
}

impl IrRewriter for Remapper<'_> {
    fn rewrite_sql(&mut self, sql: &SqlExpr) -> Option<SqlExpr> {
        match sql {
            SqlExpr::Column {
                table,
                name,
                ty,
                nullable,
            } => self.map.get(table).map(|t| SqlExpr::Column {
                table: *t,
                name: name.clone(),
                ty: *ty,
                nullable: *nullable,
            }),
            _ => None,
        }
    }

    fn rewrite_table_id(&mut self, id: TableId) -> TableId {
        self.map.get(&id).copied().unwrap_or(id)
    }
}

/// Retarget every definition of and reference to a table in `map`.
pub fn remap_tables(
    select: &mut SelectExpr,
    map: &HashMap<TableId, TableId>,
) -> Result<(), QueryError> {
    rewrite_select(&mut Remapper { map }, select)
}

pub fn remap_expr(expr: &mut Expr, map: &HashMap<TableId, TableId>) -> Result<(), QueryError> {
    rewrite_expr(&mut Remapper { map }, expr)
}

struct Nullify<'a> {
    tables: &'a HashSet<TableId>,
}

impl IrRewriter for Nullify<'_> {
    fn rewrite_sql(&mut self, sql: &SqlExpr) -> Option<SqlExpr> {
        match sql {
            SqlExpr::Column {
                table, name, ty, ..
            } if self.tables.contains(table) => Some(SqlExpr::Column {
                table: *table,
                name: name.clone(),
                ty: *ty,
                nullable: true,
            }),
            _ => None,
        }
    }
}

/// Mark columns of `tables` nullable, for rows read from the optional side
/// of an outer join.
pub fn make_nullable(expr: &mut Expr, tables: &HashSet<TableId>) -> Result<(), QueryError> {
    rewrite_expr(&mut Nullify { tables }, expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Ordering;
    use crate::value::ScalarType;

    fn col(t: u32, name: &str) -> SqlExpr {
        SqlExpr::Column {
            table: TableId(t),
            name: name.into(),
            ty: ScalarType::Int32,
            nullable: false,
        }
    }

    fn scan(t: u32) -> SelectExpr {
        SelectExpr::new(
            Projection::Server(Expr::Sql(col(t, "Id"))),
            Some(TableExpr::base(TableId(t), "Orders", None)),
        )
    }

    #[test]
    fn test_free_tables_of_correlated_select() {
        let mut s = scan(1);
        s.predicate = Some(SqlExpr::binary(
            crate::expr::BinaryOp::Eq,
            col(1, "CustomerId"),
            col(0, "Id"),
        ));
        assert_eq!(free_tables(&s), HashSet::from([TableId(0)]));
        assert_eq!(defined_tables(&s), HashSet::from([TableId(1)]));
    }

    #[test]
    fn test_remap_rewrites_definitions_and_references() {
        let mut s = scan(1);
        s.order_by.push(Ordering {
            expr: col(1, "Id"),
            descending: false,
        });
        remap_tables(&mut s, &HashMap::from([(TableId(1), TableId(7))])).unwrap();
        assert_eq!(s.table.as_ref().and_then(TableExpr::id), Some(TableId(7)));
        assert_eq!(s.order_by[0].expr, col(7, "Id"));
        assert_eq!(free_tables(&s), HashSet::new());
    }

    #[test]
    fn test_make_nullable() {
        let mut e = Expr::Sql(col(3, "Name"));
        make_nullable(&mut e, &HashSet::from([TableId(3)])).unwrap();
        let Expr::Sql(sql) = e else { panic!() };
        assert!(sql.is_nullable());
    }
}
