//! Composition: lowering an operator tree to a relational query.
//!
//! Operators are lowered bottom-up. Each one takes the lowered query of
//! its source, binds its lambdas against the source's row shape
//! (the flattened projection, whose leaves are SQL nodes), and adds the
//! resulting SQL to the select, pushing the select down into a subquery
//! first whenever the new clause could not be added to it as it stands.
//!
//! A bound lambda body goes through [`ComposeContext::resolve`]: the
//! rewriting pipeline runs over it, nested operator calls are lowered to
//! nested queries or scalar subqueries, member accesses on rows are
//! folded (navigations become correlated queries), and finally every
//! translatable subtree that reads the row collapses into one SQL leaf.

use std::collections::HashSet;

use tracing::trace;

use crate::compiler::operators;
use crate::compiler::passes::Pipeline;
use crate::compiler::translate::{constant_predicate, is_server_shaped, lift, require_predicate, require_scalar};
use crate::config::{CompilerConfig, Dialect};
use crate::descriptor::{DescriptorSet, NavigationDescriptor, NavigationKind};
use crate::error::QueryError;
use crate::expr::{ElementKind, Expr, Lambda, QueryOp};
use crate::ir::projection::reduce_member;
use crate::ir::walk::make_nullable;
use crate::ir::{
    Clause, JoinKind, Projection, QueryKind, RelationalQuery, SelectExpr, SqlExpr, SqlFunction,
    TableExpr, TableId, TableIds,
};
use crate::value::Type;

/// Lambda parameter name used when a navigation is expanded into a query.
const NAVIGATION_PARAM: &str = "$nav";

/// State for lowering one query.
pub struct ComposeContext<'a> {
    pub descriptors: &'a DescriptorSet,
    pub config: &'a CompilerConfig,
    pipeline: &'a Pipeline,
    /// Table id allocator, shared by every nested query of the compilation.
    pub ids: TableIds,
    depth: usize,
}

impl<'a> ComposeContext<'a> {
    pub fn new(
        descriptors: &'a DescriptorSet,
        config: &'a CompilerConfig,
        pipeline: &'a Pipeline,
    ) -> Self {
        ComposeContext {
            descriptors,
            config,
            pipeline,
            ids: TableIds::new(),
            depth: 0,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    // ── Entry points ───────────────────────────────────────────────────

    /// Lower a complete query. The result carries no pending group-by
    /// results, at any nesting level.
    pub fn compose(&mut self, expr: &Expr) -> Result<RelationalQuery, QueryError> {
        let mut query = match expr {
            Expr::Query(op) => self.lower_op(op)?,
            Expr::CapturedQuery(inner) => return self.compose(inner),
            other => {
                return Err(QueryError::unsupported(format!(
                    "top-level expression of type {} is not a query operator",
                    other.ty().display_name()
                )));
            }
        };
        self.finalize(&mut query.select)?;
        Ok(query)
    }

    /// Lower one operator node.
    pub fn lower_op(&mut self, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
        trace!(operator = op.name(), depth = self.depth, "lowering operator");
        self.depth += 1;
        let result = match op {
            QueryOp::Source { .. } => operators::scan::lower_scan(self, op),
            QueryOp::Where { .. } => operators::filter::lower_filter(self, op),
            QueryOp::Select { .. } => operators::project::lower_project(self, op),
            QueryOp::SelectMany { .. } => operators::select_many::lower_select_many(self, op),
            QueryOp::Join { .. } => operators::join::lower_join(self, op),
            QueryOp::GroupJoin { .. } => operators::join::lower_group_join(self, op),
            QueryOp::GroupBy { .. } => operators::group_by::lower_group_by(self, op),
            QueryOp::OrderBy { .. } => operators::ordering::lower_order_by(self, op),
            QueryOp::Reverse { .. } => operators::ordering::lower_reverse(self, op),
            QueryOp::Skip { .. } => operators::paging::lower_skip(self, op),
            QueryOp::Take { .. } => operators::paging::lower_take(self, op),
            QueryOp::Distinct { .. } => operators::distinct::lower_distinct(self, op),
            QueryOp::DefaultIfEmpty { .. } => {
                operators::default_if_empty::lower_default_if_empty(self, op)
            }
            QueryOp::SetOp { .. } => operators::set_ops::lower_set_op(self, op),
            QueryOp::Zip { .. } => operators::zip::lower_zip(self, op),
            QueryOp::OfType { .. } => operators::of_type::lower_of_type(self, op),
            QueryOp::Aggregate { .. } => operators::aggregate::lower_aggregate(self, op),
            QueryOp::Any { .. } => operators::quantifier::lower_any(self, op),
            QueryOp::All { .. } => operators::quantifier::lower_all(self, op),
            QueryOp::Contains { .. } => operators::quantifier::lower_contains(self, op),
            QueryOp::Element { .. } => operators::element::lower_element(self, op),
        };
        self.depth -= 1;
        result
    }

    // ── Sources ────────────────────────────────────────────────────────

    /// Lower an operand that produces rows: an operator call, a nested
    /// query already embedded in a row, a group, or anything that
    /// resolves to one of those (a collection navigation).
    ///
    /// Embedded queries are copied with fresh table ids, so the same
    /// nested query can be consumed twice in one select.
    pub fn lower_source(&mut self, expr: &Expr) -> Result<RelationalQuery, QueryError> {
        match expr {
            Expr::Query(op) => self.lower_op(op),
            Expr::CapturedQuery(inner) => self.lower_source(inner),
            Expr::Relational(query) => {
                let mut query = (**query).clone();
                query.select.uniquify(&mut self.ids)?;
                Ok(query)
            }
            Expr::GroupByResult(group) => {
                let grouping = (**group).clone().into_grouping(&mut self.ids)?;
                Ok(*grouping.elements)
            }
            Expr::Grouping(group) => {
                let mut elements = (*group.elements).clone();
                elements.select.uniquify(&mut self.ids)?;
                Ok(elements)
            }
            other => {
                let resolved = self.resolve(other.clone())?;
                match resolved {
                    Expr::Query(_)
                    | Expr::Relational(_)
                    | Expr::GroupByResult(_)
                    | Expr::Grouping(_) => self.lower_source(&resolved),
                    _ => Err(QueryError::unsupported(format!(
                        "{} is not a queryable source",
                        other.ty().display_name()
                    ))),
                }
            }
        }
    }

    /// Lower an operand that must be a sequence, realizing a pending
    /// `DefaultIfEmpty`.
    pub fn sequence(&mut self, expr: &Expr) -> Result<RelationalQuery, QueryError> {
        let query = self.lower_source(expr)?;
        if !query.is_sequence() {
            return Err(QueryError::TypeMismatch(format!(
                "expected a sequence, got {}",
                query.ty().display_name()
            )));
        }
        if query.default_if_empty {
            return self.realize_default_if_empty(query);
        }
        Ok(query)
    }

    /// `SELECT ... FROM (SELECT 1 AS c) AS t LEFT JOIN (query) ON 1 = 1`:
    /// one row of nulls when the query is empty. Non-nullable scalar rows
    /// read their type's default instead of null.
    fn realize_default_if_empty(
        &mut self,
        query: RelationalQuery,
    ) -> Result<RelationalQuery, QueryError> {
        let row_type = query.row_type.clone();
        let pushed = query.select.pushdown(&mut self.ids)?;
        let SelectExpr {
            projection,
            table: Some(inner),
            order_by,
            ..
        } = pushed
        else {
            return Err(QueryError::internal("pushdown produced a table-less select"));
        };

        let anchor_id = self.ids.next();
        let anchor = SelectExpr::new(
            Projection::Server(Expr::record(vec![("c", Expr::Sql(SqlExpr::int(1)))])),
            None,
        );
        let optional: HashSet<TableId> = inner.leaf_ids().into_iter().collect();
        let table = TableExpr::join(
            JoinKind::Left,
            TableExpr::subquery(anchor_id, anchor),
            inner,
            Some(constant_predicate(true)),
        )?;

        let mut body = projection.flatten()?;
        make_nullable(&mut body, &optional)?;
        if let Type::Scalar {
            scalar,
            nullable: false,
        } = &row_type
            && let Expr::Sql(sql) = &body
        {
            let default = SqlExpr::Literal {
                value: row_type.default_value(),
                ty: *scalar,
            };
            body = Expr::Sql(SqlExpr::Function {
                func: SqlFunction::Coalesce,
                args: vec![sql.clone(), default],
                ty: *scalar,
                nullable: false,
            });
        }

        let mut select = SelectExpr::new(self.reclassify(body)?, Some(table));
        select.order_by = order_by;
        let mut realized = RelationalQuery::sequence(select)?;
        realized.row_type = row_type;
        Ok(realized)
    }

    // ── Binding ────────────────────────────────────────────────────────

    /// Apply `lambda` to row shapes and resolve the body.
    pub fn bind(&mut self, lambda: &Lambda, args: &[Expr]) -> Result<Expr, QueryError> {
        let body = lambda.apply(args)?;
        self.resolve(body)
    }

    /// Bind a lambda that must translate to a SQL predicate.
    pub fn bind_predicate(
        &mut self,
        lambda: &Lambda,
        args: &[Expr],
        context: &str,
    ) -> Result<SqlExpr, QueryError> {
        let bound = self.bind(lambda, args)?;
        require_predicate(&bound, context)
    }

    /// Bind a lambda that must translate to a SQL value.
    pub fn bind_value(
        &mut self,
        lambda: &Lambda,
        args: &[Expr],
        context: &str,
    ) -> Result<SqlExpr, QueryError> {
        let bound = self.bind(lambda, args)?;
        require_scalar(&bound, context)
    }

    /// Resolve a lambda-free operand (a count, an index, an item).
    pub fn resolve_value(&mut self, expr: &Expr, context: &str) -> Result<SqlExpr, QueryError> {
        let resolved = self.resolve(expr.clone())?;
        require_scalar(&resolved, context)
    }

    /// Rewrite, lower nested queries, fold members and lift translatable
    /// subtrees to SQL.
    pub fn resolve(&mut self, expr: Expr) -> Result<Expr, QueryError> {
        let pipeline = self.pipeline;
        let expr = pipeline.run(expr, self)?;
        let expr = self.resolve_nodes(expr)?;
        lift(expr)
    }

    fn resolve_nodes(&mut self, expr: Expr) -> Result<Expr, QueryError> {
        match expr {
            Expr::Query(op) => self.lower_nested(&op),
            Expr::CapturedQuery(inner) => self.resolve_nodes(*inner),
            Expr::Member { base, name, ty } => {
                let base = self.resolve_nodes(*base)?;
                self.resolve_member(base, name, ty)
            }
            e if e.is_relational() => Ok(e),
            other => other.map_children(&mut |child| self.resolve_nodes(child)),
        }
    }

    fn resolve_member(&mut self, base: Expr, name: String, ty: Type) -> Result<Expr, QueryError> {
        if let Some(reduced) = reduce_member(&base, &name, &ty) {
            return self.resolve_nodes(reduced);
        }
        if let Expr::Relational(query) = &base
            && !query.is_sequence()
        {
            return self.member_of_element((**query).clone(), &name, &ty);
        }
        if let Type::Entity(entity) = base.ty()
            && let Some(navigation) = self.descriptors.navigation(&entity, &name)
        {
            let navigation = navigation.clone();
            return self.expand_navigation(base, &entity, &navigation);
        }
        Ok(Expr::Member {
            base: Box::new(base),
            name,
            ty,
        })
    }

    /// Member of the single row of an element query: the member becomes
    /// the query's projection.
    fn member_of_element(
        &mut self,
        mut query: RelationalQuery,
        name: &str,
        ty: &Type,
    ) -> Result<Expr, QueryError> {
        query.select.prepare(Clause::Projection, &mut self.ids)?;
        let row = query.select.projection.flatten()?;
        let member = self.resolve(Expr::Member {
            base: Box::new(row),
            name: name.to_string(),
            ty: ty.clone(),
        })?;
        query.select.projection = self.reclassify(member)?;
        query.row_type = query.select.projection.ty()?;
        self.nested_expr(query)
    }

    /// A reference navigation becomes `Target.Where(t => t.Key == fk)
    /// .FirstOrDefault()`; a collection navigation becomes
    /// `Target.Where(t => t.Fk == key)`. Both are correlated to `base`.
    fn expand_navigation(
        &mut self,
        base: Expr,
        owner: &str,
        navigation: &NavigationDescriptor,
    ) -> Result<Expr, QueryError> {
        let descriptors = self.descriptors;
        let target_ty = Type::Entity(navigation.target.clone());
        let target = Expr::param(NAVIGATION_PARAM, target_ty.clone());
        let (target_keys, owner_keys) = match navigation.kind {
            NavigationKind::Reference => (
                descriptors.primary_key(&navigation.target)?.to_vec(),
                navigation.foreign_key.clone(),
            ),
            NavigationKind::Collection => (
                navigation.foreign_key.clone(),
                descriptors.primary_key(owner)?.to_vec(),
            ),
        };

        if target_keys.len() != owner_keys.len() {
            return Err(QueryError::InvalidArgument(format!(
                "navigation {}.{} pairs {} key columns with {}",
                owner,
                navigation.name,
                owner_keys.len(),
                target_keys.len()
            )));
        }
        let mut conditions = Vec::with_capacity(target_keys.len());
        for (t, o) in target_keys.iter().zip(&owner_keys) {
            let inner = target.clone().member(t, descriptors)?;
            let outer = base.clone().member(o, descriptors)?;
            conditions.push(inner.eq(outer));
        }
        let predicate = conditions.into_iter().reduce(Expr::and).ok_or_else(|| {
            QueryError::InvalidArgument(format!(
                "navigation {}.{} has no key",
                owner, navigation.name
            ))
        })?;

        let filtered = QueryOp::Where {
            source: Expr::query(QueryOp::Source {
                entity: navigation.target.clone(),
            }),
            predicate: Lambda::new(vec![(NAVIGATION_PARAM.to_string(), target_ty)], predicate),
        };
        trace!(navigation = %navigation.name, owner, "expanding navigation");
        let op = match navigation.kind {
            NavigationKind::Reference => QueryOp::Element {
                kind: ElementKind::FirstOrDefault,
                source: Expr::query(filtered),
                predicate: None,
                index: None,
            },
            NavigationKind::Collection => filtered,
        };
        self.lower_nested(&op)
    }

    // ── Nesting ────────────────────────────────────────────────────────

    /// Lower an operator call found inside a lambda body.
    pub fn lower_nested(&mut self, op: &QueryOp) -> Result<Expr, QueryError> {
        let query = self.lower_op(op)?;
        self.nested_expr(query)
    }

    /// Embed a lowered query in an enclosing expression. Single values in
    /// one column become scalar subqueries; predicates over no table
    /// (`EXISTS`) are inlined; everything else stays a nested query.
    pub fn nested_expr(&mut self, mut query: RelationalQuery) -> Result<Expr, QueryError> {
        match query.kind {
            QueryKind::Sequence => Ok(Expr::Relational(Box::new(query))),
            QueryKind::Scalar(_) => {
                if query.select.table.is_none()
                    && let Projection::Server(Expr::Sql(sql)) = &query.select.projection
                {
                    return Ok(Expr::Sql(sql.clone()));
                }
                if query.select.single_column().is_some() {
                    return Ok(Expr::Sql(SqlExpr::ScalarSubquery(Box::new(query.select))));
                }
                Ok(Expr::Relational(Box::new(query)))
            }
            QueryKind::Element(_) => {
                if query.row_type.is_scalar() && query.select.single_column().is_some() {
                    // Single asks for two rows to detect a second one;
                    // a scalar subquery takes the first.
                    query.select.limit = Some(SqlExpr::int(1));
                    return Ok(Expr::Sql(SqlExpr::ScalarSubquery(Box::new(query.select))));
                }
                Ok(Expr::Relational(Box::new(query)))
            }
        }
    }

    /// Split a resolved row body into server and client parts.
    pub fn reclassify(&self, body: Expr) -> Result<Projection, QueryError> {
        let complex = self.config.supports_complex_nested_queries;
        Projection::classify(body, &|e| is_server_shaped(e, complex))
    }

    /// Expand pending group-by results everywhere in `select`, nested
    /// queries included.
    pub fn finalize(&mut self, select: &mut SelectExpr) -> Result<(), QueryError> {
        select.expand_groupings(&mut self.ids)?;
        let projection = std::mem::replace(
            &mut select.projection,
            Projection::Server(Expr::Default(Type::bool())),
        );
        select.projection = projection.map_bodies(&mut |body| {
            body.transform_up(&mut |e| match e {
                Expr::Relational(mut query) => {
                    self.finalize(&mut query.select)?;
                    Ok(Expr::Relational(query))
                }
                Expr::Grouping(mut group) => {
                    self.finalize(&mut group.elements.select)?;
                    Ok(Expr::Grouping(group))
                }
                other => Ok(other),
            })
        })?;
        Ok(())
    }
}
