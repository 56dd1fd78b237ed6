//! Query compilation engine.
//!
//! [`QueryEngine`] runs the whole pipeline for one operator tree:
//!
//! 1. **Parameterize** ([`parameterize`]): lift captured values and unsafe
//!    literals into numbered slots and inline captured sub-queries.
//! 2. **Look up** the structural hash of the parameterized tree in the
//!    plan cache. A hit is only trusted after the cached tree compares
//!    equal to the new one.
//! 3. **Compose** ([`compose`]): lower the operators bottom-up, running
//!    the rewriting [`passes`] over every bound lambda.
//! 4. **Emit and build** ([`emit`], [`materialize`]): render the command
//!    template and the row materializer.
//! 5. **Execute** against a [`Connection`], binding the slot values.
//!
//! Failed compilations are never cached.

pub mod compose;
pub mod emit;
pub mod eval;
pub mod materialize;
pub mod operators;
pub mod parameterize;
pub mod passes;
pub mod translate;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::compiler::compose::ComposeContext;
use crate::compiler::emit::{Command, CommandTemplate};
use crate::compiler::materialize::{
    Materializer, ReadContext, ReadValueStrategy, build_query, default_strategies, shape_result,
};
use crate::compiler::parameterize::{ParameterizedQuery, parameterize};
use crate::compiler::passes::Pipeline;
use crate::config::{CacheConfig, CompilerConfig};
use crate::descriptor::{DefaultTypeMappings, DescriptorSet, TypeMappingProvider};
use crate::error::QueryError;
use crate::execute::{CommandExecutor, Connection, RowMaterializer, Rows};
use crate::expr::Expr;
use crate::hash::format_key;
use crate::ir::QueryKind;
use crate::value::{Type, Value};

// ── Compiled plans ─────────────────────────────────────────────────────

/// Everything needed to run one query shape.
#[derive(Debug)]
pub struct CompiledQuery {
    pub key: u128,
    /// The parameterized tree the plan was compiled from.
    pub shape: Expr,
    pub template: CommandTemplate,
    pub materializer: Materializer,
    pub kind: QueryKind,
    pub default_if_empty: bool,
    pub row_type: Type,
    pub parameter_count: usize,
}

// ── Plan cache ─────────────────────────────────────────────────────────

/// Counters describing cache behaviour since the engine was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Lookups whose key matched a plan for a different tree.
    pub collisions: u64,
    pub entries: usize,
}

enum Lookup {
    Hit(Arc<CompiledQuery>),
    Miss,
    Collision,
}

/// Structural-hash keyed plan map behind one lock.
///
/// Concurrent misses on one key may compile twice; the last insert wins.
/// When an insert would exceed the capacity the map is cleared first.
pub struct PlanCache {
    config: CacheConfig,
    entries: Mutex<HashMap<u128, Arc<CompiledQuery>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    collisions: AtomicU64,
}

impl PlanCache {
    pub fn new(config: CacheConfig) -> Self {
        PlanCache {
            config,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            collisions: AtomicU64::new(0),
        }
    }

    fn lookup(&self, key: u128, shape: &Expr) -> Lookup {
        if !self.config.enabled {
            return Lookup::Miss;
        }
        let found = self.entries.lock().get(&key).cloned();
        match found {
            Some(plan) if plan.shape == *shape => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %format_key(key), "plan cache hit");
                Lookup::Hit(plan)
            }
            Some(_) => {
                self.collisions.fetch_add(1, Ordering::Relaxed);
                warn!(key = %format_key(key), "plan cache key collision; compiling uncached");
                Lookup::Collision
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %format_key(key), "plan cache miss");
                Lookup::Miss
            }
        }
    }

    fn insert(&self, plan: Arc<CompiledQuery>) {
        if !self.config.enabled || self.config.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() >= self.config.capacity && !entries.contains_key(&plan.key) {
            debug!(entries = entries.len(), "plan cache full; clearing");
            entries.clear();
        }
        entries.insert(plan.key, plan);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

/// Compiles, caches and executes queries over one descriptor set.
///
/// An engine is `Send + Sync`; compiled plans are immutable and shared.
pub struct QueryEngine {
    descriptors: DescriptorSet,
    config: CompilerConfig,
    pipeline: Pipeline,
    mappings: Arc<dyn TypeMappingProvider>,
    strategies: Vec<Arc<dyn ReadValueStrategy>>,
    cache: PlanCache,
}

impl QueryEngine {
    pub fn new(descriptors: DescriptorSet, config: CompilerConfig) -> Self {
        let cache = PlanCache::new(config.cache.clone());
        QueryEngine {
            descriptors,
            config,
            pipeline: Pipeline::standard(),
            mappings: Arc::new(DefaultTypeMappings),
            strategies: default_strategies(),
            cache,
        }
    }

    /// Replace the type mappings used for parameters and column reads.
    /// Clears the plan cache.
    pub fn with_type_mappings(mut self, mappings: Arc<dyn TypeMappingProvider>) -> Self {
        self.mappings = mappings;
        self.cache.clear();
        self
    }

    /// Register a read strategy ahead of the built-in ones. Clears the
    /// plan cache.
    pub fn with_read_strategy(mut self, strategy: Arc<dyn ReadValueStrategy>) -> Self {
        self.strategies.insert(0, strategy);
        self.cache.clear();
        self
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn descriptors(&self) -> &DescriptorSet {
        &self.descriptors
    }

    /// The compiled plan for `expr`, with the values for its parameters.
    pub fn prepare(&self, expr: &Expr) -> Result<(Arc<CompiledQuery>, Vec<Value>), QueryError> {
        let parameterized = parameterize(expr.clone(), &self.config)?;
        let key = parameterized.key();
        let cacheable = match self.cache.lookup(key, &parameterized.expr) {
            Lookup::Hit(plan) => return Ok((plan, parameterized.values)),
            Lookup::Miss => true,
            Lookup::Collision => false,
        };
        let plan = Arc::new(self.compile(key, &parameterized)?);
        if cacheable {
            self.cache.insert(Arc::clone(&plan));
        }
        Ok((plan, parameterized.values))
    }

    fn compile(
        &self,
        key: u128,
        parameterized: &ParameterizedQuery,
    ) -> Result<CompiledQuery, QueryError> {
        let mut ctx = ComposeContext::new(&self.descriptors, &self.config, &self.pipeline);
        let query = ctx.compose(&parameterized.expr)?;
        let built = build_query(
            &query,
            parameterized.values.len(),
            self.config.dialect,
            self.mappings.as_ref(),
            &self.strategies,
        )?;
        debug!(key = %format_key(key), kind = ?query.kind, "compiled query");
        Ok(CompiledQuery {
            key,
            shape: parameterized.expr.clone(),
            template: built.template,
            materializer: built.materializer,
            kind: query.kind,
            default_if_empty: query.default_if_empty,
            row_type: query.row_type,
            parameter_count: parameterized.values.len(),
        })
    }

    /// The command `expr` runs, with its parameters bound.
    pub fn to_sql(&self, expr: &Expr) -> Result<Command, QueryError> {
        let (plan, values) = self.prepare(expr)?;
        plan.template.instantiate(&values, self.mappings.as_ref())
    }

    /// Run `expr` and materialize its whole result: a list for sequences,
    /// one value for element and scalar queries.
    pub fn execute(&self, connection: &mut dyn Connection, expr: &Expr) -> Result<Value, QueryError> {
        let (plan, values) = self.prepare(expr)?;
        let command = plan.template.instantiate(&values, self.mappings.as_ref())?;
        match plan.kind {
            QueryKind::Sequence => self
                .rows(connection, plan, values, &command)?
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            QueryKind::Scalar(_) if matches!(plan.materializer, Materializer::Column { index: 0, .. }) => {
                let raw = CommandExecutor::new(&mut *connection).execute_scalar(&command)?;
                let mut ctx = ReadContext {
                    params: &values,
                    connection,
                    mappings: self.mappings.as_ref(),
                };
                let value = plan.materializer.read(&[raw], &mut ctx)?;
                shape_result(plan.kind, plan.default_if_empty, &plan.row_type, vec![value])
            }
            _ => CommandExecutor::new(&mut *connection).execute_complex(&command, |rows, connection| {
                let mut ctx = ReadContext {
                    params: &values,
                    connection,
                    mappings: self.mappings.as_ref(),
                };
                let items = rows
                    .iter()
                    .map(|row| plan.materializer.read(row, &mut ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                shape_result(plan.kind, plan.default_if_empty, &plan.row_type, items)
            }),
        }
    }

    /// Run a sequence query, materializing one row per advance.
    pub fn enumerate<'c>(
        &self,
        connection: &'c mut dyn Connection,
        expr: &Expr,
    ) -> Result<Rows<'c, Value>, QueryError> {
        let (plan, values) = self.prepare(expr)?;
        if plan.kind != QueryKind::Sequence {
            return Err(QueryError::InvalidArgument(format!(
                "only sequence queries can be enumerated; this one yields {}",
                plan.row_type.display_name()
            )));
        }
        let command = plan.template.instantiate(&values, self.mappings.as_ref())?;
        self.rows(connection, plan, values, &command)
    }

    fn rows<'c>(
        &self,
        connection: &'c mut dyn Connection,
        plan: Arc<CompiledQuery>,
        values: Vec<Value>,
        command: &Command,
    ) -> Result<Rows<'c, Value>, QueryError> {
        let empty_default = plan.default_if_empty.then(|| plan.row_type.default_value());
        let mappings = Arc::clone(&self.mappings);
        let materialize: RowMaterializer<'c, Value> = Box::new(move |row: &[Value], connection: &mut dyn Connection| {
            let mut ctx = ReadContext {
                params: &values,
                connection,
                mappings: mappings.as_ref(),
            };
            plan.materializer.read(row, &mut ctx)
        });
        let rows = CommandExecutor::new(connection).execute_enumerable(command, materialize)?;
        Ok(match empty_default {
            Some(value) => rows.with_empty_default(value),
            None => rows,
        })
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::{m, sample_descriptors};
    use crate::execute::MemoryConnection;
    use crate::expr::Query;
    use crate::value::Type;

    fn engine() -> QueryEngine {
        QueryEngine::new(sample_descriptors(), CompilerConfig::default())
    }

    fn older_than(age: i32) -> Expr {
        Query::from("Employee")
            .filter("e", |e| m(e, "Age").gt(Expr::captured(age, Type::int32())))
            .select("e", |e| m(e, "Name"))
            .into_expr()
    }

    #[test]
    fn test_same_shape_hits_the_cache() {
        let engine = engine();
        let (a, va) = engine.prepare(&older_than(30)).unwrap();
        let (b, vb) = engine.prepare(&older_than(40)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(va, vec![Value::Int32(30)]);
        assert_eq!(vb, vec![Value::Int32(40)]);
        let stats = engine.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_disabled_cache_always_compiles() {
        let engine = QueryEngine::new(
            sample_descriptors(),
            CompilerConfig::default().with_cache(false, 16),
        );
        let (a, _) = engine.prepare(&older_than(30)).unwrap();
        let (b, _) = engine.prepare(&older_than(30)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_capacity_clears_the_cache() {
        let engine = QueryEngine::new(
            sample_descriptors(),
            CompilerConfig::default().with_cache(true, 1),
        );
        engine.prepare(&older_than(30)).unwrap();
        engine
            .prepare(&Query::from("Customer").into_expr())
            .unwrap();
        assert_eq!(engine.cache_len(), 1);
    }

    #[test]
    fn test_collision_is_detected_and_not_cached() {
        let engine = engine();
        let (plan, _) = engine.prepare(&older_than(30)).unwrap();
        // Plant the plan under the key of a different query.
        let other = parameterize(Query::from("Customer").into_expr(), engine.config()).unwrap();
        engine.cache.entries.lock().insert(other.key(), Arc::clone(&plan));

        let (fresh, _) = engine.prepare(&Query::from("Customer").into_expr()).unwrap();
        assert!(!Arc::ptr_eq(&fresh, &plan));
        assert_eq!(engine.stats().collisions, 1);
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let engine = engine();
        let bad = Query::from("Nope").into_expr();
        assert!(engine.prepare(&bad).is_err());
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_to_sql_binds_parameters() {
        let command = engine().to_sql(&older_than(30)).unwrap();
        assert_eq!(
            command.text,
            "SELECT [e].[Name] FROM [Employees] AS [e] WHERE [e].[Age] > @p0"
        );
        assert_eq!(command.parameters[0].value, Value::Int32(30));
    }

    #[test]
    fn test_execute_sequence() {
        let mut conn = MemoryConnection::new()
            .with_result(vec![vec![Value::from("Ann")], vec![Value::Null]]);
        let value = engine().execute(&mut conn, &older_than(30)).unwrap();
        assert_eq!(value, Value::List(vec![Value::from("Ann"), Value::Null]));
    }

    #[test]
    fn test_execute_scalar_count() {
        let mut conn = MemoryConnection::new().with_result(vec![vec![Value::Int32(3)]]);
        let count = Query::from("Employee").count();
        assert_eq!(engine().execute(&mut conn, &count).unwrap(), Value::Int32(3));
    }

    #[test]
    fn test_execute_first_on_empty_fails() {
        let mut conn = MemoryConnection::new().with_result(Vec::new());
        let first = Query::from("Employee").first();
        assert!(matches!(
            engine().execute(&mut conn, &first),
            Err(QueryError::NoElements)
        ));
    }

    #[test]
    fn test_enumerate_rejects_scalars() {
        let mut conn = MemoryConnection::new();
        let count = Query::from("Employee").count();
        assert!(matches!(
            engine().enumerate(&mut conn, &count),
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(conn.executed.is_empty());
    }
}
