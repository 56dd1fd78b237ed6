//! Rewriting and optimizing passes over bound host expressions.
//!
//! A [`Pass`] is a pure tree-to-tree transform. The [`Pipeline`] applies
//! the rewriters in a fixed order and runs every optimizer before the
//! first rewriter and again after each one, so each rewriter sees the
//! normal form the optimizers establish. The order matters:
//!
//! 1. `Equals` calls become `==` before equality is normalized.
//! 2. Equality normalization (null on the right, record-wise equality,
//!    comparisons with boolean constants) runs before key equality, which
//!    expects entity comparisons in `a == b` form.
//! 3. Key equality reduces `nav.Key` to the foreign key before anything
//!    tries to expand a navigation.
//! 4. `list.Contains(x)` becomes the query form before the query form is
//!    turned into `IN`.
//! 5. Group aggregation runs last, over fully normalized selectors.

pub mod contains;
pub mod equality;
pub mod group_aggregation;
pub mod members;
pub mod optimize;

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::error::QueryError;
use crate::expr::Expr;
use crate::ir::projection::reduce_members;

/// One tree transform.
pub trait Pass: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, expr: Expr, ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError>;
}

/// Ordered rewriters interleaved with optimizers.
pub struct Pipeline {
    rewriters: Vec<Box<dyn Pass>>,
    optimizers: Vec<Box<dyn Pass>>,
}

impl Pipeline {
    pub fn new(rewriters: Vec<Box<dyn Pass>>, optimizers: Vec<Box<dyn Pass>>) -> Self {
        Pipeline {
            rewriters,
            optimizers,
        }
    }

    /// The standard pass order.
    pub fn standard() -> Self {
        Pipeline::new(
            vec![
                Box::new(equality::EqualsCallRewriter),
                Box::new(equality::EqualityNormalizer),
                Box::new(equality::KeyEqualityRewriter),
                Box::new(members::EnumFlagsRewriter),
                Box::new(members::MemberRewriter),
                Box::new(contains::ListContainsRewriter),
                Box::new(contains::ContainsToInRewriter),
                Box::new(group_aggregation::GroupAggregationRewriter),
            ],
            vec![
                Box::new(optimize::BooleanOptimizer),
                Box::new(optimize::NullDefaultOptimizer),
            ],
        )
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.rewriters
            .iter()
            .chain(self.optimizers.iter())
            .map(|p| p.name())
            .collect()
    }

    /// Run every pass over `expr` in order.
    pub fn run(&self, expr: Expr, ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        check_arity(&expr)?;
        let mut expr = self.optimize(reduce_members(expr)?, ctx)?;
        for rewriter in &self.rewriters {
            trace!(pass = rewriter.name(), "applying rewriter");
            expr = rewriter.apply(expr, ctx)?;
            expr = self.optimize(expr, ctx)?;
        }
        Ok(expr)
    }

    fn optimize(&self, mut expr: Expr, ctx: &mut ComposeContext<'_>) -> Result<Expr, QueryError> {
        for optimizer in &self.optimizers {
            expr = optimizer.apply(expr, ctx)?;
        }
        Ok(expr)
    }
}

/// Rejects method calls with the wrong number of arguments.
fn check_arity(expr: &Expr) -> Result<(), QueryError> {
    if let Expr::Call { method, args, .. } = expr {
        let arity = method.arity();
        if !arity.contains(&args.len()) {
            return Err(QueryError::InvalidArgument(format!(
                "{method:?} takes {} to {} arguments, got {}",
                arity.start(),
                arity.end(),
                args.len()
            )));
        }
    }
    expr.children().into_iter().try_for_each(check_arity)
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::standard()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("passes", &self.pass_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_order() {
        let names = Pipeline::standard().pass_names();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("equals-call") < pos("equality-normalizer"));
        assert!(pos("equality-normalizer") < pos("key-equality"));
        assert!(pos("list-contains") < pos("contains-to-in"));
        assert!(pos("contains-to-in") < pos("group-aggregation"));
    }
}
