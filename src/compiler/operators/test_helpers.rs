//! Shared test helpers for operator and pass unit tests.
//!
//! Provides a sample entity model, a standalone `ComposeContext` runner
//! and member-access shorthands. All helpers are `#[cfg(test)]` and never
//! touch a database.

use std::sync::OnceLock;

use crate::compiler::compose::ComposeContext;
use crate::compiler::passes::Pipeline;
use crate::config::CompilerConfig;
use crate::descriptor::{DescriptorSet, EntityDescriptor};
use crate::error::QueryError;
use crate::expr::{Expr, Query};
use crate::ir::{Projection, RelationalQuery, SqlExpr};
use crate::value::ScalarType;

// ── Model ───────────────────────────────────────────────────────────────

/// Build the sample model: departments and employees, customers and
/// orders, and a discriminated `Person` hierarchy.
pub fn sample_descriptors() -> DescriptorSet {
    DescriptorSet::new()
        .with(
            EntityDescriptor::new("Department", "Departments")
                .column("Id", ScalarType::Int32)
                .nullable_column("Name", ScalarType::String)
                .key(&["Id"])
                .collection("Employees", "Employee", &["DepartmentId"]),
        )
        .with(
            EntityDescriptor::new("Employee", "Employees")
                .column("Id", ScalarType::Int32)
                .nullable_column("Name", ScalarType::String)
                .column("Age", ScalarType::Int32)
                .column("Salary", ScalarType::Float64)
                .nullable_column("DepartmentId", ScalarType::Int32)
                .nullable_column("ManagerId", ScalarType::Int32)
                .column("Active", ScalarType::Bool)
                .column("HiredAt", ScalarType::DateTime)
                .key(&["Id"])
                .reference("Department", "Department", &["DepartmentId"])
                .reference("Manager", "Employee", &["ManagerId"]),
        )
        .with(
            EntityDescriptor::new("Customer", "Customers")
                .column("Id", ScalarType::Int32)
                .nullable_column("Name", ScalarType::String)
                .nullable_column("City", ScalarType::String)
                .key(&["Id"])
                .collection("Orders", "Order", &["CustomerId"]),
        )
        .with(
            EntityDescriptor::new("Order", "Orders")
                .column("Id", ScalarType::Int32)
                .column("CustomerId", ScalarType::Int32)
                .column("Total", ScalarType::Float64)
                .column("Status", ScalarType::Int32)
                .column("PlacedAt", ScalarType::DateTime)
                .nullable_column("Note", ScalarType::String)
                .key(&["Id"])
                .reference("Customer", "Customer", &["CustomerId"]),
        )
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
        .with(
            EntityDescriptor::new("Teacher", "People")
                .derives("Person")
                .nullable_column("Subject", ScalarType::String)
                .discriminator_value("Teacher"),
        )
}

/// The sample model, built once.
pub fn model() -> &'static DescriptorSet {
    static MODEL: OnceLock<DescriptorSet> = OnceLock::new();
    MODEL.get_or_init(sample_descriptors)
}

/// `e.name` resolved against the sample model.
pub fn m(e: Expr, name: &str) -> Expr {
    e.member(name, model())
        .unwrap_or_else(|err| panic!("member {name}: {err}"))
}

// ── ComposeContext runners ──────────────────────────────────────────────

/// Run `f` in a fresh context with the default config; panics on error.
pub fn with_ctx<T>(f: impl FnOnce(&mut ComposeContext<'_>) -> Result<T, QueryError>) -> T {
    with_config(CompilerConfig::default(), f)
}

/// Run `f` in a fresh context with `config`; panics on error.
pub fn with_config<T>(
    config: CompilerConfig,
    f: impl FnOnce(&mut ComposeContext<'_>) -> Result<T, QueryError>,
) -> T {
    let pipeline = Pipeline::standard();
    let mut ctx = ComposeContext::new(model(), &config, &pipeline);
    match f(&mut ctx) {
        Ok(value) => value,
        Err(err) => panic!("composition failed: {err}"),
    }
}

/// Run `f` expecting it to fail; returns the error.
pub fn with_ctx_err<T: std::fmt::Debug>(
    f: impl FnOnce(&mut ComposeContext<'_>) -> Result<T, QueryError>,
) -> QueryError {
    with_config_err(CompilerConfig::default(), f)
}

pub fn with_config_err<T: std::fmt::Debug>(
    config: CompilerConfig,
    f: impl FnOnce(&mut ComposeContext<'_>) -> Result<T, QueryError>,
) -> QueryError {
    let pipeline = Pipeline::standard();
    let mut ctx = ComposeContext::new(model(), &config, &pipeline);
    match f(&mut ctx) {
        Ok(value) => panic!("expected an error, got {value:?}"),
        Err(err) => err,
    }
}

/// Lower a builder query in `ctx`.
pub fn lower(ctx: &mut ComposeContext<'_>, query: Query) -> Result<RelationalQuery, QueryError> {
    ctx.lower_source(query.expr())
}

/// Compose a complete query with the default config.
pub fn compose(expr: impl Into<Expr>) -> RelationalQuery {
    let expr = expr.into();
    with_ctx(|ctx| ctx.compose(&expr))
}

// ── Assertions ──────────────────────────────────────────────────────────

/// The server-side SQL body of a projection; panics when it is not one.
pub fn server_sql(projection: &Projection) -> &SqlExpr {
    match projection {
        Projection::Server(Expr::Sql(sql)) => sql,
        other => panic!("expected a single SQL column, got {other:?}"),
    }
}

/// Names of the fields of a record-shaped server projection.
pub fn field_names(projection: &Projection) -> Vec<String> {
    match projection {
        Projection::Server(Expr::Record { fields, .. }) => {
            fields.iter().map(|(n, _)| n.clone()).collect()
        }
        other => panic!("expected a record projection, got {other:?}"),
    }
}
