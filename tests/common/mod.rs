//! Shared test helpers for integration tests.
//!
//! Every test runs against the same small entity model and, where rows
//! are needed, an in-memory connection with queued result sets.

#![allow(dead_code)]

use std::sync::OnceLock;

use relq::value::ScalarType;
use relq::{CompilerConfig, DescriptorSet, EntityDescriptor, Expr, QueryEngine};

/// Departments and employees, customers and orders.
pub fn descriptors() -> DescriptorSet {
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
}

pub fn model() -> &'static DescriptorSet {
    static MODEL: OnceLock<DescriptorSet> = OnceLock::new();
    MODEL.get_or_init(descriptors)
}

/// `e.name` against the shared model.
pub fn m(e: Expr, name: &str) -> Expr {
    e.member(name, model())
        .unwrap_or_else(|err| panic!("member {name}: {err}"))
}

pub fn engine() -> QueryEngine {
    engine_with(CompilerConfig::default())
}

pub fn engine_with(config: CompilerConfig) -> QueryEngine {
    init_tracing();
    QueryEngine::new(descriptors(), config)
}

/// Route `tracing` output to the test harness; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
