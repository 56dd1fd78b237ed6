//! Compile-path benchmarks.
//!
//! Measures what a query costs on a cold plan cache against a warm one,
//! and the parameterize + hash step every execution pays. No database is
//! involved: commands are only built, never run.
//!
//! Run with: `cargo bench --bench compile_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use relq::compiler::parameterize::parameterize;
use relq::expr::Query;
use relq::value::{ScalarType, Type};
use relq::{CompilerConfig, DescriptorSet, EntityDescriptor, Expr, QueryEngine};

fn model() -> DescriptorSet {
    DescriptorSet::new()
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
                .key(&["Id"])
                .reference("Customer", "Customer", &["CustomerId"]),
        )
}

fn member(model: &DescriptorSet, e: Expr, name: &str) -> Expr {
    e.member(name, model)
        .unwrap_or_else(|err| panic!("member {name}: {err}"))
}

/// Queries of growing shape, each with one captured value.
fn queries(model: &DescriptorSet, wanted: &str) -> Vec<(&'static str, Expr)> {
    let city = || Expr::captured(wanted, Type::nullable(ScalarType::String));
    vec![
        (
            "filter",
            Query::from("Customer")
                .filter("c", |c| member(model, c, "City").eq(city()))
                .into_expr(),
        ),
        (
            "join",
            Query::from("Order")
                .join(
                    Query::from("Customer"),
                    ("o", |o| member(model, o, "CustomerId")),
                    ("c", |c| member(model, c, "Id")),
                    |o, c| {
                        Expr::record(vec![
                            ("Total", member(model, o, "Total")),
                            ("City", member(model, c, "City")),
                        ])
                    },
                )
                .filter("r", |r| member(model, r, "City").eq(city()))
                .into_expr(),
        ),
        (
            "group",
            Query::from("Order")
                .group_by("o", |o| member(model, o, "CustomerId"))
                .select("g", |g| {
                    Expr::record(vec![
                        ("Customer", member(model, g.clone(), "Key")),
                        ("Orders", Query::new(g).count()),
                    ])
                })
                .into_expr(),
        ),
        (
            "nested",
            Query::from("Customer")
                .filter("c", |c| member(model, c, "City").eq(city()))
                .select("c", |c| {
                    Expr::record(vec![
                        ("Name", member(model, c.clone(), "Name")),
                        ("Orders", member(model, c, "Orders")),
                    ])
                })
                .into_expr(),
        ),
    ]
}

// ── Cold vs warm plan cache ────────────────────────────────────────────

fn bench_compile(c: &mut Criterion) {
    let model = model();
    let cold = QueryEngine::new(model.clone(), CompilerConfig::default().with_cache(false, 1));
    let warm = QueryEngine::new(model.clone(), CompilerConfig::default());

    let mut group = c.benchmark_group("compile");
    for (name, query) in queries(&model, "Oslo") {
        group.bench_with_input(BenchmarkId::new("cold", name), &query, |b, query| {
            b.iter(|| cold.to_sql(black_box(query)));
        });
        warm.prepare(&query).expect("query compiles");
        group.bench_with_input(BenchmarkId::new("cached", name), &query, |b, query| {
            b.iter(|| warm.to_sql(black_box(query)));
        });
    }
    group.finish();
}

// ── Parameterize + structural hash ─────────────────────────────────────

fn bench_plan_key(c: &mut Criterion) {
    let model = model();
    let config = CompilerConfig::default();
    let mut group = c.benchmark_group("plan_key");
    for (name, query) in queries(&model, "Bergen") {
        group.bench_with_input(BenchmarkId::from_parameter(name), &query, |b, query| {
            b.iter(|| parameterize(black_box(query.clone()), &config).map(|p| p.key()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_plan_key);
criterion_main!(benches);
