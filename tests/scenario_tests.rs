//! End-to-end scenarios: operator tree in, SQL and materialized values out.
//!
//! Each test drives the public `QueryEngine` through its plan cache and an
//! in-memory connection, so both the emitted command text and the shape
//! of the materialized result are checked.

mod common;

use common::{engine, engine_with, m};
use relq::expr::Query;
use relq::value::{Type, Value};
use relq::{CompilerConfig, Dialect, Expr, MemoryConnection, QueryError};

fn names_older_than(age: Expr) -> Expr {
    Query::from("Employee")
        .filter("e", |e| m(e, "Age").gt(age))
        .select("e", |e| m(e, "Name"))
        .into_expr()
}

// ── Filter and project ─────────────────────────────────────────────────

#[test]
fn test_filter_project_is_one_flat_select() {
    let command = engine()
        .to_sql(&names_older_than(Expr::constant(18)))
        .unwrap();
    assert_eq!(
        command.text,
        "SELECT [e].[Name] FROM [Employees] AS [e] WHERE [e].[Age] > 18"
    );
    assert!(command.parameters.is_empty());
}

#[test]
fn test_captured_values_share_one_plan() {
    let engine = engine();
    let mut conn = MemoryConnection::new()
        .with_result(vec![vec![Value::from("Ann")]])
        .with_result(vec![vec![Value::from("Bob")], vec![Value::from("Cy")]]);

    let young = names_older_than(Expr::captured(18, Type::int32()));
    let old = names_older_than(Expr::captured(60, Type::int32()));
    assert_eq!(
        engine.execute(&mut conn, &young).unwrap(),
        Value::List(vec![Value::from("Ann")])
    );
    assert_eq!(
        engine.execute(&mut conn, &old).unwrap(),
        Value::List(vec![Value::from("Bob"), Value::from("Cy")])
    );

    assert_eq!(conn.executed[0].text, conn.executed[1].text);
    assert_eq!(conn.executed[0].parameters[0].value, Value::Int32(18));
    assert_eq!(conn.executed[1].parameters[0].value, Value::Int32(60));
    let stats = engine.stats();
    assert_eq!((stats.misses, stats.hits, stats.entries), (1, 1, 1));
}

#[test]
fn test_postgres_placeholders_are_cast() {
    let engine = engine_with(CompilerConfig::default().with_dialect(Dialect::Postgres));
    let command = engine
        .to_sql(&names_older_than(Expr::captured(30, Type::int32())))
        .unwrap();
    assert!(
        command.text.ends_with("WHERE \"e\".\"Age\" > CAST($1 AS integer)"),
        "{}",
        command.text
    );
}

// ── Grouping ───────────────────────────────────────────────────────────

#[test]
fn test_group_count_is_pushed_into_the_select() {
    let engine = engine();
    let counts = Query::from("Employee")
        .group_by("e", |e| m(e, "DepartmentId"))
        .select("g", |g| Query::new(g).count())
        .into_expr();

    let command = engine.to_sql(&counts).unwrap();
    assert!(command.text.starts_with("SELECT COUNT(*)"), "{}", command.text);
    assert!(
        command.text.ends_with("GROUP BY [e].[DepartmentId]"),
        "{}",
        command.text
    );
    assert!(!command.text.contains("(SELECT"), "{}", command.text);

    let mut conn = MemoryConnection::new()
        .with_result(vec![vec![Value::Int32(3)], vec![Value::Int32(2)]]);
    assert_eq!(
        engine.execute(&mut conn, &counts).unwrap(),
        Value::List(vec![Value::Int32(3), Value::Int32(2)])
    );
    assert_eq!(conn.executed.len(), 1);
}

#[test]
fn test_group_key_and_count_record() {
    let engine = engine();
    let summary = Query::from("Employee")
        .group_by("e", |e| m(e, "DepartmentId"))
        .select("g", |g| {
            Expr::record(vec![
                ("Department", m(g.clone(), "Key")),
                ("Headcount", Query::new(g).count()),
            ])
        })
        .into_expr();

    let mut conn = MemoryConnection::new().with_result(vec![
        vec![Value::Int32(1), Value::Int32(4)],
        vec![Value::Null, Value::Int32(2)],
    ]);
    let Value::List(rows) = engine.execute(&mut conn, &summary).unwrap() else {
        panic!("expected a list");
    };
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].field("Department").unwrap(), &Value::Int32(1));
    assert_eq!(rows[0].field("Headcount").unwrap(), &Value::Int32(4));
    assert_eq!(rows[1].field("Department").unwrap(), &Value::Null);
}

// ── Joins ──────────────────────────────────────────────────────────────

#[test]
fn test_navigation_key_matches_raw_foreign_key() {
    let engine = engine();
    let join = |through_navigation: bool| {
        Query::from("Order")
            .join(
                Query::from("Customer"),
                ("o", move |o: Expr| {
                    if through_navigation {
                        m(m(o, "Customer"), "Id")
                    } else {
                        m(o, "CustomerId")
                    }
                }),
                ("c", |c| m(c, "Id")),
                |o, c| Expr::record(vec![("Total", m(o, "Total")), ("Name", m(c, "Name"))]),
            )
            .into_expr()
    };
    let via_navigation = engine.to_sql(&join(true)).unwrap();
    let via_column = engine.to_sql(&join(false)).unwrap();
    assert_eq!(via_navigation.text, via_column.text);
    assert!(
        via_column.text.contains("ON [o].[CustomerId] = [c].[Id]"),
        "{}",
        via_column.text
    );
}

#[test]
fn test_self_join_aliases_do_not_collide() {
    let query = Query::from("Employee")
        .join(
            Query::from("Employee"),
            ("e", |e| m(e, "ManagerId")),
            ("x", |x| m(x, "Id")),
            |e, x| Expr::record(vec![("Name", m(e, "Name")), ("Boss", m(x, "Name"))]),
        )
        .into_expr();
    let command = engine().to_sql(&query).unwrap();
    assert!(
        command
            .text
            .contains("FROM [Employees] AS [e] INNER JOIN [Employees] AS [e0] ON"),
        "{}",
        command.text
    );
    assert!(command.text.contains("[e0].[Name]"), "{}", command.text);
}

// ── Set operations ─────────────────────────────────────────────────────

#[test]
fn test_concat_keeps_each_side_constants() {
    let engine = engine();
    let tagged = |entity: &str, alias: &str, tag: i32| {
        Query::from(entity).select(alias, move |x| {
            Expr::record(vec![("Id", m(x, "Id")), ("Tag", Expr::constant(tag))])
        })
    };
    let query = tagged("Employee", "e", 1)
        .concat(tagged("Order", "o", 2))
        .into_expr();

    let command = engine.to_sql(&query).unwrap();
    assert!(command.text.contains("UNION ALL"), "{}", command.text);
    assert!(command.text.contains(", 1 AS"), "{}", command.text);
    assert!(command.text.contains(", 2 AS"), "{}", command.text);

    let mut conn = MemoryConnection::new().with_result(vec![
        vec![Value::Int32(10), Value::Int32(1)],
        vec![Value::Int32(20), Value::Int32(2)],
    ]);
    let Value::List(rows) = engine.execute(&mut conn, &query).unwrap() else {
        panic!("expected a list");
    };
    assert_eq!(rows[0].field("Tag").unwrap(), &Value::Int32(1));
    assert_eq!(rows[1].field("Id").unwrap(), &Value::Int32(20));
    assert_eq!(rows[1].field("Tag").unwrap(), &Value::Int32(2));
}

// ── Nested collections ─────────────────────────────────────────────────

#[test]
fn test_nested_orders_run_once_per_customer() {
    let engine = engine();
    let query = Query::from("Customer")
        .select("c", |c| {
            Expr::record(vec![("Id", m(c.clone(), "Id")), ("Orders", m(c, "Orders"))])
        })
        .into_expr();
    let placed = chrono::NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap();
    let order = |id: i32, customer: i32, total: f64| {
        vec![
            Value::Int32(id),
            Value::Int32(customer),
            Value::Float64(total),
            Value::Int32(0),
            Value::DateTime(placed),
            Value::Null,
        ]
    };
    let mut conn = MemoryConnection::new()
        .with_result(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]])
        .with_result(vec![order(10, 1, 5.0), order(11, 1, 7.5)])
        .with_result(Vec::new());

    let Value::List(customers) = engine.execute(&mut conn, &query).unwrap() else {
        panic!("expected a list");
    };
    assert_eq!(customers.len(), 2);
    let first = customers[0].field("Orders").unwrap().as_list().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[1].field("Total").unwrap(), &Value::Float64(7.5));
    assert!(customers[1].field("Orders").unwrap().as_list().unwrap().is_empty());

    assert_eq!(conn.executed.len(), 3);
    assert_eq!(conn.executed[1].parameters[0].value, Value::Int32(1));
    assert_eq!(conn.executed[2].parameters[0].value, Value::Int32(2));
    assert_eq!(conn.pending(), 0);
}

#[test]
fn test_enumerate_is_lazy_over_nested_rows() {
    let engine = engine();
    let query = Query::from("Customer")
        .select("c", |c| {
            Expr::record(vec![("Id", m(c.clone(), "Id")), ("Orders", m(c, "Orders"))])
        })
        .into_expr();
    let mut conn = MemoryConnection::new()
        .with_result(vec![vec![Value::Int32(1)], vec![Value::Int32(2)]])
        .with_result(Vec::new());

    let mut rows = engine.enumerate(&mut conn, &query).unwrap();
    let first = rows.next().unwrap().unwrap();
    assert_eq!(first.field("Id").unwrap(), &Value::Int32(1));
    // The second customer's orders were never queued.
    assert!(matches!(rows.next(), Some(Err(QueryError::Database(_)))));
    assert!(rows.next().is_none());
}

// ── Terminal operators ─────────────────────────────────────────────────

#[test]
fn test_single_rejects_two_rows() {
    let query = Query::from("Employee")
        .select("e", |e| m(e, "Name"))
        .single();
    let mut conn = MemoryConnection::new()
        .with_result(vec![vec![Value::from("Ann")], vec![Value::from("Bob")]]);
    assert!(matches!(
        engine().execute(&mut conn, &query),
        Err(QueryError::MoreThanOneElement)
    ));
}

#[test]
fn test_first_or_default_on_empty_is_null() {
    let query = Query::from("Employee")
        .select("e", |e| m(e, "Name"))
        .first_or_default();
    let mut conn = MemoryConnection::new().with_result(Vec::new());
    assert_eq!(engine().execute(&mut conn, &query).unwrap(), Value::Null);
}

#[test]
fn test_max_over_no_rows_has_no_elements() {
    let query = Query::from("Employee").max("e", |e| m(e, "Age"));
    let mut conn = MemoryConnection::new().with_result(Vec::new());
    assert!(matches!(
        engine().execute(&mut conn, &query),
        Err(QueryError::NoElements)
    ));
}

#[test]
fn test_count_reads_the_scalar() {
    let query = Query::from("Employee")
        .count_where("e", |e| m(e, "Active"));
    let engine = engine();
    let command = engine.to_sql(&query).unwrap();
    assert!(command.text.starts_with("SELECT COUNT(*)"), "{}", command.text);
    assert!(command.text.ends_with("WHERE [e].[Active] = 1"), "{}", command.text);

    let mut conn = MemoryConnection::new().with_result(vec![vec![Value::Int64(5)]]);
    assert_eq!(engine.execute(&mut conn, &query).unwrap(), Value::Int32(5));
}

#[test]
fn test_unknown_entity_is_a_compile_error() {
    let engine = engine();
    let err = engine
        .to_sql(&Query::from("Invoice").into_expr())
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownEntity(ref name) if name == "Invoice"));
    assert!(err.is_compile_error());
    assert_eq!(engine.cache_len(), 0);
}
