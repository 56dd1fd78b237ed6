//! relq: a relational query compiler.
//!
//! relq turns an object-shaped query (a chain of operators such as
//! filter, project, join, group, order and aggregate over typed entity
//! sequences) into a parameterized SQL command plus a materializer that
//! rebuilds result objects from rows. Compiled plans are cached by the
//! structural shape of the query, so queries that differ only in their
//! values share one plan.
//!
//! # Pipeline
//!
//! ```text
//! Expr ─► parameterize ─► plan cache ─► compose (passes ⇄ optimizers)
//!      ─► relational IR ─► SQL template + materializer ─► Connection
//! ```
//!
//! - [`expr`]: the host expression tree and the [`Query`] builder.
//! - [`ir`]: the relational IR (`SelectExpr`, `TableExpr`, `SqlExpr`, ...).
//! - [`compiler`]: the [`QueryEngine`], its plan cache and every stage.
//! - [`execute`]: the database boundary.
//!
//! # Example
//!
//! ```no_run
//! use relq::{CompilerConfig, DescriptorSet, EntityDescriptor, Expr, Query, QueryEngine};
//! use relq::value::ScalarType;
//!
//! let model = DescriptorSet::new().with(
//!     EntityDescriptor::new("Employee", "Employees")
//!         .column("Id", ScalarType::Int32)
//!         .column("Age", ScalarType::Int32)
//!         .key(&["Id"]),
//! );
//! let engine = QueryEngine::new(model, CompilerConfig::default());
//! let adults = Query::from("Employee")
//!     .filter("e", |e| {
//!         e.member("Age", engine.descriptors())
//!             .expect("known member")
//!             .ge(Expr::constant(18))
//!     })
//!     .into_expr();
//! let command = engine.to_sql(&adults).expect("compiles");
//! println!("{}", command.text);
//! ```

pub mod compiler;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod execute;
pub mod expr;
pub mod hash;
pub mod ir;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod value;

pub use compiler::emit::{Command, DbParameter};
pub use compiler::{CacheStats, CompiledQuery, QueryEngine};
pub use config::{CacheConfig, CompilerConfig, Dialect};
pub use descriptor::{DefaultTypeMappings, DescriptorSet, EntityDescriptor, TypeMappingProvider};
pub use error::{QueryError, QueryErrorKind};
pub use execute::{CommandExecutor, Connection, MemoryConnection, RowReader, Rows};
pub use expr::{Expr, Query};
pub use value::{Type, Value};
