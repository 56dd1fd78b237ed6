//! Relational intermediate representation.
//!
//! A compiled query is a [`SelectExpr`] graph: tables ([`TableExpr`]),
//! scalar SQL ([`SqlExpr`]), projections ([`Projection`]) and the
//! composite nodes that live inside projections ([`PolymorphicExpr`],
//! [`GroupByResult`], [`GroupingExpr`], [`RelationalQuery`]).
//!
//! Tables are identified by [`TableId`] rather than by reference: column
//! nodes hold the id of the table they read, so retargeting every
//! reference after a table subtree is cloned is an id remap
//! ([`walk::remap_tables`]).

pub mod grouping;
pub mod polymorphic;
pub mod projection;
pub mod relational;
pub mod select;
pub mod sql;
pub mod table;
pub mod walk;

pub use grouping::{GroupByResult, GroupingExpr};
pub use polymorphic::{PolymorphicArm, PolymorphicExpr};
pub use projection::Projection;
pub use relational::{QueryKind, RelationalQuery};
pub use select::{Clause, Ordering, SelectExpr};
pub use sql::{DatePart, InSet, SqlAggregate, SqlExpr, SqlFunction, SqlUnaryOp, WindowFunc};
pub use table::{JoinKind, SetOperator, TableExpr};

use std::collections::HashSet;
use std::fmt;

/// Stable identity of an aliased table within one compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Allocator for [`TableId`]s. One per compilation.
#[derive(Debug, Default)]
pub struct TableIds {
    next: u32,
}

impl TableIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> TableId {
        let id = TableId(self.next);
        self.next += 1;
        id
    }
}

/// Deterministic unique-name allocator: the first use of a name keeps it,
/// later uses get a numeric suffix (`c`, `c0`, `c1`, ...).
#[derive(Debug, Default, Clone)]
pub struct NameSet {
    used: HashSet<String>,
}

impl NameSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unique(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 0usize;
        loop {
            let candidate = format!("{base}{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Mark `name` as taken.
    pub fn reserve(&mut self, name: &str) {
        self.used.insert(name.to_string());
    }

    /// Column name for a projection leaf reached through `path`.
    pub fn column_name(&mut self, path: &[String]) -> String {
        if path.is_empty() {
            self.unique("c")
        } else {
            self.unique(&path.join("_"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_ids_are_sequential() {
        let mut ids = TableIds::new();
        assert_eq!(ids.next(), TableId(0));
        assert_eq!(ids.next(), TableId(1));
    }

    #[test]
    fn test_name_set_suffixes() {
        let mut names = NameSet::new();
        assert_eq!(names.unique("c"), "c");
        assert_eq!(names.unique("c"), "c0");
        assert_eq!(names.unique("c"), "c1");
        assert_eq!(names.unique("e"), "e");
    }

    #[test]
    fn test_column_name_from_path() {
        let mut names = NameSet::new();
        assert_eq!(names.column_name(&[]), "c");
        assert_eq!(
            names.column_name(&["Customer".to_string(), "Name".to_string()]),
            "Customer_Name"
        );
    }
}
