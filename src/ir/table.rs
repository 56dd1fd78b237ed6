//! Table expressions: base tables, subqueries, set operators and joins.

use crate::error::QueryError;
use crate::ir::{SelectExpr, SqlExpr, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOperator {
    UnionAll,
    Union,
    Except,
    Intersect,
}

impl SetOperator {
    pub fn keyword(self) -> &'static str {
        match self {
            SetOperator::UnionAll => "UNION ALL",
            SetOperator::Union => "UNION",
            SetOperator::Except => "EXCEPT",
            SetOperator::Intersect => "INTERSECT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Full,
    Cross,
    /// Correlated: the inner side may reference the outer side.
    CrossApply,
    OuterApply,
}

impl JoinKind {
    pub fn has_predicate(self) -> bool {
        matches!(self, JoinKind::Inner | JoinKind::Left | JoinKind::Full)
    }

    /// Whether rows of the inner side may be missing (and read as null).
    pub fn is_outer(self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full | JoinKind::OuterApply)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableExpr {
    Base {
        id: TableId,
        name: String,
        schema: Option<String>,
        /// Preferred alias; the emitter suffixes it on collision.
        alias: String,
    },
    Subquery {
        id: TableId,
        alias: String,
        select: Box<SelectExpr>,
    },
    SetOperator {
        id: TableId,
        alias: String,
        op: SetOperator,
        left: Box<SelectExpr>,
        right: Box<SelectExpr>,
    },
    Join {
        kind: JoinKind,
        outer: Box<TableExpr>,
        inner: Box<TableExpr>,
        predicate: Option<SqlExpr>,
    },
}

impl TableExpr {
    pub fn base(id: TableId, name: &str, schema: Option<&str>) -> TableExpr {
        TableExpr::Base {
            id,
            name: name.to_string(),
            schema: schema.map(str::to_string),
            alias: default_alias(name),
        }
    }

    pub fn subquery(id: TableId, select: SelectExpr) -> TableExpr {
        TableExpr::Subquery {
            id,
            alias: "t".to_string(),
            select: Box::new(select),
        }
    }

    /// Build a join, checking that predicate joins carry a predicate and
    /// cross/apply joins do not.
    pub fn join(
        kind: JoinKind,
        outer: TableExpr,
        inner: TableExpr,
        predicate: Option<SqlExpr>,
    ) -> Result<TableExpr, QueryError> {
        match (kind.has_predicate(), &predicate) {
            (true, None) => Err(QueryError::InvalidArgument(format!(
                "{kind:?} join requires a predicate"
            ))),
            (false, Some(_)) => Err(QueryError::InvalidArgument(format!(
                "{kind:?} join takes no predicate"
            ))),
            _ => Ok(TableExpr::Join {
                kind,
                outer: Box::new(outer),
                inner: Box::new(inner),
                predicate,
            }),
        }
    }

    /// Build a set-operator table. Both operands must project flat records
    /// with the same number of columns and the same scalar types, position
    /// by position.
    pub fn set_operation(
        id: TableId,
        op: SetOperator,
        left: SelectExpr,
        right: SelectExpr,
    ) -> Result<TableExpr, QueryError> {
        let l = left.projected_columns()?;
        let r = right.projected_columns()?;
        if l.len() != r.len() {
            return Err(QueryError::TypeMismatch(format!(
                "{} operands project {} and {} columns",
                op.keyword(),
                l.len(),
                r.len()
            )));
        }
        for ((ln, le), (_, re)) in l.iter().zip(r.iter()) {
            if le.scalar_type() != re.scalar_type() {
                return Err(QueryError::TypeMismatch(format!(
                    "{} column {ln}: {} vs {}",
                    op.keyword(),
                    le.scalar_type().name(),
                    re.scalar_type().name()
                )));
            }
        }
        Ok(TableExpr::SetOperator {
            id,
            alias: "u".to_string(),
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    /// Id of an aliased leaf; joins have none.
    pub fn id(&self) -> Option<TableId> {
        match self {
            TableExpr::Base { id, .. }
            | TableExpr::Subquery { id, .. }
            | TableExpr::SetOperator { id, .. } => Some(*id),
            TableExpr::Join { .. } => None,
        }
    }

    /// Aliased leaves, depth-first left to right.
    pub fn flatten(&self) -> Vec<&TableExpr> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a TableExpr>) {
        match self {
            TableExpr::Join { outer, inner, .. } => {
                outer.flatten_into(out);
                inner.flatten_into(out);
            }
            leaf => out.push(leaf),
        }
    }

    /// Ids of the aliased leaves of this table (not of nested subqueries).
    pub fn leaf_ids(&self) -> Vec<TableId> {
        self.flatten().into_iter().filter_map(TableExpr::id).collect()
    }
}

/// Lower-case first letter of the table name, the way hand-written SQL
/// aliases tables.
fn default_alias(name: &str) -> String {
    name.chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_lowercase().to_string())
        .unwrap_or_else(|| "t".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_is_left_to_right() {
        let a = TableExpr::base(TableId(0), "Orders", None);
        let b = TableExpr::base(TableId(1), "Customers", None);
        let c = TableExpr::base(TableId(2), "Employees", None);
        let ab = TableExpr::join(JoinKind::Cross, a, b, None).unwrap();
        let abc = TableExpr::join(JoinKind::Cross, ab, c, None).unwrap();
        assert_eq!(abc.leaf_ids(), vec![TableId(0), TableId(1), TableId(2)]);
    }

    #[test]
    fn test_join_requires_predicate() {
        let a = TableExpr::base(TableId(0), "Orders", None);
        let b = TableExpr::base(TableId(1), "Customers", None);
        let err = TableExpr::join(JoinKind::Inner, a, b, None).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgument(_)));
    }

    #[test]
    fn test_default_alias() {
        assert_eq!(default_alias("Orders"), "o");
        assert_eq!(default_alias("_x"), "x");
        assert_eq!(default_alias("123"), "t");
    }
}
