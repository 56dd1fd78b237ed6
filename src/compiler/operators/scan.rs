//! Entity scans.
//!
//! `Source(E)` reads E's table. The row is an entity record whose fields
//! are the mapped columns. For a type in a discriminated hierarchy the
//! row is polymorphic: one arm per concrete type assignable to E, most
//! derived first, each tested by its discriminator value. Scanning a
//! derived type also filters the table to rows of that type.

use tracing::trace;

use crate::compiler::compose::ComposeContext;
use crate::descriptor::{ColumnDescriptor, DescriptorSet};
use crate::error::QueryError;
use crate::expr::{BinaryOp, Expr, QueryOp};
use crate::ir::{
    PolymorphicArm, PolymorphicExpr, Projection, RelationalQuery, SelectExpr, SqlExpr, TableExpr,
    TableId,
};

/// Lower a Source node.
pub fn lower_scan(ctx: &mut ComposeContext, op: &QueryOp) -> Result<RelationalQuery, QueryError> {
    let QueryOp::Source { entity } = op else {
        return Err(QueryError::InternalError(
            "lower_scan called on non-Source node".into(),
        ));
    };

    let descriptors = ctx.descriptors;
    let root = descriptors.root(entity)?;
    let id = ctx.ids.next();
    let table = TableExpr::base(id, &root.table, root.schema.as_deref());
    let (row, type_filter) = entity_row(descriptors, entity, id)?;

    trace!(entity = %entity, table = %root.table, %id, "scan");
    let mut select = SelectExpr::new(Projection::Server(row), Some(table));
    select.predicate = type_filter;
    RelationalQuery::sequence(select)
}

fn column_sql(table: TableId, column: &ColumnDescriptor) -> SqlExpr {
    SqlExpr::Column {
        table,
        name: column.column.clone(),
        ty: column.scalar,
        nullable: column.nullable,
    }
}

/// The entity record of `entity` over `table`.
pub(crate) fn entity_record(
    descriptors: &DescriptorSet,
    entity: &str,
    table: TableId,
) -> Result<Expr, QueryError> {
    let fields = descriptors
        .columns(entity)?
        .into_iter()
        .map(|c| (c.property.clone(), Expr::Sql(column_sql(table, c))))
        .collect();
    Ok(Expr::Record {
        entity: Some(entity.to_string()),
        fields,
    })
}

/// Row shape of `entity` over `table`, plus the predicate restricting the
/// table to rows of that type when it shares the table with other types.
pub(crate) fn entity_row(
    descriptors: &DescriptorSet,
    entity: &str,
    table: TableId,
) -> Result<(Expr, Option<SqlExpr>), QueryError> {
    if !descriptors.is_polymorphic(entity) {
        return Ok((entity_record(descriptors, entity, table)?, None));
    }

    let root = descriptors.root(entity)?;
    let Some(property) = &root.discriminator_property else {
        return Err(QueryError::internal(format!(
            "hierarchy {} has no discriminator",
            root.name
        )));
    };
    let discriminator = descriptors.column(&root.name, property)?;
    let column = column_sql(table, discriminator);

    let mut arms = Vec::new();
    for concrete in descriptors.concrete_types(entity)? {
        let Some(value) = &concrete.discriminator else {
            continue;
        };
        let test = SqlExpr::binary(
            BinaryOp::Eq,
            column.clone(),
            SqlExpr::Literal {
                value: value.clone(),
                ty: discriminator.scalar,
            },
        );
        arms.push(PolymorphicArm {
            entity: concrete.name.clone(),
            test: Expr::Sql(test),
            shape: entity_record(descriptors, &concrete.name, table)?,
        });
    }

    let type_filter = if root.name == entity {
        None
    } else {
        arms.iter()
            .filter_map(|arm| match &arm.test {
                Expr::Sql(sql) => Some(sql.clone()),
                _ => None,
            })
            .reduce(SqlExpr::or)
            .or_else(|| Some(SqlExpr::false_predicate()))
    };

    let row = Expr::Polymorphic(Box::new(PolymorphicExpr {
        entity: entity.to_string(),
        arms,
    }));
    Ok((row, type_filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::operators::test_helpers::*;
    use crate::expr::Query;
    use crate::value::Type;

    #[test]
    fn test_lower_scan_basic() {
        let query = with_ctx(|ctx| lower(ctx, Query::from("Customer")));
        assert!(query.is_sequence());
        assert_eq!(query.row_type, Type::Entity("Customer".into()));
        assert!(query.select.predicate.is_none());
        let Some(TableExpr::Base { name, alias, .. }) = &query.select.table else {
            panic!("expected a base table");
        };
        assert_eq!(name, "Customers");
        assert_eq!(alias, "c");
        assert_eq!(field_names(&query.select.projection), vec!["Id", "Name", "City"]);
    }

    #[test]
    fn test_lower_scan_nullability_follows_descriptor() {
        let query = with_ctx(|ctx| lower(ctx, Query::from("Order")));
        let Projection::Server(Expr::Record { fields, .. }) = &query.select.projection else {
            panic!("expected a record");
        };
        let nullable: Vec<bool> = fields
            .iter()
            .map(|(_, e)| e.ty().is_nullable())
            .collect();
        assert_eq!(nullable, vec![false, false, false, false, false, true]);
    }

    #[test]
    fn test_lower_scan_hierarchy_root_is_polymorphic() {
        let query = with_ctx(|ctx| lower(ctx, Query::from("Person")));
        let Projection::Server(Expr::Polymorphic(poly)) = &query.select.projection else {
            panic!("expected a polymorphic row");
        };
        let arms: Vec<&str> = poly.arms.iter().map(|a| a.entity.as_str()).collect();
        assert_eq!(arms, vec!["Student", "Teacher", "Person"]);
        assert!(query.select.predicate.is_none());
    }

    #[test]
    fn test_lower_scan_derived_type_filters_table() {
        let query = with_ctx(|ctx| lower(ctx, Query::from("Student")));
        let Some(SqlExpr::Binary { op, right, .. }) = &query.select.predicate else {
            panic!("expected a discriminator test");
        };
        assert_eq!(*op, BinaryOp::Eq);
        assert_eq!(
            **right,
            SqlExpr::Literal {
                value: "Student".into(),
                ty: crate::value::ScalarType::String
            }
        );
    }

    #[test]
    fn test_lower_scan_unknown_entity() {
        let err = with_ctx_err(|ctx| lower(ctx, Query::from("Nope")));
        assert_eq!(err, QueryError::UnknownEntity("Nope".into()));
    }
}
