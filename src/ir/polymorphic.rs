//! Rows that materialize into one of several entity shapes.

use crate::descriptor::DescriptorSet;
use crate::expr::Expr;
use crate::value::Type;

/// One candidate shape of a polymorphic row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolymorphicArm {
    /// Concrete entity type produced by this arm.
    pub entity: String,
    /// Predicate over the row selecting this arm.
    pub test: Expr,
    /// The entity record for this arm.
    pub shape: Expr,
}

/// Arms are tried in order; the first whose test holds wins, and a row
/// no arm matches materializes as null.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolymorphicExpr {
    /// Static (base) entity type of the row.
    pub entity: String,
    pub arms: Vec<PolymorphicArm>,
}

impl PolymorphicExpr {
    pub fn ty(&self) -> Type {
        Type::Entity(self.entity.clone())
    }

    /// Keep only the arms assignable to `entity`; the static type narrows.
    pub fn filter(&self, entity: &str, descriptors: &DescriptorSet) -> PolymorphicExpr {
        PolymorphicExpr {
            entity: entity.to_string(),
            arms: self
                .arms
                .iter()
                .filter(|arm| descriptors.is_assignable(&arm.entity, entity))
                .cloned()
                .collect(),
        }
    }

    /// View the row as a base type. The arms are unchanged.
    pub fn upcast(&self, entity: &str) -> PolymorphicExpr {
        PolymorphicExpr {
            entity: entity.to_string(),
            arms: self.arms.clone(),
        }
    }

    /// Member of the row: taken from the first arm whose shape has it.
    /// Members shared by the whole hierarchy are the same column in every
    /// arm.
    pub fn member(&self, name: &str) -> Option<Expr> {
        self.arms.iter().find_map(|arm| match &arm.shape {
            Expr::Record { fields, .. } => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| e.clone()),
            _ => None,
        })
    }

    /// Disjunction of the arm tests: the predicate that some arm applies.
    pub fn any_test(&self) -> Option<Expr> {
        self.arms.iter().map(|arm| arm.test.clone()).reduce(Expr::or)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::EntityDescriptor;
    use crate::value::ScalarType;

    fn people() -> DescriptorSet {
        DescriptorSet::new()
            .with(
                EntityDescriptor::new("Person", "People")
                    .column("Id", ScalarType::Int32)
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
    }

    fn poly() -> PolymorphicExpr {
        let student = Expr::Record {
            entity: Some("Student".into()),
            fields: vec![
                ("Id".into(), Expr::constant(1)),
                ("School".into(), Expr::constant("MIT")),
            ],
        };
        let person = Expr::Record {
            entity: Some("Person".into()),
            fields: vec![("Id".into(), Expr::constant(1))],
        };
        PolymorphicExpr {
            entity: "Person".into(),
            arms: vec![
                PolymorphicArm {
                    entity: "Student".into(),
                    test: Expr::constant(true),
                    shape: student,
                },
                PolymorphicArm {
                    entity: "Person".into(),
                    test: Expr::constant(false),
                    shape: person,
                },
            ],
        }
    }

    #[test]
    fn test_filter_narrows_to_assignable_arms() {
        let students = poly().filter("Student", &people());
        assert_eq!(students.arms.len(), 1);
        assert_eq!(students.ty(), Type::Entity("Student".into()));
    }

    #[test]
    fn test_member_from_first_arm_having_it() {
        assert_eq!(poly().member("School"), Some(Expr::constant("MIT")));
        assert_eq!(poly().member("Id"), Some(Expr::constant(1)));
        assert_eq!(poly().member("Nope"), None);
    }
}
