//! Per-operator lowering rules.
//!
//! Each operator lowers its source first, then adds its own clause to
//! the source's select, pushing the select down into a subquery when
//! the clause cannot be added to it as it stands.

pub mod aggregate;
pub mod default_if_empty;
pub mod distinct;
pub mod element;
pub mod filter;
pub mod group_by;
pub mod join;
pub mod of_type;
pub mod ordering;
pub mod paging;
pub mod project;
pub mod quantifier;
pub mod scan;
pub mod select_many;
pub mod set_ops;
#[cfg(test)]
pub(crate) mod test_helpers;
pub mod zip;
