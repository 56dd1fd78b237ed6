//! Error types for relq.
//!
//! All errors that can occur while compiling or executing a query are
//! represented by [`QueryError`]. Errors are propagated via
//! `Result<T, QueryError>` throughout the crate.
//!
//! # Error Classification
//!
//! Errors are classified into five categories:
//! - **Unsupported**: a node or operator combination with no translation
//!   rule. Raised at compile time, never silently miscompiled.
//! - **InvalidArgument**: malformed input or IR construction (unknown
//!   entity, mismatched set-operator shapes, missing join predicate).
//! - **Materialization**: a row value cannot be converted to the expected
//!   shape, or an element operator saw the wrong number of rows.
//! - **Database**: reported by the connection collaborator.
//! - **Internal**: bugs.
//!
//! Compile-time errors are never cached: a failed compile must not poison
//! the plan cache.

use std::fmt;

/// Primary error type for the crate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    // ── Unsupported constructs (compile time, not retried) ─────────────
    /// A node type or operator combination has no translation rule.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// A predicate or ordering key could not be translated to SQL.
    #[error("expression cannot be translated to SQL: {0}")]
    UntranslatablePredicate(String),

    // ── Invalid arguments (malformed input) ─────────────────────────────
    /// An invalid argument was provided when building a node.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operand types do not line up (e.g. set operator branches).
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The descriptor set has no entry for the named entity type.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// A member access names neither a column nor a navigation.
    #[error("type {ty} has no member {member}")]
    UnknownMember { ty: String, member: String },

    // ── Runtime materialization failures ────────────────────────────────
    /// A row value could not be converted to the expected shape.
    #[error("materialization failed: {0}")]
    Materialization(String),

    /// An element operator (First, Single, ...) found no rows.
    #[error("sequence contains no elements")]
    NoElements,

    /// `Single` found more than one row.
    #[error("sequence contains more than one element")]
    MoreThanOneElement,

    /// The runtime parameter list does not match the compiled plan.
    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),

    // ── Database collaborator ───────────────────────────────────────────
    /// An error surfaced by the connection / reader.
    #[error("database error: {0}")]
    Database(String),

    // ── Internal errors (should not happen) ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kinds for callers and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Unsupported,
    InvalidArgument,
    Materialization,
    Database,
    Internal,
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::Unsupported => write!(f, "UNSUPPORTED"),
            QueryErrorKind::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            QueryErrorKind::Materialization => write!(f, "MATERIALIZATION"),
            QueryErrorKind::Database => write!(f, "DATABASE"),
            QueryErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl QueryError {
    /// Classify the error.
    pub fn kind(&self) -> QueryErrorKind {
        match self {
            QueryError::Unsupported(_) | QueryError::UntranslatablePredicate(_) => {
                QueryErrorKind::Unsupported
            }

            QueryError::InvalidArgument(_)
            | QueryError::TypeMismatch(_)
            | QueryError::UnknownEntity(_)
            | QueryError::UnknownMember { .. } => QueryErrorKind::InvalidArgument,

            QueryError::Materialization(_)
            | QueryError::NoElements
            | QueryError::MoreThanOneElement
            | QueryError::ParameterMismatch(_) => QueryErrorKind::Materialization,

            QueryError::Database(_) => QueryErrorKind::Database,

            QueryError::InternalError(_) => QueryErrorKind::Internal,
        }
    }

    /// Whether the error was raised while compiling (as opposed to while
    /// executing a compiled plan).
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self.kind(),
            QueryErrorKind::Unsupported | QueryErrorKind::InvalidArgument | QueryErrorKind::Internal
        )
    }

    /// Shorthand for an [`QueryError::Unsupported`] built from any displayable value.
    pub fn unsupported(what: impl fmt::Display) -> Self {
        QueryError::Unsupported(what.to_string())
    }

    /// Shorthand for an [`QueryError::InternalError`].
    pub fn internal(what: impl fmt::Display) -> Self {
        QueryError::InternalError(what.to_string())
    }
}
