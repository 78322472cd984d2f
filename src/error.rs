//! Error types for fdcheck.
//!
//! All errors that can occur during the analysis are represented by [`FdCheckError`].
//! Errors are propagated via `Result<T, FdCheckError>` throughout the codebase and
//! surfaced to the surrounding query-processing driver unchanged.
//!
//! # Error Classification
//!
//! Errors are classified into two categories:
//! - **User**: a query references a column that is neither grouped nor
//!   functionally dependent on the grouping key, or the statement handed
//!   over by the parser is malformed.
//! - **Internal**: bugs. Should never be observed.
//!
//! Nothing here is retryable: the analysis is deterministic over immutable
//! input, so a second run produces the same result.

use std::fmt;

use crate::funcdep::ir::Clause;

/// Primary error type for the crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FdCheckError {
    // ── User errors ──────────────────────────────────────────────────────
    /// A column that is not an allowed column is referenced in a clause
    /// where only allowed columns may appear.
    #[error("non-grouping field '{column}' is used in {clause} clause")]
    NonGroupingColumnUsed {
        /// Qualified column name (`table.column`).
        column: String,
        /// Clause of the offending block the reference was found in.
        clause: Clause,
    },

    /// The statement handed to the analysis is structurally inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Query blocks depend on each other's result sets in a cycle.
    #[error("cycle detected between query blocks: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    // ── Internal errors ───────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Classification of error kind for callers that map errors to SQLSTATEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdCheckErrorKind {
    User,
    Internal,
}

impl fmt::Display for FdCheckErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdCheckErrorKind::User => write!(f, "USER"),
            FdCheckErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl FdCheckError {
    /// Classify the error.
    pub fn kind(&self) -> FdCheckErrorKind {
        match self {
            FdCheckError::NonGroupingColumnUsed { .. }
            | FdCheckError::InvalidArgument(_)
            | FdCheckError::CycleDetected(_) => FdCheckErrorKind::User,
            FdCheckError::InternalError(_) => FdCheckErrorKind::Internal,
        }
    }

    /// The clause named by a `NonGroupingColumnUsed` diagnostic.
    pub fn clause(&self) -> Option<Clause> {
        match self {
            FdCheckError::NonGroupingColumnUsed { clause, .. } => Some(*clause),
            _ => None,
        }
    }

    /// The qualified column named by a `NonGroupingColumnUsed` diagnostic.
    pub fn column(&self) -> Option<&str> {
        match self {
            FdCheckError::NonGroupingColumnUsed { column, .. } => Some(column),
            _ => None,
        }
    }
}
