//! fdcheck: strict GROUP BY checking with functional-dependency extraction.
//!
//! Given the resolved query blocks of one SQL statement, decide whether every
//! column referenced outside an aggregate in a grouped block is either
//! grouped or functionally determined by the grouping key. Dependencies are
//! read from WHERE equalities, PRIMARY/UNIQUE keys and grouped derived
//! tables, so queries such as
//!
//! ```sql
//! SELECT t1.a, t1.b FROM t1 WHERE t1.b = t1.a + 1 GROUP BY t1.a
//! ```
//!
//! are accepted while
//!
//! ```sql
//! SELECT t1.a, t1.c FROM t1 WHERE t1.b = t1.a + 1 GROUP BY t1.a
//! ```
//!
//! is rejected with `non-grouping field 't1.c' is used in SELECT list clause`.
//!
//! # Theoretical Basis
//!
//! - **SQL:2003**, 7.12 `<query specification>`, and 4.18 "Functional
//!   dependencies": columns functionally dependent on the grouping columns
//!   may be referenced in the select list of a grouped table.
//! - **Armstrong (1974)**: "Dependency Structures of Data Base
//!   Relationships", IFIP Congress. Closure of a column set under a set of
//!   dependencies, computed here as a monotone fixed point.
//!
//! The crate has no parser. The surrounding driver lowers a statement into
//! [`funcdep::ir::Statement`] and calls [`check_statement`].

pub mod config;
pub mod dag;
pub mod error;
pub mod funcdep;

pub use config::CheckConfig;
pub use error::{FdCheckError, FdCheckErrorKind};
pub use funcdep::{
    AnalysisReport, BlockOutcome, ExtractionStats, FuncDepAnalysis, check_statement,
};
