//! Strict GROUP BY checking.
//!
//! Under `ONLY_FULL_GROUP_BY` a grouped query may only reference, outside
//! aggregates, columns whose value is fixed within each group. This module
//! computes, per query block, the set of such "allowed" columns:
//!
//! 1. GROUP BY columns.
//! 2. Columns equal to a deterministic function of allowed columns through a
//!    top-level WHERE equality (`b = a + 1` with `a` allowed).
//! 3. Every column of a table one of whose PRIMARY/UNIQUE keys is allowed.
//! 4. Every column of a materialized derived table one of whose columns is
//!    allowed.
//!
//! Steps 2 to 4 feed each other and are iterated to a fixed point. The SELECT
//! list and HAVING are then checked against the result.
//!
//! # Architecture
//!
//! ```text
//!   check_statement
//!     │  Statement::validate, BlockDag::topological_order
//!     ▼
//!   FuncDepAnalysis::check_query_block   (once per block, in order)
//!     ├── tagger::tag_subqueries          subquery → clause
//!     ├── GROUP BY columns → AllowedSets
//!     ├── keys::Propagator                keys, derived tables
//!     ├── equality::EqualityEngine        WHERE fixed point
//!     └── validate::validate_block        SELECT list, HAVING
//! ```
//!
//! Outer references are judged by [`classify::Classifier`]: a column of an
//! enclosing aggregating block is legal inside a subquery only if the
//! subquery sits in that block's WHERE clause or the column is allowed there.

pub mod allowed;
pub mod classify;
pub mod equality;
pub mod ir;
pub mod keys;
pub mod scope;
pub mod tagger;
pub mod validate;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::config::CheckConfig;
use crate::dag::BlockDag;
use crate::error::FdCheckError;

use self::allowed::AllowedSets;
use self::equality::EqualityEngine;
pub use self::equality::ExtractionStats;
use self::ir::{BlockId, BlockKind, ColumnId, Expr, Statement, TableId};
use self::keys::Propagator;
use self::scope::Scope;

/// What the analysis did with one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BlockOutcome {
    /// No tables, or a placeholder block.
    Skipped,
    /// No grouping anywhere: every column of the block is allowed.
    Unrestricted,
    /// Fully checked.
    Checked(ExtractionStats),
}

/// Per-run state shared by the blocks of one statement.
///
/// The driver calls [`FuncDepAnalysis::check_query_block`] for each block in
/// [`BlockDag`] order, or lets [`check_statement`] do it.
pub struct FuncDepAnalysis<'s> {
    stmt: &'s Statement,
    config: &'s CheckConfig,
    scope: Scope,
    allowed: AllowedSets,
}

impl<'s> FuncDepAnalysis<'s> {
    /// Fails with `InvalidArgument` if `stmt` does not pass
    /// [`Statement::validate`]; every later lookup relies on it.
    pub fn new(stmt: &'s Statement, config: &'s CheckConfig) -> Result<Self, FdCheckError> {
        stmt.validate()?;
        Ok(Self {
            stmt,
            config,
            scope: Scope::new(stmt),
            allowed: AllowedSets::for_statement(stmt),
        })
    }

    /// Check that the SELECT list and HAVING of `block` only use allowed
    /// columns, and that its WHERE clause makes no forbidden outer reference.
    pub fn check_query_block(&mut self, block: BlockId) -> Result<BlockOutcome, FdCheckError> {
        let stmt = self.stmt;
        let Some(qb) = stmt.get_block(block) else {
            return Err(FdCheckError::InvalidArgument(format!(
                "{block} does not exist"
            )));
        };
        if qb.tables.is_empty() || qb.synthetic {
            debug!(%block, "block skipped");
            return Ok(BlockOutcome::Skipped);
        }

        for &t in &qb.tables {
            self.allowed.clear(t);
        }
        let mut propagator = Propagator::new(stmt, &qb.tables, self.config.key_propagation);

        let outer_kind = qb.outer.map(|o| stmt.block(o).kind);
        if let Some(o) = qb.outer
            && outer_kind == Some(BlockKind::Update)
        {
            for &t in &stmt.block(o).tables {
                self.allowed.mark_all(t);
            }
        }
        tagger::tag_subqueries(stmt, &mut self.scope, block);

        let need_check =
            !qb.group_by.is_empty() || qb.having.is_some() || outer_kind == Some(BlockKind::Select);
        if qb.group_by.is_empty() && qb.having.is_none() {
            for &t in &qb.tables {
                self.allowed.mark_all(t);
            }
            if !need_check {
                debug!(%block, "no grouping, all columns allowed");
                return Ok(BlockOutcome::Unrestricted);
            }
        }

        let group_exprs = self.collect_grouping(block);
        propagator.propagate(stmt, &mut self.allowed);

        let stats = EqualityEngine::new(stmt, &self.scope, block, &group_exprs)
            .run(&mut self.allowed, &mut propagator)?;
        validate::validate_block(stmt, &self.scope, &self.allowed, block, &group_exprs)?;

        debug!(
            %block,
            allowed = self.allowed.total_marked(qb.tables.iter()),
            rounds = stats.rounds,
            "block checked"
        );
        Ok(BlockOutcome::Checked(stats))
    }

    /// Mark GROUP BY columns of the block. Returns the grouping entries that
    /// are not local columns, for structural matching.
    fn collect_grouping(&mut self, block: BlockId) -> Vec<Expr> {
        let mut group_exprs = Vec::new();
        for g in &self.stmt.block(block).group_by {
            match g.as_column() {
                Some(c) if self.scope.owner(c.table) == Some(block) => {
                    self.allowed.mark(c);
                }
                _ => group_exprs.push(g.clone()),
            }
        }
        group_exprs
    }

    pub fn is_allowed(&self, column: ColumnId) -> bool {
        self.allowed.is_marked(column)
    }

    fn into_report(
        self,
        order: Vec<BlockId>,
        outcomes: BTreeMap<BlockId, BlockOutcome>,
    ) -> AnalysisReport {
        AnalysisReport {
            enabled: true,
            order,
            outcomes,
            allowed: self.allowed,
        }
    }
}

/// Result of a successful [`check_statement`].
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    enabled: bool,
    order: Vec<BlockId>,
    outcomes: BTreeMap<BlockId, BlockOutcome>,
    allowed: AllowedSets,
}

impl AnalysisReport {
    fn disabled() -> Self {
        Self {
            enabled: false,
            order: Vec::new(),
            outcomes: BTreeMap::new(),
            allowed: AllowedSets::default(),
        }
    }

    /// False when the check was switched off by configuration.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Blocks in the order they were analyzed.
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn outcome(&self, block: BlockId) -> Option<&BlockOutcome> {
        self.outcomes.get(&block)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (BlockId, &BlockOutcome)> {
        self.outcomes.iter().map(|(&b, o)| (b, o))
    }

    /// Whether `column` may be referenced outside aggregates. Everything is
    /// allowed when the check is disabled.
    pub fn is_allowed(&self, column: ColumnId) -> bool {
        !self.enabled || self.allowed.is_marked(column)
    }

    pub fn is_table_allowed(&self, table: TableId) -> bool {
        !self.enabled || self.allowed.is_fully_marked(table)
    }

    /// Qualified names of the allowed columns of `block`, in table order.
    pub fn allowed_columns(&self, stmt: &Statement, block: BlockId) -> Vec<String> {
        let Some(qb) = stmt.get_block(block) else {
            return Vec::new();
        };
        qb.tables
            .iter()
            .flat_map(|&t| {
                let width = stmt.get_table(t).map_or(0, |table| table.width());
                (0..width as u32).map(move |i| ColumnId::new(t, i))
            })
            .filter(|&c| self.is_allowed(c))
            .map(|c| stmt.qualified_name(c))
            .collect()
    }
}

/// Check every block of `stmt`, defining and enclosing blocks first.
///
/// Stops at the first block that fails; no partial result is returned.
pub fn check_statement(
    stmt: &Statement,
    config: &CheckConfig,
) -> Result<AnalysisReport, FdCheckError> {
    if !config.only_full_group_by {
        debug!("ONLY_FULL_GROUP_BY disabled, statement not checked");
        return Ok(AnalysisReport::disabled());
    }
    let mut analysis = FuncDepAnalysis::new(stmt, config)?;
    let order = BlockDag::from_statement(stmt).topological_order()?;

    let mut outcomes = BTreeMap::new();
    for &block in &order {
        let outcome = analysis.check_query_block(block).inspect_err(|e| {
            debug!(%block, error = %e, "group by check failed");
        })?;
        outcomes.insert(block, outcome);
    }
    Ok(analysis.into_report(order, outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FdCheckErrorKind;
    use crate::funcdep::ir::{AggFunc, ColumnDef, DataType, TableRef};

    fn ints(names: &[&str]) -> Vec<ColumnDef> {
        names.iter().map(|n| ColumnDef::new(n, DataType::Int)).collect()
    }

    fn col(t: TableId, i: u32) -> Expr {
        Expr::column(ColumnId::new(t, i))
    }

    #[test]
    fn test_no_grouping_is_unrestricted() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b"])));
        stmt.block_mut(q).select_list = vec![col(t, 0), col(t, 1)];

        let report = check_statement(&stmt, &CheckConfig::default()).unwrap();
        assert_eq!(report.outcome(q), Some(&BlockOutcome::Unrestricted));
        assert!(report.is_table_allowed(t));
    }

    #[test]
    fn test_empty_and_synthetic_blocks_skipped() {
        let mut stmt = Statement::new();
        let empty = stmt.add_block(BlockKind::Select, None);
        let fake = stmt.add_block(BlockKind::Select, None);
        stmt.add_table(fake, TableRef::new("t", ints(&["a"])));
        stmt.block_mut(fake).synthetic = true;
        stmt.block_mut(fake).group_by.push(Expr::int(1));

        let report = check_statement(&stmt, &CheckConfig::default()).unwrap();
        assert_eq!(report.outcome(empty), Some(&BlockOutcome::Skipped));
        assert_eq!(report.outcome(fake), Some(&BlockOutcome::Skipped));
    }

    #[test]
    fn test_grouped_block_is_checked() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b"])));
        {
            let qb = stmt.block_mut(q);
            qb.group_by.push(col(t, 0));
            qb.select_list = vec![col(t, 0), Expr::aggregate(AggFunc::Sum, vec![col(t, 1)])];
        }
        let report = check_statement(&stmt, &CheckConfig::default()).unwrap();
        assert!(matches!(report.outcome(q), Some(BlockOutcome::Checked(_))));
        assert_eq!(report.allowed_columns(&stmt, q), vec!["t.a".to_string()]);
    }

    #[test]
    fn test_disabled_accepts_everything() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b"])));
        stmt.block_mut(q).group_by.push(col(t, 0));
        stmt.block_mut(q).select_list.push(col(t, 1));

        assert!(check_statement(&stmt, &CheckConfig::default()).is_err());
        let cfg = CheckConfig::from_sql_mode("STRICT_TRANS_TABLES");
        let report = check_statement(&stmt, &cfg).unwrap();
        assert!(!report.enabled());
        assert!(report.is_allowed(ColumnId::new(t, 1)));
    }

    #[test]
    fn test_invalid_statement_rejected_before_analysis() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        stmt.add_table(q, TableRef::new("t", ints(&["a"])));
        stmt.block_mut(q).select_list.push(col(TableId(5), 0));
        let err = check_statement(&stmt, &CheckConfig::default()).unwrap_err();
        assert_eq!(err.kind(), FdCheckErrorKind::User);
        assert!(matches!(err, FdCheckError::InvalidArgument(_)));
    }

    #[test]
    fn test_check_query_block_unknown_block() {
        let stmt = Statement::new();
        let cfg = CheckConfig::default();
        let mut analysis = FuncDepAnalysis::new(&stmt, &cfg).unwrap();
        assert!(analysis.check_query_block(BlockId(3)).is_err());
    }

    #[test]
    fn test_analysis_rejects_dangling_ids_up_front() {
        let cfg = CheckConfig::default();

        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        stmt.block_mut(q).tables.push(TableId(9));
        stmt.block_mut(q).group_by.push(Expr::int(1));
        let err = FuncDepAnalysis::new(&stmt, &cfg).err().unwrap();
        assert!(matches!(err, FdCheckError::InvalidArgument(_)));

        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, Some(BlockId(4)));
        stmt.add_table(q, TableRef::new("t", ints(&["a"])));
        assert!(FuncDepAnalysis::new(&stmt, &cfg).is_err());

        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        stmt.add_table(q, TableRef::new("t", ints(&["a"])));
        stmt.block_mut(q).select_list.push(Expr::Subquery(BlockId(2)));
        assert!(FuncDepAnalysis::new(&stmt, &cfg).is_err());
    }

    #[test]
    fn test_grouping_expression_is_legal_in_select_list() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b"])));
        let expr = Expr::func("+", vec![col(t, 0), col(t, 1)], DataType::Int);
        stmt.block_mut(q).group_by.push(expr.clone());
        stmt.block_mut(q).select_list.push(Expr::func("abs", vec![expr], DataType::Int));
        assert!(check_statement(&stmt, &CheckConfig::default()).is_ok());

        stmt.block_mut(q).select_list.push(col(t, 0));
        let err = check_statement(&stmt, &CheckConfig::default()).unwrap_err();
        assert_eq!(err.column(), Some("t.a"));
    }
}
