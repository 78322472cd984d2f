//! Functional-dependency extraction from WHERE equalities.
//!
//! Each top-level conjunct of the WHERE clause is inspected once. An equality
//! `expr = col` where `expr` depends only on allowed columns makes `col`
//! allowed. Equalities that cannot be decided yet wait in a pending list and
//! are retried after every round that grew the allowed set, until a round
//! makes no progress.
//!
//! Conjuncts other than equalities never produce dependencies but are still
//! checked for outer references the enclosing block forbids.

use serde::Serialize;
use tracing::{debug, trace};

use super::allowed::AllowedSets;
use super::classify::{Classification, Classifier, Purpose};
use super::ir::{BlockId, Clause, ColumnId, CompareType, Expr, Statement};
use super::keys::Propagator;
use super::scope::Scope;
use crate::error::FdCheckError;

/// Trajectory of one block's fixed point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    /// Passes over the conjuncts: the initial scan plus every retry round.
    pub rounds: usize,
    /// Columns marked allowed by an equality.
    pub extracted: usize,
    /// Equalities dropped without extracting anything.
    pub discarded: usize,
    /// Allowed columns of the block after each round.
    pub allowed_per_round: Vec<usize>,
}

/// An equality neither side of which was fully allowed when first seen.
#[derive(Debug, Clone)]
struct PendingEquality<'s> {
    left: &'s Expr,
    right: &'s Expr,
    compare_as: CompareType,
    left_cols: Vec<ColumnId>,
    right_cols: Vec<ColumnId>,
}

pub struct EqualityEngine<'s> {
    stmt: &'s Statement,
    scope: &'s Scope,
    block: BlockId,
    group_exprs: &'s [Expr],
    pending: Vec<PendingEquality<'s>>,
    stats: ExtractionStats,
}

/// Split a WHERE clause into its top-level conjuncts.
pub fn conjuncts(cond: &Expr) -> Vec<&Expr> {
    match cond {
        Expr::And(children) => children.iter().collect(),
        other => vec![other],
    }
}

impl<'s> EqualityEngine<'s> {
    pub fn new(
        stmt: &'s Statement,
        scope: &'s Scope,
        block: BlockId,
        group_exprs: &'s [Expr],
    ) -> Self {
        Self {
            stmt,
            scope,
            block,
            group_exprs,
            pending: Vec::new(),
            stats: ExtractionStats::default(),
        }
    }

    /// Run the WHERE clause of the block to its fixed point.
    ///
    /// Fails with a WHERE diagnostic on the first outer reference that can
    /// never become allowed.
    pub fn run(
        mut self,
        allowed: &mut AllowedSets,
        propagator: &mut Propagator,
    ) -> Result<ExtractionStats, FdCheckError> {
        let stmt = self.stmt;
        let Some(cond) = &stmt.block(self.block).where_clause else {
            return Ok(self.stats);
        };

        let mut progress = false;
        for conjunct in conjuncts(cond) {
            match conjunct {
                Expr::Eq {
                    left,
                    right,
                    compare_as,
                } => progress |= self.check_equality(left, right, *compare_as, allowed)?,
                other => self.check_filter(other, allowed)?,
            }
        }
        progress |= propagator.propagate(stmt, allowed);
        self.end_round(allowed);

        while progress && !self.pending.is_empty() {
            progress = false;
            for rec in std::mem::take(&mut self.pending) {
                let dep_l = rec.left_cols.iter().all(|&c| allowed.is_marked(c));
                let dep_r = rec.right_cols.iter().all(|&c| allowed.is_marked(c));
                match (dep_l, dep_r) {
                    (false, false) => self.pending.push(rec),
                    (true, false) => {
                        progress |= self.extract(rec.left, rec.right, rec.compare_as, allowed)
                    }
                    (false, true) => {
                        progress |= self.extract(rec.right, rec.left, rec.compare_as, allowed)
                    }
                    (true, true) => self.stats.discarded += 1,
                }
            }
            progress |= propagator.propagate(stmt, allowed);
            self.end_round(allowed);
        }

        self.stats.discarded += self.pending.len();
        debug!(
            block = %self.block,
            rounds = self.stats.rounds,
            extracted = self.stats.extracted,
            discarded = self.stats.discarded,
            "equality extraction finished"
        );
        Ok(self.stats)
    }

    fn classifier<'c>(&'c self, allowed: &'c AllowedSets) -> Classifier<'c> {
        Classifier::new(
            self.stmt,
            self.scope,
            allowed,
            self.block,
            self.group_exprs,
            Purpose::Extraction,
        )
    }

    fn end_round(&mut self, allowed: &AllowedSets) {
        self.stats.rounds += 1;
        let tables = &self.stmt.block(self.block).tables;
        self.stats
            .allowed_per_round
            .push(allowed.total_marked(tables.iter()));
    }

    /// First look at one equality conjunct. Returns true if a column was
    /// extracted.
    fn check_equality(
        &mut self,
        left: &'s Expr,
        right: &'s Expr,
        compare_as: CompareType,
        allowed: &mut AllowedSets,
    ) -> Result<bool, FdCheckError> {
        if left.contains_volatile() || right.contains_volatile() {
            self.stats.discarded += 1;
            return Ok(false);
        }
        let (l, r) = {
            let cls = self.classifier(allowed);
            (cls.classify(left), cls.classify(right))
        };
        if let Some(c) = l.blocking.or(r.blocking) {
            return Err(self.where_violation(c));
        }

        let opaque = |side: &Classification| !side.fully_allowed && side.non_allowed.is_empty();
        match (l.fully_allowed, r.fully_allowed) {
            (true, true) => {}
            _ if opaque(&l) || opaque(&r) => {}
            (false, false) if l.non_allowed.len() != 1 && r.non_allowed.len() != 1 => {}
            (false, false) => {
                self.pending.push(PendingEquality {
                    left,
                    right,
                    compare_as,
                    left_cols: l.non_allowed,
                    right_cols: r.non_allowed,
                });
                return Ok(false);
            }
            (true, false) => return Ok(self.extract(left, right, compare_as, allowed)),
            (false, true) => return Ok(self.extract(right, left, compare_as, allowed)),
        }
        self.stats.discarded += 1;
        Ok(false)
    }

    /// A conjunct that is not an equality only has to pass the outer
    /// reference rule.
    fn check_filter(&self, conjunct: &Expr, allowed: &AllowedSets) -> Result<(), FdCheckError> {
        match self.classifier(allowed).classify(conjunct).blocking {
            Some(c) => Err(self.where_violation(c)),
            None => Ok(()),
        }
    }

    /// Mark `nd` allowed given `dp` depends on allowed columns only.
    ///
    /// `nd` must be a bare, not yet allowed column of this block, and `dp`
    /// must already be in the equality's comparison class: a converted value
    /// does not determine the column.
    fn extract(
        &mut self,
        dp: &Expr,
        nd: &Expr,
        compare_as: CompareType,
        allowed: &mut AllowedSets,
    ) -> bool {
        let Some(c) = nd.as_column() else {
            self.stats.discarded += 1;
            return false;
        };
        if self.scope.owner(c.table) != Some(self.block)
            || dp.comparison_type(self.stmt) != compare_as
            || !allowed.mark(c)
        {
            self.stats.discarded += 1;
            return false;
        }
        trace!(
            block = %self.block,
            column = %self.stmt.qualified_name(c),
            from = %dp.to_sql(self.stmt),
            "extracted functional dependency"
        );
        if self.stmt.table(c.table).is_derived() {
            allowed.mark_all(c.table);
        }
        self.stats.extracted += 1;
        true
    }

    fn where_violation(&self, c: ColumnId) -> FdCheckError {
        FdCheckError::NonGroupingColumnUsed {
            column: self.stmt.qualified_name(c),
            clause: Clause::Where,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcdep::ir::{BlockKind, ColumnDef, DataType, TableId, TableRef};

    fn ints(names: &[&str]) -> Vec<ColumnDef> {
        names.iter().map(|n| ColumnDef::new(n, DataType::Int)).collect()
    }

    fn col(t: TableId, i: u32) -> Expr {
        Expr::column(ColumnId::new(t, i))
    }

    /// Run a single block with `a` (column 0 of the first table) allowed.
    fn run(
        stmt: &Statement,
        q: BlockId,
        seed: &[ColumnId],
    ) -> (Result<ExtractionStats, FdCheckError>, AllowedSets) {
        let scope = Scope::new(stmt);
        let mut allowed = AllowedSets::for_statement(stmt);
        for &c in seed {
            allowed.mark(c);
        }
        let mut prop = Propagator::new(stmt, &stmt.block(q).tables, true);
        let engine = EqualityEngine::new(stmt, &scope, q, &[]);
        let res = engine.run(&mut allowed, &mut prop);
        (res, allowed)
    }

    #[test]
    fn test_conjunct_split() {
        let a = Expr::int(1);
        let and = Expr::and(vec![a.clone(), a.clone()]);
        assert_eq!(conjuncts(&and).len(), 2);
        assert_eq!(conjuncts(&a).len(), 1);
    }

    #[test]
    fn test_function_of_allowed_column_extracts() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b", "c"])));
        let eq = stmt.equality(
            col(t, 1),
            Expr::func("+", vec![col(t, 0), Expr::int(1)], DataType::Int),
        );
        stmt.block_mut(q).where_clause = Some(eq);

        let (res, allowed) = run(&stmt, q, &[ColumnId::new(t, 0)]);
        let stats = res.unwrap();
        assert!(allowed.is_marked(ColumnId::new(t, 1)));
        assert!(!allowed.is_marked(ColumnId::new(t, 2)));
        assert_eq!(stats.extracted, 1);
        assert_eq!(stats.rounds, 1);
    }

    #[test]
    fn test_chain_resolves_in_retry_round() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "m", "b"])));
        // m = b comes first so it has to wait for a = m.
        let mb = stmt.equality(col(t, 1), col(t, 2));
        let am = stmt.equality(col(t, 0), col(t, 1));
        stmt.block_mut(q).where_clause = Some(Expr::and(vec![mb, am]));

        let (res, allowed) = run(&stmt, q, &[ColumnId::new(t, 0)]);
        let stats = res.unwrap();
        assert!(allowed.is_marked(ColumnId::new(t, 1)));
        assert!(allowed.is_marked(ColumnId::new(t, 2)));
        assert_eq!(stats.extracted, 2);
        assert_eq!(stats.rounds, 2);
        assert_eq!(stats.allowed_per_round, vec![2, 3]);
    }

    #[test]
    fn test_symmetric_unknowns_extract_nothing() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let x = stmt.add_table(q, TableRef::new("x", ints(&["g", "p"])));
        let y = stmt.add_table(q, TableRef::new("y", ints(&["q"])));
        let eq = stmt.equality(col(x, 1), col(y, 0));
        stmt.block_mut(q).where_clause = Some(eq);

        let (res, allowed) = run(&stmt, q, &[ColumnId::new(x, 0)]);
        let stats = res.unwrap();
        assert!(!allowed.is_marked(ColumnId::new(x, 1)));
        assert!(!allowed.is_marked(ColumnId::new(y, 0)));
        assert_eq!(stats.extracted, 0);
        assert_eq!(stats.discarded, 1);
    }

    #[test]
    fn test_volatile_side_is_skipped() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b"])));
        let eq = stmt.equality(
            col(t, 1),
            Expr::volatile("rand_int", vec![col(t, 0)], DataType::Int),
        );
        stmt.block_mut(q).where_clause = Some(eq);
        let (res, allowed) = run(&stmt, q, &[ColumnId::new(t, 0)]);
        assert_eq!(res.unwrap().extracted, 0);
        assert!(!allowed.is_marked(ColumnId::new(t, 1)));
    }

    #[test]
    fn test_coercing_equality_does_not_extract() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(
            q,
            TableRef::new(
                "t",
                vec![
                    ColumnDef::new("a", DataType::Text),
                    ColumnDef::new("b", DataType::Int),
                ],
            ),
        );
        // Text compared to int is compared as real: no dependency.
        let eq = stmt.equality(col(t, 1), col(t, 0));
        stmt.block_mut(q).where_clause = Some(eq);
        let (res, allowed) = run(&stmt, q, &[ColumnId::new(t, 0)]);
        assert_eq!(res.unwrap().extracted, 0);
        assert!(!allowed.is_marked(ColumnId::new(t, 1)));
    }

    #[test]
    fn test_compound_target_does_not_extract() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a", "b"])));
        let eq = stmt.equality(
            col(t, 0),
            Expr::func("+", vec![col(t, 1), Expr::int(1)], DataType::Int),
        );
        stmt.block_mut(q).where_clause = Some(eq);
        let (res, allowed) = run(&stmt, q, &[ColumnId::new(t, 0)]);
        assert_eq!(res.unwrap().extracted, 0);
        assert!(!allowed.is_marked(ColumnId::new(t, 1)));
    }

    #[test]
    fn test_extraction_into_derived_table_marks_it_whole() {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let d = stmt.add_block(BlockKind::Select, Some(q));
        let t = stmt.add_table(q, TableRef::new("t", ints(&["a"])));
        let v = stmt.add_table(q, TableRef::derived("v", d, ints(&["k", "x", "y"])));
        let eq = stmt.equality(col(v, 0), col(t, 0));
        stmt.block_mut(q).where_clause = Some(eq);
        let (res, allowed) = run(&stmt, q, &[ColumnId::new(t, 0)]);
        res.unwrap();
        assert!(allowed.is_fully_marked(v));
    }

    #[test]
    fn test_outer_reference_in_where_of_select_list_subquery_fails() {
        let mut stmt = Statement::new();
        let outer = stmt.add_block(BlockKind::Select, None);
        let inner = stmt.add_block(BlockKind::Select, Some(outer));
        let o = stmt.add_table(outer, TableRef::new("t1", ints(&["a", "b"])).with_alias("o"));
        let i = stmt.add_table(inner, TableRef::new("t1", ints(&["a", "b"])).with_alias("i"));
        stmt.block_mut(outer).group_by.push(col(o, 0));
        stmt.block_mut(outer).select_list.push(Expr::Subquery(inner));
        stmt.block_mut(inner).where_clause = Some(Expr::func(
            ">",
            vec![col(o, 1), Expr::int(1)],
            DataType::Bool,
        ));
        stmt.block_mut(inner).group_by.push(col(i, 0));

        let mut scope = Scope::new(&stmt);
        scope.record_placement(inner, Clause::SelectList);
        let mut allowed = AllowedSets::for_statement(&stmt);
        allowed.mark(ColumnId::new(o, 0));
        let mut prop = Propagator::new(&stmt, &stmt.block(inner).tables, true);
        let err = EqualityEngine::new(&stmt, &scope, inner, &[])
            .run(&mut allowed, &mut prop)
            .unwrap_err();
        assert_eq!(
            err,
            FdCheckError::NonGroupingColumnUsed {
                column: "o.b".into(),
                clause: Clause::Where,
            }
        );
    }
}
