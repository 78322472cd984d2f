//! Dependency classification of expression trees.
//!
//! [`Classifier::classify`] decides whether an expression depends only on
//! allowed columns, constants and deterministic functions, and which not yet
//! allowed columns stand in the way. A reference that can never become
//! allowed (an illegal outer reference) is reported as the blocking column.

use super::allowed::AllowedSets;
use super::ir::{BlockId, Clause, ColumnId, Expr, Statement};
use super::scope::Scope;

/// What the classification is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// A WHERE conjunct feeding the equality engine. Volatile calls and
    /// aggregates are opaque: they are never fully allowed and contribute
    /// no columns, so no dependency can be read through them.
    Extraction,
    /// A SELECT list or HAVING expression. Aggregates are always legal and
    /// volatile calls are legal when their arguments are. Subqueries with
    /// tables of their own are checked by their own analysis.
    Reference,
}

/// Result of classifying one expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    pub fully_allowed: bool,
    /// Columns of the analyzed block that are not allowed yet, in order of
    /// first appearance, without duplicates.
    pub non_allowed: Vec<ColumnId>,
    /// The first reference that can never become allowed.
    pub blocking: Option<ColumnId>,
}

impl Classification {
    fn push_non_allowed(&mut self, c: ColumnId) {
        if !self.non_allowed.contains(&c) {
            self.non_allowed.push(c);
        }
    }

    fn block_on(&mut self, c: ColumnId) {
        if self.blocking.is_none() {
            self.blocking = Some(c);
        }
    }

    /// The column a diagnostic should name.
    pub fn offending_column(&self) -> Option<ColumnId> {
        self.blocking.or_else(|| self.non_allowed.first().copied())
    }
}

/// Classifies expressions of one block against the current allowed sets.
pub struct Classifier<'a> {
    stmt: &'a Statement,
    scope: &'a Scope,
    allowed: &'a AllowedSets,
    block: BlockId,
    group_exprs: &'a [Expr],
    purpose: Purpose,
}

impl<'a> Classifier<'a> {
    pub fn new(
        stmt: &'a Statement,
        scope: &'a Scope,
        allowed: &'a AllowedSets,
        block: BlockId,
        group_exprs: &'a [Expr],
        purpose: Purpose,
    ) -> Self {
        Self {
            stmt,
            scope,
            allowed,
            block,
            group_exprs,
            purpose,
        }
    }

    pub fn classify(&self, expr: &Expr) -> Classification {
        let mut out = Classification::default();
        let fully_allowed = self.visit(expr, &mut out);
        Classification {
            fully_allowed,
            ..out
        }
    }

    fn visit(&self, expr: &Expr, out: &mut Classification) -> bool {
        if self.group_exprs.iter().any(|g| g == expr) {
            return true;
        }
        match expr {
            Expr::Literal { .. } => true,
            Expr::Column(c) => self.visit_column(*c, out),
            Expr::Func {
                args, volatility, ..
            } => {
                if self.purpose == Purpose::Extraction && !volatility.is_deterministic() {
                    self.scan_opaque(args, out);
                    return false;
                }
                self.visit_all(args, out)
            }
            Expr::Aggregate { args, .. } => {
                self.scan_opaque(args, out);
                self.purpose == Purpose::Reference
            }
            Expr::Eq { left, right, .. } => {
                let l = self.visit(left, out);
                let r = self.visit(right, out);
                l && r
            }
            Expr::And(children) => self.visit_all(children, out),
            Expr::Subquery(sub) => self.visit_subquery(*sub, out),
        }
    }

    /// Visit every child without short-circuiting, so all columns are seen.
    fn visit_all(&self, children: &[Expr], out: &mut Classification) -> bool {
        children
            .iter()
            .fold(true, |acc, child| self.visit(child, out) && acc)
    }

    /// Look through an opaque node only for illegal outer references.
    fn scan_opaque(&self, children: &[Expr], out: &mut Classification) {
        let mut scratch = Classification::default();
        for child in children {
            self.visit(child, &mut scratch);
        }
        if let Some(b) = scratch.blocking {
            out.block_on(b);
        }
    }

    fn visit_column(&self, c: ColumnId, out: &mut Classification) -> bool {
        match self.scope.owner(c.table) {
            Some(owner) if owner == self.block => {
                if self.allowed.is_marked(c) {
                    true
                } else {
                    out.push_non_allowed(c);
                    false
                }
            }
            Some(owner) if self.scope.is_ancestor(owner, self.block) => {
                if self.outer_reference_is_legal(owner, c) {
                    true
                } else {
                    out.block_on(c);
                    false
                }
            }
            _ => {
                out.push_non_allowed(c);
                false
            }
        }
    }

    /// A column of enclosing block `owner` seen from the analyzed block.
    fn outer_reference_is_legal(&self, owner: BlockId, c: ColumnId) -> bool {
        if !self.stmt.block(owner).is_aggregating() {
            return true;
        }
        let placement = self
            .scope
            .child_toward(owner, self.block)
            .and_then(|child| self.scope.placement(child));
        matches!(placement, None | Some(Clause::Where)) || self.allowed.is_marked(c)
    }

    /// Judge the free references of a subquery nested in the analyzed block.
    ///
    /// In the SELECT list and HAVING a subquery that has tables of its own is
    /// left to its own analysis, which runs later and names the clause of the
    /// subquery the reference sits in. Table-less subqueries are never
    /// analyzed, so their references are judged here.
    fn visit_subquery(&self, sub: BlockId, out: &mut Classification) -> bool {
        let qb = self.stmt.block(sub);
        if self.purpose == Purpose::Reference && !qb.tables.is_empty() && !qb.synthetic {
            return true;
        }
        let mut allowed = true;
        let mut nested = Vec::new();
        for (_, expr) in qb.clause_exprs() {
            expr.for_each_column(&mut |c| {
                let Some(owner) = self.scope.owner(c.table) else {
                    return;
                };
                if owner == self.block || self.scope.is_ancestor(owner, self.block) {
                    allowed &= self.visit_column(c, out);
                }
            });
            expr.for_each_subquery(&mut |s| nested.push(s));
        }
        for s in nested {
            allowed &= self.visit_subquery(s, out);
        }
        allowed
    }
}
