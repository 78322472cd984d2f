//! Final check of the SELECT list and HAVING against the allowed sets.

use super::allowed::AllowedSets;
use super::classify::{Classifier, Purpose};
use super::ir::{BlockId, Clause, Expr, Statement};
use super::scope::Scope;
use crate::error::FdCheckError;

/// Fail on the first SELECT list item, then HAVING, that references a column
/// outside the allowed closure.
pub fn validate_block(
    stmt: &Statement,
    scope: &Scope,
    allowed: &AllowedSets,
    block: BlockId,
    group_exprs: &[Expr],
) -> Result<(), FdCheckError> {
    let cls = Classifier::new(stmt, scope, allowed, block, group_exprs, Purpose::Reference);
    let qb = stmt.block(block);
    let items = qb
        .select_list
        .iter()
        .map(|e| (Clause::SelectList, e))
        .chain(qb.having.iter().map(|e| (Clause::Having, e)));

    for (clause, expr) in items {
        let result = cls.classify(expr);
        if result.fully_allowed {
            continue;
        }
        let Some(c) = result.offending_column() else {
            return Err(FdCheckError::InternalError(format!(
                "{block}: {clause} expression '{}' rejected without a column",
                expr.to_sql(stmt)
            )));
        };
        return Err(FdCheckError::NonGroupingColumnUsed {
            column: stmt.qualified_name(c),
            clause,
        });
    }
    Ok(())
}
