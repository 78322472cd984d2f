//! Records which clause each subquery of a block was written in.
//!
//! Whether a subquery may reference a non-grouping column of its enclosing
//! block depends on that clause: anything goes in WHERE, only allowed columns
//! in the SELECT list and HAVING. GROUP BY subqueries are left untagged.

use tracing::trace;

use super::ir::{BlockId, Clause, Statement};
use super::scope::Scope;

/// Tag every subquery directly contained in `block`. Returns the number of
/// subqueries newly tagged.
pub fn tag_subqueries(stmt: &Statement, scope: &mut Scope, block: BlockId) -> usize {
    let qb = stmt.block(block);
    let mut tagged = 0;
    let mut tag = |clause: Clause, sub: BlockId| {
        if scope.record_placement(sub, clause) {
            trace!(%block, subquery = %sub, %clause, "tagged subquery");
            tagged += 1;
        }
    };
    for expr in &qb.select_list {
        expr.for_each_subquery(&mut |sub| tag(Clause::SelectList, sub));
    }
    if let Some(cond) = &qb.where_clause {
        cond.for_each_subquery(&mut |sub| tag(Clause::Where, sub));
    }
    if let Some(having) = &qb.having {
        having.for_each_subquery(&mut |sub| tag(Clause::Having, sub));
    }
    tagged
}
