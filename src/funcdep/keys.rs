//! Whole-table promotion through keys and derived tables.
//!
//! A table whose PRIMARY or some UNIQUE key is fully allowed has every column
//! allowed: at most one row per group can match. A materialized derived table
//! was grouped by its own block, so any allowed column of it determines the
//! rest of its row.

use tracing::trace;

use super::allowed::AllowedSets;
use super::ir::{ColumnId, Statement, TableId, TableRef, UniqueKey};

/// Promotion state for one block's analysis.
#[derive(Debug, Clone)]
pub struct Propagator {
    tables: Vec<TableId>,
    /// Derived tables not promoted yet. Promoted ones are dropped.
    derived: Vec<TableId>,
    use_keys: bool,
}

impl Propagator {
    pub fn new(stmt: &Statement, tables: &[TableId], use_keys: bool) -> Self {
        let derived = tables
            .iter()
            .copied()
            .filter(|&t| stmt.table(t).is_derived())
            .collect();
        Self {
            tables: tables.to_vec(),
            derived,
            use_keys,
        }
    }

    pub fn pending_derived(&self) -> &[TableId] {
        &self.derived
    }

    /// Run both promotions once. Returns true if some table became fully
    /// allowed.
    pub fn propagate(&mut self, stmt: &Statement, allowed: &mut AllowedSets) -> bool {
        let by_key = self.use_keys && self.propagate_keys(stmt, allowed);
        let by_derived = self.propagate_derived(stmt, allowed);
        by_key || by_derived
    }

    /// Mark whole tables whose primary key, or first fully allowed unique
    /// key, is covered.
    fn propagate_keys(&self, stmt: &Statement, allowed: &mut AllowedSets) -> bool {
        let mut promoted = false;
        for &t in &self.tables {
            if allowed.is_fully_marked(t) {
                continue;
            }
            let table = stmt.table(t);
            if let Some(key) = covering_key(table, t, allowed) {
                trace!(table = table.display_name(), key = %key.name, "key covered");
                allowed.mark_all(t);
                promoted = true;
            }
        }
        promoted
    }

    fn propagate_derived(&mut self, stmt: &Statement, allowed: &mut AllowedSets) -> bool {
        let mut promoted = false;
        self.derived.retain(|&t| {
            if !allowed.is_partially_marked(t) {
                return true;
            }
            if allowed.mark_all(t) {
                trace!(table = stmt.table(t).display_name(), "derived table promoted");
                promoted = true;
            }
            false
        });
        promoted
    }
}

/// The primary key if fully allowed, else the first fully allowed unique key.
fn covering_key<'t>(
    table: &'t TableRef,
    id: TableId,
    allowed: &AllowedSets,
) -> Option<&'t UniqueKey> {
    let covered = |key: &UniqueKey| {
        key.columns
            .iter()
            .all(|&i| allowed.is_marked(ColumnId::new(id, i)))
    };
    table
        .primary_key
        .iter()
        .find(|pk| covered(pk))
        .or_else(|| table.unique_keys.iter().find(|k| covered(k)))
}
