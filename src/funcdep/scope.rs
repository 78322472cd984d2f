//! Block nesting lookups and subquery placements.
//!
//! [`Scope`] answers "which block owns this table" and "how is block X nested
//! in block O" for the classifier's outer-reference rule. It also holds the
//! clause each subquery block was written in, recorded by the tagger as the
//! enclosing block is analyzed.

use std::collections::HashMap;

use super::ir::{BlockId, Clause, Statement, TableId};

#[derive(Debug, Clone)]
pub struct Scope {
    owners: HashMap<TableId, BlockId>,
    outer: Vec<Option<BlockId>>,
    placements: HashMap<BlockId, Clause>,
}

impl Scope {
    pub fn new(stmt: &Statement) -> Self {
        let mut owners = HashMap::new();
        for b in stmt.block_ids() {
            for &t in &stmt.block(b).tables {
                owners.insert(t, b);
            }
        }
        let outer = stmt.block_ids().map(|b| stmt.block(b).outer).collect();
        Self {
            owners,
            outer,
            placements: HashMap::new(),
        }
    }

    pub fn owner(&self, table: TableId) -> Option<BlockId> {
        self.owners.get(&table).copied()
    }

    pub fn outer(&self, block: BlockId) -> Option<BlockId> {
        self.outer.get(block.index()).copied().flatten()
    }

    /// Whether `ancestor` strictly encloses `block`.
    pub fn is_ancestor(&self, ancestor: BlockId, block: BlockId) -> bool {
        self.child_toward(ancestor, block).is_some()
    }

    /// The block directly nested in `ancestor` on the chain leading down to
    /// `block`, or `None` if `ancestor` does not enclose `block`.
    pub fn child_toward(&self, ancestor: BlockId, block: BlockId) -> Option<BlockId> {
        let mut current = block;
        for _ in 0..self.outer.len() {
            let parent = self.outer(current)?;
            if parent == ancestor {
                return Some(current);
            }
            current = parent;
        }
        None
    }

    /// Record the clause `subquery` appears in within its enclosing block.
    /// The first placement wins if a block is reachable from two clauses.
    pub fn record_placement(&mut self, subquery: BlockId, clause: Clause) -> bool {
        if self.placements.contains_key(&subquery) {
            return false;
        }
        self.placements.insert(subquery, clause);
        true
    }

    pub fn placement(&self, subquery: BlockId) -> Option<Clause> {
        self.placements.get(&subquery).copied()
    }
}
