//! Query-block dependency DAG, topological sort, and cycle detection.
//!
//! The analysis of one block reads state produced by the analysis of others:
//!
//! - A block using a materialized derived table relies on the block that
//!   defines it having been checked (its rows are unique per its own
//!   grouping key).
//! - An expression subquery judges references to its enclosing block
//!   against that block's final allowed set.
//!
//! Both relations become edges here, and blocks are analyzed in topological
//! order. Among ready blocks the lowest block number runs first, so the order
//! is deterministic.
//!
//! # Prior Art
//!
//! Topological sort and cycle detection use Kahn's algorithm:
//! - Kahn, A.B. (1962). "Topological sorting of large networks."
//!   Communications of the ACM, 5(11), 558–562.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::FdCheckError;
use crate::funcdep::ir::{BlockId, Statement};

/// Why one block has to be analyzed before another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// The source block defines a derived table the target reads from.
    DerivedTable,
    /// The target is a subquery in an expression of the source block.
    Subquery,
}

/// In-memory dependency graph of the blocks of one statement.
#[derive(Debug, Clone, Default)]
pub struct BlockDag {
    /// Forward edges: block → blocks that must run after it.
    edges: BTreeMap<BlockId, Vec<(BlockId, EdgeKind)>>,
    /// Reverse edges: block → blocks that must run before it.
    reverse_edges: BTreeMap<BlockId, Vec<BlockId>>,
    /// All block IDs in the graph.
    all_nodes: BTreeSet<BlockId>,
}

impl BlockDag {
    /// Create an empty DAG.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the DAG for every block of `stmt`.
    pub fn from_statement(stmt: &Statement) -> Self {
        let mut dag = BlockDag::new();
        for b in stmt.block_ids() {
            dag.add_node(b);
        }
        for user in stmt.block_ids() {
            let qb = stmt.block(user);
            for &t in &qb.tables {
                if let Some(definer) = stmt.table(t).derived_from {
                    dag.add_edge(definer, user, EdgeKind::DerivedTable);
                }
            }
            for (_, expr) in qb.clause_exprs() {
                expr.for_each_subquery(&mut |sub| dag.add_edge(user, sub, EdgeKind::Subquery));
            }
        }
        dag
    }

    pub fn add_node(&mut self, block: BlockId) {
        self.all_nodes.insert(block);
    }

    /// Add an edge: `before` is analyzed before `after`. Duplicate edges are
    /// ignored.
    pub fn add_edge(&mut self, before: BlockId, after: BlockId, kind: EdgeKind) {
        self.all_nodes.insert(before);
        self.all_nodes.insert(after);
        let downstream = self.edges.entry(before).or_default();
        if downstream.iter().any(|&(b, _)| b == after) {
            return;
        }
        downstream.push((after, kind));
        self.reverse_edges.entry(after).or_default().push(before);
    }

    /// Blocks that must be analyzed before `block`.
    pub fn get_upstream(&self, block: BlockId) -> Vec<BlockId> {
        self.reverse_edges.get(&block).cloned().unwrap_or_default()
    }

    /// Blocks that must be analyzed after `block`, with the reason.
    pub fn get_downstream(&self, block: BlockId) -> Vec<(BlockId, EdgeKind)> {
        self.edges.get(&block).cloned().unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.all_nodes.len()
    }

    /// Detect cycles using Kahn's algorithm (BFS topological sort).
    ///
    /// Returns `Ok(())` if the graph is acyclic, or `Err(CycleDetected)` with
    /// the names of the blocks that could not be ordered.
    pub fn detect_cycles(&self) -> Result<(), FdCheckError> {
        self.topological_order().map(|_| ())
    }

    /// Return every block in analysis order.
    pub fn topological_order(&self) -> Result<Vec<BlockId>, FdCheckError> {
        let order = self.topological_sort_inner();
        if order.len() < self.all_nodes.len() {
            let processed: HashSet<_> = order.into_iter().collect();
            let cycle_nodes: Vec<String> = self
                .all_nodes
                .iter()
                .filter(|b| !processed.contains(b))
                .map(|b| b.to_string())
                .collect();
            return Err(FdCheckError::CycleDetected(cycle_nodes));
        }
        Ok(order)
    }

    fn topological_sort_inner(&self) -> Vec<BlockId> {
        let mut in_degree: BTreeMap<BlockId, usize> =
            self.all_nodes.iter().map(|&b| (b, 0)).collect();
        for targets in self.edges.values() {
            for &(target, _) in targets {
                *in_degree.entry(target).or_insert(0) += 1;
            }
        }

        let mut ready: BTreeSet<BlockId> = in_degree
            .iter()
            .filter(|&(_, deg)| *deg == 0)
            .map(|(&b, _)| b)
            .collect();

        let mut result = Vec::with_capacity(self.all_nodes.len());
        while let Some(block) = ready.pop_first() {
            result.push(block);
            if let Some(downstream) = self.edges.get(&block) {
                for &(d, _) in downstream {
                    if let Some(deg) = in_degree.get_mut(&d) {
                        *deg -= 1;
                        if *deg == 0 {
                            ready.insert(d);
                        }
                    }
                }
            }
        }
        result
    }
}
