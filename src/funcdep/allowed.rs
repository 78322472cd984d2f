//! Per-table bitsets of allowed column positions.
//!
//! One bitset per table, sized to the table's width when the run starts.
//! Bits are only ever set while a block is analyzed; [`AllowedSets::clear`]
//! runs once per table at the start of its owning block's analysis.

use std::collections::HashMap;

use bitvec::prelude::*;

use super::ir::{ColumnId, Statement, TableId};

#[derive(Debug, Clone, Default)]
pub struct AllowedSets {
    sets: HashMap<TableId, BitVec>,
}

impl AllowedSets {
    /// Allocate an empty bitset for every table of `stmt`.
    pub fn for_statement(stmt: &Statement) -> Self {
        let sets = stmt
            .table_ids()
            .map(|t| (t, bitvec![0; stmt.table(t).width()]))
            .collect();
        Self { sets }
    }

    pub fn clear(&mut self, table: TableId) {
        if let Some(bits) = self.sets.get_mut(&table) {
            bits.fill(false);
        }
    }

    /// Mark one column. Returns true if the bit was not set before.
    pub fn mark(&mut self, column: ColumnId) -> bool {
        match self.sets.get_mut(&column.table) {
            Some(bits) if (column.index as usize) < bits.len() => {
                !bits.replace(column.index as usize, true)
            }
            _ => false,
        }
    }

    /// Mark every column of `table`. Returns true if any bit changed.
    pub fn mark_all(&mut self, table: TableId) -> bool {
        match self.sets.get_mut(&table) {
            Some(bits) => {
                let changed = !bits.all();
                bits.fill(true);
                changed
            }
            None => false,
        }
    }

    pub fn is_marked(&self, column: ColumnId) -> bool {
        self.sets
            .get(&column.table)
            .and_then(|bits| bits.get(column.index as usize).map(|b| *b))
            .unwrap_or(false)
    }

    /// True when every column is marked. Zero-width tables count as full.
    pub fn is_fully_marked(&self, table: TableId) -> bool {
        self.sets.get(&table).is_some_and(|bits| bits.all())
    }

    pub fn is_partially_marked(&self, table: TableId) -> bool {
        self.sets.get(&table).is_some_and(|bits| bits.any())
    }

    pub fn marked_count(&self, table: TableId) -> usize {
        self.sets.get(&table).map_or(0, |bits| bits.count_ones())
    }

    /// Number of marked columns across `tables`.
    pub fn total_marked<'a>(&self, tables: impl IntoIterator<Item = &'a TableId>) -> usize {
        tables.into_iter().map(|t| self.marked_count(*t)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcdep::ir::{BlockKind, ColumnDef, DataType, TableRef};

    fn setup(width: usize) -> (AllowedSets, TableId) {
        let mut stmt = Statement::new();
        let q = stmt.add_block(BlockKind::Select, None);
        let cols = (0..width)
            .map(|i| ColumnDef::new(&format!("c{i}"), DataType::Int))
            .collect();
        let t = stmt.add_table(q, TableRef::new("t", cols));
        (AllowedSets::for_statement(&stmt), t)
    }

    #[test]
    fn test_mark_reports_change_once() {
        let (mut sets, t) = setup(3);
        let c = ColumnId::new(t, 1);
        assert!(sets.mark(c));
        assert!(!sets.mark(c));
        assert!(sets.is_marked(c));
        assert!(!sets.is_marked(ColumnId::new(t, 0)));
        assert!(sets.is_partially_marked(t));
        assert!(!sets.is_fully_marked(t));
    }

    #[test]
    fn test_mark_all_and_clear() {
        let (mut sets, t) = setup(4);
        assert!(sets.mark_all(t));
        assert!(!sets.mark_all(t));
        assert!(sets.is_fully_marked(t));
        assert_eq!(sets.marked_count(t), 4);
        sets.clear(t);
        assert!(!sets.is_partially_marked(t));
        assert_eq!(sets.marked_count(t), 0);
    }

    #[test]
    fn test_out_of_range_is_ignored() {
        let (mut sets, t) = setup(2);
        assert!(!sets.mark(ColumnId::new(t, 9)));
        assert!(!sets.is_marked(ColumnId::new(t, 9)));
        assert!(!sets.mark(ColumnId::new(TableId(42), 0)));
    }

    #[test]
    fn test_zero_width_table_is_full() {
        let (sets, t) = setup(0);
        assert!(sets.is_fully_marked(t));
        assert!(!sets.is_partially_marked(t));
    }
}
