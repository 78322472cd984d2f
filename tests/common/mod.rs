//! Shared helpers for integration tests: statement builders and log capture.

#![allow(dead_code)]

use fdcheck::funcdep::ir::{
    BlockId, BlockKind, Clause, ColumnDef, DataType, Expr, Statement, TableId, TableRef,
};
use fdcheck::{AnalysisReport, CheckConfig, FdCheckError, check_statement};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once. Set `RUST_LOG=fdcheck=trace` to
/// see the fixed point while debugging a test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn int_cols(names: &[&str]) -> Vec<ColumnDef> {
    names.iter().map(|n| ColumnDef::new(n, DataType::Int)).collect()
}

/// Small builder over [`Statement`] that resolves columns by name.
pub struct Query {
    pub stmt: Statement,
}

impl Query {
    pub fn new() -> Self {
        Self {
            stmt: Statement::new(),
        }
    }

    pub fn select(&mut self, outer: Option<BlockId>) -> BlockId {
        self.stmt.add_block(BlockKind::Select, outer)
    }

    pub fn update(&mut self) -> BlockId {
        self.stmt.add_block(BlockKind::Update, None)
    }

    pub fn table(&mut self, block: BlockId, table: TableRef) -> TableId {
        self.stmt.add_table(block, table)
    }

    /// Panics if `name` is not a column of `table`.
    pub fn col(&self, table: TableId, name: &str) -> Expr {
        let c = self
            .stmt
            .column(table, name)
            .unwrap_or_else(|| panic!("no column {name} in table #{}", table.0));
        Expr::column(c)
    }

    pub fn eq(&self, left: Expr, right: Expr) -> Expr {
        self.stmt.equality(left, right)
    }

    pub fn group_by(&mut self, block: BlockId, exprs: Vec<Expr>) {
        self.stmt.block_mut(block).group_by = exprs;
    }

    pub fn select_list(&mut self, block: BlockId, exprs: Vec<Expr>) {
        self.stmt.block_mut(block).select_list = exprs;
    }

    pub fn where_(&mut self, block: BlockId, cond: Expr) {
        self.stmt.block_mut(block).where_clause = Some(cond);
    }

    pub fn having(&mut self, block: BlockId, cond: Expr) {
        self.stmt.block_mut(block).having = Some(cond);
    }

    pub fn check(&self) -> Result<AnalysisReport, FdCheckError> {
        init_tracing();
        check_statement(&self.stmt, &CheckConfig::default())
    }

    pub fn check_with(&self, config: &CheckConfig) -> Result<AnalysisReport, FdCheckError> {
        init_tracing();
        check_statement(&self.stmt, config)
    }
}

pub fn plus(left: Expr, right: Expr) -> Expr {
    Expr::func("+", vec![left, right], DataType::Int)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    Expr::func(">", vec![left, right], DataType::Bool)
}

/// Assert that `result` is a `NonGroupingColumnUsed` for `column` in `clause`.
pub fn assert_rejected(result: Result<AnalysisReport, FdCheckError>, column: &str, clause: Clause) {
    match result {
        Err(FdCheckError::NonGroupingColumnUsed {
            column: got,
            clause: got_clause,
        }) => {
            assert_eq!(got, column);
            assert_eq!(got_clause, clause);
        }
        Err(other) => panic!("expected a non-grouping error for {column}, got {other}"),
        Ok(_) => panic!("expected {column} to be rejected in {clause}"),
    }
}
