//! Query-block representation consumed by the GROUP BY check.
//!
//! The parser and name resolver (outside this crate) lower a statement into a
//! [`Statement`]: an arena of [`QueryBlock`]s and the [`TableRef`]s they read
//! from. Blocks and tables are addressed by index newtypes, so the enclosing
//! block link ([`QueryBlock::outer`]) is a plain lookup and never an owner.
//!
//! The analysis only reads this structure. All mutable working state (allowed
//! bitsets, subquery placements) lives in the per-run context in
//! [`super::FuncDepAnalysis`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FdCheckError;

// ── Identifiers ────────────────────────────────────────────────────────────

/// Index of a [`QueryBlock`] inside its [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Blocks are numbered from 1 in diagnostics, like `EXPLAIN` does.
impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select#{}", self.0 + 1)
    }
}

/// Index of a [`TableRef`] inside its [`Statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

impl TableId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A column: owning table plus its ordinal position in that table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnId {
    pub table: TableId,
    pub index: u32,
}

impl ColumnId {
    pub fn new(table: TableId, index: u32) -> Self {
        Self { table, index }
    }
}

// ── Types ──────────────────────────────────────────────────────────────────

/// Declared type of a column, literal, or function result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int,
    BigInt,
    Decimal,
    Double,
    Text,
    Date,
    Timestamp,
}

impl DataType {
    /// The comparison class values of this type are compared in.
    pub fn compare_type(self) -> CompareType {
        match self {
            DataType::Bool | DataType::Int | DataType::BigInt => CompareType::Int,
            DataType::Decimal => CompareType::Decimal,
            DataType::Double => CompareType::Real,
            DataType::Text => CompareType::String,
            DataType::Date | DataType::Timestamp => CompareType::Temporal,
        }
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            DataType::Bool => "BOOLEAN",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::Decimal => "DECIMAL",
            DataType::Double => "DOUBLE",
            DataType::Text => "TEXT",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
        }
    }
}

/// Comparison class of an equality.
///
/// An equality whose two sides fall into different classes converts one side
/// before comparing. After such a conversion the compared value is no longer
/// the column itself, so no dependency may be read off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareType {
    Int,
    Decimal,
    Real,
    String,
    Temporal,
}

impl CompareType {
    /// The class an equality between `a` and `b` is evaluated in.
    pub fn aggregate(a: CompareType, b: CompareType) -> CompareType {
        use CompareType::*;
        match (a, b) {
            (x, y) if x == y => x,
            (Int, Decimal) | (Decimal, Int) => Decimal,
            (Temporal, String) | (String, Temporal) => Temporal,
            _ => Real,
        }
    }
}

/// Function volatility, ordered from least to most volatile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Same arguments always give the same result.
    Immutable,
    /// Same result for the same arguments within one statement.
    Stable,
    /// May return a different value on every call (`RAND()`, `UUID()`).
    Volatile,
}

impl Volatility {
    /// Returns the worse (more volatile) of two classes.
    pub fn max(self, other: Volatility) -> Volatility {
        std::cmp::max(self, other)
    }

    /// Whether the function can appear on the provable side of a dependency.
    pub fn is_deterministic(self) -> bool {
        self != Volatility::Volatile
    }
}

/// Aggregate function kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggFunc {
    Count,
    CountStar,
    Sum,
    Avg,
    Min,
    Max,
    BitAnd,
    BitOr,
    BitXor,
    GroupConcat,
    Std,
    Variance,
}

impl AggFunc {
    /// Name of the aggregate function for SQL rendering.
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggFunc::Count | AggFunc::CountStar => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
            AggFunc::BitAnd => "BIT_AND",
            AggFunc::BitOr => "BIT_OR",
            AggFunc::BitXor => "BIT_XOR",
            AggFunc::GroupConcat => "GROUP_CONCAT",
            AggFunc::Std => "STD",
            AggFunc::Variance => "VARIANCE",
        }
    }
}

/// The clause of a query block an expression (or subquery) was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clause {
    SelectList,
    Where,
    Having,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::SelectList => write!(f, "SELECT list"),
            Clause::Where => write!(f, "WHERE"),
            Clause::Having => write!(f, "HAVING"),
        }
    }
}

// ── Expressions ────────────────────────────────────────────────────────────

/// A resolved SQL expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// A resolved column reference.
    Column(ColumnId),
    /// A constant, kept as SQL text.
    Literal { value: String, data_type: DataType },
    /// A scalar function or operator call (`+`, `<`, `OR`, `COALESCE`, ...).
    Func {
        name: String,
        args: Vec<Expr>,
        volatility: Volatility,
        returns: DataType,
    },
    /// `left = right`, compared as `compare_as`.
    Eq {
        left: Box<Expr>,
        right: Box<Expr>,
        compare_as: CompareType,
    },
    /// Conjunction of predicates.
    And(Vec<Expr>),
    /// A scalar, `IN` or `EXISTS` subquery; the block is nested in the
    /// block holding this expression.
    Subquery(BlockId),
    /// An aggregate call.
    Aggregate { func: AggFunc, args: Vec<Expr> },
}

impl Expr {
    pub fn column(c: ColumnId) -> Expr {
        Expr::Column(c)
    }

    pub fn int(value: i64) -> Expr {
        Expr::Literal {
            value: value.to_string(),
            data_type: DataType::Int,
        }
    }

    pub fn text(value: &str) -> Expr {
        Expr::Literal {
            value: format!("'{}'", value.replace('\'', "''")),
            data_type: DataType::Text,
        }
    }

    /// A deterministic function call.
    pub fn func(name: &str, args: Vec<Expr>, returns: DataType) -> Expr {
        Expr::Func {
            name: name.to_string(),
            args,
            volatility: Volatility::Immutable,
            returns,
        }
    }

    /// A non-deterministic function call.
    pub fn volatile(name: &str, args: Vec<Expr>, returns: DataType) -> Expr {
        Expr::Func {
            name: name.to_string(),
            args,
            volatility: Volatility::Volatile,
            returns,
        }
    }

    pub fn aggregate(func: AggFunc, args: Vec<Expr>) -> Expr {
        Expr::Aggregate { func, args }
    }

    pub fn and(children: Vec<Expr>) -> Expr {
        Expr::And(children)
    }

    /// The column, if this expression is a bare column reference.
    pub fn as_column(&self) -> Option<ColumnId> {
        match self {
            Expr::Column(c) => Some(*c),
            _ => None,
        }
    }

    /// Whether this expression is, or contains, a non-deterministic call.
    ///
    /// Subquery bodies are not inspected: an uncorrelated subquery is
    /// evaluated once per statement.
    pub fn contains_volatile(&self) -> bool {
        match self {
            Expr::Func {
                args, volatility, ..
            } => !volatility.is_deterministic() || args.iter().any(Expr::contains_volatile),
            Expr::Eq { left, right, .. } => left.contains_volatile() || right.contains_volatile(),
            Expr::And(children) => children.iter().any(Expr::contains_volatile),
            Expr::Aggregate { args, .. } => args.iter().any(Expr::contains_volatile),
            Expr::Column(_) | Expr::Literal { .. } | Expr::Subquery(_) => false,
        }
    }

    /// Call `f` for every subquery directly contained in this expression.
    ///
    /// Does not descend into the subquery blocks themselves.
    pub fn for_each_subquery(&self, f: &mut impl FnMut(BlockId)) {
        match self {
            Expr::Subquery(b) => f(*b),
            Expr::Func { args, .. } | Expr::Aggregate { args, .. } => {
                for arg in args {
                    arg.for_each_subquery(f);
                }
            }
            Expr::Eq { left, right, .. } => {
                left.for_each_subquery(f);
                right.for_each_subquery(f);
            }
            Expr::And(children) => {
                for child in children {
                    child.for_each_subquery(f);
                }
            }
            Expr::Column(_) | Expr::Literal { .. } => {}
        }
    }

    /// Call `f` for every column referenced by this expression, including
    /// inside aggregates but not inside subquery blocks.
    pub fn for_each_column(&self, f: &mut impl FnMut(ColumnId)) {
        match self {
            Expr::Column(c) => f(*c),
            Expr::Func { args, .. } | Expr::Aggregate { args, .. } => {
                for arg in args {
                    arg.for_each_column(f);
                }
            }
            Expr::Eq { left, right, .. } => {
                left.for_each_column(f);
                right.for_each_column(f);
            }
            Expr::And(children) => {
                for child in children {
                    child.for_each_column(f);
                }
            }
            Expr::Literal { .. } | Expr::Subquery(_) => {}
        }
    }

    /// The comparison class this expression's value is compared in.
    pub fn comparison_type(&self, stmt: &Statement) -> CompareType {
        match self {
            Expr::Column(c) => stmt
                .column_def(*c)
                .map(|def| def.data_type.compare_type())
                .unwrap_or(CompareType::String),
            Expr::Literal { data_type, .. } => data_type.compare_type(),
            Expr::Func { returns, .. } => returns.compare_type(),
            Expr::Eq { .. } | Expr::And(_) => CompareType::Int,
            Expr::Subquery(b) => stmt
                .get_block(*b)
                .and_then(|block| block.select_list.first())
                .map(|first| first.comparison_type(stmt))
                .unwrap_or(CompareType::String),
            Expr::Aggregate { func, args } => match func {
                AggFunc::Count
                | AggFunc::CountStar
                | AggFunc::BitAnd
                | AggFunc::BitOr
                | AggFunc::BitXor => CompareType::Int,
                AggFunc::Avg => CompareType::Decimal,
                AggFunc::Std | AggFunc::Variance => CompareType::Real,
                AggFunc::GroupConcat => CompareType::String,
                AggFunc::Sum | AggFunc::Min | AggFunc::Max => args
                    .first()
                    .map(|a| a.comparison_type(stmt))
                    .unwrap_or(CompareType::Int),
            },
        }
    }

    /// Render the expression as SQL text, for logs and diagnostics.
    pub fn to_sql(&self, stmt: &Statement) -> String {
        match self {
            Expr::Column(c) => stmt.qualified_name(*c),
            Expr::Literal { value, .. } => value.clone(),
            Expr::Func { name, args, .. } => {
                let arg_strs: Vec<String> = args.iter().map(|a| a.to_sql(stmt)).collect();
                if args.len() == 2 && !name.chars().any(|ch| ch.is_ascii_alphanumeric()) {
                    format!("({} {name} {})", arg_strs[0], arg_strs[1])
                } else {
                    format!("{name}({})", arg_strs.join(", "))
                }
            }
            Expr::Eq { left, right, .. } => {
                format!("{} = {}", left.to_sql(stmt), right.to_sql(stmt))
            }
            Expr::And(children) => children
                .iter()
                .map(|c| c.to_sql(stmt))
                .collect::<Vec<_>>()
                .join(" AND "),
            Expr::Subquery(b) => format!("(subquery {b})"),
            Expr::Aggregate { func, args } => match func {
                AggFunc::CountStar => "COUNT(*)".to_string(),
                _ => {
                    let arg_strs: Vec<String> = args.iter().map(|a| a.to_sql(stmt)).collect();
                    format!("{}({})", func.sql_name(), arg_strs.join(", "))
                }
            },
        }
    }
}

// ── Tables ─────────────────────────────────────────────────────────────────

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
        }
    }
}

/// A PRIMARY KEY or UNIQUE constraint, as column positions of its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueKey {
    pub name: String,
    pub columns: Vec<u32>,
}

/// A source of a query block: a base table or a materialized derived table
/// (derived table or view computed by its own query block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRef {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub primary_key: Option<UniqueKey>,
    /// UNIQUE constraints, in declaration order.
    #[serde(default)]
    pub unique_keys: Vec<UniqueKey>,
    /// The block computing this table's rows, for materialized derived tables.
    #[serde(default)]
    pub derived_from: Option<BlockId>,
}

impl TableRef {
    pub fn new(name: &str, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
            columns,
            primary_key: None,
            unique_keys: Vec::new(),
            derived_from: None,
        }
    }

    /// A materialized derived table whose rows are produced by `block`.
    pub fn derived(alias: &str, block: BlockId, columns: Vec<ColumnDef>) -> Self {
        Self {
            derived_from: Some(block),
            ..Self::new(alias, columns)
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn with_primary_key(mut self, columns: impl IntoIterator<Item = u32>) -> Self {
        self.primary_key = Some(UniqueKey {
            name: "PRIMARY".to_string(),
            columns: columns.into_iter().collect(),
        });
        self
    }

    pub fn with_unique_key(mut self, name: &str, columns: impl IntoIterator<Item = u32>) -> Self {
        self.unique_keys.push(UniqueKey {
            name: name.to_string(),
            columns: columns.into_iter().collect(),
        });
        self
    }

    /// The name the table is referred to by in the query.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_derived(&self) -> bool {
        self.derived_from.is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<u32> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .map(|i| i as u32)
    }
}

// ── Query blocks ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Select,
    /// The top level of an UPDATE or DELETE. Its tables are assignment
    /// targets and may be referenced freely by nested subqueries.
    Update,
}

/// One SELECT scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryBlock {
    pub kind: BlockKind,
    #[serde(default)]
    pub select_list: Vec<Expr>,
    #[serde(default)]
    pub where_clause: Option<Expr>,
    #[serde(default)]
    pub having: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    #[serde(default)]
    pub tables: Vec<TableId>,
    /// Enclosing block, for subqueries and derived tables.
    #[serde(default)]
    pub outer: Option<BlockId>,
    /// Placeholder block (e.g. the fake SELECT of a UNION); never checked.
    #[serde(default)]
    pub synthetic: bool,
}

impl QueryBlock {
    pub fn new(kind: BlockKind, outer: Option<BlockId>) -> Self {
        Self {
            kind,
            select_list: Vec::new(),
            where_clause: None,
            having: None,
            group_by: Vec::new(),
            tables: Vec::new(),
            outer,
            synthetic: false,
        }
    }

    /// Whether rows are collapsed into groups in this block.
    pub fn is_aggregating(&self) -> bool {
        self.kind == BlockKind::Select && (!self.group_by.is_empty() || self.having.is_some())
    }

    /// Every expression of the block paired with its clause. GROUP BY
    /// entries are reported as part of the SELECT list.
    pub fn clause_exprs(&self) -> impl Iterator<Item = (Clause, &Expr)> {
        self.select_list
            .iter()
            .chain(self.group_by.iter())
            .map(|e| (Clause::SelectList, e))
            .chain(self.where_clause.iter().map(|e| (Clause::Where, e)))
            .chain(self.having.iter().map(|e| (Clause::Having, e)))
    }
}

// ── Statement ──────────────────────────────────────────────────────────────

/// All query blocks and source tables of one SQL statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    blocks: Vec<QueryBlock>,
    tables: Vec<TableRef>,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, FdCheckError> {
        let stmt: Statement = serde_json::from_str(json)
            .map_err(|e| FdCheckError::InvalidArgument(format!("invalid statement: {e}")))?;
        stmt.validate()?;
        Ok(stmt)
    }

    pub fn to_json(&self) -> Result<String, FdCheckError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| FdCheckError::InternalError(format!("statement serialization: {e}")))
    }

    /// Add an empty block nested in `outer`.
    pub fn add_block(&mut self, kind: BlockKind, outer: Option<BlockId>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(QueryBlock::new(kind, outer));
        id
    }

    /// Add `table` to the FROM list of `block`.
    ///
    /// Panics if `block` does not belong to this statement.
    pub fn add_table(&mut self, block: BlockId, table: TableRef) -> TableId {
        let id = TableId(self.tables.len() as u32);
        self.tables.push(table);
        self.blocks[block.index()].tables.push(id);
        id
    }

    /// Panics if `id` does not belong to this statement.
    pub fn block(&self, id: BlockId) -> &QueryBlock {
        &self.blocks[id.index()]
    }

    /// Panics if `id` does not belong to this statement.
    pub fn block_mut(&mut self, id: BlockId) -> &mut QueryBlock {
        &mut self.blocks[id.index()]
    }

    pub fn get_block(&self, id: BlockId) -> Option<&QueryBlock> {
        self.blocks.get(id.index())
    }

    /// Panics if `id` does not belong to this statement.
    pub fn table(&self, id: TableId) -> &TableRef {
        &self.tables[id.index()]
    }

    pub fn get_table(&self, id: TableId) -> Option<&TableRef> {
        self.tables.get(id.index())
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn table_ids(&self) -> impl Iterator<Item = TableId> + '_ {
        (0..self.tables.len() as u32).map(TableId)
    }

    /// Resolve `name` within `table`.
    pub fn column(&self, table: TableId, name: &str) -> Option<ColumnId> {
        self.get_table(table)?
            .column_index(name)
            .map(|index| ColumnId::new(table, index))
    }

    pub fn column_def(&self, c: ColumnId) -> Option<&ColumnDef> {
        self.get_table(c.table)?.columns.get(c.index as usize)
    }

    /// `table.column`, the name diagnostics use.
    pub fn qualified_name(&self, c: ColumnId) -> String {
        match (self.get_table(c.table), self.column_def(c)) {
            (Some(t), Some(def)) => format!("{}.{}", t.display_name(), def.name),
            _ => format!("<table {}>.<column {}>", c.table.0, c.index),
        }
    }

    /// Build `left = right` with the comparison class the two sides
    /// aggregate to.
    pub fn equality(&self, left: Expr, right: Expr) -> Expr {
        let compare_as =
            CompareType::aggregate(left.comparison_type(self), right.comparison_type(self));
        Expr::Eq {
            left: Box::new(left),
            right: Box::new(right),
            compare_as,
        }
    }

    /// Check that all ids resolve and that blocks form a tree.
    pub fn validate(&self) -> Result<(), FdCheckError> {
        let mut listed: HashSet<TableId> = HashSet::new();
        for id in self.block_ids() {
            let block = self.block(id);
            if let Some(outer) = block.outer
                && self.get_block(outer).is_none()
            {
                return Err(FdCheckError::InvalidArgument(format!(
                    "{id}: enclosing block {outer} does not exist"
                )));
            }
            for &t in &block.tables {
                let Some(table) = self.get_table(t) else {
                    return Err(FdCheckError::InvalidArgument(format!(
                        "{id}: table #{} does not exist",
                        t.0
                    )));
                };
                if !listed.insert(t) {
                    return Err(FdCheckError::InvalidArgument(format!(
                        "table '{}' is listed in more than one block",
                        table.display_name()
                    )));
                }
            }
            for (_, expr) in block.clause_exprs() {
                self.validate_expr(id, expr)?;
            }
        }

        for id in self.block_ids() {
            self.validate_outer_chain(id)?;
        }

        for t in self.table_ids() {
            let table = self.table(t);
            if let Some(block) = table.derived_from
                && self.get_block(block).is_none()
            {
                return Err(FdCheckError::InvalidArgument(format!(
                    "derived table '{}' refers to missing block {block}",
                    table.display_name()
                )));
            }
            for key in table.primary_key.iter().chain(&table.unique_keys) {
                if let Some(&bad) = key.columns.iter().find(|&&i| i as usize >= table.width()) {
                    return Err(FdCheckError::InvalidArgument(format!(
                        "key '{}' of '{}' refers to column #{bad} of {}",
                        key.name,
                        table.display_name(),
                        table.width()
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_expr(&self, owner: BlockId, expr: &Expr) -> Result<(), FdCheckError> {
        let mut result = Ok(());
        expr.for_each_column(&mut |c| {
            if result.is_ok() && self.column_def(c).is_none() {
                result = Err(FdCheckError::InvalidArgument(format!(
                    "{owner}: column #{} of table #{} does not exist",
                    c.index, c.table.0
                )));
            }
        });
        if result.is_err() {
            return result;
        }
        expr.for_each_subquery(&mut |b| {
            if result.is_err() {
                return;
            }
            match self.get_block(b) {
                Some(inner) if inner.outer == Some(owner) => {}
                Some(_) => {
                    result = Err(FdCheckError::InvalidArgument(format!(
                        "subquery {b} used in {owner} is not nested in it"
                    )))
                }
                None => {
                    result = Err(FdCheckError::InvalidArgument(format!(
                        "{owner}: subquery {b} does not exist"
                    )))
                }
            }
        });
        result
    }

    fn validate_outer_chain(&self, start: BlockId) -> Result<(), FdCheckError> {
        let mut current = self.block(start).outer;
        let mut steps = 0;
        while let Some(b) = current {
            steps += 1;
            if b == start || steps > self.blocks.len() {
                return Err(FdCheckError::InvalidArgument(format!(
                    "{start} is nested in itself"
                )));
            }
            current = self.block(b).outer;
        }
        Ok(())
    }
}
