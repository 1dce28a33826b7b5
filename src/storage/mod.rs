//! # Storage Engine Trait
//!
//! This is THE contract between leangraph and its relational substrate.
//! The core never touches a connection directly: the translator emits
//! parameterized SQL, the executor feeds it through this trait, and the
//! shaper reads the rows that come back.
//!
//! ## Implementations
//!
//! | Engine | Module | Description |
//! |--------|--------|-------------|
//! | `SqliteEngine` | `sqlite` | SQLite (bundled) with JSON1 and recursive CTEs |
//!
//! Any engine providing prepared parameterized statements, the two-table
//! schema with cascade foreign keys, the JSON function family
//! (`json_extract`, `json_set`, `json_each`, `json_group_array`,
//! `json_array`, `json_quote`), and recursive CTEs satisfies the contract.

pub mod sqlite;

pub use sqlite::SqliteEngine;

use crate::model::Value;
use crate::Result;

// ============================================================================
// Rows
// ============================================================================

/// A single row returned by the engine.
///
/// JSON-valued columns arrive as `Value::String`; the result shaper is the
/// single point where they are parsed back into structured values.
#[derive(Debug, Clone, Default)]
pub struct SqlRow {
    cells: Vec<(String, Value)>,
}

impl SqlRow {
    pub fn new(cells: Vec<(String, Value)>) -> Self {
        Self { cells }
    }

    /// Look up a cell by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    /// Cell by position.
    pub fn at(&self, index: usize) -> Option<&Value> {
        self.cells.get(index).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(c, _)| c.as_str())
    }
}

// ============================================================================
// StorageEngine trait
// ============================================================================

/// The relational substrate contract.
///
/// One engine instance backs one database handle; the engine serializes its
/// own statements, so `&self` methods are safe to call from the executor
/// without further locking.
pub trait StorageEngine: Send + 'static {
    /// Run a SELECT-shaped statement and collect all result rows.
    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>>;

    /// Run a write statement (INSERT/UPDATE/DELETE). Returns affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Open the query transaction. `BEGIN IMMEDIATE` semantics: the
    /// read-then-write window of MERGE must not lose updates.
    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;
}
