//! # leangraph — Embeddable Graph Database
//!
//! An openCypher subset executed against a relational storage engine whose
//! on-disk representation is a pair of tables (`nodes`, `edges`) with
//! JSON-valued property columns.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `StorageEngine` is the contract between the query
//!    pipeline and the relational substrate
//! 2. **Clean DTOs**: `Node`, `Relationship`, `Path`, `Value` cross all
//!    boundaries
//! 3. **Parser owns nothing**: Cypher → AST is a pure function
//! 4. **Translator owns the SQL**: AST → parameterized statements, no
//!    storage access, no interpolated literals
//! 5. **Executor owns the loop**: strategy classification, multi-phase
//!    row-sets, the transaction
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use leangraph::{Database, PropertyMap, Value};
//!
//! # fn example() -> leangraph::Result<()> {
//! let db = Database::open_memory()?;
//!
//! let mut params = PropertyMap::new();
//! params.insert("name".into(), Value::from("Ada"));
//! let result = db.execute("CREATE (n:Person {name: $name}) RETURN n", params)?;
//!
//! for row in &result.rows {
//!     println!("{:?}", row.get_value("n"));
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cypher;
pub mod execution;
pub mod model;
pub mod storage;
pub mod translate;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{Direction, EdgeId, Node, NodeId, Path, PropertyMap, Relationship, Value};

// ============================================================================
// Re-exports: Storage
// ============================================================================

pub use storage::{SqliteEngine, SqlRow, StorageEngine};

// ============================================================================
// Re-exports: Execution
// ============================================================================

pub use execution::{ExecutionStats, FromValue, QueryMeta, QueryResult, ResultRow};

use serde::{Deserialize, Serialize};

// ============================================================================
// Configuration
// ============================================================================

/// Tunables for one database handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Depth cap for unbounded variable-length paths (`[*]`).
    pub max_var_length_depth: u32,
    /// Multiplier applied to a query's LIMIT when pushing a row cutoff into
    /// variable-length recursion.
    pub var_length_fan_out: u32,
    /// Prepared-statement LRU capacity, keyed by SQL text.
    pub statement_cache_capacity: usize,
    /// Maximum parameter groups per multi-row INSERT in UNWIND-driven
    /// creates.
    pub unwind_batch_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_var_length_depth: 10,
            var_length_fan_out: 8,
            statement_cache_capacity: 256,
            unwind_batch_size: 500,
        }
    }
}

// ============================================================================
// Top-level Database handle
// ============================================================================

/// The primary entry point. A `Database` wraps a storage engine and
/// provides Cypher execution. One handle serializes its own queries;
/// separate handles proceed independently.
pub struct Database<E: StorageEngine = SqliteEngine> {
    engine: E,
    config: DatabaseConfig,
}

impl Database<SqliteEngine> {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::open_with_config(path, DatabaseConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<std::path::Path>,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let engine = SqliteEngine::open(path)?;
        engine.set_statement_cache_capacity(config.statement_cache_capacity);
        Ok(Self::with_engine_and_config(engine, config))
    }

    /// Open a private in-memory database, mostly for tests and embedding.
    pub fn open_memory() -> Result<Self> {
        Self::open_memory_with_config(DatabaseConfig::default())
    }

    pub fn open_memory_with_config(config: DatabaseConfig) -> Result<Self> {
        let engine = SqliteEngine::open_in_memory()?;
        engine.set_statement_cache_capacity(config.statement_cache_capacity);
        Ok(Self::with_engine_and_config(engine, config))
    }
}

impl<E: StorageEngine> Database<E> {
    /// Wrap an already-configured engine.
    pub fn with_engine_and_config(engine: E, config: DatabaseConfig) -> Self {
        Self { engine, config }
    }

    /// Execute a Cypher query with parameters.
    ///
    /// Runs under one engine transaction: commit on success, rollback on the
    /// first error. Works for reads and writes alike.
    pub fn execute<P>(&self, query: &str, params: P) -> Result<QueryResult>
    where
        P: Into<PropertyMap>,
    {
        execution::execute(&self.engine, &self.config, query, params.into())
    }

    /// Access the underlying engine (for advanced use).
    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed input at the character level.
    #[error("tokenize error at line {line}, column {column}: {message}")]
    Tokenize {
        position: usize,
        line: u32,
        column: u32,
        message: String,
    },

    /// The parser halted at its first unexpected token.
    #[error("syntax error at line {line}, column {column}: {message}")]
    Syntax {
        position: usize,
        line: u32,
        column: u32,
        message: String,
    },

    /// The construct parses but the translator cannot express it.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Unknown variables, type mismatches, bad aggregation grouping,
    /// DELETE-without-DETACH on a connected node.
    #[error("semantic error: {0}")]
    Semantic(String),

    /// The engine rejected a statement.
    #[error("storage error: {message}")]
    Storage {
        message: String,
        /// Index of the failing statement within the executed plan.
        statement_index: Option<usize>,
    },

    /// A bug; callers should treat this as fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Source position, when the error carries one.
    pub fn position(&self) -> Option<(usize, u32, u32)> {
        match self {
            Error::Tokenize { position, line, column, .. }
            | Error::Syntax { position, line, column, .. } => Some((*position, *line, *column)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
