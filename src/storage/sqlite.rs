//! SQLite storage engine.
//!
//! Owns the two-table schema and the connection. JSON1, recursive CTEs, and
//! `ON DELETE CASCADE` foreign keys cover the full substrate contract.

use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, ToSql};

use super::{SqlRow, StorageEngine};
use crate::model::Value;
use crate::{Error, Result};

/// Fixed on-disk representation: nodes and edges with JSON property columns.
///
/// Deleting a node cascades to its incident edges — the referential-integrity
/// rule the language semantics depend on.
const SCHEMA: &str = "
PRAGMA foreign_keys = ON;
PRAGMA case_sensitive_like = ON;

CREATE TABLE IF NOT EXISTS nodes (
    id          TEXT PRIMARY KEY,
    label       TEXT NOT NULL,
    properties  TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS edges (
    id          TEXT PRIMARY KEY,
    type        TEXT NOT NULL,
    source_id   TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_id   TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    properties  TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
CREATE INDEX IF NOT EXISTS idx_edges_type   ON edges(type);
CREATE INDEX IF NOT EXISTS idx_nodes_first_label ON nodes(json_extract(label, '$[0]'));
";

/// SQLite-backed engine. One per database handle; the handle serializes its
/// queries through the mutex.
pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory_with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        register_scalar_functions(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Resize the prepared-statement LRU (keyed by SQL text).
    pub fn set_statement_cache_capacity(&self, capacity: usize) {
        self.conn.lock().set_prepared_statement_cache_capacity(capacity);
    }
}

impl StorageEngine for SqliteEngine {
    fn run(&self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>> {
        tracing::trace!(sql, params = params.len(), "engine run");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let bound = bind_params(params)?;
        let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p as &dyn ToSql).collect();
        let mut rows = stmt.query(refs.as_slice())?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                cells.push((name.clone(), read_cell(row.get_ref(i)?)?));
            }
            out.push(SqlRow::new(cells));
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        tracing::trace!(sql, params = params.len(), "engine execute");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let bound = bind_params(params)?;
        let refs: Vec<&dyn ToSql> = bound.iter().map(|p| p as &dyn ToSql).collect();
        Ok(stmt.execute(refs.as_slice())?)
    }

    fn begin(&self) -> Result<()> {
        self.conn.lock().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.conn.lock().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.conn.lock().execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage {
            message: err.to_string(),
            statement_index: None,
        }
    }
}

// ============================================================================
// Parameter binding
// ============================================================================

/// A parameter in the form SQLite accepts. Lists and maps cross the boundary
/// as JSON text so `json_each(?)` / `json(?)` can consume them.
enum BoundParam {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl ToSql for BoundParam {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::ToSqlOutput;
        Ok(match self {
            BoundParam::Null => ToSqlOutput::from(rusqlite::types::Null),
            BoundParam::Int(i) => ToSqlOutput::from(*i),
            BoundParam::Float(f) => ToSqlOutput::from(*f),
            BoundParam::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

fn bind_params(params: &[Value]) -> Result<Vec<BoundParam>> {
    params.iter().map(bind_param).collect()
}

fn bind_param(value: &Value) -> Result<BoundParam> {
    Ok(match value {
        Value::Null => BoundParam::Null,
        Value::Bool(b) => BoundParam::Int(*b as i64),
        Value::Int(i) => BoundParam::Int(*i),
        Value::Float(f) => BoundParam::Float(*f),
        Value::String(s) => BoundParam::Text(s.clone()),
        Value::List(_) | Value::Map(_) => BoundParam::Text(value.to_json().to_string()),
        other => {
            return Err(Error::Internal(format!(
                "{} cannot be bound as a statement parameter",
                other.type_name()
            )));
        }
    })
}

fn read_cell(cell: ValueRef<'_>) -> Result<Value> {
    Ok(match cell {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::String(
            std::str::from_utf8(bytes)
                .map_err(|e| Error::Storage {
                    message: format!("non-UTF-8 text column: {e}"),
                    statement_index: None,
                })?
                .to_owned(),
        ),
        ValueRef::Blob(_) => {
            return Err(Error::Storage {
                message: "unexpected BLOB column".into(),
                statement_index: None,
            });
        }
    })
}

// ============================================================================
// Scalar helpers
// ============================================================================

/// String/list helpers SQLite lacks natively. All deterministic, so prepared
/// statements using them stay cacheable.
fn register_scalar_functions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    // reverse(): strings reverse by character, JSON arrays by element.
    conn.create_scalar_function("cypher_reverse", 1, flags, |ctx| {
        let input: Option<String> = ctx.get(0)?;
        Ok(input.map(|s| {
            if let Ok(serde_json::Value::Array(mut items)) =
                serde_json::from_str::<serde_json::Value>(&s)
            {
                items.reverse();
                serde_json::Value::Array(items).to_string()
            } else {
                s.chars().rev().collect::<String>()
            }
        }))
    })?;

    // split(s, delim) -> JSON array of fragments.
    conn.create_scalar_function("cypher_split", 2, flags, |ctx| {
        let input: Option<String> = ctx.get(0)?;
        let delim: Option<String> = ctx.get(1)?;
        Ok(match (input, delim) {
            (Some(s), Some(d)) => {
                let parts: Vec<serde_json::Value> = s
                    .split(d.as_str())
                    .map(|p| serde_json::Value::String(p.to_string()))
                    .collect();
                Some(serde_json::Value::Array(parts).to_string())
            }
            _ => None,
        })
    })?;

    // toInteger semantics: unparseable input is NULL, not an error.
    conn.create_scalar_function("cypher_to_integer", 1, flags, |ctx| {
        Ok(match ctx.get_raw(0) {
            ValueRef::Integer(i) => Some(i),
            ValueRef::Real(f) => Some(f as i64),
            ValueRef::Text(t) => std::str::from_utf8(t)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok()),
            _ => None,
        })
    })?;

    conn.create_scalar_function("cypher_to_float", 1, flags, |ctx| {
        Ok(match ctx.get_raw(0) {
            ValueRef::Integer(i) => Some(i as f64),
            ValueRef::Real(f) => Some(f),
            ValueRef::Text(t) => std::str::from_utf8(t)
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok()),
            _ => None,
        })
    })?;

    conn.create_scalar_function("cypher_to_boolean", 1, flags, |ctx| {
        Ok(match ctx.get_raw(0) {
            ValueRef::Integer(i) => Some(i != 0),
            ValueRef::Text(t) => match std::str::from_utf8(t).map(|s| s.trim().to_lowercase()) {
                Ok(s) if s == "true" => Some(true),
                Ok(s) if s == "false" => Some(false),
                _ => None,
            },
            _ => None,
        })
    })?;

    Ok(())
}
