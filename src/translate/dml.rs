//! Fixed DML statements the executor feeds per phase: entity inserts,
//! `json_set`-based property updates, and deletes.
//!
//! Multi-row INSERTs take their row count up front so the UNWIND batch path
//! can emit one statement per chunk.

use super::expr::json_path;
use crate::Result;

/// `INSERT INTO nodes` for `rows` (id, label JSON, properties JSON) triples.
pub fn insert_nodes_sql(rows: usize) -> String {
    let mut sql = String::from("INSERT INTO nodes (id, label, properties) VALUES ");
    let mut n = 0;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!("(?{}, ?{}, ?{})", n + 1, n + 2, n + 3));
        n += 3;
    }
    sql
}

/// `INSERT INTO edges` for `rows` (id, type, source, target, properties)
/// tuples.
pub fn insert_edges_sql(rows: usize) -> String {
    let mut sql =
        String::from("INSERT INTO edges (id, type, source_id, target_id, properties) VALUES ");
    let mut n = 0;
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&format!(
            "(?{}, ?{}, ?{}, ?{}, ?{})",
            n + 1,
            n + 2,
            n + 3,
            n + 4,
            n + 5
        ));
        n += 5;
    }
    sql
}

/// JSON path for a single property key, e.g. `$."name"`.
pub fn property_path(key: &str) -> Result<String> {
    json_path(&[key])
}

pub const SET_NODE_PROPERTY: &str =
    "UPDATE nodes SET properties = json_set(properties, ?1, json(?2)) WHERE id = ?3";
pub const SET_EDGE_PROPERTY: &str =
    "UPDATE edges SET properties = json_set(properties, ?1, json(?2)) WHERE id = ?3";

pub const REMOVE_NODE_PROPERTY: &str =
    "UPDATE nodes SET properties = json_remove(properties, ?1) WHERE id = ?2";
pub const REMOVE_EDGE_PROPERTY: &str =
    "UPDATE edges SET properties = json_remove(properties, ?1) WHERE id = ?2";

pub const REPLACE_NODE_PROPERTIES: &str = "UPDATE nodes SET properties = ?1 WHERE id = ?2";
pub const REPLACE_EDGE_PROPERTIES: &str = "UPDATE edges SET properties = ?1 WHERE id = ?2";

/// `SET n += {map}` merges; `json_patch` treats JSON null as a removal,
/// which matches the language's null-assignment semantics.
pub const MERGE_NODE_PROPERTIES: &str =
    "UPDATE nodes SET properties = json_patch(properties, ?1) WHERE id = ?2";
pub const MERGE_EDGE_PROPERTIES: &str =
    "UPDATE edges SET properties = json_patch(properties, ?1) WHERE id = ?2";

pub const SET_NODE_LABELS: &str = "UPDATE nodes SET label = ?1 WHERE id = ?2";

pub const LOAD_NODE: &str = "SELECT id, label, properties FROM nodes WHERE id = ?1";
pub const LOAD_EDGE: &str =
    "SELECT id, type, source_id, target_id, properties FROM edges WHERE id = ?1";

pub const DELETE_NODE: &str = "DELETE FROM nodes WHERE id = ?1";
pub const DELETE_EDGE: &str = "DELETE FROM edges WHERE id = ?1";
pub const DELETE_EDGES_OF_NODE: &str =
    "DELETE FROM edges WHERE source_id = ?1 OR target_id = ?1";
pub const COUNT_EDGES_OF_NODE: &str =
    "SELECT count(*) FROM edges WHERE source_id = ?1 OR target_id = ?1";

// Introspection procedures.
pub const ALL_LABELS: &str =
    "SELECT DISTINCT je.value FROM nodes, json_each(nodes.label) AS je ORDER BY je.value";
pub const ALL_RELATIONSHIP_TYPES: &str = "SELECT DISTINCT type FROM edges ORDER BY type";
pub const ALL_PROPERTY_KEYS: &str = "SELECT DISTINCT key FROM (\
     SELECT je.key AS key FROM nodes, json_each(nodes.properties) AS je \
     UNION \
     SELECT je.key FROM edges, json_each(edges.properties) AS je) ORDER BY key";
