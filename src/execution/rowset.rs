//! The row-set: the carrier between phases of multi-phase execution.
//!
//! Each row maps bound names to a node id, an edge id, a value, or a path
//! reference. Entities travel as ids; the expression evaluator inflates them
//! on demand through the per-query entity cache.

use hashbrown::HashMap;

use crate::model::{EdgeId, NodeId, Value};
use crate::translate::BoundKind;

/// One bound name in a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Bound but absent (OPTIONAL MATCH miss).
    Null,
    Node(NodeId),
    Edge(EdgeId),
    Value(Value),
    Path { nodes: Vec<NodeId>, edges: Vec<EdgeId> },
}

pub type Row = HashMap<String, Binding>;

/// Ordered rows plus the column order in which names were bound.
#[derive(Debug, Clone)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    /// The starting row-set: a single empty row.
    pub fn seed() -> Self {
        Self { columns: Vec::new(), rows: vec![Row::new()] }
    }

    pub fn empty() -> Self {
        Self { columns: Vec::new(), rows: Vec::new() }
    }

    pub fn add_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_owned());
        }
    }

    /// How the translator should see each bound column. A column whose
    /// bindings are all Null reports as a value (it can only bind NULL).
    pub fn bound_kinds(&self) -> Vec<(String, BoundKind)> {
        self.columns
            .iter()
            .map(|name| {
                let kind = self
                    .rows
                    .iter()
                    .find_map(|row| match row.get(name) {
                        Some(Binding::Node(_)) => Some(BoundKind::Node),
                        Some(Binding::Edge(_)) => Some(BoundKind::Edge),
                        Some(Binding::Value(_)) => Some(BoundKind::Value),
                        Some(Binding::Path { .. }) => Some(BoundKind::Value),
                        Some(Binding::Null) | None => None,
                    })
                    .unwrap_or(BoundKind::Value);
                (name.clone(), kind)
            })
            .collect()
    }
}

/// The value a `Row` slot contributes when a statement's `Row` parameter
/// slot is filled from it.
pub fn binding_param(binding: Option<&Binding>) -> Value {
    match binding {
        Some(Binding::Node(id)) => Value::String(id.to_string()),
        Some(Binding::Edge(id)) => Value::String(id.to_string()),
        Some(Binding::Value(v)) => v.clone(),
        Some(Binding::Path { .. }) | Some(Binding::Null) | None => Value::Null,
    }
}
