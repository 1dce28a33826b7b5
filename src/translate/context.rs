//! Translation context — the environment threaded through clause lowering.
//!
//! Binds Cypher variables to SQL table aliases (or value slots) and hands out
//! fresh aliases. Copy-on-extend: each clause clones the context, mutates its
//! copy, and passes the extended context onward, so clause isolation comes
//! for free.

use crate::{Error, Result};

/// What a Cypher variable resolves to inside the SQL being built.
#[derive(Debug, Clone, PartialEq)]
pub enum VarBinding {
    /// A `nodes` table alias.
    Node { alias: String },
    /// An `edges` table alias.
    Edge { alias: String },
    /// A fixed-length path: the component aliases in pattern order.
    Path { parts: Vec<PathPart> },
    /// A value bound in the execution row-set (multi-phase); reaches the SQL
    /// as a per-row parameter.
    RowValue,
    /// An iterator value (UNWIND or list comprehension); `sql` is the
    /// expression producing the current element.
    IterValue { sql: String, json_each_alias: String },
}

/// One component of a bound path.
#[derive(Debug, Clone, PartialEq)]
pub enum PathPart {
    /// Node table alias.
    Node(String),
    /// Edge table alias.
    Edge(String),
    /// Variable-length segment: the recursive CTE alias carrying
    /// `node_ids` / `edge_ids` / `depth` columns.
    VarLen(String),
}

/// The environment accumulated while translating one query segment.
#[derive(Debug, Clone, Default)]
pub struct TranslationContext {
    bindings: Vec<(String, VarBinding)>,
    alias_count: u32,
}

impl TranslationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh SQL alias. `prefix` is `n` for nodes, `e` for edges, `u` for
    /// json_each iterators, `vlp` for recursive path CTEs.
    pub fn fresh_alias(&mut self, prefix: &str) -> String {
        let alias = format!("{prefix}{}", self.alias_count);
        self.alias_count += 1;
        alias
    }

    pub fn bind(&mut self, name: impl Into<String>, binding: VarBinding) {
        let name = name.into();
        if let Some(slot) = self.bindings.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = binding;
        } else {
            self.bindings.push((name, binding));
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&VarBinding> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Variables in binding order — drives `RETURN *` expansion.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(n, _)| n.as_str())
    }

    pub fn expect_node_alias(&self, name: &str) -> Result<&str> {
        match self.lookup(name) {
            Some(VarBinding::Node { alias }) => Ok(alias),
            Some(other) => Err(Error::Semantic(format!(
                "'{name}' is not a node variable (found {other:?})"
            ))),
            None => Err(Error::Semantic(format!("unknown variable '{name}'"))),
        }
    }
}
