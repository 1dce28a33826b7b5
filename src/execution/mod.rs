//! Query execution engine.
//!
//! A single linear scan classifies each parsed query into one of a small,
//! ordered set of strategies; a dispatch match maps the strategy to its
//! handler. Read-only queries delegate to the translator and run as one
//! statement; mixed read/write queries run as a multi-phase plan over a
//! mutable row-set, issuing SQL per phase.

mod eval;
mod phases;
pub mod rowset;
pub mod shaper;

use std::time::Instant;

use hashbrown::HashMap;

use crate::cypher;
use crate::cypher::ast::{Clause, Expr, Query};
use crate::model::{EdgeId, Node, NodeId, Path, PropertyMap, Relationship, Value};
use crate::storage::{SqlRow, StorageEngine};
use crate::translate::{self, dml, TranslateOptions};
use crate::{DatabaseConfig, Error, Result};

// ============================================================================
// Results
// ============================================================================

/// Query execution result.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
    pub meta: QueryMeta,
}

/// Result envelope metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryMeta {
    pub count: usize,
    pub elapsed_ms: u64,
}

/// A single row in the result set. Preserves column order.
#[derive(Debug, Clone)]
pub struct ResultRow {
    pub values: Vec<(String, Value)>,
}

impl ResultRow {
    /// Get a typed value from the row by column name.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self
            .values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| Error::Semantic(format!("no such column '{key}'")))?;
        T::from_value(val)
    }

    /// Get a raw Value reference by column name.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
    pub labels_added: u64,
    pub labels_removed: u64,
    pub execution_time_ms: u64,
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

macro_rules! type_error {
    ($expected:expr, $val:expr) => {
        Err(Error::Semantic(format!(
            "expected {}, got {}",
            $expected,
            $val.type_name()
        )))
    };
}

impl FromValue for Node {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Node(n) => Ok(*n.clone()),
            _ => type_error!("NODE", val),
        }
    }
}

impl FromValue for Relationship {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Relationship(r) => Ok(*r.clone()),
            _ => type_error!("RELATIONSHIP", val),
        }
    }
}

impl FromValue for Path {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Path(p) => Ok(*p.clone()),
            _ => type_error!("PATH", val),
        }
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::String(s) => Ok(s.clone()),
            _ => type_error!("STRING", val),
        }
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| {
            Error::Semantic(format!("expected INTEGER, got {}", val.type_name()))
        })
    }
}

impl FromValue for f64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_float().ok_or_else(|| {
            Error::Semantic(format!("expected FLOAT, got {}", val.type_name()))
        })
    }
}

impl FromValue for bool {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Bool(b) => Ok(*b),
            _ => type_error!("BOOLEAN", val),
        }
    }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

impl FromValue for Vec<Value> {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::List(l) => Ok(l.clone()),
            _ => type_error!("LIST", val),
        }
    }
}

impl FromValue for PropertyMap {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Map(m) => Ok(m.clone()),
            _ => type_error!("MAP", val),
        }
    }
}

// ============================================================================
// Strategy classification
// ============================================================================

/// The execution strategies, selected by one linear scan over the clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    PureRead,
    PathExpr,
    SingleCreate,
    UnwindMutation,
    Merge,
    MultiPhase,
}

/// Classify a query into its strategy tag.
pub fn classify(query: &Query) -> Strategy {
    let clauses = &query.clauses;

    let mut has_merge = false;
    let mut has_with = false;
    let mut has_optional = false;
    let mut has_write = false;
    let mut has_call = false;
    let mut has_path_var = false;
    let mut has_percentile = false;
    let mut unwind_count = 0usize;
    let mut create_count = 0usize;

    for clause in clauses {
        match clause {
            Clause::Merge { .. } => {
                has_merge = true;
                has_write = true;
            }
            Clause::With(_) => has_with = true,
            Clause::Match { optional, patterns, .. } => {
                has_optional |= *optional;
                has_path_var |= patterns.iter().any(|p| p.path_var.is_some());
            }
            Clause::Create { .. } => {
                has_write = true;
                create_count += 1;
            }
            Clause::Set { .. } | Clause::Remove { .. } | Clause::Delete { .. } => {
                has_write = true;
            }
            Clause::Call { .. } => has_call = true,
            Clause::Unwind { .. } => unwind_count += 1,
            Clause::Return(proj) => {
                has_percentile |= proj
                    .items
                    .iter()
                    .any(|i| uses_percentile(&i.expr))
                    || proj.order_by.iter().any(|o| uses_percentile(&o.expr));
            }
        }
    }

    if has_merge {
        return Strategy::Merge;
    }

    let ends_with_return = matches!(clauses.last(), Some(Clause::Return(_)));

    if !has_write && !has_call && !has_with && !has_optional && !has_percentile && ends_with_return
    {
        return if has_path_var { Strategy::PathExpr } else { Strategy::PureRead };
    }

    // CREATE-only queries (optionally with a trailing RETURN).
    if create_count == clauses.len()
        || (create_count + 1 == clauses.len() && ends_with_return && create_count > 0)
    {
        if matches!(clauses.first(), Some(Clause::Create { .. })) {
            return Strategy::SingleCreate;
        }
    }

    // UNWIND-driven mutation: UNWIND feeding CREATEs, optionally RETURN.
    if unwind_count == 1 && create_count > 0 && matches!(clauses.first(), Some(Clause::Unwind { .. }))
    {
        let tail_ok = clauses[1..].iter().all(|c| {
            matches!(c, Clause::Create { .. } | Clause::Return(_))
        });
        if tail_ok {
            return Strategy::UnwindMutation;
        }
    }

    Strategy::MultiPhase
}

fn uses_percentile(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { name, args, .. } => {
            matches!(
                name.to_ascii_lowercase().as_str(),
                "percentiledisc" | "percentilecont"
            ) || args.iter().any(uses_percentile)
        }
        Expr::BinaryOp { left, right, .. } => uses_percentile(left) || uses_percentile(right),
        Expr::UnaryOp { expr, .. } => uses_percentile(expr),
        Expr::Property { expr, .. } => uses_percentile(expr),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().is_some_and(uses_percentile)
                || whens.iter().any(|(w, t)| uses_percentile(w) || uses_percentile(t))
                || else_expr.as_deref().is_some_and(uses_percentile)
        }
        _ => false,
    }
}

// ============================================================================
// Top-level execution
// ============================================================================

/// Parse, classify, and execute a query under one engine transaction.
pub fn execute<E: StorageEngine>(
    engine: &E,
    config: &DatabaseConfig,
    query_text: &str,
    params: PropertyMap,
) -> Result<QueryResult> {
    let started = Instant::now();
    tracing::debug!(query = query_text, "executing");

    let query = cypher::parse(query_text)?;
    let mut executor = Executor::new(engine, params, config);

    engine.begin()?;
    let outcome = executor.run_query(&query);
    let mut result = match outcome {
        Ok(result) => {
            engine.commit()?;
            result
        }
        Err(err) => {
            let _ = engine.rollback();
            return Err(err);
        }
    };

    let elapsed = started.elapsed().as_millis() as u64;
    result.stats.execution_time_ms = elapsed;
    result.meta = QueryMeta { count: result.rows.len(), elapsed_ms: elapsed };
    tracing::debug!(rows = result.meta.count, elapsed_ms = elapsed, "query complete");
    Ok(result)
}

// ============================================================================
// Executor
// ============================================================================

/// Per-query execution state: parameters, statistics, the statement counter
/// (for storage-error attribution), and the property-parse cache.
pub(crate) struct Executor<'e, E: StorageEngine> {
    engine: &'e E,
    pub(crate) params: PropertyMap,
    pub(crate) opts: TranslateOptions,
    pub(crate) batch_size: usize,
    pub(crate) stats: ExecutionStats,
    statements_run: usize,
    node_cache: HashMap<NodeId, Option<Node>>,
    edge_cache: HashMap<EdgeId, Option<Relationship>>,
}

impl<'e, E: StorageEngine> Executor<'e, E> {
    fn new(engine: &'e E, params: PropertyMap, config: &DatabaseConfig) -> Self {
        Self {
            engine,
            params,
            opts: TranslateOptions {
                max_var_length: config.max_var_length_depth,
                var_length_fan_out: config.var_length_fan_out,
            },
            batch_size: config.unwind_batch_size.max(1),
            stats: ExecutionStats::default(),
            statements_run: 0,
            node_cache: HashMap::new(),
            edge_cache: HashMap::new(),
        }
    }

    /// Execute a query including its UNION tail.
    fn run_query(&mut self, query: &Query) -> Result<QueryResult> {
        let head = Query { clauses: query.clauses.clone(), union: None };
        let mut result = self.run_branch(&head)?;

        if let Some(tail) = &query.union {
            let tail_result = self.run_query(&tail.query)?;
            if tail_result.columns != result.columns {
                return Err(Error::Semantic(
                    "UNION branches must project identical column names".into(),
                ));
            }
            result.rows.extend(tail_result.rows);
            if !tail.all {
                dedup_rows(&mut result.rows);
            }
            result.stats = self.stats.clone();
        }
        Ok(result)
    }

    fn run_branch(&mut self, query: &Query) -> Result<QueryResult> {
        let strategy = classify(query);
        tracing::debug!(?strategy, "dispatch");
        match strategy {
            Strategy::PureRead | Strategy::PathExpr => self.run_pure_read(query),
            Strategy::SingleCreate => self.run_single_create(query),
            Strategy::UnwindMutation => self.run_unwind_mutation(query),
            Strategy::Merge | Strategy::MultiPhase => self.run_multi_phase(query),
        }
    }

    /// Read-only queries: one translated SELECT. Constructs the translator
    /// cannot express in a single statement fall through to the interpreter.
    fn run_pure_read(&mut self, query: &Query) -> Result<QueryResult> {
        match translate::pure_read_plan(query, &self.params, &self.opts) {
            Ok(plan) => {
                let params = plan.statement.const_params()?;
                let sql_rows = self.run_stmt(&plan.statement.sql, &params)?;
                let rows = shaper::shape_rows(&sql_rows, &plan.shape)?;
                Ok(self.finish(
                    plan.shape.columns.iter().map(|c| c.name.clone()).collect(),
                    rows,
                ))
            }
            Err(Error::Unsupported(reason)) => {
                tracing::debug!(reason, "single-statement translation unavailable; interpreting");
                self.run_multi_phase(query)
            }
            Err(err) => Err(err),
        }
    }

    pub(crate) fn finish(&self, columns: Vec<String>, rows: Vec<ResultRow>) -> QueryResult {
        QueryResult {
            columns,
            rows,
            stats: self.stats.clone(),
            meta: QueryMeta::default(),
        }
    }

    // ========================================================================
    // Engine access — every statement goes through here so storage errors
    // carry the index of the statement that failed.
    // ========================================================================

    pub(crate) fn run_stmt(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>> {
        let index = self.statements_run;
        self.statements_run += 1;
        self.engine.run(sql, params).map_err(|e| attribute(e, index))
    }

    pub(crate) fn run_dml(&mut self, sql: &str, params: &[Value]) -> Result<usize> {
        let index = self.statements_run;
        self.statements_run += 1;
        self.engine.execute(sql, params).map_err(|e| attribute(e, index))
    }

    // ========================================================================
    // Entity cache — per-query, keyed by id, invalidated on writes.
    // ========================================================================

    pub(crate) fn load_node(&mut self, id: NodeId) -> Result<Option<Node>> {
        if let Some(cached) = self.node_cache.get(&id) {
            return Ok(cached.clone());
        }
        let rows = self.run_stmt(dml::LOAD_NODE, &[Value::String(id.to_string())])?;
        let node = match rows.first() {
            Some(row) => Some(shaper::node_from_cells(
                row.at(0).unwrap_or(&Value::Null),
                row.at(1).unwrap_or(&Value::Null),
                row.at(2).unwrap_or(&Value::Null),
            )?),
            None => None,
        };
        self.node_cache.insert(id, node.clone());
        Ok(node)
    }

    pub(crate) fn load_edge(&mut self, id: EdgeId) -> Result<Option<Relationship>> {
        if let Some(cached) = self.edge_cache.get(&id) {
            return Ok(cached.clone());
        }
        let rows = self.run_stmt(dml::LOAD_EDGE, &[Value::String(id.to_string())])?;
        let edge = match rows.first() {
            Some(row) => Some(shaper::edge_from_cells(
                row.at(0).unwrap_or(&Value::Null),
                row.at(1).unwrap_or(&Value::Null),
                row.at(2).unwrap_or(&Value::Null),
                row.at(3).unwrap_or(&Value::Null),
                row.at(4).unwrap_or(&Value::Null),
            )?),
            None => None,
        };
        self.edge_cache.insert(id, edge.clone());
        Ok(edge)
    }

    pub(crate) fn invalidate_node(&mut self, id: NodeId) {
        self.node_cache.remove(&id);
    }

    pub(crate) fn invalidate_edge(&mut self, id: EdgeId) {
        self.edge_cache.remove(&id);
    }

    pub(crate) fn cache_node(&mut self, node: Node) {
        self.node_cache.insert(node.id, Some(node));
    }

    pub(crate) fn cache_edge(&mut self, edge: Relationship) {
        self.edge_cache.insert(edge.id, Some(edge));
    }
}

fn attribute(err: Error, index: usize) -> Error {
    match err {
        Error::Storage { message, statement_index: None } => Error::Storage {
            message,
            statement_index: Some(index),
        },
        other => other,
    }
}

/// UNION (without ALL) deduplicates by serialized row value.
fn dedup_rows(rows: &mut Vec<ResultRow>) {
    let mut seen: Vec<String> = Vec::new();
    rows.retain(|row| {
        let key = row
            .values
            .iter()
            .map(|(k, v)| format!("{k}\u{1}{}", v.to_json()))
            .collect::<Vec<_>>()
            .join("\u{2}");
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}
