//! # Translator
//!
//! Lowers a parsed `Query` (or one clause subset of it) into parameterized
//! SQL over the fixed two-table schema. Pure: AST in, SQL out, no storage
//! access.
//!
//! Every user-provided value exits only through the parameter vector —
//! no literal is ever interpolated into SQL text. Parameters are emitted as
//! explicit `?N` references in compile order, so fragment assembly order
//! never has to match parameter order.

pub mod context;
pub mod dml;
mod expr;
mod pattern;
mod projection;

pub use context::{PathPart, TranslationContext, VarBinding};

use crate::cypher::ast::{Clause, Expr, Literal, Pattern, Query, UnaryOp};
use crate::model::{PropertyMap, Value};
use crate::{Error, Result};

/// Translator settings, sourced from the database configuration.
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    /// Depth cap for unbounded variable-length paths.
    pub max_var_length: u32,
    /// Fan-out multiplier for pushing a downstream LIMIT into recursive CTEs.
    pub var_length_fan_out: u32,
}

impl Default for TranslateOptions {
    fn default() -> Self {
        Self { max_var_length: 10, var_length_fan_out: 8 }
    }
}

/// One parameter position in an emitted statement.
///
/// `Const` values are fixed at translation time; `Row` slots are filled per
/// execution row by the multi-phase executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSlot {
    Const(Value),
    Row(String),
}

/// A SQL text plus its ordered parameter slots.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub slots: Vec<ParamSlot>,
}

impl SqlStatement {
    /// Resolve all slots to concrete values. Fails on any `Row` slot — used
    /// by strategies that execute without a row context.
    pub fn const_params(&self) -> Result<Vec<Value>> {
        self.slots
            .iter()
            .map(|slot| match slot {
                ParamSlot::Const(v) => Ok(v.clone()),
                ParamSlot::Row(name) => Err(Error::Internal(format!(
                    "unresolved row parameter '{name}' in constant statement"
                ))),
            })
            .collect()
    }
}

// ============================================================================
// Return shape
// ============================================================================

/// How many SQL columns a result column consumes, and how to rebuild it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// One SQL column, value passed through (numbers, strings).
    Scalar,
    /// One SQL column holding a SQL boolean (0/1/NULL).
    Bool,
    /// One SQL column holding JSON text to re-parse (lists, maps, labels).
    Json,
    /// Three SQL columns: id, label JSON, properties JSON.
    Node,
    /// Five SQL columns: id, type, source_id, target_id, properties JSON.
    Edge,
    /// One SQL column: `{"nodes": [...], "edges": [...]}` JSON.
    Path,
}

impl ColumnKind {
    pub fn sql_width(self) -> usize {
        match self {
            ColumnKind::Scalar | ColumnKind::Bool | ColumnKind::Json | ColumnKind::Path => 1,
            ColumnKind::Node => 3,
            ColumnKind::Edge => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShapedColumn {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Default)]
pub struct ReturnShape {
    pub columns: Vec<ShapedColumn>,
}

/// A fully translated read query: one SELECT plus the shape of its output.
#[derive(Debug, Clone)]
pub struct ReadPlan {
    pub statement: SqlStatement,
    pub shape: ReturnShape,
}

// ============================================================================
// Multi-phase MATCH plans
// ============================================================================

/// What a bound row variable is, as seen by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundKind {
    Node,
    Edge,
    Value,
}

/// Column layout of one output variable of a MATCH statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// One column: the node id.
    Node,
    /// One column: the edge id.
    Edge,
    /// Two columns: node-id JSON array, edge-id JSON array.
    Path,
}

/// A translated MATCH phase: the SELECT binding new variables, executed once
/// per existing row with `Row` slots filled from that row.
#[derive(Debug, Clone)]
pub struct MatchPlan {
    pub statement: SqlStatement,
    pub outputs: Vec<(String, OutputKind)>,
}

// ============================================================================
// Lowering state
// ============================================================================

/// Mutable state while lowering one statement. The context is cloned in,
/// extended, and readable by the caller afterwards.
pub struct Lowering<'a> {
    pub ctx: TranslationContext,
    params: &'a PropertyMap,
    opts: &'a TranslateOptions,
    ctes: Vec<String>,
    from: Vec<String>,
    conds: Vec<String>,
    slots: Vec<ParamSlot>,
    /// Iterator substitutions for list comprehensions/predicates, innermost
    /// last.
    iters: Vec<(String, String)>,
    /// LIMIT pushed down into variable-length recursion, if any.
    limit_hint: Option<i64>,
    /// Set once any variable-length CTE is lowered; the outer query then
    /// gets DISTINCT to deduplicate cycles.
    has_var_length: bool,
}

impl<'a> Lowering<'a> {
    pub fn new(
        ctx: TranslationContext,
        params: &'a PropertyMap,
        opts: &'a TranslateOptions,
    ) -> Self {
        Self {
            ctx,
            params,
            opts,
            ctes: Vec::new(),
            from: Vec::new(),
            conds: Vec::new(),
            slots: Vec::new(),
            iters: Vec::new(),
            limit_hint: None,
            has_var_length: false,
        }
    }

    pub fn opts(&self) -> &TranslateOptions {
        self.opts
    }

    pub(crate) fn params(&self) -> &PropertyMap {
        self.params
    }

    pub(crate) fn from_mut(&mut self) -> &mut Vec<String> {
        &mut self.from
    }

    pub(crate) fn conds_mut(&mut self) -> &mut Vec<String> {
        &mut self.conds
    }

    /// Register a constant parameter; returns its `?N` reference.
    pub fn push_const(&mut self, value: Value) -> String {
        self.slots.push(ParamSlot::Const(value));
        format!("?{}", self.slots.len())
    }

    /// Register a per-row parameter; returns its `?N` reference.
    pub fn push_row(&mut self, name: impl Into<String>) -> String {
        self.slots.push(ParamSlot::Row(name.into()));
        format!("?{}", self.slots.len())
    }

    pub fn add_from(&mut self, item: String) {
        self.from.push(item);
    }

    pub fn add_cond(&mut self, cond: String) {
        self.conds.push(cond);
    }

    pub fn add_cte(&mut self, cte: String) {
        self.ctes.push(cte);
    }

    pub fn set_limit_hint(&mut self, limit: i64) {
        self.limit_hint = Some(limit);
    }

    pub(crate) fn limit_hint(&self) -> Option<i64> {
        self.limit_hint
    }

    pub(crate) fn mark_var_length(&mut self) {
        self.has_var_length = true;
    }

    pub(crate) fn has_var_length(&self) -> bool {
        self.has_var_length
    }

    pub(crate) fn push_iter(&mut self, var: String, sql: String) {
        self.iters.push((var, sql));
    }

    pub(crate) fn pop_iter(&mut self) {
        self.iters.pop();
    }

    pub(crate) fn iter_sql(&self, var: &str) -> Option<&str> {
        self.iters
            .iter()
            .rev()
            .find(|(v, _)| v == var)
            .map(|(_, sql)| sql.as_str())
    }

    /// Fold an expression to a compile-time value: literals, `$parameters`,
    /// lists/maps of constants, unary minus.
    pub fn const_value(&self, expr: &Expr) -> Option<Value> {
        match expr {
            Expr::Literal(lit) => Some(match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
            }),
            Expr::Parameter(name) => self.params.get(name).cloned(),
            Expr::List(items) => items
                .iter()
                .map(|e| self.const_value(e))
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            Expr::Map(entries) => entries
                .iter()
                .map(|(k, e)| self.const_value(e).map(|v| (k.clone(), v)))
                .collect::<Option<PropertyMap>>()
                .map(Value::Map),
            Expr::UnaryOp { op: UnaryOp::Negate, expr } => {
                match self.const_value(expr)? {
                    Value::Int(i) => Some(Value::Int(-i)),
                    Value::Float(f) => Some(Value::Float(-f)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Assemble the final SELECT.
    fn assemble(
        &mut self,
        distinct: bool,
        select: &[String],
        group_by: &[String],
        order_by: &[String],
        limit: Option<String>,
        offset: Option<String>,
    ) -> String {
        let mut sql = String::new();
        if !self.ctes.is_empty() {
            sql.push_str("WITH RECURSIVE ");
            sql.push_str(&self.ctes.join(", "));
            sql.push(' ');
        }
        sql.push_str("SELECT ");
        if distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&select.join(", "));
        if !self.from.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&self.from.join(", "));
        }
        if !self.conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conds.join(" AND "));
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        if !order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order_by.join(", "));
        }
        match (limit, offset) {
            (Some(l), Some(o)) => {
                sql.push_str(&format!(" LIMIT {l} OFFSET {o}"));
            }
            (Some(l), None) => sql.push_str(&format!(" LIMIT {l}")),
            (None, Some(o)) => sql.push_str(&format!(" LIMIT -1 OFFSET {o}")),
            (None, None) => {}
        }
        sql
    }
}

// ============================================================================
// Entry points
// ============================================================================

/// Translate a whole read-only query (MATCH / UNWIND / WHERE / RETURN,
/// no WITH, no OPTIONAL) into a single SELECT.
pub fn pure_read_plan(
    query: &Query,
    params: &PropertyMap,
    opts: &TranslateOptions,
) -> Result<ReadPlan> {
    let mut low = Lowering::new(TranslationContext::new(), params, opts);

    let (last, preceding) = query
        .clauses
        .split_last()
        .ok_or_else(|| Error::Internal("empty query reached the translator".into()))?;

    let Clause::Return(projection) = last else {
        return Err(Error::Internal(
            "pure-read query does not end with RETURN".into(),
        ));
    };

    // A literal LIMIT bounds variable-length recursion growth.
    if let Some(limit_expr) = &projection.limit {
        if let Some(Value::Int(n)) = low.const_value(limit_expr) {
            low.set_limit_hint(n.saturating_mul(opts.var_length_fan_out as i64));
        }
    }

    for clause in preceding {
        match clause {
            Clause::Match { optional: false, patterns, where_clause } => {
                for pattern in patterns {
                    low.lower_pattern(pattern)?;
                }
                if let Some(where_expr) = where_clause {
                    let cond = low.compile_expr(where_expr)?;
                    low.add_cond(format!("({cond})"));
                }
            }
            Clause::Unwind { expr, alias } => {
                low.lower_unwind(expr, alias)?;
            }
            other => {
                return Err(Error::Internal(format!(
                    "clause {other:?} reached the pure-read translator"
                )));
            }
        }
    }

    // Variable-length paths force DISTINCT on the outer query: two distinct
    // traversals between the same endpoints are one result row, so cycles
    // and diamonds do not multiply output.
    let force_distinct = low.has_var_length();
    let built = low.build_projection(projection, force_distinct)?;
    let sql = low.assemble(
        built.distinct,
        &built.select,
        &built.group_by,
        &built.order_by,
        built.limit,
        built.offset,
    );

    Ok(ReadPlan {
        statement: SqlStatement { sql, slots: std::mem::take(&mut low.slots) },
        shape: built.shape,
    })
}

/// Translate one MATCH phase of a multi-phase plan. `bound` lists the row
/// variables already in scope; variables among them that the patterns or
/// WHERE reference become per-row equality constraints.
pub fn match_plan(
    patterns: &[Pattern],
    where_clause: Option<&Expr>,
    bound: &[(String, BoundKind)],
    params: &PropertyMap,
    opts: &TranslateOptions,
) -> Result<MatchPlan> {
    let mut ctx = TranslationContext::new();
    for (name, kind) in bound {
        if *kind == BoundKind::Value {
            ctx.bind(name.clone(), VarBinding::RowValue);
        }
    }
    let mut low = Lowering::new(ctx, params, opts);

    // Entity variables the phase actually references join against their
    // stored row id; unreferenced ones stay out of the SQL entirely.
    let referenced = referenced_vars(patterns, where_clause);
    for (name, kind) in bound {
        if !referenced.contains(name) {
            continue;
        }
        match kind {
            BoundKind::Node => {
                let alias = low.ctx.fresh_alias("n");
                low.add_from(format!("nodes {alias}"));
                let slot = low.push_row(name.clone());
                low.add_cond(format!("{alias}.id = {slot}"));
                low.ctx.bind(name.clone(), VarBinding::Node { alias });
            }
            BoundKind::Edge => {
                let alias = low.ctx.fresh_alias("e");
                low.add_from(format!("edges {alias}"));
                let slot = low.push_row(name.clone());
                low.add_cond(format!("{alias}.id = {slot}"));
                low.ctx.bind(name.clone(), VarBinding::Edge { alias });
            }
            BoundKind::Value => {}
        }
    }

    let preexisting: Vec<String> = bound.iter().map(|(n, _)| n.clone()).collect();

    for pattern in patterns {
        low.lower_pattern(pattern)?;
    }
    if let Some(where_expr) = where_clause {
        let cond = low.compile_expr(where_expr)?;
        low.add_cond(format!("({cond})"));
    }

    // Output the newly introduced variables.
    let mut select = Vec::new();
    let mut outputs = Vec::new();
    let names: Vec<String> = low.ctx.names().map(str::to_owned).collect();
    for name in names {
        if preexisting.contains(&name) {
            continue;
        }
        match low.ctx.lookup(&name).cloned() {
            Some(VarBinding::Node { alias }) => {
                select.push(format!("{alias}.id"));
                outputs.push((name, OutputKind::Node));
            }
            Some(VarBinding::Edge { alias }) => {
                select.push(format!("{alias}.id"));
                outputs.push((name, OutputKind::Edge));
            }
            Some(VarBinding::Path { parts }) => {
                let (node_ids, edge_ids) = low.path_id_arrays(&parts);
                select.push(node_ids);
                select.push(edge_ids);
                outputs.push((name, OutputKind::Path));
            }
            _ => {}
        }
    }
    if select.is_empty() {
        // Pure existence check against already-bound variables.
        select.push("1".into());
    }

    // One result row per pattern match: parallel fixed edges between the
    // same endpoints are distinct matches, so plain patterns get no
    // DISTINCT. Variable-length segments are the exception — their outer
    // query deduplicates, or cycles and diamonds multiply the row-set.
    let sql = low.assemble(low.has_var_length(), &select, &[], &[], None, None);
    Ok(MatchPlan {
        statement: SqlStatement { sql, slots: std::mem::take(&mut low.slots) },
        outputs,
    })
}

/// Variable names mentioned by the patterns or the WHERE expression.
fn referenced_vars(patterns: &[Pattern], where_clause: Option<&Expr>) -> Vec<String> {
    let mut vars = Vec::new();
    for pattern in patterns {
        for node in pattern.nodes() {
            if let Some(v) = &node.variable {
                push_unique(&mut vars, v);
            }
            for (_, e) in &node.properties {
                collect_expr_vars(e, &mut vars);
            }
        }
        for (edge, _) in &pattern.steps {
            if let Some(v) = &edge.variable {
                push_unique(&mut vars, v);
            }
            for (_, e) in &edge.properties {
                collect_expr_vars(e, &mut vars);
            }
        }
    }
    if let Some(expr) = where_clause {
        collect_expr_vars(expr, &mut vars);
    }
    vars
}

fn push_unique(vars: &mut Vec<String>, name: &str) {
    if !vars.iter().any(|v| v == name) {
        vars.push(name.to_owned());
    }
}

fn collect_expr_vars(expr: &Expr, vars: &mut Vec<String>) {
    match expr {
        Expr::Variable(name) => push_unique(vars, name),
        Expr::Property { expr, .. } | Expr::UnaryOp { expr, .. } => collect_expr_vars(expr, vars),
        Expr::Index { expr, index } => {
            collect_expr_vars(expr, vars);
            collect_expr_vars(index, vars);
        }
        Expr::FunctionCall { args, .. } => {
            for a in args {
                collect_expr_vars(a, vars);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_vars(left, vars);
            collect_expr_vars(right, vars);
        }
        Expr::List(items) => {
            for i in items {
                collect_expr_vars(i, vars);
            }
        }
        Expr::Map(entries) => {
            for (_, e) in entries {
                collect_expr_vars(e, vars);
            }
        }
        Expr::Case { operand, whens, else_expr } => {
            if let Some(op) = operand {
                collect_expr_vars(op, vars);
            }
            for (w, t) in whens {
                collect_expr_vars(w, vars);
                collect_expr_vars(t, vars);
            }
            if let Some(e) = else_expr {
                collect_expr_vars(e, vars);
            }
        }
        Expr::ListComprehension { list, filter, projection, .. } => {
            collect_expr_vars(list, vars);
            if let Some(f) = filter {
                collect_expr_vars(f, vars);
            }
            if let Some(p) = projection {
                collect_expr_vars(p, vars);
            }
        }
        Expr::ListPredicate { list, predicate, .. } => {
            collect_expr_vars(list, vars);
            collect_expr_vars(predicate, vars);
        }
        Expr::PatternExists(pattern) => {
            for node in pattern.nodes() {
                if let Some(v) = &node.variable {
                    push_unique(vars, v);
                }
            }
            for (edge, _) in &pattern.steps {
                if let Some(v) = &edge.variable {
                    push_unique(vars, v);
                }
            }
        }
        Expr::In { expr, list } => {
            collect_expr_vars(expr, vars);
            collect_expr_vars(list, vars);
        }
        Expr::IsNull { expr, .. } => collect_expr_vars(expr, vars),
        Expr::StringOp { left, right, .. } => {
            collect_expr_vars(left, vars);
            collect_expr_vars(right, vars);
        }
        Expr::HasLabel { expr, .. } => collect_expr_vars(expr, vars),
        Expr::Literal(_) | Expr::Parameter(_) | Expr::Star => {}
    }
}

// ============================================================================
// Tests — translator purity and parameter safety
// ============================================================================
