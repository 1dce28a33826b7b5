//! RETURN compilation: the SELECT list, implicit GROUP BY, ORDER BY,
//! SKIP/LIMIT, and the result shape.
//!
//! Aggregations are detected by function name. Their presence makes every
//! non-aggregated projection a grouping key, emitted explicitly; items that
//! mix an aggregate with a bare column are rejected instead of mis-grouped.

use super::context::VarBinding;
use super::expr::iter_json_text;
use super::{ColumnKind, Lowering, ReturnShape, ShapedColumn};
use crate::cypher::ast::{
    is_aggregate_function, BinaryOp, Expr, OrderItem, Projection, ProjectionItem, UnaryOp,
};
use crate::model::Value;
use crate::{Error, Result};

/// Everything `assemble` needs, plus the output shape.
pub(super) struct BuiltProjection {
    pub select: Vec<String>,
    pub shape: ReturnShape,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub distinct: bool,
    pub limit: Option<String>,
    pub offset: Option<String>,
}

impl<'a> Lowering<'a> {
    /// `force_distinct` comes from the pattern walk (variable-length paths
    /// deduplicate their outer query) and combines with the projection's own
    /// DISTINCT.
    pub(super) fn build_projection(
        &mut self,
        proj: &Projection,
        force_distinct: bool,
    ) -> Result<BuiltProjection> {
        let distinct = proj.distinct || force_distinct;
        let items = self.expand_star(&proj.items)?;
        let has_aggregate = items.iter().any(|i| i.expr.contains_aggregate());

        let mut select = Vec::new();
        let mut group_by = Vec::new();
        let mut shape = ReturnShape::default();

        for item in &items {
            let name = item.display_name().to_owned();
            if has_aggregate && item.expr.contains_aggregate() {
                if has_naked_column(&item.expr) {
                    return Err(Error::Semantic(format!(
                        "'{name}' mixes an aggregate with non-aggregated columns; \
                         project the grouping key separately"
                    )));
                }
                let (sql, kind) = self.compile_agg_expr(&item.expr)?;
                select.push(format!("{sql} AS {}", quote_ident(&name)));
                shape.columns.push(ShapedColumn { name, kind });
            } else {
                let (cols, kind) = self.projection_columns(&item.expr)?;
                let first = cols
                    .first()
                    .cloned()
                    .ok_or_else(|| Error::Internal("projection produced no columns".into()))?;
                if has_aggregate {
                    group_by.push(first.clone());
                }
                for (i, col) in cols.iter().enumerate() {
                    if i == 0 {
                        select.push(format!("{col} AS {}", quote_ident(&name)));
                    } else {
                        select.push(col.clone());
                    }
                }
                shape.columns.push(ShapedColumn { name, kind });
            }
        }

        let mut order_by = Vec::new();
        for order in &proj.order_by {
            order_by.push(self.compile_order_item(order, &items, distinct)?);
        }

        let limit = match &proj.limit {
            Some(expr) => Some(self.const_int_param(expr, "LIMIT")?),
            None => None,
        };
        let offset = match &proj.skip {
            Some(expr) => Some(self.const_int_param(expr, "SKIP")?),
            None => None,
        };

        Ok(BuiltProjection {
            select,
            shape,
            group_by,
            order_by,
            distinct,
            limit,
            offset,
        })
    }

    /// `RETURN *` projects every bound variable in binding order.
    fn expand_star(&self, items: &[ProjectionItem]) -> Result<Vec<ProjectionItem>> {
        let mut out = Vec::new();
        for item in items {
            if matches!(item.expr, Expr::Star) {
                let names: Vec<String> = self.ctx.names().map(str::to_owned).collect();
                if names.is_empty() {
                    return Err(Error::Semantic("RETURN * with no variables in scope".into()));
                }
                for name in names {
                    out.push(ProjectionItem {
                        expr: Expr::Variable(name.clone()),
                        alias: None,
                        text: name,
                    });
                }
            } else {
                out.push(item.clone());
            }
        }
        Ok(out)
    }

    /// SQL columns (first one gets the display alias) plus the shape kind.
    fn projection_columns(&mut self, expr: &Expr) -> Result<(Vec<String>, ColumnKind)> {
        // Constants (literals, parameters, constant lists/maps) project as
        // JSON text so booleans and nesting survive SQL's type system.
        if let Some(value) = self.const_value(expr) {
            let param = self.push_const(Value::String(value.to_json().to_string()));
            return Ok((vec![format!("json({param})")], ColumnKind::Json));
        }

        // Bare variables project whole entities.
        if let Expr::Variable(name) = expr {
            if self.iter_sql(name).is_none() {
                match self.ctx.lookup(name).cloned() {
                    Some(VarBinding::Node { alias }) => {
                        return Ok((
                            vec![
                                format!("{alias}.id"),
                                format!("{alias}.label"),
                                format!("{alias}.properties"),
                            ],
                            ColumnKind::Node,
                        ));
                    }
                    Some(VarBinding::Edge { alias }) => {
                        return Ok((
                            vec![
                                format!("{alias}.id"),
                                format!("{alias}.type"),
                                format!("{alias}.source_id"),
                                format!("{alias}.target_id"),
                                format!("{alias}.properties"),
                            ],
                            ColumnKind::Edge,
                        ));
                    }
                    Some(VarBinding::Path { parts }) => {
                        let sql = self.path_object_sql(&parts);
                        return Ok((vec![sql], ColumnKind::Path));
                    }
                    Some(VarBinding::IterValue { json_each_alias, .. }) => {
                        return Ok((vec![iter_json_text(&json_each_alias)], ColumnKind::Json));
                    }
                    _ => {}
                }
            }
        }

        // Property access projects faithful JSON so booleans and nesting
        // survive the trip.
        if let Some((doc, path)) = self.json_locator(expr)? {
            return Ok((vec![format!("({doc} -> '{path}')")], ColumnKind::Json));
        }

        if let Expr::FunctionCall { name, .. } = expr {
            let sql = self.compile_expr(expr)?;
            return Ok((vec![sql], function_kind(name)));
        }

        match expr {
            Expr::List(_) | Expr::Map(_) | Expr::ListComprehension { .. } => {
                let sql = self.compile_expr(expr)?;
                Ok((vec![sql], ColumnKind::Json))
            }
            other => {
                let sql = self.compile_expr(other)?;
                let kind = if is_predicate_shaped(other) {
                    ColumnKind::Bool
                } else {
                    ColumnKind::Scalar
                };
                Ok((vec![sql], kind))
            }
        }
    }

    /// Compile an expression tree that may contain aggregate calls at any
    /// depth (outside their own arguments).
    fn compile_agg_expr(&mut self, expr: &Expr) -> Result<(String, ColumnKind)> {
        if let Expr::FunctionCall { name, args, distinct } = expr {
            if is_aggregate_function(name) {
                return self.compile_aggregate_call(name, args, *distinct);
            }
        }
        match expr {
            Expr::BinaryOp { left, op, right } => {
                let (l, _) = self.compile_agg_expr(left)?;
                let (r, _) = self.compile_agg_expr(right)?;
                let sym = match op {
                    BinaryOp::Add => "+",
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    BinaryOp::Mod => "%",
                    BinaryOp::Eq => "=",
                    BinaryOp::Neq => "<>",
                    BinaryOp::Lt => "<",
                    BinaryOp::Lte => "<=",
                    BinaryOp::Gt => ">",
                    BinaryOp::Gte => ">=",
                    BinaryOp::And => "AND",
                    BinaryOp::Or => "OR",
                };
                Ok((format!("({l} {sym} {r})"), ColumnKind::Scalar))
            }
            Expr::UnaryOp { op, expr } => {
                let (inner, _) = self.compile_agg_expr(expr)?;
                Ok((
                    match op {
                        UnaryOp::Not => format!("NOT ({inner})"),
                        UnaryOp::Negate => format!("-({inner})"),
                    },
                    ColumnKind::Scalar,
                ))
            }
            other => Ok((self.compile_expr(other)?, ColumnKind::Scalar)),
        }
    }

    fn compile_aggregate_call(
        &mut self,
        name: &str,
        args: &[Expr],
        distinct: bool,
    ) -> Result<(String, ColumnKind)> {
        let lower = name.to_ascii_lowercase();
        let prefix = if distinct { "DISTINCT " } else { "" };
        match lower.as_str() {
            "count" => {
                if args.is_empty() {
                    Ok(("COUNT(*)".into(), ColumnKind::Scalar))
                } else {
                    let x = self.compile_expr(&args[0])?;
                    Ok((format!("COUNT({prefix}{x})"), ColumnKind::Scalar))
                }
            }
            "sum" | "avg" | "min" | "max" => {
                let x = self.compile_expr(
                    args.first()
                        .ok_or_else(|| Error::Semantic(format!("{name}() requires an argument")))?,
                )?;
                Ok((format!("{}({prefix}{x})", lower.to_uppercase()), ColumnKind::Scalar))
            }
            "collect" => {
                let arg = args
                    .first()
                    .ok_or_else(|| Error::Semantic("collect() requires an argument".into()))?;
                let v = self.collectable_value(arg)?;
                Ok((format!("json_group_array({prefix}{v})"), ColumnKind::Json))
            }
            other => Err(Error::Unsupported(format!(
                "{other}() cannot be compiled to a single statement"
            ))),
        }
    }

    /// The JSON-faithful value of an expression for use inside
    /// `json_group_array`.
    fn collectable_value(&mut self, expr: &Expr) -> Result<String> {
        if let Expr::Variable(name) = expr {
            match self.ctx.lookup(name).cloned() {
                Some(VarBinding::Node { alias }) | Some(VarBinding::Edge { alias }) => {
                    return Ok(format!("json({alias}.properties)"));
                }
                _ => {}
            }
        }
        if let Some((doc, path)) = self.json_locator(expr)? {
            return Ok(format!(
                "(CASE WHEN json_type({doc}, '{path}') IN ('object', 'array') \
                 THEN json(json_extract({doc}, '{path}')) \
                 ELSE json_extract({doc}, '{path}') END)"
            ));
        }
        if let Expr::FunctionCall { name, .. } = expr {
            let sql = self.compile_expr(expr)?;
            return Ok(match function_kind(name) {
                ColumnKind::Json => format!("json({sql})"),
                _ => sql,
            });
        }
        self.compile_expr(expr)
    }

    fn compile_order_item(
        &mut self,
        order: &OrderItem,
        items: &[ProjectionItem],
        distinct: bool,
    ) -> Result<String> {
        let dir = if order.ascending { "ASC" } else { "DESC" };

        // ORDER BY an output alias (Neo4j style) or a repeated projection
        // expression resolves to the projected item.
        let target = match &order.expr {
            Expr::Variable(name) if !self.ctx.is_bound(name) => {
                items.iter().find(|i| i.display_name() == name.as_str())
            }
            _ => items.iter().find(|i| i.expr == order.expr),
        };

        if let Some(item) = target {
            // Aggregate outputs sort by their alias; under DISTINCT the sort
            // key must be a result column, so the alias is used as well.
            // Otherwise recompile with value semantics — the projected form
            // of a property is JSON text, which would sort numbers
            // lexicographically.
            if item.expr.contains_aggregate() || distinct {
                return Ok(format!("{} {dir}", quote_ident(item.display_name())));
            }
            let sql = self.compile_expr(&item.expr)?;
            return Ok(format!("{sql} {dir}"));
        }

        let sql = self.compile_expr(&order.expr)?;
        Ok(format!("{sql} {dir}"))
    }

    fn const_int_param(&mut self, expr: &Expr, clause: &str) -> Result<String> {
        match self.const_value(expr) {
            Some(Value::Int(n)) if n >= 0 => Ok(self.push_const(Value::Int(n))),
            _ => Err(Error::Semantic(format!(
                "{clause} requires a non-negative integer constant"
            ))),
        }
    }
}

/// Result-column kind for a scalar function, by name.
fn function_kind(name: &str) -> ColumnKind {
    match name.to_ascii_lowercase().as_str() {
        "labels" | "keys" | "properties" | "nodes" | "relationships" | "range" | "split"
        | "tail" | "head" | "last" | "collect" => ColumnKind::Json,
        "toboolean" | "exists" => ColumnKind::Bool,
        _ => ColumnKind::Scalar,
    }
}

/// Expressions whose SQL result is a 0/1 boolean.
fn is_predicate_shaped(expr: &Expr) -> bool {
    match expr {
        Expr::BinaryOp { op, .. } => matches!(
            op,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
                | BinaryOp::And
                | BinaryOp::Or
        ),
        Expr::UnaryOp { op: UnaryOp::Not, .. } => true,
        Expr::IsNull { .. }
        | Expr::In { .. }
        | Expr::StringOp { .. }
        | Expr::HasLabel { .. }
        | Expr::ListPredicate { .. }
        | Expr::PatternExists(_) => true,
        _ => false,
    }
}

/// Does the expression reference a column (variable or property) outside any
/// aggregate call? Such references make an aggregated item ambiguous.
fn has_naked_column(expr: &Expr) -> bool {
    match expr {
        Expr::Variable(_) | Expr::Property { .. } => true,
        Expr::FunctionCall { name, args, .. } => {
            if is_aggregate_function(name) {
                false
            } else {
                args.iter().any(has_naked_column)
            }
        }
        Expr::BinaryOp { left, right, .. } => has_naked_column(left) || has_naked_column(right),
        Expr::UnaryOp { expr, .. } => has_naked_column(expr),
        Expr::Index { expr, index } => has_naked_column(expr) || has_naked_column(index),
        Expr::List(items) => items.iter().any(has_naked_column),
        Expr::Map(entries) => entries.iter().any(|(_, e)| has_naked_column(e)),
        Expr::Case { operand, whens, else_expr } => {
            operand.as_deref().is_some_and(has_naked_column)
                || whens.iter().any(|(w, t)| has_naked_column(w) || has_naked_column(t))
                || else_expr.as_deref().is_some_and(has_naked_column)
        }
        Expr::In { expr, list } => has_naked_column(expr) || has_naked_column(list),
        Expr::IsNull { expr, .. } => has_naked_column(expr),
        Expr::StringOp { left, right, .. } => has_naked_column(left) || has_naked_column(right),
        Expr::HasLabel { expr, .. } => has_naked_column(expr),
        _ => false,
    }
}

pub(super) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
