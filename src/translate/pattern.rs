//! Pattern lowering: graph patterns to table aliases and join conditions.
//!
//! Each node pattern contributes a `nodes` alias, each edge pattern an
//! `edges` alias plus source/target join conditions. Variable-length edges
//! become recursive CTEs carrying a depth counter and the traversed id lists.

use super::context::{PathPart, VarBinding};
use super::expr::json_path;
use super::Lowering;
use crate::cypher::ast::{EdgePattern, Expr, NodePattern, Pattern, VarLength};
use crate::model::{Direction, Value};
use crate::{Error, Result};

impl<'a> Lowering<'a> {
    /// Lower one pattern, binding its variables into the context.
    pub fn lower_pattern(&mut self, pattern: &Pattern) -> Result<()> {
        let mut parts = Vec::new();

        let mut left = self.ensure_node(&pattern.start)?;
        parts.push(PathPart::Node(left.clone()));

        for (edge, node) in &pattern.steps {
            let right = self.ensure_node(node)?;
            match &edge.var_length {
                None => {
                    let edge_alias = self.lower_edge(edge, &left, &right)?;
                    parts.push(PathPart::Edge(edge_alias));
                }
                Some(var_length) => {
                    let cte = self.lower_var_length(edge, *var_length, &left, &right)?;
                    parts.push(PathPart::VarLen(cte));
                }
            }
            parts.push(PathPart::Node(right.clone()));
            left = right;
        }

        if let Some(path_var) = &pattern.path_var {
            self.ctx.bind(path_var.clone(), VarBinding::Path { parts });
        }
        Ok(())
    }

    /// Bind (or re-use) the alias for a node pattern and attach its label
    /// and property predicates.
    fn ensure_node(&mut self, node: &NodePattern) -> Result<String> {
        let alias = match &node.variable {
            Some(name) => match self.ctx.lookup(name).cloned() {
                Some(VarBinding::Node { alias }) => alias,
                Some(other) => {
                    return Err(Error::Semantic(format!(
                        "variable '{name}' is already bound to a non-node ({other:?})"
                    )));
                }
                None => {
                    let alias = self.ctx.fresh_alias("n");
                    self.add_from(format!("nodes {alias}"));
                    self.ctx.bind(name.clone(), VarBinding::Node { alias: alias.clone() });
                    alias
                }
            },
            None => {
                let alias = self.ctx.fresh_alias("n");
                self.add_from(format!("nodes {alias}"));
                alias
            }
        };

        for label in &node.labels {
            let param = self.push_const(Value::String(label.clone()));
            self.add_cond(format!(
                "EXISTS (SELECT 1 FROM json_each({alias}.label) AS je WHERE je.value = {param})"
            ));
        }
        self.property_conds(&alias, &node.properties)?;
        Ok(alias)
    }

    /// Inline property maps are equality predicates at match time.
    fn property_conds(&mut self, alias: &str, properties: &[(String, Expr)]) -> Result<()> {
        for (key, expr) in properties {
            let path = json_path(&[key.as_str()])?;
            let value = self.compile_expr(expr)?;
            self.add_cond(format!(
                "json_extract({alias}.properties, '{path}') = {value}"
            ));
        }
        Ok(())
    }

    fn lower_edge(&mut self, edge: &EdgePattern, left: &str, right: &str) -> Result<String> {
        let alias = match &edge.variable {
            Some(name) => match self.ctx.lookup(name).cloned() {
                Some(VarBinding::Edge { alias }) => alias,
                Some(other) => {
                    return Err(Error::Semantic(format!(
                        "variable '{name}' is already bound to a non-relationship ({other:?})"
                    )));
                }
                None => {
                    let alias = self.ctx.fresh_alias("e");
                    self.add_from(format!("edges {alias}"));
                    self.ctx.bind(name.clone(), VarBinding::Edge { alias: alias.clone() });
                    alias
                }
            },
            None => {
                let alias = self.ctx.fresh_alias("e");
                self.add_from(format!("edges {alias}"));
                alias
            }
        };

        match edge.direction {
            Direction::Outgoing => {
                self.add_cond(format!("{alias}.source_id = {left}.id"));
                self.add_cond(format!("{alias}.target_id = {right}.id"));
            }
            Direction::Incoming => {
                self.add_cond(format!("{alias}.source_id = {right}.id"));
                self.add_cond(format!("{alias}.target_id = {left}.id"));
            }
            // A missing direction matches the edge in either orientation.
            Direction::Both => {
                self.add_cond(format!(
                    "(({alias}.source_id = {left}.id AND {alias}.target_id = {right}.id) \
                     OR ({alias}.source_id = {right}.id AND {alias}.target_id = {left}.id))"
                ));
            }
        }

        if let Some(cond) = self.type_cond(&alias, &edge.rel_types) {
            self.add_cond(cond);
        }
        self.property_conds(&alias, &edge.properties)?;
        Ok(alias)
    }

    fn type_cond(&mut self, alias: &str, rel_types: &[String]) -> Option<String> {
        match rel_types {
            [] => None,
            [only] => {
                let param = self.push_const(Value::String(only.clone()));
                Some(format!("{alias}.type = {param}"))
            }
            many => {
                let refs: Vec<String> = many
                    .iter()
                    .map(|t| self.push_const(Value::String(t.clone())))
                    .collect();
                Some(format!("{alias}.type IN ({})", refs.join(", ")))
            }
        }
    }

    // ========================================================================
    // Variable-length paths
    // ========================================================================

    /// Compile `-[:T*min..max]->` to a recursive CTE and join it between the
    /// endpoint aliases. The CTE tracks depth and the traversed id lists;
    /// the outer query filters `depth BETWEEN min AND max`.
    fn lower_var_length(
        &mut self,
        edge: &EdgePattern,
        var_length: VarLength,
        left: &str,
        right: &str,
    ) -> Result<String> {
        if edge.variable.is_some() {
            return Err(Error::Unsupported(
                "binding a variable-length relationship to a variable; bind the path instead"
                    .into(),
            ));
        }
        let min = var_length.min.unwrap_or(1);
        let max = var_length.max.unwrap_or(self.opts().max_var_length);
        if min == 0 {
            return Err(Error::Unsupported("zero-length variable paths".into()));
        }
        if min > max {
            return Err(Error::Semantic(format!(
                "variable-length range *{min}..{max} is empty"
            )));
        }
        self.mark_var_length();

        let cte = self.ctx.fresh_alias("vlp");

        // (source column, target column) per traversal orientation.
        let orientations: &[(&str, &str)] = match edge.direction {
            Direction::Outgoing => &[("e.source_id", "e.target_id")],
            Direction::Incoming => &[("e.target_id", "e.source_id")],
            Direction::Both => &[("e.source_id", "e.target_id"), ("e.target_id", "e.source_id")],
        };

        let mut arms = Vec::new();
        for (src, dst) in orientations {
            let edge_filter = self.var_length_edge_filter(edge)?;
            arms.push(format!(
                "SELECT {src} AS start_id, {dst} AS end_id, 1 AS depth, \
                 json_array({src}, {dst}) AS node_ids, json_array(e.id) AS edge_ids \
                 FROM edges e{edge_filter}"
            ));
        }
        for (src, dst) in orientations {
            let max_param = self.push_const(Value::Int(max as i64));
            let edge_filter = self.var_length_edge_filter_and(edge)?;
            arms.push(format!(
                "SELECT v.start_id, {dst}, v.depth + 1, \
                 json_insert(v.node_ids, '$[#]', {dst}), json_insert(v.edge_ids, '$[#]', e.id) \
                 FROM {cte} v JOIN edges e ON {src} = v.end_id \
                 WHERE v.depth < {max_param}{edge_filter}"
            ));
        }

        let mut body = arms.join(" UNION ALL ");
        // A downstream LIMIT bounds intermediate growth inside the recursion.
        if let Some(hint) = self.limit_hint() {
            let hint_param = self.push_const(Value::Int(hint));
            body.push_str(&format!(" LIMIT {hint_param}"));
        }
        self.add_cte(format!(
            "{cte}(start_id, end_id, depth, node_ids, edge_ids) AS ({body})"
        ));

        self.add_from(cte.clone());
        self.add_cond(format!("{cte}.start_id = {left}.id"));
        self.add_cond(format!("{cte}.end_id = {right}.id"));
        let min_param = self.push_const(Value::Int(min as i64));
        let max_param = self.push_const(Value::Int(max as i64));
        self.add_cond(format!(
            "{cte}.depth BETWEEN {min_param} AND {max_param}"
        ));

        Ok(cte)
    }

    /// Edge type/property conditions as a leading ` WHERE ...` fragment.
    fn var_length_edge_filter(&mut self, edge: &EdgePattern) -> Result<String> {
        let conds = self.var_length_edge_conds(edge)?;
        Ok(if conds.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conds.join(" AND "))
        })
    }

    /// Same conditions as an ` AND ...` continuation.
    fn var_length_edge_filter_and(&mut self, edge: &EdgePattern) -> Result<String> {
        let conds = self.var_length_edge_conds(edge)?;
        Ok(if conds.is_empty() {
            String::new()
        } else {
            format!(" AND {}", conds.join(" AND "))
        })
    }

    fn var_length_edge_conds(&mut self, edge: &EdgePattern) -> Result<Vec<String>> {
        let mut conds = Vec::new();
        if let Some(cond) = self.type_cond("e", &edge.rel_types) {
            conds.push(cond);
        }
        for (key, expr) in &edge.properties {
            let path = json_path(&[key.as_str()])?;
            let value = self.compile_expr(expr)?;
            conds.push(format!("json_extract(e.properties, '{path}') = {value}"));
        }
        Ok(conds)
    }

    // ========================================================================
    // UNWIND
    // ========================================================================

    /// UNWIND in a single-statement read: a (possibly correlated) `json_each`
    /// in the FROM list.
    pub fn lower_unwind(&mut self, expr: &Expr, alias_name: &str) -> Result<()> {
        let source = self.compile_list_source(expr)?;
        let alias = self.ctx.fresh_alias("u");
        self.add_from(format!("json_each({source}) AS {alias}"));
        self.ctx.bind(
            alias_name.to_owned(),
            VarBinding::IterValue {
                sql: format!("{alias}.value"),
                json_each_alias: alias,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Path materialization
    // ========================================================================

    /// Edge count of a bound path as SQL.
    pub(super) fn path_length_sql(&self, parts: &[PathPart]) -> String {
        let mut fixed = 0u32;
        let mut terms = Vec::new();
        for part in parts {
            match part {
                PathPart::Edge(_) => fixed += 1,
                PathPart::VarLen(cte) => terms.push(format!("{cte}.depth")),
                PathPart::Node(_) => {}
            }
        }
        if terms.is_empty() {
            return fixed.to_string();
        }
        if fixed > 0 {
            terms.push(fixed.to_string());
        }
        format!("({})", terms.join(" + "))
    }

    /// `nodes(p)` / `relationships(p)`: JSON array of property maps in path
    /// order.
    pub(super) fn path_entities_sql(
        &mut self,
        parts: &[PathPart],
        side: super::expr::PathSide,
    ) -> Result<String> {
        let pieces = match side {
            super::expr::PathSide::Nodes => self.node_pieces(parts, EntityShape::PropsOnly),
            super::expr::PathSide::Edges => self.edge_pieces(parts, EntityShape::PropsOnly),
        };
        Ok(json_concat(&pieces))
    }

    /// The path value itself: `{"nodes": [...], "edges": [...]}` with full
    /// entity objects, parsed back by the result shaper.
    pub(super) fn path_object_sql(&mut self, parts: &[PathPart]) -> String {
        let nodes = json_concat(&self.node_pieces(parts, EntityShape::Full));
        let edges = json_concat(&self.edge_pieces(parts, EntityShape::Full));
        format!("json_object('nodes', json({nodes}), 'edges', json({edges}))")
    }

    /// Node-id and edge-id JSON arrays for a path, used by multi-phase MATCH
    /// output columns.
    pub(super) fn path_id_arrays(&mut self, parts: &[PathPart]) -> (String, String) {
        let node_pieces: Vec<String> = parts
            .iter()
            .filter_map(|part| match part {
                PathPart::Node(alias) => Some(format!("json_array({alias}.id)")),
                PathPart::VarLen(cte) => Some(var_len_interior(cte)),
                PathPart::Edge(_) => None,
            })
            .collect();
        let edge_pieces: Vec<String> = parts
            .iter()
            .filter_map(|part| match part {
                PathPart::Edge(alias) => Some(format!("json_array({alias}.id)")),
                PathPart::VarLen(cte) => Some(format!("{cte}.edge_ids")),
                PathPart::Node(_) => None,
            })
            .collect();
        (json_concat(&node_pieces), json_concat(&edge_pieces))
    }

    fn node_pieces(&mut self, parts: &[PathPart], shape: EntityShape) -> Vec<String> {
        parts
            .iter()
            .filter_map(|part| match part {
                PathPart::Node(alias) => {
                    let obj = match shape {
                        EntityShape::PropsOnly => format!("json({alias}.properties)"),
                        EntityShape::Full => format!(
                            "json_object('id', {alias}.id, 'labels', json({alias}.label), \
                             'properties', json({alias}.properties))"
                        ),
                    };
                    Some(format!("json_array({obj})"))
                }
                PathPart::VarLen(cte) => {
                    let interior = var_len_interior(cte);
                    let obj = match shape {
                        EntityShape::PropsOnly => "json(pn.properties)".to_string(),
                        EntityShape::Full => "json_object('id', pn.id, 'labels', \
                             json(pn.label), 'properties', json(pn.properties))"
                            .to_string(),
                    };
                    Some(format!(
                        "(SELECT json_group_array({obj} ORDER BY je.key) \
                         FROM json_each({interior}) AS je JOIN nodes pn ON pn.id = je.value)"
                    ))
                }
                PathPart::Edge(_) => None,
            })
            .collect()
    }

    fn edge_pieces(&mut self, parts: &[PathPart], shape: EntityShape) -> Vec<String> {
        parts
            .iter()
            .filter_map(|part| match part {
                PathPart::Edge(alias) => {
                    let obj = match shape {
                        EntityShape::PropsOnly => format!("json({alias}.properties)"),
                        EntityShape::Full => format!(
                            "json_object('id', {alias}.id, 'type', {alias}.type, \
                             'source', {alias}.source_id, 'target', {alias}.target_id, \
                             'properties', json({alias}.properties))"
                        ),
                    };
                    Some(format!("json_array({obj})"))
                }
                PathPart::VarLen(cte) => {
                    let obj = match shape {
                        EntityShape::PropsOnly => "json(pe.properties)".to_string(),
                        EntityShape::Full => "json_object('id', pe.id, 'type', pe.type, \
                             'source', pe.source_id, 'target', pe.target_id, \
                             'properties', json(pe.properties))"
                            .to_string(),
                    };
                    Some(format!(
                        "(SELECT json_group_array({obj} ORDER BY je.key) \
                         FROM json_each({cte}.edge_ids) AS je JOIN edges pe ON pe.id = je.value)"
                    ))
                }
                PathPart::Node(_) => None,
            })
            .collect()
    }
}

#[derive(Clone, Copy)]
enum EntityShape {
    PropsOnly,
    Full,
}

/// A variable-length segment's node list minus its endpoints — those are
/// contributed by the adjacent fixed node patterns.
fn var_len_interior(cte: &str) -> String {
    format!("json_remove(json_remove({cte}.node_ids, '$[#-1]'), '$[0]')")
}

/// Concatenate JSON arrays preserving piece order and element order within
/// pieces. Object and array elements re-enter as JSON, scalars as raw values,
/// so nothing gets double-encoded.
fn json_concat(pieces: &[String]) -> String {
    match pieces {
        [] => "json_array()".to_string(),
        [only] => only.clone(),
        many => {
            let selects: Vec<String> = many
                .iter()
                .enumerate()
                .map(|(i, piece)| {
                    if i == 0 {
                        format!(
                            "SELECT 0 AS part, key AS k, value AS v, type AS t \
                             FROM json_each({piece})"
                        )
                    } else {
                        format!("SELECT {i}, key, value, type FROM json_each({piece})")
                    }
                })
                .collect();
            format!(
                "(SELECT json_group_array(\
                 (CASE WHEN t IN ('object', 'array') THEN json(v) ELSE v END) \
                 ORDER BY part, k) FROM ({}))",
                selects.join(" UNION ALL ")
            )
        }
    }
}
