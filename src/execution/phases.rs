//! Multi-phase execution: clauses interpreted in order against a mutable
//! row-set, with SQL issued to the engine per phase.
//!
//! The starting row-set is a single empty row. MATCH phases run the
//! translated SELECT once per row and form the product; write phases issue
//! DML per row (creates are batched across rows). An empty row-set makes
//! every following phase a no-op.

use smallvec::SmallVec;

use crate::cypher::ast::{
    Clause, Expr, NodePattern, Pattern, Projection, ProjectionItem, Query, RemoveItem, SetItem,
};
use crate::model::{Direction, EdgeId, Node, NodeId, PropertyMap, Relationship, Value};
use crate::storage::StorageEngine;
use crate::translate::{self, dml, MatchPlan, OutputKind};
use crate::{Error, Result};

use super::rowset::{Binding, Row, RowSet};
use super::{Executor, QueryResult, ResultRow};

/// Pending node insert: id, labels, properties.
type NodeInsert = (NodeId, SmallVec<[String; 2]>, PropertyMap);
/// Pending edge insert: id, type, source, target, properties.
type EdgeInsert = (EdgeId, String, NodeId, NodeId, PropertyMap);

impl<'e, E: StorageEngine> Executor<'e, E> {
    /// CREATE-only queries ride the generic phase machinery: the seed
    /// row-set is one empty row and the create phase already batches, so
    /// this is the single-INSERT fast path.
    pub(crate) fn run_single_create(&mut self, query: &Query) -> Result<QueryResult> {
        self.run_multi_phase(query)
    }

    /// UNWIND-driven mutation: the create phase collects inserts across all
    /// unwound rows and flushes them as chunked multi-row INSERTs.
    pub(crate) fn run_unwind_mutation(&mut self, query: &Query) -> Result<QueryResult> {
        self.run_multi_phase(query)
    }

    pub(crate) fn run_multi_phase(&mut self, query: &Query) -> Result<QueryResult> {
        let mut rows = RowSet::seed();

        for clause in &query.clauses {
            match clause {
                Clause::Match { optional, patterns, where_clause } => {
                    self.phase_match(&mut rows, *optional, patterns, where_clause.as_ref())?;
                }
                Clause::Unwind { expr, alias } => {
                    self.phase_unwind(&mut rows, expr, alias)?;
                }
                Clause::Create { patterns } => {
                    self.phase_create(&mut rows, patterns)?;
                }
                Clause::Merge { pattern, on_create, on_match } => {
                    self.phase_merge(&mut rows, pattern, on_create, on_match)?;
                }
                Clause::Set { items } => {
                    self.phase_set(&rows, items)?;
                }
                Clause::Remove { items } => {
                    self.phase_remove(&rows, items)?;
                }
                Clause::Delete { variables, detach } => {
                    self.phase_delete(&rows, variables, *detach)?;
                }
                Clause::With(projection) => {
                    rows = self.project_rowset(rows, projection)?;
                }
                Clause::Call { procedure, yields } => {
                    self.phase_call(&mut rows, procedure, yields)?;
                }
                Clause::Return(projection) => {
                    return self.phase_return(rows, projection);
                }
            }
        }

        // A terminal CALL yields its rows without an explicit RETURN.
        if matches!(query.clauses.last(), Some(Clause::Call { .. })) {
            let columns = rows.columns.clone();
            let mut result_rows = Vec::with_capacity(rows.rows.len());
            for row in &rows.rows {
                let mut values = Vec::with_capacity(columns.len());
                for column in &columns {
                    let binding = row.get(column).cloned().unwrap_or(Binding::Null);
                    values.push((column.clone(), self.binding_value(&binding)?));
                }
                result_rows.push(ResultRow { values });
            }
            return Ok(self.finish(columns, result_rows));
        }

        // Write-only query: no rows, statistics only.
        Ok(self.finish(Vec::new(), Vec::new()))
    }

    // ========================================================================
    // MATCH
    // ========================================================================

    fn phase_match(
        &mut self,
        rows: &mut RowSet,
        optional: bool,
        patterns: &[Pattern],
        where_clause: Option<&Expr>,
    ) -> Result<()> {
        let bound = rows.bound_kinds();
        let plan =
            translate::match_plan(patterns, where_clause, &bound, &self.params, &self.opts)?;

        let mut out = Vec::new();
        for row in std::mem::take(&mut rows.rows) {
            let params = self.resolve_slots(&plan.statement.slots, &row);
            let sql_rows = self.run_stmt(&plan.statement.sql, &params)?;

            if sql_rows.is_empty() {
                if optional {
                    // Null-fill: exactly one row with nulls for the newly
                    // bound variables.
                    let mut extended = row;
                    for (name, _) in &plan.outputs {
                        extended.insert(name.clone(), Binding::Null);
                    }
                    out.push(extended);
                }
                continue;
            }

            for sql_row in &sql_rows {
                let extended = extend_row_from_outputs(&row, &plan, sql_row)?;
                out.push(extended);
            }
        }
        rows.rows = out;
        for (name, _) in &plan.outputs {
            rows.add_column(name);
        }
        Ok(())
    }

    // ========================================================================
    // UNWIND
    // ========================================================================

    fn phase_unwind(&mut self, rows: &mut RowSet, expr: &Expr, alias: &str) -> Result<()> {
        let mut out = Vec::new();
        for row in std::mem::take(&mut rows.rows) {
            let val = self.eval(expr, &row)?;
            match val {
                Value::Null => {}
                Value::List(items) => {
                    for item in items {
                        let mut new_row = row.clone();
                        new_row.insert(alias.to_owned(), Binding::Value(item));
                        out.push(new_row);
                    }
                }
                other => {
                    // UNWIND of a non-list produces a single row.
                    let mut new_row = row.clone();
                    new_row.insert(alias.to_owned(), Binding::Value(other));
                    out.push(new_row);
                }
            }
        }
        rows.rows = out;
        rows.add_column(alias);
        Ok(())
    }

    // ========================================================================
    // CREATE
    // ========================================================================

    fn phase_create(&mut self, rows: &mut RowSet, patterns: &[Pattern]) -> Result<()> {
        let mut node_batch: Vec<NodeInsert> = Vec::new();
        let mut edge_batch: Vec<EdgeInsert> = Vec::new();

        let mut updated = std::mem::take(&mut rows.rows);
        for row in &mut updated {
            for pattern in patterns {
                self.create_pattern_in_row(row, pattern, &mut node_batch, &mut edge_batch)?;
            }
        }
        rows.rows = updated;

        for pattern in patterns {
            for node in pattern.nodes() {
                if let Some(var) = &node.variable {
                    rows.add_column(var);
                }
            }
            for (edge, _) in &pattern.steps {
                if let Some(var) = &edge.variable {
                    rows.add_column(var);
                }
            }
        }

        self.flush_creates(node_batch, edge_batch)
    }

    /// Create the unbound parts of one pattern for one row. Nodes are
    /// queued before edges so every edge insert references an existing or
    /// queued node id.
    fn create_pattern_in_row(
        &mut self,
        row: &mut Row,
        pattern: &Pattern,
        node_batch: &mut Vec<NodeInsert>,
        edge_batch: &mut Vec<EdgeInsert>,
    ) -> Result<()> {
        if pattern.path_var.is_some() {
            return Err(Error::Semantic("cannot bind a path in CREATE".into()));
        }

        let mut left = self.resolve_or_create_node(row, &pattern.start, node_batch)?;

        for (edge, node) in &pattern.steps {
            if edge.var_length.is_some() {
                return Err(Error::Semantic(
                    "variable-length relationships cannot be created".into(),
                ));
            }
            let rel_type = match edge.rel_types.as_slice() {
                [only] => only.clone(),
                _ => {
                    return Err(Error::Semantic(
                        "CREATE requires exactly one relationship type".into(),
                    ));
                }
            };
            let right = self.resolve_or_create_node(row, node, node_batch)?;
            let (src, dst) = match edge.direction {
                Direction::Outgoing => (left, right),
                Direction::Incoming => (right, left),
                Direction::Both => {
                    return Err(Error::Semantic(
                        "CREATE requires a relationship direction".into(),
                    ));
                }
            };

            let mut properties = PropertyMap::new();
            for (key, expr) in &edge.properties {
                let val = self.eval(expr, row)?;
                if !val.is_null() {
                    properties.insert(key.clone(), val);
                }
            }

            let id = EdgeId::generate();
            edge_batch.push((id, rel_type.clone(), src, dst, properties.clone()));
            self.stats.relationships_created += 1;
            self.cache_edge(Relationship {
                id,
                src,
                dst,
                rel_type,
                properties,
            });
            if let Some(var) = &edge.variable {
                row.insert(var.clone(), Binding::Edge(id));
            }

            left = right;
        }

        Ok(())
    }

    fn resolve_or_create_node(
        &mut self,
        row: &mut Row,
        node: &NodePattern,
        node_batch: &mut Vec<NodeInsert>,
    ) -> Result<NodeId> {
        if let Some(var) = &node.variable {
            if let Some(binding) = row.get(var) {
                return match binding {
                    Binding::Node(id) => Ok(*id),
                    other => Err(Error::Semantic(format!(
                        "'{var}' is already bound and is not a node ({other:?})"
                    ))),
                };
            }
        }

        let mut labels: SmallVec<[String; 2]> = SmallVec::new();
        for label in &node.labels {
            if !labels.iter().any(|l| l == label) {
                labels.push(label.clone());
            }
        }
        if labels.is_empty() {
            return Err(Error::Semantic(
                "a created node requires at least one label".into(),
            ));
        }

        let mut properties = PropertyMap::new();
        for (key, expr) in &node.properties {
            let val = self.eval(expr, row)?;
            if !val.is_null() {
                properties.insert(key.clone(), val);
            }
        }

        let id = NodeId::generate();
        node_batch.push((id, labels.clone(), properties.clone()));
        self.stats.nodes_created += 1;
        self.cache_node(Node { id, labels, properties });
        if let Some(var) = &node.variable {
            row.insert(var.clone(), Binding::Node(id));
        }
        Ok(id)
    }

    /// Issue the queued inserts as multi-row statements, chunked to stay
    /// within engine parameter limits.
    fn flush_creates(
        &mut self,
        node_batch: Vec<NodeInsert>,
        edge_batch: Vec<EdgeInsert>,
    ) -> Result<()> {
        for chunk in node_batch.chunks(self.batch_size) {
            let sql = dml::insert_nodes_sql(chunk.len());
            let mut params = Vec::with_capacity(chunk.len() * 3);
            for (id, labels, properties) in chunk {
                params.push(Value::String(id.to_string()));
                let labels_json: Vec<Value> =
                    labels.iter().map(|l| Value::String(l.clone())).collect();
                params.push(Value::String(Value::List(labels_json).to_json().to_string()));
                params.push(Value::String(
                    Value::Map(properties.clone()).to_json().to_string(),
                ));
            }
            self.run_dml(&sql, &params)?;
        }

        for chunk in edge_batch.chunks(self.batch_size) {
            let sql = dml::insert_edges_sql(chunk.len());
            let mut params = Vec::with_capacity(chunk.len() * 5);
            for (id, rel_type, src, dst, properties) in chunk {
                params.push(Value::String(id.to_string()));
                params.push(Value::String(rel_type.clone()));
                params.push(Value::String(src.to_string()));
                params.push(Value::String(dst.to_string()));
                params.push(Value::String(
                    Value::Map(properties.clone()).to_json().to_string(),
                ));
            }
            self.run_dml(&sql, &params)?;
        }
        Ok(())
    }

    // ========================================================================
    // MERGE
    // ========================================================================

    /// MERGE is the conditional create: match the full pattern; on zero
    /// rows create the missing components. ON CREATE / ON MATCH SET fire on
    /// their branch only.
    fn phase_merge(
        &mut self,
        rows: &mut RowSet,
        pattern: &Pattern,
        on_create: &[SetItem],
        on_match: &[SetItem],
    ) -> Result<()> {
        let bound = rows.bound_kinds();
        let plan = translate::match_plan(
            std::slice::from_ref(pattern),
            None,
            &bound,
            &self.params,
            &self.opts,
        )?;

        let mut out = Vec::new();
        for row in std::mem::take(&mut rows.rows) {
            let params = self.resolve_slots(&plan.statement.slots, &row);
            let sql_rows = self.run_stmt(&plan.statement.sql, &params)?;

            if sql_rows.is_empty() {
                let mut extended = row;
                let mut node_batch = Vec::new();
                let mut edge_batch = Vec::new();
                self.create_pattern_in_row(
                    &mut extended,
                    pattern,
                    &mut node_batch,
                    &mut edge_batch,
                )?;
                self.flush_creates(node_batch, edge_batch)?;
                self.apply_set_items(&extended, on_create)?;
                out.push(extended);
            } else {
                for sql_row in &sql_rows {
                    let extended = extend_row_from_outputs(&row, &plan, sql_row)?;
                    self.apply_set_items(&extended, on_match)?;
                    out.push(extended);
                }
            }
        }
        rows.rows = out;

        for node in pattern.nodes() {
            if let Some(var) = &node.variable {
                rows.add_column(var);
            }
        }
        for (edge, _) in &pattern.steps {
            if let Some(var) = &edge.variable {
                rows.add_column(var);
            }
        }
        Ok(())
    }

    // ========================================================================
    // SET / REMOVE
    // ========================================================================

    fn phase_set(&mut self, rows: &RowSet, items: &[SetItem]) -> Result<()> {
        for row in &rows.rows {
            self.apply_set_items(row, items)?;
        }
        Ok(())
    }

    fn apply_set_items(&mut self, row: &Row, items: &[SetItem]) -> Result<()> {
        for item in items {
            match item {
                SetItem::Property { variable, key, value } => {
                    let val = self.eval(value, row)?;
                    let path = Value::String(dml::property_path(key)?);
                    match self.entity_target(row, variable)? {
                        Target::Node(id) => {
                            let id_param = Value::String(id.to_string());
                            if val.is_null() {
                                // Assigning null removes the property.
                                self.run_dml(dml::REMOVE_NODE_PROPERTY, &[path, id_param])?;
                            } else {
                                let json = Value::String(val.to_json().to_string());
                                self.run_dml(dml::SET_NODE_PROPERTY, &[path, json, id_param])?;
                            }
                            self.invalidate_node(id);
                            self.stats.properties_set += 1;
                        }
                        Target::Edge(id) => {
                            let id_param = Value::String(id.to_string());
                            if val.is_null() {
                                self.run_dml(dml::REMOVE_EDGE_PROPERTY, &[path, id_param])?;
                            } else {
                                let json = Value::String(val.to_json().to_string());
                                self.run_dml(dml::SET_EDGE_PROPERTY, &[path, json, id_param])?;
                            }
                            self.invalidate_edge(id);
                            self.stats.properties_set += 1;
                        }
                        Target::Absent => {}
                    }
                }
                SetItem::ReplaceProperties { variable, value }
                | SetItem::MergeProperties { variable, value } => {
                    let replace = matches!(item, SetItem::ReplaceProperties { .. });
                    let val = self.eval(value, row)?;
                    let Value::Map(map) = val else {
                        return Err(Error::Semantic(format!(
                            "SET {variable} expects a map, got {}",
                            val.type_name()
                        )));
                    };
                    let json = Value::String(Value::Map(map.clone()).to_json().to_string());
                    match self.entity_target(row, variable)? {
                        Target::Node(id) => {
                            let sql = if replace {
                                dml::REPLACE_NODE_PROPERTIES
                            } else {
                                dml::MERGE_NODE_PROPERTIES
                            };
                            self.run_dml(sql, &[json, Value::String(id.to_string())])?;
                            self.invalidate_node(id);
                            self.stats.properties_set += map.len() as u64;
                        }
                        Target::Edge(id) => {
                            let sql = if replace {
                                dml::REPLACE_EDGE_PROPERTIES
                            } else {
                                dml::MERGE_EDGE_PROPERTIES
                            };
                            self.run_dml(sql, &[json, Value::String(id.to_string())])?;
                            self.invalidate_edge(id);
                            self.stats.properties_set += map.len() as u64;
                        }
                        Target::Absent => {}
                    }
                }
                SetItem::Label { variable, label } => {
                    let Target::Node(id) = self.entity_target(row, variable)? else {
                        continue;
                    };
                    let Some(mut node) = self.load_node(id)? else { continue };
                    if node.has_label(label) {
                        continue;
                    }
                    node.labels.push(label.clone());
                    self.write_labels(id, &node.labels)?;
                    self.stats.labels_added += 1;
                }
            }
        }
        Ok(())
    }

    fn phase_remove(&mut self, rows: &RowSet, items: &[RemoveItem]) -> Result<()> {
        for row in &rows.rows {
            for item in items {
                match item {
                    RemoveItem::Property { variable, key } => {
                        let path = Value::String(dml::property_path(key)?);
                        match self.entity_target(row, variable)? {
                            Target::Node(id) => {
                                self.run_dml(
                                    dml::REMOVE_NODE_PROPERTY,
                                    &[path, Value::String(id.to_string())],
                                )?;
                                self.invalidate_node(id);
                                self.stats.properties_set += 1;
                            }
                            Target::Edge(id) => {
                                self.run_dml(
                                    dml::REMOVE_EDGE_PROPERTY,
                                    &[path, Value::String(id.to_string())],
                                )?;
                                self.invalidate_edge(id);
                                self.stats.properties_set += 1;
                            }
                            Target::Absent => {}
                        }
                    }
                    RemoveItem::Label { variable, label } => {
                        let Target::Node(id) = self.entity_target(row, variable)? else {
                            continue;
                        };
                        let Some(mut node) = self.load_node(id)? else { continue };
                        if !node.has_label(label) {
                            continue;
                        }
                        if node.labels.len() == 1 {
                            return Err(Error::Semantic(format!(
                                "cannot remove the last label '{label}' from a node"
                            )));
                        }
                        node.labels.retain(|l| l != label);
                        self.write_labels(id, &node.labels)?;
                        self.stats.labels_removed += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn write_labels(&mut self, id: NodeId, labels: &[String]) -> Result<()> {
        let json = Value::List(labels.iter().map(|l| Value::String(l.clone())).collect());
        self.run_dml(
            dml::SET_NODE_LABELS,
            &[
                Value::String(json.to_json().to_string()),
                Value::String(id.to_string()),
            ],
        )?;
        self.invalidate_node(id);
        Ok(())
    }

    fn entity_target(&self, row: &Row, variable: &str) -> Result<Target> {
        match row.get(variable) {
            Some(Binding::Node(id)) => Ok(Target::Node(*id)),
            Some(Binding::Edge(id)) => Ok(Target::Edge(*id)),
            Some(Binding::Null) => Ok(Target::Absent),
            Some(other) => Err(Error::Semantic(format!(
                "'{variable}' is not an entity ({other:?})"
            ))),
            None => Err(Error::Semantic(format!("unknown variable '{variable}'"))),
        }
    }

    // ========================================================================
    // DELETE
    // ========================================================================

    fn phase_delete(&mut self, rows: &RowSet, variables: &[String], detach: bool) -> Result<()> {
        for row in &rows.rows {
            for variable in variables {
                match self.entity_target(row, variable)? {
                    Target::Edge(id) => {
                        let n = self.run_dml(dml::DELETE_EDGE, &[Value::String(id.to_string())])?;
                        self.stats.relationships_deleted += n as u64;
                        self.invalidate_edge(id);
                    }
                    Target::Node(id) => {
                        let id_param = Value::String(id.to_string());
                        if detach {
                            let n =
                                self.run_dml(dml::DELETE_EDGES_OF_NODE, &[id_param.clone()])?;
                            self.stats.relationships_deleted += n as u64;
                        } else {
                            let count = self
                                .run_stmt(dml::COUNT_EDGES_OF_NODE, &[id_param.clone()])?
                                .first()
                                .and_then(|r| r.at(0).and_then(Value::as_int))
                                .unwrap_or(0);
                            if count > 0 {
                                return Err(Error::Semantic(format!(
                                    "cannot delete node '{variable}': it still has \
                                     relationships; use DETACH DELETE"
                                )));
                            }
                        }
                        let n = self.run_dml(dml::DELETE_NODE, &[id_param])?;
                        self.stats.nodes_deleted += n as u64;
                        self.invalidate_node(id);
                    }
                    Target::Absent => {}
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // CALL
    // ========================================================================

    fn phase_call(&mut self, rows: &mut RowSet, procedure: &str, yields: &[String]) -> Result<()> {
        let (sql, default_column) = match procedure {
            "db.labels" => (dml::ALL_LABELS, "label"),
            "db.relationshipTypes" => (dml::ALL_RELATIONSHIP_TYPES, "relationshipType"),
            "db.propertyKeys" => (dml::ALL_PROPERTY_KEYS, "propertyKey"),
            other => return Err(Error::Unsupported(format!("procedure {other}"))),
        };
        if yields.len() > 1 {
            return Err(Error::Semantic(format!(
                "procedure {procedure} yields a single column"
            )));
        }
        let column = yields.first().map(String::as_str).unwrap_or(default_column);

        let sql_rows = self.run_stmt(sql, &[])?;
        let mut out = Vec::new();
        for row in std::mem::take(&mut rows.rows) {
            for sql_row in &sql_rows {
                let mut extended = row.clone();
                extended.insert(
                    column.to_owned(),
                    Binding::Value(sql_row.at(0).cloned().unwrap_or(Value::Null)),
                );
                out.push(extended);
            }
        }
        rows.rows = out;
        rows.add_column(column);
        Ok(())
    }

    // ========================================================================
    // WITH / RETURN
    // ========================================================================

    /// Evaluate a projection over the row-set: grouping when aggregates are
    /// present, then WHERE, DISTINCT, ORDER BY, SKIP, LIMIT.
    fn project_rowset(&mut self, rows: RowSet, projection: &Projection) -> Result<RowSet> {
        let items = expand_star_items(&rows, &projection.items)?;
        let has_aggregate = items.iter().any(|i| i.expr.contains_aggregate());

        let mut out = RowSet::empty();
        for item in &items {
            out.add_column(item.display_name());
        }

        if has_aggregate {
            let group_items: Vec<&ProjectionItem> =
                items.iter().filter(|i| !i.expr.contains_aggregate()).collect();

            // Group rows by the canonical value of the grouping keys.
            let mut groups: Vec<(Vec<String>, Vec<&Row>)> = Vec::new();
            for row in &rows.rows {
                let mut key = Vec::with_capacity(group_items.len());
                for item in &group_items {
                    let binding = self.project_binding(&item.expr, row)?;
                    key.push(binding_key(&binding));
                }
                if let Some(group) = groups.iter_mut().find(|(k, _)| *k == key) {
                    group.1.push(row);
                } else {
                    groups.push((key, vec![row]));
                }
            }
            // Aggregation with no grouping keys over no rows still produces
            // one row (count(*) = 0).
            if groups.is_empty() && group_items.is_empty() {
                groups.push((Vec::new(), Vec::new()));
            }

            let mut new_rows = Vec::with_capacity(groups.len());
            for (_, group) in &groups {
                let mut new_row = Row::new();
                for item in &items {
                    let binding = if item.expr.contains_aggregate() {
                        Binding::Value(self.eval_agg_expr(&item.expr, group)?)
                    } else {
                        match group.first() {
                            Some(row) => self.project_binding(&item.expr, row)?,
                            None => Binding::Null,
                        }
                    };
                    new_row.insert(item.display_name().to_owned(), binding);
                }
                new_rows.push(new_row);
            }
            out.rows = new_rows;
        } else {
            for row in &rows.rows {
                let mut new_row = Row::new();
                for item in &items {
                    let binding = self.project_binding(&item.expr, row)?;
                    new_row.insert(item.display_name().to_owned(), binding);
                }
                out.rows.push(new_row);
            }
        }

        if let Some(predicate) = &projection.where_clause {
            self.filter_rows(&mut out, predicate)?;
        }

        if projection.distinct {
            let mut seen: Vec<Vec<String>> = Vec::new();
            let columns = out.columns.clone();
            out.rows.retain(|row| {
                let key: Vec<String> = columns
                    .iter()
                    .map(|c| binding_key(row.get(c).unwrap_or(&Binding::Null)))
                    .collect();
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        if !projection.order_by.is_empty() {
            // Evaluate sort keys once per row, then sort stably.
            let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(out.rows.len());
            for row in out.rows.drain(..) {
                let mut keys = Vec::with_capacity(projection.order_by.len());
                for order in &projection.order_by {
                    keys.push(self.eval(&order.expr, &row)?);
                }
                keyed.push((keys, row));
            }
            keyed.sort_by(|(a, _), (b, _)| {
                for (i, order) in projection.order_by.iter().enumerate() {
                    if let Some(ord) = a[i].cypher_cmp(&b[i]) {
                        let ord = if order.ascending { ord } else { ord.reverse() };
                        if ord != std::cmp::Ordering::Equal {
                            return ord;
                        }
                    }
                }
                std::cmp::Ordering::Equal
            });
            out.rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        if let Some(skip) = &projection.skip {
            let n = self.const_usize(skip, "SKIP")?;
            out.rows.drain(..n.min(out.rows.len()));
        }
        if let Some(limit) = &projection.limit {
            let n = self.const_usize(limit, "LIMIT")?;
            out.rows.truncate(n);
        }

        Ok(out)
    }

    fn phase_return(&mut self, rows: RowSet, projection: &Projection) -> Result<QueryResult> {
        let projected = self.project_rowset(rows, projection)?;
        let columns = projected.columns.clone();

        let mut result_rows = Vec::with_capacity(projected.rows.len());
        for row in &projected.rows {
            let mut values = Vec::with_capacity(columns.len());
            for column in &columns {
                let binding = row.get(column).cloned().unwrap_or(Binding::Null);
                values.push((column.clone(), self.binding_value(&binding)?));
            }
            result_rows.push(ResultRow { values });
        }
        Ok(self.finish(columns, result_rows))
    }

    /// Projection of a bare variable carries its binding (entities stay
    /// entities for downstream clauses); everything else becomes a value.
    fn project_binding(&mut self, expr: &Expr, row: &Row) -> Result<Binding> {
        if let Expr::Variable(name) = expr {
            if let Some(binding) = row.get(name) {
                return Ok(binding.clone());
            }
        }
        Ok(Binding::Value(self.eval(expr, row)?))
    }

    fn const_usize(&mut self, expr: &Expr, clause: &str) -> Result<usize> {
        let val = self.eval(expr, &Row::new())?;
        match val {
            Value::Int(n) if n >= 0 => Ok(n as usize),
            _ => Err(Error::Semantic(format!(
                "{clause} requires a non-negative integer"
            ))),
        }
    }
}

enum Target {
    Node(NodeId),
    Edge(EdgeId),
    Absent,
}

/// Expand `*` to all row-set columns in binding order.
fn expand_star_items(rows: &RowSet, items: &[ProjectionItem]) -> Result<Vec<ProjectionItem>> {
    let mut out = Vec::new();
    for item in items {
        if matches!(item.expr, Expr::Star) {
            if rows.columns.is_empty() {
                return Err(Error::Semantic("RETURN * with no variables in scope".into()));
            }
            for name in &rows.columns {
                out.push(ProjectionItem {
                    expr: Expr::Variable(name.clone()),
                    alias: None,
                    text: name.clone(),
                });
            }
        } else {
            out.push(item.clone());
        }
    }
    Ok(out)
}

/// Canonical key for grouping and DISTINCT.
fn binding_key(binding: &Binding) -> String {
    match binding {
        Binding::Null => "\u{0}null".into(),
        Binding::Node(id) => format!("n:{id}"),
        Binding::Edge(id) => format!("e:{id}"),
        Binding::Value(v) => format!("v:{}", v.to_json()),
        Binding::Path { nodes, edges } => format!(
            "p:{}|{}",
            nodes.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(","),
            edges.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(",")
        ),
    }
}

/// Bind the output columns of a MATCH statement row onto an existing row.
fn extend_row_from_outputs(row: &Row, plan: &MatchPlan, sql_row: &crate::storage::SqlRow) -> Result<Row> {
    let mut extended = row.clone();
    let mut cursor = 0usize;
    for (name, kind) in &plan.outputs {
        match kind {
            OutputKind::Node => {
                let id = id_cell(sql_row, cursor, NodeId::parse)?;
                extended.insert(name.clone(), Binding::Node(id));
                cursor += 1;
            }
            OutputKind::Edge => {
                let id = id_cell(sql_row, cursor, EdgeId::parse)?;
                extended.insert(name.clone(), Binding::Edge(id));
                cursor += 1;
            }
            OutputKind::Path => {
                let nodes = id_list_cell(sql_row, cursor, NodeId::parse)?;
                let edges = id_list_cell(sql_row, cursor + 1, EdgeId::parse)?;
                extended.insert(name.clone(), Binding::Path { nodes, edges });
                cursor += 2;
            }
        }
    }
    Ok(extended)
}

fn id_cell<T>(
    sql_row: &crate::storage::SqlRow,
    index: usize,
    parse: fn(&str) -> Option<T>,
) -> Result<T> {
    sql_row
        .at(index)
        .and_then(Value::as_str)
        .and_then(parse)
        .ok_or_else(|| Error::Internal(format!("malformed id in match output column {index}")))
}

fn id_list_cell<T>(
    sql_row: &crate::storage::SqlRow,
    index: usize,
    parse: fn(&str) -> Option<T>,
) -> Result<Vec<T>> {
    let text = sql_row
        .at(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Internal(format!("missing id list in match output {index}")))?;
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("malformed id list: {e}")))?;
    json.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .filter_map(parse)
                .collect()
        })
        .ok_or_else(|| Error::Internal("id list is not a JSON array".into()))
}
