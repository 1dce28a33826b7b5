//! Expression evaluator for multi-phase execution.
//!
//! Evaluates Cypher expressions against a row of bindings. Entities inflate
//! through the per-query cache; aggregation happens over row groups in
//! `aggregate_rows`.

use chrono::Utc;

use crate::cypher::ast::{
    is_aggregate_function, BinaryOp, Expr, Literal, Pattern, Quantifier, StringOp, UnaryOp,
};
use crate::model::{Path, PropertyMap, Value};
use crate::storage::StorageEngine;
use crate::translate::{self, ParamSlot};
use crate::{Error, Result};

use super::rowset::{binding_param, Binding, Row, RowSet};
use super::Executor;

impl<'e, E: StorageEngine> Executor<'e, E> {
    /// Evaluate a Cypher expression against a row of bound variables.
    pub(crate) fn eval(&mut self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::Null => Value::Null,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::String(s) => Value::String(s.clone()),
            }),

            Expr::Parameter(name) => self
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Semantic(format!("missing parameter ${name}"))),

            Expr::Variable(name) => {
                let binding = row
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::Semantic(format!("unknown variable '{name}'")))?;
                self.binding_value(&binding)
            }

            Expr::Property { expr: inner, key } => {
                let base = self.eval(inner, row)?;
                Ok(match base {
                    Value::Node(n) => n.get(key).cloned().unwrap_or(Value::Null),
                    Value::Relationship(r) => {
                        r.properties.get(key).cloned().unwrap_or(Value::Null)
                    }
                    Value::Map(m) => m.get(key).cloned().unwrap_or(Value::Null),
                    Value::Null => Value::Null,
                    other => {
                        return Err(Error::Semantic(format!(
                            "cannot read property '{key}' of {}",
                            other.type_name()
                        )));
                    }
                })
            }

            Expr::Index { expr: inner, index } => {
                let base = self.eval(inner, row)?;
                let idx = self.eval(index, row)?;
                match (base, idx) {
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    (Value::List(items), Value::Int(i)) => {
                        let len = items.len() as i64;
                        let at = if i < 0 { i + len } else { i };
                        if at < 0 || at >= len {
                            Ok(Value::Null)
                        } else {
                            Ok(items[at as usize].clone())
                        }
                    }
                    (Value::Map(m), Value::String(key)) => {
                        Ok(m.get(&key).cloned().unwrap_or(Value::Null))
                    }
                    (base, idx) => Err(Error::Semantic(format!(
                        "cannot index {} with {}",
                        base.type_name(),
                        idx.type_name()
                    ))),
                }
            }

            Expr::FunctionCall { name, args, .. } => {
                if is_aggregate_function(name) {
                    return Err(Error::Semantic(format!(
                        "aggregation function {name}() is only allowed in RETURN or WITH"
                    )));
                }
                self.eval_function(name, args, row)
            }

            Expr::BinaryOp { left, op, right } => match op {
                BinaryOp::And => {
                    let l = self.eval(left, row)?;
                    if matches!(l, Value::Bool(false)) {
                        return Ok(Value::Bool(false));
                    }
                    let r = self.eval(right, row)?;
                    Ok(match (l.is_null(), r.is_null()) {
                        (_, _) if matches!(r, Value::Bool(false)) => Value::Bool(false),
                        (true, _) | (_, true) => Value::Null,
                        _ => Value::Bool(l.is_truthy() && r.is_truthy()),
                    })
                }
                BinaryOp::Or => {
                    let l = self.eval(left, row)?;
                    if matches!(l, Value::Bool(true)) {
                        return Ok(Value::Bool(true));
                    }
                    let r = self.eval(right, row)?;
                    Ok(match (l.is_null(), r.is_null()) {
                        (_, _) if matches!(r, Value::Bool(true)) => Value::Bool(true),
                        (true, _) | (_, true) => Value::Null,
                        _ => Value::Bool(l.is_truthy() || r.is_truthy()),
                    })
                }
                _ => {
                    let l = self.eval(left, row)?;
                    let r = self.eval(right, row)?;
                    eval_binary_op(&l, *op, &r)
                }
            },

            Expr::UnaryOp { op, expr: inner } => {
                let val = self.eval(inner, row)?;
                match op {
                    UnaryOp::Not => Ok(match val {
                        Value::Null => Value::Null,
                        Value::Bool(b) => Value::Bool(!b),
                        other => Value::Bool(!other.is_truthy()),
                    }),
                    UnaryOp::Negate => Ok(match val {
                        Value::Int(i) => Value::Int(-i),
                        Value::Float(f) => Value::Float(-f),
                        Value::Null => Value::Null,
                        other => {
                            return Err(Error::Semantic(format!(
                                "cannot negate {}",
                                other.type_name()
                            )));
                        }
                    }),
                }
            }

            Expr::List(items) => {
                let vals: Vec<Value> = items
                    .iter()
                    .map(|e| self.eval(e, row))
                    .collect::<Result<_>>()?;
                Ok(Value::List(vals))
            }

            Expr::Map(entries) => {
                let mut map = PropertyMap::new();
                for (k, v) in entries {
                    map.insert(k.clone(), self.eval(v, row)?);
                }
                Ok(Value::Map(map))
            }

            Expr::Case { operand, whens, else_expr } => {
                if let Some(op) = operand {
                    let op_val = self.eval(op, row)?;
                    for (when, then) in whens {
                        if self.eval(when, row)? == op_val {
                            return self.eval(then, row);
                        }
                    }
                } else {
                    for (when, then) in whens {
                        if self.eval(when, row)?.is_truthy() {
                            return self.eval(then, row);
                        }
                    }
                }
                match else_expr {
                    Some(e) => self.eval(e, row),
                    None => Ok(Value::Null),
                }
            }

            Expr::ListComprehension { variable, list, filter, projection } => {
                let source = self.eval(list, row)?;
                let items = match source {
                    Value::Null => return Ok(Value::Null),
                    Value::List(items) => items,
                    other => {
                        return Err(Error::Semantic(format!(
                            "cannot iterate {}",
                            other.type_name()
                        )));
                    }
                };
                let mut scope = row.clone();
                let mut out = Vec::new();
                for item in items {
                    scope.insert(variable.clone(), Binding::Value(item.clone()));
                    if let Some(f) = filter {
                        if !self.eval(f, &scope)?.is_truthy() {
                            continue;
                        }
                    }
                    match projection {
                        Some(p) => out.push(self.eval(p, &scope)?),
                        None => out.push(item),
                    }
                }
                Ok(Value::List(out))
            }

            Expr::ListPredicate { quantifier, variable, list, predicate } => {
                let source = self.eval(list, row)?;
                let items = match source {
                    Value::Null => return Ok(Value::Null),
                    Value::List(items) => items,
                    other => {
                        return Err(Error::Semantic(format!(
                            "cannot iterate {}",
                            other.type_name()
                        )));
                    }
                };
                let mut scope = row.clone();
                let mut matched = 0usize;
                for item in items.iter() {
                    scope.insert(variable.clone(), Binding::Value(item.clone()));
                    if self.eval(predicate, &scope)?.is_truthy() {
                        matched += 1;
                    }
                }
                Ok(Value::Bool(match quantifier {
                    Quantifier::All => matched == items.len(),
                    Quantifier::Any => matched > 0,
                    Quantifier::None => matched == 0,
                    Quantifier::Single => matched == 1,
                }))
            }

            Expr::PatternExists(pattern) => {
                let exists = self.pattern_exists(pattern, row)?;
                Ok(Value::Bool(exists))
            }

            Expr::In { expr: item, list } => {
                let needle = self.eval(item, row)?;
                let haystack = self.eval(list, row)?;
                match haystack {
                    Value::Null => Ok(Value::Null),
                    Value::List(items) => {
                        if needle.is_null() {
                            Ok(Value::Null)
                        } else {
                            Ok(Value::Bool(items.iter().any(|v| *v == needle)))
                        }
                    }
                    other => Err(Error::Semantic(format!(
                        "IN requires a list, got {}",
                        other.type_name()
                    ))),
                }
            }

            Expr::IsNull { expr: inner, negated } => {
                let val = self.eval(inner, row)?;
                let is_null = val.is_null();
                Ok(Value::Bool(if *negated { !is_null } else { is_null }))
            }

            Expr::StringOp { left, op, right } => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                match (&l, &r) {
                    (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                    (Value::String(a), Value::String(b)) => Ok(Value::Bool(match op {
                        StringOp::StartsWith => a.starts_with(b.as_str()),
                        StringOp::EndsWith => a.ends_with(b.as_str()),
                        StringOp::Contains => a.contains(b.as_str()),
                    })),
                    _ => Err(Error::Semantic(format!(
                        "string predicate requires strings, got {} and {}",
                        l.type_name(),
                        r.type_name()
                    ))),
                }
            }

            Expr::HasLabel { expr: inner, label } => {
                let val = self.eval(inner, row)?;
                match val {
                    Value::Node(n) => Ok(Value::Bool(n.has_label(label))),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "label check requires a node, got {}",
                        other.type_name()
                    ))),
                }
            }

            Expr::Star => Err(Error::Internal("'*' reached the evaluator".into())),
        }
    }

    /// Inflate a row binding into a value.
    pub(crate) fn binding_value(&mut self, binding: &Binding) -> Result<Value> {
        match binding {
            Binding::Null => Ok(Value::Null),
            Binding::Value(v) => Ok(v.clone()),
            Binding::Node(id) => Ok(self
                .load_node(*id)?
                .map(|n| Value::Node(Box::new(n)))
                .unwrap_or(Value::Null)),
            Binding::Edge(id) => Ok(self
                .load_edge(*id)?
                .map(|r| Value::Relationship(Box::new(r)))
                .unwrap_or(Value::Null)),
            Binding::Path { nodes, edges } => {
                let path = self.materialize_path(nodes, edges)?;
                Ok(Value::Path(Box::new(path)))
            }
        }
    }

    pub(crate) fn materialize_path(
        &mut self,
        node_ids: &[crate::model::NodeId],
        edge_ids: &[crate::model::EdgeId],
    ) -> Result<Path> {
        let mut nodes = Vec::with_capacity(node_ids.len());
        for id in node_ids {
            nodes.push(self.load_node(*id)?.ok_or_else(|| {
                Error::Internal(format!("path references missing node {id}"))
            })?);
        }
        let mut relationships = Vec::with_capacity(edge_ids.len());
        for id in edge_ids {
            relationships.push(self.load_edge(*id)?.ok_or_else(|| {
                Error::Internal(format!("path references missing edge {id}"))
            })?);
        }
        Ok(Path { nodes, relationships })
    }

    /// `EXISTS(pattern)` inside the interpreter: run the pattern as a
    /// one-row MATCH and test for any result.
    fn pattern_exists(&mut self, pattern: &Pattern, row: &Row) -> Result<bool> {
        let bound: Vec<(String, translate::BoundKind)> = row
            .iter()
            .map(|(name, binding)| {
                let kind = match binding {
                    Binding::Node(_) => translate::BoundKind::Node,
                    Binding::Edge(_) => translate::BoundKind::Edge,
                    _ => translate::BoundKind::Value,
                };
                (name.clone(), kind)
            })
            .collect();
        let plan = translate::match_plan(
            std::slice::from_ref(pattern),
            None,
            &bound,
            &self.params,
            &self.opts,
        )?;
        let params = self.resolve_slots(&plan.statement.slots, row);
        let rows = self.run_stmt(&plan.statement.sql, &params)?;
        Ok(!rows.is_empty())
    }

    /// Fill a statement's parameter slots from a row.
    pub(crate) fn resolve_slots(&self, slots: &[ParamSlot], row: &Row) -> Vec<Value> {
        slots
            .iter()
            .map(|slot| match slot {
                ParamSlot::Const(v) => v.clone(),
                ParamSlot::Row(name) => binding_param(row.get(name)),
            })
            .collect()
    }

    // ========================================================================
    // Scalar functions
    // ========================================================================

    fn eval_function(&mut self, name: &str, args: &[Expr], row: &Row) -> Result<Value> {
        let lower = name.to_ascii_lowercase();

        let arg = |i: usize| -> Result<&Expr> {
            args.get(i)
                .ok_or_else(|| Error::Semantic(format!("{name}() is missing argument {i}")))
        };

        match lower.as_str() {
            "id" => {
                let val = self.eval(arg(0)?, row)?;
                match val {
                    Value::Node(n) => Ok(Value::String(n.id.to_string())),
                    Value::Relationship(r) => Ok(Value::String(r.id.to_string())),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "id() requires an entity, got {}",
                        other.type_name()
                    ))),
                }
            }
            "labels" => {
                let val = self.eval(arg(0)?, row)?;
                match val {
                    Value::Node(n) => Ok(Value::List(
                        n.labels.iter().map(|l| Value::String(l.clone())).collect(),
                    )),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "labels() requires a node, got {}",
                        other.type_name()
                    ))),
                }
            }
            "type" => {
                let val = self.eval(arg(0)?, row)?;
                match val {
                    Value::Relationship(r) => Ok(Value::String(r.rel_type.clone())),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "type() requires a relationship, got {}",
                        other.type_name()
                    ))),
                }
            }
            "properties" => {
                let val = self.eval(arg(0)?, row)?;
                match val {
                    Value::Node(n) => Ok(Value::Map(n.properties.clone())),
                    Value::Relationship(r) => Ok(Value::Map(r.properties.clone())),
                    Value::Map(_) => Ok(val),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "properties() requires an entity or map, got {}",
                        other.type_name()
                    ))),
                }
            }
            "keys" => {
                let val = self.eval(arg(0)?, row)?;
                let mut keys: Vec<String> = match val {
                    Value::Node(n) => n.properties.keys().cloned().collect(),
                    Value::Relationship(r) => r.properties.keys().cloned().collect(),
                    Value::Map(m) => m.keys().cloned().collect(),
                    Value::Null => return Ok(Value::Null),
                    other => {
                        return Err(Error::Semantic(format!(
                            "keys() requires an entity or map, got {}",
                            other.type_name()
                        )));
                    }
                };
                keys.sort();
                Ok(Value::List(keys.into_iter().map(Value::String).collect()))
            }
            "size" | "length" => {
                let val = self.eval(arg(0)?, row)?;
                match val {
                    Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
                    Value::List(l) => Ok(Value::Int(l.len() as i64)),
                    Value::Path(p) => Ok(Value::Int(p.len() as i64)),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "{name}() requires a string, list, or path, got {}",
                        other.type_name()
                    ))),
                }
            }
            "head" => match self.eval(arg(0)?, row)? {
                Value::List(l) => Ok(l.into_iter().next().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::Semantic(format!(
                    "head() requires a list, got {}",
                    other.type_name()
                ))),
            },
            "last" => match self.eval(arg(0)?, row)? {
                Value::List(l) => Ok(l.into_iter().next_back().unwrap_or(Value::Null)),
                Value::Null => Ok(Value::Null),
                other => Err(Error::Semantic(format!(
                    "last() requires a list, got {}",
                    other.type_name()
                ))),
            },
            "tail" => match self.eval(arg(0)?, row)? {
                Value::List(mut l) => {
                    if !l.is_empty() {
                        l.remove(0);
                    }
                    Ok(Value::List(l))
                }
                Value::Null => Ok(Value::Null),
                other => Err(Error::Semantic(format!(
                    "tail() requires a list, got {}",
                    other.type_name()
                ))),
            },
            "range" => {
                let start = int_arg(self.eval(arg(0)?, row)?, "range")?;
                let end = int_arg(self.eval(arg(1)?, row)?, "range")?;
                let step = match args.get(2) {
                    Some(e) => int_arg(self.eval(e, row)?, "range")?,
                    None => 1,
                };
                if step == 0 {
                    return Err(Error::Semantic("range() step must not be zero".into()));
                }
                let mut list = Vec::new();
                let mut i = start;
                while (step > 0 && i <= end) || (step < 0 && i >= end) {
                    list.push(Value::Int(i));
                    i += step;
                }
                Ok(Value::List(list))
            }
            "coalesce" => {
                for a in args {
                    let val = self.eval(a, row)?;
                    if !val.is_null() {
                        return Ok(val);
                    }
                }
                Ok(Value::Null)
            }
            "abs" => numeric_fn(self.eval(arg(0)?, row)?, i64::abs, f64::abs),
            "ceil" => float_fn(self.eval(arg(0)?, row)?, f64::ceil),
            "floor" => float_fn(self.eval(arg(0)?, row)?, f64::floor),
            "round" => float_fn(self.eval(arg(0)?, row)?, f64::round),
            "sqrt" => float_fn(self.eval(arg(0)?, row)?, f64::sqrt),
            "rand" => {
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.subsec_nanos())
                    .unwrap_or(0);
                Ok(Value::Float((nanos as f64 / 1e9).fract()))
            }
            "nodes" => match self.eval(arg(0)?, row)? {
                Value::Path(p) => Ok(Value::List(
                    p.nodes.into_iter().map(|n| Value::Node(Box::new(n))).collect(),
                )),
                Value::Null => Ok(Value::Null),
                other => Err(Error::Semantic(format!(
                    "nodes() requires a path, got {}",
                    other.type_name()
                ))),
            },
            "relationships" => match self.eval(arg(0)?, row)? {
                Value::Path(p) => Ok(Value::List(
                    p.relationships
                        .into_iter()
                        .map(|r| Value::Relationship(Box::new(r)))
                        .collect(),
                )),
                Value::Null => Ok(Value::Null),
                other => Err(Error::Semantic(format!(
                    "relationships() requires a path, got {}",
                    other.type_name()
                ))),
            },
            "toupper" => string_fn(self.eval(arg(0)?, row)?, |s| s.to_uppercase()),
            "tolower" => string_fn(self.eval(arg(0)?, row)?, |s| s.to_lowercase()),
            "trim" => string_fn(self.eval(arg(0)?, row)?, |s| s.trim().to_owned()),
            "ltrim" => string_fn(self.eval(arg(0)?, row)?, |s| s.trim_start().to_owned()),
            "rtrim" => string_fn(self.eval(arg(0)?, row)?, |s| s.trim_end().to_owned()),
            "reverse" => match self.eval(arg(0)?, row)? {
                Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
                Value::List(mut l) => {
                    l.reverse();
                    Ok(Value::List(l))
                }
                Value::Null => Ok(Value::Null),
                other => Err(Error::Semantic(format!(
                    "reverse() requires a string or list, got {}",
                    other.type_name()
                ))),
            },
            "left" => {
                let s = str_arg(self.eval(arg(0)?, row)?, "left")?;
                let n = int_arg(self.eval(arg(1)?, row)?, "left")?.max(0) as usize;
                Ok(Value::String(s.chars().take(n).collect()))
            }
            "right" => {
                let s = str_arg(self.eval(arg(0)?, row)?, "right")?;
                let n = int_arg(self.eval(arg(1)?, row)?, "right")?.max(0) as usize;
                let chars: Vec<char> = s.chars().collect();
                let skip = chars.len().saturating_sub(n);
                Ok(Value::String(chars[skip..].iter().collect()))
            }
            "substring" => {
                let s = str_arg(self.eval(arg(0)?, row)?, "substring")?;
                let start = int_arg(self.eval(arg(1)?, row)?, "substring")?.max(0) as usize;
                let chars: Vec<char> = s.chars().collect();
                let slice: String = match args.get(2) {
                    Some(len_expr) => {
                        let len =
                            int_arg(self.eval(len_expr, row)?, "substring")?.max(0) as usize;
                        chars.iter().skip(start).take(len).collect()
                    }
                    None => chars.iter().skip(start).collect(),
                };
                Ok(Value::String(slice))
            }
            "replace" => {
                let s = str_arg(self.eval(arg(0)?, row)?, "replace")?;
                let from = str_arg(self.eval(arg(1)?, row)?, "replace")?;
                let to = str_arg(self.eval(arg(2)?, row)?, "replace")?;
                Ok(Value::String(s.replace(&from, &to)))
            }
            "split" => {
                let s = str_arg(self.eval(arg(0)?, row)?, "split")?;
                let delim = str_arg(self.eval(arg(1)?, row)?, "split")?;
                Ok(Value::List(
                    s.split(delim.as_str())
                        .map(|p| Value::String(p.to_owned()))
                        .collect(),
                ))
            }
            "tostring" => {
                let val = self.eval(arg(0)?, row)?;
                Ok(match val {
                    Value::Null => Value::Null,
                    Value::String(_) => val,
                    Value::Int(i) => Value::String(i.to_string()),
                    Value::Float(f) => Value::String(f.to_string()),
                    Value::Bool(b) => Value::String(b.to_string()),
                    other => Value::String(format!("{other}")),
                })
            }
            "tointeger" => {
                let val = self.eval(arg(0)?, row)?;
                Ok(match val {
                    Value::Int(_) => val,
                    Value::Float(f) => Value::Int(f as i64),
                    Value::String(s) => {
                        s.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                })
            }
            "tofloat" => {
                let val = self.eval(arg(0)?, row)?;
                Ok(match val {
                    Value::Float(_) => val,
                    Value::Int(i) => Value::Float(i as f64),
                    Value::String(s) => {
                        s.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                })
            }
            "toboolean" => {
                let val = self.eval(arg(0)?, row)?;
                Ok(match val {
                    Value::Bool(_) => val,
                    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                        "true" => Value::Bool(true),
                        "false" => Value::Bool(false),
                        _ => Value::Null,
                    },
                    Value::Int(i) => Value::Bool(i != 0),
                    _ => Value::Null,
                })
            }
            "date" => match args.first() {
                Some(arg) => match self.eval(arg, row)? {
                    Value::Null => Ok(Value::Null),
                    Value::String(s) => Ok(parse_temporal(&s)
                        .map(|dt| Value::String(dt.format("%Y-%m-%d").to_string()))
                        .unwrap_or(Value::Null)),
                    other => Err(Error::Semantic(format!(
                        "date() requires a string, got {}",
                        other.type_name()
                    ))),
                },
                None => Ok(Value::String(Utc::now().format("%Y-%m-%d").to_string())),
            },
            "datetime" => match args.first() {
                Some(arg) => match self.eval(arg, row)? {
                    Value::Null => Ok(Value::Null),
                    Value::String(s) => Ok(parse_temporal(&s)
                        .map(|dt| {
                            Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
                        })
                        .unwrap_or(Value::Null)),
                    other => Err(Error::Semantic(format!(
                        "datetime() requires a string, got {}",
                        other.type_name()
                    ))),
                },
                None => Ok(Value::String(
                    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                )),
            },
            "timestamp" => Ok(Value::Int(Utc::now().timestamp_millis())),
            "exists" => {
                let val = self.eval(arg(0)?, row)?;
                Ok(Value::Bool(!val.is_null()))
            }
            other => Err(Error::Unsupported(format!("function {other}()"))),
        }
    }

    // ========================================================================
    // Aggregation over row groups
    // ========================================================================

    /// Evaluate a projection expression that may contain aggregate calls
    /// over a group of rows.
    pub(crate) fn eval_agg_expr(&mut self, expr: &Expr, group: &[&Row]) -> Result<Value> {
        if let Expr::FunctionCall { name, args, distinct } = expr {
            if is_aggregate_function(name) {
                return self.compute_aggregate(name, args, *distinct, group);
            }
        }
        match expr {
            Expr::BinaryOp { left, op, right } => {
                let l = self.eval_agg_expr(left, group)?;
                let r = self.eval_agg_expr(right, group)?;
                match op {
                    BinaryOp::And | BinaryOp::Or => Ok(Value::Bool(if *op == BinaryOp::And {
                        l.is_truthy() && r.is_truthy()
                    } else {
                        l.is_truthy() || r.is_truthy()
                    })),
                    _ => eval_binary_op(&l, *op, &r),
                }
            }
            Expr::UnaryOp { op: UnaryOp::Negate, expr } => {
                match self.eval_agg_expr(expr, group)? {
                    Value::Int(i) => Ok(Value::Int(-i)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    Value::Null => Ok(Value::Null),
                    other => Err(Error::Semantic(format!(
                        "cannot negate {}",
                        other.type_name()
                    ))),
                }
            }
            other => match group.first() {
                Some(row) => self.eval(other, row),
                None => Ok(Value::Null),
            },
        }
    }

    fn compute_aggregate(
        &mut self,
        name: &str,
        args: &[Expr],
        distinct: bool,
        group: &[&Row],
    ) -> Result<Value> {
        let lower = name.to_ascii_lowercase();

        // count(*) counts rows, everything else skips nulls.
        if lower == "count" && args.is_empty() {
            return Ok(Value::Int(group.len() as i64));
        }
        let arg = args
            .first()
            .ok_or_else(|| Error::Semantic(format!("{name}() requires an argument")))?;

        let mut vals = Vec::new();
        for row in group {
            let val = self.eval(arg, row)?;
            if !val.is_null() {
                vals.push(val);
            }
        }
        if distinct {
            let mut deduped: Vec<Value> = Vec::new();
            for val in vals {
                if !deduped.contains(&val) {
                    deduped.push(val);
                }
            }
            vals = deduped;
        }

        match lower.as_str() {
            "count" => Ok(Value::Int(vals.len() as i64)),
            "sum" => {
                let mut sum_i: i64 = 0;
                let mut sum_f: f64 = 0.0;
                let mut has_float = false;
                for val in &vals {
                    match val {
                        Value::Int(i) => sum_i += i,
                        Value::Float(f) => {
                            has_float = true;
                            sum_f += f;
                        }
                        other => {
                            return Err(Error::Semantic(format!(
                                "sum() over {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                if has_float {
                    Ok(Value::Float(sum_i as f64 + sum_f))
                } else {
                    Ok(Value::Int(sum_i))
                }
            }
            "avg" => {
                if vals.is_empty() {
                    return Ok(Value::Null);
                }
                let mut sum = 0.0;
                for val in &vals {
                    sum += val.as_float().ok_or_else(|| {
                        Error::Semantic(format!("avg() over {}", val.type_name()))
                    })?;
                }
                Ok(Value::Float(sum / vals.len() as f64))
            }
            "min" => Ok(vals
                .into_iter()
                .reduce(|a, b| {
                    if a.cypher_cmp(&b) == Some(std::cmp::Ordering::Less) { a } else { b }
                })
                .unwrap_or(Value::Null)),
            "max" => Ok(vals
                .into_iter()
                .reduce(|a, b| {
                    if a.cypher_cmp(&b) == Some(std::cmp::Ordering::Greater) { a } else { b }
                })
                .unwrap_or(Value::Null)),
            "collect" => Ok(Value::List(vals)),
            "percentiledisc" | "percentilecont" => {
                let p = args
                    .get(1)
                    .map(|e| self.eval(e, group.first().copied().unwrap_or(&Row::new())))
                    .transpose()?
                    .and_then(|v| v.as_float())
                    .ok_or_else(|| {
                        Error::Semantic(format!("{name}() requires a percentile argument"))
                    })?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(Error::Semantic(format!(
                        "{name}() percentile must be between 0.0 and 1.0"
                    )));
                }
                percentile(&vals, p, lower == "percentilecont")
            }
            other => Err(Error::Internal(format!("unhandled aggregate {other}()"))),
        }
    }

    /// True when the expression is truthy for this row.
    pub(crate) fn eval_truthy(&mut self, expr: &Expr, row: &Row) -> Result<bool> {
        Ok(self.eval(expr, row)?.is_truthy())
    }

    /// Drop rows that fail a predicate.
    pub(crate) fn filter_rows(&mut self, rows: &mut RowSet, predicate: &Expr) -> Result<()> {
        let mut kept = Vec::with_capacity(rows.rows.len());
        for row in rows.rows.drain(..) {
            if self.eval_truthy(predicate, &row)? {
                kept.push(row);
            }
        }
        rows.rows = kept;
        Ok(())
    }
}

// ============================================================================
// Operator helpers
// ============================================================================

pub(crate) fn eval_binary_op(left: &Value, op: BinaryOp, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinaryOp::Eq => Ok(Value::Bool(left == right)),
        BinaryOp::Neq => Ok(Value::Bool(left != right)),
        BinaryOp::Lt => Ok(cmp_bool(left, right, |o| o == std::cmp::Ordering::Less)),
        BinaryOp::Lte => Ok(cmp_bool(left, right, |o| o != std::cmp::Ordering::Greater)),
        BinaryOp::Gt => Ok(cmp_bool(left, right, |o| o == std::cmp::Ordering::Greater)),
        BinaryOp::Gte => Ok(cmp_bool(left, right, |o| o != std::cmp::Ordering::Less)),

        BinaryOp::Add => eval_add(left, right),
        BinaryOp::Sub => eval_arith(left, right, i64::wrapping_sub, |a, b| a - b),
        BinaryOp::Mul => eval_arith(left, right, i64::wrapping_mul, |a, b| a * b),
        BinaryOp::Div => match right {
            Value::Int(0) => Err(Error::Semantic("division by zero".into())),
            Value::Float(f) if *f == 0.0 => Err(Error::Semantic("division by zero".into())),
            _ => eval_arith(left, right, i64::wrapping_div, |a, b| a / b),
        },
        BinaryOp::Mod => match right {
            Value::Int(0) => Err(Error::Semantic("division by zero".into())),
            _ => eval_arith(left, right, i64::wrapping_rem, |a, b| a % b),
        },

        BinaryOp::And | BinaryOp::Or => {
            Err(Error::Internal("logical operator fell through to value evaluation".into()))
        }
    }
}

fn cmp_bool(left: &Value, right: &Value, pred: fn(std::cmp::Ordering) -> bool) -> Value {
    match left.cypher_cmp(right) {
        Some(ord) => Value::Bool(pred(ord)),
        None => Value::Null,
    }
}

fn eval_add(left: &Value, right: &Value) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::String(a), b) if b.is_numeric() => Ok(Value::String(format!("{a}{b}"))),
        (a, Value::String(b)) if a.is_numeric() => Ok(Value::String(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.clone());
            Ok(Value::List(out))
        }
        (Value::List(a), b) => {
            let mut out = a.clone();
            out.push(b.clone());
            Ok(Value::List(out))
        }
        _ => Err(Error::Semantic(format!(
            "cannot add {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn eval_arith(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(*a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(*a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(*a, *b as f64))),
        _ => Err(Error::Semantic(format!(
            "arithmetic requires numbers, got {} and {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn numeric_fn(val: Value, int_op: fn(i64) -> i64, float_op: fn(f64) -> f64) -> Result<Value> {
    match val {
        Value::Int(i) => Ok(Value::Int(int_op(i))),
        Value::Float(f) => Ok(Value::Float(float_op(f))),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Semantic(format!("expected a number, got {}", other.type_name()))),
    }
}

fn float_fn(val: Value, op: fn(f64) -> f64) -> Result<Value> {
    match val {
        Value::Int(i) => Ok(Value::Float(op(i as f64))),
        Value::Float(f) => Ok(Value::Float(op(f))),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Semantic(format!("expected a number, got {}", other.type_name()))),
    }
}

fn string_fn(val: Value, op: impl Fn(&str) -> String) -> Result<Value> {
    match val {
        Value::String(s) => Ok(Value::String(op(&s))),
        Value::Null => Ok(Value::Null),
        other => Err(Error::Semantic(format!("expected a string, got {}", other.type_name()))),
    }
}

fn str_arg(val: Value, name: &str) -> Result<String> {
    match val {
        Value::String(s) => Ok(s),
        other => Err(Error::Semantic(format!(
            "{name}() expected a string, got {}",
            other.type_name()
        ))),
    }
}

fn int_arg(val: Value, name: &str) -> Result<i64> {
    val.as_int().ok_or_else(|| Error::Semantic(format!("{name}() expected an integer")))
}

/// Parse the date/datetime shapes SQLite's date functions accept: RFC 3339,
/// `YYYY-MM-DDTHH:MM:SS[.fff]`, the space-separated variant, and bare dates
/// (midnight). Unparseable input is None, so both execution paths agree on
/// NULL for bad dates.
fn parse_temporal(text: &str) -> Option<chrono::NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Shared percentile machinery: discrete picks a member, continuous
/// interpolates between neighbors.
fn percentile(vals: &[Value], p: f64, continuous: bool) -> Result<Value> {
    if vals.is_empty() {
        return Ok(Value::Null);
    }
    let mut nums: Vec<f64> = vals
        .iter()
        .map(|v| {
            v.as_float()
                .ok_or_else(|| Error::Semantic(format!("percentile over {}", v.type_name())))
        })
        .collect::<Result<_>>()?;
    nums.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    if continuous {
        let rank = p * (nums.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let frac = rank - lo as f64;
        Ok(Value::Float(nums[lo] + (nums[hi] - nums[lo]) * frac))
    } else {
        let idx = ((p * nums.len() as f64).ceil() as usize).clamp(1, nums.len()) - 1;
        let picked = nums[idx];
        // Preserve integer identity when the inputs were integers.
        if vals.iter().all(|v| matches!(v, Value::Int(_))) {
            Ok(Value::Int(picked as i64))
        } else {
            Ok(Value::Float(picked))
        }
    }
}
