//! Expression compilation: Cypher expressions to SQL expressions.
//!
//! Property access goes through `json_extract` (SQL value semantics) for
//! predicates and through the `->` operator (faithful JSON) for projections.
//! All literals and parameter values travel as bound parameters.

use super::context::{PathPart, VarBinding};
use super::Lowering;
use crate::cypher::ast::{
    is_aggregate_function, BinaryOp, Expr, Literal, Quantifier, StringOp, UnaryOp,
};
use crate::model::Value;
use crate::{Error, Result};

impl<'a> Lowering<'a> {
    /// Compile an expression to a SQL expression with value semantics.
    pub fn compile_expr(&mut self, expr: &Expr) -> Result<String> {
        match expr {
            Expr::Literal(lit) => {
                let value = match lit {
                    Literal::Null => Value::Null,
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Int(i) => Value::Int(*i),
                    Literal::Float(f) => Value::Float(*f),
                    Literal::String(s) => Value::String(s.clone()),
                };
                Ok(self.push_const(value))
            }

            Expr::Parameter(name) => {
                let value = self.parameter(name)?;
                Ok(self.push_const(value))
            }

            Expr::Variable(name) => self.compile_variable(name),

            Expr::Property { .. } => {
                let (doc, path) = self
                    .json_locator(expr)?
                    .ok_or_else(|| Error::Unsupported("property access on this operand".into()))?;
                Ok(format!("json_extract({doc}, '{path}')"))
            }

            Expr::Index { expr: base, index } => {
                let idx = self
                    .const_value(index)
                    .and_then(|v| v.as_int())
                    .ok_or_else(|| {
                        Error::Unsupported("list index must be a constant integer".into())
                    })?;
                if let Some((doc, path)) = self.json_locator(base)? {
                    Ok(format!("json_extract({doc}, '{path}[{idx}]')"))
                } else {
                    let list = self.compile_list_source(base)?;
                    Ok(format!("json_extract({list}, '$[{idx}]')"))
                }
            }

            Expr::FunctionCall { name, args, distinct } => {
                if is_aggregate_function(name) {
                    return Err(Error::Semantic(format!(
                        "aggregation function {name}() is only allowed in RETURN or WITH"
                    )));
                }
                self.compile_scalar_function(name, args, *distinct)
            }

            Expr::BinaryOp { left, op, right } => self.compile_binary(left, *op, right),

            Expr::UnaryOp { op, expr } => {
                let inner = self.compile_expr(expr)?;
                Ok(match op {
                    UnaryOp::Not => format!("NOT ({inner})"),
                    UnaryOp::Negate => format!("-({inner})"),
                })
            }

            Expr::List(_) | Expr::Map(_) => {
                let json = self.compile_json_value(expr)?;
                Ok(json)
            }

            Expr::Case { operand, whens, else_expr } => {
                let mut sql = String::from("CASE");
                if let Some(op) = operand {
                    sql.push(' ');
                    sql.push_str(&self.compile_expr(op)?);
                }
                for (when, then) in whens {
                    let w = self.compile_expr(when)?;
                    let t = self.compile_expr(then)?;
                    sql.push_str(&format!(" WHEN {w} THEN {t}"));
                }
                if let Some(els) = else_expr {
                    let e = self.compile_expr(els)?;
                    sql.push_str(&format!(" ELSE {e}"));
                }
                sql.push_str(" END");
                Ok(sql)
            }

            Expr::ListComprehension { variable, list, filter, projection } => {
                self.compile_comprehension(variable, list, filter.as_deref(), projection.as_deref())
            }

            Expr::ListPredicate { quantifier, variable, list, predicate } => {
                self.compile_list_predicate(*quantifier, variable, list, predicate)
            }

            Expr::PatternExists(pattern) => self.compile_pattern_exists(pattern),

            Expr::In { expr, list } => self.compile_in(expr, list),

            Expr::IsNull { expr, negated } => {
                let inner = self.compile_expr(expr)?;
                Ok(if *negated {
                    format!("({inner} IS NOT NULL)")
                } else {
                    format!("({inner} IS NULL)")
                })
            }

            Expr::StringOp { left, op, right } => self.compile_string_op(left, *op, right),

            Expr::HasLabel { expr, label } => {
                let Expr::Variable(name) = expr.as_ref() else {
                    return Err(Error::Unsupported("label check on a non-variable".into()));
                };
                let alias = self.ctx.expect_node_alias(name)?.to_owned();
                let param = self.push_const(Value::String(label.clone()));
                Ok(format!(
                    "EXISTS (SELECT 1 FROM json_each({alias}.label) AS je WHERE je.value = {param})"
                ))
            }

            Expr::Star => Err(Error::Semantic("'*' is only valid as a projection".into())),
        }
    }

    pub(super) fn parameter(&self, name: &str) -> Result<Value> {
        self.params()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Semantic(format!("missing parameter ${name}")))
    }

    fn compile_variable(&mut self, name: &str) -> Result<String> {
        if let Some(sql) = self.iter_sql_owned(name) {
            return Ok(sql);
        }
        match self.ctx.lookup(name).cloned() {
            Some(VarBinding::Node { alias }) | Some(VarBinding::Edge { alias }) => {
                // A bare entity in scalar position stands for its identity.
                Ok(format!("{alias}.id"))
            }
            Some(VarBinding::RowValue) => Ok(self.push_row(name)),
            Some(VarBinding::IterValue { sql, .. }) => Ok(sql),
            Some(VarBinding::Path { .. }) => Err(Error::Unsupported(
                "a path variable cannot appear in scalar position".into(),
            )),
            None => Err(Error::Semantic(format!("unknown variable '{name}'"))),
        }
    }

    fn iter_sql_owned(&self, name: &str) -> Option<String> {
        self.iter_sql(name).map(str::to_owned)
    }

    // ========================================================================
    // Property locators
    // ========================================================================

    /// Resolve a property-access chain into a (JSON document SQL, JSON path)
    /// pair. Returns None when the expression is not locator-shaped.
    pub(super) fn json_locator(&mut self, expr: &Expr) -> Result<Option<(String, String)>> {
        let mut keys: Vec<&str> = Vec::new();
        let mut cursor = expr;
        while let Expr::Property { expr: inner, key } = cursor {
            keys.push(key);
            cursor = inner;
        }
        if keys.is_empty() {
            return Ok(None);
        }
        keys.reverse();
        let path = json_path(&keys)?;

        let doc = match cursor {
            Expr::Variable(name) => {
                if let Some(sql) = self.iter_sql_owned(name) {
                    sql
                } else {
                    match self.ctx.lookup(name).cloned() {
                        Some(VarBinding::Node { alias }) | Some(VarBinding::Edge { alias }) => {
                            format!("{alias}.properties")
                        }
                        Some(VarBinding::RowValue) => self.push_row(name),
                        Some(VarBinding::IterValue { sql, .. }) => sql,
                        Some(VarBinding::Path { .. }) => {
                            return Err(Error::Unsupported(
                                "property access on a path variable".into(),
                            ));
                        }
                        None => {
                            return Err(Error::Semantic(format!("unknown variable '{name}'")));
                        }
                    }
                }
            }
            Expr::Parameter(name) => {
                let value = self.parameter(name)?;
                self.push_const(value)
            }
            other => self.compile_expr(other)?,
        };

        Ok(Some((doc, path)))
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn compile_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> Result<String> {
        match op {
            BinaryOp::And => {
                let l = self.compile_expr(left)?;
                let r = self.compile_expr(right)?;
                Ok(format!("({l} AND {r})"))
            }
            BinaryOp::Or => {
                let l = self.compile_expr(left)?;
                let r = self.compile_expr(right)?;
                Ok(format!("({l} OR {r})"))
            }
            BinaryOp::Add => self.compile_add(left, right),
            BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                let l = self.compile_expr(left)?;
                let r = self.compile_expr(right)?;
                let sym = match op {
                    BinaryOp::Sub => "-",
                    BinaryOp::Mul => "*",
                    BinaryOp::Div => "/",
                    _ => "%",
                };
                Ok(format!("({l} {sym} {r})"))
            }
            BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt
            | BinaryOp::Gte => {
                let l = self.compile_expr(left)?;
                let r = self.compile_expr(right)?;
                let sym = match op {
                    BinaryOp::Eq => "=",
                    BinaryOp::Neq => "<>",
                    BinaryOp::Lt => "<",
                    BinaryOp::Lte => "<=",
                    BinaryOp::Gt => ">",
                    _ => ">=",
                };
                Ok(format!("({l} {sym} {r})"))
            }
        }
    }

    /// `+` is overloaded: list concatenation, string concatenation, or
    /// numeric addition, detected from what the operands statically are.
    fn compile_add(&mut self, left: &Expr, right: &Expr) -> Result<String> {
        if self.is_list_shaped(left) || self.is_list_shaped(right) {
            let l = self.compile_list_source(left)?;
            let r = self.compile_list_source(right)?;
            return Ok(format!(
                "(SELECT json_group_array(\
                 (CASE WHEN t IN ('object', 'array') THEN json(v) ELSE v END) \
                 ORDER BY part, k) FROM \
                 (SELECT 0 AS part, key AS k, value AS v, type AS t FROM json_each({l}) \
                  UNION ALL \
                  SELECT 1, key, value, type FROM json_each({r})))"
            ));
        }
        if self.is_string_shaped(left) || self.is_string_shaped(right) {
            let l = self.compile_expr(left)?;
            let r = self.compile_expr(right)?;
            return Ok(format!("({l} || {r})"));
        }
        let l = self.compile_expr(left)?;
        let r = self.compile_expr(right)?;
        Ok(format!("({l} + {r})"))
    }

    fn is_list_shaped(&self, expr: &Expr) -> bool {
        match expr {
            Expr::List(_) | Expr::ListComprehension { .. } => true,
            Expr::Parameter(name) => {
                matches!(self.params().get(name), Some(Value::List(_)))
            }
            Expr::FunctionCall { name, .. } => matches!(
                name.to_ascii_lowercase().as_str(),
                "collect" | "range" | "split" | "tail" | "labels" | "keys" | "nodes"
                    | "relationships"
            ),
            _ => false,
        }
    }

    fn is_string_shaped(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Literal(Literal::String(_)) => true,
            Expr::Parameter(name) => {
                matches!(self.params().get(name), Some(Value::String(_)))
            }
            Expr::FunctionCall { name, .. } => matches!(
                name.to_ascii_lowercase().as_str(),
                "tostring" | "toupper" | "tolower" | "trim" | "ltrim" | "rtrim" | "replace"
                    | "left" | "right" | "substring" | "reverse"
            ),
            Expr::BinaryOp { left, op: BinaryOp::Add, right } => {
                self.is_string_shaped(left) || self.is_string_shaped(right)
            }
            _ => false,
        }
    }

    fn compile_in(&mut self, needle: &Expr, haystack: &Expr) -> Result<String> {
        let l = self.compile_expr(needle)?;

        // Literal list of constants: IN (?, ?, ?)
        if let Expr::List(items) = haystack {
            let consts: Option<Vec<Value>> =
                items.iter().map(|e| self.const_value(e)).collect();
            if let Some(values) = consts {
                if values.is_empty() {
                    return Ok("0".into());
                }
                let refs: Vec<String> =
                    values.into_iter().map(|v| self.push_const(v)).collect();
                return Ok(format!("({l} IN ({}))", refs.join(", ")));
            }
        }

        // Anything else iterates the JSON document.
        let source = self.compile_list_source(haystack)?;
        Ok(format!(
            "EXISTS (SELECT 1 FROM json_each({source}) AS je WHERE je.value = {l})"
        ))
    }

    fn compile_string_op(&mut self, left: &Expr, op: StringOp, right: &Expr) -> Result<String> {
        let l = self.compile_expr(left)?;

        if let Some(Value::String(needle)) = self.const_value(right) {
            let escaped = escape_like(&needle);
            let pattern = match op {
                StringOp::StartsWith => format!("{escaped}%"),
                StringOp::EndsWith => format!("%{escaped}"),
                StringOp::Contains => format!("%{escaped}%"),
            };
            let param = self.push_const(Value::String(pattern));
            return Ok(format!("({l} LIKE {param} ESCAPE '\\')"));
        }

        // Dynamic needle: build the pattern in SQL. Wildcards inside the
        // needle are not escaped on this path.
        let r = self.compile_expr(right)?;
        Ok(match op {
            StringOp::StartsWith => format!("({l} LIKE ({r} || '%'))"),
            StringOp::EndsWith => format!("({l} LIKE ('%' || {r}))"),
            StringOp::Contains => format!("({l} LIKE ('%' || {r} || '%'))"),
        })
    }

    // ========================================================================
    // List machinery
    // ========================================================================

    /// Compile an expression to something `json_each(...)` can consume: a
    /// JSON text parameter or a SQL expression yielding JSON.
    pub(super) fn compile_list_source(&mut self, expr: &Expr) -> Result<String> {
        if let Some(value) = self.const_value(expr) {
            return Ok(self.push_const(value));
        }
        match expr {
            Expr::Property { .. } | Expr::Index { .. } => self.compile_expr(expr),
            Expr::List(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|e| self.compile_expr(e))
                    .collect::<Result<_>>()?;
                Ok(format!("json_array({})", parts.join(", ")))
            }
            other => self.compile_expr(other),
        }
    }

    /// JSON-valued compile of list/map literals.
    fn compile_json_value(&mut self, expr: &Expr) -> Result<String> {
        if let Some(value) = self.const_value(expr) {
            let param = self.push_const(value);
            return Ok(format!("json({param})"));
        }
        match expr {
            Expr::List(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|e| self.compile_expr(e))
                    .collect::<Result<_>>()?;
                Ok(format!("json_array({})", parts.join(", ")))
            }
            Expr::Map(entries) => {
                let mut parts = Vec::new();
                for (key, value) in entries {
                    check_json_key(key)?;
                    let v = self.compile_expr(value)?;
                    parts.push(format!("'{key}', {v}"));
                }
                Ok(format!("json_object({})", parts.join(", ")))
            }
            other => self.compile_expr(other),
        }
    }

    fn compile_comprehension(
        &mut self,
        variable: &str,
        list: &Expr,
        filter: Option<&Expr>,
        projection: Option<&Expr>,
    ) -> Result<String> {
        let source = self.compile_list_source(list)?;
        let alias = self.ctx.fresh_alias("it");

        self.push_iter(variable.to_owned(), format!("{alias}.value"));
        let projected = match projection {
            Some(proj) => self.compile_expr(proj)?,
            None => iter_agg_value(&alias),
        };
        let cond = match filter {
            Some(f) => {
                let c = self.compile_expr(f)?;
                format!(" WHERE ({c})")
            }
            None => String::new(),
        };
        self.pop_iter();

        Ok(format!(
            "(SELECT json_group_array({projected} ORDER BY {alias}.key) \
             FROM json_each({source}) AS {alias}{cond})"
        ))
    }

    fn compile_list_predicate(
        &mut self,
        quantifier: Quantifier,
        variable: &str,
        list: &Expr,
        predicate: &Expr,
    ) -> Result<String> {
        let source = self.compile_list_source(list)?;
        let alias = self.ctx.fresh_alias("it");

        self.push_iter(variable.to_owned(), format!("{alias}.value"));
        let cond = self.compile_expr(predicate)?;
        self.pop_iter();

        Ok(match quantifier {
            Quantifier::Any => format!(
                "EXISTS (SELECT 1 FROM json_each({source}) AS {alias} WHERE ({cond}))"
            ),
            Quantifier::None => format!(
                "NOT EXISTS (SELECT 1 FROM json_each({source}) AS {alias} WHERE ({cond}))"
            ),
            Quantifier::All => format!(
                "NOT EXISTS (SELECT 1 FROM json_each({source}) AS {alias} WHERE NOT ({cond}))"
            ),
            Quantifier::Single => format!(
                "((SELECT COUNT(*) FROM json_each({source}) AS {alias} WHERE ({cond})) = 1)"
            ),
        })
    }

    /// `EXISTS(pattern)` — a correlated subquery reproducing the pattern
    /// walk. Pattern variables already bound outside correlate to the outer
    /// aliases; fresh variables stay local to the subquery.
    fn compile_pattern_exists(
        &mut self,
        pattern: &crate::cypher::ast::Pattern,
    ) -> Result<String> {
        let saved_from = std::mem::take(self.from_mut());
        let saved_conds = std::mem::take(self.conds_mut());
        let saved_ctx = self.ctx.clone();

        let lowered = self.lower_pattern(pattern);

        let sub_from = std::mem::replace(self.from_mut(), saved_from);
        let sub_conds = std::mem::replace(self.conds_mut(), saved_conds);
        self.ctx = saved_ctx;
        lowered?;

        let mut sql = String::from("EXISTS (SELECT 1");
        if !sub_from.is_empty() {
            sql.push_str(" FROM ");
            sql.push_str(&sub_from.join(", "));
        }
        if !sub_conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&sub_conds.join(" AND "));
        }
        sql.push(')');
        Ok(sql)
    }

    // ========================================================================
    // Scalar functions
    // ========================================================================

    fn compile_scalar_function(
        &mut self,
        name: &str,
        args: &[Expr],
        _distinct: bool,
    ) -> Result<String> {
        let lower = name.to_ascii_lowercase();
        match lower.as_str() {
            "id" => {
                let arg = single(name, args)?;
                match arg {
                    Expr::Variable(var) => match self.ctx.lookup(var).cloned() {
                        Some(VarBinding::Node { alias }) | Some(VarBinding::Edge { alias }) => {
                            Ok(format!("{alias}.id"))
                        }
                        _ => Err(Error::Semantic(format!(
                            "id() requires a bound node or relationship, got '{var}'"
                        ))),
                    },
                    _ => Err(Error::Semantic("id() requires a variable".into())),
                }
            }
            "labels" => {
                let var = entity_var(name, args)?;
                let alias = self.ctx.expect_node_alias(var)?.to_owned();
                Ok(format!("{alias}.label"))
            }
            "type" => {
                let var = entity_var(name, args)?;
                match self.ctx.lookup(var).cloned() {
                    Some(VarBinding::Edge { alias }) => Ok(format!("{alias}.type")),
                    _ => Err(Error::Semantic(format!(
                        "type() requires a bound relationship, got '{var}'"
                    ))),
                }
            }
            "properties" => {
                let var = entity_var(name, args)?;
                match self.ctx.lookup(var).cloned() {
                    Some(VarBinding::Node { alias }) | Some(VarBinding::Edge { alias }) => {
                        Ok(format!("json({alias}.properties)"))
                    }
                    _ => Err(Error::Semantic(format!(
                        "properties() requires a bound entity, got '{var}'"
                    ))),
                }
            }
            "keys" => {
                let arg = single(name, args)?;
                let doc = match arg {
                    Expr::Variable(var) => match self.ctx.lookup(var).cloned() {
                        Some(VarBinding::Node { alias }) | Some(VarBinding::Edge { alias }) => {
                            format!("{alias}.properties")
                        }
                        _ => self.compile_expr(arg)?,
                    },
                    _ => self.compile_expr(arg)?,
                };
                Ok(format!(
                    "(SELECT json_group_array(je.key) FROM json_each({doc}) AS je)"
                ))
            }
            "size" | "length" => {
                if let Some(Expr::Variable(var)) = args.first() {
                    if let Some(VarBinding::Path { parts }) = self.ctx.lookup(var).cloned() {
                        return Ok(self.path_length_sql(&parts));
                    }
                }
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!(
                    "(CASE WHEN json_valid({x}) AND json_type({x}) = 'array' \
                     THEN json_array_length({x}) ELSE length({x}) END)"
                ))
            }
            "nodes" => {
                let var = entity_var(name, args)?;
                let parts = self.expect_path(var)?;
                self.path_entities_sql(&parts, PathSide::Nodes)
            }
            "relationships" => {
                let var = entity_var(name, args)?;
                let parts = self.expect_path(var)?;
                self.path_entities_sql(&parts, PathSide::Edges)
            }
            "head" => {
                let list = self.compile_list_source(single(name, args)?)?;
                Ok(format!("({list} -> '$[0]')"))
            }
            "last" => {
                let list = self.compile_list_source(single(name, args)?)?;
                Ok(format!("({list} -> '$[#-1]')"))
            }
            "tail" => {
                let list = self.compile_list_source(single(name, args)?)?;
                Ok(format!("json_remove(json({list}), '$[0]')"))
            }
            "range" => {
                let folded = self.fold_range(args)?;
                let param = self.push_const(folded);
                Ok(format!("json({param})"))
            }
            "coalesce" => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.compile_expr(a))
                    .collect::<Result<_>>()?;
                Ok(format!("COALESCE({})", parts.join(", ")))
            }
            "abs" | "sqrt" | "floor" | "round" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("{lower}({x})"))
            }
            "ceil" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("ceiling({x})"))
            }
            "rand" => Ok("((CAST(random() AS REAL) / 18446744073709551616.0) + 0.5)".into()),
            "toupper" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("upper({x})"))
            }
            "tolower" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("lower({x})"))
            }
            "trim" | "ltrim" | "rtrim" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("{lower}({x})"))
            }
            "reverse" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("cypher_reverse({x})"))
            }
            "left" => {
                let (s, n) = pair(name, args)?;
                let s = self.compile_expr(s)?;
                let n = self.compile_expr(n)?;
                Ok(format!("substr({s}, 1, {n})"))
            }
            "right" => {
                let (s, n) = pair(name, args)?;
                let s = self.compile_expr(s)?;
                let n = self.compile_expr(n)?;
                Ok(format!("substr({s}, -({n}))"))
            }
            "substring" => {
                let s = self.compile_expr(args.first().ok_or_else(|| arity(name, 2))?)?;
                let start = self.compile_expr(args.get(1).ok_or_else(|| arity(name, 2))?)?;
                if let Some(len) = args.get(2) {
                    let len = self.compile_expr(len)?;
                    Ok(format!("substr({s}, ({start}) + 1, {len})"))
                } else {
                    Ok(format!("substr({s}, ({start}) + 1)"))
                }
            }
            "replace" => {
                if args.len() != 3 {
                    return Err(arity(name, 3));
                }
                let s = self.compile_expr(&args[0])?;
                let from = self.compile_expr(&args[1])?;
                let to = self.compile_expr(&args[2])?;
                Ok(format!("replace({s}, {from}, {to})"))
            }
            "split" => {
                let (s, d) = pair(name, args)?;
                let s = self.compile_expr(s)?;
                let d = self.compile_expr(d)?;
                Ok(format!("cypher_split({s}, {d})"))
            }
            "tostring" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("CAST({x} AS TEXT)"))
            }
            "tointeger" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("cypher_to_integer({x})"))
            }
            "tofloat" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("cypher_to_float({x})"))
            }
            "toboolean" => {
                let x = self.compile_expr(single(name, args)?)?;
                Ok(format!("cypher_to_boolean({x})"))
            }
            "date" => match args.first() {
                Some(arg) => {
                    let x = self.compile_expr(arg)?;
                    Ok(format!("date({x})"))
                }
                None => Ok("date('now')".into()),
            },
            "datetime" => match args.first() {
                Some(arg) => {
                    let x = self.compile_expr(arg)?;
                    Ok(format!("strftime('%Y-%m-%dT%H:%M:%fZ', {x})"))
                }
                None => Ok("strftime('%Y-%m-%dT%H:%M:%fZ', 'now')".into()),
            },
            "timestamp" => Ok("(CAST(strftime('%s', 'now') AS INTEGER) * 1000)".into()),
            "exists" => {
                let arg = single(name, args)?;
                if let Some((doc, path)) = self.json_locator(arg)? {
                    Ok(format!("(json_type({doc}, '{path}') IS NOT NULL)"))
                } else {
                    let x = self.compile_expr(arg)?;
                    Ok(format!("({x} IS NOT NULL)"))
                }
            }
            "percentiledisc" | "percentilecont" => Err(Error::Unsupported(format!(
                "{name}() cannot be compiled to a single statement"
            ))),
            other => Err(Error::Unsupported(format!("function {other}()"))),
        }
    }

    /// `range(start, end[, step])` folds at translation time; the list enters
    /// the statement as one JSON parameter.
    fn fold_range(&mut self, args: &[Expr]) -> Result<Value> {
        if args.len() < 2 || args.len() > 3 {
            return Err(arity("range", 2));
        }
        let fold_int = |low: &Self, e: &Expr| -> Result<i64> {
            low.const_value(e).and_then(|v| v.as_int()).ok_or_else(|| {
                Error::Unsupported("range() with non-constant bounds".into())
            })
        };
        let start = fold_int(self, &args[0])?;
        let end = fold_int(self, &args[1])?;
        let step = match args.get(2) {
            Some(e) => fold_int(self, e)?,
            None => 1,
        };
        if step == 0 {
            return Err(Error::Semantic("range() step must not be zero".into()));
        }
        let mut items = Vec::new();
        let mut i = start;
        while (step > 0 && i <= end) || (step < 0 && i >= end) {
            items.push(Value::Int(i));
            i += step;
        }
        Ok(Value::List(items))
    }

    fn expect_path(&self, var: &str) -> Result<Vec<PathPart>> {
        match self.ctx.lookup(var) {
            Some(VarBinding::Path { parts }) => Ok(parts.clone()),
            _ => Err(Error::Semantic(format!("'{var}' is not a bound path"))),
        }
    }
}

/// JSON-faithful value of a `json_each` row for use inside
/// `json_group_array`: objects and arrays re-parse, scalars pass raw.
pub(super) fn iter_agg_value(alias: &str) -> String {
    format!(
        "(CASE WHEN {alias}.type IN ('object', 'array') THEN json({alias}.value) \
         ELSE {alias}.value END)"
    )
}

/// JSON-faithful text of a `json_each` row for standalone projection:
/// always yields valid JSON text.
pub(super) fn iter_json_text(alias: &str) -> String {
    format!(
        "(CASE WHEN {alias}.type IN ('object', 'array') THEN {alias}.value \
         ELSE json_quote({alias}.value) END)"
    )
}

/// Which side of a path an accessor extracts.
pub(super) enum PathSide {
    Nodes,
    Edges,
}

fn single<'e>(name: &str, args: &'e [Expr]) -> Result<&'e Expr> {
    if args.len() == 1 {
        Ok(&args[0])
    } else {
        Err(arity(name, 1))
    }
}

fn pair<'e>(name: &str, args: &'e [Expr]) -> Result<(&'e Expr, &'e Expr)> {
    if args.len() == 2 {
        Ok((&args[0], &args[1]))
    } else {
        Err(arity(name, 2))
    }
}

fn entity_var<'e>(name: &str, args: &'e [Expr]) -> Result<&'e str> {
    match args {
        [Expr::Variable(var)] => Ok(var),
        _ => Err(Error::Semantic(format!("{name}() requires a single variable argument"))),
    }
}

fn arity(name: &str, expected: usize) -> Error {
    Error::Semantic(format!("{name}() expects {expected} argument(s)"))
}

/// Build a `$."a"."b"` path from identifier keys. Keys that would break the
/// quoting are rejected rather than escaped.
pub(super) fn json_path(keys: &[&str]) -> Result<String> {
    let mut path = String::from("$");
    for key in keys {
        check_json_key(key)?;
        path.push_str(&format!(".\"{key}\""));
    }
    Ok(path)
}

pub(super) fn check_json_key(key: &str) -> Result<()> {
    if key.contains('"') || key.contains('\'') || key.contains('\\') {
        return Err(Error::Unsupported(format!(
            "property name {key:?} cannot be addressed in a JSON path"
        )));
    }
    Ok(())
}

/// Escape LIKE wildcards in a constant needle; `\` is the escape character.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for ch in needle.chars() {
        if ch == '\\' || ch == '%' || ch == '_' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}
