//! Cypher recursive descent parser.
//!
//! Consumes the token stream with one token of lookahead and produces a
//! `Query` — an ordered clause list. Supports:
//! - MATCH / OPTIONAL MATCH with patterns and WHERE
//! - CREATE, MERGE (ON CREATE / ON MATCH), SET, REMOVE, DELETE / DETACH DELETE
//! - WITH / RETURN projections with DISTINCT, ORDER BY, SKIP, LIMIT
//! - UNWIND, UNION [ALL], CALL ... YIELD
//! - Full expression grammar with precedence, list comprehensions,
//!   list predicates, EXISTS subpatterns, CASE
//!
//! The parser halts at the first unexpected token; errors carry exact
//! source coordinates.

use super::ast::*;
use super::lexer::{Token, TokenKind};
use crate::model::Direction;
use crate::{Error, Result};

/// Parser state — token slice, cursor, and the original source text
/// (for normalized projection-item names).
pub struct Parser<'t> {
    tokens: &'t [Token],
    src: &'t str,
    pos: usize,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token], src: &'t str) -> Self {
        Self { tokens, src, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_at(&self, offset: usize) -> TokenKind {
        self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        if self.at(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(format!(
                "expected {:?}, found {:?} '{}'",
                kind,
                self.peek_kind(),
                self.peek().text
            )))
        }
    }

    /// An identifier, or a keyword used in name position (`type`, `end`, ...).
    fn expect_name(&mut self) -> Result<String> {
        match self.peek_kind() {
            TokenKind::Identifier => Ok(self.advance().text.clone()),
            kind if is_keyword(kind) => Ok(self.advance().text.clone()),
            kind => Err(self.error(format!("expected a name, found {:?} '{}'", kind, self.peek().text))),
        }
    }

    fn error(&self, message: String) -> Error {
        let span = self.peek().span;
        Error::Syntax {
            position: span.start,
            line: span.line,
            column: span.column,
            message,
        }
    }

    /// Source text between two token indices, whitespace-collapsed. This is
    /// the Neo4j-3.5 column name for unaliased projections.
    fn normalized_text(&self, from: usize, to: usize) -> String {
        let start = self.tokens[from].span.start;
        let end = self.tokens[to.min(self.tokens.len() - 1)].span.end;
        self.src[start..end].split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn is_keyword(kind: TokenKind) -> bool {
    !matches!(
        kind,
        TokenKind::Identifier
            | TokenKind::Parameter
            | TokenKind::Integer
            | TokenKind::Float
            | TokenKind::StringLiteral
            | TokenKind::LParen
            | TokenKind::RParen
            | TokenKind::LBracket
            | TokenKind::RBracket
            | TokenKind::LBrace
            | TokenKind::RBrace
            | TokenKind::Dot
            | TokenKind::DotDot
            | TokenKind::Comma
            | TokenKind::Colon
            | TokenKind::Semicolon
            | TokenKind::Pipe
            | TokenKind::Star
            | TokenKind::Arrow
            | TokenKind::LeftArrow
            | TokenKind::Dash
            | TokenKind::Eq
            | TokenKind::Neq
            | TokenKind::Lt
            | TokenKind::Lte
            | TokenKind::Gt
            | TokenKind::Gte
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::PlusEq
            | TokenKind::Eof
    )
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse a token stream into a `Query`.
pub fn parse_query(tokens: &[Token], src: &str) -> Result<Query> {
    let mut p = Parser::new(tokens, src);
    let query = parse_query_body(&mut p)?;

    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!(
            "unexpected {:?} '{}' after end of query",
            p.peek_kind(),
            p.peek().text
        )));
    }
    Ok(query)
}

fn parse_query_body(p: &mut Parser) -> Result<Query> {
    let mut clauses = Vec::new();
    let mut terminated = false;

    loop {
        match p.peek_kind() {
            TokenKind::Match => {
                p.advance();
                clauses.push(parse_match(p, false)?);
            }
            TokenKind::Optional => {
                p.advance();
                p.expect(TokenKind::Match)?;
                clauses.push(parse_match(p, true)?);
            }
            TokenKind::Create => {
                p.advance();
                let patterns = parse_pattern_list(p)?;
                clauses.push(Clause::Create { patterns });
            }
            TokenKind::Merge => {
                p.advance();
                clauses.push(parse_merge(p)?);
            }
            TokenKind::Set => {
                p.advance();
                let items = parse_set_items(p)?;
                clauses.push(Clause::Set { items });
            }
            TokenKind::Remove => {
                p.advance();
                let items = parse_remove_items(p)?;
                clauses.push(Clause::Remove { items });
            }
            TokenKind::Detach => {
                p.advance();
                p.expect(TokenKind::Delete)?;
                let variables = parse_variable_list(p)?;
                clauses.push(Clause::Delete { variables, detach: true });
            }
            TokenKind::Delete => {
                p.advance();
                let variables = parse_variable_list(p)?;
                clauses.push(Clause::Delete { variables, detach: false });
            }
            TokenKind::With => {
                p.advance();
                let projection = parse_projection(p, true)?;
                clauses.push(Clause::With(projection));
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(p)?;
                p.expect(TokenKind::As)?;
                let alias = p.expect_name()?;
                clauses.push(Clause::Unwind { expr, alias });
            }
            TokenKind::Call => {
                p.advance();
                clauses.push(parse_call(p)?);
            }
            TokenKind::Return => {
                p.advance();
                let projection = parse_projection(p, false)?;
                clauses.push(Clause::Return(projection));
                terminated = true;
            }
            TokenKind::Eof | TokenKind::Semicolon | TokenKind::Union => {}
            kind => {
                return Err(p.error(format!(
                    "expected a clause keyword, found {:?} '{}'",
                    kind,
                    p.peek().text
                )));
            }
        }

        if terminated
            || matches!(
                p.peek_kind(),
                TokenKind::Eof | TokenKind::Semicolon | TokenKind::Union
            )
        {
            break;
        }
    }

    let union = if p.eat(TokenKind::Union) {
        let all = p.eat(TokenKind::All);
        let query = parse_query_body(p)?;
        Some(UnionTail { all, query: Box::new(query) })
    } else {
        None
    };

    let query = Query { clauses, union };
    validate(p, &query)?;
    Ok(query)
}

/// Structural rules the clause grammar enforces beyond token order.
fn validate(p: &Parser, query: &Query) -> Result<()> {
    if query.clauses.is_empty() {
        return Err(p.error("empty query".into()));
    }
    let last = query.clauses.last().expect("checked non-empty");
    let terminal_ok = matches!(last, Clause::Return(_) | Clause::Call { .. }) || last.is_write();
    if !terminal_ok {
        return Err(p.error("query must end with RETURN or a write clause".into()));
    }
    if let Some(tail) = &query.union {
        let left = query.clauses.iter().rev().find_map(projection_width);
        let right = tail.query.clauses.iter().rev().find_map(projection_width);
        if left != right {
            return Err(p.error("UNION branches must project the same number of columns".into()));
        }
    }
    Ok(())
}

fn projection_width(clause: &Clause) -> Option<usize> {
    match clause {
        Clause::Return(proj) => Some(proj.items.len()),
        _ => None,
    }
}

// ============================================================================
// Clause parsers
// ============================================================================

fn parse_match(p: &mut Parser, optional: bool) -> Result<Clause> {
    let patterns = parse_pattern_list(p)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(Clause::Match { optional, patterns, where_clause })
}

fn parse_merge(p: &mut Parser) -> Result<Clause> {
    let pattern = parse_pattern(p)?;

    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.at(TokenKind::On) {
        p.advance();
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error(format!(
                "expected CREATE or MATCH after ON, found '{}'",
                p.peek().text
            )));
        }
    }

    Ok(Clause::Merge { pattern, on_create, on_match })
}

fn parse_call(p: &mut Parser) -> Result<Clause> {
    let mut procedure = p.expect_name()?;
    while p.eat(TokenKind::Dot) {
        let part = p.expect_name()?;
        procedure = format!("{procedure}.{part}");
    }

    if p.eat(TokenKind::LParen) {
        if !p.at(TokenKind::RParen) {
            return Err(p.error(format!("procedure '{procedure}' takes no arguments")));
        }
        p.expect(TokenKind::RParen)?;
    }

    let mut yields = Vec::new();
    if p.eat(TokenKind::Yield) {
        yields.push(p.expect_name()?);
        while p.eat(TokenKind::Comma) {
            yields.push(p.expect_name()?);
        }
    }

    Ok(Clause::Call { procedure, yields })
}

fn parse_projection(p: &mut Parser, allow_where: bool) -> Result<Projection> {
    let distinct = p.eat(TokenKind::Distinct);

    let mut items = Vec::new();
    if p.at(TokenKind::Star) {
        p.advance();
        items.push(ProjectionItem { expr: Expr::Star, alias: None, text: "*".into() });
    } else {
        items.push(parse_projection_item(p)?);
        while p.eat(TokenKind::Comma) {
            items.push(parse_projection_item(p)?);
        }
    }

    let mut where_clause = None;
    let mut order_by = Vec::new();
    let mut skip = None;
    let mut limit = None;
    loop {
        match p.peek_kind() {
            TokenKind::Order if order_by.is_empty() => {
                p.advance();
                p.expect(TokenKind::By)?;
                order_by.push(parse_order_item(p)?);
                while p.eat(TokenKind::Comma) {
                    order_by.push(parse_order_item(p)?);
                }
            }
            TokenKind::Skip if skip.is_none() => {
                p.advance();
                skip = Some(parse_expr(p)?);
            }
            TokenKind::Limit if limit.is_none() => {
                p.advance();
                limit = Some(parse_expr(p)?);
            }
            TokenKind::Where if allow_where && where_clause.is_none() => {
                p.advance();
                where_clause = Some(parse_expr(p)?);
            }
            _ => break,
        }
    }

    Ok(Projection { distinct, items, where_clause, order_by, skip, limit })
}

fn parse_projection_item(p: &mut Parser) -> Result<ProjectionItem> {
    let start = p.pos;
    let expr = parse_expr(p)?;
    let text = p.normalized_text(start, p.pos.saturating_sub(1));
    let alias = if p.eat(TokenKind::As) {
        Some(p.expect_name()?)
    } else {
        None
    };
    Ok(ProjectionItem { expr, alias, text })
}

fn parse_order_item(p: &mut Parser) -> Result<OrderItem> {
    let expr = parse_expr(p)?;
    let ascending = if p.eat(TokenKind::Desc) {
        false
    } else {
        p.eat(TokenKind::Asc);
        true
    };
    Ok(OrderItem { expr, ascending })
}

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = Vec::new();
    items.push(parse_set_item(p)?);
    while p.eat(TokenKind::Comma) {
        items.push(parse_set_item(p)?);
    }
    Ok(items)
}

fn parse_set_item(p: &mut Parser) -> Result<SetItem> {
    let variable = p.expect_name()?;

    if p.eat(TokenKind::Dot) {
        let key = p.expect_name()?;
        p.expect(TokenKind::Eq)?;
        let value = parse_expr(p)?;
        Ok(SetItem::Property { variable, key, value })
    } else if p.eat(TokenKind::PlusEq) {
        let value = parse_expr(p)?;
        Ok(SetItem::MergeProperties { variable, value })
    } else if p.eat(TokenKind::Eq) {
        let value = parse_expr(p)?;
        Ok(SetItem::ReplaceProperties { variable, value })
    } else if p.eat(TokenKind::Colon) {
        let label = p.expect_name()?;
        Ok(SetItem::Label { variable, label })
    } else {
        Err(p.error("expected '.', '=', '+=', or ':' after SET variable".into()))
    }
}

fn parse_remove_items(p: &mut Parser) -> Result<Vec<RemoveItem>> {
    let mut items = Vec::new();
    items.push(parse_remove_item(p)?);
    while p.eat(TokenKind::Comma) {
        items.push(parse_remove_item(p)?);
    }
    Ok(items)
}

fn parse_remove_item(p: &mut Parser) -> Result<RemoveItem> {
    let variable = p.expect_name()?;
    if p.eat(TokenKind::Dot) {
        let key = p.expect_name()?;
        Ok(RemoveItem::Property { variable, key })
    } else if p.eat(TokenKind::Colon) {
        let label = p.expect_name()?;
        Ok(RemoveItem::Label { variable, label })
    } else {
        Err(p.error("expected '.' or ':' after REMOVE variable".into()))
    }
}

fn parse_variable_list(p: &mut Parser) -> Result<Vec<String>> {
    let mut vars = Vec::new();
    vars.push(p.expect_name()?);
    while p.eat(TokenKind::Comma) {
        vars.push(p.expect_name()?);
    }
    Ok(vars)
}

// ============================================================================
// Pattern parsing
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    patterns.push(parse_pattern(p)?);
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    // Path binding: `p = (a)-[..]->(b)`
    let path_var = if p.at(TokenKind::Identifier) && p.peek_at(1) == TokenKind::Eq {
        let var = p.advance().text.clone();
        p.expect(TokenKind::Eq)?;
        Some(var)
    } else {
        None
    };

    let start = parse_node_pattern(p)?;
    let mut steps = Vec::new();
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        let edge = parse_edge_pattern(p)?;
        let node = parse_node_pattern(p)?;
        steps.push((edge, node));
    }

    Ok(Pattern { path_var, start, steps })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let variable = if p.at(TokenKind::Identifier) {
        Some(p.advance().text.clone())
    } else {
        None
    };

    let mut labels = Vec::new();
    while p.eat(TokenKind::Colon) {
        labels.push(p.expect_name()?);
    }

    let properties = if p.at(TokenKind::LBrace) {
        parse_map_entries(p)?
    } else {
        Vec::new()
    };

    p.expect(TokenKind::RParen)?;
    Ok(NodePattern { variable, labels, properties })
}

fn parse_edge_pattern(p: &mut Parser) -> Result<EdgePattern> {
    let left_arrow = p.eat(TokenKind::LeftArrow);
    if !left_arrow {
        p.expect(TokenKind::Dash)?;
    }

    let mut variable = None;
    let mut rel_types = Vec::new();
    let mut properties = Vec::new();
    let mut var_length = None;

    if p.eat(TokenKind::LBracket) {
        if p.at(TokenKind::Identifier) {
            variable = Some(p.advance().text.clone());
        }

        if p.eat(TokenKind::Colon) {
            rel_types.push(p.expect_name()?);
            while p.eat(TokenKind::Pipe) {
                p.eat(TokenKind::Colon); // both :A|B and :A|:B are accepted
                rel_types.push(p.expect_name()?);
            }
        }

        if p.eat(TokenKind::Star) {
            var_length = Some(parse_var_length(p)?);
        }

        if p.at(TokenKind::LBrace) {
            properties = parse_map_entries(p)?;
        }

        p.expect(TokenKind::RBracket)?;
    }

    let direction = if p.eat(TokenKind::Arrow) {
        if left_arrow { Direction::Both } else { Direction::Outgoing }
    } else if p.eat(TokenKind::Dash) {
        if left_arrow { Direction::Incoming } else { Direction::Both }
    } else {
        return Err(p.error("expected '->' or '-' to close the relationship pattern".into()));
    };

    Ok(EdgePattern { variable, rel_types, direction, properties, var_length })
}

/// `*`, `*n`, `*n..m`, `*n..`, `*..m` — the star itself is already consumed.
fn parse_var_length(p: &mut Parser) -> Result<VarLength> {
    let min = if p.at(TokenKind::Integer) {
        Some(parse_bound(p)?)
    } else {
        None
    };

    if p.eat(TokenKind::DotDot) {
        let max = if p.at(TokenKind::Integer) {
            Some(parse_bound(p)?)
        } else {
            None
        };
        Ok(VarLength { min, max })
    } else if let Some(n) = min {
        // `*n` is the exact-length form
        Ok(VarLength { min: Some(n), max: Some(n) })
    } else {
        Ok(VarLength { min: None, max: None })
    }
}

fn parse_bound(p: &mut Parser) -> Result<u32> {
    let tok = p.expect(TokenKind::Integer)?;
    let text = tok.text.clone();
    text.parse::<u32>()
        .map_err(|_| p.error(format!("invalid path length bound '{text}'")))
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

pub fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or_expr(p)
}

fn parse_or_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and_expr(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_and_expr(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::Or,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_and_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not_expr(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not_expr(p)?;
        left = Expr::BinaryOp {
            left: Box::new(left),
            op: BinaryOp::And,
            right: Box::new(right),
        };
    }
    Ok(left)
}

fn parse_not_expr(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not_expr(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(expr) })
    } else {
        parse_comparison(p)
    }
}

/// Comparisons are non-associative: `a < b < c` is a syntax error downstream,
/// not a chained comparison.
fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_predicate(p)?;

    let op = match p.peek_kind() {
        TokenKind::Eq => Some(BinaryOp::Eq),
        TokenKind::Neq => Some(BinaryOp::Neq),
        TokenKind::Lt => Some(BinaryOp::Lt),
        TokenKind::Lte => Some(BinaryOp::Lte),
        TokenKind::Gt => Some(BinaryOp::Gt),
        TokenKind::Gte => Some(BinaryOp::Gte),
        _ => None,
    };

    if let Some(op) = op {
        p.advance();
        let right = parse_predicate(p)?;
        Ok(Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) })
    } else {
        Ok(left)
    }
}

/// String/null/membership predicates sit between comparisons and arithmetic.
fn parse_predicate(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_additive(p)?;

    loop {
        match p.peek_kind() {
            TokenKind::Is => {
                p.advance();
                let negated = p.eat(TokenKind::Not);
                p.expect(TokenKind::Null)?;
                left = Expr::IsNull { expr: Box::new(left), negated };
            }
            TokenKind::In => {
                p.advance();
                let list = parse_additive(p)?;
                left = Expr::In { expr: Box::new(left), list: Box::new(list) };
            }
            TokenKind::Starts => {
                p.advance();
                p.expect(TokenKind::With)?;
                let right = parse_additive(p)?;
                left = Expr::StringOp {
                    left: Box::new(left),
                    op: StringOp::StartsWith,
                    right: Box::new(right),
                };
            }
            TokenKind::Ends => {
                p.advance();
                p.expect(TokenKind::With)?;
                let right = parse_additive(p)?;
                left = Expr::StringOp {
                    left: Box::new(left),
                    op: StringOp::EndsWith,
                    right: Box::new(right),
                };
            }
            TokenKind::Contains => {
                p.advance();
                let right = parse_additive(p)?;
                left = Expr::StringOp {
                    left: Box::new(left),
                    op: StringOp::Contains,
                    right: Box::new(right),
                };
            }
            _ => break,
        }
    }

    Ok(left)
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        let right = parse_multiplicative(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            _ => break,
        };
        p.advance();
        let right = parse_unary(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Dash) {
        let expr = parse_unary(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Negate, expr: Box::new(expr) })
    } else {
        parse_postfix(p)
    }
}

/// Property access, indexing, and label checks bind tightest.
fn parse_postfix(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_primary(p)?;

    loop {
        match p.peek_kind() {
            TokenKind::Dot => {
                p.advance();
                let key = p.expect_name()?;
                expr = Expr::Property { expr: Box::new(expr), key };
            }
            TokenKind::LBracket => {
                p.advance();
                let index = parse_expr(p)?;
                p.expect(TokenKind::RBracket)?;
                expr = Expr::Index { expr: Box::new(expr), index: Box::new(index) };
            }
            TokenKind::Colon if matches!(expr, Expr::Variable(_)) => {
                p.advance();
                let label = p.expect_name()?;
                expr = Expr::HasLabel { expr: Box::new(expr), label };
            }
            _ => break,
        }
    }

    Ok(expr)
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Integer => {
            let tok = p.advance();
            let text = tok.text.clone();
            let span = tok.span;
            let val = text.parse::<i64>().map_err(|_| Error::Syntax {
                position: span.start,
                line: span.line,
                column: span.column,
                message: format!("integer literal '{text}' out of range"),
            })?;
            Ok(Expr::Literal(Literal::Int(val)))
        }
        TokenKind::Float => {
            let tok = p.advance();
            let text = tok.text.clone();
            let span = tok.span;
            let val = text.parse::<f64>().map_err(|_| Error::Syntax {
                position: span.start,
                line: span.line,
                column: span.column,
                message: format!("invalid float literal '{text}'"),
            })?;
            Ok(Expr::Literal(Literal::Float(val)))
        }
        TokenKind::StringLiteral => {
            let tok = p.advance();
            Ok(Expr::Literal(Literal::String(tok.text.clone())))
        }
        TokenKind::True => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(true)))
        }
        TokenKind::False => {
            p.advance();
            Ok(Expr::Literal(Literal::Bool(false)))
        }
        TokenKind::Null => {
            p.advance();
            Ok(Expr::Literal(Literal::Null))
        }

        TokenKind::Parameter => {
            let tok = p.advance();
            Ok(Expr::Parameter(tok.text.clone()))
        }

        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }

        TokenKind::LBracket => parse_list_or_comprehension(p),

        TokenKind::LBrace => {
            let entries = parse_map_entries(p)?;
            Ok(Expr::Map(entries))
        }

        TokenKind::Case => parse_case(p),

        TokenKind::Exists => {
            p.advance();
            p.expect(TokenKind::LParen)?;
            if p.at(TokenKind::LParen) {
                let pattern = parse_pattern(p)?;
                p.expect(TokenKind::RParen)?;
                Ok(Expr::PatternExists(Box::new(pattern)))
            } else {
                // exists(n.prop) — property-existence form
                let arg = parse_expr(p)?;
                p.expect(TokenKind::RParen)?;
                Ok(Expr::FunctionCall {
                    name: "exists".into(),
                    args: vec![arg],
                    distinct: false,
                })
            }
        }

        // List predicates: ALL/ANY/NONE/SINGLE(x IN list WHERE pred)
        TokenKind::All | TokenKind::Any | TokenKind::None | TokenKind::Single
            if p.peek_at(1) == TokenKind::LParen =>
        {
            let quantifier = match p.advance().kind {
                TokenKind::All => Quantifier::All,
                TokenKind::Any => Quantifier::Any,
                TokenKind::None => Quantifier::None,
                TokenKind::Single => Quantifier::Single,
                _ => unreachable!("guarded by match arm"),
            };
            p.expect(TokenKind::LParen)?;
            let variable = p.expect_name()?;
            p.expect(TokenKind::In)?;
            let list = parse_expr(p)?;
            p.expect(TokenKind::Where)?;
            let predicate = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(Expr::ListPredicate {
                quantifier,
                variable,
                list: Box::new(list),
                predicate: Box::new(predicate),
            })
        }

        TokenKind::Identifier => {
            let tok = p.advance();
            let name = tok.text.clone();
            if p.at(TokenKind::LParen) {
                p.advance();
                let mut args = Vec::new();
                let distinct = p.eat(TokenKind::Distinct);

                if p.at(TokenKind::Star) {
                    // count(*)
                    p.advance();
                } else if !p.at(TokenKind::RParen) {
                    args.push(parse_expr(p)?);
                    while p.eat(TokenKind::Comma) {
                        args.push(parse_expr(p)?);
                    }
                }
                p.expect(TokenKind::RParen)?;
                Ok(Expr::FunctionCall { name, args, distinct })
            } else {
                Ok(Expr::Variable(name))
            }
        }

        kind => Err(p.error(format!(
            "unexpected {:?} '{}' in expression",
            kind,
            p.peek().text
        ))),
    }
}

/// `[` opens either a list literal or a comprehension; disambiguate on
/// `ident IN` with a saved-position backtrack.
fn parse_list_or_comprehension(p: &mut Parser) -> Result<Expr> {
    p.expect(TokenKind::LBracket)?;

    if p.at(TokenKind::Identifier) && p.peek_at(1) == TokenKind::In {
        let variable = p.advance().text.clone();
        p.expect(TokenKind::In)?;
        let list = parse_expr(p)?;
        let filter = if p.eat(TokenKind::Where) {
            Some(Box::new(parse_expr(p)?))
        } else {
            None
        };
        let projection = if p.eat(TokenKind::Pipe) {
            Some(Box::new(parse_expr(p)?))
        } else {
            None
        };
        p.expect(TokenKind::RBracket)?;
        return Ok(Expr::ListComprehension {
            variable,
            list: Box::new(list),
            filter,
            projection,
        });
    }

    let mut items = Vec::new();
    if !p.at(TokenKind::RBracket) {
        items.push(parse_expr(p)?);
        while p.eat(TokenKind::Comma) {
            items.push(parse_expr(p)?);
        }
    }
    p.expect(TokenKind::RBracket)?;
    Ok(Expr::List(items))
}

fn parse_case(p: &mut Parser) -> Result<Expr> {
    p.expect(TokenKind::Case)?;

    let operand = if !p.at(TokenKind::When) {
        Some(Box::new(parse_expr(p)?))
    } else {
        None
    };

    let mut whens = Vec::new();
    while p.eat(TokenKind::When) {
        let when_expr = parse_expr(p)?;
        p.expect(TokenKind::Then)?;
        let then_expr = parse_expr(p)?;
        whens.push((when_expr, then_expr));
    }
    if whens.is_empty() {
        return Err(p.error("CASE requires at least one WHEN branch".into()));
    }

    let else_expr = if p.eat(TokenKind::Else) {
        Some(Box::new(parse_expr(p)?))
    } else {
        None
    };
    p.expect(TokenKind::End)?;

    Ok(Expr::Case { operand, whens, else_expr })
}

fn parse_map_entries(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut entries = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = match p.peek_kind() {
                TokenKind::StringLiteral => p.advance().text.clone(),
                _ => p.expect_name()?,
            };
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            entries.push((key, value));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(entries)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::parse;

    fn first_clause(query: &str) -> Clause {
        parse(query).unwrap().clauses.into_iter().next().unwrap()
    }

    #[test]
    fn test_simple_match_return() {
        let q = parse("MATCH (n:Person) RETURN n").unwrap();
        assert_eq!(q.clauses.len(), 2);
        match &q.clauses[0] {
            Clause::Match { optional, patterns, where_clause } => {
                assert!(!optional);
                assert_eq!(patterns.len(), 1);
                assert!(where_clause.is_none());
                assert_eq!(patterns[0].start.labels, vec!["Person"]);
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn test_match_with_where() {
        let q = parse("MATCH (n:Person) WHERE n.age > 30 RETURN n.name").unwrap();
        match &q.clauses[0] {
            Clause::Match { where_clause, .. } => assert!(where_clause.is_some()),
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn test_create_node_with_properties() {
        match first_clause("CREATE (n:Person {name: 'Ada', age: 3})") {
            Clause::Create { patterns } => {
                let node = &patterns[0].start;
                assert_eq!(node.labels, vec!["Person"]);
                assert_eq!(node.properties.len(), 2);
                assert_eq!(node.properties[0].0, "name");
                assert_eq!(node.properties[1].0, "age");
            }
            other => panic!("expected CREATE, got {other:?}"),
        }
    }

    #[test]
    fn test_relationship_pattern() {
        let q = parse("MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a, b").unwrap();
        match &q.clauses[0] {
            Clause::Match { patterns, .. } => {
                let pattern = &patterns[0];
                assert_eq!(pattern.steps.len(), 1);
                let (edge, node) = &pattern.steps[0];
                assert_eq!(edge.rel_types, vec!["KNOWS"]);
                assert_eq!(edge.direction, Direction::Outgoing);
                assert_eq!(node.labels, vec!["Person"]);
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn test_all_direction_forms() {
        for (query, dir) in [
            ("MATCH (a)-[:K]->(b) RETURN a", Direction::Outgoing),
            ("MATCH (a)<-[:K]-(b) RETURN a", Direction::Incoming),
            ("MATCH (a)-[:K]-(b) RETURN a", Direction::Both),
            ("MATCH (a)--(b) RETURN a", Direction::Both),
            ("MATCH (a)<-->(b) RETURN a", Direction::Both),
        ] {
            match &parse(query).unwrap().clauses[0] {
                Clause::Match { patterns, .. } => {
                    assert_eq!(patterns[0].steps[0].0.direction, dir, "query: {query}");
                }
                other => panic!("expected MATCH, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_multi_type_edge() {
        let q = parse("MATCH (a)-[r:A|B|:C]->(b) RETURN r").unwrap();
        match &q.clauses[0] {
            Clause::Match { patterns, .. } => {
                assert_eq!(patterns[0].steps[0].0.rel_types, vec!["A", "B", "C"]);
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn test_var_length_forms() {
        let cases = [
            ("*", VarLength { min: None, max: None }),
            ("*3", VarLength { min: Some(3), max: Some(3) }),
            ("*1..4", VarLength { min: Some(1), max: Some(4) }),
            ("*2..", VarLength { min: Some(2), max: None }),
            ("*..5", VarLength { min: None, max: Some(5) }),
        ];
        for (spec, expected) in cases {
            let q = parse(&format!("MATCH (a)-[:K{spec}]->(b) RETURN b")).unwrap();
            match &q.clauses[0] {
                Clause::Match { patterns, .. } => {
                    assert_eq!(patterns[0].steps[0].0.var_length, Some(expected), "spec: {spec}");
                }
                other => panic!("expected MATCH, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_path_binding() {
        let q = parse("MATCH p = (a)-[:K]->(b) RETURN length(p)").unwrap();
        match &q.clauses[0] {
            Clause::Match { patterns, .. } => {
                assert_eq!(patterns[0].path_var.as_deref(), Some("p"));
            }
            other => panic!("expected MATCH, got {other:?}"),
        }
    }

    #[test]
    fn test_merge_with_on_create_on_match() {
        let q = parse(
            "MERGE (u:User {email: 'a@b'}) ON CREATE SET u.created = 1 ON MATCH SET u.seen = 1 RETURN u",
        )
        .unwrap();
        match &q.clauses[0] {
            Clause::Merge { pattern, on_create, on_match } => {
                assert_eq!(pattern.start.labels, vec!["User"]);
                assert_eq!(on_create.len(), 1);
                assert_eq!(on_match.len(), 1);
            }
            other => panic!("expected MERGE, got {other:?}"),
        }
    }

    #[test]
    fn test_detach_delete() {
        let q = parse("MATCH (n:Person) DETACH DELETE n").unwrap();
        match &q.clauses[1] {
            Clause::Delete { variables, detach } => {
                assert!(detach);
                assert_eq!(variables, &["n"]);
            }
            other => panic!("expected DELETE, got {other:?}"),
        }
    }

    #[test]
    fn test_unwind() {
        let q = parse("UNWIND [1, 2, 3] AS x RETURN x").unwrap();
        match &q.clauses[0] {
            Clause::Unwind { alias, .. } => assert_eq!(alias, "x"),
            other => panic!("expected UNWIND, got {other:?}"),
        }
    }

    #[test]
    fn test_with_pipeline() {
        let q = parse("MATCH (n:Person) WITH n.name AS name WHERE name = 'A' RETURN name").unwrap();
        match &q.clauses[1] {
            Clause::With(proj) => {
                assert_eq!(proj.items[0].alias.as_deref(), Some("name"));
                assert!(proj.where_clause.is_some());
            }
            other => panic!("expected WITH, got {other:?}"),
        }
    }

    #[test]
    fn test_return_modifiers() {
        let q = parse("MATCH (n) RETURN DISTINCT n.name ORDER BY n.name DESC SKIP 2 LIMIT 10")
            .unwrap();
        match &q.clauses[1] {
            Clause::Return(proj) => {
                assert!(proj.distinct);
                assert_eq!(proj.order_by.len(), 1);
                assert!(!proj.order_by[0].ascending);
                assert!(proj.skip.is_some());
                assert!(proj.limit.is_some());
            }
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn test_union() {
        let q = parse("MATCH (a:A) RETURN a.x AS v UNION ALL MATCH (b:B) RETURN b.y AS v").unwrap();
        let tail = q.union.expect("expected UNION tail");
        assert!(tail.all);
        assert_eq!(tail.query.clauses.len(), 2);
    }

    #[test]
    fn test_call_yield() {
        let q = parse("CALL db.labels() YIELD label RETURN label").unwrap();
        match &q.clauses[0] {
            Clause::Call { procedure, yields } => {
                assert_eq!(procedure, "db.labels");
                assert_eq!(yields, &["label"]);
            }
            other => panic!("expected CALL, got {other:?}"),
        }
    }

    #[test]
    fn test_list_comprehension() {
        let q = parse("RETURN [x IN range(1, 5) WHERE x % 2 = 0 | x * 10] AS evens").unwrap();
        match &q.clauses[0] {
            Clause::Return(proj) => match &proj.items[0].expr {
                Expr::ListComprehension { variable, filter, projection, .. } => {
                    assert_eq!(variable, "x");
                    assert!(filter.is_some());
                    assert!(projection.is_some());
                }
                other => panic!("expected comprehension, got {other:?}"),
            },
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn test_list_predicate() {
        let q = parse("MATCH (n) WHERE ANY(x IN n.tags WHERE x = 'a') RETURN n").unwrap();
        match &q.clauses[0] {
            Clause::Match { where_clause: Some(Expr::ListPredicate { quantifier, .. }), .. } => {
                assert_eq!(*quantifier, Quantifier::Any);
            }
            other => panic!("expected list predicate, got {other:?}"),
        }
    }

    #[test]
    fn test_exists_pattern() {
        let q = parse("MATCH (a) WHERE EXISTS((a)-[:K]->()) RETURN a").unwrap();
        match &q.clauses[0] {
            Clause::Match { where_clause: Some(Expr::PatternExists(pattern)), .. } => {
                assert_eq!(pattern.steps.len(), 1);
            }
            other => panic!("expected EXISTS pattern, got {other:?}"),
        }
    }

    #[test]
    fn test_case_expression() {
        let q =
            parse("MATCH (n) RETURN CASE WHEN n.age > 18 THEN 'adult' ELSE 'minor' END AS bracket")
                .unwrap();
        match &q.clauses[1] {
            Clause::Return(proj) => {
                assert!(matches!(proj.items[0].expr, Expr::Case { .. }));
                assert_eq!(proj.items[0].alias.as_deref(), Some("bracket"));
            }
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn test_unaliased_column_name_is_normalized_source() {
        let q = parse("MATCH (n) RETURN n.age   +   1").unwrap();
        match &q.clauses[1] {
            Clause::Return(proj) => assert_eq!(proj.items[0].display_name(), "n.age + 1"),
            other => panic!("expected RETURN, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_items() {
        let q = parse("MATCH (n:Person) REMOVE n.age, n:Employee").unwrap();
        match &q.clauses[1] {
            Clause::Remove { items } => {
                assert!(matches!(&items[0], RemoveItem::Property { key, .. } if key == "age"));
                assert!(matches!(&items[1], RemoveItem::Label { label, .. } if label == "Employee"));
            }
            other => panic!("expected REMOVE, got {other:?}"),
        }
    }

    #[test]
    fn test_set_forms() {
        let q = parse("MATCH (n) SET n.a = 1, n += {b: 2}, n = {c: 3}, n:Tag").unwrap();
        match &q.clauses[1] {
            Clause::Set { items } => {
                assert!(matches!(items[0], SetItem::Property { .. }));
                assert!(matches!(items[1], SetItem::MergeProperties { .. }));
                assert!(matches!(items[2], SetItem::ReplaceProperties { .. }));
                assert!(matches!(items[3], SetItem::Label { .. }));
            }
            other => panic!("expected SET, got {other:?}"),
        }
    }

    #[test]
    fn test_match_without_return_is_rejected() {
        assert!(parse("MATCH (n:Person)").is_err());
    }

    #[test]
    fn test_error_carries_position() {
        let err = parse("MATCH (n RETURN n").unwrap_err();
        match err {
            Error::Syntax { position, line, column, .. } => {
                assert_eq!(line, 1);
                assert_eq!(position, 9);
                assert_eq!(column, 10);
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_is_deterministic() {
        let a = parse("MATCH (n:P {x: 1}) WHERE n.y IN [1, 2] RETURN n.x AS v").unwrap();
        let b = parse("MATCH (n:P {x: 1}) WHERE n.y IN [1, 2] RETURN n.x AS v").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_optional_match() {
        let q = parse("MATCH (p:P) OPTIONAL MATCH (p)-[:K]->(q) RETURN p, q").unwrap();
        match &q.clauses[1] {
            Clause::Match { optional, .. } => assert!(optional),
            other => panic!("expected OPTIONAL MATCH, got {other:?}"),
        }
    }
}
