//! Cypher lexer — tokenizes a query string.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// For string literals this is the unescaped content; for backtick
    /// identifiers the text between the backticks; otherwise the lexeme.
    pub text: String,
}

/// Source span: byte offsets plus the 1-based line/column of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Match, Optional, Where, Return, With, Unwind,
    Create, Merge, Delete, Detach, Set, Remove,
    Union, All, Order, By, Skip, Limit, Asc, Desc, Distinct,
    And, Or, Not, Is, Null, True, False, In,
    As, Case, When, Then, Else, End,
    Exists, Any, None, Single,
    Starts, Ends, Contains,
    On, Call, Yield,

    // Literals
    Integer, Float, StringLiteral,

    // Identifiers and parameters
    Identifier, Parameter,

    // Punctuation
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Dot, DotDot, Comma, Colon, Semicolon, Pipe, Star,
    Arrow,     // ->
    LeftArrow, // <-
    Dash,      // - (edge dash and arithmetic minus)

    // Operators
    Eq, Neq, Lt, Lte, Gt, Gte,
    Plus, Slash, Percent,
    PlusEq, // +=

    Eof,
}

/// Scanner state: one forward pass over the input, tracking line/column.
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1, column: 1 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        self.src[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn mark(&self) -> (usize, u32, u32) {
        (self.pos, self.line, self.column)
    }

    fn token(&self, kind: TokenKind, mark: (usize, u32, u32), text: impl Into<String>) -> Token {
        Token {
            kind,
            span: Span { start: mark.0, end: self.pos, line: mark.1, column: mark.2 },
            text: text.into(),
        }
    }

    fn error(&self, mark: (usize, u32, u32), message: impl Into<String>) -> Error {
        Error::Tokenize {
            position: mark.0,
            line: mark.1,
            column: mark.2,
            message: message.into(),
        }
    }
}

/// Tokenize a Cypher query string.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut s = Scanner::new(input);
    let mut tokens = Vec::new();

    while let Some(ch) = s.peek() {
        let mark = s.mark();
        match ch {
            c if c.is_whitespace() => {
                s.bump();
            }

            // Block comments /* ... */, discarded
            '/' if s.peek2() == Some('*') => {
                s.bump();
                s.bump();
                loop {
                    match s.bump() {
                        Some('*') if s.peek() == Some('/') => {
                            s.bump();
                            break;
                        }
                        Some(_) => {}
                        None => return Err(s.error(mark, "unterminated block comment")),
                    }
                }
            }

            // Line comments, discarded
            '/' if s.peek2() == Some('/') => {
                while s.peek().is_some_and(|c| c != '\n') {
                    s.bump();
                }
            }

            '\'' | '"' => {
                let quote = ch;
                s.bump();
                let mut text = String::new();
                loop {
                    match s.bump() {
                        Some('\\') => match s.bump() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some('r') => text.push('\r'),
                            Some('\\') => text.push('\\'),
                            Some('\'') => text.push('\''),
                            Some('"') => text.push('"'),
                            Some('u') => {
                                let mut code = String::with_capacity(4);
                                for _ in 0..4 {
                                    match s.bump() {
                                        Some(h) if h.is_ascii_hexdigit() => code.push(h),
                                        _ => {
                                            return Err(s.error(
                                                mark,
                                                "\\u escape requires four hex digits",
                                            ));
                                        }
                                    }
                                }
                                let cp = u32::from_str_radix(&code, 16)
                                    .expect("hex digits verified above");
                                match char::from_u32(cp) {
                                    Some(c) => text.push(c),
                                    None => {
                                        return Err(
                                            s.error(mark, "\\u escape is not a valid code point")
                                        );
                                    }
                                }
                            }
                            Some(other) => {
                                return Err(s.error(
                                    mark,
                                    format!("unknown escape sequence '\\{other}'"),
                                ));
                            }
                            None => return Err(s.error(mark, "unterminated string literal")),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => text.push(c),
                        None => return Err(s.error(mark, "unterminated string literal")),
                    }
                }
                tokens.push(s.token(TokenKind::StringLiteral, mark, text));
            }

            // Backtick-quoted identifier
            '`' => {
                s.bump();
                let mut text = String::new();
                loop {
                    match s.bump() {
                        Some('`') => break,
                        Some(c) => text.push(c),
                        None => return Err(s.error(mark, "unterminated backtick identifier")),
                    }
                }
                tokens.push(s.token(TokenKind::Identifier, mark, text));
            }

            c if c.is_ascii_digit() => {
                let mut num = String::new();
                let mut is_float = false;
                while let Some(c) = s.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        s.bump();
                    } else if c == '.' && !is_float && s.peek2().is_some_and(|d| d.is_ascii_digit())
                    {
                        // A dot not followed by a digit is a range `..` or
                        // property access, never part of the number.
                        is_float = true;
                        num.push(c);
                        s.bump();
                    } else if (c == 'e' || c == 'E')
                        && s.peek2()
                            .is_some_and(|d| d.is_ascii_digit() || d == '+' || d == '-')
                    {
                        is_float = true;
                        num.push(c);
                        s.bump();
                        if let Some(sign @ ('+' | '-')) = s.peek() {
                            num.push(sign);
                            s.bump();
                        }
                        if !s.peek().is_some_and(|d| d.is_ascii_digit()) {
                            return Err(s.error(mark, "exponent requires at least one digit"));
                        }
                        while let Some(d) = s.peek() {
                            if d.is_ascii_digit() {
                                num.push(d);
                                s.bump();
                            } else {
                                break;
                            }
                        }
                        break;
                    } else {
                        break;
                    }
                }
                let kind = if is_float { TokenKind::Float } else { TokenKind::Integer };
                tokens.push(s.token(kind, mark, num));
            }

            // Parameter: $name
            '$' => {
                s.bump();
                let mut name = String::new();
                while let Some(c) = s.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        name.push(c);
                        s.bump();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    return Err(s.error(mark, "expected parameter name after '$'"));
                }
                tokens.push(s.token(TokenKind::Parameter, mark, name));
            }

            // Identifiers and keywords
            c if c.is_alphabetic() || c == '_' => {
                let start = s.pos;
                while s.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
                    s.bump();
                }
                let ident = &input[start..s.pos];
                let kind = keyword_or_ident(ident);
                tokens.push(s.token(kind, mark, ident));
            }

            '(' => { s.bump(); tokens.push(s.token(TokenKind::LParen, mark, "(")); }
            ')' => { s.bump(); tokens.push(s.token(TokenKind::RParen, mark, ")")); }
            '[' => { s.bump(); tokens.push(s.token(TokenKind::LBracket, mark, "[")); }
            ']' => { s.bump(); tokens.push(s.token(TokenKind::RBracket, mark, "]")); }
            '{' => { s.bump(); tokens.push(s.token(TokenKind::LBrace, mark, "{")); }
            '}' => { s.bump(); tokens.push(s.token(TokenKind::RBrace, mark, "}")); }
            ',' => { s.bump(); tokens.push(s.token(TokenKind::Comma, mark, ",")); }
            ':' => { s.bump(); tokens.push(s.token(TokenKind::Colon, mark, ":")); }
            ';' => { s.bump(); tokens.push(s.token(TokenKind::Semicolon, mark, ";")); }
            '|' => { s.bump(); tokens.push(s.token(TokenKind::Pipe, mark, "|")); }
            '*' => { s.bump(); tokens.push(s.token(TokenKind::Star, mark, "*")); }
            '%' => { s.bump(); tokens.push(s.token(TokenKind::Percent, mark, "%")); }
            '/' => { s.bump(); tokens.push(s.token(TokenKind::Slash, mark, "/")); }

            '.' => {
                s.bump();
                if s.peek() == Some('.') {
                    s.bump();
                    tokens.push(s.token(TokenKind::DotDot, mark, ".."));
                } else {
                    tokens.push(s.token(TokenKind::Dot, mark, "."));
                }
            }

            '+' => {
                s.bump();
                if s.peek() == Some('=') {
                    s.bump();
                    tokens.push(s.token(TokenKind::PlusEq, mark, "+="));
                } else {
                    tokens.push(s.token(TokenKind::Plus, mark, "+"));
                }
            }

            '=' => {
                s.bump();
                tokens.push(s.token(TokenKind::Eq, mark, "="));
            }

            '<' => {
                s.bump();
                match s.peek() {
                    Some('=') => { s.bump(); tokens.push(s.token(TokenKind::Lte, mark, "<=")); }
                    Some('>') => { s.bump(); tokens.push(s.token(TokenKind::Neq, mark, "<>")); }
                    Some('-') => { s.bump(); tokens.push(s.token(TokenKind::LeftArrow, mark, "<-")); }
                    _ => tokens.push(s.token(TokenKind::Lt, mark, "<")),
                }
            }

            '>' => {
                s.bump();
                if s.peek() == Some('=') {
                    s.bump();
                    tokens.push(s.token(TokenKind::Gte, mark, ">="));
                } else {
                    tokens.push(s.token(TokenKind::Gt, mark, ">"));
                }
            }

            '-' => {
                s.bump();
                if s.peek() == Some('>') {
                    s.bump();
                    tokens.push(s.token(TokenKind::Arrow, mark, "->"));
                } else {
                    tokens.push(s.token(TokenKind::Dash, mark, "-"));
                }
            }

            other => {
                return Err(s.error(mark, format!("unexpected character '{other}'")));
            }
        }
    }

    let end = s.mark();
    tokens.push(s.token(TokenKind::Eof, end, ""));
    Ok(tokens)
}

fn keyword_or_ident(s: &str) -> TokenKind {
    match s.to_ascii_uppercase().as_str() {
        "MATCH" => TokenKind::Match,
        "OPTIONAL" => TokenKind::Optional,
        "WHERE" => TokenKind::Where,
        "RETURN" => TokenKind::Return,
        "WITH" => TokenKind::With,
        "UNWIND" => TokenKind::Unwind,
        "CREATE" => TokenKind::Create,
        "MERGE" => TokenKind::Merge,
        "DELETE" => TokenKind::Delete,
        "DETACH" => TokenKind::Detach,
        "SET" => TokenKind::Set,
        "REMOVE" => TokenKind::Remove,
        "UNION" => TokenKind::Union,
        "ALL" => TokenKind::All,
        "ORDER" => TokenKind::Order,
        "BY" => TokenKind::By,
        "SKIP" => TokenKind::Skip,
        "LIMIT" => TokenKind::Limit,
        "ASC" | "ASCENDING" => TokenKind::Asc,
        "DESC" | "DESCENDING" => TokenKind::Desc,
        "DISTINCT" => TokenKind::Distinct,
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "IS" => TokenKind::Is,
        "NULL" => TokenKind::Null,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        "IN" => TokenKind::In,
        "AS" => TokenKind::As,
        "CASE" => TokenKind::Case,
        "WHEN" => TokenKind::When,
        "THEN" => TokenKind::Then,
        "ELSE" => TokenKind::Else,
        "END" => TokenKind::End,
        "EXISTS" => TokenKind::Exists,
        "ANY" => TokenKind::Any,
        "NONE" => TokenKind::None,
        "SINGLE" => TokenKind::Single,
        "STARTS" => TokenKind::Starts,
        "ENDS" => TokenKind::Ends,
        "CONTAINS" => TokenKind::Contains,
        "ON" => TokenKind::On,
        "CALL" => TokenKind::Call,
        "YIELD" => TokenKind::Yield,
        _ => TokenKind::Identifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_match() {
        assert_eq!(
            kinds("MATCH (n:Person) RETURN n"),
            vec![
                TokenKind::Match,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_relationship_pattern() {
        assert_eq!(
            kinds("(a)-[:KNOWS]->(b)"),
            vec![
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Dash,
                TokenKind::LBracket,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::RBracket,
                TokenKind::Arrow,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        let tokens = tokenize(r#"'a\n\t\\\'b' "cAd""#).unwrap();
        assert_eq!(tokens[0].text, "a\n\t\\'b");
        assert_eq!(tokens[1].text, "cAd");
    }

    #[test]
    fn test_var_length_range_is_not_a_float() {
        assert_eq!(
            kinds("*1..2"),
            vec![
                TokenKind::Star,
                TokenKind::Integer,
                TokenKind::DotDot,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_float_with_exponent() {
        let tokens = tokenize("1.5e-3 2E2 7").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Float);
        assert_eq!(tokens[0].text, "1.5e-3");
        assert_eq!(tokens[1].kind, TokenKind::Float);
        assert_eq!(tokens[2].kind, TokenKind::Integer);
    }

    #[test]
    fn test_backtick_identifier() {
        let tokens = tokenize("`weird name`").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].text, "weird name");
    }

    #[test]
    fn test_line_and_column_tracking() {
        let tokens = tokenize("MATCH\n  (n)").unwrap();
        let lparen = tokens.iter().find(|t| t.kind == TokenKind::LParen).unwrap();
        assert_eq!(lparen.span.line, 2);
        assert_eq!(lparen.span.column, 3);
    }

    #[test]
    fn test_parameter() {
        let tokens = tokenize("$name").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Parameter);
        assert_eq!(tokens[0].text, "name");
    }

    #[test]
    fn test_comments_discarded() {
        assert_eq!(
            kinds("MATCH /* multi\nline */ (n) // trailing\nRETURN n"),
            vec![
                TokenKind::Match,
                TokenKind::LParen,
                TokenKind::Identifier,
                TokenKind::RParen,
                TokenKind::Return,
                TokenKind::Identifier,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_block_comment() {
        assert!(tokenize("MATCH /* unterminated").is_err());
    }

    #[test]
    fn test_unexpected_character_reports_position() {
        let err = tokenize("RETURN ^").unwrap_err();
        match err {
            Error::Tokenize { position, line, column, .. } => {
                assert_eq!(position, 7);
                assert_eq!(line, 1);
                assert_eq!(column, 8);
            }
            other => panic!("expected tokenize error, got {other:?}"),
        }
    }

    #[test]
    fn test_all_direction_forms() {
        assert_eq!(
            kinds("-- -> <- <-->"),
            vec![
                TokenKind::Dash,
                TokenKind::Dash,
                TokenKind::Arrow,
                TokenKind::LeftArrow,
                TokenKind::LeftArrow,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }
}
