//! The symbolic-expression value, reader, and printer.

use std::fmt::Write as _;

// =============================================================================
// Values
// =============================================================================

/// A symbolic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    /// An integer atom.
    Int(i64),
    /// A floating-point atom (always printed with a decimal point).
    Float(f64),
    /// A quoted string atom.
    Str(String),
    /// A bare identifier atom (`true`, `false`, `virtual`, ...).
    Ident(String),
    /// A brace-delimited list: `{a, b, c}`.
    List(Vec<SExpr>),
    /// A head applied to operands: `head(a, b)`.
    Node(String, Vec<SExpr>),
}

impl SExpr {
    /// Build a node.
    pub fn node(head: impl Into<String>, operands: Vec<SExpr>) -> SExpr {
        SExpr::Node(head.into(), operands)
    }

    /// Build an identifier atom.
    pub fn ident(name: impl Into<String>) -> SExpr {
        SExpr::Ident(name.into())
    }

    /// Build a boolean atom (`true` / `false` identifiers).
    pub fn bool(value: bool) -> SExpr {
        SExpr::Ident(if value { "true" } else { "false" }.into())
    }
}

// =============================================================================
// Errors
// =============================================================================

/// A reader failure with its byte offset.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offset {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for ParseError {}

// =============================================================================
// Reader
// =============================================================================

struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Skip whitespace and comma separators.
    fn skip_trivia(&mut self) {
        while let Some(byte) = self.peek() {
            if byte.is_ascii_whitespace() || byte == b',' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn expr(&mut self) -> Result<SExpr, ParseError> {
        self.skip_trivia();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(b'{') => self.list(),
            Some(b'"') => self.string(),
            Some(byte) if byte == b'-' || byte.is_ascii_digit() => self.number(),
            Some(byte) if is_ident_start(byte) => self.ident_or_node(),
            Some(byte) => Err(self.error(format!("unexpected character '{}'", byte as char))),
        }
    }

    fn list(&mut self) -> Result<SExpr, ParseError> {
        self.bump(); // '{'
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                Some(b'}') => {
                    self.bump();
                    return Ok(SExpr::List(items));
                }
                Some(_) => items.push(self.expr()?),
                None => return Err(self.error("unterminated list")),
            }
        }
    }

    fn string(&mut self) -> Result<SExpr, ParseError> {
        self.bump(); // '"'
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(b'"') => {
                    return String::from_utf8(bytes)
                        .map(SExpr::Str)
                        .map_err(|_| self.error("string is not valid utf-8"))
                }
                Some(b'\\') => match self.bump() {
                    Some(b'"') => bytes.push(b'"'),
                    Some(b'\\') => bytes.push(b'\\'),
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(other) => {
                        return Err(
                            self.error(format!("unknown escape '\\{}'", other as char))
                        )
                    }
                    None => return Err(self.error("unterminated escape")),
                },
                Some(byte) => bytes.push(byte),
            }
        }
    }

    fn number(&mut self) -> Result<SExpr, ParseError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.bump();
        }
        let mut is_float = false;
        while let Some(byte) = self.peek() {
            if byte.is_ascii_digit() {
                self.bump();
            } else if byte == b'.' || byte == b'e' || byte == b'E' {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some(b'-') | Some(b'+')) {
                    self.bump();
                }
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;
        if is_float {
            text.parse::<f64>()
                .map(SExpr::Float)
                .map_err(|_| self.error(format!("invalid float '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(SExpr::Int)
                .map_err(|_| self.error(format!("invalid integer '{}'", text)))
        }
    }

    fn ident_or_node(&mut self) -> Result<SExpr, ParseError> {
        let start = self.pos;
        while let Some(byte) = self.peek() {
            if is_ident_continue(byte) {
                self.bump();
            } else {
                break;
            }
        }
        let name = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("invalid identifier"))?
            .to_string();

        if self.peek() == Some(b'(') {
            self.bump();
            let mut operands = Vec::new();
            loop {
                self.skip_trivia();
                match self.peek() {
                    Some(b')') => {
                        self.bump();
                        return Ok(SExpr::Node(name, operands));
                    }
                    Some(_) => operands.push(self.expr()?),
                    None => return Err(self.error("unterminated operand list")),
                }
            }
        }
        Ok(SExpr::Ident(name))
    }
}

fn is_ident_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'#'
}

fn is_ident_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.' || byte == b'#'
}

/// Parse a single expression, requiring the input to be fully consumed.
pub fn parse(input: &str) -> Result<SExpr, ParseError> {
    let mut reader = Reader::new(input);
    let expr = reader.expr()?;
    reader.skip_trivia();
    if reader.pos != reader.input.len() {
        return Err(reader.error("trailing input after expression"));
    }
    Ok(expr)
}

/// Parse a sequence of top-level expressions.
pub fn parse_all(input: &str) -> Result<Vec<SExpr>, ParseError> {
    let mut reader = Reader::new(input);
    let mut exprs = Vec::new();
    loop {
        reader.skip_trivia();
        if reader.pos == reader.input.len() {
            return Ok(exprs);
        }
        exprs.push(reader.expr()?);
    }
}

// =============================================================================
// Printer
// =============================================================================

/// Render an expression in canonical form.
pub fn print(expr: &SExpr) -> String {
    let mut out = String::new();
    print_into(expr, &mut out);
    out
}

fn print_into(expr: &SExpr, out: &mut String) {
    match expr {
        SExpr::Int(v) => {
            let _ = write!(out, "{}", v);
        }
        SExpr::Float(v) => {
            // `{:?}` keeps a decimal point so the value reads back as a
            // float.
            let _ = write!(out, "{:?}", v);
        }
        SExpr::Str(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    other => out.push(other),
                }
            }
            out.push('"');
        }
        SExpr::Ident(name) => out.push_str(name),
        SExpr::List(items) => {
            out.push('{');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_into(item, out);
            }
            out.push('}');
        }
        SExpr::Node(head, operands) => {
            out.push_str(head);
            out.push('(');
            for (i, operand) in operands.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_into(operand, out);
            }
            out.push(')');
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
