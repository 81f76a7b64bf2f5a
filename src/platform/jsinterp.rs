//! Restricted interpreter for the player's signature transform functions
//!
//! Only the handful of constructs the transform functions are built from is
//! understood: declarations, assignments, arithmetic, indexing, member
//! access, calls, literals and `return`. The function is located by name in
//! the script, parsed into a small AST and evaluated; helpers it references
//! (other functions, or objects whose members are functions) are extracted
//! from the same script on first use. Anything else fails with
//! [`ScriptError::Unsupported`] instead of being guessed at.

use regex::Regex;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::debug;

const MAX_CALL_DEPTH: usize = 32;

/// Longest first, so multi-character operators win over their prefixes
const PUNCTUATORS: &[&str] = &[
    ">>>=", "===", "!==", ">>>", "<<=", ">>=", "...", "**", "=>", "==", "!=", "<=", ">=", "&&",
    "||", "??", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>", "{", "}",
    "(", ")", "[", "]", ";", ",", ".", "=", "+", "-", "*", "/", "%", ":", "?", "<", ">", "!", "&",
    "|", "^", "~",
];

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "default", "break", "continue", "new",
    "delete", "typeof", "instanceof", "in", "of", "this", "throw", "try", "catch", "finally",
    "class", "yield", "await", "async", "with", "void",
];

/// Errors raised while extracting or evaluating a script function
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("function `{0}` not found in script")]
    FunctionNotFound(String),

    #[error("unsupported construct: {0}")]
    Unsupported(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("`{0}` is not defined")]
    UndefinedReference(String),

    #[error("call depth limit exceeded")]
    TooDeep,
}

type Result<T> = std::result::Result<T, ScriptError>;

/// Runtime value
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Number(f64),
    Str(String),
    /// Arrays are shared, so helpers mutate their caller's array in place
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<HashMap<String, Value>>>),
    Function(Rc<FunctionDef>),
}

impl Value {
    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// String conversion with the script language's formatting rules
    pub fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(Value::to_js_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Function(def) => format!("function {}", def.name.as_deref().unwrap_or("")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n < 0.0 { "-" } else { "" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        // Covers -0 as well
        "0".to_string()
    } else if n.abs() >= 1e21 {
        let formatted = format!("{:e}", n);
        match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{}e+{}", mantissa, exponent)
            }
            _ => formatted,
        }
    } else {
        format!("{}", n)
    }
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Punct(&'static str),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(name) => write!(f, "`{}`", name),
            Token::Number(n) => write!(f, "number {}", format_number(*n)),
            Token::Str(s) => write!(f, "string {:?}", s),
            Token::Punct(p) => write!(f, "`{}`", p),
            Token::Eof => write!(f, "end of input"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_ident_start) && chars.all(is_ident_part)
}

fn starts_with_at(chars: &[char], at: usize, pattern: &str) -> bool {
    let mut index = at;
    for expected in pattern.chars() {
        if chars.get(index) != Some(&expected) {
            return false;
        }
        index += 1;
    }
    true
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
        } else if let Some(next) = skip_comment(&chars, i)? {
            i = next;
        } else if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_part(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() {
            let (number, next) = lex_number(&chars, i)?;
            tokens.push(Token::Number(number));
            i = next;
        } else if c == '"' || c == '\'' {
            let (string, next) = lex_string(&chars, i)?;
            tokens.push(Token::Str(string));
            i = next;
        } else if let Some(punct) = PUNCTUATORS.iter().find(|p| starts_with_at(&chars, i, p)) {
            tokens.push(Token::Punct(*punct));
            i += punct.chars().count();
        } else {
            return Err(ScriptError::Syntax(format!("unexpected character {:?}", c)));
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

/// Index just past the comment starting at `i`, if one starts there
fn skip_comment(chars: &[char], i: usize) -> Result<Option<usize>> {
    if starts_with_at(chars, i, "//") {
        let mut j = i + 2;
        while j < chars.len() && chars[j] != '\n' {
            j += 1;
        }
        Ok(Some(j))
    } else if starts_with_at(chars, i, "/*") {
        let mut j = i + 2;
        while j < chars.len() && !starts_with_at(chars, j, "*/") {
            j += 1;
        }
        if j >= chars.len() {
            return Err(ScriptError::Syntax("unterminated comment".to_string()));
        }
        Ok(Some(j + 2))
    } else {
        Ok(None)
    }
}

/// Byte index of the `}` closing the block opened at byte `open`.
///
/// String literals and comments are skipped the way the lexer skips them, so
/// braces inside them do not count.
fn find_block_end(code: &str, open: usize) -> Result<usize> {
    let tail = code
        .get(open..)
        .ok_or_else(|| ScriptError::Syntax(format!("offset {} is out of bounds", open)))?;
    let chars: Vec<char> = tail.chars().collect();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '"' || c == '\'' {
            let (_, next) = lex_string(&chars, i)?;
            i = next;
            continue;
        }
        if let Some(next) = skip_comment(&chars, i)? {
            i = next;
            continue;
        }
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| ScriptError::Syntax("unbalanced `}`".to_string()))?;
                if depth == 0 {
                    let offset: usize = chars[..i].iter().map(|c| c.len_utf8()).sum();
                    return Ok(open + offset);
                }
            }
            _ => {}
        }
        i += 1;
    }

    Err(ScriptError::Syntax("unterminated block".to_string()))
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize)> {
    let mut i = start;

    if chars[i] == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        i += 2;
        let digits_start = i;
        while i < chars.len() && chars[i].is_ascii_hexdigit() {
            i += 1;
        }
        let digits: String = chars[digits_start..i].iter().collect();
        let value = i64::from_str_radix(&digits, 16)
            .map_err(|_| ScriptError::Syntax(format!("invalid hex literal 0x{}", digits)))?;
        return Ok((value as f64, i));
    }

    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if matches!(chars.get(i), Some('e') | Some('E')) {
        let digits_at = if matches!(chars.get(i + 1), Some('+') | Some('-')) {
            i + 2
        } else {
            i + 1
        };
        if chars.get(digits_at).is_some_and(|c| c.is_ascii_digit()) {
            i = digits_at;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }

    let literal: String = chars[start..i].iter().collect();
    let value = literal
        .parse::<f64>()
        .map_err(|_| ScriptError::Syntax(format!("invalid number literal {}", literal)))?;
    Ok((value, i))
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize)> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        let c = chars[i];
        if c == quote {
            return Ok((value, i + 1));
        }
        if c != '\\' {
            value.push(c);
            i += 1;
            continue;
        }

        let escaped = *chars
            .get(i + 1)
            .ok_or_else(|| ScriptError::Syntax("unterminated string".to_string()))?;
        i += 2;
        match escaped {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            'x' | 'u' => {
                let width = if escaped == 'x' { 2 } else { 4 };
                let digits: String = chars.iter().skip(i).take(width).collect();
                let code = u32::from_str_radix(&digits, 16)
                    .ok()
                    .filter(|_| digits.len() == width)
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        ScriptError::Syntax(format!("invalid escape \\{}{}", escaped, digits))
                    })?;
                value.push(code);
                i += width;
            }
            other => value.push(other),
        }
    }

    Err(ScriptError::Syntax("unterminated string".to_string()))
}

// ---------------------------------------------------------------------------
// Parser

/// A parsed function: parameters plus statement list
#[derive(Debug)]
pub struct FunctionDef {
    name: Option<String>,
    params: Vec<String>,
    body: Vec<Stmt>,
}

#[derive(Debug)]
enum Stmt {
    Var(Vec<(String, Option<Expr>)>),
    Return(Option<Expr>),
    Expr(Expr),
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug)]
enum Expr {
    Number(f64),
    Str(String),
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Sequence(Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Token::Punct(p) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{}`", punct)))
        }
    }

    fn expect_eof(&self) -> Result<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            _ => Err(self.unexpected("end of input")),
        }
    }

    /// Error for the current token; known but unsupported syntax is
    /// reported as such rather than as a plain syntax error.
    fn unexpected(&self, wanted: &str) -> ScriptError {
        match self.peek() {
            Token::Punct(p) => ScriptError::Unsupported(format!("operator `{}`", p)),
            Token::Ident(name) if RESERVED.contains(&name.as_str()) => {
                ScriptError::Unsupported(format!("keyword `{}`", name))
            }
            other => ScriptError::Syntax(format!("expected {}, found {}", wanted, other)),
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        match self.peek() {
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn parse_statements(&mut self, closing: Option<&str>) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                Token::Eof if closing.is_some() => {
                    return Err(ScriptError::Syntax("unexpected end of function body".to_string()))
                }
                Token::Eof => break,
                Token::Punct(p) if Some(*p) == closing => break,
                _ => statements.push(self.parse_statement()?),
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        let statement = match self.peek().clone() {
            Token::Punct(";") => Stmt::Empty,
            Token::Punct("{") => {
                return Err(ScriptError::Unsupported("block statement".to_string()))
            }
            Token::Ident(keyword) if matches!(keyword.as_str(), "var" | "let" | "const") => {
                self.pos += 1;
                self.parse_declarations()?
            }
            Token::Ident(keyword) if keyword == "return" => {
                self.pos += 1;
                match self.peek() {
                    Token::Eof | Token::Punct(";") | Token::Punct("}") => Stmt::Return(None),
                    _ => Stmt::Return(Some(self.parse_sequence()?)),
                }
            }
            Token::Ident(keyword) if RESERVED.contains(&keyword.as_str()) => {
                return Err(ScriptError::Unsupported(format!("`{}` statement", keyword)))
            }
            _ => Stmt::Expr(self.parse_sequence()?),
        };
        self.end_statement()?;
        Ok(statement)
    }

    fn end_statement(&mut self) -> Result<()> {
        if self.eat(";") {
            return Ok(());
        }
        match self.peek() {
            Token::Eof | Token::Punct("}") => Ok(()),
            _ => Err(self.unexpected("`;`")),
        }
    }

    fn parse_declarations(&mut self) -> Result<Stmt> {
        let mut declarations = Vec::new();
        loop {
            let name = self.parse_identifier()?;
            let init = if self.eat("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            declarations.push((name, init));
            if !self.eat(",") {
                break;
            }
        }
        Ok(Stmt::Var(declarations))
    }

    fn parse_sequence(&mut self) -> Result<Expr> {
        let first = self.parse_assignment()?;
        if !matches!(self.peek(), Token::Punct(",")) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat(",") {
            exprs.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        let target = self.parse_additive()?;
        if !self.eat("=") {
            return Ok(target);
        }
        match target {
            Expr::Ident(_) | Expr::Index(..) | Expr::Member(..) => {
                let value = self.parse_assignment()?;
                Ok(Expr::Assign(Box::new(target), Box::new(value)))
            }
            _ => Err(ScriptError::Syntax("invalid assignment target".to_string())),
        }
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat("+") {
                BinOp::Add
            } else if self.eat("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat("*") {
                BinOp::Mul
            } else if self.eat("/") {
                BinOp::Div
            } else if self.eat("%") {
                BinOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                // Member names may be reserved words (`a.default`)
                match self.next() {
                    Token::Ident(name) => expr = Expr::Member(Box::new(expr), name),
                    other => {
                        return Err(ScriptError::Syntax(format!(
                            "expected member name, found {}",
                            other
                        )))
                    }
                }
            } else if self.eat("[") {
                let index = self.parse_sequence()?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.parse_list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma separated expressions up to `closing`, trailing comma allowed
    fn parse_list(&mut self, closing: &str) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat(closing) {
            items.push(self.parse_assignment()?);
            if !self.eat(",") {
                self.expect(closing)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.pos += 1;
                Ok(Expr::Str(s))
            }
            Token::Ident(name) if name == "function" => {
                self.pos += 1;
                let name = match self.peek() {
                    Token::Ident(_) => Some(self.parse_identifier()?),
                    _ => None,
                };
                self.parse_function_rest(name).map(|def| Expr::Function(Rc::new(def)))
            }
            Token::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(Expr::Ident(name))
            }
            Token::Punct("(") => {
                self.pos += 1;
                let expr = self.parse_sequence()?;
                self.expect(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.pos += 1;
                Ok(Expr::Array(self.parse_list("]")?))
            }
            Token::Punct("{") => {
                self.pos += 1;
                self.parse_object_rest()
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_function_rest(&mut self, name: Option<String>) -> Result<FunctionDef> {
        self.expect("(")?;
        let mut params = Vec::new();
        while !self.eat(")") {
            params.push(self.parse_identifier()?);
            if !self.eat(",") {
                self.expect(")")?;
                break;
            }
        }
        self.expect("{")?;
        let body = self.parse_statements(Some("}"))?;
        self.expect("}")?;
        Ok(FunctionDef { name, params, body })
    }

    fn parse_object_rest(&mut self) -> Result<Expr> {
        let mut members = Vec::new();
        while !self.eat("}") {
            let key = match self.next() {
                Token::Ident(name) => name,
                Token::Str(s) => s,
                Token::Number(n) => format_number(n),
                other => {
                    return Err(ScriptError::Syntax(format!(
                        "expected property name, found {}",
                        other
                    )))
                }
            };
            self.expect(":")?;
            members.push((key, self.parse_assignment()?));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(members))
    }
}

// ---------------------------------------------------------------------------
// Interpreter

type Scope = HashMap<String, Value>;

/// Interpreter over one script blob
pub struct JsInterpreter {
    code: String,
    globals: RefCell<HashMap<String, Value>>,
    /// Names whose extraction is in progress
    resolving: RefCell<HashSet<String>>,
    depth: Cell<usize>,
}

/// A function extracted from the script, ready to be called
pub struct JsFunction<'a> {
    interpreter: &'a JsInterpreter,
    def: Rc<FunctionDef>,
}

impl JsFunction<'_> {
    /// Formal parameter names
    pub fn params(&self) -> &[String] {
        &self.def.params
    }

    /// Call with positional arguments
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        self.interpreter.call(&self.def, args)
    }
}

impl JsInterpreter {
    /// Create an interpreter over `code`; nothing is parsed up front
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            globals: RefCell::new(HashMap::new()),
            resolving: RefCell::new(HashSet::new()),
            depth: Cell::new(0),
        }
    }

    /// Extract function `name` from the script
    pub fn extract_function(&self, name: &str) -> Result<JsFunction<'_>> {
        let def = self.extract_function_def(name)?;
        Ok(JsFunction {
            interpreter: self,
            def,
        })
    }

    fn extract_function_def(&self, name: &str) -> Result<Rc<FunctionDef>> {
        let name_re = regex::escape(name);
        let pattern = Regex::new(&format!(
            r"(?:function\s+{name}|(?:^|[^a-zA-Z0-9_$.])(?:var\s+)?{name}\s*=\s*function)\s*\(([^)]*)\)\s*\{{",
            name = name_re
        ))
        .map_err(|e| ScriptError::Syntax(e.to_string()))?;

        let captures = pattern
            .captures(&self.code)
            .ok_or_else(|| ScriptError::FunctionNotFound(name.to_string()))?;
        let whole = captures.get(0).map_or(0..0, |m| m.range());
        let params_text = captures.get(1).map_or("", |m| m.as_str());

        let open = whole.end - 1;
        let close = find_block_end(&self.code, open)
            .map_err(|_| ScriptError::Syntax(format!("unterminated body of `{}`", name)))?;

        let params = parse_params(params_text)?;
        let mut parser = Parser::new(&self.code[open + 1..close])?;
        let body = parser.parse_statements(None)?;
        parser.expect_eof()?;

        debug!(
            "Extracted function `{}` ({} params, {} statements)",
            name,
            params.len(),
            body.len()
        );
        Ok(Rc::new(FunctionDef {
            name: Some(name.to_string()),
            params,
            body,
        }))
    }

    fn extract_object(&self, name: &str) -> Result<Value> {
        let pattern = Regex::new(&format!(
            r"(?:^|[^a-zA-Z0-9_$.])(?:var\s+)?{}\s*=\s*\{{",
            regex::escape(name)
        ))
        .map_err(|e| ScriptError::Syntax(e.to_string()))?;

        let open = pattern
            .find(&self.code)
            .map(|m| m.end() - 1)
            .ok_or_else(|| ScriptError::UndefinedReference(name.to_string()))?;
        let close = find_block_end(&self.code, open)
            .map_err(|_| ScriptError::Syntax(format!("unterminated object `{}`", name)))?;

        let mut parser = Parser::new(&self.code[open..=close])?;
        let literal = parser.parse_primary()?;
        parser.expect_eof()?;

        debug!("Extracted helper object `{}`", name);
        self.eval(&literal, &mut Scope::new())
    }

    /// Resolve a name that is not a local: a function or object in the script
    fn resolve_global(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.globals.borrow().get(name) {
            return Ok(value.clone());
        }

        // An object literal is evaluated before it is cached, so helpers
        // referring to each other would otherwise recurse without end
        if !self.resolving.borrow_mut().insert(name.to_string()) {
            return Err(ScriptError::Unsupported(format!(
                "circular reference to `{}`",
                name
            )));
        }
        let extracted = match self.extract_function_def(name) {
            Ok(def) => Ok(Value::Function(def)),
            Err(ScriptError::FunctionNotFound(_)) => self.extract_object(name),
            Err(e) => Err(e),
        };
        self.resolving.borrow_mut().remove(name);

        let value = extracted?;
        self.globals
            .borrow_mut()
            .insert(name.to_string(), value.clone());
        Ok(value)
    }

    fn call(&self, def: &FunctionDef, args: Vec<Value>) -> Result<Value> {
        let depth = self.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::TooDeep);
        }
        self.depth.set(depth + 1);

        let mut scope: Scope = def
            .params
            .iter()
            .cloned()
            .zip(args.into_iter().chain(std::iter::repeat(Value::Undefined)))
            .collect();
        let result = self.exec_body(&def.body, &mut scope);

        self.depth.set(depth);
        result
    }

    fn exec_body(&self, body: &[Stmt], scope: &mut Scope) -> Result<Value> {
        for statement in body {
            match statement {
                Stmt::Empty => {}
                Stmt::Expr(expr) => {
                    self.eval(expr, scope)?;
                }
                Stmt::Var(declarations) => {
                    for (name, init) in declarations {
                        match init {
                            Some(expr) => {
                                let value = self.eval(expr, scope)?;
                                scope.insert(name.clone(), value);
                            }
                            None => {
                                scope.entry(name.clone()).or_insert(Value::Undefined);
                            }
                        }
                    }
                }
                Stmt::Return(expr) => {
                    return match expr {
                        Some(expr) => self.eval(expr, scope),
                        None => Ok(Value::Undefined),
                    };
                }
            }
        }
        Ok(Value::Undefined)
    }

    fn eval(&self, expr: &Expr, scope: &mut Scope) -> Result<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Ident(name) => match scope.get(name) {
                Some(value) => Ok(value.clone()),
                None if name == "undefined" => Ok(Value::Undefined),
                None => self.resolve_global(name),
            },
            Expr::Array(items) => {
                let values = self.eval_all(items, scope)?;
                Ok(Value::array(values))
            }
            Expr::Object(members) => {
                let mut object = HashMap::new();
                for (key, expr) in members {
                    object.insert(key.clone(), self.eval(expr, scope)?);
                }
                Ok(Value::Object(Rc::new(RefCell::new(object))))
            }
            Expr::Function(def) => Ok(Value::Function(Rc::clone(def))),
            Expr::Member(target, name) => {
                let target = self.eval(target, scope)?;
                get_member(&target, name)
            }
            Expr::Index(target, index) => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?;
                get_index(&target, &index)
            }
            Expr::Call(callee, args) => self.eval_call(callee, args, scope),
            Expr::Assign(target, value) => self.eval_assign(target, value, scope),
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                binary(*op, &left, &right)
            }
            Expr::Neg(operand) => {
                let value = self.eval(operand, scope)?;
                Ok(Value::Number(-to_number(&value)?))
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr, scope)?;
                }
                Ok(last)
            }
        }
    }

    fn eval_all(&self, exprs: &[Expr], scope: &mut Scope) -> Result<Vec<Value>> {
        exprs.iter().map(|expr| self.eval(expr, scope)).collect()
    }

    fn eval_call(&self, callee: &Expr, args: &[Expr], scope: &mut Scope) -> Result<Value> {
        if let Expr::Member(target, method) = callee {
            let target = self.eval(target, scope)?;
            let args = self.eval_all(args, scope)?;
            return self.call_method(&target, method, args);
        }

        let function = self.eval(callee, scope)?;
        let args = self.eval_all(args, scope)?;
        match function {
            Value::Function(def) => self.call(&def, args),
            other => Err(ScriptError::Type(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    fn call_method(&self, target: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
        match target {
            Value::Object(members) => {
                let member = members.borrow().get(method).cloned();
                match member {
                    Some(Value::Function(def)) => self.call(&def, args),
                    Some(other) => Err(ScriptError::Type(format!(
                        "member `{}` is a {}, not a function",
                        method,
                        other.type_name()
                    ))),
                    None => Err(ScriptError::UndefinedReference(method.to_string())),
                }
            }
            Value::Array(items) => array_method(items, method, &args),
            Value::Str(s) => string_method(s, method, &args),
            other => Err(ScriptError::Type(format!(
                "cannot call `{}` on {}",
                method,
                other.type_name()
            ))),
        }
    }

    fn eval_assign(&self, target: &Expr, value: &Expr, scope: &mut Scope) -> Result<Value> {
        match target {
            Expr::Ident(name) => {
                let value = self.eval(value, scope)?;
                match scope.get_mut(name) {
                    Some(slot) => {
                        *slot = value.clone();
                        Ok(value)
                    }
                    None => Err(ScriptError::Unsupported(format!(
                        "assignment to undeclared `{}`",
                        name
                    ))),
                }
            }
            Expr::Index(object, index) => {
                let object = self.eval(object, scope)?;
                let index = self.eval(index, scope)?;
                let value = self.eval(value, scope)?;
                set_index(&object, &index, value.clone())?;
                Ok(value)
            }
            Expr::Member(object, name) => {
                let object = self.eval(object, scope)?;
                let value = self.eval(value, scope)?;
                match object {
                    Value::Object(members) => {
                        members.borrow_mut().insert(name.clone(), value.clone());
                        Ok(value)
                    }
                    other => Err(ScriptError::Type(format!(
                        "cannot set `{}` on {}",
                        name,
                        other.type_name()
                    ))),
                }
            }
            _ => Err(ScriptError::Syntax("invalid assignment target".to_string())),
        }
    }
}

fn parse_params(text: &str) -> Result<Vec<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split(',')
        .map(|param| {
            let param = param.trim();
            if is_identifier(param) && !RESERVED.contains(&param) {
                Ok(param.to_string())
            } else {
                Err(ScriptError::Unsupported(format!("parameter `{}`", param)))
            }
        })
        .collect()
}

fn to_number(value: &Value) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        ScriptError::Type(format!("expected a number, got {}", value.type_name()))
    })
}

fn to_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Resolve a possibly negative position against `len`, clamped to `0..=len`
fn relative_index(value: Option<&Value>, len: usize, default: usize) -> Result<usize> {
    let n = match value {
        None | Some(Value::Undefined) => return Ok(default),
        Some(value) => to_number(value)?.trunc(),
    };
    let len = len as f64;
    let resolved = if n.is_nan() {
        0.0
    } else if n < 0.0 {
        (len + n).max(0.0)
    } else {
        n.min(len)
    };
    Ok(resolved as usize)
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    if op == BinOp::Add && (matches!(left, Value::Str(_)) || matches!(right, Value::Str(_))) {
        return Ok(Value::Str(left.to_js_string() + &right.to_js_string()));
    }
    let (l, r) = (to_number(left)?, to_number(right)?);
    let result = match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => l / r,
        BinOp::Rem => l % r,
    };
    Ok(Value::Number(result))
}

fn get_member(target: &Value, name: &str) -> Result<Value> {
    match (target, name) {
        (Value::Array(items), "length") => Ok(Value::Number(items.borrow().len() as f64)),
        (Value::Str(s), "length") => Ok(Value::Number(s.chars().count() as f64)),
        (Value::Object(members), _) => Ok(members
            .borrow()
            .get(name)
            .cloned()
            .unwrap_or(Value::Undefined)),
        (Value::Undefined, _) => Err(ScriptError::Type(format!(
            "cannot read `{}` of undefined",
            name
        ))),
        (other, _) => Err(ScriptError::Unsupported(format!(
            "property `{}` of {}",
            name,
            other.type_name()
        ))),
    }
}

fn get_index(target: &Value, index: &Value) -> Result<Value> {
    match target {
        Value::Array(items) => {
            if let Value::Str(key) = index {
                return get_member(target, key);
            }
            Ok(to_index(index)
                .and_then(|i| items.borrow().get(i).cloned())
                .unwrap_or(Value::Undefined))
        }
        Value::Str(s) => {
            if let Value::Str(key) = index {
                return get_member(target, key);
            }
            Ok(to_index(index)
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::Str(c.to_string()))
                .unwrap_or(Value::Undefined))
        }
        Value::Object(_) => get_member(target, &index.to_js_string()),
        other => Err(ScriptError::Type(format!(
            "cannot index into {}",
            other.type_name()
        ))),
    }
}

fn set_index(target: &Value, index: &Value, value: Value) -> Result<()> {
    match target {
        Value::Array(items) => {
            let i = to_index(index).ok_or_else(|| {
                ScriptError::Type(format!("invalid array index {}", index.to_js_string()))
            })?;
            // Writes may replace an element or append one, never leave holes
            let mut items = items.borrow_mut();
            match i.cmp(&items.len()) {
                Ordering::Less => items[i] = value,
                Ordering::Equal => items.push(value),
                Ordering::Greater => {
                    return Err(ScriptError::Type(format!(
                        "array index {} is past the end (length {})",
                        i,
                        items.len()
                    )))
                }
            }
            Ok(())
        }
        Value::Object(members) => {
            members.borrow_mut().insert(index.to_js_string(), value);
            Ok(())
        }
        other => Err(ScriptError::Type(format!(
            "cannot assign an element of {}",
            other.type_name()
        ))),
    }
}

fn array_method(items: &Rc<RefCell<Vec<Value>>>, method: &str, args: &[Value]) -> Result<Value> {
    match method {
        "reverse" => {
            items.borrow_mut().reverse();
            Ok(Value::Array(Rc::clone(items)))
        }
        "splice" => {
            let mut items = items.borrow_mut();
            let len = items.len();
            let start = relative_index(args.first(), len, 0)?;
            let count = match args.get(1) {
                None => len - start,
                Some(value) => (to_number(value)?.max(0.0) as usize).min(len - start),
            };
            let inserted = args.get(2..).unwrap_or(&[]).iter().cloned();
            let removed: Vec<Value> = items.splice(start..start + count, inserted).collect();
            Ok(Value::array(removed))
        }
        "slice" => {
            let items = items.borrow();
            let len = items.len();
            let start = relative_index(args.first(), len, 0)?;
            let end = relative_index(args.get(1), len, len)?.max(start);
            Ok(Value::array(items[start..end].to_vec()))
        }
        "join" => {
            let separator = match args.first() {
                None | Some(Value::Undefined) => ",".to_string(),
                Some(value) => value.to_js_string(),
            };
            let joined = items
                .borrow()
                .iter()
                .map(|item| match item {
                    Value::Undefined => String::new(),
                    other => other.to_js_string(),
                })
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::Str(joined))
        }
        other => Err(ScriptError::Unsupported(format!("array method `{}`", other))),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value> {
    match method {
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Undefined) => vec![Value::from(s)],
                Some(Value::Str(separator)) if separator.is_empty() => {
                    s.chars().map(|c| Value::Str(c.to_string())).collect()
                }
                Some(Value::Str(separator)) => s.split(separator.as_str()).map(Value::from).collect(),
                Some(other) => {
                    return Err(ScriptError::Type(format!(
                        "cannot split on {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::array(parts))
        }
        "reverse" => Ok(Value::Str(s.chars().rev().collect())),
        "slice" => {
            let chars: Vec<char> = s.chars().collect();
            let start = relative_index(args.first(), chars.len(), 0)?;
            let end = relative_index(args.get(1), chars.len(), chars.len())?.max(start);
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        other => Err(ScriptError::Unsupported(format!("string method `{}`", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAYER_JS: &str = r#"
        var yt={};
        var Zr={wX:function(a){a.reverse()},
        Pq:function(a,b){a.splice(0,b)},
        kM:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
        function Xt(a){a=a.split("");Zr.kM(a,48);Zr.wX(a,25);Zr.Pq(a,3);Zr.kM(a,2);return a.join("")}
        yt.load=function(c){var d=c.sig||Xt(c.s);return d};
    "#;

    fn call_str(js: &str, name: &str, arg: &str) -> Result<String> {
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function(name)?;
        let value = function.call(vec![Value::from(arg)])?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    #[test]
    fn test_reverse_string_delegate() {
        let js = r#"a=function(b){return b.reverse()};var sig=function(s){return a(s)};x.sig||sig(y)"#;
        assert_eq!(call_str(js, "a", "xyz").unwrap(), "zyx");
        assert_eq!(call_str(js, "sig", "xyz").unwrap(), "zyx");
    }

    #[test]
    fn test_transform_object_cipher() {
        // split -> swap(0, 8) -> reverse -> splice(0, 3) -> swap(0, 2) -> join
        assert_eq!(call_str(PLAYER_JS, "Xt", "abcdefghij").unwrap(), "efgdcbi");
    }

    #[test]
    fn test_standalone_helper_functions() {
        let js = r#"
            function rv(a){a.reverse()}
            var sl=function(a,b){return a.slice(b)};
            function entry(a){a=a.split("");rv(a);a=sl(a,2);return a.join("")}
        "#;
        assert_eq!(call_str(js, "entry", "123456").unwrap(), "4321");
    }

    #[test]
    fn test_extract_function_params() {
        let interpreter = JsInterpreter::new(PLAYER_JS);
        let function = interpreter.extract_function("Xt").unwrap();
        assert_eq!(function.params(), &["a".to_string()]);
    }

    #[test]
    fn test_name_must_match_exactly() {
        let js = "var xXt=function(a){return a};";
        assert!(matches!(
            JsInterpreter::new(js).extract_function("Xt"),
            Err(ScriptError::FunctionNotFound(_))
        ));
    }

    #[test]
    fn test_function_not_found() {
        let interpreter = JsInterpreter::new(PLAYER_JS);
        let result = interpreter.extract_function("missing");
        assert!(matches!(result, Err(ScriptError::FunctionNotFound(name)) if name == "missing"));
    }

    #[test]
    fn test_dollar_in_name() {
        let js = "var $a=function(b){return b.split('').reverse().join('')};";
        assert_eq!(call_str(js, "$a", "abc").unwrap(), "cba");
    }

    #[test]
    fn test_unsupported_conditional() {
        let js = "function f(a){if(a){return a}}";
        assert!(matches!(
            JsInterpreter::new(js).extract_function("f"),
            Err(ScriptError::Unsupported(_))
        ));
    }

    #[test]
    fn test_unsupported_loop_and_operators() {
        for js in [
            "function f(a){for(var i=0;i<1;i++){}}",
            "function f(a){return a==1}",
            "function f(a){return a&&a}",
            "function f(a){a++}",
            "function f(a){return new Date}",
        ] {
            let interpreter = JsInterpreter::new(js);
            let result = interpreter.extract_function("f");
            assert!(
                matches!(result, Err(ScriptError::Unsupported(_))),
                "{} should be unsupported",
                js
            );
        }
    }

    #[test]
    fn test_unsupported_method() {
        let js = "function f(a){return a.split('').sort().join('')}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        assert!(matches!(
            function.call(vec![Value::from("ba")]),
            Err(ScriptError::Unsupported(_))
        ));
    }

    #[test]
    fn test_undefined_helper() {
        let js = "function f(a){return Nope.x(a)}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        assert!(matches!(
            function.call(vec![Value::from("a")]),
            Err(ScriptError::UndefinedReference(_))
        ));
    }

    #[test]
    fn test_assignment_to_global_rejected() {
        let js = "function f(a){g=a;return a}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        assert!(matches!(
            function.call(vec![Value::from("a")]),
            Err(ScriptError::Unsupported(_))
        ));
    }

    #[test]
    fn test_recursion_is_bounded() {
        let js = "function f(a){return f(a)}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        assert_eq!(
            function.call(vec![Value::from("a")]).unwrap_err(),
            ScriptError::TooDeep
        );
    }

    #[test]
    fn test_circular_helper_objects_rejected() {
        let js = "var A={x:B};var B={y:A};function f(a){return A.x}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        assert!(matches!(
            function.call(vec![Value::from("a")]),
            Err(ScriptError::Unsupported(message)) if message.contains("circular")
        ));
    }

    #[test]
    fn test_element_write_appends_but_never_skips() {
        let js = "function f(a){a[a.length]='z';a[0]='y';return a.join('')}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        let arg = Value::array(vec![Value::from("a"), Value::from("b")]);
        assert_eq!(function.call(vec![arg]).unwrap().as_str(), Some("ybz"));

        for js in [
            "function f(a){a[500000000]=1;return a}",
            "function f(a){a[100000000000000000000]=1;return a}",
        ] {
            let interpreter = JsInterpreter::new(js);
            let function = interpreter.extract_function("f").unwrap();
            let arg = Value::array(vec![Value::from("a")]);
            assert!(
                matches!(function.call(vec![arg]), Err(ScriptError::Type(_))),
                "{} should fail",
                js
            );
        }
    }

    #[test]
    fn test_braces_inside_strings_and_comments() {
        let js = "function f(a){/* { */ return a+\"}\"+'{'}";
        assert_eq!(call_str(js, "f", "x").unwrap(), "x}{");

        let js = "var H={c:function(a){return a+'}'}};function f(a){return H.c(a)}";
        assert_eq!(call_str(js, "f", "x").unwrap(), "x}");
    }

    #[test]
    fn test_exponent_literals() {
        assert_eq!(call_str("function f(a){return a+1e3}", "f", "n").unwrap(), "n1000");
        assert_eq!(call_str("function f(a){return a+2.5E-1}", "f", "n").unwrap(), "n0.25");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(2f64.powi(63)), "9223372036854775808");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_splice_returns_removed_and_mutates() {
        let js = "function f(a){var b=a.splice(1,2);return b.join('')+'|'+a.join('')}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        let arg = Value::array("abcde".chars().map(|c| Value::Str(c.to_string())).collect());
        let result = function.call(vec![arg]).unwrap();
        assert_eq!(result.as_str(), Some("bc|ade"));
    }

    #[test]
    fn test_negative_slice_and_arithmetic() {
        let js = "function f(a,b){var n=b*2-1;return a.slice(-n)}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        let result = function
            .call(vec![Value::from("abcdef"), Value::from(2.0)])
            .unwrap();
        assert_eq!(result.as_str(), Some("def"));
    }

    #[test]
    fn test_missing_arguments_are_undefined() {
        let js = "function f(a,b){return b}";
        let interpreter = JsInterpreter::new(js);
        let function = interpreter.extract_function("f").unwrap();
        assert!(matches!(
            function.call(vec![Value::from("a")]).unwrap(),
            Value::Undefined
        ));
    }

    #[test]
    fn test_comments_and_escapes() {
        let js = "function f(a){/* swap */ var s='\\x41'; // tail\n return s+a}";
        assert_eq!(call_str(js, "f", "b").unwrap(), "Ab");
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("a.b(0x1f,'x')===").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("a".into()),
                Token::Punct("."),
                Token::Ident("b".into()),
                Token::Punct("("),
                Token::Number(31.0),
                Token::Punct(","),
                Token::Str("x".into()),
                Token::Punct(")"),
                Token::Punct("==="),
                Token::Eof,
            ]
        );
    }
}
