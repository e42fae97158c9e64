//! Condition language for step `if` guards.
//!
//! A small boolean language evaluated against a `WorkflowContext`:
//!
//! ```text
//! expr       := or
//! or         := and ( "||" and )*
//! and        := comparison ( "&&" comparison )*
//! comparison := unary ( ("==" | "!=" | "<" | "<=" | ">" | ">=") unary )?
//! unary      := "!" unary | primary
//! primary    := literal | reference | "exists" "(" reference ")" | "(" expr ")"
//! reference  := "steps" "." <id> "." "output" ( "." <segment> )*
//!             | "variables" "." <name> ( "." <segment> )*
//! literal    := string | number | "true" | "false" | "null"
//! ```
//!
//! # Absent values
//!
//! A reference that does not resolve (the step was skipped or failed, the
//! field is missing, the variable is undefined) evaluates to *absent*.
//! Every comparison with an absent operand is `false`, including `!=`.
//! `exists(ref)` is the only way to test for presence. In boolean position
//! absent is falsy.
//!
//! Truthiness of a bare operand: `false`, `null`, absent, `0` and `""` are
//! false; everything else (including arrays and objects) is true.
//!
//! Parsing happens at evaluation time; malformed expressions produce a
//! `ConditionError` carrying the character offset of the offending token.

use std::cmp::Ordering;

use serde_json::Value;
use stepgraph_types::workflow::StepFailure;

use super::context::WorkflowContext;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A malformed condition expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("condition syntax error at position {position} in '{expression}': {message}")]
pub struct ConditionError {
    pub expression: String,
    /// Character (not byte) offset into `expression`.
    pub position: usize,
    pub message: String,
}

impl ConditionError {
    /// Build an error at byte offset `at`, reported as a character offset.
    fn at_byte(expression: &str, at: usize, message: impl Into<String>) -> Self {
        let at = at.min(expression.len());
        Self {
            expression: expression.to_string(),
            position: expression[..at].chars().count(),
            message: message.into(),
        }
    }
}

impl From<ConditionError> for StepFailure {
    fn from(err: ConditionError) -> Self {
        StepFailure::ConditionSyntax {
            expression: err.expression,
            position: err.position,
            message: err.message,
        }
    }
}

// ---------------------------------------------------------------------------
// ConditionEvaluator
// ---------------------------------------------------------------------------

/// Stateless evaluator for step guards.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an optional guard. Missing or blank guards are always true.
    pub fn evaluate_guard(
        &self,
        condition: Option<&str>,
        ctx: &WorkflowContext,
    ) -> Result<bool, ConditionError> {
        match condition {
            Some(expr) if !expr.trim().is_empty() => self.evaluate(expr, ctx),
            _ => Ok(true),
        }
    }

    /// Parse and evaluate `expression` against `ctx`.
    pub fn evaluate(&self, expression: &str, ctx: &WorkflowContext) -> Result<bool, ConditionError> {
        let condition = Condition::parse(expression)?;
        Ok(condition.evaluate(ctx))
    }
}

// ---------------------------------------------------------------------------
// Condition (parsed form)
// ---------------------------------------------------------------------------

/// A parsed condition, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    root: Expr,
}

impl Condition {
    /// Parse `expression` without evaluating it.
    pub fn parse(expression: &str) -> Result<Self, ConditionError> {
        let tokens = Lexer::new(expression).tokenize()?;
        let mut parser = Parser {
            expression,
            tokens,
            pos: 0,
        };
        let root = parser.parse_or()?;
        let trailing = parser.peek();
        if trailing.kind != TokenKind::Eof {
            return Err(parser.error_at(trailing.pos, "unexpected token after expression"));
        }
        Ok(Self { root })
    }

    pub fn evaluate(&self, ctx: &WorkflowContext) -> bool {
        truthy(eval(&self.root, ctx).as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Reference(Vec<String>),
    Exists(Vec<String>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// `None` is the absent value.
fn eval(expr: &Expr, ctx: &WorkflowContext) -> Option<Value> {
    match expr {
        Expr::Literal(v) => Some(v.clone()),
        Expr::Reference(path) => {
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            ctx.lookup(&segments)
        }
        Expr::Exists(path) => {
            let segments: Vec<&str> = path.iter().map(String::as_str).collect();
            Some(Value::Bool(ctx.lookup(&segments).is_some()))
        }
        Expr::Not(inner) => Some(Value::Bool(!truthy(eval(inner, ctx).as_ref()))),
        Expr::And(lhs, rhs) => Some(Value::Bool(
            truthy(eval(lhs, ctx).as_ref()) && truthy(eval(rhs, ctx).as_ref()),
        )),
        Expr::Or(lhs, rhs) => Some(Value::Bool(
            truthy(eval(lhs, ctx).as_ref()) || truthy(eval(rhs, ctx).as_ref()),
        )),
        Expr::Compare(op, lhs, rhs) => {
            let result = match (eval(lhs, ctx), eval(rhs, ctx)) {
                (Some(l), Some(r)) => compare(*op, &l, &r),
                _ => false,
            };
            Some(Value::Bool(result))
        }
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(lhs, rhs),
        CompareOp::Ne => !values_equal(lhs, rhs),
        _ => {
            let ordering = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => {
                    a.as_f64().zip(b.as_f64()).and_then(|(a, b)| a.partial_cmp(&b))
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                CompareOp::Ge => ordering != Ordering::Less,
                CompareOp::Eq | CompareOp::Ne => unreachable!("handled above"),
            }
        }
    }
}

/// Numbers compare by value (`1 == 1.0`); everything else structurally.
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    LParen,
    RParen,
    Compare(CompareOp),
    And,
    Or,
    Not,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn error(&self, position: usize, message: impl Into<String>) -> ConditionError {
        ConditionError::at_byte(self.src, position, message)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ConditionError> {
        let mut tokens: Vec<Token> = Vec::new();
        loop {
            while self.peek_char().is_some_and(char::is_whitespace) {
                self.pos += self.peek_char().map_or(0, char::len_utf8);
            }
            let start = self.pos;
            let Some(c) = self.peek_char() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    pos: start,
                });
                return Ok(tokens);
            };

            // Path segments after a dot may be numeric (array index) or
            // contain dashes, so they are read as one identifier run.
            let after_dot = matches!(tokens.last(), Some(Token { kind: TokenKind::Dot, .. }));

            let kind = if after_dot && is_segment_char(c) {
                TokenKind::Ident(self.take_while(is_segment_char).to_string())
            } else if c.is_ascii_alphabetic() || c == '_' {
                TokenKind::Ident(self.take_while(is_segment_char).to_string())
            } else if c.is_ascii_digit()
                || (c == '-' && self.peek_second().is_some_and(|d| d.is_ascii_digit()))
            {
                self.lex_number(start)?
            } else if c == '"' || c == '\'' {
                self.lex_string(start, c)?
            } else {
                self.lex_operator(start, c)?
            };

            tokens.push(Token { kind, pos: start });
        }
    }

    fn take_while(&mut self, pred: fn(char) -> bool) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while self.peek_char().is_some_and(pred) {
            self.pos += self.peek_char().map_or(0, char::len_utf8);
        }
        &src[start..self.pos]
    }

    fn lex_number(&mut self, start: usize) -> Result<TokenKind, ConditionError> {
        if self.peek_char() == Some('-') {
            self.pos += 1;
        }
        self.take_while(|c| c.is_ascii_digit());
        if self.peek_char() == Some('.') && self.peek_second().is_some_and(|d| d.is_ascii_digit()) {
            self.pos += 1;
            self.take_while(|c| c.is_ascii_digit());
        }
        let text = &self.src[start..self.pos];
        let value: f64 = text
            .parse()
            .map_err(|_| self.error(start, format!("invalid number '{text}'")))?;
        if !value.is_finite() {
            return Err(self.error(start, format!("number out of range '{text}'")));
        }
        Ok(TokenKind::Num(value))
    }

    fn lex_string(&mut self, start: usize, quote: char) -> Result<TokenKind, ConditionError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            self.pos += c.len_utf8();
            if c == quote {
                return Ok(TokenKind::Str(out));
            }
            if c == '\\' {
                let escape_pos = self.pos - 1;
                let Some(escaped) = self.peek_char() else {
                    return Err(self.error(start, "unterminated string literal"));
                };
                self.pos += escaped.len_utf8();
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    other => {
                        return Err(self.error(escape_pos, format!("unknown escape '\\{other}'")));
                    }
                });
            } else {
                out.push(c);
            }
        }
    }

    fn lex_operator(&mut self, start: usize, c: char) -> Result<TokenKind, ConditionError> {
        let next = self.peek_second();
        let (kind, width) = match (c, next) {
            ('=', Some('=')) => (TokenKind::Compare(CompareOp::Eq), 2),
            ('!', Some('=')) => (TokenKind::Compare(CompareOp::Ne), 2),
            ('<', Some('=')) => (TokenKind::Compare(CompareOp::Le), 2),
            ('>', Some('=')) => (TokenKind::Compare(CompareOp::Ge), 2),
            ('&', Some('&')) => (TokenKind::And, 2),
            ('|', Some('|')) => (TokenKind::Or, 2),
            ('<', _) => (TokenKind::Compare(CompareOp::Lt), 1),
            ('>', _) => (TokenKind::Compare(CompareOp::Gt), 1),
            ('!', _) => (TokenKind::Not, 1),
            ('.', _) => (TokenKind::Dot, 1),
            ('(', _) => (TokenKind::LParen, 1),
            (')', _) => (TokenKind::RParen, 1),
            ('=', _) => return Err(self.error(start, "unexpected '=' (use '==' for equality)")),
            ('&', _) => return Err(self.error(start, "unexpected '&' (use '&&')")),
            ('|', _) => return Err(self.error(start, "unexpected '|' (use '||')")),
            (other, _) => return Err(self.error(start, format!("unexpected character '{other}'"))),
        };
        self.pos += width;
        Ok(kind)
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    expression: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Token {
        // The lexer always terminates the stream with Eof.
        self.tokens[self.pos.min(self.tokens.len() - 1)].clone()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_at(&self, position: usize, message: impl Into<String>) -> ConditionError {
        ConditionError::at_byte(self.expression, position, message)
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek().kind == TokenKind::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_comparison()?;
        while self.peek().kind == TokenKind::And {
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConditionError> {
        let lhs = self.parse_unary()?;
        let TokenKind::Compare(op) = self.peek().kind else {
            return Ok(lhs);
        };
        self.advance();
        let rhs = self.parse_unary()?;

        let next = self.peek();
        if matches!(next.kind, TokenKind::Compare(_)) {
            return Err(self.error_at(
                next.pos,
                "chained comparison (wrap one side in parentheses)",
            ));
        }
        Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)))
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek().kind == TokenKind::Not {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Num(n) => Ok(Expr::Literal(number_value(n))),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                let close = self.advance();
                if close.kind != TokenKind::RParen {
                    return Err(self.error_at(close.pos, "expected ')'"));
                }
                Ok(inner)
            }
            TokenKind::Ident(ident) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "exists" => {
                    let open = self.advance();
                    if open.kind != TokenKind::LParen {
                        return Err(self.error_at(open.pos, "expected '(' after 'exists'"));
                    }
                    let root = self.advance();
                    let TokenKind::Ident(root_name) = root.kind else {
                        return Err(self.error_at(root.pos, "expected a reference inside exists()"));
                    };
                    let path = self.parse_reference(root_name, root.pos)?;
                    let close = self.advance();
                    if close.kind != TokenKind::RParen {
                        return Err(self.error_at(close.pos, "expected ')'"));
                    }
                    Ok(Expr::Exists(path))
                }
                _ => Ok(Expr::Reference(self.parse_reference(ident, token.pos)?)),
            },
            TokenKind::Eof => Err(self.error_at(token.pos, "unexpected end of expression")),
            _ => Err(self.error_at(token.pos, "expected a value or reference")),
        }
    }

    /// Parse the remainder of a reference whose first segment was `root`.
    fn parse_reference(&mut self, root: String, root_pos: usize) -> Result<Vec<String>, ConditionError> {
        let mut path = vec![root];
        while self.peek().kind == TokenKind::Dot {
            self.advance();
            let segment = self.advance();
            let TokenKind::Ident(name) = segment.kind else {
                return Err(self.error_at(segment.pos, "expected a name after '.'"));
            };
            path.push(name);
        }

        match path[0].as_str() {
            "steps" => {
                if path.len() < 3 {
                    return Err(self.error_at(root_pos, "expected 'steps.<id>.output'"));
                }
                if path[2] != "output" {
                    return Err(self.error_at(
                        root_pos,
                        format!("unsupported step field '{}' (only 'output')", path[2]),
                    ));
                }
            }
            "variables" => {
                if path.len() < 2 {
                    return Err(self.error_at(root_pos, "expected 'variables.<name>'"));
                }
            }
            other => {
                return Err(self.error_at(
                    root_pos,
                    format!("unknown identifier '{other}' (expected 'steps' or 'variables')"),
                ));
            }
        }
        Ok(path)
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use serde_json::json;

    fn ctx() -> WorkflowContext {
        let mut ctx = WorkflowContext::with_variables(BTreeMap::from([(
            "env".to_string(),
            json!("prod"),
        )]));
        let output = json!({
            "count": 3,
            "ratio": 0.5,
            "status": "ok",
            "ready": true,
            "empty": "",
            "nothing": null,
            "items": ["x", "y"],
            "nested": {"deep": {"flag": false}},
        });
        let Value::Object(map) = output else { unreachable!() };
        ctx.set_step_output("check", map);
        ctx
    }

    fn eval_ok(expr: &str) -> bool {
        ConditionEvaluator::new()
            .evaluate(expr, &ctx())
            .unwrap_or_else(|e| panic!("{expr}: {e}"))
    }

    fn eval_err(expr: &str) -> ConditionError {
        ConditionEvaluator::new()
            .evaluate(expr, &ctx())
            .expect_err(expr)
    }

    // -----------------------------------------------------------------------
    // Comparisons
    // -----------------------------------------------------------------------

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval_ok("steps.check.output.count == 3"));
        assert!(eval_ok("steps.check.output.count == 3.0"));
        assert!(eval_ok("steps.check.output.count != 4"));
        assert!(eval_ok("steps.check.output.count > 2"));
        assert!(eval_ok("steps.check.output.count >= 3"));
        assert!(eval_ok("steps.check.output.ratio < 1"));
        assert!(eval_ok("steps.check.output.ratio <= 0.5"));
        assert!(eval_ok("steps.check.output.count > -1"));
        assert!(!eval_ok("steps.check.output.count < 3"));
    }

    #[test]
    fn test_string_and_bool_comparisons() {
        assert!(eval_ok("steps.check.output.status == \"ok\""));
        assert!(eval_ok("steps.check.output.status == 'ok'"));
        assert!(eval_ok("steps.check.output.status < 'z'"));
        assert!(eval_ok("steps.check.output.ready == true"));
        assert!(eval_ok("steps.check.output.nested.deep.flag == false"));
        assert!(eval_ok("steps.check.output.nothing == null"));
        assert!(eval_ok("steps.check.output.items.1 == 'y'"));
        assert!(eval_ok("variables.env == 'prod'"));
    }

    #[test]
    fn test_mixed_types_never_order() {
        assert!(!eval_ok("steps.check.output.status > 1"));
        assert!(!eval_ok("steps.check.output.count == '3'"));
        assert!(eval_ok("steps.check.output.count != '3'"));
    }

    // -----------------------------------------------------------------------
    // Absent values
    // -----------------------------------------------------------------------

    #[test]
    fn test_absent_compares_false_with_every_operator() {
        for op in ["==", "!=", "<", "<=", ">", ">="] {
            let expr = format!("steps.skipped.output.value {op} 1");
            assert!(!eval_ok(&expr), "{expr}");
            let expr = format!("steps.check.output.missing {op} null");
            assert!(!eval_ok(&expr), "{expr}");
        }
    }

    #[test]
    fn test_exists_is_the_presence_check() {
        assert!(eval_ok("exists(steps.check.output.count)"));
        assert!(eval_ok("exists(steps.check.output.nothing)"));
        assert!(!eval_ok("exists(steps.skipped.output.value)"));
        assert!(eval_ok("!exists(steps.skipped.output)"));
        assert!(!eval_ok("exists(variables.undefined)"));
    }

    #[test]
    fn test_absent_is_falsy() {
        assert!(!eval_ok("steps.skipped.output.value"));
        assert!(eval_ok("!steps.skipped.output.value"));
    }

    // -----------------------------------------------------------------------
    // Logic
    // -----------------------------------------------------------------------

    #[test]
    fn test_boolean_operators_and_precedence() {
        assert!(eval_ok("steps.check.output.ready && steps.check.output.count == 3"));
        assert!(eval_ok("false || steps.check.output.ready"));
        assert!(!eval_ok("!steps.check.output.ready"));
        // && binds tighter than ||
        assert!(eval_ok("true || false && false"));
        assert!(!eval_ok("(true || false) && false"));
        assert!(eval_ok("!(steps.check.output.count > 5)"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!eval_ok("steps.check.output.empty"));
        assert!(!eval_ok("steps.check.output.nothing"));
        assert!(eval_ok("steps.check.output.items"));
        assert!(eval_ok("steps.check.output.count"));
        assert!(!eval_ok("0"));
        assert!(eval_ok("'text'"));
    }

    #[test]
    fn test_dashed_step_ids() {
        let mut ctx = WorkflowContext::new();
        let Value::Object(map) = json!({"n": 1}) else { unreachable!() };
        ctx.set_step_output("gather-news", map);
        assert!(
            ConditionEvaluator::new()
                .evaluate("steps.gather-news.output.n == 1", &ctx)
                .unwrap()
        );
    }

    #[test]
    fn test_blank_guard_is_true() {
        let evaluator = ConditionEvaluator::new();
        assert!(evaluator.evaluate_guard(None, &ctx()).unwrap());
        assert!(evaluator.evaluate_guard(Some("   "), &ctx()).unwrap());
        assert!(!evaluator.evaluate_guard(Some("false"), &ctx()).unwrap());
    }

    // -----------------------------------------------------------------------
    // Syntax errors
    // -----------------------------------------------------------------------

    #[test]
    fn test_syntax_error_positions() {
        let err = eval_err("steps.check.output.count ==");
        assert_eq!(err.position, 27);
        assert!(err.message.contains("unexpected end"));

        let err = eval_err("steps.check.output.count = 3");
        assert_eq!(err.position, 25);

        let err = eval_err("(true && false");
        assert_eq!(err.position, 14);
        assert!(err.message.contains("')'"));

        let err = eval_err("'open");
        assert_eq!(err.position, 0);
        assert!(err.message.contains("unterminated"));

        let err = eval_err("true false");
        assert_eq!(err.position, 5);
    }

    #[test]
    fn test_error_position_counts_characters() {
        let err = eval_err("'héllo' = 1");
        assert_eq!(err.position, 8);

        let err = eval_err("variables.name == '日本' &&");
        assert_eq!(err.position, 25);
        assert!(err.message.contains("unexpected end"));
    }

    #[test]
    fn test_invalid_references() {
        let err = eval_err("foo.bar == 1");
        assert_eq!(err.position, 0);
        assert!(err.message.contains("unknown identifier"));

        let err = eval_err("steps.check.status == 'ok'");
        assert!(err.message.contains("unsupported step field"));

        let err = eval_err("steps.check == 1");
        assert!(err.message.contains("steps.<id>.output"));

        let err = eval_err("steps.check.output. == 1");
        assert_eq!(err.position, 20);
    }

    #[test]
    fn test_chained_comparison_rejected() {
        let err = eval_err("1 < 2 < 3");
        assert_eq!(err.position, 6);
        assert!(err.message.contains("chained"));
    }

    #[test]
    fn test_error_converts_to_step_failure() {
        let err = eval_err("a &");
        let failure: StepFailure = err.into();
        match failure {
            StepFailure::ConditionSyntax {
                expression,
                position,
                ..
            } => {
                assert_eq!(expression, "a &");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }

    #[test]
    fn test_parse_once_evaluate_many() {
        let condition = Condition::parse("exists(steps.late.output)").unwrap();
        let mut ctx = WorkflowContext::new();
        assert!(!condition.evaluate(&ctx));
        ctx.set_step_output("late", serde_json::Map::new());
        assert!(condition.evaluate(&ctx));
    }
}
