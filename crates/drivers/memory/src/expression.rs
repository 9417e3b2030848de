//! A small expression language over JSON values.
//!
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := cmp ("&&" cmp)*
//! cmp     := add (("==" | "!=" | "<" | "<=" | ">" | ">=") add)?
//! add     := mul (("+" | "-") mul)*
//! mul     := unary (("*" | "/" | "%") unary)*
//! unary   := ("!" | "-") unary | postfix
//! postfix := primary ("." ident | "[" expr "]")*
//! primary := number | string | "true" | "false" | "null" | ident
//!          | "(" expr ")" | "[" (expr ("," expr)*)? "]"
//! ```
//!
//! Unknown variables are an error; missing fields and indices yield `null`.

use arbor_ports::{ExpressionEvaluator, PortsError};
use serde_json::{Map, Number, Value};

/// Stateless evaluator for the grammar above.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, bindings: &Map<String, Value>) -> Result<Value, PortsError> {
        let tokens = tokenize(expression).map_err(|msg| PortsError::expression(expression, msg))?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            bindings,
        };
        let value = parser
            .expr()
            .map_err(|msg| PortsError::expression(expression, msg))?;
        if parser.pos != parser.tokens.len() {
            return Err(PortsError::expression(
                expression,
                format!("unexpected {:?}", parser.tokens[parser.pos]),
            ));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Number),
    Str(String),
    Ident(String),
    Op(&'static str),
}

const OPERATORS: [&str; 20] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "(", ")", "[", "]",
    ".", ",",
];

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = if text.contains('.') {
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .ok_or_else(|| format!("bad number `{text}`"))?
            } else {
                text.parse::<i64>()
                    .map(Number::from)
                    .map_err(|_| format!("bad number `{text}`"))?
            };
            tokens.push(Token::Number(number));
        } else if c == '"' || c == '\'' {
            let quote = c;
            i += 1;
            let mut text = String::new();
            loop {
                let Some(&ch) = chars.get(i) else {
                    return Err("unterminated string".into());
                };
                i += 1;
                match ch {
                    '\\' => {
                        let escaped = chars.get(i).ok_or("unterminated escape")?;
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => *other,
                        });
                    }
                    ch if ch == quote => break,
                    ch => text.push(ch),
                }
            }
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(**op))
                .ok_or_else(|| format!("unexpected character `{c}`"))?;
            i += op.len();
            tokens.push(Token::Op(*op));
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    bindings: &'a Map<String, Value>,
}

type Eval = Result<Value, String>;

impl Parser<'_> {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn eat(&mut self, op: &str) -> bool {
        if self.peek_op() == Some(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> Result<(), String> {
        if self.eat(op) {
            Ok(())
        } else {
            Err(format!("expected `{op}`"))
        }
    }

    fn expr(&mut self) -> Eval {
        self.or()
    }

    fn or(&mut self) -> Eval {
        let mut left = self.and()?;
        while self.eat("||") {
            let right = self.and()?;
            left = Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Eval {
        let mut left = self.cmp()?;
        while self.eat("&&") {
            let right = self.cmp()?;
            left = Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn cmp(&mut self) -> Eval {
        let left = self.add()?;
        let Some(op) = self.peek_op() else {
            return Ok(left);
        };
        if !matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=") {
            return Ok(left);
        }
        self.pos += 1;
        let right = self.add()?;
        let result = match op {
            "==" => loosely_equal(&left, &right),
            "!=" => !loosely_equal(&left, &right),
            _ => {
                let ordering = compare(&left, &right)
                    .ok_or_else(|| format!("cannot compare {left} and {right}"))?;
                match op {
                    "<" => ordering.is_lt(),
                    "<=" => ordering.is_le(),
                    ">" => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }
            }
        };
        Ok(Value::Bool(result))
    }

    fn add(&mut self) -> Eval {
        let mut left = self.mul()?;
        loop {
            if self.eat("+") {
                let right = self.mul()?;
                left = match (&left, &right) {
                    (Value::String(a), b) => Value::String(format!("{a}{}", display(b))),
                    (a, Value::String(b)) => Value::String(format!("{}{b}", display(a))),
                    _ => arithmetic(&left, &right, "+")?,
                };
            } else if self.eat("-") {
                let right = self.mul()?;
                left = arithmetic(&left, &right, "-")?;
            } else {
                return Ok(left);
            }
        }
    }

    fn mul(&mut self) -> Eval {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek_op() {
                Some(op @ ("*" | "/" | "%")) => op,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = arithmetic(&left, &right, op)?;
        }
    }

    fn unary(&mut self) -> Eval {
        if self.eat("!") {
            let value = self.unary()?;
            return Ok(Value::Bool(!truthy(&value)));
        }
        if self.eat("-") {
            let value = self.unary()?;
            return arithmetic(&Value::from(0), &value, "-");
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Eval {
        let mut value = self.primary()?;
        loop {
            if self.eat(".") {
                let Some(Token::Ident(field)) = self.tokens.get(self.pos).cloned() else {
                    return Err("expected field name after `.`".into());
                };
                self.pos += 1;
                value = value.get(&field).cloned().unwrap_or(Value::Null);
            } else if self.eat("[") {
                let index = self.expr()?;
                self.expect("]")?;
                value = match (&value, &index) {
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize).cloned())
                        .unwrap_or(Value::Null),
                    (Value::Object(map), Value::String(key)) => {
                        map.get(key).cloned().unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                };
            } else {
                return Ok(value);
            }
        }
    }

    fn primary(&mut self) -> Eval {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or("unexpected end of expression")?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Value::Number(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => self
                    .bindings
                    .get(&name)
                    .cloned()
                    .ok_or_else(|| format!("undefined variable `{name}`")),
            },
            Token::Op("(") => {
                let value = self.expr()?;
                self.expect(")")?;
                Ok(value)
            }
            Token::Op("[") => {
                let mut items = Vec::new();
                if !self.eat("]") {
                    loop {
                        items.push(self.expr()?);
                        if self.eat("]") {
                            break;
                        }
                        self.expect(",")?;
                    }
                }
                Ok(Value::Array(items))
            }
            Token::Op(op) => Err(format!("unexpected `{op}`")),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn arithmetic(a: &Value, b: &Value, op: &str) -> Eval {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Err(format!("`{op}` needs numbers, got {a} and {b}"));
    };
    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        let result = match op {
            "+" => x.checked_add(y),
            "-" => x.checked_sub(y),
            "*" => x.checked_mul(y),
            "/" if y == 0 => return Err("division by zero".into()),
            "/" if x.checked_rem(y) == Some(0) => x.checked_div(y),
            "/" => return Ok(float(x as f64 / y as f64)),
            "%" if y == 0 => return Err("division by zero".into()),
            _ => x.checked_rem(y),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| "integer overflow".to_owned());
    }
    let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
    Ok(float(match op {
        "+" => x + y,
        "-" => x - y,
        "*" => x * y,
        "/" => x / y,
        _ => x % y,
    }))
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}
