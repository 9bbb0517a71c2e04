//! Template expression language
//!
//! Expressions are the bodies of `${{ }}` blocks. They are parsed once into an
//! [`Expr`] tree and evaluated against a JSON object whose top-level keys are
//! the named values in scope (`parameters`, `variables`, loop variables).

mod functions;
mod lexer;
mod parser;

pub use functions::Function;
pub use parser::parse;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("Unexpected symbol '{symbol}' at position {position} in expression: {expression}")]
    UnexpectedSymbol {
        symbol: String,
        position: usize,
        expression: String,
    },

    #[error("Unexpected end of expression: {0}")]
    UnexpectedEnd(String),

    #[error("Unrecognized function: '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' expects {expected} argument(s), found {found}")]
    ArgumentCount {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("Unrecognized named-value: '{0}'")]
    UnknownNamedValue(String),

    #[error("Operators are not allowed in this expression: {0}")]
    OperatorsDisabled(String),

    #[error("Function '{0}' is only available at runtime")]
    RuntimeOnly(String),

    #[error("Invalid format string '{0}'")]
    InvalidFormat(String),

    #[error("{0}")]
    Invalid(String),
}

/// Feature switches for the template expression syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionFlags {
    /// Allow `elseif`, `else` and `each` directives in addition to `if` and `insert`
    pub extended_directives: bool,

    /// Allow infix operators (`==`, `&&`, `!` ...) alongside function calls
    pub allow_operators: bool,
}

impl Default for ExpressionFlags {
    fn default() -> Self {
        Self {
            extended_directives: true,
            allow_operators: true,
        }
    }
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    NamedValue(String),
    Index { target: Box<Expr>, index: Box<Expr> },
    Call { function: Function, args: Vec<Expr> },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate against the named values in scope
    pub fn evaluate(&self, values: &Map<String, Value>) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::NamedValue(name) => lookup_key(values, name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnknownNamedValue(name.clone())),
            Expr::Index { target, index } => {
                let target = target.evaluate(values)?;
                let index = index.evaluate(values)?;
                Ok(index_value(&target, &index))
            }
            Expr::Call { function, args } => function.call(args, values),
            Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&inner.evaluate(values)?))),
            Expr::Binary { op, left, right } => {
                let left = left.evaluate(values)?;
                match op {
                    BinaryOp::And => {
                        if !is_truthy(&left) {
                            return Ok(Value::Bool(false));
                        }
                        Ok(Value::Bool(is_truthy(&right.evaluate(values)?)))
                    }
                    BinaryOp::Or => {
                        if is_truthy(&left) {
                            return Ok(Value::Bool(true));
                        }
                        Ok(Value::Bool(is_truthy(&right.evaluate(values)?)))
                    }
                    BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right.evaluate(values)?))),
                    BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right.evaluate(values)?))),
                    BinaryOp::Lt => Ok(Value::Bool(
                        compare(&left, &right.evaluate(values)?) == Some(Ordering::Less),
                    )),
                    BinaryOp::Le => Ok(Value::Bool(matches!(
                        compare(&left, &right.evaluate(values)?),
                        Some(Ordering::Less | Ordering::Equal)
                    ))),
                    BinaryOp::Gt => Ok(Value::Bool(
                        compare(&left, &right.evaluate(values)?) == Some(Ordering::Greater),
                    )),
                    BinaryOp::Ge => Ok(Value::Bool(matches!(
                        compare(&left, &right.evaluate(values)?),
                        Some(Ordering::Greater | Ordering::Equal)
                    ))),
                }
            }
        }
    }

    /// The literal string this expression consists of, if it is nothing else
    pub fn as_string_literal(&self) -> Option<&str> {
        match self {
            Expr::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Root named values referenced anywhere in the tree
    pub fn named_values(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_named_values(&mut names);
        names
    }

    fn collect_named_values<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::NamedValue(name) => names.push(name),
            Expr::Index { target, index } => {
                target.collect_named_values(names);
                index.collect_named_values(names);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_named_values(names)),
            Expr::Not(inner) => inner.collect_named_values(names),
            Expr::Binary { left, right, .. } => {
                left.collect_named_values(names);
                right.collect_named_values(names);
            }
        }
    }
}

/// Check that an expression only references the given named values
pub fn validate_named_values(expr: &Expr, allowed: &[&str]) -> Result<(), ExpressionError> {
    for name in expr.named_values() {
        if !allowed.iter().any(|a| a.eq_ignore_ascii_case(name)) {
            return Err(ExpressionError::UnknownNamedValue(name.to_string()));
        }
    }
    Ok(())
}

/// JSON number for an f64, keeping integral values integral
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Render a number the way expressions print it
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => parse_number(s).unwrap_or(f64::NAN),
        Value::Array(_) | Value::Object(_) => f64::NAN,
    }
}

/// Parse decimal or `0x` hexadecimal text; blank text is zero
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    if let Some(hex) = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    trimmed.parse::<f64>().ok()
}

/// String form of a value as used by `format`, `join` and string comparison
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_default(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Equality with the right operand coerced to the left operand's type
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match left {
        Value::Null => right.is_null(),
        Value::Bool(l) => *l == is_truthy(right),
        Value::Number(_) => {
            let (l, r) = (to_number(left), to_number(right));
            !l.is_nan() && l == r
        }
        Value::String(l) => l.to_lowercase() == to_display_string(right).to_lowercase(),
        Value::Array(_) | Value::Object(_) => left == right,
    }
}

/// Ordering with the right operand coerced to the left operand's type
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match left {
        Value::Null | Value::Number(_) => to_number(left).partial_cmp(&to_number(right)),
        Value::Bool(l) => Some(l.cmp(&is_truthy(right))),
        Value::String(l) => Some(
            l.to_lowercase()
                .cmp(&to_display_string(right).to_lowercase()),
        ),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Case-insensitive key lookup, preferring an exact match
pub fn lookup_key<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

fn index_value(target: &Value, index: &Value) -> Value {
    match target {
        Value::Object(map) => lookup_key(map, &to_display_string(index))
            .cloned()
            .unwrap_or(Value::Null),
        Value::Array(items) => {
            let n = to_number(index);
            if n.is_nan() || n < 0.0 || n.fract() != 0.0 {
                return Value::Null;
            }
            items.get(n as usize).cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}
