//! Built-in expression functions

use super::{compare, is_truthy, to_display_string, values_equal, Expr, ExpressionError};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Functions known to the expression language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    And,
    Or,
    Not,
    Xor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    ContainsValue,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Format,
    Join,
    Split,
    Replace,
    Lower,
    Upper,
    Trim,
    Length,
    Coalesce,
    Iif,
    ConvertToJson,
    // Runtime-only; parsed so conditions can be checked, never evaluated here
    Counter,
    Always,
    Canceled,
    Failed,
    Succeeded,
    SucceededOrFailed,
}

const MANY: usize = usize::MAX;

const FUNCTIONS: &[(&str, Function, usize, usize)] = &[
    ("and", Function::And, 2, MANY),
    ("or", Function::Or, 2, MANY),
    ("not", Function::Not, 1, 1),
    ("xor", Function::Xor, 2, 2),
    ("eq", Function::Eq, 2, 2),
    ("ne", Function::Ne, 2, 2),
    ("lt", Function::Lt, 2, 2),
    ("le", Function::Le, 2, 2),
    ("gt", Function::Gt, 2, 2),
    ("ge", Function::Ge, 2, 2),
    ("contains", Function::Contains, 2, 2),
    ("containsValue", Function::ContainsValue, 2, 2),
    ("startsWith", Function::StartsWith, 2, 2),
    ("endsWith", Function::EndsWith, 2, 2),
    ("in", Function::In, 1, MANY),
    ("notIn", Function::NotIn, 1, MANY),
    ("format", Function::Format, 1, MANY),
    ("join", Function::Join, 2, 2),
    ("split", Function::Split, 2, 2),
    ("replace", Function::Replace, 3, 3),
    ("lower", Function::Lower, 1, 1),
    ("upper", Function::Upper, 1, 1),
    ("trim", Function::Trim, 1, 1),
    ("length", Function::Length, 1, 1),
    ("coalesce", Function::Coalesce, 1, MANY),
    ("iif", Function::Iif, 3, 3),
    ("convertToJson", Function::ConvertToJson, 1, 1),
    ("counter", Function::Counter, 0, 2),
    ("always", Function::Always, 0, 0),
    ("canceled", Function::Canceled, 0, 0),
    ("failed", Function::Failed, 0, MANY),
    ("succeeded", Function::Succeeded, 0, MANY),
    ("succeededOrFailed", Function::SucceededOrFailed, 0, MANY),
];

impl Function {
    /// Find a function by name, ignoring case
    pub fn lookup(name: &str) -> Option<Function> {
        FUNCTIONS
            .iter()
            .find(|(n, ..)| n.eq_ignore_ascii_case(name))
            .map(|(_, f, ..)| *f)
    }

    pub fn name(self) -> &'static str {
        FUNCTIONS
            .iter()
            .find(|(_, f, ..)| *f == self)
            .map(|(n, ..)| *n)
            .unwrap_or("unknown")
    }

    /// Minimum and maximum argument counts
    pub fn arity(self) -> (usize, usize) {
        FUNCTIONS
            .iter()
            .find(|(_, f, ..)| *f == self)
            .map(|(_, _, min, max)| (*min, *max))
            .unwrap_or((0, MANY))
    }

    pub fn is_runtime_only(self) -> bool {
        matches!(
            self,
            Function::Counter
                | Function::Always
                | Function::Canceled
                | Function::Failed
                | Function::Succeeded
                | Function::SucceededOrFailed
        )
    }

    pub(crate) fn call(self, args: &[Expr], values: &Map<String, Value>) -> Result<Value, ExpressionError> {
        let arg = |i: usize| -> Result<Value, ExpressionError> {
            match args.get(i) {
                Some(expr) => expr.evaluate(values),
                None => Ok(Value::Null),
            }
        };

        match self {
            Function::And => {
                for expr in args {
                    if !is_truthy(&expr.evaluate(values)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Function::Or => {
                for expr in args {
                    if is_truthy(&expr.evaluate(values)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Function::Not => Ok(Value::Bool(!is_truthy(&arg(0)?))),
            Function::Xor => Ok(Value::Bool(is_truthy(&arg(0)?) != is_truthy(&arg(1)?))),
            Function::Eq => Ok(Value::Bool(values_equal(&arg(0)?, &arg(1)?))),
            Function::Ne => Ok(Value::Bool(!values_equal(&arg(0)?, &arg(1)?))),
            Function::Lt => Ok(Value::Bool(compare(&arg(0)?, &arg(1)?) == Some(Ordering::Less))),
            Function::Le => Ok(Value::Bool(matches!(
                compare(&arg(0)?, &arg(1)?),
                Some(Ordering::Less | Ordering::Equal)
            ))),
            Function::Gt => Ok(Value::Bool(compare(&arg(0)?, &arg(1)?) == Some(Ordering::Greater))),
            Function::Ge => Ok(Value::Bool(matches!(
                compare(&arg(0)?, &arg(1)?),
                Some(Ordering::Greater | Ordering::Equal)
            ))),
            Function::Contains => {
                let haystack = arg(0)?;
                let needle = arg(1)?;
                let found = match &haystack {
                    Value::Array(items) => items.iter().any(|item| values_equal(item, &needle)),
                    other => to_display_string(other)
                        .to_lowercase()
                        .contains(&to_display_string(&needle).to_lowercase()),
                };
                Ok(Value::Bool(found))
            }
            Function::ContainsValue => {
                let collection = arg(0)?;
                let needle = arg(1)?;
                let found = match &collection {
                    Value::Array(items) => items.iter().any(|item| values_equal(item, &needle)),
                    Value::Object(map) => map.values().any(|item| values_equal(item, &needle)),
                    _ => false,
                };
                Ok(Value::Bool(found))
            }
            Function::StartsWith => {
                let text = to_display_string(&arg(0)?).to_lowercase();
                let prefix = to_display_string(&arg(1)?).to_lowercase();
                Ok(Value::Bool(text.starts_with(&prefix)))
            }
            Function::EndsWith => {
                let text = to_display_string(&arg(0)?).to_lowercase();
                let suffix = to_display_string(&arg(1)?).to_lowercase();
                Ok(Value::Bool(text.ends_with(&suffix)))
            }
            Function::In | Function::NotIn => {
                let needle = arg(0)?;
                let mut found = false;
                for expr in &args[1..] {
                    if values_equal(&needle, &expr.evaluate(values)?) {
                        found = true;
                        break;
                    }
                }
                Ok(Value::Bool(if self == Function::In { found } else { !found }))
            }
            Function::Format => {
                let template = to_display_string(&arg(0)?);
                let rest = args[1..]
                    .iter()
                    .map(|e| e.evaluate(values))
                    .collect::<Result<Vec<_>, _>>()?;
                format_string(&template, &rest).map(Value::String)
            }
            Function::Join => {
                let separator = to_display_string(&arg(0)?);
                let joined = match arg(1)? {
                    Value::Array(items) => items
                        .iter()
                        .filter(|item| !item.is_array() && !item.is_object())
                        .map(to_display_string)
                        .collect::<Vec<_>>()
                        .join(&separator),
                    other => to_display_string(&other),
                };
                Ok(Value::String(joined))
            }
            Function::Split => {
                let text = to_display_string(&arg(0)?);
                let delimiter = to_display_string(&arg(1)?);
                if delimiter.is_empty() {
                    return Ok(Value::Array(vec![Value::String(text)]));
                }
                Ok(Value::Array(
                    text.split(delimiter.as_str())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                ))
            }
            Function::Replace => {
                let text = to_display_string(&arg(0)?);
                let old = to_display_string(&arg(1)?);
                let new = to_display_string(&arg(2)?);
                if old.is_empty() {
                    return Ok(Value::String(text));
                }
                Ok(Value::String(text.replace(&old, &new)))
            }
            Function::Lower => Ok(Value::String(to_display_string(&arg(0)?).to_lowercase())),
            Function::Upper => Ok(Value::String(to_display_string(&arg(0)?).to_uppercase())),
            Function::Trim => Ok(Value::String(to_display_string(&arg(0)?).trim().to_string())),
            Function::Length => {
                let length = match arg(0)? {
                    Value::Null => 0,
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    Value::Object(map) => map.len(),
                    other => {
                        return Err(ExpressionError::Invalid(format!(
                            "length() does not accept {}",
                            to_display_string(&other)
                        )))
                    }
                };
                Ok(Value::from(length as i64))
            }
            Function::Coalesce => {
                for expr in args {
                    let value = expr.evaluate(values)?;
                    let empty = match &value {
                        Value::Null => true,
                        Value::String(s) => s.is_empty(),
                        _ => false,
                    };
                    if !empty {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            Function::Iif => {
                if is_truthy(&arg(0)?) {
                    arg(1)
                } else {
                    arg(2)
                }
            }
            Function::ConvertToJson => serde_json::to_string_pretty(&arg(0)?)
                .map(Value::String)
                .map_err(|e| ExpressionError::Invalid(e.to_string())),
            Function::Counter
            | Function::Always
            | Function::Canceled
            | Function::Failed
            | Function::Succeeded
            | Function::SucceededOrFailed => Err(ExpressionError::RuntimeOnly(self.name().to_string())),
        }
    }
}

/// Expand `{N}` placeholders; `{{` and `}}` are literal braces
pub fn format_string(template: &str, args: &[Value]) -> Result<String, ExpressionError> {
    let invalid = || ExpressionError::InvalidFormat(template.to_string());
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '{' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(invalid()),
                    }
                }
                let index: usize = digits.parse().map_err(|_| invalid())?;
                let value = args.get(index).ok_or_else(invalid)?;
                out.push_str(&to_display_string(value));
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(invalid()),
            other => out.push(other),
        }
    }

    Ok(out)
}
