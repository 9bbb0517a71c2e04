//! Document tree produced by the template reader
//!
//! Every node carries a [`Position`] for diagnostics. Equality ignores
//! positions so that trees read from different files compare structurally.

use crate::expression::{format_number, number_value, Expr};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Source location of a token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub file_id: Option<usize>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Position {
    pub fn in_file(file_id: Option<usize>) -> Self {
        Self {
            file_id,
            line: None,
            column: None,
        }
    }
}

/// A structural problem with a specific token
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct TokenError {
    pub position: Position,
    pub message: String,
}

/// What an unresolved `${{ }}` block means
#[derive(Debug, Clone, PartialEq)]
pub enum ExpressionKind {
    /// Produces a value in place
    Value(Expr),
    If(Expr),
    ElseIf(Expr),
    Else,
    Each { variable: String, collection: Expr },
    Insert,
}

/// An unresolved expression together with its source text
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionToken {
    pub raw: String,
    pub kind: ExpressionKind,
}

impl ExpressionToken {
    pub fn is_directive(&self) -> bool {
        !matches!(self.kind, ExpressionKind::Value(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Mapping(Vec<(Token, Token)>),
    Sequence(Vec<Token>),
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
    Expression(ExpressionToken),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub position: Position,
    pub kind: TokenKind,
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// Shorthand for a string-keyed mapping entry
pub fn entry(key: &str, value: Token) -> (Token, Token) {
    (Token::string(key), value)
}

impl Token {
    pub fn new(kind: TokenKind) -> Self {
        Self {
            position: Position::default(),
            kind,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(TokenKind::String(value.into()))
    }

    pub fn number(value: f64) -> Self {
        Self::new(TokenKind::Number(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(TokenKind::Boolean(value))
    }

    pub fn null() -> Self {
        Self::new(TokenKind::Null)
    }

    pub fn mapping(entries: Vec<(Token, Token)>) -> Self {
        Self::new(TokenKind::Mapping(entries))
    }

    pub fn sequence(items: Vec<Token>) -> Self {
        Self::new(TokenKind::Sequence(items))
    }

    /// Same token, placed at `position`
    pub fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            TokenKind::Mapping(_) => "mapping",
            TokenKind::Sequence(_) => "sequence",
            TokenKind::String(_) => "string",
            TokenKind::Number(_) => "number",
            TokenKind::Boolean(_) => "boolean",
            TokenKind::Null => "null",
            TokenKind::Expression(_) => "expression",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, TokenKind::Null)
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::String(_) | TokenKind::Number(_) | TokenKind::Boolean(_) | TokenKind::Null
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_expression(&self) -> Option<&ExpressionToken> {
        match &self.kind {
            TokenKind::Expression(e) => Some(e),
            _ => None,
        }
    }

    /// Text of a literal scalar; `None` for collections and expressions
    pub fn literal_text(&self) -> Option<String> {
        match &self.kind {
            TokenKind::String(s) => Some(s.clone()),
            TokenKind::Number(n) => Some(format_number(*n)),
            TokenKind::Boolean(b) => Some(b.to_string()),
            TokenKind::Null => Some(String::new()),
            _ => None,
        }
    }

    pub fn error(&self, message: impl Into<String>) -> TokenError {
        TokenError {
            position: self.position,
            message: message.into(),
        }
    }

    fn expected(&self, expected: &str, what: &str) -> TokenError {
        self.error(format!(
            "Expected a {} for {}, found a {}",
            expected,
            what,
            self.type_name()
        ))
    }

    pub fn assert_mapping(&self, what: &str) -> Result<&[(Token, Token)], TokenError> {
        match &self.kind {
            TokenKind::Mapping(entries) => Ok(entries),
            _ => Err(self.expected("mapping", what)),
        }
    }

    pub fn assert_sequence(&self, what: &str) -> Result<&[Token], TokenError> {
        match &self.kind {
            TokenKind::Sequence(items) => Ok(items),
            _ => Err(self.expected("sequence", what)),
        }
    }

    pub fn assert_string(&self, what: &str) -> Result<&str, TokenError> {
        match &self.kind {
            TokenKind::String(s) => Ok(s),
            _ => Err(self.expected("string", what)),
        }
    }

    /// Any literal scalar, rendered as text
    pub fn assert_literal_string(&self, what: &str) -> Result<String, TokenError> {
        self.literal_text()
            .ok_or_else(|| self.expected("literal value", what))
    }

    /// Booleans, or the strings `true`/`false` in any case
    pub fn assert_boolean(&self, what: &str) -> Result<bool, TokenError> {
        match &self.kind {
            TokenKind::Boolean(b) => Ok(*b),
            TokenKind::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            TokenKind::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(self.error(format!(
                "Expected a boolean for {}, found '{}'",
                what,
                self.literal_text().unwrap_or_else(|| self.type_name().to_string())
            ))),
        }
    }

    /// Non-negative integer, from a number or numeric string
    pub fn assert_integer(&self, what: &str) -> Result<u32, TokenError> {
        let text = self.assert_literal_string(what)?;
        text.trim()
            .parse::<u32>()
            .map_err(|_| self.error(format!("Expected an integer for {}, found '{}'", what, text)))
    }

    /// A scalar or a sequence of scalars, as a list of strings
    pub fn assert_string_list(&self, what: &str) -> Result<Vec<String>, TokenError> {
        match &self.kind {
            TokenKind::Sequence(items) => items
                .iter()
                .map(|item| item.assert_literal_string(what))
                .collect(),
            _ => Ok(vec![self.assert_literal_string(what)?]),
        }
    }

    /// Look up a string-keyed mapping entry
    pub fn get(&self, key: &str) -> Option<&Token> {
        match &self.kind {
            TokenKind::Mapping(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Key of the first mapping entry
    pub fn first_key(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Mapping(entries) => entries.first().and_then(|(k, _)| k.as_str()),
            _ => None,
        }
    }

    pub fn contains_expressions(&self) -> bool {
        match &self.kind {
            TokenKind::Expression(_) => true,
            TokenKind::Mapping(entries) => entries
                .iter()
                .any(|(k, v)| k.contains_expressions() || v.contains_expressions()),
            TokenKind::Sequence(items) => items.iter().any(Token::contains_expressions),
            _ => false,
        }
    }

    /// Copy of this tree with every scalar turned into a string
    pub fn stringify_scalars(&self) -> Token {
        let kind = match &self.kind {
            TokenKind::Mapping(entries) => TokenKind::Mapping(
                entries
                    .iter()
                    .map(|(k, v)| (k.stringify_scalars(), v.stringify_scalars()))
                    .collect(),
            ),
            TokenKind::Sequence(items) => {
                TokenKind::Sequence(items.iter().map(Token::stringify_scalars).collect())
            }
            TokenKind::Expression(e) => TokenKind::Expression(e.clone()),
            _ => TokenKind::String(self.literal_text().unwrap_or_default()),
        };
        Token {
            position: self.position,
            kind,
        }
    }

    /// Value as seen by the expression evaluator
    pub fn to_json(&self) -> Value {
        match &self.kind {
            TokenKind::Mapping(entries) => {
                let mut map = serde_json::Map::new();
                for (k, v) in entries {
                    let key = k
                        .literal_text()
                        .unwrap_or_else(|| k.to_string());
                    map.insert(key, v.to_json());
                }
                Value::Object(map)
            }
            TokenKind::Sequence(items) => Value::Array(items.iter().map(Token::to_json).collect()),
            TokenKind::String(s) => Value::String(s.clone()),
            TokenKind::Number(n) => number_value(*n),
            TokenKind::Boolean(b) => Value::Bool(*b),
            TokenKind::Null => Value::Null,
            TokenKind::Expression(e) => Value::String(e.raw.clone()),
        }
    }

    /// Tree for an evaluated value, every node placed at `position`
    pub fn from_json(value: &Value, position: Position) -> Token {
        let kind = match value {
            Value::Null => TokenKind::Null,
            Value::Bool(b) => TokenKind::Boolean(*b),
            Value::Number(n) => TokenKind::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => TokenKind::String(s.clone()),
            Value::Array(items) => TokenKind::Sequence(
                items.iter().map(|item| Token::from_json(item, position)).collect(),
            ),
            Value::Object(map) => TokenKind::Mapping(
                map.iter()
                    .map(|(k, v)| (Token::string(k).at(position), Token::from_json(v, position)))
                    .collect(),
            ),
        };
        Token { position, kind }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Expression(e) => write!(f, "{}", e.raw),
            TokenKind::Mapping(_) | TokenKind::Sequence(_) => write!(f, "{}", self.to_json()),
            _ => write!(f, "{}", self.literal_text().unwrap_or_default()),
        }
    }
}

impl Serialize for Token {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.kind {
            TokenKind::Mapping(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(&k.to_string(), v)?;
                }
                map.end()
            }
            TokenKind::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            TokenKind::String(s) => serializer.serialize_str(s),
            TokenKind::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            TokenKind::Boolean(b) => serializer.serialize_bool(*b),
            TokenKind::Null => serializer.serialize_unit(),
            TokenKind::Expression(e) => serializer.serialize_str(&e.raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Token {
        Token::mapping(vec![
            entry("name", Token::string("build")),
            entry("count", Token::number(2.0)),
            entry("enabled", Token::boolean(true)),
            entry("tags", Token::sequence(vec![Token::string("a"), Token::null()])),
        ])
    }

    #[test]
    fn test_equality_ignores_position() {
        let a = Token::string("x").at(Position::in_file(Some(1)));
        let b = Token::string("x").at(Position::in_file(Some(7)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_conversion() {
        let json = sample().to_json();
        assert_eq!(
            json,
            json!({ "name": "build", "count": 2, "enabled": true, "tags": ["a", null] })
        );
        assert_eq!(Token::from_json(&json, Position::default()), sample());
    }

    #[test]
    fn test_assert_boolean_accepts_strings() {
        assert!(Token::string("TRUE").assert_boolean("enabled").unwrap());
        assert!(!Token::boolean(false).assert_boolean("enabled").unwrap());
        let err = Token::string("yes").assert_boolean("enabled").unwrap_err();
        assert_eq!(err.message, "Expected a boolean for enabled, found 'yes'");
    }

    #[test]
    fn test_assert_mapping_reports_type() {
        let err = Token::string("x").assert_mapping("job").unwrap_err();
        assert_eq!(err.message, "Expected a mapping for job, found a string");
    }

    #[test]
    fn test_stringify_scalars() {
        let stringified = sample().stringify_scalars();
        assert_eq!(stringified.get("count"), Some(&Token::string("2")));
        assert_eq!(stringified.get("enabled"), Some(&Token::string("true")));
    }

    #[test]
    fn test_serializes_as_plain_yaml() {
        let yaml = serde_yaml::to_string(&sample()).unwrap();
        assert!(yaml.contains("name: build"));
        assert!(yaml.contains("count: 2"));
    }

    #[test]
    fn test_string_list_accepts_scalar() {
        assert_eq!(
            Token::string("a").assert_string_list("dependsOn").unwrap(),
            vec!["a".to_string()]
        );
        let seq = Token::sequence(vec![Token::string("a"), Token::string("b")]);
        assert_eq!(seq.assert_string_list("dependsOn").unwrap().len(), 2);
    }
}
