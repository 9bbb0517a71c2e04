//! YAML to token tree conversion

use super::schema::SchemaName;
use super::token::{ExpressionKind, ExpressionToken, Position, Token, TokenKind};
use super::TemplateContext;
use crate::error::Result;
use crate::expression::{self, Expr, Function};
use serde_json::Value;
use serde_yaml::Value as YamlValue;

/// Parse `content` into a token tree for a document of kind `schema`
///
/// Problems with individual expressions are recorded on `ctx`; only YAML
/// syntax errors fail the call.
pub fn read(
    ctx: &mut TemplateContext,
    schema: SchemaName,
    content: &str,
    file_id: Option<usize>,
) -> Result<Token> {
    let position = Position::in_file(file_id);
    let document: YamlValue = if content.trim().is_empty() {
        YamlValue::Null
    } else {
        serde_yaml::from_str(content)?
    };

    let token = convert(ctx, &document, position, false);
    if !matches!(token.kind, TokenKind::Mapping(_)) {
        ctx.error(position, format!("A {} document must be a mapping", schema));
    }
    Ok(token)
}

fn convert(ctx: &mut TemplateContext, value: &YamlValue, position: Position, is_key: bool) -> Token {
    let kind = match value {
        YamlValue::Null if is_key => TokenKind::String("null".to_string()),
        YamlValue::Null => TokenKind::Null,
        YamlValue::Bool(b) if is_key => TokenKind::String(b.to_string()),
        YamlValue::Bool(b) => TokenKind::Boolean(*b),
        YamlValue::Number(n) if is_key => TokenKind::String(n.to_string()),
        YamlValue::Number(n) => TokenKind::Number(n.as_f64().unwrap_or(0.0)),
        YamlValue::String(s) => return parse_scalar(ctx, s, position, is_key),
        YamlValue::Sequence(items) => TokenKind::Sequence(
            items
                .iter()
                .map(|item| convert(ctx, item, position, false))
                .collect(),
        ),
        YamlValue::Mapping(map) => TokenKind::Mapping(
            map.iter()
                .map(|(k, v)| (convert(ctx, k, position, true), convert(ctx, v, position, false)))
                .collect(),
        ),
        YamlValue::Tagged(tagged) => return convert(ctx, &tagged.value, position, is_key),
    };
    Token { position, kind }
}

enum Segment<'a> {
    Literal(&'a str),
    Expression(&'a str),
}

/// Split text around `${{ }}` blocks; `None` when there are none
fn split_segments(text: &str) -> Option<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = text;

    loop {
        let Some(start) = rest.find("${{") else {
            if !rest.is_empty() {
                segments.push(Segment::Literal(rest));
            }
            break;
        };
        let after = &rest[start + 3..];
        let Some(end) = find_close(after) else {
            segments.push(Segment::Literal(rest));
            break;
        };
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        segments.push(Segment::Expression(&after[..end]));
        rest = &after[end + 2..];
    }

    if segments.iter().any(|s| matches!(s, Segment::Expression(_))) {
        Some(segments)
    } else {
        None
    }
}

/// Offset of the `}}` closing an expression, skipping quoted strings
fn find_close(text: &str) -> Option<usize> {
    let mut in_string = false;
    for (index, c) in text.char_indices() {
        if c == '\'' {
            in_string = !in_string;
        } else if !in_string && text[index..].starts_with("}}") {
            return Some(index);
        }
    }
    None
}

/// Directive keyword and its argument text, if `body` starts with one
fn directive_keyword(body: &str) -> Option<(&str, &str)> {
    let (word, rest) = match body.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (body, ""),
    };
    match word {
        "if" | "elseif" | "each" if !rest.is_empty() => Some((word, rest)),
        "else" | "insert" if rest.is_empty() => Some((word, rest)),
        _ => None,
    }
}

fn parse_scalar(ctx: &mut TemplateContext, text: &str, position: Position, is_key: bool) -> Token {
    let literal = Token::string(text).at(position);
    let Some(segments) = split_segments(text) else {
        return literal;
    };

    if let [Segment::Expression(body)] = segments.as_slice() {
        let body = body.trim();
        if let Some((keyword, argument)) = directive_keyword(body) {
            return match parse_directive(ctx, keyword, argument, position, is_key) {
                Some(kind) => expression_token(text, kind, position),
                None => literal,
            };
        }
        return match parse_expression(ctx, body, text, position) {
            Some(expr) => match expr.as_string_literal() {
                Some(s) => Token::string(s).at(position),
                None => expression_token(text, ExpressionKind::Value(expr), position),
            },
            None => literal,
        };
    }

    let mut format = String::new();
    let mut plain = String::new();
    let mut args: Vec<Expr> = Vec::new();

    for segment in &segments {
        match segment {
            Segment::Literal(t) => {
                format.push_str(&escape_braces(t));
                plain.push_str(t);
            }
            Segment::Expression(body) => {
                let body = body.trim();
                if let Some((keyword, _)) = directive_keyword(body) {
                    ctx.error(
                        position,
                        format!(
                            "The directive '{}' is not allowed inside a string: {}. Directives must be the entire value",
                            keyword, text
                        ),
                    );
                    return literal;
                }
                let Some(expr) = parse_expression(ctx, body, text, position) else {
                    return literal;
                };
                match expr.as_string_literal() {
                    Some(s) => {
                        format.push_str(&escape_braces(s));
                        plain.push_str(s);
                    }
                    None => {
                        format.push_str(&format!("{{{}}}", args.len()));
                        args.push(expr);
                    }
                }
            }
        }
    }

    if args.is_empty() {
        return Token::string(plain).at(position);
    }

    let mut call_args = vec![Expr::Literal(Value::String(format))];
    call_args.extend(args);
    let expr = Expr::Call {
        function: Function::Format,
        args: call_args,
    };
    expression_token(text, ExpressionKind::Value(expr), position)
}

fn parse_directive(
    ctx: &mut TemplateContext,
    keyword: &str,
    argument: &str,
    position: Position,
    is_key: bool,
) -> Option<ExpressionKind> {
    if !is_key {
        ctx.error(
            position,
            format!("The directive '{}' is only allowed as a mapping key", keyword),
        );
        return None;
    }
    if matches!(keyword, "elseif" | "else" | "each") && !ctx.flags.extended_directives {
        ctx.error(position, format!("The directive '{}' is not enabled", keyword));
        return None;
    }

    let source = format!("${{{{ {} {} }}}}", keyword, argument);
    match keyword {
        "if" => parse_expression(ctx, argument, &source, position).map(ExpressionKind::If),
        "elseif" => parse_expression(ctx, argument, &source, position).map(ExpressionKind::ElseIf),
        "else" => Some(ExpressionKind::Else),
        "insert" => Some(ExpressionKind::Insert),
        _ => {
            let Some((variable, collection)) = argument.split_once(" in ") else {
                ctx.error(
                    position,
                    format!("Expected 'each <name> in <expression>', found '{}'", argument),
                );
                return None;
            };
            let variable = variable.trim();
            let valid = variable
                .chars()
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false)
                && variable.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
            if !valid {
                ctx.error(position, format!("Invalid each variable name '{}'", variable));
                return None;
            }
            parse_expression(ctx, collection.trim(), &source, position).map(|collection| {
                ExpressionKind::Each {
                    variable: variable.to_string(),
                    collection,
                }
            })
        }
    }
}

fn parse_expression(
    ctx: &mut TemplateContext,
    body: &str,
    source: &str,
    position: Position,
) -> Option<Expr> {
    match expression::parse(body, ctx.flags) {
        Ok(expr) => Some(expr),
        Err(e) => {
            ctx.error(position, format!("{}: {}", source, e));
            None
        }
    }
}

fn expression_token(raw: &str, kind: ExpressionKind, position: Position) -> Token {
    Token {
        position,
        kind: TokenKind::Expression(ExpressionToken {
            raw: raw.to_string(),
            kind,
        }),
    }
}

fn escape_braces(text: &str) -> String {
    text.replace('{', "{{").replace('}', "}}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Context;
    use crate::providers::InMemoryFileProvider;
    use std::sync::Arc;

    fn template_context() -> TemplateContext {
        TemplateContext::new(&Context::new(Arc::new(InMemoryFileProvider::new())))
    }

    fn read_str(ctx: &mut TemplateContext, yaml: &str) -> Token {
        read(ctx, SchemaName::PipelineRoot, yaml, Some(0)).unwrap()
    }

    #[test]
    fn test_plain_scalars() {
        let mut ctx = template_context();
        let token = read_str(&mut ctx, "name: build\ncount: 3\nflag: true\nnothing: ~\n");
        assert_eq!(token.get("name"), Some(&Token::string("build")));
        assert_eq!(token.get("count"), Some(&Token::number(3.0)));
        assert_eq!(token.get("flag"), Some(&Token::boolean(true)));
        assert_eq!(token.get("nothing"), Some(&Token::null()));
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn test_single_expression_value() {
        let mut ctx = template_context();
        let token = read_str(&mut ctx, "env: ${{ parameters.env }}\n");
        let expr = token.get("env").and_then(Token::as_expression).unwrap();
        assert!(matches!(expr.kind, ExpressionKind::Value(Expr::Index { .. })));
        assert_eq!(expr.raw, "${{ parameters.env }}");
    }

    #[test]
    fn test_embedded_expressions_become_format() {
        let mut ctx = template_context();
        let token = read_str(&mut ctx, "region: \"${{ parameters.env }}-east {x}\"\n");
        let expr = token.get("region").and_then(Token::as_expression).unwrap();
        match &expr.kind {
            ExpressionKind::Value(Expr::Call { function, args }) => {
                assert_eq!(*function, Function::Format);
                assert_eq!(args[0], Expr::Literal(Value::String("{0}-east {{x}}".to_string())));
            }
            other => panic!("expected format call, got {:?}", other),
        }
    }

    #[test]
    fn test_string_literal_expression_collapses() {
        let mut ctx = template_context();
        let token = read_str(&mut ctx, "a: ${{ 'text' }}\nb: pre-${{ 'mid' }}-post\n");
        assert_eq!(token.get("a"), Some(&Token::string("text")));
        assert_eq!(token.get("b"), Some(&Token::string("pre-mid-post")));
    }

    #[test]
    fn test_directive_keys() {
        let mut ctx = template_context();
        let yaml = r#"
${{ if eq(parameters.env, 'prod') }}:
  a: 1
${{ elseif true }}:
  a: 2
${{ else }}:
  a: 3
${{ each item in parameters.list }}:
  ${{ item }}: x
${{ insert }}: ${{ parameters.extra }}
"#;
        let token = read_str(&mut ctx, yaml);
        let keys: Vec<&ExpressionKind> = token
            .assert_mapping("root")
            .unwrap()
            .iter()
            .map(|(k, _)| &k.as_expression().unwrap().kind)
            .collect();
        assert!(matches!(keys[0], ExpressionKind::If(_)));
        assert!(matches!(keys[1], ExpressionKind::ElseIf(_)));
        assert!(matches!(keys[2], ExpressionKind::Else));
        assert!(matches!(keys[3], ExpressionKind::Each { variable, .. } if variable == "item"));
        assert!(matches!(keys[4], ExpressionKind::Insert));
        assert!(ctx.errors.is_empty());
    }

    #[test]
    fn test_directive_as_value_is_an_error() {
        let mut ctx = template_context();
        read_str(&mut ctx, "a: ${{ if true }}\n");
        assert_eq!(ctx.errors.len(), 1);
    }

    #[test]
    fn test_embedded_directive_is_an_error() {
        let mut ctx = template_context();
        read_str(&mut ctx, "a: x ${{ else }}\n");
        assert_eq!(ctx.errors.len(), 1);
    }

    #[test]
    fn test_extended_directives_can_be_disabled() {
        let mut ctx = template_context();
        ctx.flags.extended_directives = false;
        read_str(&mut ctx, "${{ if true }}:\n  a: 1\n${{ else }}:\n  a: 2\n");
        assert_eq!(ctx.errors.len(), 1);
    }

    #[test]
    fn test_invalid_expression_is_recorded() {
        let mut ctx = template_context();
        read_str(&mut ctx, "a: ${{ eq(1 }}\n");
        assert_eq!(ctx.errors.len(), 1);
    }

    #[test]
    fn test_root_must_be_mapping() {
        let mut ctx = template_context();
        read(&mut ctx, SchemaName::StepTemplateRoot, "- a\n- b\n", None).unwrap();
        assert_eq!(ctx.errors.len(), 1);
    }

    #[test]
    fn test_numeric_keys_become_strings() {
        let mut ctx = template_context();
        let token = read_str(&mut ctx, "1: one\n");
        assert_eq!(token.get("1"), Some(&Token::string("one")));
    }
}
