//! Whole-tree expression evaluation

use super::schema::SchemaName;
use super::token::{ExpressionKind, ExpressionToken, Position, Token, TokenKind};
use super::TemplateContext;
use crate::expression::{is_truthy, lookup_key, Expr};
use serde_json::{json, Value};

/// State of an `if`/`elseif`/`else` chain among siblings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chain {
    Closed,
    Open { taken: bool },
}

/// Evaluate every expression in `token` and check the result against `schema`
///
/// Failures are recorded on `ctx` and replaced by nulls so that a single pass
/// reports as many problems as possible.
pub fn evaluate(
    ctx: &mut TemplateContext,
    schema: SchemaName,
    token: &Token,
    depth: usize,
    file_id: Option<usize>,
) -> Token {
    let result = evaluate_value(ctx, token, depth);
    schema.validate(ctx, &result, file_id);
    result
}

/// Evaluate a fragment that is not a document root
pub fn evaluate_fragment(ctx: &mut TemplateContext, token: &Token) -> Token {
    evaluate_value(ctx, token, 0)
}

fn evaluate_value(ctx: &mut TemplateContext, token: &Token, depth: usize) -> Token {
    if depth > ctx.max_depth {
        ctx.error(
            token.position,
            format!("Maximum object depth of {} exceeded", ctx.max_depth),
        );
        return Token::null().at(token.position);
    }

    match &token.kind {
        TokenKind::Mapping(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            evaluate_mapping(ctx, entries, depth + 1, &mut out);
            Token::mapping(out).at(token.position)
        }
        TokenKind::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            evaluate_sequence(ctx, items, depth + 1, &mut out);
            Token::sequence(out).at(token.position)
        }
        TokenKind::Expression(expression) => match &expression.kind {
            ExpressionKind::Value(expr) => evaluate_expression(ctx, expr, &expression.raw, token.position),
            _ => {
                ctx.error(
                    token.position,
                    format!("A template directive is not allowed here: {}", expression.raw),
                );
                Token::null().at(token.position)
            }
        },
        _ => token.clone(),
    }
}

fn evaluate_expression(ctx: &mut TemplateContext, expr: &Expr, raw: &str, position: Position) -> Token {
    match expr.evaluate(&ctx.values) {
        Ok(value) => {
            ctx.trace.verbose(&format!("Evaluating: {} => {}", raw, value));
            Token::from_json(&value, position)
        }
        Err(e) => {
            ctx.error(position, format!("{}: {}", raw, e));
            Token::null().at(position)
        }
    }
}

fn condition(ctx: &mut TemplateContext, expr: &Expr, raw: &str, position: Position) -> bool {
    match expr.evaluate(&ctx.values) {
        Ok(value) => {
            let taken = is_truthy(&value);
            ctx.trace.verbose(&format!("Evaluating: {} => {}", raw, taken));
            taken
        }
        Err(e) => {
            ctx.error(position, format!("{}: {}", raw, e));
            false
        }
    }
}

/// Values an `each` directive iterates; mappings yield `{key, value}` pairs
fn each_items(ctx: &mut TemplateContext, collection: &Expr, raw: &str, position: Position) -> Vec<Value> {
    match collection.evaluate(&ctx.values) {
        Ok(Value::Array(items)) => items,
        Ok(Value::Object(map)) => map
            .into_iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect(),
        Ok(Value::Null) => Vec::new(),
        Ok(other) => {
            ctx.error(
                position,
                format!("{}: each expects a sequence or mapping, found {}", raw, other),
            );
            Vec::new()
        }
        Err(e) => {
            ctx.error(position, format!("{}: {}", raw, e));
            Vec::new()
        }
    }
}

/// Run `body` once per item with `variable` bound, then unbind it
fn for_each_binding<F>(
    ctx: &mut TemplateContext,
    variable: &str,
    collection: &Expr,
    raw: &str,
    position: Position,
    mut body: F,
) where
    F: FnMut(&mut TemplateContext),
{
    if lookup_key(&ctx.values, variable).is_some() {
        ctx.error(
            position,
            format!("{}: '{}' is already defined", raw, variable),
        );
        return;
    }
    for item in each_items(ctx, collection, raw, position) {
        ctx.values.insert(variable.to_string(), item);
        body(ctx);
    }
    ctx.values.remove(variable);
}

/// Advance an `if` chain; returns whether the branch is taken
fn step_chain(
    ctx: &mut TemplateContext,
    chain: &mut Chain,
    directive: &ExpressionToken,
    position: Position,
) -> bool {
    match &directive.kind {
        ExpressionKind::If(expr) => {
            let taken = condition(ctx, expr, &directive.raw, position);
            *chain = Chain::Open { taken };
            taken
        }
        ExpressionKind::ElseIf(expr) => match *chain {
            Chain::Closed => {
                ctx.error(
                    position,
                    format!("{}: elseif must follow an if or elseif directive", directive.raw),
                );
                false
            }
            Chain::Open { taken: true } => false,
            Chain::Open { taken: false } => {
                let taken = condition(ctx, expr, &directive.raw, position);
                *chain = Chain::Open { taken };
                taken
            }
        },
        ExpressionKind::Else => {
            let taken = match *chain {
                Chain::Closed => {
                    ctx.error(
                        position,
                        format!("{}: else must follow an if or elseif directive", directive.raw),
                    );
                    false
                }
                Chain::Open { taken } => !taken,
            };
            *chain = Chain::Closed;
            taken
        }
        _ => {
            *chain = Chain::Closed;
            true
        }
    }
}

fn evaluate_mapping(
    ctx: &mut TemplateContext,
    entries: &[(Token, Token)],
    depth: usize,
    out: &mut Vec<(Token, Token)>,
) {
    let mut chain = Chain::Closed;

    for (key, value) in entries {
        let Some(expression) = key.as_expression() else {
            chain = Chain::Closed;
            let evaluated = evaluate_value(ctx, value, depth);
            push_entry(ctx, out, key.clone(), evaluated);
            continue;
        };

        match &expression.kind {
            ExpressionKind::Value(expr) => {
                chain = Chain::Closed;
                let evaluated_key = evaluate_expression(ctx, expr, &expression.raw, key.position);
                let Some(name) = evaluated_key.literal_text() else {
                    ctx.error(
                        key.position,
                        format!("{}: a mapping key must evaluate to a string", expression.raw),
                    );
                    continue;
                };
                let evaluated = evaluate_value(ctx, value, depth);
                push_entry(ctx, out, Token::string(name).at(key.position), evaluated);
            }
            ExpressionKind::Each { variable, collection } => {
                chain = Chain::Closed;
                for_each_binding(ctx, variable, collection, &expression.raw, key.position, |ctx| {
                    insert_mapping(ctx, value, depth, out)
                });
            }
            _ => {
                if step_chain(ctx, &mut chain, expression, key.position) {
                    insert_mapping(ctx, value, depth, out);
                }
            }
        }
    }
}

fn insert_mapping(ctx: &mut TemplateContext, value: &Token, depth: usize, out: &mut Vec<(Token, Token)>) {
    let evaluated = evaluate_value(ctx, value, depth);
    match evaluated.kind {
        TokenKind::Mapping(entries) => {
            for (k, v) in entries {
                push_entry(ctx, out, k, v);
            }
        }
        TokenKind::Null => {}
        _ => ctx.error(
            value.position,
            format!("Expected a mapping to insert, found a {}", evaluated.type_name()),
        ),
    }
}

fn push_entry(ctx: &mut TemplateContext, out: &mut Vec<(Token, Token)>, key: Token, value: Token) {
    if let Some(name) = key.as_str() {
        if out.iter().any(|(k, _)| k.as_str() == Some(name)) {
            ctx.error(key.position, format!("'{}' is already defined", name));
            return;
        }
    }
    out.push((key, value));
}

/// A sequence item of the form `- ${{ directive }}: value`
fn single_directive(item: &Token) -> Option<(&ExpressionToken, &Token, Position)> {
    let TokenKind::Mapping(entries) = &item.kind else {
        return None;
    };
    let [(key, value)] = entries.as_slice() else {
        return None;
    };
    let expression = key.as_expression()?;
    expression
        .is_directive()
        .then_some((expression, value, key.position))
}

fn evaluate_sequence(ctx: &mut TemplateContext, items: &[Token], depth: usize, out: &mut Vec<Token>) {
    let mut chain = Chain::Closed;

    for item in items {
        if let Some((directive, value, position)) = single_directive(item) {
            match &directive.kind {
                ExpressionKind::Each { variable, collection } => {
                    chain = Chain::Closed;
                    for_each_binding(ctx, variable, collection, &directive.raw, position, |ctx| {
                        splice_item(ctx, value, depth, out)
                    });
                }
                _ => {
                    if step_chain(ctx, &mut chain, directive, position) {
                        splice_item(ctx, value, depth, out);
                    }
                }
            }
            continue;
        }

        chain = Chain::Closed;
        match &item.kind {
            TokenKind::Expression(ExpressionToken {
                raw,
                kind: ExpressionKind::Value(expr),
            }) => {
                let evaluated = evaluate_expression(ctx, expr, raw, item.position);
                match evaluated.kind {
                    TokenKind::Sequence(values) => out.extend(values),
                    _ => out.push(evaluated),
                }
            }
            _ => out.push(evaluate_value(ctx, item, depth)),
        }
    }
}

/// Add the value selected by a sequence directive to `out`
fn splice_item(ctx: &mut TemplateContext, value: &Token, depth: usize, out: &mut Vec<Token>) {
    if let TokenKind::Sequence(items) = &value.kind {
        evaluate_sequence(ctx, items, depth + 1, out);
        return;
    }
    let evaluated = evaluate_value(ctx, value, depth);
    match evaluated.kind {
        TokenKind::Sequence(items) => out.extend(items),
        TokenKind::Null => {}
        TokenKind::Mapping(ref entries) if entries.is_empty() => {}
        _ => out.push(evaluated),
    }
}
