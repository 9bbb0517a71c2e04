//! Variable declarations and their resolution

use super::context::Context;
use crate::error::{ResolveError, Result};
use crate::template::{
    entry, evaluate_fragment, read_template, wrap_include_error, ExpressionKind, SchemaName,
    TemplateContext, TemplateReference, Token, TokenKind,
};
use async_recursion::async_recursion;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::warn;

const GROUP_PREFIX: &str = "group:";

/// A declared variable, or the marker for a variable group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VariableValue {
    pub value: String,
    pub is_readonly: bool,
    pub is_group: bool,
    pub is_group_member: bool,
}

impl VariableValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn readonly(value: impl Into<String>) -> Self {
        Self {
            is_readonly: true,
            ..Self::new(value)
        }
    }

    fn group_member(value: impl Into<String>) -> Self {
        Self {
            is_group_member: true,
            ..Self::new(value)
        }
    }
}

/// Variables in declaration order, looked up case-insensitively
///
/// Redeclaring a name replaces its value but keeps its original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableMap {
    entries: IndexMap<String, (String, VariableValue)>,
}

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: VariableValue) {
        self.entries
            .insert(name.to_ascii_lowercase(), (name.to_string(), value));
    }

    /// Record a reference to a variable group
    pub fn insert_group(&mut self, group: &str) {
        let value = VariableValue {
            value: group.to_string(),
            is_group: true,
            ..Default::default()
        };
        self.entries.insert(
            format!("{}{}", GROUP_PREFIX, group.to_ascii_lowercase()),
            (group.to_string(), value),
        );
    }

    pub fn get(&self, name: &str) -> Option<&VariableValue> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, value)| value)
            .filter(|value| !value.is_group)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|v| v.value.as_str())
    }

    /// Entries in declaration order, group markers included
    pub fn iter(&self) -> impl Iterator<Item = (&str, &VariableValue)> {
        self.entries.values().map(|(name, value)| (name.as_str(), value))
    }

    /// Names of the referenced variable groups
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.iter().filter(|(_, v)| v.is_group).map(|(name, _)| name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flattened name to value map, group markers excluded
    pub fn resolved(&self) -> IndexMap<String, String> {
        self.iter()
            .filter(|(_, v)| !v.is_group)
            .map(|(name, v)| (name.to_string(), v.value.clone()))
            .collect()
    }

    /// Add `other` on top of this map; its entries win
    pub fn extend(&mut self, other: &VariableMap) {
        for (key, entry) in &other.entries {
            self.entries.insert(key.clone(), entry.clone());
        }
    }

    /// Sequence-style declarations; group members are represented by their group
    pub fn to_context_data(&self) -> Token {
        let items = self
            .iter()
            .filter(|(_, v)| !v.is_group_member)
            .map(|(name, v)| {
                if v.is_group {
                    return Token::mapping(vec![entry("group", Token::string(name))]);
                }
                let mut entries = vec![
                    entry("name", Token::string(name)),
                    entry("value", Token::string(v.value.clone())),
                ];
                if v.is_readonly {
                    entries.push(entry("readonly", Token::boolean(true)));
                }
                Token::mapping(entries)
            })
            .collect();
        Token::sequence(items)
    }
}

/// Resolve a `variables` block into `variables`, returning the resolved declarations
///
/// With `static_eval`, expressions are evaluated and every accepted variable
/// becomes visible to the entries after it. Without it, expressions are
/// errors and group references are recorded as markers.
#[async_recursion]
pub async fn parse_variables<'a>(
    context: &'a Context,
    variables: &'a mut VariableMap,
    raw: &'a Token,
    static_eval: Option<&'a mut TemplateContext>,
) -> Result<Token> {
    match &raw.kind {
        TokenKind::Mapping(entries) => parse_mapping(context, variables, entries, static_eval).await,
        TokenKind::Sequence(items) => parse_sequence(context, variables, items, static_eval).await,
        TokenKind::Null => Ok(Token::sequence(vec![]).at(raw.position)),
        _ => Err(raw
            .error(format!("Expected a mapping or sequence for variables, found a {}", raw.type_name()))
            .into()),
    }
}

fn directive_kind(token: &Token) -> Option<&ExpressionKind> {
    token
        .as_expression()
        .filter(|e| e.is_directive())
        .map(|e| &e.kind)
}

fn continues_chain(kind: Option<&ExpressionKind>) -> bool {
    matches!(kind, Some(ExpressionKind::ElseIf(_)) | Some(ExpressionKind::Else))
}

/// End of the contiguous group starting at `start`: an `if` takes its `elseif`/`else` siblings
fn group_end<T>(items: &[T], start: usize, kind: impl Fn(&T) -> Option<&ExpressionKind>) -> usize {
    let mut end = start + 1;
    if matches!(kind(&items[start]), Some(ExpressionKind::If(_))) {
        while end < items.len() && continues_chain(kind(&items[end])) {
            end += 1;
        }
    }
    end
}

fn unexpected_expression(token: &Token) -> ResolveError {
    token
        .error(format!("Unexpected expression in variables: {}", token))
        .into()
}

/// Literal value of a variable, evaluating expressions when a static context is present
fn literal_value(static_eval: Option<&mut TemplateContext>, value: &Token, what: &str) -> Result<String> {
    let value = match static_eval {
        Some(ctx) if value.contains_expressions() => evaluate_fragment(ctx, value),
        _ => value.clone(),
    };
    if value.contains_expressions() {
        return Err(unexpected_expression(&value));
    }
    Ok(value.assert_literal_string(what)?)
}

fn accept(variables: &mut VariableMap, static_eval: Option<&mut TemplateContext>, name: &str, value: VariableValue) {
    if let Some(ctx) = static_eval {
        ctx.set_variable(name, &value.value);
    }
    variables.insert(name, value);
}

async fn parse_mapping(
    context: &Context,
    variables: &mut VariableMap,
    entries: &[(Token, Token)],
    mut static_eval: Option<&mut TemplateContext>,
) -> Result<Token> {
    let mut out = Vec::with_capacity(entries.len());
    let mut index = 0;
    while index < entries.len() {
        let (key, value) = &entries[index];

        if key.as_expression().is_some() {
            let Some(ctx) = static_eval.as_deref_mut() else {
                return Err(unexpected_expression(key));
            };
            let end = group_end(entries, index, |(k, _)| directive_kind(k));
            let group = Token::mapping(entries[index..end].to_vec()).at(key.position);
            let evaluated = evaluate_fragment(ctx, &group);
            let resolved = parse_variables(context, variables, &evaluated, Some(ctx)).await?;
            append_entries(&mut out, resolved);
            index = end;
            continue;
        }

        let name = key.assert_literal_string("variable name")?;
        let text = literal_value(static_eval.as_deref_mut(), value, &name)?;
        accept(variables, static_eval.as_deref_mut(), &name, VariableValue::new(text.clone()));
        out.push((key.clone(), Token::string(text).at(value.position)));
        index += 1;
    }
    Ok(Token::mapping(out))
}

async fn parse_sequence(
    context: &Context,
    variables: &mut VariableMap,
    items: &[Token],
    mut static_eval: Option<&mut TemplateContext>,
) -> Result<Token> {
    let mut out = Vec::with_capacity(items.len());
    let mut index = 0;
    while index < items.len() {
        let item = &items[index];

        let leading = match &item.kind {
            TokenKind::Mapping(entries) if entries.len() == 1 => directive_kind(&entries[0].0),
            _ => None,
        };
        if leading.is_some() || item.as_expression().is_some() {
            let Some(ctx) = static_eval.as_deref_mut() else {
                return Err(unexpected_expression(item));
            };
            let end = group_end(items, index, |t| match &t.kind {
                TokenKind::Mapping(entries) if entries.len() == 1 => directive_kind(&entries[0].0),
                _ => None,
            });
            let group = Token::sequence(items[index..end].to_vec()).at(item.position);
            let evaluated = evaluate_fragment(ctx, &group);
            let resolved = parse_variables(context, variables, &evaluated, Some(ctx)).await?;
            append_items(&mut out, resolved);
            index = end;
            continue;
        }

        let item = match static_eval.as_deref_mut() {
            Some(ctx) if item.contains_expressions() => evaluate_fragment(ctx, item),
            _ => item.clone(),
        };
        let entries = item.assert_mapping("variable")?;

        if let Some(group) = item.get("group") {
            if entries.len() > 1 {
                return Err(item.error("A variable group reference must not declare other keys").into());
            }
            let name = group.assert_literal_string("group")?;
            resolve_group(context, variables, static_eval.as_deref_mut(), &name);
            out.push(Token::mapping(vec![entry("group", Token::string(name))]).at(item.position));
        } else if let Some(reference) = TemplateReference::from_entry(&item)? {
            let template = read_template(
                context,
                &reference.path,
                reference.parameters.as_ref(),
                SchemaName::VariableTemplateRoot,
            )
            .await
            .map_err(|e| wrap_include_error(context, &item, e))?;
            let child = context.derive_child(&template, &reference.path)?;
            if let Some(nested) = template.get("variables") {
                let resolved = parse_variables(&child, variables, nested, static_eval.as_deref_mut()).await?;
                append_items(&mut out, resolved);
            }
        } else {
            let mut name = None;
            let mut value = String::new();
            let mut readonly = false;
            for (key, v) in entries {
                match key.as_str() {
                    Some("name") => name = Some(v.assert_literal_string("name")?),
                    Some("value") => value = literal_value(None, v, "value")?,
                    Some("readonly") => readonly = v.assert_boolean("readonly")?,
                    _ => return Err(key.error(format!("Unexpected variable key '{}'", key)).into()),
                }
            }
            let name = name.ok_or_else(|| item.error("A variable requires a name"))?;
            let declared = if readonly {
                VariableValue::readonly(value)
            } else {
                VariableValue::new(value)
            };
            out.push(declaration(&name, &declared).at(item.position));
            accept(variables, static_eval.as_deref_mut(), &name, declared);
        }
        index += 1;
    }
    Ok(Token::sequence(out))
}

/// Look up a group's members; unknown groups stay opaque
fn resolve_group(
    context: &Context,
    variables: &mut VariableMap,
    mut static_eval: Option<&mut TemplateContext>,
    group: &str,
) {
    if static_eval.is_none() {
        variables.insert_group(group);
    }
    let members = context.group_variables(group);
    if members.is_empty() {
        warn!("Variable group '{}' could not be resolved", group);
    }
    for (name, value) in members {
        accept(variables, static_eval.as_deref_mut(), &name, VariableValue::group_member(value));
    }
}

fn declaration(name: &str, value: &VariableValue) -> Token {
    let mut entries = vec![
        entry("name", Token::string(name)),
        entry("value", Token::string(value.value.clone())),
    ];
    if value.is_readonly {
        entries.push(entry("readonly", Token::boolean(true)));
    }
    Token::mapping(entries)
}

/// Splice resolved declarations into a mapping-style result
fn append_entries(out: &mut Vec<(Token, Token)>, resolved: Token) {
    match resolved.kind {
        TokenKind::Mapping(entries) => out.extend(entries),
        TokenKind::Sequence(items) => {
            for item in items {
                if let (Some(name), Some(value)) = (item.get("name"), item.get("value")) {
                    out.push((name.clone(), value.clone()));
                }
            }
        }
        _ => {}
    }
}

/// Splice resolved declarations into a sequence-style result
fn append_items(out: &mut Vec<Token>, resolved: Token) {
    match resolved.kind {
        TokenKind::Sequence(items) => out.extend(items),
        TokenKind::Mapping(entries) => out.extend(entries.into_iter().map(|(name, value)| {
            Token::mapping(vec![entry("name", name), entry("value", value)])
        })),
        _ => {}
    }
}
