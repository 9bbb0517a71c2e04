//! Template inclusion: fetch, bind parameters, pre-resolve variables, evaluate

use super::evaluator::evaluate;
use super::reader::read;
use super::schema::SchemaName;
use super::token::{Token, TokenError, TokenKind};
use super::TemplateContext;
use crate::core::parameters::bind_parameters;
use crate::core::variables::{parse_variables, VariableMap};
use crate::core::Context;
use crate::error::{ResolveError, Result, ValidationError};
use async_recursion::async_recursion;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

/// A `template:` entry and the parameters passed to it
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateReference {
    pub path: String,
    pub parameters: Option<IndexMap<String, Token>>,
}

impl TemplateReference {
    /// Read the `template` reference out of a list entry, if it has one
    ///
    /// The only key allowed next to `template` is `parameters`.
    pub fn from_entry(item: &Token) -> std::result::Result<Option<Self>, TokenError> {
        let Some(template) = item.get("template") else {
            return Ok(None);
        };
        let path = template.assert_literal_string("template")?;
        let entries = item.assert_mapping("template reference")?;

        let others: Vec<&Token> = entries
            .iter()
            .map(|(k, _)| k)
            .filter(|k| k.as_str() != Some("template"))
            .collect();
        if others.len() > 1 {
            let names: Vec<String> = others.iter().map(|k| k.to_string()).collect();
            return Err(item.error(format!(
                "Unexpected yaml keys {} after template reference",
                names.join(", ")
            )));
        }

        let mut parameters = None;
        if let Some(key) = others.first() {
            if key.as_str() != Some("parameters") {
                return Err(key.error(format!("Unexpected yaml key {} expected parameters", key)));
            }
            let mut bound = IndexMap::new();
            if let Some(value) = item.get("parameters") {
                if !value.is_null() {
                    for (name, value) in value.assert_mapping("template parameters")? {
                        bound.insert(name.assert_literal_string("parameter name")?, value.clone());
                    }
                }
            }
            parameters = Some(bound);
        }

        Ok(Some(Self { path, parameters }))
    }
}

/// Load `file_ref`, bind `caller_parameters` and evaluate it as a `schema` document
#[async_recursion]
pub async fn read_template<'a>(
    context: &'a Context,
    file_ref: &'a str,
    caller_parameters: Option<&'a IndexMap<String, Token>>,
    schema: SchemaName,
) -> Result<Token> {
    let location = context.locate(file_ref)?;
    let content = context
        .file_provider
        .read_file(location.repository.as_deref(), &location.path)
        .await
        .ok_or_else(|| ResolveError::TemplateNotFound {
            path: location.path.clone(),
            repository: location.repository.clone(),
        })?;
    let display_name = location.display_name();
    let file_id = context.file_table.get_file_id(&display_name);
    debug!("Reading {} as {} (file id {})", display_name, schema, file_id);

    let mut reader = TemplateContext::new(context);
    let mut document = read(&mut reader, schema, &content, Some(file_id))?;
    reader.errors.check()?;

    let file_context = context.derive_child(&document, file_ref)?;

    let mut errors = context.error_collector();
    let parameters = bind_parameters(
        &file_context,
        document.get("parameters"),
        caller_parameters,
        &mut errors,
    )
    .await?;
    errors.check()?;

    let mut base = TemplateContext::new(context);
    base.set_value("parameters", Value::Object(parameters));
    for (name, value) in context.ambient_variables() {
        base.set_variable(&name, &value);
    }

    if let Some(raw) = document.get("variables").cloned() {
        let resolved = resolve_scope_variables(&file_context, &mut base, &raw).await?;
        replace_value(&mut document, "variables", resolved);
    }

    lookahead(&file_context, &base, &mut document).await?;

    let mut final_pass = base.fork();
    let result = evaluate(&mut final_pass, schema, &document, 0, Some(file_id));
    final_pass.errors.check()?;
    result.assert_mapping(schema.as_str())?;
    // refs may only be known once parameters are substituted
    context.register_repositories(&result);
    Ok(result)
}

/// Resolve a `variables` block against `scope`, leaving its values visible in `scope`
async fn resolve_scope_variables(
    context: &Context,
    scope: &mut TemplateContext,
    raw: &Token,
) -> Result<Token> {
    let mut variables = VariableMap::new();
    let resolved = parse_variables(context, &mut variables, raw, Some(&mut *scope)).await?;
    scope.errors.check()?;
    Ok(resolved)
}

/// Pre-resolve stage and job variables that may depend on enclosing ones
async fn lookahead(context: &Context, base: &TemplateContext, document: &mut Token) -> Result<()> {
    let TokenKind::Mapping(entries) = &mut document.kind else {
        return Ok(());
    };
    for (key, value) in entries.iter_mut() {
        match key.as_str() {
            Some("stages") => lookahead_stages(context, base, value).await?,
            Some("jobs") => lookahead_jobs(context, base, value).await?,
            _ => {}
        }
    }
    Ok(())
}

async fn lookahead_stages(context: &Context, enclosing: &TemplateContext, stages: &mut Token) -> Result<()> {
    let TokenKind::Sequence(items) = &mut stages.kind else {
        return Ok(());
    };
    for stage in items.iter_mut() {
        if stage.get("template").is_some() {
            continue;
        }
        let mut scope = enclosing.fork();
        if let Some(raw) = stage.get("variables").cloned() {
            debug!("Resolving variables of stage {:?} ahead of evaluation", stage.get("stage").map(|s| s.to_string()));
            let resolved = resolve_scope_variables(context, &mut scope, &raw).await?;
            replace_value(stage, "variables", resolved);
        }
        if let TokenKind::Mapping(entries) = &mut stage.kind {
            if let Some((_, jobs)) = entries.iter_mut().find(|(k, _)| k.as_str() == Some("jobs")) {
                lookahead_jobs(context, &scope, jobs).await?;
            }
        }
    }
    Ok(())
}

async fn lookahead_jobs(context: &Context, enclosing: &TemplateContext, jobs: &mut Token) -> Result<()> {
    let TokenKind::Sequence(items) = &mut jobs.kind else {
        return Ok(());
    };
    for job in items.iter_mut() {
        if job.get("template").is_some() {
            continue;
        }
        if let Some(raw) = job.get("variables").cloned() {
            let mut scope = enclosing.fork();
            let resolved = resolve_scope_variables(context, &mut scope, &raw).await?;
            replace_value(job, "variables", resolved);
        }
    }
    Ok(())
}

/// Swap the value under `key`, keeping its position
fn replace_value(token: &mut Token, key: &str, value: Token) {
    if let TokenKind::Mapping(entries) = &mut token.kind {
        if let Some((_, slot)) = entries.iter_mut().find(|(k, _)| k.as_str() == Some(key)) {
            slot.kind = value.kind;
        }
    }
}

/// Re-raise an error from a nested template as validation errors located at `at`
pub fn wrap_include_error(context: &Context, at: &Token, error: ResolveError) -> ResolveError {
    let prefix = context.location(at);
    match error {
        ResolveError::Validation(nested) => {
            let summary: Vec<&str> = nested.iter().map(|e| e.message.as_str()).collect();
            let mut errors = vec![ValidationError::new(format!(
                "{}Found Errors inside Template Reference: {}",
                prefix,
                summary.join(", ")
            ))];
            errors.extend(nested);
            ResolveError::Validation(errors)
        }
        other => {
            let messages = context.describe(&other);
            ResolveError::Validation(
                messages
                    .into_iter()
                    .map(|message| ValidationError::new(format!("{}{}", prefix, message)))
                    .collect(),
            )
        }
    }
}
