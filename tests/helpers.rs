//! Test utility functions for pipeline-resolver

#![allow(dead_code)]

use indexmap::IndexMap;
use pipeline_resolver::template::Position;
use pipeline_resolver::{
    Context, InMemoryFileProvider, Pipeline, ResolveError, StaticVariablesProvider, Token,
};
use std::sync::Arc;

/// Context serving `files` from the root repository
pub fn context(files: &[(&str, &str)]) -> Context {
    Context::new(Arc::new(provider(files)))
}

/// Context serving `files` with ambient `variables`
pub fn context_with_variables(files: &[(&str, &str)], variables: &[(&str, &str)]) -> Context {
    let mut ambient = StaticVariablesProvider::new();
    for (name, value) in variables {
        ambient = ambient.with_variable(*name, *value);
    }
    context(files).with_variables_provider(Arc::new(ambient))
}

pub fn provider(files: &[(&str, &str)]) -> InMemoryFileProvider {
    files
        .iter()
        .fold(InMemoryFileProvider::new(), |provider, (path, content)| {
            provider.with_file(path, content)
        })
}

/// Document value from inline YAML
pub fn token(yaml: &str) -> Token {
    let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
    Token::from_json(&value, Position::default())
}

/// Caller parameters from an inline YAML mapping
pub fn parameters(yaml: &str) -> IndexMap<String, Token> {
    let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
    value
        .as_object()
        .unwrap()
        .iter()
        .map(|(name, value)| (name.clone(), Token::from_json(value, Position::default())))
        .collect()
}

/// Load `file_ref` and run the runtime checks
pub async fn resolve(
    context: &Context,
    file_ref: &str,
    parameters: Option<&IndexMap<String, Token>>,
) -> Result<Pipeline, ResolveError> {
    let mut pipeline = Pipeline::load(context, file_ref, parameters).await?;
    pipeline.check_for_runtime_failure()?;
    Ok(pipeline)
}

/// Load `file_ref` expecting failure, returning the located messages
pub async fn resolve_errors(context: &Context, file_ref: &str) -> Vec<String> {
    match resolve(context, file_ref, None).await {
        Ok(_) => panic!("expected {} to fail", file_ref),
        Err(err) => context.describe(&err),
    }
}

/// Inputs of the only step of the only job
pub fn single_step_inputs(pipeline: &Pipeline) -> IndexMap<String, String> {
    assert_eq!(pipeline.stages.len(), 1);
    assert_eq!(pipeline.stages[0].jobs.len(), 1);
    let steps = &pipeline.stages[0].jobs[0].steps;
    assert_eq!(steps.len(), 1);
    steps[0].inputs.clone()
}

pub fn assert_contains(messages: &[String], needle: &str) {
    assert!(
        messages.iter().any(|m| m.contains(needle)),
        "no message contains {:?}: {:#?}",
        needle,
        messages
    );
}
