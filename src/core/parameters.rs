//! Template parameter declarations and value coercion

use super::container::Container;
use super::context::Context;
use super::job::parse_jobs;
use super::stage::parse_stages;
use super::step::{parse_step, parse_steps};
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::expression::parse_number;
use crate::template::{Position, Token, TokenKind, ValidationErrors};
use async_recursion::async_recursion;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Declared type of a strict parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Object,
    Boolean,
    Number,
    String,
    Step,
    StepList,
    Job,
    JobList,
    Deployment,
    DeploymentList,
    Stage,
    StageList,
    Container,
    ContainerList,
}

impl ParameterType {
    pub fn as_str(self) -> &'static str {
        match self {
            ParameterType::Object => "object",
            ParameterType::Boolean => "boolean",
            ParameterType::Number => "number",
            ParameterType::String => "string",
            ParameterType::Step => "step",
            ParameterType::StepList => "stepList",
            ParameterType::Job => "job",
            ParameterType::JobList => "jobList",
            ParameterType::Deployment => "deployment",
            ParameterType::DeploymentList => "deploymentList",
            ParameterType::Stage => "stage",
            ParameterType::StageList => "stageList",
            ParameterType::Container => "container",
            ParameterType::ContainerList => "containerList",
        }
    }

    const ALL: [ParameterType; 14] = [
        ParameterType::Object,
        ParameterType::Boolean,
        ParameterType::Number,
        ParameterType::String,
        ParameterType::Step,
        ParameterType::StepList,
        ParameterType::Job,
        ParameterType::JobList,
        ParameterType::Deployment,
        ParameterType::DeploymentList,
        ParameterType::Stage,
        ParameterType::StageList,
        ParameterType::Container,
        ParameterType::ContainerList,
    ];
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParameterType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

/// Value a parameter takes when it is given as null
fn null_value(parameter_type: ParameterType, position: Position) -> Token {
    let token = match parameter_type {
        ParameterType::Object
        | ParameterType::Step
        | ParameterType::Job
        | ParameterType::Deployment
        | ParameterType::Stage
        | ParameterType::Container => Token::null(),
        ParameterType::Boolean => Token::boolean(false),
        ParameterType::Number => Token::number(0.0),
        ParameterType::String => Token::string(""),
        ParameterType::StepList
        | ParameterType::JobList
        | ParameterType::DeploymentList
        | ParameterType::StageList
        | ParameterType::ContainerList => Token::sequence(vec![]),
    };
    token.at(position)
}

fn single_or_list(mut items: Vec<Token>) -> Token {
    if items.len() == 1 {
        items.remove(0)
    } else {
        Token::sequence(items)
    }
}

/// Coerce `value` to `parameter_type`, checking `allowed` for strings and numbers
#[async_recursion]
pub async fn convert_value<'a>(
    context: &'a Context,
    value: Option<&'a Token>,
    parameter_type: ParameterType,
    allowed: Option<&'a Token>,
) -> Result<Token> {
    let value = match value {
        Some(value) if !value.is_null() => value,
        Some(value) => return Ok(null_value(parameter_type, value.position)),
        None => return Ok(null_value(parameter_type, Position::default())),
    };
    let invalid = |message: String| ResolveError::InvalidParameterValue {
        message,
        location: context.location(value),
    };

    let converted = match parameter_type {
        ParameterType::Object => value.clone(),
        ParameterType::Boolean => Token::boolean(
            value
                .assert_boolean("a boolean parameter")
                .map_err(|e| invalid(e.message))?,
        ),
        ParameterType::Number => {
            let text = scalar_text(value).ok_or_else(|| invalid(format!("Expected a number, found a {}", value.type_name())))?;
            check_allowed(&text, allowed).map_err(invalid)?;
            Token::number(parse_number(&text).ok_or_else(|| invalid(format!("'{}' is not a valid number", text)))?)
        }
        ParameterType::String => {
            let text = scalar_text(value).ok_or_else(|| invalid(format!("Expected a string, found a {}", value.type_name())))?;
            check_allowed(&text, allowed).map_err(invalid)?;
            Token::string(text)
        }
        ParameterType::Step => {
            let mut steps = Vec::new();
            parse_step(context, &mut steps, value).await?;
            single_or_list(steps.iter().map(ToContextData::to_context_data).collect())
        }
        ParameterType::StepList => Token::sequence(
            parse_steps(context, value)
                .await?
                .iter()
                .map(ToContextData::to_context_data)
                .collect(),
        ),
        ParameterType::Job | ParameterType::Deployment => {
            let jobs = parse_jobs(context, &Token::sequence(vec![value.clone()]).at(value.position)).await?;
            if parameter_type == ParameterType::Deployment && jobs.iter().any(|job| !job.deployment_job) {
                return Err(invalid("Only Deployment Jobs are valid".to_string()));
            }
            single_or_list(jobs.iter().map(ToContextData::to_context_data).collect())
        }
        ParameterType::JobList | ParameterType::DeploymentList => {
            let jobs = parse_jobs(context, value).await?;
            if parameter_type == ParameterType::DeploymentList && jobs.iter().any(|job| !job.deployment_job) {
                return Err(invalid("Only Deployment Jobs are valid".to_string()));
            }
            Token::sequence(jobs.iter().map(ToContextData::to_context_data).collect())
        }
        ParameterType::Stage => {
            let stages = parse_stages(context, &Token::sequence(vec![value.clone()]).at(value.position)).await?;
            single_or_list(stages.iter().map(ToContextData::to_context_data).collect())
        }
        ParameterType::StageList => Token::sequence(
            parse_stages(context, value)
                .await?
                .iter()
                .map(ToContextData::to_context_data)
                .collect(),
        ),
        ParameterType::Container => Container::parse(context, value)?.to_context_data(),
        ParameterType::ContainerList => {
            let mut containers = Vec::new();
            for item in value.assert_sequence("containerList")? {
                let name = item.get("container").map(|n| n.assert_literal_string("container")).transpose()?;
                containers.push(Container::parse(context, item)?.to_named_context_data(name.as_deref()));
            }
            Token::sequence(containers)
        }
    };
    Ok(converted.at(value.position))
}

fn scalar_text(value: &Token) -> Option<String> {
    match value.kind {
        TokenKind::Mapping(_) | TokenKind::Sequence(_) | TokenKind::Expression(_) => None,
        _ => value.literal_text(),
    }
}

fn check_allowed(text: &str, allowed: Option<&Token>) -> std::result::Result<(), String> {
    let Some(TokenKind::Sequence(values)) = allowed.map(|a| &a.kind) else {
        return Ok(());
    };
    if values.iter().any(|v| v.literal_text().as_deref() == Some(text)) {
        return Ok(());
    }
    let listed: Vec<String> = values.iter().filter_map(Token::literal_text).collect();
    Err(format!(
        "'{}' is not an allowed value. Allowed values: {}",
        text,
        listed.join(", ")
    ))
}

fn caller_value<'a>(caller: Option<&'a IndexMap<String, Token>>, name: &str) -> Option<&'a Token> {
    let caller = caller?;
    caller.get(name).or_else(|| {
        caller
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// Bind caller-supplied values to a template's declared `parameters`
///
/// A mapping declares loose parameters: caller values override defaults and
/// undeclared caller keys pass through. A sequence declares strict ones:
/// missing values and undeclared caller keys are collected into `errors`,
/// while unknown types and values that cannot be coerced fail immediately.
pub async fn bind_parameters(
    context: &Context,
    declared: Option<&Token>,
    caller: Option<&IndexMap<String, Token>>,
    errors: &mut ValidationErrors,
) -> Result<Map<String, Value>> {
    let mut bound = Map::new();
    match declared.map(|d| &d.kind) {
        Some(TokenKind::Sequence(items)) => {
            for item in items {
                if let Some((name, value)) = bind_strict(context, item, caller, errors).await? {
                    bound.insert(name, value.to_json());
                }
            }
            for name in caller.into_iter().flat_map(|c| c.keys()) {
                let is_declared = items.iter().any(|item| {
                    item.get("name")
                        .and_then(Token::literal_text)
                        .is_some_and(|declared| declared.eq_ignore_ascii_case(name))
                });
                if !is_declared {
                    errors.add(format!(
                        "{}Unexpected parameter '{}'",
                        declared.map(|d| context.location(d)).unwrap_or_default(),
                        name
                    ));
                }
            }
        }
        Some(TokenKind::Mapping(entries)) => {
            for (key, default) in entries {
                let name = key.assert_literal_string("parameter name")?;
                let value = caller_value(caller, &name).unwrap_or(default);
                bound.insert(name, value.to_json());
            }
            for (name, value) in caller.into_iter().flatten() {
                if !bound.keys().any(|k| k.eq_ignore_ascii_case(name)) {
                    bound.insert(name.clone(), value.to_json());
                }
            }
        }
        Some(TokenKind::Null) | None => {
            for (name, value) in caller.into_iter().flatten() {
                bound.insert(name.clone(), value.to_json());
            }
        }
        Some(_) => {
            if let Some(declared) = declared {
                return Err(declared
                    .error(format!(
                        "Expected a mapping or sequence for parameters, found a {}",
                        declared.type_name()
                    ))
                    .into());
            }
        }
    }
    Ok(bound)
}

async fn bind_strict(
    context: &Context,
    item: &Token,
    caller: Option<&IndexMap<String, Token>>,
    errors: &mut ValidationErrors,
) -> Result<Option<(String, Token)>> {
    let location = context.location(item);
    let entries = item.assert_mapping("parameter")?;

    let mut name = None;
    let mut type_name = None;
    let mut default = None;
    let mut values = None;
    for (key, value) in entries {
        match key.as_str() {
            Some("name") => name = Some(value.assert_literal_string("parameter name")?),
            Some("type") => type_name = Some(value.assert_literal_string("parameter type")?),
            Some("default") => default = Some(value),
            Some("values") => values = Some(value),
            Some("displayName") => {}
            _ => errors.add(format!("{}Unexpected parameter key '{}'", context.location(key), key)),
        }
    }

    let Some(name) = name else {
        errors.add(format!("{}A parameter declaration requires a name", location));
        return Ok(None);
    };
    let parameter_type = match type_name {
        None => ParameterType::Object,
        Some(type_name) => type_name
            .parse::<ParameterType>()
            .map_err(|type_name| ResolveError::UnsupportedParameterType { type_name, location: location.clone() })?,
    };

    // null counts as missing, from the caller and as a default
    let value = caller_value(caller, &name)
        .filter(|v| !v.is_null())
        .or(default.filter(|d| !d.is_null()));
    if value.is_none() {
        errors.add(format!("{}A value for the '{}' parameter must be provided.", location, name));
        return Ok(None);
    }

    let converted = convert_value(context, value, parameter_type, values)
        .await
        .map_err(|e| match e {
            ResolveError::InvalidParameterValue { message, location } => ResolveError::InvalidParameterValue {
                message: format!("Parameter '{}': {}", name, message),
                location,
            },
            other => other,
        })?;
    Ok(Some((name, converted)))
}
