//! Job strategies and deployment lifecycle hooks

use super::context::Context;
use super::pool::Pool;
use super::step::{parse_steps, string_mapping, Step};
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::template::{entry, Token, TokenKind};
use indexmap::IndexMap;

/// Matrix legs by name, or an expression producing them at runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matrix {
    Legs(IndexMap<String, IndexMap<String, String>>),
    Expression(String),
}

/// Concurrency of a rolling deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingMaxParallel {
    Count(u32),
    Percent(u32),
}

/// Steps (and optionally a pool) run at one point of a deployment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentHook {
    pub steps: Option<Vec<Step>>,
    pub pool: Option<Pool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentHooks {
    pub pre_deploy: Option<DeploymentHook>,
    pub deploy: Option<DeploymentHook>,
    pub route_traffic: Option<DeploymentHook>,
    pub post_route_traffic: Option<DeploymentHook>,
    pub on_success: Option<DeploymentHook>,
    pub on_failure: Option<DeploymentHook>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Parallel(u32),
    Matrix {
        matrix: Matrix,
        max_parallel: Option<u32>,
    },
    MaxParallel(u32),
    RunOnce(DeploymentHooks),
    Canary {
        increments: Vec<u32>,
        hooks: DeploymentHooks,
    },
    Rolling {
        max_parallel: Option<RollingMaxParallel>,
        hooks: DeploymentHooks,
    },
}

impl Strategy {
    /// Whether this strategy belongs to a deployment job
    pub fn is_deployment(&self) -> bool {
        matches!(
            self,
            Strategy::RunOnce(_) | Strategy::Canary { .. } | Strategy::Rolling { .. }
        )
    }

    pub async fn parse(context: &Context, token: &Token) -> Result<Self> {
        let entries = token.assert_mapping("strategy")?;
        let chosen: Vec<&str> = entries
            .iter()
            .filter_map(|(k, _)| k.as_str())
            .filter(|k| matches!(*k, "parallel" | "matrix" | "runOnce" | "canary" | "rolling"))
            .collect();
        if chosen.len() > 1 {
            return Err(ResolveError::validation(format!(
                "{}A strategy must declare only one of {}",
                context.location(token),
                chosen.join(", ")
            )));
        }

        let max_parallel = token
            .get("maxParallel")
            .map(|v| v.assert_integer("maxParallel"))
            .transpose()?;
        for (key, _) in entries {
            if !matches!(
                key.as_str(),
                Some("parallel" | "matrix" | "maxParallel" | "runOnce" | "canary" | "rolling")
            ) {
                return Err(ResolveError::validation(format!(
                    "{}Unexpected strategy key '{}'",
                    context.location(key),
                    key
                )));
            }
        }

        match chosen.first().copied() {
            Some("parallel") => {
                if max_parallel.is_some() {
                    return Err(ResolveError::validation(format!(
                        "{}maxParallel cannot be combined with parallel",
                        context.location(token)
                    )));
                }
                let count = token.get("parallel").map(|v| v.assert_integer("parallel")).transpose()?;
                Ok(Strategy::Parallel(count.unwrap_or(1)))
            }
            Some("matrix") => {
                let value = token.get("matrix").cloned().unwrap_or_else(Token::null);
                Ok(Strategy::Matrix {
                    matrix: parse_matrix(&value)?,
                    max_parallel,
                })
            }
            Some(kind) => {
                if max_parallel.is_some() {
                    return Err(ResolveError::validation(format!(
                        "{}maxParallel belongs inside {}",
                        context.location(token),
                        kind
                    )));
                }
                let value = token.get(kind).cloned().unwrap_or_else(Token::null);
                parse_deployment_strategy(context, kind, &value).await
            }
            None => match max_parallel {
                Some(count) => Ok(Strategy::MaxParallel(count)),
                None => Err(ResolveError::validation(format!(
                    "{}A strategy requires parallel, matrix, maxParallel, runOnce, canary or rolling",
                    context.location(token)
                ))),
            },
        }
    }
}

fn parse_matrix(value: &Token) -> Result<Matrix> {
    if let Some(expression) = value.as_str() {
        return Ok(Matrix::Expression(expression.to_string()));
    }
    let mut legs = IndexMap::new();
    for (name, leg) in value.assert_mapping("matrix")? {
        let mut variables = IndexMap::new();
        for (k, v) in leg.assert_mapping("matrix leg")? {
            variables.insert(k.assert_literal_string("matrix variable")?, v.assert_literal_string("matrix value")?);
        }
        legs.insert(name.assert_literal_string("matrix leg")?, variables);
    }
    Ok(Matrix::Legs(legs))
}

async fn parse_deployment_strategy(context: &Context, kind: &str, value: &Token) -> Result<Strategy> {
    let mut hooks = DeploymentHooks::default();
    let mut increments = Vec::new();
    let mut rolling_max = None;

    if !value.is_null() {
        for (key, v) in value.assert_mapping(kind)? {
            match (kind, key.as_str()) {
                (_, Some("preDeploy")) => hooks.pre_deploy = Some(parse_hook(context, v).await?),
                (_, Some("deploy")) => hooks.deploy = Some(parse_hook(context, v).await?),
                (_, Some("routeTraffic")) => hooks.route_traffic = Some(parse_hook(context, v).await?),
                (_, Some("postRouteTraffic")) => hooks.post_route_traffic = Some(parse_hook(context, v).await?),
                (_, Some("on")) => {
                    for (outcome, hook) in v.assert_mapping("on")? {
                        match outcome.as_str() {
                            Some("success") => hooks.on_success = Some(parse_hook(context, hook).await?),
                            Some("failure") => hooks.on_failure = Some(parse_hook(context, hook).await?),
                            _ => return Err(unexpected(context, outcome, "on")),
                        }
                    }
                }
                ("canary", Some("increments")) => {
                    for item in v.assert_sequence("increments")? {
                        increments.push(item.assert_integer("increments")?);
                    }
                }
                ("rolling", Some("maxParallel")) => rolling_max = Some(parse_rolling_max(v)?),
                _ => return Err(unexpected(context, key, kind)),
            }
        }
    }

    Ok(match kind {
        "canary" => Strategy::Canary { increments, hooks },
        "rolling" => Strategy::Rolling {
            max_parallel: rolling_max,
            hooks,
        },
        _ => Strategy::RunOnce(hooks),
    })
}

fn parse_rolling_max(value: &Token) -> Result<RollingMaxParallel> {
    let text = value.assert_literal_string("maxParallel")?;
    let parsed = match text.trim().strip_suffix('%') {
        Some(percent) => percent.trim().parse().map(RollingMaxParallel::Percent),
        None => text.trim().parse().map(RollingMaxParallel::Count),
    };
    parsed.map_err(|_| {
        ResolveError::from(value.error(format!(
            "Expected a count or percentage for maxParallel, found '{}'",
            text
        )))
    })
}

fn unexpected(context: &Context, key: &Token, within: &str) -> ResolveError {
    ResolveError::validation(format!(
        "{}Unexpected key '{}' in {}",
        context.location(key),
        key,
        within
    ))
}

async fn parse_hook(context: &Context, token: &Token) -> Result<DeploymentHook> {
    let mut hook = DeploymentHook::default();
    if token.is_null() {
        return Ok(hook);
    }
    for (key, value) in token.assert_mapping("deployment hook")? {
        match key.as_str() {
            Some("steps") => hook.steps = Some(parse_steps(context, value).await?),
            Some("pool") => hook.pool = Some(Pool::parse(context, value)?),
            _ => return Err(unexpected(context, key, "deployment hook")),
        }
    }
    Ok(hook)
}

impl ToContextData for DeploymentHook {
    fn to_context_data(&self) -> Token {
        let mut entries = Vec::new();
        if let Some(steps) = &self.steps {
            entries.push(entry(
                "steps",
                Token::sequence(steps.iter().map(ToContextData::to_context_data).collect()),
            ));
        }
        if let Some(pool) = &self.pool {
            entries.push(entry("pool", pool.to_context_data()));
        }
        Token::mapping(entries)
    }
}

impl DeploymentHooks {
    fn entries(&self) -> Vec<(Token, Token)> {
        let mut entries = Vec::new();
        for (key, hook) in [
            ("preDeploy", &self.pre_deploy),
            ("deploy", &self.deploy),
            ("routeTraffic", &self.route_traffic),
            ("postRouteTraffic", &self.post_route_traffic),
        ] {
            if let Some(hook) = hook {
                entries.push(entry(key, hook.to_context_data()));
            }
        }
        let mut on = Vec::new();
        if let Some(hook) = &self.on_success {
            on.push(entry("success", hook.to_context_data()));
        }
        if let Some(hook) = &self.on_failure {
            on.push(entry("failure", hook.to_context_data()));
        }
        if !on.is_empty() {
            entries.push(entry("on", Token::mapping(on)));
        }
        entries
    }
}

impl ToContextData for Strategy {
    fn to_context_data(&self) -> Token {
        let entries = match self {
            Strategy::Parallel(count) => vec![entry("parallel", Token::number(*count as f64))],
            Strategy::MaxParallel(count) => vec![entry("maxParallel", Token::number(*count as f64))],
            Strategy::Matrix { matrix, max_parallel } => {
                let matrix = match matrix {
                    Matrix::Expression(expression) => Token::string(expression.clone()),
                    Matrix::Legs(legs) => Token::mapping(
                        legs.iter()
                            .map(|(name, variables)| (Token::string(name.clone()), string_mapping(variables)))
                            .collect(),
                    ),
                };
                let mut entries = vec![entry("matrix", matrix)];
                if let Some(count) = max_parallel {
                    entries.push(entry("maxParallel", Token::number(*count as f64)));
                }
                entries
            }
            Strategy::RunOnce(hooks) => vec![entry("runOnce", Token::mapping(hooks.entries()))],
            Strategy::Canary { increments, hooks } => {
                let mut entries = vec![entry(
                    "increments",
                    Token::sequence(increments.iter().map(|i| Token::number(*i as f64)).collect()),
                )];
                entries.extend(hooks.entries());
                vec![entry("canary", Token::mapping(entries))]
            }
            Strategy::Rolling { max_parallel, hooks } => {
                let mut entries = Vec::new();
                match max_parallel {
                    Some(RollingMaxParallel::Count(count)) => {
                        entries.push(entry("maxParallel", Token::number(*count as f64)))
                    }
                    Some(RollingMaxParallel::Percent(percent)) => {
                        entries.push(entry("maxParallel", Token::string(format!("{}%", percent))))
                    }
                    None => {}
                }
                entries.extend(hooks.entries());
                vec![entry("rolling", Token::mapping(entries))]
            }
        };
        Token::new(TokenKind::Mapping(entries))
    }
}
