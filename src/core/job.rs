//! Jobs and deployment jobs

use super::container::Container;
use super::context::Context;
use super::pool::Pool;
use super::step::{parse_steps, string_list, Step};
use super::strategy::Strategy;
use super::variables::{parse_variables, VariableMap};
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::template::{
    entry, read_template, wrap_include_error, SchemaName, TemplateReference, Token, TokenKind,
};
use async_recursion::async_recursion;
use indexmap::IndexMap;

/// Target environment of a deployment job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub resource_name: Option<String>,
    pub resource_type: Option<String>,
    pub tags: Vec<String>,
}

impl Environment {
    pub fn parse(context: &Context, token: &Token) -> Result<Self> {
        if let TokenKind::String(name) = &token.kind {
            return Ok(Self {
                name: name.clone(),
                ..Default::default()
            });
        }
        let mut environment = Environment::default();
        for (key, value) in token.assert_mapping("environment")? {
            match key.as_str() {
                Some("name") => environment.name = value.assert_literal_string("environment name")?,
                Some("resourceName") => environment.resource_name = Some(value.assert_literal_string("resourceName")?),
                Some("resourceType") => environment.resource_type = Some(value.assert_literal_string("resourceType")?),
                Some("tags") => environment.tags = value.assert_string_list("tags")?,
                _ => {
                    return Err(ResolveError::validation(format!(
                        "{}Unexpected environment key '{}'",
                        context.location(key),
                        key
                    )))
                }
            }
        }
        Ok(environment)
    }
}

impl ToContextData for Environment {
    fn to_context_data(&self) -> Token {
        if self.resource_name.is_none() && self.resource_type.is_none() && self.tags.is_empty() {
            return Token::string(self.name.clone());
        }
        let mut entries = vec![entry("name", Token::string(self.name.clone()))];
        if let Some(resource_name) = &self.resource_name {
            entries.push(entry("resourceName", Token::string(resource_name.clone())));
        }
        if let Some(resource_type) = &self.resource_type {
            entries.push(entry("resourceType", Token::string(resource_type.clone())));
        }
        if !self.tags.is_empty() {
            entries.push(entry("tags", string_list(&self.tags)));
        }
        Token::mapping(entries)
    }
}

/// Resources a job declares up front
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uses {
    pub repositories: Vec<String>,
    pub pools: Vec<String>,
}

/// An ordinary or deployment job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Job {
    /// Job identifier; `None` until runtime checks assign a default
    pub name: Option<String>,
    /// Name shown in the UI
    pub display_name: Option<String>,
    /// Jobs in the same stage that must finish first
    pub depends_on: Option<Vec<String>>,
    /// Runtime condition expression
    pub condition: Option<String>,
    /// Matrix, parallel or deployment strategy
    pub strategy: Option<Strategy>,
    /// Literal or `$[ ]` expression
    pub continue_on_error: Option<String>,
    /// Container the steps run in
    pub container: Option<Container>,
    /// Kept as written; may be a macro
    pub timeout_in_minutes: Option<String>,
    /// Kept as written; may be a macro
    pub cancel_timeout_in_minutes: Option<String>,
    /// Job-scoped variables
    pub variables: Option<VariableMap>,
    /// Service containers by name
    pub services: Option<IndexMap<String, Container>>,
    /// Steps of an ordinary job; empty for deployment jobs
    pub steps: Vec<Step>,
    /// Free-form data with scalars stringified
    pub template_context: Option<Token>,
    /// Declared with `deployment:` rather than `job:`
    pub deployment_job: bool,
    /// Deployment target
    pub environment: Option<Environment>,
    /// Agent pool; inherited from the stage or pipeline when unset
    pub pool: Option<Pool>,
    /// Repositories and pools the job declares it uses
    pub uses: Option<Uses>,
    /// `workspace.clean` setting
    pub workspace_clean: Option<String>,
}

impl Job {
    /// Parse a `job:` or `deployment:` entry
    pub async fn parse(context: &Context, token: &Token) -> Result<Self> {
        Self::parse_with(context, token, false).await
    }

    /// Parse a job; an `implicit` job is the root of a pipeline and has no `job` key
    pub async fn parse_with(context: &Context, token: &Token, implicit: bool) -> Result<Self> {
        let entries = token.assert_mapping("job")?;
        let mut job = Job::default();
        let mut errors = context.error_collector();

        if !implicit {
            match token.first_key() {
                Some("job") => {}
                Some("deployment") => job.deployment_job = true,
                _ => {
                    return Err(ResolveError::validation(format!(
                        "{}Expected either job or deployment",
                        context.location(token)
                    )))
                }
            }
        }

        for (key, value) in entries {
            if let Err(e) = job.parse_key(context, key, value, implicit).await {
                context.collect(&mut errors, &e);
            }
        }

        let location = context.location(token);
        if job.deployment_job {
            if !job.steps.is_empty() {
                errors.add(format!("{}A deployment job cannot declare steps, use a strategy", location));
            }
            if matches!(&job.strategy, Some(strategy) if !strategy.is_deployment()) {
                errors.add(format!("{}A deployment job requires a runOnce, canary or rolling strategy", location));
            }
        } else {
            if job.environment.is_some() {
                errors.add(format!("{}Only deployment jobs can target an environment", location));
            }
            if matches!(&job.strategy, Some(strategy) if strategy.is_deployment()) {
                errors.add(format!("{}Only deployment jobs can use a deployment strategy", location));
            }
        }
        errors.into_result(job)
    }

    async fn parse_key(&mut self, context: &Context, key: &Token, value: &Token, implicit: bool) -> Result<()> {
        match key.as_str() {
            Some("job" | "deployment") if !implicit => {
                if !value.is_null() {
                    self.name = Some(value.assert_literal_string("job name")?);
                }
            }
            Some("displayName") => self.display_name = Some(value.assert_literal_string("displayName")?),
            Some("dependsOn") => self.depends_on = Some(depends_on(value)?),
            Some("condition") => self.condition = Some(value.assert_literal_string("condition")?),
            Some("strategy") => self.strategy = Some(Strategy::parse(context, value).await?),
            Some("continueOnError") => self.continue_on_error = Some(value.assert_literal_string("continueOnError")?),
            Some("container") => self.container = Some(Container::parse(context, value)?),
            Some("timeoutInMinutes") => self.timeout_in_minutes = Some(value.assert_literal_string("timeoutInMinutes")?),
            Some("cancelTimeoutInMinutes") => {
                self.cancel_timeout_in_minutes = Some(value.assert_literal_string("cancelTimeoutInMinutes")?)
            }
            Some("variables") => {
                let mut variables = VariableMap::new();
                parse_variables(context, &mut variables, value, None).await?;
                self.variables = Some(variables);
            }
            Some("services") => {
                let mut services = IndexMap::new();
                for (name, service) in value.assert_mapping("services")? {
                    services.insert(name.assert_literal_string("service")?, Container::parse(context, service)?);
                }
                self.services = Some(services);
            }
            Some("steps") => self.steps = parse_steps(context, value).await?,
            Some("templateContext") => self.template_context = Some(value.stringify_scalars()),
            Some("environment") => self.environment = Some(Environment::parse(context, value)?),
            Some("pool") => self.pool = Some(Pool::parse(context, value)?),
            Some("uses") => {
                let mut uses = Uses::default();
                for (kind, names) in value.assert_mapping("uses")? {
                    match kind.as_str() {
                        Some("repositories") => uses.repositories = names.assert_string_list("repositories")?,
                        Some("pools") => uses.pools = names.assert_string_list("pools")?,
                        _ => return Err(unexpected_key(context, kind)),
                    }
                }
                self.uses = Some(uses);
            }
            Some("workspace") => {
                for (option, setting) in value.assert_mapping("workspace")? {
                    match option.as_str() {
                        Some("clean") => self.workspace_clean = Some(setting.assert_literal_string("clean")?),
                        _ => return Err(unexpected_key(context, option)),
                    }
                }
            }
            _ => return Err(unexpected_key(context, key)),
        }
        Ok(())
    }

    /// Context data without the leading `job`/`deployment` key
    pub(crate) fn body_entries(&self) -> Vec<(Token, Token)> {
        let mut entries = Vec::new();
        if let Some(display_name) = &self.display_name {
            entries.push(entry("displayName", Token::string(display_name.clone())));
        }
        if let Some(depends_on) = &self.depends_on {
            entries.push(entry("dependsOn", string_list(depends_on)));
        }
        if let Some(condition) = &self.condition {
            entries.push(entry("condition", Token::string(condition.clone())));
        }
        if let Some(strategy) = &self.strategy {
            entries.push(entry("strategy", strategy.to_context_data()));
        }
        if let Some(continue_on_error) = &self.continue_on_error {
            entries.push(entry("continueOnError", Token::string(continue_on_error.clone())));
        }
        if let Some(pool) = &self.pool {
            entries.push(entry("pool", pool.to_context_data()));
        }
        if let Some(container) = &self.container {
            entries.push(entry("container", container.to_context_data()));
        }
        if let Some(services) = &self.services {
            entries.push(entry(
                "services",
                Token::mapping(
                    services
                        .iter()
                        .map(|(name, service)| (Token::string(name.clone()), service.to_context_data()))
                        .collect(),
                ),
            ));
        }
        if let Some(timeout) = &self.timeout_in_minutes {
            entries.push(entry("timeoutInMinutes", Token::string(timeout.clone())));
        }
        if let Some(timeout) = &self.cancel_timeout_in_minutes {
            entries.push(entry("cancelTimeoutInMinutes", Token::string(timeout.clone())));
        }
        if let Some(variables) = &self.variables {
            entries.push(entry("variables", variables.to_context_data()));
        }
        if let Some(environment) = &self.environment {
            entries.push(entry("environment", environment.to_context_data()));
        }
        if !self.deployment_job {
            entries.push(entry(
                "steps",
                Token::sequence(self.steps.iter().map(ToContextData::to_context_data).collect()),
            ));
        }
        if let Some(template_context) = &self.template_context {
            entries.push(entry("templateContext", template_context.clone()));
        }
        if let Some(uses) = &self.uses {
            let mut declared = Vec::new();
            if !uses.repositories.is_empty() {
                declared.push(entry("repositories", string_list(&uses.repositories)));
            }
            if !uses.pools.is_empty() {
                declared.push(entry("pools", string_list(&uses.pools)));
            }
            entries.push(entry("uses", Token::mapping(declared)));
        }
        if let Some(clean) = &self.workspace_clean {
            entries.push(entry(
                "workspace",
                Token::mapping(vec![entry("clean", Token::string(clean.clone()))]),
            ));
        }
        entries
    }
}

impl ToContextData for Job {
    fn to_context_data(&self) -> Token {
        let key = if self.deployment_job { "deployment" } else { "job" };
        let name = self.name.clone().map(Token::string).unwrap_or_else(Token::null);
        let mut entries = vec![entry(key, name)];
        entries.extend(self.body_entries());
        Token::mapping(entries)
    }
}

pub(crate) fn unexpected_key(context: &Context, key: &Token) -> ResolveError {
    ResolveError::validation(format!("{}Unexpected Key {}", context.location(key), key))
}

/// `dependsOn` given as one name or a list; null means no dependencies
pub(crate) fn depends_on(value: &Token) -> Result<Vec<String>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(value.assert_string_list("dependsOn")?)
}

/// Parse a job list, expanding job templates and reporting the problems of every entry together
#[async_recursion]
pub async fn parse_jobs<'a>(context: &'a Context, token: &'a Token) -> Result<Vec<Job>> {
    if token.is_null() {
        return Ok(Vec::new());
    }
    let mut jobs = Vec::new();
    let mut errors = context.error_collector();
    for item in token.assert_sequence("jobs")? {
        let parsed = match TemplateReference::from_entry(item) {
            Ok(Some(reference)) => parse_job_template(context, item, &reference).await,
            Ok(None) => Job::parse(context, item).await.map(|job| vec![job]),
            Err(e) => Err(e.into()),
        };
        match parsed {
            Ok(parsed) => jobs.extend(parsed),
            Err(e) => context.collect(&mut errors, &e),
        }
    }
    errors.into_result(jobs)
}

async fn parse_job_template(context: &Context, at: &Token, reference: &TemplateReference) -> Result<Vec<Job>> {
    let template = read_template(
        context,
        &reference.path,
        reference.parameters.as_ref(),
        SchemaName::JobTemplateRoot,
    )
    .await
    .map_err(|e| wrap_include_error(context, at, e))?;
    let child = context.derive_child(&template, &reference.path)?;
    match template.get("jobs") {
        Some(nested) => parse_jobs(&child, nested)
            .await
            .map_err(|e| wrap_include_error(context, at, e)),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InMemoryFileProvider, StaticVariablesProvider};
    use std::sync::Arc;

    fn context(provider: InMemoryFileProvider) -> Context {
        Context::new(Arc::new(provider))
    }

    fn token(yaml: &str) -> Token {
        let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        Token::from_json(&value, Default::default())
    }

    async fn round_trip(ctx: &Context, yaml: &str) -> Job {
        let job = Job::parse(ctx, &token(yaml)).await.unwrap();
        let reparsed = Job::parse(ctx, &job.to_context_data()).await.unwrap();
        assert_eq!(reparsed, job);
        job
    }

    #[tokio::test]
    async fn test_job_round_trip() {
        let ctx = context(InMemoryFileProvider::new()).with_variables_provider(Arc::new(
            StaticVariablesProvider::new().with_group("shared", IndexMap::from([("token".to_string(), "x".to_string())])),
        ));
        let job = round_trip(
            &ctx,
            r#"
job: build
displayName: Build
dependsOn: setup
condition: succeeded()
strategy:
  matrix:
    linux: { image: ubuntu }
pool: { vmImage: ubuntu-latest }
container: builder
services:
  db: { image: postgres:16 }
timeoutInMinutes: 30
variables:
  - name: configuration
    value: release
  - group: shared
steps:
  - script: make
templateContext:
  retries: 3
uses:
  repositories: [tools]
workspace:
  clean: all
"#,
        )
        .await;
        assert_eq!(job.name.as_deref(), Some("build"));
        assert_eq!(job.depends_on, Some(vec!["setup".to_string()]));
        assert_eq!(job.variables.as_ref().unwrap().value("configuration"), Some("release"));
        assert_eq!(job.template_context.as_ref().unwrap().get("retries"), Some(&Token::string("3")));
        assert_eq!(job.steps.len(), 1);
        assert!(!job.deployment_job);
    }

    #[tokio::test]
    async fn test_deployment_job_round_trip() {
        let ctx = context(InMemoryFileProvider::new());
        let job = round_trip(
            &ctx,
            r#"
deployment: release
environment:
  name: production
  resourceType: VirtualMachine
  tags: [web]
strategy:
  runOnce:
    deploy:
      steps:
        - script: ./deploy.sh
"#,
        )
        .await;
        assert!(job.deployment_job);
        assert_eq!(job.environment.as_ref().unwrap().name, "production");

        let named = round_trip(&ctx, "deployment: smoke\nenvironment: staging\n").await;
        assert_eq!(named.environment.unwrap().to_context_data(), Token::string("staging"));
    }

    #[tokio::test]
    async fn test_first_key_must_name_the_job() {
        let ctx = context(InMemoryFileProvider::new());
        let err = Job::parse(&ctx, &token("steps: []\njob: late\n")).await.unwrap_err();
        assert!(err.messages()[0].contains("Expected either job or deployment"));
    }

    #[tokio::test]
    async fn test_job_problems_are_collected() {
        let ctx = context(InMemoryFileProvider::new());
        let err = Job::parse(&ctx, &token("job: a\nfoo: 1\nenvironment: prod\nbar: 2\n"))
            .await
            .unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages[0].contains("Unexpected Key foo"));
        assert!(messages[2].contains("Only deployment jobs can target an environment"));

        let err = Job::parse(&ctx, &token("deployment: d\nsteps:\n  - script: x\n")).await.unwrap_err();
        assert!(err.messages()[0].contains("cannot declare steps"));
    }

    #[tokio::test]
    async fn test_job_template_expands() {
        let provider = InMemoryFileProvider::new().with_file(
            "templates/jobs.yml",
            r#"
parameters:
  - name: names
    type: object
    default: [a]
jobs:
  - ${{ each name in parameters.names }}:
    - job: build_${{ name }}
      steps:
        - script: echo ${{ name }}
"#,
        );
        let ctx = context(provider);
        let jobs = parse_jobs(
            &ctx,
            &token("- template: templates/jobs.yml\n  parameters:\n    names: [x, y]\n- job: last\n  steps: []\n"),
        )
        .await
        .unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.name.clone().unwrap()).collect();
        assert_eq!(names, vec!["build_x", "build_y", "last"]);
    }

    #[tokio::test]
    async fn test_sibling_job_errors_are_reported_together() {
        let ctx = context(InMemoryFileProvider::new());
        let err = parse_jobs(
            &ctx,
            &token("- job: a\n  bogus: 1\n- template: missing.yml\n- job: ok\n  steps: []\n"),
        )
        .await
        .unwrap_err();
        let messages = err.messages();
        assert!(messages[0].contains("Unexpected Key bogus"));
        assert!(messages.iter().any(|m| m.contains("missing.yml")));
    }
}
