//! Stages

use super::context::Context;
use super::job::{depends_on, parse_jobs, unexpected_key, Job};
use super::pool::Pool;
use super::step::string_list;
use super::variables::{parse_variables, VariableMap};
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::template::{entry, read_template, wrap_include_error, SchemaName, TemplateReference, Token};
use async_recursion::async_recursion;

/// A stage and its jobs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stage {
    /// Stage identifier; `None` until runtime checks assign a default
    pub name: Option<String>,
    /// Name shown in the UI
    pub display_name: Option<String>,
    /// Stages that must finish first; defaults to the previous stage
    pub depends_on: Option<Vec<String>>,
    /// Runtime condition expression
    pub condition: Option<String>,
    /// Stage-scoped variables
    pub variables: Option<VariableMap>,
    /// Jobs in declaration order, templates expanded
    pub jobs: Vec<Job>,
    /// Default pool for the stage's jobs
    pub pool: Option<Pool>,
    /// `sequential` or `runLatest`
    pub lock_behavior: Option<String>,
    /// Free-form data with scalars stringified
    pub template_context: Option<Token>,
    /// `manual` or `automatic`
    pub trigger: Option<String>,
    /// Whether the stage can be skipped when queuing a run
    pub is_skippable: Option<bool>,
}

impl Stage {
    pub async fn parse(context: &Context, token: &Token) -> Result<Self> {
        Self::parse_with(context, token, false).await
    }

    /// Parse a stage; an `implicit` stage wraps the jobs of a pipeline without stages
    pub async fn parse_with(context: &Context, token: &Token, implicit: bool) -> Result<Self> {
        let entries = token.assert_mapping("stage")?;
        if !implicit && token.first_key() != Some("stage") {
            return Err(ResolveError::validation(format!(
                "{}Expected stage",
                context.location(token)
            )));
        }

        let mut stage = Stage::default();
        let mut errors = context.error_collector();
        for (key, value) in entries {
            if let Err(e) = stage.parse_key(context, key, value, implicit).await {
                context.collect(&mut errors, &e);
            }
        }
        errors.into_result(stage)
    }

    async fn parse_key(&mut self, context: &Context, key: &Token, value: &Token, implicit: bool) -> Result<()> {
        match key.as_str() {
            Some("stage") if !implicit => {
                if !value.is_null() {
                    self.name = Some(value.assert_literal_string("stage name")?);
                }
            }
            Some("displayName") => self.display_name = Some(value.assert_literal_string("displayName")?),
            Some("dependsOn") => self.depends_on = Some(depends_on(value)?),
            Some("condition") => self.condition = Some(value.assert_literal_string("condition")?),
            Some("variables") => {
                let mut variables = VariableMap::new();
                parse_variables(context, &mut variables, value, None).await?;
                self.variables = Some(variables);
            }
            Some("jobs") => self.jobs = parse_jobs(context, value).await?,
            Some("pool") => self.pool = Some(Pool::parse(context, value)?),
            Some("lockBehavior") => self.lock_behavior = Some(value.assert_literal_string("lockBehavior")?),
            Some("templateContext") => self.template_context = Some(value.stringify_scalars()),
            Some("trigger") => {
                let trigger = value.assert_literal_string("trigger")?;
                if !matches!(trigger.as_str(), "manual" | "automatic") {
                    return Err(value
                        .error(format!("Expected manual or automatic for trigger, found '{}'", trigger))
                        .into());
                }
                self.trigger = Some(trigger);
            }
            Some("isSkippable") => self.is_skippable = Some(value.assert_boolean("isSkippable")?),
            _ => return Err(unexpected_key(context, key)),
        }
        Ok(())
    }
}

impl ToContextData for Stage {
    fn to_context_data(&self) -> Token {
        let name = self.name.clone().map(Token::string).unwrap_or_else(Token::null);
        let mut entries = vec![entry("stage", name)];
        if let Some(display_name) = &self.display_name {
            entries.push(entry("displayName", Token::string(display_name.clone())));
        }
        if let Some(depends_on) = &self.depends_on {
            entries.push(entry("dependsOn", string_list(depends_on)));
        }
        if let Some(condition) = &self.condition {
            entries.push(entry("condition", Token::string(condition.clone())));
        }
        if let Some(variables) = &self.variables {
            entries.push(entry("variables", variables.to_context_data()));
        }
        if let Some(pool) = &self.pool {
            entries.push(entry("pool", pool.to_context_data()));
        }
        if let Some(lock_behavior) = &self.lock_behavior {
            entries.push(entry("lockBehavior", Token::string(lock_behavior.clone())));
        }
        if let Some(template_context) = &self.template_context {
            entries.push(entry("templateContext", template_context.clone()));
        }
        if let Some(trigger) = &self.trigger {
            entries.push(entry("trigger", Token::string(trigger.clone())));
        }
        if let Some(is_skippable) = self.is_skippable {
            entries.push(entry("isSkippable", Token::boolean(is_skippable)));
        }
        entries.push(entry(
            "jobs",
            Token::sequence(self.jobs.iter().map(ToContextData::to_context_data).collect()),
        ));
        Token::mapping(entries)
    }
}

/// Parse a stage list, expanding stage templates and reporting the problems of every entry together
#[async_recursion]
pub async fn parse_stages<'a>(context: &'a Context, token: &'a Token) -> Result<Vec<Stage>> {
    if token.is_null() {
        return Ok(Vec::new());
    }
    let mut stages = Vec::new();
    let mut errors = context.error_collector();
    for item in token.assert_sequence("stages")? {
        let parsed = match TemplateReference::from_entry(item) {
            Ok(Some(reference)) => parse_stage_template(context, item, &reference).await,
            Ok(None) => Stage::parse(context, item).await.map(|stage| vec![stage]),
            Err(e) => Err(e.into()),
        };
        match parsed {
            Ok(parsed) => stages.extend(parsed),
            Err(e) => context.collect(&mut errors, &e),
        }
    }
    errors.into_result(stages)
}

async fn parse_stage_template(context: &Context, at: &Token, reference: &TemplateReference) -> Result<Vec<Stage>> {
    let template = read_template(
        context,
        &reference.path,
        reference.parameters.as_ref(),
        SchemaName::StageTemplateRoot,
    )
    .await
    .map_err(|e| wrap_include_error(context, at, e))?;
    let child = context.derive_child(&template, &reference.path)?;
    match template.get("stages") {
        Some(nested) => parse_stages(&child, nested)
            .await
            .map_err(|e| wrap_include_error(context, at, e)),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemoryFileProvider;
    use std::sync::Arc;

    fn context(provider: InMemoryFileProvider) -> Context {
        Context::new(Arc::new(provider))
    }

    fn token(yaml: &str) -> Token {
        let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        Token::from_json(&value, Default::default())
    }

    #[tokio::test]
    async fn test_stage_round_trip() {
        let ctx = context(InMemoryFileProvider::new());
        let yaml = r#"
stage: deploy
displayName: Deploy
dependsOn: [build, test]
condition: and(succeeded(), eq(variables.branch, 'main'))
variables:
  target: prod
pool: deployers
lockBehavior: sequential
trigger: manual
isSkippable: false
jobs:
  - job: push
    steps:
      - script: ./push.sh
  - deployment: roll
    environment: prod
    strategy:
      rolling:
        maxParallel: 2
"#;
        let stage = Stage::parse(&ctx, &token(yaml)).await.unwrap();
        assert_eq!(stage.jobs.len(), 2);
        assert_eq!(stage.variables.as_ref().unwrap().value("target"), Some("prod"));
        assert_eq!(Stage::parse(&ctx, &stage.to_context_data()).await.unwrap(), stage);
    }

    #[tokio::test]
    async fn test_unnamed_stage_and_bad_trigger() {
        let ctx = context(InMemoryFileProvider::new());
        let stage = Stage::parse(&ctx, &token("stage:\njobs: []\n")).await.unwrap();
        assert_eq!(stage.name, None);
        assert_eq!(Stage::parse(&ctx, &stage.to_context_data()).await.unwrap(), stage);

        let err = Stage::parse(&ctx, &token("stage: a\ntrigger: sometimes\n")).await.unwrap_err();
        assert!(err.messages()[0].contains("manual or automatic"));
        assert!(Stage::parse(&ctx, &token("jobs: []\n")).await.is_err());
    }

    #[tokio::test]
    async fn test_stage_template_errors_are_wrapped() {
        let provider = InMemoryFileProvider::new().with_file(
            "stages.yml",
            "stages:\n  - stage: inner\n    jobs:\n      - job: a\n        unknown: 1\n",
        );
        let ctx = context(provider);
        let err = parse_stages(&ctx, &token("- template: stages.yml\n")).await.unwrap_err();
        let messages = err.messages();
        assert!(messages[0].contains("Found Errors inside Template Reference"));
        assert!(messages.iter().any(|m| m.contains("Unexpected Key unknown")));
    }

    #[tokio::test]
    async fn test_stage_template_parameters() {
        let provider = InMemoryFileProvider::new().with_file(
            "templates/stage.yml",
            "parameters:\n  name: default\nstages:\n  - stage: ${{ parameters.name }}\n    jobs: []\n",
        );
        let ctx = context(provider);
        let stages = parse_stages(&ctx, &token("- template: templates/stage.yml\n  parameters:\n    name: qa\n"))
            .await
            .unwrap();
        assert_eq!(stages[0].name.as_deref(), Some("qa"));
    }
}
