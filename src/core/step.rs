//! Steps and their shorthand forms

use super::context::Context;
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::template::{
    entry, read_template, wrap_include_error, SchemaName, TemplateReference, Token,
};
use async_recursion::async_recursion;
use indexmap::IndexMap;
use tracing::debug;
use uuid::Uuid;

/// Id of the built-in checkout task
pub const CHECKOUT_TASK_ID: &str = "6d15af64-176c-496d-b583-fd2ae21d4df4";

/// Which task a step runs, resolved when the step is parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStepDefinitionReference {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Reference as written, e.g. `Bash@3`
    pub raw_name_and_version: String,
}

impl TaskStepDefinitionReference {
    fn is_checkout(name_and_version: &str) -> bool {
        ["Checkout@1", "Checkout@1.0.0"]
            .iter()
            .map(|s| s.to_string())
            .chain(["1", "1.0.0"].iter().map(|v| format!("{}@{}", CHECKOUT_TASK_ID, v)))
            .any(|known| known.eq_ignore_ascii_case(name_and_version))
    }

    /// Resolve `name_and_version` through the context's task resolver
    ///
    /// Checkout always resolves. Without a resolver only the raw reference is kept.
    pub fn resolve(context: &Context, name_and_version: &str) -> Result<Self> {
        if Self::is_checkout(name_and_version) {
            return Ok(Self {
                id: Uuid::parse_str(CHECKOUT_TASK_ID).ok(),
                name: Some("Checkout".to_string()),
                version: Some("1.0.0".to_string()),
                raw_name_and_version: name_and_version.to_string(),
            });
        }
        let Some(resolver) = &context.task_resolver else {
            return Ok(Self {
                id: None,
                name: None,
                version: None,
                raw_name_and_version: name_and_version.to_string(),
            });
        };
        let task = resolver
            .resolve(name_and_version)
            .ok_or_else(|| ResolveError::UnresolvedTask(name_and_version.to_string()))?;
        Ok(Self {
            id: Some(task.id),
            name: Some(task.name),
            version: Some(task.version.to_string()),
            raw_name_and_version: name_and_version.to_string(),
        })
    }
}

/// The primary key of a step mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Task,
    Powershell,
    Pwsh,
    Bash,
    Script,
    Checkout,
    Download,
    DownloadBuild,
    GetPackage,
    Publish,
    ReviewApp,
    Template,
}

impl StepKind {
    pub fn from_key(key: &str) -> Option<Self> {
        let kind = match key {
            "task" => StepKind::Task,
            "powershell" => StepKind::Powershell,
            "pwsh" => StepKind::Pwsh,
            "bash" => StepKind::Bash,
            "script" => StepKind::Script,
            "checkout" => StepKind::Checkout,
            "download" => StepKind::Download,
            "downloadBuild" => StepKind::DownloadBuild,
            "getPackage" => StepKind::GetPackage,
            "publish" => StepKind::Publish,
            "reviewApp" => StepKind::ReviewApp,
            "template" => StepKind::Template,
            _ => return None,
        };
        Some(kind)
    }

    /// Task behind a shorthand form and the input its primary value fills
    fn shorthand(self) -> Option<(&'static str, &'static str)> {
        match self {
            StepKind::Powershell | StepKind::Pwsh => Some(("PowerShell@2", "script")),
            StepKind::Bash => Some(("Bash@3", "script")),
            StepKind::Script => Some(("CmdLine@2", "script")),
            StepKind::Checkout => Some(("Checkout@1", "repository")),
            StepKind::Download => Some(("DownloadPipelineArtifact@2", "buildType")),
            StepKind::DownloadBuild => Some(("DownloadBuildArtifacts@0", "buildType")),
            StepKind::GetPackage => Some(("DownloadPackage@1", "definition")),
            StepKind::Publish => Some(("PublishPipelineArtifact@1", "path")),
            StepKind::ReviewApp => Some(("ReviewApp@0", "resourceName")),
            StepKind::Task | StepKind::Template => None,
        }
    }
}

/// Where a step runs and what it may do there
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepTarget {
    Container(String),
    Settings {
        container: Option<String>,
        commands: Option<String>,
        /// `Some(vec![])` when no variables may be set
        settable_variables: Option<Vec<String>>,
    },
}

impl StepTarget {
    fn parse(token: &Token) -> Result<Self> {
        if let Some(container) = token.as_str() {
            return Ok(StepTarget::Container(container.to_string()));
        }
        let mut container = None;
        let mut commands = None;
        let mut settable_variables = None;
        for (key, value) in token.assert_mapping("target")? {
            match key.as_str() {
                Some("container") => container = Some(value.assert_literal_string("container")?),
                Some("commands") => commands = Some(value.assert_literal_string("commands")?),
                Some("settableVariables") => {
                    settable_variables = Some(match value.as_str() {
                        Some("none") => Vec::new(),
                        _ => value.assert_string_list("settableVariables")?,
                    })
                }
                _ => return Err(key.error(format!("Unexpected target key '{}'", key)).into()),
            }
        }
        Ok(StepTarget::Settings {
            container,
            commands,
            settable_variables,
        })
    }
}

impl ToContextData for StepTarget {
    fn to_context_data(&self) -> Token {
        match self {
            StepTarget::Container(container) => Token::string(container.clone()),
            StepTarget::Settings {
                container,
                commands,
                settable_variables,
            } => {
                let mut entries = Vec::new();
                if let Some(container) = container {
                    entries.push(entry("container", Token::string(container.clone())));
                }
                if let Some(commands) = commands {
                    entries.push(entry("commands", Token::string(commands.clone())));
                }
                match settable_variables {
                    Some(allowed) if allowed.is_empty() => {
                        entries.push(entry("settableVariables", Token::string("none")))
                    }
                    Some(allowed) => entries.push(entry(
                        "settableVariables",
                        Token::sequence(allowed.iter().map(|v| Token::string(v.clone())).collect()),
                    )),
                    None => {}
                }
                Token::mapping(entries)
            }
        }
    }
}

/// A single task invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Task the step runs
    pub reference: TaskStepDefinitionReference,
    /// Step identifier used in output variable references
    pub name: Option<String>,
    /// Name shown in the UI
    pub display_name: Option<String>,
    /// Runtime condition expression
    pub condition: Option<String>,
    /// Keep going when the step fails
    pub continue_on_error: Option<bool>,
    /// `false` skips the step
    pub enabled: Option<bool>,
    /// Retries before the step is reported as failed
    pub retry_count_on_task_failure: Option<u32>,
    /// Step timeout
    pub timeout_in_minutes: Option<u32>,
    /// Container and command restrictions
    pub target: Option<StepTarget>,
    /// Environment variables for the task
    pub env: IndexMap<String, String>,
    /// Task inputs; shorthand forms fill their primary input
    pub inputs: IndexMap<String, String>,
}

impl Step {
    fn new(reference: TaskStepDefinitionReference) -> Self {
        Self {
            reference,
            name: None,
            display_name: None,
            condition: None,
            continue_on_error: None,
            enabled: None,
            retry_count_on_task_failure: None,
            timeout_in_minutes: None,
            target: None,
            env: IndexMap::new(),
            inputs: IndexMap::new(),
        }
    }
}

fn string_map(token: &Token, what: &str) -> Result<IndexMap<String, String>> {
    let mut map = IndexMap::new();
    for (key, value) in token.assert_mapping(what)? {
        map.insert(key.assert_literal_string(what)?, value.assert_literal_string(what)?);
    }
    Ok(map)
}

/// Parse one step entry into `steps`; a `template` entry adds all steps of the template
#[async_recursion]
pub async fn parse_step<'a>(context: &'a Context, steps: &'a mut Vec<Step>, token: &'a Token) -> Result<()> {
    let entries = token.assert_mapping("step")?;
    let Some((primary_key, primary_value)) = entries.first() else {
        return Err(token.error("A step must not be empty").into());
    };
    let primary_name = primary_key.assert_string("step")?;
    let kind = StepKind::from_key(primary_name)
        .ok_or_else(|| primary_key.error(format!("Unexpected step type '{}'", primary_name)))?;

    if kind == StepKind::Template {
        return parse_step_template(context, steps, token).await;
    }

    let mut step = Step::new(TaskStepDefinitionReference {
        id: None,
        name: None,
        version: None,
        raw_name_and_version: String::new(),
    });
    let mut unparsed = Vec::new();
    for (key, value) in &entries[1..] {
        match key.as_str() {
            Some("name") => step.name = Some(value.assert_literal_string("name")?),
            Some("displayName") => step.display_name = Some(value.assert_literal_string("displayName")?),
            Some("condition") => step.condition = Some(value.assert_literal_string("condition")?),
            Some("continueOnError") => step.continue_on_error = Some(value.assert_boolean("continueOnError")?),
            Some("enabled") => step.enabled = Some(value.assert_boolean("enabled")?),
            Some("retryCountOnTaskFailure") => {
                step.retry_count_on_task_failure = Some(value.assert_integer("retryCountOnTaskFailure")?)
            }
            Some("timeoutInMinutes") => step.timeout_in_minutes = Some(value.assert_integer("timeoutInMinutes")?),
            Some("target") => step.target = Some(StepTarget::parse(value)?),
            Some("env") => step.env = string_map(value, "env")?,
            _ => unparsed.push((key, value)),
        }
    }

    let primary = primary_value.assert_literal_string(primary_name)?;
    match kind.shorthand() {
        None => {
            step.reference = TaskStepDefinitionReference::resolve(context, &primary)?;
            for (key, value) in unparsed {
                match key.as_str() {
                    Some("inputs") => step.inputs = string_map(value, "inputs")?,
                    _ => debug!("Ignoring key {} on task {}", key, primary),
                }
            }
        }
        Some((task, input)) => {
            step.reference = TaskStepDefinitionReference::resolve(context, task)?;
            for (key, value) in unparsed {
                step.inputs
                    .insert(key.assert_string("step key")?.to_string(), value.assert_literal_string("step input")?);
            }
            if matches!(kind, StepKind::Powershell | StepKind::Pwsh | StepKind::Bash) {
                step.inputs.insert("targetType".to_string(), "inline".to_string());
            }
            if kind == StepKind::Pwsh {
                step.inputs.insert("pwsh".to_string(), "true".to_string());
            }
            step.inputs.insert(input.to_string(), primary);
        }
    }
    steps.push(step);
    Ok(())
}

async fn parse_step_template(context: &Context, steps: &mut Vec<Step>, token: &Token) -> Result<()> {
    let Some(reference) = TemplateReference::from_entry(token)? else {
        return Ok(());
    };
    let template = read_template(
        context,
        &reference.path,
        reference.parameters.as_ref(),
        SchemaName::StepTemplateRoot,
    )
    .await
    .map_err(|e| wrap_include_error(context, token, e))?;
    let child = context.derive_child(&template, &reference.path)?;
    if let Some(nested) = template.get("steps") {
        let parsed = parse_steps(&child, nested)
            .await
            .map_err(|e| wrap_include_error(context, token, e))?;
        steps.extend(parsed);
    }
    Ok(())
}

/// Parse a step list, reporting the problems of every entry together
#[async_recursion]
pub async fn parse_steps<'a>(context: &'a Context, token: &'a Token) -> Result<Vec<Step>> {
    if token.is_null() {
        return Ok(Vec::new());
    }
    let mut steps = Vec::new();
    let mut errors = context.error_collector();
    for item in token.assert_sequence("steps")? {
        if let Err(e) = parse_step(context, &mut steps, item).await {
            context.collect(&mut errors, &e);
        }
    }
    errors.into_result(steps)
}

impl ToContextData for Step {
    fn to_context_data(&self) -> Token {
        let mut entries = vec![entry("task", Token::string(self.reference.raw_name_and_version.clone()))];
        if let Some(name) = &self.name {
            entries.push(entry("name", Token::string(name.clone())));
        }
        if let Some(display_name) = &self.display_name {
            entries.push(entry("displayName", Token::string(display_name.clone())));
        }
        if let Some(condition) = &self.condition {
            entries.push(entry("condition", Token::string(condition.clone())));
        }
        if let Some(continue_on_error) = self.continue_on_error {
            entries.push(entry("continueOnError", Token::boolean(continue_on_error)));
        }
        if let Some(enabled) = self.enabled {
            entries.push(entry("enabled", Token::boolean(enabled)));
        }
        if let Some(retries) = self.retry_count_on_task_failure {
            entries.push(entry("retryCountOnTaskFailure", Token::number(retries as f64)));
        }
        if let Some(timeout) = self.timeout_in_minutes {
            entries.push(entry("timeoutInMinutes", Token::number(timeout as f64)));
        }
        if let Some(target) = &self.target {
            entries.push(entry("target", target.to_context_data()));
        }
        if !self.env.is_empty() {
            entries.push(entry("env", string_mapping(&self.env)));
        }
        if !self.inputs.is_empty() {
            entries.push(entry("inputs", string_mapping(&self.inputs)));
        }
        Token::mapping(entries)
    }
}

pub(crate) fn string_list(items: &[String]) -> Token {
    Token::sequence(items.iter().map(|s| Token::string(s.clone())).collect())
}

pub(crate) fn string_mapping(map: &IndexMap<String, String>) -> Token {
    Token::mapping(
        map.iter()
            .map(|(k, v)| (Token::string(k.clone()), Token::string(v.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InMemoryFileProvider, StaticTaskProvider, TaskMetaData, TaskVersion};
    use std::sync::Arc;

    fn context(provider: InMemoryFileProvider) -> Context {
        Context::new(Arc::new(provider))
    }

    fn token(yaml: &str) -> Token {
        let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        Token::from_json(&value, Default::default())
    }

    async fn parse_one(ctx: &Context, yaml: &str) -> Step {
        let mut steps = Vec::new();
        parse_step(ctx, &mut steps, &token(yaml)).await.unwrap();
        assert_eq!(steps.len(), 1);
        steps.remove(0)
    }

    #[tokio::test]
    async fn test_bash_shorthand() {
        let ctx = context(InMemoryFileProvider::new());
        let step = parse_one(
            &ctx,
            "bash: echo hi\nworkingDirectory: src\nenv: {A: b}\nretryCountOnTaskFailure: 2\n",
        )
        .await;
        assert_eq!(step.reference.raw_name_and_version, "Bash@3");
        assert_eq!(step.inputs.get("script").map(String::as_str), Some("echo hi"));
        assert_eq!(step.inputs.get("targetType").map(String::as_str), Some("inline"));
        assert_eq!(step.inputs.get("workingDirectory").map(String::as_str), Some("src"));
        assert_eq!(step.env.get("A").map(String::as_str), Some("b"));
        assert_eq!(step.retry_count_on_task_failure, Some(2));
    }

    #[tokio::test]
    async fn test_checkout_resolves_without_resolver() {
        let ctx = context(InMemoryFileProvider::new());
        let step = parse_one(&ctx, "checkout: self\nclean: true\n").await;
        assert_eq!(step.reference.id, Uuid::parse_str(CHECKOUT_TASK_ID).ok());
        assert_eq!(step.reference.name.as_deref(), Some("Checkout"));
        assert_eq!(step.inputs.get("repository").map(String::as_str), Some("self"));
        assert_eq!(step.inputs.get("clean").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_task_resolution() {
        let bash = Uuid::new_v4();
        let resolver = StaticTaskProvider::new(vec![TaskMetaData {
            id: bash,
            name: "Bash".to_string(),
            version: TaskVersion::new(3, 227, 0),
        }]);
        let ctx = context(InMemoryFileProvider::new()).with_task_resolver(Arc::new(resolver));

        let step = parse_one(&ctx, "task: Bash@3\ninputs:\n  targetType: inline\n  script: ls\n").await;
        assert_eq!(step.reference.id, Some(bash));
        assert_eq!(step.reference.version.as_deref(), Some("3.227.0"));
        assert_eq!(step.inputs.len(), 2);

        let err = parse_steps(&ctx, &token("- task: Missing@1\n- task: Other@2\n")).await.unwrap_err();
        assert_eq!(
            err.messages(),
            vec!["Failed to resolve task Missing@1".to_string(), "Failed to resolve task Other@2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_target_settings() {
        let ctx = context(InMemoryFileProvider::new());
        let step = parse_one(&ctx, "script: make\ntarget:\n  container: builder\n  settableVariables: none\n").await;
        assert_eq!(
            step.target,
            Some(StepTarget::Settings {
                container: Some("builder".to_string()),
                commands: None,
                settable_variables: Some(vec![]),
            })
        );
    }

    #[tokio::test]
    async fn test_context_data_round_trip() {
        let ctx = context(InMemoryFileProvider::new());
        for yaml in [
            "pwsh: Get-Date\ndisplayName: Date\ncondition: always()\ncontinueOnError: true\n",
            "publish: out\nartifact: drop\ntarget: host\ntimeoutInMinutes: 5\nenabled: false\n",
            "checkout: self\nfetchDepth: 1\n",
        ] {
            let step = parse_one(&ctx, yaml).await;
            let reparsed = parse_one(&ctx, &serde_yaml::to_string(&step.to_context_data()).unwrap()).await;
            assert_eq!(reparsed, step);
        }
    }

    #[tokio::test]
    async fn test_step_template_expands() {
        let provider = InMemoryFileProvider::new().with_file(
            "templates/build.yml",
            "parameters:\n  - name: target\n    type: string\n    default: all\nsteps:\n  - script: make ${{ parameters.target }}\n  - script: make test\n",
        );
        let ctx = context(provider);
        let steps = parse_steps(
            &ctx,
            &token("- template: templates/build.yml\n  parameters:\n    target: lib\n- script: done\n"),
        )
        .await
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("make lib"));
    }

    #[tokio::test]
    async fn test_step_errors_are_aggregated() {
        let ctx = context(InMemoryFileProvider::new());
        let err = parse_steps(&ctx, &token("- unknown: x\n- script: ok\n- task: [a]\n")).await.unwrap_err();
        let messages = err.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("Unexpected step type 'unknown'"));
    }

    #[tokio::test]
    async fn test_missing_step_template_is_wrapped() {
        let ctx = context(InMemoryFileProvider::new());
        let err = parse_steps(&ctx, &token("- template: missing.yml\n")).await.unwrap_err();
        assert!(err.is_validation());
        assert!(err.messages()[0].contains("missing.yml"));
    }
}
