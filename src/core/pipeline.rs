//! Pipeline domain model

use super::container::Container;
use super::context::Context;
use super::job::{unexpected_key, Job};
use super::pool::Pool;
use super::stage::{parse_stages, Stage};
use super::strategy::{Matrix, Strategy};
use super::variables::{parse_variables, VariableMap};
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::expression::{parse, validate_named_values, ExpressionFlags};
use crate::template::{
    entry, read_template, wrap_include_error, SchemaName, TemplateReference, Token, TokenKind, ValidationErrors,
};
use async_recursion::async_recursion;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const NAME_PATTERN: &str = "^[A-Za-z_][A-Za-z0-9_]*$";

/// Named values usable in `$[ ]` variable expressions
const RUNTIME_VALUES: &[&str] = &["variables", "resources", "pipeline", "dependencies", "stageDependencies"];
const STAGE_CONDITION_VALUES: &[&str] = &["variables", "pipeline", "dependencies"];
const JOB_CONDITION_VALUES: &[&str] = &["variables", "pipeline", "dependencies", "stageDependencies"];
const STEP_CONDITION_VALUES: &[&str] = &["variables"];

/// A resolved pipeline
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    /// Run number format
    pub name: Option<String>,
    /// Whether the commit message is appended to the run name
    pub append_commit_message_to_run_name: Option<bool>,
    /// `sequential` or `runLatest`
    pub lock_behavior: Option<String>,
    /// Pipeline-scoped variables
    pub variables: Option<VariableMap>,
    /// Default pool for every job
    pub pool: Option<Pool>,
    /// Container resources by alias
    pub container_resources: IndexMap<String, Container>,
    /// Other resource kinds (repositories, pipelines, builds, ...) kept as written
    pub other_resources: IndexMap<String, Token>,
    /// CI trigger, kept as written
    pub trigger: Option<Token>,
    /// Pull request trigger, kept as written
    pub pr: Option<Token>,
    /// Scheduled triggers, kept as written
    pub schedules: Option<Token>,
    /// Stages, including the implicit one wrapping root jobs or steps
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Resolve the pipeline file `file_ref` with the given runtime parameters
    pub async fn load(
        context: &Context,
        file_ref: &str,
        parameters: Option<&IndexMap<String, Token>>,
    ) -> Result<Self> {
        let document = read_template(context, file_ref, parameters, SchemaName::PipelineRoot).await?;
        let child = context.derive_child(&document, file_ref)?;
        let pipeline = Pipeline::parse(&child, &document).await?;
        info!(
            "Resolved {} into {} stage(s), {} job(s)",
            file_ref,
            pipeline.stages.len(),
            pipeline.stages.iter().map(|s| s.jobs.len()).sum::<usize>()
        );
        Ok(pipeline)
    }

    /// Build the model from a resolved `pipeline-root` mapping
    #[async_recursion]
    pub async fn parse<'a>(context: &'a Context, token: &'a Token) -> Result<Pipeline> {
        let entries = token.assert_mapping("pipeline-root")?;
        let mut pipeline = Pipeline::default();
        let mut parent = None;
        let mut declares_stages = false;
        let mut unparsed = Vec::new();
        let mut errors = context.error_collector();

        for (key, value) in entries {
            let parsed = match key.as_str() {
                Some("parameters") => Ok(()),
                Some("extends") => parse_extends(context, value)
                    .await
                    .map(|extended| parent = Some(extended)),
                Some("stages") => {
                    declares_stages = true;
                    parse_stages(context, value).await.map(|stages| pipeline.stages = stages)
                }
                _ => pipeline.parse_key(context, key, value, &mut unparsed).await,
            };
            if let Err(e) = parsed {
                context.collect(&mut errors, &e);
            }
        }

        let has_jobs = unparsed.iter().any(|(k, _)| k.as_str() == Some("jobs"));
        let has_steps = unparsed.iter().any(|(k, _)| k.as_str() == Some("steps"));
        if parent.is_some() || declares_stages {
            if parent.is_some() && declares_stages {
                errors.add(format!(
                    "{}stages cannot be declared together with extends",
                    context.location(token)
                ));
            }
            for (key, _) in &unparsed {
                context.collect(&mut errors, &unexpected_key(context, key));
            }
        } else if has_jobs {
            debug!("Wrapping root jobs into an implicit stage");
            let body = Token::mapping(unparsed).at(token.position);
            match Stage::parse_with(context, &body, true).await {
                Ok(stage) => pipeline.stages = vec![stage],
                Err(e) => context.collect(&mut errors, &e),
            }
        } else if has_steps {
            debug!("Wrapping root steps into an implicit job");
            let body = Token::mapping(unparsed).at(token.position);
            match Job::parse_with(context, &body, true).await {
                Ok(job) => {
                    pipeline.stages = vec![Stage {
                        jobs: vec![job],
                        ..Default::default()
                    }]
                }
                Err(e) => context.collect(&mut errors, &e),
            }
        } else {
            for (key, _) in &unparsed {
                context.collect(&mut errors, &unexpected_key(context, key));
            }
        }

        errors.check()?;
        if let Some(parent) = parent {
            pipeline.adopt(parent);
        }
        Ok(pipeline)
    }

    async fn parse_key(
        &mut self,
        context: &Context,
        key: &Token,
        value: &Token,
        unparsed: &mut Vec<(Token, Token)>,
    ) -> Result<()> {
        match key.as_str() {
            Some("name") => self.name = Some(value.assert_literal_string("name")?),
            Some("variables") => {
                let mut variables = VariableMap::new();
                parse_variables(context, &mut variables, value, None).await?;
                self.variables = Some(variables);
            }
            Some("resources") => {
                for (kind, resources) in value.assert_mapping("resources")? {
                    match kind.as_str() {
                        Some("containers") => {
                            for item in resources.assert_sequence("containers")? {
                                let alias = item
                                    .get("container")
                                    .ok_or_else(|| item.error("A container resource requires a container alias"))?
                                    .assert_literal_string("container")?;
                                self.container_resources.insert(alias, Container::parse(context, item)?);
                            }
                        }
                        _ => {
                            self.other_resources
                                .insert(kind.assert_literal_string("resource kind")?, resources.clone());
                        }
                    }
                }
            }
            Some("pool") => self.pool = Some(Pool::parse(context, value)?),
            Some("appendCommitMessageToRunName") => {
                self.append_commit_message_to_run_name = Some(value.assert_boolean("appendCommitMessageToRunName")?)
            }
            Some("lockBehavior") => self.lock_behavior = Some(value.assert_literal_string("lockBehavior")?),
            Some("trigger") => self.trigger = Some(value.clone()),
            Some("pr") => self.pr = Some(value.clone()),
            Some("schedules") => self.schedules = Some(value.clone()),
            _ => unparsed.push((key.clone(), value.clone())),
        }
        Ok(())
    }

    /// Take over the stages of an `extends` parent, merging resources and variables
    ///
    /// Entries declared here overwrite parent entries with the same key.
    fn adopt(&mut self, parent: Pipeline) {
        self.stages = parent.stages;

        let mut containers = parent.container_resources;
        containers.extend(std::mem::take(&mut self.container_resources));
        self.container_resources = containers;

        let mut others = parent.other_resources;
        for (kind, resources) in std::mem::take(&mut self.other_resources) {
            if let (Some(TokenKind::Sequence(existing)), TokenKind::Sequence(items)) =
                (others.get_mut(&kind).map(|t| &mut t.kind), &resources.kind)
            {
                existing.extend(items.iter().cloned());
                continue;
            }
            others.insert(kind, resources);
        }
        self.other_resources = others;

        self.variables = match (parent.variables, self.variables.take()) {
            (Some(mut merged), Some(own)) => {
                merged.extend(&own);
                Some(merged)
            }
            (inherited, own) => own.or(inherited),
        };

        self.name = self.name.take().or(parent.name);
        self.pool = self.pool.take().or(parent.pool);
        self.lock_behavior = self.lock_behavior.take().or(parent.lock_behavior);
        self.append_commit_message_to_run_name = self
            .append_commit_message_to_run_name
            .or(parent.append_commit_message_to_run_name);
        self.trigger = self.trigger.take().or(parent.trigger);
        self.pr = self.pr.take().or(parent.pr);
        self.schedules = self.schedules.take().or(parent.schedules);
    }

    /// Fill in defaults the runtime assigns and report what would fail once queued
    ///
    /// Unnamed stages and jobs get generated names, stages without `dependsOn`
    /// follow the previous stage, and jobs without a pool inherit one.
    pub fn check_for_runtime_failure(&mut self) -> Result<()> {
        let name_pattern = Regex::new(NAME_PATTERN).map_err(|e| ResolveError::validation(e.to_string()))?;
        let mut errors = ValidationErrors::default();
        if let Err(message) = self
            .initialize_names(&name_pattern)
            .and_then(|_| self.check_dependency_chain())
        {
            errors.add(message);
        }
        self.check_runtime_expressions(&mut errors);
        errors.check()
    }

    fn initialize_names(&mut self, pattern: &Regex) -> std::result::Result<(), String> {
        let mut stage_names = NameBuilder::new(pattern);
        stage_names.add_known(self.stages.iter().filter_map(|s| s.name.as_deref()))?;

        for index in 0..self.stages.len() {
            if self.stages[index].depends_on.is_none() && index > 0 {
                let previous = self.stages[index - 1].name.clone();
                self.stages[index].depends_on = Some(previous.into_iter().collect());
            }
            let pipeline_pool = self.pool.clone();
            let stage = &mut self.stages[index];
            if stage.name.is_none() {
                stage.name = Some(stage_names.generate("Stage"));
            }

            let mut job_names = NameBuilder::new(pattern);
            job_names.add_known(stage.jobs.iter().filter_map(|j| j.name.as_deref()))?;
            for job in &mut stage.jobs {
                if job.name.is_none() {
                    job.name = Some(job_names.generate("Job"));
                }
                if job.pool.is_none() {
                    job.pool = stage.pool.clone().or_else(|| pipeline_pool.clone());
                }
            }
        }
        Ok(())
    }

    fn check_dependency_chain(&self) -> std::result::Result<(), String> {
        for stage in &self.stages {
            let jobs: Vec<(&str, &[String])> = stage
                .jobs
                .iter()
                .map(|j| (j.name.as_deref().unwrap_or_default(), j.depends_on.as_deref().unwrap_or_default()))
                .collect();
            check_graph(&jobs)?;
        }
        let stages: Vec<(&str, &[String])> = self
            .stages
            .iter()
            .map(|s| (s.name.as_deref().unwrap_or_default(), s.depends_on.as_deref().unwrap_or_default()))
            .collect();
        check_graph(&stages)
    }

    fn check_runtime_expressions(&self, errors: &mut ValidationErrors) {
        check_variable_expressions(errors, self.variables.as_ref());
        for stage in &self.stages {
            check_variable_expressions(errors, stage.variables.as_ref());
            check_condition(errors, stage.condition.as_deref(), STAGE_CONDITION_VALUES);
            for job in &stage.jobs {
                check_variable_expressions(errors, job.variables.as_ref());
                check_condition(errors, job.condition.as_deref(), JOB_CONDITION_VALUES);
                check_runtime_expression(errors, job.continue_on_error.as_deref());
                if let Some(Strategy::Matrix {
                    matrix: Matrix::Expression(expression),
                    ..
                }) = &job.strategy
                {
                    check_runtime_expression(errors, Some(expression));
                }
                if let Some(container) = &job.container {
                    check_runtime_expression(errors, container.alias.as_deref().or(container.image.as_deref()));
                }
                for step in &job.steps {
                    check_condition(errors, step.condition.as_deref(), STEP_CONDITION_VALUES);
                }
            }
        }
    }
}

async fn parse_extends(context: &Context, value: &Token) -> Result<Pipeline> {
    let reference = TemplateReference::from_entry(value)?.ok_or_else(|| {
        let found = value.first_key().unwrap_or_default();
        value.error(format!("Unexpected yaml key {} expected template", found))
    })?;
    let template = read_template(
        context,
        &reference.path,
        reference.parameters.as_ref(),
        SchemaName::ExtendTemplateRoot,
    )
    .await
    .map_err(|e| wrap_include_error(context, value, e))?;
    let child = context.derive_child(&template, &reference.path)?;
    debug!("Parsing extended pipeline {}", reference.path);
    Pipeline::parse(&child, &template)
        .await
        .map_err(|e| wrap_include_error(context, value, e))
}

/// Generates `Stage`, `Stage_2`, ... while keeping declared names unique
struct NameBuilder<'a> {
    pattern: &'a Regex,
    used: HashSet<String>,
}

impl<'a> NameBuilder<'a> {
    fn new(pattern: &'a Regex) -> Self {
        Self {
            pattern,
            used: HashSet::new(),
        }
    }

    fn add_known<'n>(&mut self, names: impl Iterator<Item = &'n str>) -> std::result::Result<(), String> {
        let mut problems = Vec::new();
        for name in names {
            if !self.pattern.is_match(name) {
                problems.push(format!(
                    "The identifier '{}' is invalid. IDs may only contain alphanumeric characters, '_', and may not start with a number.",
                    name
                ));
            } else if !self.used.insert(name.to_lowercase()) {
                problems.push(format!(
                    "The identifier '{}' may not be used more than once within the same scope.",
                    name
                ));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join(". "))
        }
    }

    fn generate(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut suffix = 1;
        while self.used.contains(&candidate.to_lowercase()) {
            suffix += 1;
            candidate = format!("{}_{}", base, suffix);
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }
}

/// Depth-first walk over `dependsOn` edges, reporting missing targets and cycles
fn check_graph(nodes: &[(&str, &[String])]) -> std::result::Result<(), String> {
    let index: HashMap<String, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.to_lowercase(), i))
        .collect();
    let mut done = HashSet::new();
    let mut stack = Vec::new();
    for node in 0..nodes.len() {
        visit(node, nodes, &index, &mut stack, &mut done)?;
    }
    Ok(())
}

fn visit(
    node: usize,
    nodes: &[(&str, &[String])],
    index: &HashMap<String, usize>,
    stack: &mut Vec<usize>,
    done: &mut HashSet<usize>,
) -> std::result::Result<(), String> {
    if done.contains(&node) {
        return Ok(());
    }
    let (name, depends_on) = nodes[node];
    let missing: Vec<&str> = depends_on
        .iter()
        .filter(|d| !index.contains_key(&d.to_lowercase()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "{}: One or more missing dependencies detected: {}",
            name,
            missing.join(", ")
        ));
    }

    stack.push(node);
    for dependency in depends_on {
        let target = index[&dependency.to_lowercase()];
        if stack.contains(&target) {
            return Err(format!("{}: Cyclic dependency to {} detected", name, nodes[target].0));
        }
        visit(target, nodes, index, stack, done)?;
    }
    stack.pop();
    done.insert(node);
    Ok(())
}

fn check_variable_expressions(errors: &mut ValidationErrors, variables: Option<&VariableMap>) {
    for (_, variable) in variables.into_iter().flat_map(VariableMap::iter) {
        check_runtime_expression(errors, Some(&variable.value));
    }
}

/// Check a `$[ ]` value; anything else is left alone
fn check_runtime_expression(errors: &mut ValidationErrors, value: Option<&str>) {
    let Some(body) = value.and_then(|v| v.strip_prefix("$[")).and_then(|v| v.strip_suffix(']')) else {
        return;
    };
    if let Err(e) = parse(body, ExpressionFlags::default()).and_then(|expr| validate_named_values(&expr, RUNTIME_VALUES)) {
        errors.add(e.to_string());
    }
}

fn check_condition(errors: &mut ValidationErrors, condition: Option<&str>, allowed: &[&str]) {
    let Some(condition) = condition else {
        return;
    };
    if let Err(e) = parse(condition, ExpressionFlags::default()).and_then(|expr| validate_named_values(&expr, allowed)) {
        errors.add(e.to_string());
    }
}

impl ToContextData for Pipeline {
    fn to_context_data(&self) -> Token {
        let mut entries = Vec::new();
        if let Some(name) = &self.name {
            entries.push(entry("name", Token::string(name.clone())));
        }
        if let Some(variables) = &self.variables {
            entries.push(entry("variables", variables.to_context_data()));
        }
        if let Some(append) = self.append_commit_message_to_run_name {
            entries.push(entry("appendCommitMessageToRunName", Token::boolean(append)));
        }
        for (key, value) in [("trigger", &self.trigger), ("pr", &self.pr), ("schedules", &self.schedules)] {
            if let Some(value) = value {
                entries.push(entry(key, value.clone()));
            }
        }
        if !self.container_resources.is_empty() || !self.other_resources.is_empty() {
            let mut resources = Vec::new();
            if !self.container_resources.is_empty() {
                let containers = self
                    .container_resources
                    .iter()
                    .map(|(alias, container)| container.to_named_context_data(Some(alias)))
                    .collect();
                resources.push(entry("containers", Token::sequence(containers)));
            }
            for (kind, value) in &self.other_resources {
                resources.push(entry(kind, value.clone()));
            }
            entries.push(entry("resources", Token::mapping(resources)));
        }
        entries.push(entry(
            "stages",
            Token::sequence(self.stages.iter().map(ToContextData::to_context_data).collect()),
        ));
        if let Some(pool) = &self.pool {
            entries.push(entry("pool", pool.to_context_data()));
        }
        if let Some(lock_behavior) = &self.lock_behavior {
            entries.push(entry("lockBehavior", Token::string(lock_behavior.clone())));
        }
        Token::mapping(entries)
    }
}
