//! Resolver configuration from YAML

use crate::expression::ExpressionFlags;
use crate::providers::{LocalFileProvider, StaticTaskProvider, StaticVariablesProvider, TaskMetaData};
use crate::template::errors::{DEFAULT_MAX_ERRORS, DEFAULT_MAX_MESSAGE_LENGTH};
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_DEPTH: usize = 100;

/// A repository checkout that templates may be loaded from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory holding the checkout
    pub path: PathBuf,

    /// Repository identity (`name` or `name@ref`); defaults to the alias
    #[serde(default)]
    pub name: Option<String>,
}

/// Limits, expression flags and ambient data for a resolution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Maximum number of validation errors kept per checkpoint
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,

    /// Validation messages longer than this are truncated
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Maximum template inclusion and object nesting depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default)]
    pub flags: ExpressionFlags,

    /// Ambient variables visible to every template
    #[serde(default)]
    variables: IndexMap<String, Value>,

    /// Variable groups by name
    #[serde(default)]
    variable_groups: IndexMap<String, IndexMap<String, Value>>,

    /// Repository aliases to local checkouts
    #[serde(default)]
    pub repositories: IndexMap<String, RepositoryConfig>,

    /// Task catalog used to resolve `task:` steps
    #[serde(default)]
    pub tasks: Vec<TaskMetaData>,
}

fn default_max_errors() -> usize {
    DEFAULT_MAX_ERRORS
}

fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            max_depth: DEFAULT_MAX_DEPTH,
            flags: ExpressionFlags::default(),
            variables: IndexMap::new(),
            variable_groups: IndexMap::new(),
            repositories: IndexMap::new(),
            tasks: Vec::new(),
        }
    }
}

/// Text of a scalar config value; collections fall back to their YAML form
fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

impl ResolverConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ResolverConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_errors == 0 {
            anyhow::bail!("max_errors must be at least 1");
        }
        if self.max_depth == 0 {
            anyhow::bail!("max_depth must be at least 1");
        }
        if self.max_message_length < 20 {
            anyhow::bail!(
                "max_message_length must be at least 20, got {}",
                self.max_message_length
            );
        }
        for (alias, repository) in &self.repositories {
            if alias.eq_ignore_ascii_case("self") {
                anyhow::bail!("Repository alias 'self' is reserved");
            }
            if repository.path.as_os_str().is_empty() {
                anyhow::bail!("Repository '{}' has an empty path", alias);
            }
        }
        Ok(())
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), Value::String(value.into()));
        self
    }

    /// Ambient variables as strings
    pub fn variables(&self) -> IndexMap<String, String> {
        self.variables
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect()
    }

    /// Repository identity an alias maps to
    pub fn repository_name(&self, alias: &str) -> Option<String> {
        self.repositories
            .get(alias)
            .map(|repo| repo.name.clone().unwrap_or_else(|| alias.to_string()))
    }

    pub fn variables_provider(&self) -> StaticVariablesProvider {
        let mut provider = StaticVariablesProvider::new();
        for (name, value) in self.variables() {
            provider = provider.with_variable(name, value);
        }
        for (group, members) in &self.variable_groups {
            let members = members
                .iter()
                .map(|(k, v)| (k.clone(), scalar_to_string(v)))
                .collect();
            provider = provider.with_group(group.clone(), members);
        }
        provider
    }

    /// Task resolver, when a catalog is configured
    pub fn task_provider(&self) -> Option<StaticTaskProvider> {
        if self.tasks.is_empty() {
            None
        } else {
            Some(StaticTaskProvider::new(self.tasks.clone()))
        }
    }

    /// File provider over `root` plus every configured repository checkout
    pub fn file_provider<P: Into<PathBuf>>(&self, root: P) -> LocalFileProvider {
        self.repositories
            .iter()
            .fold(LocalFileProvider::new(root), |provider, (alias, repo)| {
                let name = repo.name.clone().unwrap_or_else(|| alias.clone());
                provider.with_repository(name, repo.path.clone())
            })
    }
}
