//! Resolution context threaded through every parse and template read

use super::config::ResolverConfig;
use crate::error::{ResolveError, Result};
use crate::expression::ExpressionFlags;
use crate::providers::{FileProvider, TaskByNameAndVersionProvider, TraceWriter, TracingTraceWriter, VariablesProvider};
use crate::template::{parent_dir, relative_to, split_file_ref, FileTable, Token, TokenKind, ValidationErrors};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Repository aliases declared anywhere in the inclusion tree, shared by all contexts
#[derive(Debug, Clone, Default)]
pub struct RepositoryAliases {
    aliases: Arc<Mutex<HashMap<String, String>>>,
}

impl RepositoryAliases {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.aliases.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bind `alias` to a repository identity (`name` or `name@ref`)
    pub fn insert(&self, alias: &str, repository_and_ref: &str) {
        self.lock()
            .insert(alias.to_ascii_lowercase(), repository_and_ref.to_string());
    }

    pub fn get(&self, alias: &str) -> Option<String> {
        self.lock().get(&alias.to_ascii_lowercase()).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Where a template reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLocation {
    pub path: String,
    /// `None` for the root repository
    pub repository: Option<String>,
}

impl TemplateLocation {
    /// Name under which the file is registered in the file table
    pub fn display_name(&self) -> String {
        match &self.repository {
            Some(repository) => format!("{}@{}", self.path, repository),
            None => self.path.clone(),
        }
    }
}

/// Collaborators and position for one template inclusion
///
/// Scalar fields are copied into each child context; the file table and
/// the alias map are shared handles, so ids and aliases registered in a
/// nested template stay visible to the whole tree.
#[derive(Clone)]
pub struct Context {
    pub flags: ExpressionFlags,
    pub file_provider: Arc<dyn FileProvider>,
    pub trace_writer: Arc<dyn TraceWriter>,
    pub variables_provider: Option<Arc<dyn VariablesProvider>>,
    pub task_resolver: Option<Arc<dyn TaskByNameAndVersionProvider>>,
    /// Repository of the template being read; `None` is the root repository
    pub repository_and_ref: Option<String>,
    /// Directory of the template being read
    pub cwd: Option<String>,
    pub repositories: RepositoryAliases,
    pub file_table: FileTable,
    pub config: Arc<ResolverConfig>,
    depth: usize,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("flags", &self.flags)
            .field("repository_and_ref", &self.repository_and_ref)
            .field("cwd", &self.cwd)
            .field("repositories", &self.repositories)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(file_provider: Arc<dyn FileProvider>) -> Self {
        let config = ResolverConfig::default();
        Self {
            flags: config.flags,
            file_provider,
            trace_writer: Arc::new(TracingTraceWriter),
            variables_provider: None,
            task_resolver: None,
            repository_and_ref: None,
            cwd: None,
            repositories: RepositoryAliases::new(),
            file_table: FileTable::new(),
            config: Arc::new(config),
            depth: 0,
        }
    }

    pub fn with_variables_provider(mut self, provider: Arc<dyn VariablesProvider>) -> Self {
        self.variables_provider = Some(provider);
        self
    }

    pub fn with_task_resolver(mut self, resolver: Arc<dyn TaskByNameAndVersionProvider>) -> Self {
        self.task_resolver = Some(resolver);
        self
    }

    pub fn with_trace_writer(mut self, writer: Arc<dyn TraceWriter>) -> Self {
        self.trace_writer = writer;
        self
    }

    pub fn with_flags(mut self, flags: ExpressionFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Apply limits and flags, and register the configured repository aliases
    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.flags = config.flags;
        for alias in config.repositories.keys() {
            if let Some(name) = config.repository_name(alias) {
                self.repositories.insert(alias, &name);
            }
        }
        self.config = Arc::new(config);
        self
    }

    pub fn with_repository(self, alias: &str, repository_and_ref: &str) -> Self {
        self.repositories.insert(alias, repository_and_ref);
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_repository_and_ref(mut self, repository_and_ref: impl Into<String>) -> Self {
        self.repository_and_ref = Some(repository_and_ref.into());
        self
    }

    /// Inclusion depth of this context
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Resolve a `path[@alias]` reference against this context
    pub fn locate(&self, file_ref: &str) -> Result<TemplateLocation> {
        let (file, alias) = split_file_ref(file_ref.trim());
        match alias {
            None => Ok(TemplateLocation {
                path: relative_to(self.cwd.as_deref().unwrap_or(""), file),
                repository: self.repository_and_ref.clone(),
            }),
            Some(alias) if alias.eq_ignore_ascii_case("self") => Ok(TemplateLocation {
                path: relative_to("", file),
                repository: None,
            }),
            Some(alias) => {
                let repository = self
                    .repositories
                    .get(alias)
                    .ok_or_else(|| ResolveError::UnknownRepository(alias.to_string()))?;
                Ok(TemplateLocation {
                    path: relative_to("", file),
                    repository: Some(repository),
                })
            }
        }
    }

    /// Context for reading the templates referenced from `template`, which was loaded from `file_ref`
    pub fn derive_child(&self, template: &Token, file_ref: &str) -> Result<Context> {
        if self.depth >= self.config.max_depth {
            return Err(ResolveError::MaxDepthExceeded(self.config.max_depth));
        }
        let location = self.locate(file_ref)?;
        self.register_repositories(template);

        let mut child = self.clone();
        child.depth = self.depth + 1;
        child.cwd = Some(parent_dir(&location.path));
        child.repository_and_ref = location.repository;
        Ok(child)
    }

    /// Add the aliases under `resources.repositories` to the shared alias map
    pub fn register_repositories(&self, template: &Token) {
        let Some(TokenKind::Sequence(items)) = template
            .get("resources")
            .and_then(|r| r.get("repositories"))
            .map(|r| &r.kind)
        else {
            return;
        };

        for item in items {
            let Some(alias) = item.get("repository").and_then(Token::as_str) else {
                continue;
            };
            let name = item
                .get("name")
                .and_then(Token::literal_text)
                .unwrap_or_else(|| alias.to_string());
            let repository_and_ref = match item.get("ref").and_then(Token::literal_text) {
                Some(reference) if !reference.is_empty() => format!("{}@{}", name, reference),
                _ => name,
            };
            debug!("Registering repository alias {} -> {}", alias, repository_and_ref);
            self.repositories.insert(alias, &repository_and_ref);
        }
    }

    /// Ambient variables from the variables provider
    pub fn ambient_variables(&self) -> IndexMap<String, String> {
        self.variables_provider
            .as_ref()
            .map(|provider| provider.get_variables_for_environment(None))
            .unwrap_or_default()
    }

    /// Members of a variable group; empty when the group is unknown
    pub fn group_variables(&self, group: &str) -> IndexMap<String, String> {
        self.variables_provider
            .as_ref()
            .map(|provider| provider.get_variables_for_environment(Some(group)))
            .unwrap_or_default()
    }

    /// Message prefix locating `token`
    pub fn location(&self, token: &Token) -> String {
        self.file_table.location(&token.position)
    }

    pub fn describe(&self, error: &ResolveError) -> Vec<String> {
        self.file_table.describe(error)
    }

    /// Empty collector with the configured limits
    pub fn error_collector(&self) -> ValidationErrors {
        ValidationErrors::new(self.config.max_errors, self.config.max_message_length)
    }

    /// Append every message of `error` to `errors`
    pub fn collect(&self, errors: &mut ValidationErrors, error: &ResolveError) {
        for message in self.describe(error) {
            errors.add(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemoryFileProvider;

    fn context() -> Context {
        Context::new(Arc::new(InMemoryFileProvider::new()))
    }

    fn repositories_token() -> Token {
        let yaml = r#"
resources:
  repositories:
    - repository: tools
      type: git
      name: org/tools
      ref: refs/heads/main
    - repository: plain
      type: git
"#;
        let value: serde_json::Value = serde_yaml::from_str(yaml).unwrap();
        Token::from_json(&value, Default::default())
    }

    #[test]
    fn test_locate_relative_to_cwd() {
        let ctx = context().with_cwd("/templates/jobs");
        let location = ctx.locate("../steps/build.yml").unwrap();
        assert_eq!(location.path, "/templates/steps/build.yml");
        assert_eq!(location.repository, None);
    }

    #[test]
    fn test_locate_self_alias_uses_root_repository() {
        let ctx = context()
            .with_cwd("nested")
            .with_repository_and_ref("org/tools@main");
        let location = ctx.locate("steps.yml@Self").unwrap();
        assert_eq!(location.path, "steps.yml");
        assert_eq!(location.repository, None);
    }

    #[test]
    fn test_locate_unknown_alias_is_fatal() {
        let err = context().locate("steps.yml@missing").unwrap_err();
        assert!(matches!(err, ResolveError::UnknownRepository(alias) if alias == "missing"));
    }

    #[test]
    fn test_derive_child_registers_shared_aliases() {
        let ctx = context();
        let child = ctx.derive_child(&repositories_token(), "pipelines/main.yml").unwrap();

        assert_eq!(child.cwd.as_deref(), Some("pipelines"));
        assert_eq!(child.depth(), 1);
        assert_eq!(ctx.repositories.get("tools").as_deref(), Some("org/tools@refs/heads/main"));
        assert_eq!(ctx.repositories.get("plain").as_deref(), Some("plain"));

        let location = child.locate("build.yml@tools").unwrap();
        assert_eq!(location.display_name(), "build.yml@org/tools@refs/heads/main");

        let grandchild = child.derive_child(&Token::mapping(vec![]), "build.yml@tools").unwrap();
        assert_eq!(grandchild.repository_and_ref.as_deref(), Some("org/tools@refs/heads/main"));
        assert_eq!(grandchild.locate("other.yml").unwrap().repository, grandchild.repository_and_ref);
    }

    #[test]
    fn test_derive_child_depth_limit() {
        let mut config = ResolverConfig::default();
        config.max_depth = 1;
        let ctx = context().with_config(config);
        let child = ctx.derive_child(&Token::mapping(vec![]), "a.yml").unwrap();
        let err = child.derive_child(&Token::mapping(vec![]), "b.yml").unwrap_err();
        assert!(matches!(err, ResolveError::MaxDepthExceeded(1)));
    }
}
