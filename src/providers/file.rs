//! File providers for template contents

use super::FileProvider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Strip the leading `/` or `./` that marks a repository-root path
fn normalize(path: &str) -> &str {
    let trimmed = path.trim_start_matches('/');
    trimmed.strip_prefix("./").unwrap_or(trimmed)
}

/// Repository name without its `@ref` suffix
fn repository_name(repository_and_ref: &str) -> &str {
    repository_and_ref
        .split_once('@')
        .map(|(name, _)| name)
        .unwrap_or(repository_and_ref)
}

/// Reads templates from directories on disk
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    root: PathBuf,
    repositories: HashMap<String, PathBuf>,
}

impl LocalFileProvider {
    /// Provider rooted at the checkout of the pipeline's own repository
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            repositories: HashMap::new(),
        }
    }

    /// Map a repository (`name` or `name@ref`) to a local checkout
    pub fn with_repository(mut self, repository: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.repositories.insert(repository.into(), path.into());
        self
    }

    fn base_for(&self, repository: Option<&str>) -> Option<&Path> {
        match repository {
            None => Some(&self.root),
            Some(repo) => self
                .repositories
                .get(repo)
                .or_else(|| self.repositories.get(repository_name(repo)))
                .map(PathBuf::as_path),
        }
    }
}

#[async_trait]
impl FileProvider for LocalFileProvider {
    async fn read_file(&self, repository_and_ref: Option<&str>, path: &str) -> Option<String> {
        let Some(base) = self.base_for(repository_and_ref) else {
            debug!("No checkout configured for repository {:?}", repository_and_ref);
            return None;
        };
        let full_path = base.join(normalize(path));
        match tokio::fs::read_to_string(&full_path).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("Failed to read {}: {}", full_path.display(), e);
                None
            }
        }
    }
}

/// Serves templates from memory, keyed by repository and path
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileProvider {
    files: HashMap<(Option<String>, String), String>,
}

impl InMemoryFileProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the root repository
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.add_file(None, path, content);
        self
    }

    /// Add a file to a named repository (`name` or `name@ref`)
    pub fn with_repository_file(mut self, repository: &str, path: &str, content: &str) -> Self {
        self.add_file(Some(repository), path, content);
        self
    }

    pub fn add_file(&mut self, repository: Option<&str>, path: &str, content: &str) {
        self.files.insert(
            (repository.map(str::to_string), normalize(path).to_string()),
            content.to_string(),
        );
    }
}

#[async_trait]
impl FileProvider for InMemoryFileProvider {
    async fn read_file(&self, repository_and_ref: Option<&str>, path: &str) -> Option<String> {
        let path = normalize(path).to_string();
        let exact = (repository_and_ref.map(str::to_string), path.clone());
        if let Some(content) = self.files.get(&exact) {
            return Some(content.clone());
        }
        let repo = repository_and_ref?;
        self.files
            .get(&(Some(repository_name(repo).to_string()), path))
            .cloned()
    }
}
