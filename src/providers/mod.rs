//! Collaborators the resolver calls out to
//!
//! File access, ambient variables, task lookup and trace output are all
//! behind traits so that embedders can supply their own implementations.

pub mod file;
pub mod tasks;
pub mod trace;
pub mod variables;

pub use file::{InMemoryFileProvider, LocalFileProvider};
pub use tasks::{StaticTaskProvider, TaskMetaData, TaskVersion};
pub use trace::TracingTraceWriter;
pub use variables::StaticVariablesProvider;

use async_trait::async_trait;
use indexmap::IndexMap;

/// Source of template file contents
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// Read `path` from the given repository (`None` is the root repository)
    async fn read_file(&self, repository_and_ref: Option<&str>, path: &str) -> Option<String>;
}

/// Source of ambient variables and variable group members
pub trait VariablesProvider: Send + Sync {
    /// Variables for a named group, or the ambient variables when `name` is `None`
    fn get_variables_for_environment(&self, name: Option<&str>) -> IndexMap<String, String>;
}

/// Resolves `task:` references such as `Bash@3`
pub trait TaskByNameAndVersionProvider: Send + Sync {
    fn resolve(&self, name_and_version: &str) -> Option<TaskMetaData>;
}

/// Receives evaluation traces
pub trait TraceWriter: Send + Sync {
    fn info(&self, message: &str);
    fn verbose(&self, message: &str);
    fn error(&self, message: &str);
}
