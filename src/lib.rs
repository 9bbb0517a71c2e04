//! pipeline-resolver - template, parameter and variable resolution for YAML build pipelines

pub mod cli;
pub mod core;
pub mod error;
pub mod expression;
pub mod providers;
pub mod template;

// Re-export commonly used types
pub use crate::core::{Context, Job, Pipeline, ResolverConfig, Stage, Step, ToContextData};
pub use error::{ResolveError, Result};
pub use providers::{FileProvider, InMemoryFileProvider, LocalFileProvider, StaticVariablesProvider};
pub use template::{read_template, relative_to, SchemaName, Token};
