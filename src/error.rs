//! Error types for template and pipeline resolution

use crate::expression::ExpressionError;
use crate::template::TokenError;
use thiserror::Error;

/// Result alias used throughout the resolver
pub type Result<T> = std::result::Result<T, ResolveError>;

/// A single collected validation problem
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors raised while resolving templates and parsing the pipeline model
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Aggregated validation errors, raised at checkpoints
    #[error("{}", join_messages(.0))]
    Validation(Vec<ValidationError>),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Unknown repository alias '{0}'")]
    UnknownRepository(String),

    #[error("{}", describe_missing(.path, .repository))]
    TemplateNotFound {
        path: String,
        repository: Option<String>,
    },

    #[error("{location}This parameter type is not supported: {type_name}")]
    UnsupportedParameterType { type_name: String, location: String },

    #[error("{location}{message}")]
    InvalidParameterValue { message: String, location: String },

    #[error("Failed to resolve task {0}")]
    UnresolvedTask(String),

    #[error("Maximum template depth of {0} exceeded")]
    MaxDepthExceeded(usize),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolveError {
    /// Build a validation error from a single message
    pub fn validation(message: impl Into<String>) -> Self {
        ResolveError::Validation(vec![ValidationError::new(message)])
    }

    /// Whether this error came from the collector rather than an immediate failure
    pub fn is_validation(&self) -> bool {
        matches!(self, ResolveError::Validation(_))
    }

    /// All messages carried by this error, one per collected problem
    pub fn messages(&self) -> Vec<String> {
        match self {
            ResolveError::Validation(errors) => errors.iter().map(|e| e.message.clone()).collect(),
            other => vec![other.to_string()],
        }
    }
}

fn join_messages(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_missing(path: &str, repository: &Option<String>) -> String {
    match repository {
        Some(repo) => format!("File {} not found in repository {}", path, repo),
        None => format!("File {} not found", path),
    }
}
