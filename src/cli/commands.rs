//! CLI command definitions

use crate::core::config::{RepositoryConfig, ResolverConfig};
use crate::core::Context;
use crate::template::{Position, Token};
use anyhow::{Context as _, Result};
use clap::Args;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the pipeline comes from and what it is resolved with
#[derive(Debug, Args, Clone)]
pub struct SourceArgs {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Repository root templates are resolved against (defaults to the file's directory)
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Repository checkouts (alias=path)
    #[arg(long, value_parser = parse_key_value)]
    pub repository: Vec<(String, String)>,

    /// Ambient variables (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Runtime parameters (key=value, values are read as YAML)
    #[arg(long, value_parser = parse_key_value)]
    pub parameter: Vec<(String, String)>,
}

/// Resolve a pipeline
#[derive(Debug, Args, Clone)]
pub struct ResolveCommand {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Print the resolved document as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip the runtime checks (names, dependencies, runtime expressions)
    #[arg(long)]
    pub no_checks: bool,
}

/// Validate a pipeline
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    #[command(flatten)]
    pub source: SourceArgs,
}

impl SourceArgs {
    /// Build the resolution context and the reference of the pipeline file within the root
    pub fn context(&self, mut config: ResolverConfig) -> Result<(Context, String)> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => self
                .file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let file_ref = self
            .file
            .strip_prefix(&root)
            .unwrap_or(&self.file)
            .to_string_lossy()
            .replace('\\', "/");

        for (alias, path) in &self.repository {
            config.repositories.insert(
                alias.clone(),
                RepositoryConfig {
                    path: PathBuf::from(path),
                    name: None,
                },
            );
        }
        for (name, value) in &self.variable {
            config = config.with_variable(name.clone(), value.clone());
        }
        config.validate().context("Invalid resolver configuration")?;

        let mut context = Context::new(Arc::new(config.file_provider(root)))
            .with_variables_provider(Arc::new(config.variables_provider()));
        if let Some(tasks) = config.task_provider() {
            context = context.with_task_resolver(Arc::new(tasks));
        }
        Ok((context.with_config(config), file_ref))
    }

    /// Runtime parameters as document values
    pub fn parameters(&self) -> IndexMap<String, Token> {
        let mut parameters = IndexMap::new();
        for (name, raw) in &self.parameter {
            let value = serde_yaml::from_str::<serde_json::Value>(raw)
                .unwrap_or_else(|_| serde_json::Value::String(raw.clone()));
            parameters.insert(name.clone(), Token::from_json(&value, Position::default()));
        }
        parameters
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("env=prod=east").unwrap(),
            ("env".to_string(), "prod=east".to_string())
        );
        assert!(parse_key_value("env").is_err());
    }

    #[test]
    fn test_resolve_arguments() {
        let cli = Cli::try_parse_from([
            "pipeline-resolver",
            "--verbose",
            "resolve",
            "-f",
            "ci/azure-pipelines.yml",
            "--repository",
            "tools=../tools",
            "--parameter",
            "targets=[a, b]",
            "--json",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Resolve(cmd) = cli.command else {
            panic!("expected resolve");
        };
        assert!(cmd.json);
        assert!(!cmd.no_checks);
        assert_eq!(cmd.source.repository, vec![("tools".to_string(), "../tools".to_string())]);

        let parameters = cmd.source.parameters();
        assert_eq!(
            parameters["targets"],
            Token::sequence(vec![Token::string("a"), Token::string("b")])
        );
    }

    #[test]
    fn test_file_reference_is_relative_to_root() {
        let cli = Cli::try_parse_from(["pipeline-resolver", "validate", "-f", "repo/ci/build.yml", "--root", "repo"])
            .unwrap();
        let Command::Validate(cmd) = cli.command else {
            panic!("expected validate");
        };
        let (_, file_ref) = cmd.source.context(ResolverConfig::default()).unwrap();
        assert_eq!(file_ref, "ci/build.yml");
    }
}
