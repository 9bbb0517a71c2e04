//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ResolveCommand, ValidateCommand};
use std::ffi::OsString;

/// Resolve templated YAML pipelines into their final form
#[derive(Debug, Parser, Clone)]
#[command(name = "pipeline-resolver")]
#[command(author = "Pipeline Resolver Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Resolve templates, parameters and variables of YAML build pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to resolver configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Resolve a pipeline and print the result
    Resolve(ResolveCommand),

    /// Resolve a pipeline and report every problem found
    Validate(ValidateCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
