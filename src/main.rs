use anyhow::{Context as _, Result};
use pipeline_resolver::cli::commands::{ResolveCommand, SourceArgs, ValidateCommand};
use pipeline_resolver::cli::output::*;
use pipeline_resolver::cli::{Cli, Command};
use pipeline_resolver::{Context, Pipeline, ResolveError, ResolverConfig, ToContextData};
use tracing::error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    let config = match &cli.config {
        Some(path) => ResolverConfig::from_file(path)
            .with_context(|| format!("Failed to load resolver config {}", path))?,
        None => ResolverConfig::default(),
    };

    // Execute command
    match &cli.command {
        Command::Resolve(cmd) => resolve_pipeline(cmd, config).await?,
        Command::Validate(cmd) => validate_pipeline(cmd, config).await?,
    }

    Ok(())
}

/// Resolve the pipeline named by `source`, exiting with the collected errors on failure
async fn load(source: &SourceArgs, config: ResolverConfig, checks: bool) -> Result<(Pipeline, String)> {
    let (context, file_ref) = source.context(config)?;
    let parameters = source.parameters();
    let parameters = (!parameters.is_empty()).then_some(&parameters);

    let mut pipeline = match Pipeline::load(&context, &file_ref, parameters).await {
        Ok(pipeline) => pipeline,
        Err(e) => fail(&context, &file_ref, &e),
    };
    if checks {
        if let Err(e) = pipeline.check_for_runtime_failure() {
            fail(&context, &file_ref, &e);
        }
    }
    Ok((pipeline, file_ref))
}

fn fail(context: &Context, file_ref: &str, err: &ResolveError) -> ! {
    let messages = context.describe(err);
    error!("Resolving {} failed with {} error(s)", file_ref, messages.len());
    println!("{} {} {}", CROSS, style(file_ref).bold(), style("is invalid:").red());
    println!("{}", format_errors(&messages));
    std::process::exit(1);
}

async fn resolve_pipeline(cmd: &ResolveCommand, config: ResolverConfig) -> Result<()> {
    let (pipeline, file_ref) = load(&cmd.source, config, !cmd.no_checks).await?;

    if cmd.json {
        let json = serde_json::to_string_pretty(&pipeline.to_context_data())?;
        println!("{}", json);
        return Ok(());
    }

    println!("{} Resolved {}", INFO, style(&file_ref).bold());
    println!("{}", format_pipeline(&pipeline));
    println!("\n{} {}", CHECK, format_counts(&pipeline));
    Ok(())
}

async fn validate_pipeline(cmd: &ValidateCommand, config: ResolverConfig) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let (pipeline, file_ref) = load(&cmd.source, config, true).await?;
    if pipeline.stages.iter().all(|s| s.jobs.is_empty()) {
        println!("{} {} declares no jobs", WARN, style(&file_ref).bold());
    }
    println!("{} Pipeline is valid!", CHECK);
    println!("  {}", format_counts(&pipeline));
    Ok(())
}
