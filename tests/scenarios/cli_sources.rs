//! Test: command-line sources resolve templates from disk checkouts

use crate::helpers::*;
use pipeline_resolver::cli::{Cli, Command};
use pipeline_resolver::{Pipeline, ResolverConfig};
use std::fs;
use std::path::{Path, PathBuf};

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pipeline-resolver-cli-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &Path, path: &str, content: &str) {
    let full_path = dir.join(path);
    fs::create_dir_all(full_path.parent().unwrap()).unwrap();
    fs::write(full_path, content).unwrap();
}

#[tokio::test]
async fn test_resolve_command_reads_repository_checkouts() {
    let dir = scratch_dir();
    write(
        &dir,
        "app/ci/azure-pipelines.yml",
        r#"
parameters:
  - name: toolchain
    type: string
    default: stable
resources:
  repositories:
    - repository: shared
      type: git
jobs:
  - template: jobs/rust.yml@shared
    parameters:
      toolchain: ${{ parameters.toolchain }}
"#,
    );
    write(
        &dir,
        "shared/jobs/rust.yml",
        "parameters:\n  toolchain: stable\njobs:\n  - job: rust\n    steps:\n      - script: rustup default ${{ parameters.toolchain }} && echo $(Agent.Name)\n",
    );

    let file = dir.join("app/ci/azure-pipelines.yml");
    let checkout = dir.join("shared");
    let cli = Cli::try_parse_from([
        "pipeline-resolver".to_string(),
        "resolve".to_string(),
        "-f".to_string(),
        file.to_string_lossy().to_string(),
        "--root".to_string(),
        dir.join("app").to_string_lossy().to_string(),
        "--repository".to_string(),
        format!("shared={}", checkout.to_string_lossy()),
        "--parameter".to_string(),
        "toolchain=nightly".to_string(),
    ])
    .unwrap();
    let Command::Resolve(cmd) = cli.command else {
        panic!("expected resolve");
    };

    let (ctx, file_ref) = cmd.source.context(ResolverConfig::default()).unwrap();
    assert_eq!(file_ref, "ci/azure-pipelines.yml");
    let params = cmd.source.parameters();
    let pipeline = Pipeline::load(&ctx, &file_ref, Some(&params)).await.unwrap();

    assert_eq!(
        single_step_inputs(&pipeline).get("script").map(String::as_str),
        Some("rustup default nightly && echo $(Agent.Name)")
    );
    fs::remove_dir_all(dir).unwrap();
}

#[tokio::test]
async fn test_config_file_supplies_ambient_variables() {
    let dir = scratch_dir();
    write(&dir, "resolver.yml", "variables:\n  Build.SourceBranchName: main\nmax_errors: 5\n");
    write(
        &dir,
        "azure-pipelines.yml",
        "steps:\n  - ${{ if eq(variables['Build.SourceBranchName'], 'main') }}:\n    - script: publish\n  - script: test\n",
    );

    let config = ResolverConfig::from_file(dir.join("resolver.yml")).unwrap();
    assert_eq!(config.max_errors, 5);
    let cli = Cli::try_parse_from([
        "pipeline-resolver".to_string(),
        "validate".to_string(),
        "-f".to_string(),
        dir.join("azure-pipelines.yml").to_string_lossy().to_string(),
    ])
    .unwrap();
    let Command::Validate(cmd) = cli.command else {
        panic!("expected validate");
    };

    let (ctx, file_ref) = cmd.source.context(config).unwrap();
    let pipeline = resolve(&ctx, &file_ref, None).await.unwrap();
    let steps = &pipeline.stages[0].jobs[0].steps;
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("publish"));
    fs::remove_dir_all(dir).unwrap();
}
