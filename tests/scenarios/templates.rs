//! Test: template references resolve against directories and repositories

use crate::helpers::*;
use pipeline_resolver::{Context, InMemoryFileProvider, ResolverConfig};
use std::sync::Arc;

#[tokio::test]
async fn test_nested_templates_resolve_relative_to_their_directory() {
    let ctx = context(&[
        (
            "ci/azure-pipelines.yml",
            "steps:\n  - template: ../templates/build.yml\n    parameters:\n      configuration: release\n",
        ),
        (
            "templates/build.yml",
            r#"
parameters:
  - name: configuration
    type: string
    values: [debug, release]
steps:
  - script: cargo build --${{ parameters.configuration }}
  - template: common/test.yml
"#,
        ),
        ("templates/common/test.yml", "steps:\n  - script: cargo test\n"),
    ]);
    let pipeline = resolve(&ctx, "ci/azure-pipelines.yml", None).await.unwrap();

    let scripts: Vec<_> = pipeline.stages[0].jobs[0]
        .steps
        .iter()
        .filter_map(|s| s.inputs.get("script").cloned())
        .collect();
    assert_eq!(scripts, vec!["cargo build --release", "cargo test"]);
}

#[tokio::test]
async fn test_repository_alias_reads_from_that_repository() {
    let provider = InMemoryFileProvider::new()
        .with_file(
            "azure-pipelines.yml",
            r#"
resources:
  repositories:
    - repository: tools
      type: git
      name: org/tools
      ref: refs/heads/main
jobs:
  - template: jobs/lint.yml@tools
"#,
        )
        .with_repository_file(
            "org/tools",
            "jobs/lint.yml",
            "jobs:\n  - job: lint\n    steps:\n      - template: ../steps/clippy.yml\n",
        )
        .with_repository_file("org/tools", "steps/clippy.yml", "steps:\n  - script: cargo clippy\n");
    let ctx = Context::new(Arc::new(provider));
    let pipeline = resolve(&ctx, "azure-pipelines.yml", None).await.unwrap();

    let job = &pipeline.stages[0].jobs[0];
    assert_eq!(job.name.as_deref(), Some("lint"));
    assert_eq!(job.steps[0].inputs.get("script").map(String::as_str), Some("cargo clippy"));
    assert!(pipeline.other_resources.contains_key("repositories"));
}

#[tokio::test]
async fn test_repository_ref_from_a_parameter_is_evaluated() {
    let provider = InMemoryFileProvider::new()
        .with_file(
            "azure-pipelines.yml",
            r#"
parameters:
  - name: branch
    type: string
    default: refs/heads/release
resources:
  repositories:
    - repository: tools
      type: git
      name: org/tools
      ref: ${{ parameters.branch }}
steps:
  - template: steps/build.yml@tools
"#,
        )
        .with_repository_file("org/tools", "steps/build.yml", "steps:\n  - script: build main\n")
        .with_repository_file(
            "org/tools@refs/heads/release",
            "steps/build.yml",
            "steps:\n  - script: build release\n",
        );
    let ctx = Context::new(Arc::new(provider));
    let pipeline = resolve(&ctx, "azure-pipelines.yml", None).await.unwrap();

    assert_eq!(
        single_step_inputs(&pipeline).get("script").map(String::as_str),
        Some("build release")
    );
    assert_eq!(
        ctx.repositories.get("tools").as_deref(),
        Some("org/tools@refs/heads/release")
    );
}

#[tokio::test]
async fn test_unknown_repository_alias_is_reported_at_the_reference() {
    let ctx = context(&[("azure-pipelines.yml", "steps:\n  - template: build.yml@nowhere\n")]);
    let messages = resolve_errors(&ctx, "azure-pipelines.yml").await;
    assert_contains(&messages, "Unknown repository alias 'nowhere'");
}

#[tokio::test]
async fn test_errors_inside_templates_name_the_reference() {
    let ctx = context(&[
        ("azure-pipelines.yml", "jobs:\n  - template: job.yml\n"),
        (
            "job.yml",
            "parameters:\n  - name: pool\n    type: string\njobs:\n  - job: a\n    steps: []\n",
        ),
    ]);
    let messages = resolve_errors(&ctx, "azure-pipelines.yml").await;
    assert_contains(&messages, "Found Errors inside Template Reference");
    assert_contains(&messages, "A value for the 'pool' parameter must be provided.");
}

#[tokio::test]
async fn test_self_inclusion_stops_at_the_depth_limit() {
    let mut config = ResolverConfig::default();
    config.max_depth = 4;
    let ctx = context(&[("loop.yml", "steps:\n  - template: loop.yml\n")]).with_config(config);
    let messages = resolve_errors(&ctx, "loop.yml").await;
    assert_contains(&messages, "Maximum template depth of 4 exceeded");
}

#[tokio::test]
async fn test_extends_keeps_parent_stages_and_child_variables() {
    let ctx = context(&[
        (
            "azure-pipelines.yml",
            r#"
variables:
  channel: nightly
extends:
  template: templates/release.yml
  parameters:
    artifact: resolver
"#,
        ),
        (
            "templates/release.yml",
            r#"
parameters:
  - name: artifact
    type: string
variables:
  channel: stable
  artifact: ${{ parameters.artifact }}
stages:
  - stage: publish
    jobs:
      - job: upload
        steps:
          - script: publish ${{ parameters.artifact }}
"#,
        ),
    ]);
    let pipeline = resolve(&ctx, "azure-pipelines.yml", None).await.unwrap();

    let variables = pipeline.variables.as_ref().unwrap();
    assert_eq!(variables.value("channel"), Some("nightly"));
    assert_eq!(variables.value("artifact"), Some("resolver"));
    assert_eq!(
        single_step_inputs(&pipeline).get("script").map(String::as_str),
        Some("publish resolver")
    );
}
