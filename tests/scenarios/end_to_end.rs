//! Test: whole documents resolve into the expected stage/job/step tree

use crate::helpers::*;
use pipeline_resolver::{Pipeline, ToContextData};

const DEPLOY: &str = r#"
parameters:
  - name: env
    type: string
    default: prod
variables:
  - name: region
    value: ${{ parameters.env }}-east
stages:
  - stage: deploy
    jobs:
      - job: run
        steps:
          - script: echo $(region)
"#;

#[tokio::test]
async fn test_default_parameter_flows_into_variables() {
    let ctx = context(&[("azure-pipelines.yml", DEPLOY)]);
    let pipeline = resolve(&ctx, "azure-pipelines.yml", None).await.unwrap();

    let inputs = single_step_inputs(&pipeline);
    assert_eq!(inputs.get("script").map(String::as_str), Some("echo $(region)"));
    let variables = pipeline.variables.as_ref().unwrap();
    assert_eq!(variables.value("region"), Some("prod-east"));
    assert_eq!(pipeline.stages[0].name.as_deref(), Some("deploy"));
    assert_eq!(pipeline.stages[0].jobs[0].name.as_deref(), Some("run"));
}

#[tokio::test]
async fn test_runtime_parameter_overrides_default() {
    let ctx = context(&[("azure-pipelines.yml", DEPLOY)]);
    let params = parameters("env: staging");
    let pipeline = resolve(&ctx, "azure-pipelines.yml", Some(&params)).await.unwrap();

    assert_eq!(pipeline.variables.unwrap().value("region"), Some("staging-east"));
}

#[tokio::test]
async fn test_resolved_document_parses_back_to_the_same_model() {
    let ctx = context(&[("azure-pipelines.yml", DEPLOY)]);
    let pipeline = Pipeline::load(&ctx, "azure-pipelines.yml", None).await.unwrap();

    let reparsed = Pipeline::parse(&ctx, &pipeline.to_context_data()).await.unwrap();
    assert_eq!(reparsed, pipeline);
}

#[tokio::test]
async fn test_each_expands_jobs_per_parameter_item() {
    let ctx = context(&[(
        "matrix.yml",
        r#"
parameters:
  - name: targets
    type: object
    default: [linux, windows, macos]
jobs:
  - ${{ each target in parameters.targets }}:
    - job: build_${{ target }}
      steps:
        - script: cargo build --target ${{ target }}
"#,
    )]);
    let pipeline = resolve(&ctx, "matrix.yml", None).await.unwrap();

    let jobs = &pipeline.stages[0].jobs;
    let names: Vec<_> = jobs.iter().filter_map(|j| j.name.as_deref()).collect();
    assert_eq!(names, vec!["build_linux", "build_windows", "build_macos"]);
    assert_eq!(
        jobs[2].steps[0].inputs.get("script").map(String::as_str),
        Some("cargo build --target macos")
    );
    assert_eq!(pipeline.stages[0].name.as_deref(), Some("Stage"));
}

#[tokio::test]
async fn test_ambient_variables_are_visible_to_template_expressions() {
    let ctx = context_with_variables(
        &[("ci.yml", "steps:\n  - script: echo ${{ variables['Build.Reason'] }}\n")],
        &[("Build.Reason", "Manual")],
    );
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    let inputs = single_step_inputs(&pipeline);
    assert_eq!(inputs.get("script").map(String::as_str), Some("echo Manual"));
}

#[tokio::test]
async fn test_missing_root_file_is_reported() {
    let ctx = context(&[]);
    let messages = resolve_errors(&ctx, "absent.yml").await;
    assert_contains(&messages, "absent.yml");
}
