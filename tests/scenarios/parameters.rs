//! Test: strict and loose parameter binding at the pipeline and template level

use crate::helpers::*;
use pipeline_resolver::Pipeline;

const STRICT: &str = r#"
parameters:
  - name: env
    type: string
    values: [prod, staging]
  - name: region
    type: string
  - name: dryRun
    type: boolean
    default: false
steps:
  - script: deploy ${{ parameters.env }} ${{ parameters.region }}
    displayName: dry run ${{ parameters.dryRun }}
"#;

#[tokio::test]
async fn test_missing_strict_parameters_are_collected_together() {
    let ctx = context(&[("deploy.yml", STRICT)]);
    let err = Pipeline::load(&ctx, "deploy.yml", None).await.unwrap_err();

    assert!(err.is_validation());
    let messages = ctx.describe(&err);
    assert_contains(&messages, "A value for the 'env' parameter must be provided.");
    assert_contains(&messages, "A value for the 'region' parameter must be provided.");
}

#[tokio::test]
async fn test_null_runtime_value_without_default_is_missing() {
    let ctx = context(&[(
        "ci.yml",
        "parameters:\n  - name: env\n    type: string\nsteps:\n  - script: echo ${{ parameters.env }}\n",
    )]);
    let params = parameters("env: null");
    let err = Pipeline::load(&ctx, "ci.yml", Some(&params)).await.unwrap_err();

    assert!(err.is_validation());
    assert_contains(&ctx.describe(&err), "A value for the 'env' parameter must be provided.");
}

#[tokio::test]
async fn test_null_template_argument_uses_the_default() {
    let ctx = context(&[
        (
            "ci.yml",
            "steps:\n  - template: deploy.yml\n    parameters:\n      env: null\n",
        ),
        (
            "deploy.yml",
            "parameters:\n  - name: env\n    type: string\n    default: prod\nsteps:\n  - script: deploy ${{ parameters.env }}\n",
        ),
    ]);
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    assert_eq!(
        single_step_inputs(&pipeline).get("script").map(String::as_str),
        Some("deploy prod")
    );
}

#[tokio::test]
async fn test_disallowed_value_fails_immediately() {
    let ctx = context(&[("deploy.yml", STRICT)]);
    let params = parameters("env: qa\nregion: east");
    let err = Pipeline::load(&ctx, "deploy.yml", Some(&params)).await.unwrap_err();

    assert!(!err.is_validation());
    assert!(err.to_string().contains("'qa' is not an allowed value"));
}

#[tokio::test]
async fn test_strict_values_are_coerced_to_declared_types() {
    let ctx = context(&[("deploy.yml", STRICT)]);
    let params = parameters("env: staging\nregion: east\ndryRun: 'true'");
    let pipeline = resolve(&ctx, "deploy.yml", Some(&params)).await.unwrap();

    let step = &pipeline.stages[0].jobs[0].steps[0];
    assert_eq!(step.inputs.get("script").map(String::as_str), Some("deploy staging east"));
    assert_eq!(step.display_name.as_deref(), Some("dry run True"));
}

#[tokio::test]
async fn test_undeclared_runtime_parameter_is_rejected() {
    let ctx = context(&[("deploy.yml", STRICT)]);
    let params = parameters("env: prod\nregion: east\ncolour: blue");
    let err = Pipeline::load(&ctx, "deploy.yml", Some(&params)).await.unwrap_err();

    assert_contains(&ctx.describe(&err), "Unexpected parameter 'colour'");
}

#[tokio::test]
async fn test_loose_parameters_accept_overrides_and_extras() {
    let ctx = context(&[
        (
            "azure-pipelines.yml",
            "steps:\n  - template: deploy.yml\n    parameters:\n      env: staging\n      extra: bonus\n",
        ),
        (
            "deploy.yml",
            "parameters:\n  env: prod\n  zone: a\nsteps:\n  - script: deploy ${{ parameters.env }} ${{ parameters.zone }} ${{ parameters.extra }}\n",
        ),
    ]);
    let pipeline = resolve(&ctx, "azure-pipelines.yml", None).await.unwrap();

    assert_eq!(
        single_step_inputs(&pipeline).get("script").map(String::as_str),
        Some("deploy staging a bonus")
    );
}

#[tokio::test]
async fn test_step_list_parameter_is_spliced_into_a_job() {
    let ctx = context(&[
        (
            "azure-pipelines.yml",
            r#"
jobs:
  - template: job.yml
    parameters:
      preSteps:
        - bash: ./setup.sh
        - checkout: self
"#,
        ),
        (
            "job.yml",
            r#"
parameters:
  - name: preSteps
    type: stepList
    default: []
jobs:
  - job: build
    steps:
      - ${{ parameters.preSteps }}
      - script: make
"#,
        ),
    ]);
    let pipeline = resolve(&ctx, "azure-pipelines.yml", None).await.unwrap();

    let steps = &pipeline.stages[0].jobs[0].steps;
    assert_eq!(steps.len(), 3);
    assert_eq!(steps[0].reference.raw_name_and_version, "Bash@3");
    assert_eq!(steps[0].inputs.get("script").map(String::as_str), Some("./setup.sh"));
    assert_eq!(steps[1].inputs.get("repository").map(String::as_str), Some("self"));
    assert_eq!(steps[2].inputs.get("script").map(String::as_str), Some("make"));
}
