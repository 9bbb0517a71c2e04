//! Test: variable blocks are resolved in order and scoped to their stage or job

use crate::helpers::*;
use indexmap::IndexMap;
use pipeline_resolver::{Context, StaticVariablesProvider};
use std::sync::Arc;

#[tokio::test]
async fn test_later_variables_see_earlier_ones() {
    let ctx = context(&[(
        "ci.yml",
        "variables:\n  a: 1\n  b: ${{ variables.a }}2\nsteps:\n  - script: echo ${{ variables.b }}\n",
    )]);
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    let variables = pipeline.variables.as_ref().unwrap();
    assert_eq!(variables.value("a"), Some("1"));
    assert_eq!(variables.value("b"), Some("12"));
    assert_eq!(
        single_step_inputs(&pipeline).get("script").map(String::as_str),
        Some("echo 12")
    );
}

const TIERS: &str = r#"
parameters:
  - name: tier
    type: string
    default: gold
variables:
  - ${{ if eq(parameters.tier, 'bronze') }}:
    - name: replicas
      value: 1
  - ${{ elseif eq(parameters.tier, 'gold') }}:
    - name: replicas
      value: 3
  - ${{ else }}:
    - name: replicas
      value: 2
steps:
  - script: scale $(replicas)
"#;

#[tokio::test]
async fn test_exactly_one_conditional_branch_is_kept() {
    for (tier, expected) in [("bronze", "1"), ("gold", "3"), ("silver", "2")] {
        let ctx = context(&[("ci.yml", TIERS)]);
        let params = parameters(&format!("tier: {}", tier));
        let pipeline = resolve(&ctx, "ci.yml", Some(&params)).await.unwrap();

        let variables = pipeline.variables.as_ref().unwrap();
        assert_eq!(variables.len(), 1, "tier {}", tier);
        assert_eq!(variables.value("replicas"), Some(expected), "tier {}", tier);
    }
}

#[tokio::test]
async fn test_stage_and_job_variables_see_enclosing_scopes() {
    let ctx = context(&[(
        "ci.yml",
        r#"
variables:
  product: resolver
stages:
  - stage: package
    variables:
      archive: ${{ variables.product }}.tar.gz
    jobs:
      - job: upload
        variables:
          target: dist/${{ variables.archive }}
        steps:
          - script: upload $(target)
"#,
    )]);
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    let stage = &pipeline.stages[0];
    assert_eq!(stage.variables.as_ref().unwrap().value("archive"), Some("resolver.tar.gz"));
    let job = &stage.jobs[0];
    assert_eq!(job.variables.as_ref().unwrap().value("target"), Some("dist/resolver.tar.gz"));
}

#[tokio::test]
async fn test_variable_groups_are_kept_as_markers() {
    let mut members = IndexMap::new();
    members.insert("registry".to_string(), "ghcr.io".to_string());
    let provider = StaticVariablesProvider::new().with_group("release-secrets", members);
    let ctx: Context = context(&[(
        "ci.yml",
        "variables:\n  - group: release-secrets\n  - name: image\n    value: ${{ variables.registry }}/resolver\nsteps:\n  - script: docker push $(image)\n",
    )])
    .with_variables_provider(Arc::new(provider));
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    let variables = pipeline.variables.as_ref().unwrap();
    assert_eq!(variables.groups().collect::<Vec<_>>(), vec!["release-secrets"]);
    assert_eq!(variables.value("image"), Some("ghcr.io/resolver"));
    assert!(variables.get("registry").unwrap().is_group_member);
}

#[tokio::test]
async fn test_variable_templates_are_spliced_in_place() {
    let ctx = context(&[
        (
            "ci.yml",
            "variables:\n  - template: vars/common.yml\n  - name: tag\n    value: ${{ variables.channel }}-1\nsteps:\n  - script: echo $(tag)\n",
        ),
        ("vars/common.yml", "variables:\n  channel: beta\n"),
    ]);
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    let variables = pipeline.variables.as_ref().unwrap();
    let names: Vec<_> = variables.iter().map(|(name, _)| name.to_string()).collect();
    assert_eq!(names, vec!["channel", "tag"]);
    assert_eq!(variables.value("tag"), Some("beta-1"));
}
