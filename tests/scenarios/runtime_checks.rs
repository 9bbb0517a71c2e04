//! Test: runtime checks over pipelines assembled from templates

use crate::helpers::*;

#[tokio::test]
async fn test_template_jobs_with_the_same_name_collide() {
    let ctx = context(&[
        (
            "ci.yml",
            "jobs:\n  - template: job.yml\n    parameters:\n      suffix: a\n  - template: job.yml\n    parameters:\n      suffix: a\n",
        ),
        ("job.yml", "parameters:\n  suffix: x\njobs:\n  - job: build_${{ parameters.suffix }}\n    steps: []\n"),
    ]);
    let messages = resolve_errors(&ctx, "ci.yml").await;
    assert_eq!(
        messages,
        vec!["The identifier 'build_a' may not be used more than once within the same scope.".to_string()]
    );
}

#[tokio::test]
async fn test_unnamed_stages_follow_each_other() {
    let ctx = context(&[(
        "ci.yml",
        "stages:\n  - stage:\n    jobs:\n      - job:\n        steps: []\n  - stage:\n    jobs:\n      - job:\n        steps: []\n",
    )]);
    let pipeline = resolve(&ctx, "ci.yml", None).await.unwrap();

    let names: Vec<_> = pipeline.stages.iter().filter_map(|s| s.name.as_deref()).collect();
    assert_eq!(names, vec!["Stage", "Stage_2"]);
    assert_eq!(pipeline.stages[1].depends_on, Some(vec!["Stage".to_string()]));
    assert_eq!(pipeline.stages[1].jobs[0].name.as_deref(), Some("Job"));
}

#[tokio::test]
async fn test_dependency_cycle_is_reported() {
    let ctx = context(&[(
        "ci.yml",
        r#"
stages:
  - stage: build
    dependsOn: release
    jobs: []
  - stage: release
    dependsOn: build
    jobs: []
"#,
    )]);
    let messages = resolve_errors(&ctx, "ci.yml").await;
    assert_contains(&messages, "Cyclic dependency to");
}

#[tokio::test]
async fn test_conditions_may_only_use_their_scope_values() {
    let ctx = context(&[(
        "ci.yml",
        r#"
jobs:
  - job: build
    condition: and(succeeded(), eq(variables['Build.Reason'], 'Manual'))
    steps:
      - script: make
        condition: eq(stageDependencies.a.b.result, 'Succeeded')
"#,
    )]);
    let messages = resolve_errors(&ctx, "ci.yml").await;
    assert_eq!(messages.len(), 1);
    assert_contains(&messages, "stageDependencies");
}
