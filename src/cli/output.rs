//! CLI output formatting

use crate::core::{Job, Pipeline, Stage, Step};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");

/// Totals shown after a successful resolution
pub fn format_counts(pipeline: &Pipeline) -> String {
    let jobs: usize = pipeline.stages.iter().map(|s| s.jobs.len()).sum();
    let steps: usize = pipeline
        .stages
        .iter()
        .flat_map(|s| &s.jobs)
        .map(|j| j.steps.len())
        .sum();
    format!(
        "{} stage(s), {} job(s), {} step(s)",
        style(pipeline.stages.len()).cyan(),
        style(jobs).cyan(),
        style(steps).cyan()
    )
}

/// Indented stage/job/step tree
pub fn format_pipeline(pipeline: &Pipeline) -> String {
    let mut lines = Vec::new();
    if let Some(name) = &pipeline.name {
        lines.push(format!("Pipeline {}", style(name).bold()));
    }
    if let Some(variables) = &pipeline.variables {
        for (name, variable) in variables.iter().filter(|(_, v)| !v.is_group) {
            lines.push(format!("  {} = {}", style(name).cyan(), style(&variable.value).dim()));
        }
    }
    for stage in &pipeline.stages {
        lines.push(format_stage(stage));
        for job in &stage.jobs {
            lines.push(format_job(job));
            for step in &job.steps {
                lines.push(format!("      - {}", format_step(step)));
            }
        }
    }
    lines.join("\n")
}

fn display_name(name: &Option<String>, fallback: &str) -> String {
    name.clone().unwrap_or_else(|| fallback.to_string())
}

fn format_stage(stage: &Stage) -> String {
    let mut line = format!("  Stage {}", style(display_name(&stage.name, "(implicit)")).bold());
    if let Some(depends_on) = stage.depends_on.as_ref().filter(|d| !d.is_empty()) {
        line.push_str(&format!(" {}", style(format!("after {}", depends_on.join(", "))).dim()));
    }
    line
}

fn format_job(job: &Job) -> String {
    let kind = if job.deployment_job { "Deployment" } else { "Job" };
    let mut line = format!("    {} {}", kind, style(display_name(&job.name, "(implicit)")).bold());
    if let Some(pool) = &job.pool {
        if let Some(pool_name) = pool.vm_image.as_ref().or(pool.name.as_ref()) {
            line.push_str(&format!(" {}", style(format!("[{}]", pool_name)).dim()));
        }
    }
    if let Some(environment) = &job.environment {
        line.push_str(&format!(" → {}", style(&environment.name).yellow()));
    }
    line
}

/// Display name of a step, or its task with the principal input
pub fn format_step(step: &Step) -> String {
    if let Some(name) = &step.display_name {
        return name.clone();
    }
    let task = style(&step.reference.raw_name_and_version).green();
    match step.inputs.first() {
        Some((input, value)) => format!("{} {}: {}", task, input, style(first_line(value)).dim()),
        None => task.to_string(),
    }
}

fn first_line(value: &str) -> &str {
    value.lines().next().unwrap_or_default()
}

/// One line per collected problem
pub fn format_errors(messages: &[String]) -> String {
    messages
        .iter()
        .map(|message| format!("  {} {}", CROSS, style(message).red()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskStepDefinitionReference;

    fn script_step(script: &str) -> Step {
        let mut step = Step {
            reference: TaskStepDefinitionReference {
                id: None,
                name: None,
                version: None,
                raw_name_and_version: "CmdLine@2".to_string(),
            },
            name: None,
            display_name: None,
            condition: None,
            continue_on_error: None,
            enabled: None,
            retry_count_on_task_failure: None,
            timeout_in_minutes: None,
            target: None,
            env: Default::default(),
            inputs: Default::default(),
        };
        step.inputs.insert("script".to_string(), script.to_string());
        step
    }

    #[test]
    fn test_format_step_uses_first_line_of_input() {
        console::set_colors_enabled(false);
        assert_eq!(format_step(&script_step("make\nmake test")), "CmdLine@2 script: make");
        let mut named = script_step("make");
        named.display_name = Some("Build".to_string());
        assert_eq!(format_step(&named), "Build");
    }

    #[test]
    fn test_format_pipeline_lists_jobs() {
        console::set_colors_enabled(false);
        let pipeline = Pipeline {
            stages: vec![Stage {
                name: Some("build".to_string()),
                jobs: vec![Job {
                    name: Some("compile".to_string()),
                    steps: vec![script_step("cargo build")],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        let text = format_pipeline(&pipeline);
        assert!(text.contains("Stage build"));
        assert!(text.contains("Job compile"));
        assert!(text.contains("CmdLine@2 script: cargo build"));
        assert_eq!(format_counts(&pipeline), "1 stage(s), 1 job(s), 1 step(s)");
    }
}
