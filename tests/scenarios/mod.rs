//! Scenario-based tests for pipeline-resolver

mod cli_sources;
mod end_to_end;
mod parameters;
mod runtime_checks;
mod templates;
mod variables;
