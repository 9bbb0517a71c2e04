//! Core domain models for pipeline resolution
//!
//! This module defines the resolution context, parameter and variable
//! handling, and the typed pipeline tree (pipeline, stages, jobs, steps)
//! built from resolved documents.

pub mod config;
pub mod container;
pub mod context;
pub mod job;
pub mod parameters;
pub mod pipeline;
pub mod pool;
pub mod stage;
pub mod step;
pub mod strategy;
pub mod variables;

pub use config::ResolverConfig;
pub use container::Container;
pub use context::*;
pub use job::{parse_jobs, Environment, Job};
pub use parameters::ParameterType;
pub use pipeline::Pipeline;
pub use pool::Pool;
pub use stage::{parse_stages, Stage};
pub use step::{parse_step, parse_steps, Step, TaskStepDefinitionReference};
pub use strategy::Strategy;
pub use variables::{parse_variables, VariableMap, VariableValue};

use crate::template::Token;

/// Flatten a model back into the document shape it was parsed from
pub trait ToContextData {
    fn to_context_data(&self) -> Token;
}
