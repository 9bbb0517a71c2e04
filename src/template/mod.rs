//! Template reading, evaluation and inclusion
//!
//! A template file goes through three stages: [`read`] turns YAML into a
//! [`Token`] tree with unresolved `${{ }}` expressions, [`evaluate`] resolves
//! those expressions against a [`TemplateContext`], and [`read_template`]
//! drives both for a file reference, including parameter binding and the
//! variable lookahead passes.

pub mod errors;
mod evaluator;
mod loader;
pub mod path;
mod reader;
mod schema;
mod token;

pub use errors::ValidationErrors;
pub use evaluator::{evaluate, evaluate_fragment};
pub use loader::{read_template, wrap_include_error, TemplateReference};
pub use path::{parent_dir, relative_to, split_file_ref};
pub use reader::read;
pub use schema::SchemaName;
pub use token::*;

use crate::core::Context;
use crate::error::ResolveError;
use crate::expression::ExpressionFlags;
use crate::providers::TraceWriter;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Ids for every file read during one resolution, shared by all contexts
#[derive(Debug, Clone, Default)]
pub struct FileTable {
    files: Arc<Mutex<Vec<String>>>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Id for `name`, registering it on first use
    pub fn get_file_id(&self, name: &str) -> usize {
        let mut files = self.lock();
        if let Some(index) = files.iter().position(|f| f == name) {
            return index;
        }
        files.push(name.to_string());
        files.len() - 1
    }

    pub fn file_name(&self, id: usize) -> Option<String> {
        self.lock().get(id).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Message prefix such as `jobs.yml (Line: 3, Col: 5): `
    pub fn location(&self, position: &Position) -> String {
        let file = position.file_id.and_then(|id| self.file_name(id));
        match (file, position.line, position.column) {
            (Some(file), Some(line), Some(column)) => {
                format!("{} (Line: {}, Col: {}): ", file, line, column)
            }
            (Some(file), _, _) => format!("{}: ", file),
            (None, Some(line), Some(column)) => format!("(Line: {}, Col: {}): ", line, column),
            (None, _, _) => String::new(),
        }
    }

    /// Messages for an error, with token locations spelled out
    pub fn describe(&self, error: &ResolveError) -> Vec<String> {
        match error {
            ResolveError::Token(e) => vec![format!("{}{}", self.location(&e.position), e.message)],
            other => other.messages(),
        }
    }
}

/// State for one evaluation pass over a token tree
#[derive(Clone)]
pub struct TemplateContext {
    pub flags: ExpressionFlags,
    /// Named values visible to expressions (`parameters`, `variables`, loop variables)
    pub values: Map<String, Value>,
    pub errors: ValidationErrors,
    pub file_table: FileTable,
    pub trace: Arc<dyn TraceWriter>,
    pub max_depth: usize,
}

impl TemplateContext {
    pub fn new(context: &Context) -> Self {
        Self {
            flags: context.flags,
            values: Map::new(),
            errors: ValidationErrors::new(context.config.max_errors, context.config.max_message_length),
            file_table: context.file_table.clone(),
            trace: context.trace_writer.clone(),
            max_depth: context.config.max_depth,
        }
    }

    /// Copy with the same named values and an empty error collector
    pub fn fork(&self) -> Self {
        Self {
            errors: self.errors.fresh(),
            ..self.clone()
        }
    }

    pub fn set_value(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    /// Make `name` visible as `variables.<name>` to later expressions
    pub fn set_variable(&mut self, name: &str, value: &str) {
        let variables = self
            .values
            .entry("variables")
            .or_insert_with(|| Value::Object(Map::new()));
        if !variables.is_object() {
            *variables = Value::Object(Map::new());
        }
        if let Value::Object(map) = variables {
            map.insert(name.to_string(), Value::String(value.to_string()));
        }
    }

    pub fn variables(&self) -> Map<String, Value> {
        match self.values.get("variables") {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        }
    }

    pub fn error(&mut self, position: Position, message: impl AsRef<str>) {
        let prefix = self.file_table.location(&position);
        self.errors.add(format!("{}{}", prefix, message.as_ref()));
    }

    pub fn record(&mut self, error: &ResolveError) {
        for message in self.file_table.describe(error) {
            self.errors.add(message);
        }
    }
}
