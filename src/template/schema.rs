//! Document kinds and their allowed root keys

use super::token::{Position, Token, TokenKind};
use super::TemplateContext;
use std::fmt;
use std::str::FromStr;

/// The kind of document a template file is read as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaName {
    PipelineRoot,
    ExtendTemplateRoot,
    StageTemplateRoot,
    JobTemplateRoot,
    StepTemplateRoot,
    VariableTemplateRoot,
}

impl SchemaName {
    pub fn as_str(self) -> &'static str {
        match self {
            SchemaName::PipelineRoot => "pipeline-root",
            SchemaName::ExtendTemplateRoot => "extend-template-root",
            SchemaName::StageTemplateRoot => "stage-template-root",
            SchemaName::JobTemplateRoot => "job-template-root",
            SchemaName::StepTemplateRoot => "step-template-root",
            SchemaName::VariableTemplateRoot => "variable-template-root",
        }
    }

    /// Root keys a template document may declare; `None` for pipeline roots,
    /// whose extra keys are handed to the implicit job
    fn allowed_keys(self) -> Option<&'static [&'static str]> {
        match self {
            SchemaName::PipelineRoot | SchemaName::ExtendTemplateRoot => None,
            SchemaName::StageTemplateRoot => Some(&["parameters", "variables", "stages"]),
            SchemaName::JobTemplateRoot => Some(&["parameters", "variables", "jobs"]),
            SchemaName::StepTemplateRoot => Some(&["parameters", "variables", "steps"]),
            SchemaName::VariableTemplateRoot => Some(&["parameters", "variables"]),
        }
    }

    /// Record an error for every root key the document kind does not accept
    pub fn validate(self, ctx: &mut TemplateContext, token: &Token, file_id: Option<usize>) {
        let TokenKind::Mapping(entries) = &token.kind else {
            ctx.error(
                Position::in_file(file_id),
                format!("A {} document must be a mapping", self),
            );
            return;
        };
        let Some(allowed) = self.allowed_keys() else {
            return;
        };
        for (key, _) in entries {
            if let Some(name) = key.as_str() {
                if !allowed.contains(&name) {
                    ctx.error(
                        key.position,
                        format!("'{}' is not a valid key for a {} document", name, self),
                    );
                }
            }
        }
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline-root" => Ok(SchemaName::PipelineRoot),
            "extend-template-root" => Ok(SchemaName::ExtendTemplateRoot),
            "stage-template-root" => Ok(SchemaName::StageTemplateRoot),
            "job-template-root" => Ok(SchemaName::JobTemplateRoot),
            "step-template-root" => Ok(SchemaName::StepTemplateRoot),
            "variable-template-root" => Ok(SchemaName::VariableTemplateRoot),
            other => Err(format!("Unknown schema: {}", other)),
        }
    }
}
