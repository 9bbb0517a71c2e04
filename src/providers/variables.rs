//! In-memory variables provider

use super::VariablesProvider;
use indexmap::IndexMap;

/// Ambient variables plus named variable groups held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticVariablesProvider {
    ambient: IndexMap<String, String>,
    groups: IndexMap<String, IndexMap<String, String>>,
}

impl StaticVariablesProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.ambient.insert(name.into(), value.into());
        self
    }

    pub fn with_group(mut self, name: impl Into<String>, members: IndexMap<String, String>) -> Self {
        self.groups.insert(name.into(), members);
        self
    }
}

impl VariablesProvider for StaticVariablesProvider {
    fn get_variables_for_environment(&self, name: Option<&str>) -> IndexMap<String, String> {
        match name {
            None => self.ambient.clone(),
            Some(group) => self
                .groups
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(group))
                .map(|(_, members)| members.clone())
                .unwrap_or_default(),
        }
    }
}
