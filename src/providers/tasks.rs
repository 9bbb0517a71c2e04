//! Task catalog lookup

use super::TaskByNameAndVersionProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

/// Semantic version of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskVersion {
    pub major: u32,
    #[serde(default)]
    pub minor: u32,
    #[serde(default)]
    pub patch: u32,
}

impl TaskVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }
}

impl fmt::Display for TaskVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for TaskVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split('.')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| format!("Invalid task version: {}", s))?;
        match parts.as_slice() {
            [major] => Ok(Self::new(*major, 0, 0)),
            [major, minor] => Ok(Self::new(*major, *minor, 0)),
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(format!("Invalid task version: {}", s)),
        }
    }
}

/// Identity of a concrete task version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMetaData {
    pub id: Uuid,
    pub name: String,
    pub version: TaskVersion,
}

/// Task catalog held in memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticTaskProvider {
    #[serde(default)]
    tasks: Vec<TaskMetaData>,
}

impl StaticTaskProvider {
    pub fn new(tasks: Vec<TaskMetaData>) -> Self {
        Self { tasks }
    }

    /// Load a catalog from a YAML file containing a `tasks` list
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    pub fn tasks(&self) -> &[TaskMetaData] {
        &self.tasks
    }
}

impl TaskByNameAndVersionProvider for StaticTaskProvider {
    fn resolve(&self, name_and_version: &str) -> Option<TaskMetaData> {
        let (name, version) = match name_and_version.split_once('@') {
            Some((name, version)) => (name.trim(), Some(version.trim())),
            None => (name_and_version.trim(), None),
        };
        let id = Uuid::parse_str(name).ok();
        let requested: Option<Vec<u32>> = match version {
            Some(v) => Some(v.split('.').map(|p| p.parse().ok()).collect::<Option<Vec<_>>>()?),
            None => None,
        };

        self.tasks
            .iter()
            .filter(|task| match id {
                Some(id) => task.id == id,
                None => task.name.eq_ignore_ascii_case(name),
            })
            .filter(|task| match &requested {
                None => true,
                Some(parts) => {
                    let actual = [task.version.major, task.version.minor, task.version.patch];
                    parts.len() <= 3 && parts.iter().zip(actual.iter()).all(|(a, b)| a == b)
                }
            })
            .max_by_key(|task| task.version)
            .cloned()
    }
}
