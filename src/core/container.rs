//! Job and service containers

use super::context::Context;
use super::step::{string_list, string_mapping};
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::template::{entry, Token, TokenKind};
use indexmap::IndexMap;

/// Which agent directories are mounted read-only
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountReadOnly {
    pub work: Option<bool>,
    pub externals: Option<bool>,
    pub tools: Option<bool>,
    pub tasks: Option<bool>,
}

impl MountReadOnly {
    const KEYS: [&'static str; 4] = ["work", "externals", "tools", "tasks"];

    fn slot(&mut self, key: &str) -> Option<&mut Option<bool>> {
        match key {
            "work" => Some(&mut self.work),
            "externals" => Some(&mut self.externals),
            "tools" => Some(&mut self.tools),
            "tasks" => Some(&mut self.tasks),
            _ => None,
        }
    }

    fn values(&self) -> [Option<bool>; 4] {
        [self.work, self.externals, self.tools, self.tasks]
    }
}

/// A container, written either as a bare alias or as a full mapping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    /// Set for the bare-scalar form, which names a container resource
    pub alias: Option<String>,
    /// Image reference; required in the mapping form
    pub image: Option<String>,
    /// Service connection used to pull the image
    pub endpoint: Option<String>,
    pub env: IndexMap<String, String>,
    /// `mapDockerSocket`
    pub map_docker_socket: Option<bool>,
    /// Extra arguments passed to `docker create`
    pub options: Option<String>,
    pub ports: Vec<String>,
    pub volumes: Vec<String>,
    /// Per-volume read-only flags
    pub mount_read_only: Option<MountReadOnly>,
}

impl Container {
    pub fn parse(context: &Context, token: &Token) -> Result<Self> {
        if let TokenKind::String(alias) = &token.kind {
            return Ok(Self {
                alias: Some(alias.clone()),
                ..Default::default()
            });
        }

        let mut container = Container::default();
        for (key, value) in token.assert_mapping("container")? {
            match key.as_str() {
                // resource name, read by the caller
                Some("container") => {}
                Some("image") => container.image = Some(value.assert_literal_string("image")?),
                Some("endpoint") => container.endpoint = Some(value.assert_literal_string("endpoint")?),
                Some("env") => {
                    for (name, v) in value.assert_mapping("env")? {
                        container
                            .env
                            .insert(name.assert_literal_string("env")?, v.assert_literal_string("env")?);
                    }
                }
                Some("mapDockerSocket") => {
                    container.map_docker_socket = Some(value.assert_boolean("mapDockerSocket")?)
                }
                Some("options") => container.options = Some(value.assert_literal_string("options")?),
                Some("ports") => container.ports = value.assert_string_list("ports")?,
                Some("volumes") => container.volumes = value.assert_string_list("volumes")?,
                Some("mountReadOnly") => {
                    let mut mounts = MountReadOnly::default();
                    for (name, v) in value.assert_mapping("mountReadOnly")? {
                        let name = name.assert_string("mountReadOnly")?;
                        let slot = mounts.slot(name).ok_or_else(|| {
                            ResolveError::validation(format!(
                                "{}Unexpected mountReadOnly key '{}'",
                                context.location(v),
                                name
                            ))
                        })?;
                        *slot = Some(v.assert_boolean(name)?);
                    }
                    container.mount_read_only = Some(mounts);
                }
                _ => {
                    return Err(ResolveError::validation(format!(
                        "{}Unexpected container key '{}'",
                        context.location(key),
                        key
                    )))
                }
            }
        }
        if container.image.is_none() {
            return Err(ResolveError::validation(format!(
                "{}A container requires an image",
                context.location(token)
            )));
        }
        Ok(container)
    }

    /// Context data for a container declared under `name` (resources, services)
    pub fn to_named_context_data(&self, name: Option<&str>) -> Token {
        if let (Some(alias), None) = (&self.alias, name) {
            return Token::string(alias.clone());
        }

        let mut entries = Vec::new();
        if let Some(name) = name {
            entries.push(entry("container", Token::string(name)));
        }
        if let Some(image) = self.image.as_ref().or(self.alias.as_ref()) {
            entries.push(entry("image", Token::string(image.clone())));
        }
        if let Some(endpoint) = &self.endpoint {
            entries.push(entry("endpoint", Token::string(endpoint.clone())));
        }
        if !self.env.is_empty() {
            entries.push(entry("env", string_mapping(&self.env)));
        }
        if let Some(map_docker_socket) = self.map_docker_socket {
            entries.push(entry("mapDockerSocket", Token::boolean(map_docker_socket)));
        }
        if let Some(options) = &self.options {
            entries.push(entry("options", Token::string(options.clone())));
        }
        if !self.ports.is_empty() {
            entries.push(entry("ports", string_list(&self.ports)));
        }
        if !self.volumes.is_empty() {
            entries.push(entry("volumes", string_list(&self.volumes)));
        }
        if let Some(mounts) = &self.mount_read_only {
            let mounts = MountReadOnly::KEYS
                .iter()
                .zip(mounts.values())
                .filter_map(|(key, value)| value.map(|v| entry(key, Token::boolean(v))))
                .collect();
            entries.push(entry("mountReadOnly", Token::mapping(mounts)));
        }
        Token::mapping(entries)
    }
}

impl ToContextData for Container {
    fn to_context_data(&self) -> Token {
        self.to_named_context_data(None)
    }
}
