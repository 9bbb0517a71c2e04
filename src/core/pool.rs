//! Agent pools

use super::context::Context;
use super::ToContextData;
use crate::error::{ResolveError, Result};
use crate::template::{entry, Token, TokenKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pool {
    pub name: Option<String>,
    pub vm_image: Option<String>,
    pub demands: Vec<String>,
}

impl Pool {
    /// Parse a pool given by name or as a `{name, vmImage, demands}` mapping
    pub fn parse(context: &Context, token: &Token) -> Result<Self> {
        match &token.kind {
            TokenKind::String(name) => Ok(Self {
                name: Some(name.clone()),
                ..Default::default()
            }),
            TokenKind::Null => Ok(Self::default()),
            _ => {
                let mut pool = Pool::default();
                for (key, value) in token.assert_mapping("pool")? {
                    match key.as_str() {
                        Some("name") => pool.name = Some(value.assert_literal_string("pool name")?),
                        Some("vmImage") => pool.vm_image = Some(value.assert_literal_string("vmImage")?),
                        Some("demands") => pool.demands = value.assert_string_list("demands")?,
                        _ => {
                            return Err(ResolveError::validation(format!(
                                "{}Unexpected pool key '{}'",
                                context.location(key),
                                key
                            )))
                        }
                    }
                }
                Ok(pool)
            }
        }
    }
}

impl ToContextData for Pool {
    fn to_context_data(&self) -> Token {
        let mut entries = Vec::new();
        if let Some(name) = &self.name {
            entries.push(entry("name", Token::string(name.clone())));
        }
        if let Some(vm_image) = &self.vm_image {
            entries.push(entry("vmImage", Token::string(vm_image.clone())));
        }
        if !self.demands.is_empty() {
            entries.push(entry(
                "demands",
                Token::sequence(self.demands.iter().map(|d| Token::string(d.clone())).collect()),
            ));
        }
        Token::mapping(entries)
    }
}
