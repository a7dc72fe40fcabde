use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::{CaseTransform, PrincipalsError, PrincipalsResolver, Resolution};
use crate::context::AuthContext;
use crate::request::SignRequest;
use crate::ConfigError;

/// Principals listed per user in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalResolverConfig {
    /// Username to comma-separated principals, e.g. `alice = "ops, admin"`.
    pub users: HashMap<String, String>,
    #[serde(default)]
    pub transform_case: CaseTransform,
}

pub struct LocalResolver {
    users: HashMap<String, String>,
    transform_case: CaseTransform,
}

impl LocalResolver {
    pub fn from_config(config: LocalResolverConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            users: config.users,
            transform_case: config.transform_case,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim_matches(' '))
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl PrincipalsResolver for LocalResolver {
    fn name(&self) -> &str {
        "local"
    }

    async fn resolve(
        &self,
        _ctx: &AuthContext,
        request: &SignRequest,
    ) -> Result<Resolution, PrincipalsError> {
        let Some(raw) = self.users.get(&request.user) else {
            return Ok(Resolution::NotFound("no principals found".into()));
        };
        let principals = self.transform_case.apply(split_list(raw));
        Ok(Resolution::from_list(principals, "no more principals after trim"))
    }
}
