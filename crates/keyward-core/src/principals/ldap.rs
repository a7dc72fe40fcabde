use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    extract_cn, filter_by_prefix, CaseTransform, PrincipalsError, PrincipalsResolver, Resolution,
};
use crate::context::AuthContext;
use crate::directory::{self, render_filter, DirectoryConfig};
use crate::request::SignRequest;
use crate::{require, ConfigError};

/// LDAP group lookup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LdapResolverConfig {
    #[serde(flatten)]
    pub directory: DirectoryConfig,
    pub user_search_base: String,
    /// `%s` stands for the escaped username.
    pub user_search_filter: String,
    pub group_search_base: String,
    /// `%s` stands for the escaped user DN, e.g. `(member=%s)`.
    pub group_search_filter: String,
    /// Only groups whose CN starts with this prefix are kept, without it.
    #[serde(default)]
    pub group_prefix: String,
    #[serde(default)]
    pub transform_case: CaseTransform,
}

/// Uses the CNs of the groups a user belongs to as principals.
pub struct LdapResolver {
    config: LdapResolverConfig,
}

impl LdapResolver {
    pub fn from_config(config: LdapResolverConfig) -> Result<Self, ConfigError> {
        config.directory.validate()?;
        require("user_search_base", &config.user_search_base)?;
        require("user_search_filter", &config.user_search_filter)?;
        require("group_search_base", &config.group_search_base)?;
        require("group_search_filter", &config.group_search_filter)?;
        Ok(Self { config })
    }
}

/// Turns group DNs into principals: CN, then prefix filter, then case.
pub(crate) fn groups_to_principals(
    group_dns: &[String],
    prefix: &str,
    transform_case: CaseTransform,
) -> Vec<String> {
    let principals = filter_by_prefix(prefix, extract_cn(group_dns));
    transform_case
        .apply(principals)
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect()
}

#[async_trait]
impl PrincipalsResolver for LdapResolver {
    fn name(&self) -> &str {
        "ldap"
    }

    async fn resolve(
        &self,
        _ctx: &AuthContext,
        request: &SignRequest,
    ) -> Result<Resolution, PrincipalsError> {
        let cfg = &self.config;
        let user_filter = render_filter(&cfg.user_search_filter, &request.user);

        let group_dns = cfg
            .directory
            .with_session(|mut ldap| async move {
                let user_dn =
                    directory::search_unique_dn(&mut ldap, &cfg.user_search_base, &user_filter)
                        .await?;
                let group_filter = render_filter(&cfg.group_search_filter, &user_dn);
                directory::search_dns(&mut ldap, &cfg.group_search_base, &group_filter).await
            })
            .await
            .map_err(PrincipalsError::from)?;

        if group_dns.is_empty() {
            return Ok(Resolution::NotFound(format!(
                "no group found for user {}",
                request.user
            )));
        }
        debug!(user = %request.user, groups = group_dns.len(), "ldap groups found");

        let principals =
            groups_to_principals(&group_dns, &cfg.group_prefix, cfg.transform_case);
        Ok(Resolution::from_list(
            principals,
            format!("no group of {} matches the configured prefix", request.user),
        ))
    }
}
