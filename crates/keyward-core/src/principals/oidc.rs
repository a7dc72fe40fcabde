use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use super::{CaseTransform, PrincipalsError, PrincipalsResolver, Resolution};
use crate::context::{AuthContext, BearerToken};
use crate::request::SignRequest;
use crate::{require, ConfigError, BACKEND_TIMEOUT};

/// OIDC userinfo lookup settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OidcResolverConfig {
    pub userinfo_endpoint: String,
    /// Claim or claims holding the user's groups, e.g. `"groups"` or
    /// `["groups", "roles"]`.
    #[serde(alias = "groups_claim", deserialize_with = "one_or_many")]
    pub groups_claims: Vec<String>,
    #[serde(default)]
    pub transform_case: CaseTransform,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(claim) => vec![claim],
        OneOrMany::Many(claims) => claims,
    })
}

/// Reads group claims from the userinfo endpoint using the access token
/// the OIDC authenticator obtained. Only works together with that
/// authenticator.
pub struct OidcResolver {
    config: OidcResolverConfig,
    client: reqwest::Client,
}

impl OidcResolver {
    pub fn from_config(mut config: OidcResolverConfig) -> Result<Self, ConfigError> {
        require("userinfo_endpoint", &config.userinfo_endpoint)?;
        config.groups_claims.retain(|c| !c.trim().is_empty());
        if config.groups_claims.is_empty() {
            return Err(ConfigError::Missing("groups_claims"));
        }
        let client = reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::invalid("userinfo_endpoint", e))?;
        Ok(Self { config, client })
    }
}

/// Collects the string values of `claims` from a userinfo document, in
/// claim order. A plain string claim counts as a single group.
pub(crate) fn extract_claims(
    userinfo: &Value,
    claims: &[String],
) -> Result<Vec<String>, PrincipalsError> {
    let object = userinfo
        .as_object()
        .ok_or_else(|| PrincipalsError::MalformedResponse("userinfo is not an object".into()))?;

    let mut groups = Vec::new();
    for claim in claims {
        match object.get(claim) {
            None | Some(Value::Null) => {}
            Some(Value::String(group)) => groups.push(group.clone()),
            Some(Value::Array(items)) => groups.extend(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string),
            ),
            Some(_) => {
                return Err(PrincipalsError::MalformedResponse(format!(
                    "claim {claim} is neither a string nor an array"
                )))
            }
        }
    }
    Ok(groups)
}

#[async_trait]
impl PrincipalsResolver for OidcResolver {
    fn name(&self) -> &str {
        "oidc"
    }

    async fn resolve(
        &self,
        ctx: &AuthContext,
        request: &SignRequest,
    ) -> Result<Resolution, PrincipalsError> {
        let token = ctx.get::<BearerToken>().ok_or(PrincipalsError::MissingToken)?;

        let response = self
            .client
            .get(&self.config.userinfo_endpoint)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(PrincipalsError::backend)?;
        if !response.status().is_success() {
            return Err(PrincipalsError::Backend(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }
        let userinfo: Value = response
            .json()
            .await
            .map_err(|e| PrincipalsError::MalformedResponse(e.to_string()))?;

        let groups = extract_claims(&userinfo, &self.config.groups_claims)?;
        debug!(user = %request.user, groups = ?groups, "oidc groups found");

        let principals: Vec<String> = self
            .config
            .transform_case
            .apply(groups)
            .into_iter()
            .filter(|g| !g.is_empty())
            .collect();
        Ok(Resolution::from_list(
            principals,
            format!("no group claim for user {}", request.user),
        ))
    }
}
