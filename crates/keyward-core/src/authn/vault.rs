use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{require_credentials, Authenticated, AuthnError, Authenticator};
use crate::request::SignRequest;
use crate::vault::VaultEndpoint;
use crate::{require, ConfigError};

/// Vault userpass settings.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultAuthenticatorConfig {
    #[serde(flatten)]
    pub endpoint: VaultEndpoint,
    /// Mount path of the userpass auth method.
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_path() -> String {
    "userpass".to_string()
}

/// Checks credentials with a Vault userpass login.
///
/// The token Vault returns is discarded; only the login outcome matters.
pub struct VaultAuthenticator {
    login_prefix: String,
    client: reqwest::Client,
}

impl VaultAuthenticator {
    pub fn from_config(config: VaultAuthenticatorConfig) -> Result<Self, ConfigError> {
        config.endpoint.validate()?;
        require("path", &config.path)?;
        Ok(Self {
            login_prefix: format!(
                "{}/auth/{}/login",
                config.endpoint.base_url(),
                config.path.trim_matches('/')
            ),
            client: config.endpoint.client()?,
        })
    }
}

#[async_trait]
impl Authenticator for VaultAuthenticator {
    fn name(&self) -> &str {
        "vault"
    }

    async fn authenticate(&self, request: &SignRequest) -> Result<Authenticated, AuthnError> {
        require_credentials(request)?;

        let mut url = reqwest::Url::parse(&self.login_prefix).map_err(AuthnError::backend)?;
        url.path_segments_mut()
            .map_err(|_| AuthnError::backend("vault address cannot be a base"))?
            .push(&request.user);

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "password": request.password }))
            .send()
            .await
            .map_err(AuthnError::backend)?;

        match response.status() {
            StatusCode::OK => Ok(Authenticated::new(format!("vault-{}", request.user))),
            StatusCode::BAD_REQUEST => Err(AuthnError::BadPassword),
            StatusCode::INTERNAL_SERVER_ERROR => {
                Err(AuthnError::backend("vault internal server error"))
            }
            other => Err(AuthnError::backend(format!(
                "unexpected vault status {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{serve, vault_endpoint};
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};

    async fn login(
        Path(user): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> AxumStatus {
        if user == "alice" && body["password"] == "hunter2" {
            AxumStatus::OK
        } else {
            AxumStatus::BAD_REQUEST
        }
    }

    async fn authenticator() -> VaultAuthenticator {
        let base = serve(Router::new().route("/v1/auth/userpass/login/{user}", post(login))).await;
        VaultAuthenticator::from_config(VaultAuthenticatorConfig {
            endpoint: vault_endpoint(&base),
            path: default_path(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_login() {
        let authn = authenticator().await;
        let ok = authn
            .authenticate(&SignRequest::new("alice", "hunter2", "key"))
            .await
            .unwrap();
        assert_eq!(ok.identity, "vault-alice");

        let err = authn
            .authenticate(&SignRequest::new("alice", "nope", "key"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::BadPassword));
    }
}
