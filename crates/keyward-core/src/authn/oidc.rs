use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{require_credentials, Authenticated, AuthnError, Authenticator};
use crate::context::{AuthContext, BearerToken};
use crate::request::SignRequest;
use crate::{require, ConfigError, BACKEND_TIMEOUT};

/// OAuth2 resource owner password credentials settings.
#[derive(Clone, Deserialize)]
pub struct OidcAuthenticatorConfig {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for OidcAuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcAuthenticatorConfig")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges the user's password for an access token at the identity
/// provider. The token is handed to later stages as a [`BearerToken`].
pub struct OidcAuthenticator {
    config: OidcAuthenticatorConfig,
    client: reqwest::Client,
}

impl OidcAuthenticator {
    pub fn from_config(config: OidcAuthenticatorConfig) -> Result<Self, ConfigError> {
        require("token_endpoint", &config.token_endpoint)?;
        require("client_id", &config.client_id)?;
        require("client_secret", &config.client_secret)?;
        let client = reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::invalid("token_endpoint", e))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Authenticator for OidcAuthenticator {
    fn name(&self) -> &str {
        "oidc"
    }

    async fn authenticate(&self, request: &SignRequest) -> Result<Authenticated, AuthnError> {
        require_credentials(request)?;

        let form = [
            ("grant_type", "password"),
            ("username", request.user.as_str()),
            ("password", request.password.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&self.config.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(AuthnError::backend)?;

        let status = response.status();
        let body = response.bytes().await.map_err(AuthnError::backend)?;
        let token: TokenResponse = match serde_json::from_slice(&body) {
            Ok(token) => token,
            Err(_) if status != StatusCode::OK => TokenResponse::default(),
            Err(e) => return Err(AuthnError::backend(format!("token response: {e}"))),
        };

        if status != StatusCode::OK {
            debug!(
                status = %status,
                description = token.error_description.as_deref().unwrap_or(""),
                "token endpoint refused grant"
            );
            let reason = if token.error.is_empty() {
                status.to_string()
            } else {
                token.error
            };
            return Err(AuthnError::Rejected(reason));
        }
        if token.access_token.is_empty() {
            return Err(AuthnError::EmptyToken);
        }

        let mut context = AuthContext::new();
        context.insert(BearerToken::new(token.access_token));
        Ok(Authenticated::new(format!("oidc-{}", request.user)).with_context(context))
    }
}
