use std::fmt;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use super::{check_request, SignError, Signer};
use crate::request::CertRequest;
use crate::vault::VaultEndpoint;
use crate::{require, ConfigError};

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault SSH secrets engine settings.
#[derive(Clone, Deserialize)]
pub struct VaultSignerConfig {
    #[serde(flatten)]
    pub endpoint: VaultEndpoint,
    pub role_id: String,
    pub secret_id: String,
    /// Mount path of the SSH secrets engine, e.g. `ssh-client-signer`.
    pub path: String,
    /// Signing role within the engine.
    pub role: String,
    /// Requested lifetime in Vault duration syntax, e.g. `"8h"`.
    pub ttl: String,
}

impl fmt::Debug for VaultSignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSignerConfig")
            .field("endpoint", &self.endpoint)
            .field("role_id", &self.role_id)
            .field("secret_id", &"[REDACTED]")
            .field("path", &self.path)
            .field("role", &self.role)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Serialize)]
struct AppRoleLogin<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    auth: LoginAuth,
}

#[derive(Deserialize)]
struct LoginAuth {
    client_token: String,
}

#[derive(Serialize)]
struct VaultSignRequest<'a> {
    key_id: &'a str,
    public_key: &'a str,
    valid_principals: String,
    ttl: &'a str,
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct SignedKey {
    signed_key: String,
}

#[derive(Deserialize)]
struct ErrorsBody {
    #[serde(default)]
    errors: Vec<String>,
}

#[derive(Deserialize)]
struct CaKey {
    public_key: String,
}

/// Delegates signing to a Vault SSH secrets engine.
///
/// Logs in with AppRole before every operation; the token is never cached.
pub struct VaultSigner {
    config: VaultSignerConfig,
    base_url: String,
    client: reqwest::Client,
}

impl VaultSigner {
    pub fn from_config(config: VaultSignerConfig) -> Result<Self, ConfigError> {
        config.endpoint.validate()?;
        require("role_id", &config.role_id)?;
        require("secret_id", &config.secret_id)?;
        require("path", &config.path)?;
        require("role", &config.role)?;
        require("ttl", &config.ttl)?;
        Ok(Self {
            base_url: config.endpoint.base_url(),
            client: config.endpoint.client()?,
            config,
        })
    }

    fn engine_url(&self, rest: &str) -> String {
        format!(
            "{}/{}/{rest}",
            self.base_url,
            self.config.path.trim_matches('/')
        )
    }

    async fn login(&self) -> Result<Zeroizing<String>, SignError> {
        let response = self
            .client
            .post(format!("{}/auth/approle/login", self.base_url))
            .json(&AppRoleLogin {
                role_id: &self.config.role_id,
                secret_id: &self.config.secret_id,
            })
            .send()
            .await
            .map_err(unavailable)?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::BAD_REQUEST => {
                return Err(SignError::Unavailable("invalid role_id or secret_id".into()))
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                return Err(SignError::Unavailable("vault internal server error".into()))
            }
            other => {
                return Err(SignError::Unavailable(format!(
                    "unexpected status {other} during approle login"
                )))
            }
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| SignError::Unavailable(format!("client token not found: {e}")))?;
        Ok(Zeroizing::new(login.auth.client_token))
    }
}

fn unavailable(e: impl fmt::Display) -> SignError {
    SignError::Unavailable(e.to_string())
}

/// Vault answers 400 when the request itself is unacceptable, e.g. a
/// principal outside the role's allowed list.
async fn rejected(response: reqwest::Response) -> SignError {
    let reason = match response.json::<ErrorsBody>().await {
        Ok(body) if !body.errors.is_empty() => body.errors.join("; "),
        _ => "vault rejected the request".to_string(),
    };
    SignError::Rejected(reason)
}

async fn read_data<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, SignError> {
    if response.status() != StatusCode::OK {
        return Err(SignError::Unavailable(format!(
            "unexpected vault status {}",
            response.status()
        )));
    }
    let envelope: DataEnvelope<T> = response.json().await.map_err(unavailable)?;
    Ok(envelope.data)
}

#[async_trait]
impl Signer for VaultSigner {
    fn name(&self) -> &str {
        "vault"
    }

    async fn sign(&self, request: &CertRequest) -> Result<String, SignError> {
        check_request(request)?;
        let token = self.login().await?;

        let response = self
            .client
            .post(self.engine_url(&format!("sign/{}", self.config.role)))
            .header(TOKEN_HEADER, token.as_str())
            .json(&VaultSignRequest {
                key_id: &request.id,
                public_key: &request.public_key,
                valid_principals: request.principals.join(","),
                ttl: &self.config.ttl,
            })
            .send()
            .await
            .map_err(unavailable)?;
        if response.status() == StatusCode::BAD_REQUEST {
            return Err(rejected(response).await);
        }
        let signed: SignedKey = read_data(response).await?;

        debug!(key_id = %request.id, role = %self.config.role, "certificate signed by vault");
        Ok(signed.signed_key.trim_end().to_string())
    }

    async fn read_ca(&self) -> Result<String, SignError> {
        let token = self.login().await?;
        let response = self
            .client
            .get(self.engine_url("config/ca"))
            .header(TOKEN_HEADER, token.as_str())
            .send()
            .await
            .map_err(unavailable)?;
        let ca: CaKey = read_data(response).await?;
        Ok(ca.public_key.replacen('\n', "", 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{serve, vault_endpoint};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const TOKEN: &str = "s.approle";

    async fn login(Json(body): Json<Value>) -> Result<Json<Value>, AxumStatus> {
        if body["role_id"] == "role" && body["secret_id"] == "secret" {
            Ok(Json(json!({"auth": {"client_token": TOKEN}})))
        } else {
            Err(AxumStatus::BAD_REQUEST)
        }
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("x-vault-token").and_then(|v| v.to_str().ok()) == Some(TOKEN)
    }

    async fn sign(
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, (AxumStatus, Json<Value>)> {
        if !authorized(&headers) {
            return Err((AxumStatus::FORBIDDEN, Json(json!({"errors": ["permission denied"]}))));
        }
        if body["valid_principals"].as_str().unwrap_or_default().contains("root") {
            return Err((
                AxumStatus::BAD_REQUEST,
                Json(json!({"errors": ["root is not a valid value for valid_principals"]})),
            ));
        }
        let cert = format!(
            "ssh-ed25519-cert-v01@openssh.com {}|{}|{}\n",
            body["key_id"].as_str().unwrap_or_default(),
            body["valid_principals"].as_str().unwrap_or_default(),
            body["ttl"].as_str().unwrap_or_default()
        );
        Ok(Json(json!({"data": {"signed_key": cert}})))
    }

    async fn ca(headers: HeaderMap) -> Result<Json<Value>, AxumStatus> {
        if !authorized(&headers) {
            return Err(AxumStatus::FORBIDDEN);
        }
        Ok(Json(json!({"data": {"public_key": "ssh-ed25519 AAAACA\n"}})))
    }

    async fn signer(secret_id: &str) -> VaultSigner {
        let base = serve(
            Router::new()
                .route("/v1/auth/approle/login", post(login))
                .route("/v1/ssh-client-signer/sign/users", post(sign))
                .route("/v1/ssh-client-signer/config/ca", get(ca)),
        )
        .await;
        VaultSigner::from_config(VaultSignerConfig {
            endpoint: vault_endpoint(&base),
            role_id: "role".into(),
            secret_id: secret_id.into(),
            path: "ssh-client-signer".into(),
            role: "users".into(),
            ttl: "8h".into(),
        })
        .unwrap()
    }

    fn request() -> CertRequest {
        CertRequest {
            public_key: "ssh-ed25519 AAAAUSER".into(),
            id: "ldap-alice".into(),
            principals: vec!["ops".into(), "admin".into()],
        }
    }

    #[tokio::test]
    async fn test_sign_and_read_ca() {
        let signer = signer("secret").await;
        assert_eq!(
            signer.sign(&request()).await.unwrap(),
            "ssh-ed25519-cert-v01@openssh.com ldap-alice|ops,admin|8h"
        );
        assert_eq!(signer.read_ca().await.unwrap(), "ssh-ed25519 AAAACA");
    }

    #[tokio::test]
    async fn test_bad_approle_is_unavailable() {
        let signer = signer("wrong").await;
        let err = signer.sign(&request()).await.unwrap_err();
        assert!(matches!(err, SignError::Unavailable(_)));
        assert!(!err.is_client_error());
        assert!(matches!(signer.read_ca().await, Err(SignError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_vault_refusal_is_client_error() {
        let signer = signer("secret").await;
        let mut req = request();
        req.principals.push("root".into());
        let err = signer.sign(&req).await.unwrap_err();
        match &err {
            SignError::Rejected(reason) => assert!(reason.contains("valid_principals")),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_empty_principals_checked_before_login() {
        let signer = signer("secret").await;
        let mut req = request();
        req.principals.clear();
        assert!(matches!(
            signer.sign(&req).await,
            Err(SignError::EmptyPrincipals)
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config: VaultSignerConfig = toml::from_str(
            r#"
            addr = "vault.local"
            role_id = "role"
            secret_id = "super-secret"
            path = "ssh"
            role = "users"
            ttl = "1h"
            "#,
        )
        .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
