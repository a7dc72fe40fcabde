//! HTTP client for the keyward API.

use std::time::Duration;

use keyward_core::SignRequest;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error message the server uses to ask for a one-time code.
pub const OTP_REQUIRED: &str = "otp required but not provided";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server address must end with a slash: {0}")]
    AddressWithoutSlash(String),

    #[error("failed to build HTTP client: {0}")]
    Builder(#[from] reqwest::Error),

    #[error("invalid server address {0}")]
    Url(String),

    #[error("otp required")]
    OtpRequired,

    /// The server answered with an error body.
    #[error("{message} (HTTP {status})")]
    Rejected { status: u16, message: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

#[derive(Deserialize)]
struct SignResponse {
    certificate: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct SignClient {
    sign_url: reqwest::Url,
    http: reqwest::Client,
}

impl SignClient {
    /// `addr` is the server base URL and must end with `/`.
    pub fn new(addr: &str) -> Result<Self, ClientError> {
        if !addr.ends_with('/') {
            return Err(ClientError::AddressWithoutSlash(addr.to_string()));
        }
        let base =
            reqwest::Url::parse(addr).map_err(|e| ClientError::Url(format!("{addr}: {e}")))?;
        let sign_url = base
            .join("v1/sign")
            .map_err(|e| ClientError::Url(format!("{addr}: {e}")))?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { sign_url, http })
    }

    /// Posts `request` and returns the certificate text.
    pub async fn sign(&self, request: &SignRequest) -> Result<String, ClientError> {
        let transport = |source| ClientError::Transport {
            url: self.sign_url.to_string(),
            source,
        };
        let response = self
            .http
            .post(self.sign_url.clone())
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            let body: SignResponse = response.json().await.map_err(transport)?;
            return Ok(body.certificate);
        }

        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
        };
        if message == OTP_REQUIRED {
            return Err(ClientError::OtpRequired);
        }
        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn sign(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        match (body["password"].as_str(), body.get("otp")) {
            (Some("hunter2"), _) => (StatusCode::OK, Json(json!({"certificate": "CERT"}))),
            (Some("needs-otp"), None) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": OTP_REQUIRED})),
            ),
            (Some("needs-otp"), Some(_)) => {
                (StatusCode::OK, Json(json!({"certificate": "CERT-OTP"})))
            }
            _ => (StatusCode::UNAUTHORIZED, Json(json!({"error": "login failed"}))),
        }
    }

    async fn server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/v1/sign", post(sign)))
                .await
                .unwrap();
        });
        format!("http://{addr}/")
    }

    #[test]
    fn test_address_must_end_with_slash() {
        assert!(matches!(
            SignClient::new("http://127.0.0.1:9600"),
            Err(ClientError::AddressWithoutSlash(_))
        ));
        assert!(SignClient::new("http://127.0.0.1:9600/").is_ok());
    }

    #[tokio::test]
    async fn test_sign_flow() {
        let client = SignClient::new(&server().await).unwrap();

        let ok = client
            .sign(&SignRequest::new("alice", "hunter2", "ssh-ed25519 AAAA"))
            .await
            .unwrap();
        assert_eq!(ok, "CERT");

        let err = client
            .sign(&SignRequest::new("alice", "needs-otp", "ssh-ed25519 AAAA"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::OtpRequired));

        let ok = client
            .sign(&SignRequest::new("alice", "needs-otp", "ssh-ed25519 AAAA").with_otp("123456"))
            .await
            .unwrap();
        assert_eq!(ok, "CERT-OTP");

        let err = client
            .sign(&SignRequest::new("alice", "nope", "ssh-ed25519 AAAA"))
            .await
            .unwrap_err();
        match err {
            ClientError::Rejected { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "login failed");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
