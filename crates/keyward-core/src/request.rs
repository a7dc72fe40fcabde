//! Request types flowing through the issuance pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credentials and key submitted by a client for signing.
///
/// Every field defaults to empty so that a body with missing fields still
/// parses; [`SignRequest::validate`] is where emptiness is rejected. The
/// whole request is wiped from memory when dropped.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SignRequest {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

impl SignRequest {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        public_key: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            public_key: public_key.into(),
            otp: None,
        }
    }

    pub fn with_otp(mut self, otp: impl Into<String>) -> Self {
        self.otp = Some(otp.into());
        self
    }

    /// The supplied one-time code, treating an empty string as absent.
    pub fn otp(&self) -> Option<&str> {
        self.otp.as_deref().filter(|code| !code.is_empty())
    }

    /// Rejects requests with an empty user, password or public key.
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.user.is_empty() {
            return Err(RequestError::EmptyField("user"));
        }
        if self.password.is_empty() {
            return Err(RequestError::EmptyField("password"));
        }
        if self.public_key.trim().is_empty() {
            return Err(RequestError::EmptyField("public_key"));
        }
        Ok(())
    }
}

impl fmt::Debug for SignRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignRequest")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("public_key", &self.public_key)
            .field("otp", &self.otp.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A malformed sign request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("empty {0} field")]
    EmptyField(&'static str),
}

/// What a [`Signer`](crate::signer::Signer) needs to issue a certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertRequest {
    /// OpenSSH-encoded public key to certify.
    pub public_key: String,
    /// Certificate key id, the authenticated identity.
    pub id: String,
    /// Principals in the order they were resolved.
    pub principals: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_fields() {
        let ok = SignRequest::new("alice", "hunter2", "ssh-ed25519 AAAA");
        assert!(ok.validate().is_ok());

        let cases = [
            (SignRequest::new("", "hunter2", "ssh-ed25519 AAAA"), "user"),
            (SignRequest::new("alice", "", "ssh-ed25519 AAAA"), "password"),
            (SignRequest::new("alice", "hunter2", "  "), "public_key"),
        ];
        for (request, field) in cases {
            assert_eq!(request.validate(), Err(RequestError::EmptyField(field)));
        }
    }

    #[test]
    fn test_missing_fields_deserialize_as_empty() {
        let request: SignRequest = serde_json::from_str(r#"{"user":"alice"}"#).unwrap();
        assert_eq!(request.user, "alice");
        assert!(request.password.is_empty());
        assert!(request.otp.is_none());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_empty_otp_is_absent() {
        let request = SignRequest::new("alice", "pw", "key").with_otp("");
        assert_eq!(request.otp(), None);
        let request = SignRequest::new("alice", "pw", "key").with_otp("123456");
        assert_eq!(request.otp(), Some("123456"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let request = SignRequest::new("alice", "hunter2", "key").with_otp("123456");
        let rendered = format!("{request:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("123456"));
        assert!(rendered.contains("alice"));
    }
}
