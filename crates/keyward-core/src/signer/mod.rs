//! Signer trait and implementations.
//!
//! - [`LocalSigner`] - signs with a CA key loaded from disk
//! - [`VaultSigner`] - delegates to the Vault SSH secrets engine
//!
//! Both reject an empty key id or an empty principal list on their own,
//! whatever the caller already checked.

mod local;
mod vault;

pub use self::local::{default_extensions, LocalSigner, LocalSignerConfig};
pub use self::vault::{VaultSigner, VaultSignerConfig};

use async_trait::async_trait;

use crate::request::CertRequest;

/// Issues OpenSSH user certificates.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Signs `request.public_key` and returns the certificate in OpenSSH
    /// authorized-key format.
    async fn sign(&self, request: &CertRequest) -> Result<String, SignError>;

    /// The CA public key in OpenSSH authorized-key format, for
    /// `TrustedUserCAKeys`.
    async fn read_ca(&self) -> Result<String, SignError>;
}

/// Errors raised while signing or reading the CA.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SignError {
    #[error("empty id")]
    EmptyId,

    #[error("empty list of principals")]
    EmptyPrincipals,

    #[error("failed to parse user public key: {0}")]
    InvalidPublicKey(String),

    /// Building, signing or encoding the certificate failed.
    #[error("failed to sign user public key: {0}")]
    Signing(String),

    /// The signing backend refused this particular request.
    #[error("signing request rejected: {0}")]
    Rejected(String),

    /// The signing backend could not be reached or refused to work.
    #[error("signing backend unavailable: {0}")]
    Unavailable(String),
}

impl SignError {
    /// True when the request itself was unsignable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyId
                | Self::EmptyPrincipals
                | Self::InvalidPublicKey(_)
                | Self::Rejected(_)
        )
    }
}

/// Checks every signer applies before doing any work.
pub(crate) fn check_request(request: &CertRequest) -> Result<(), SignError> {
    if request.id.is_empty() {
        return Err(SignError::EmptyId);
    }
    if request.principals.is_empty() {
        return Err(SignError::EmptyPrincipals);
    }
    Ok(())
}
