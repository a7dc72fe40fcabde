//! Authenticator trait and implementations.
//!
//! An authenticator decides whether the credentials in a [`SignRequest`]
//! are valid and, if so, which identity they belong to. Implementations:
//!
//! - [`LocalAuthenticator`] - bcrypt hashes and optional TOTP from configuration
//! - [`LdapAuthenticator`] - search-then-bind against a directory
//! - [`OidcAuthenticator`] - OAuth2 resource owner password credentials grant
//! - [`VaultAuthenticator`] - Vault userpass login
//!
//! The identity is prefixed with the backend name (`local-alice`,
//! `ldap-alice`) and becomes the certificate key id.

mod ldap;
mod local;
mod oidc;
mod vault;

pub use self::ldap::{LdapAuthenticator, LdapAuthenticatorConfig};
pub use self::local::{LocalAuthenticator, LocalAuthenticatorConfig};
pub use self::oidc::{OidcAuthenticator, OidcAuthenticatorConfig};
pub use self::vault::{VaultAuthenticator, VaultAuthenticatorConfig};

use async_trait::async_trait;

use crate::context::AuthContext;
use crate::directory::DirectoryError;
use crate::request::SignRequest;

/// Outcome of a successful authentication.
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// Backend-prefixed identity, used as the certificate key id.
    pub identity: String,
    /// Values later pipeline stages may need.
    pub context: AuthContext,
}

impl Authenticated {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            context: AuthContext::new(),
        }
    }

    pub fn with_context(mut self, context: AuthContext) -> Self {
        self.context = context;
        self
    }
}

/// Verifies user credentials.
///
/// Returning `Ok` means the credentials are valid. Every rejection is an
/// `Err`, so callers cannot mistake a failed login for a success.
/// Implementations are shared across concurrent requests.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Checks the credentials carried by `request`.
    async fn authenticate(&self, request: &SignRequest) -> Result<Authenticated, AuthnError>;
}

/// Reasons an authentication attempt failed.
///
/// The HTTP layer reports all of these as "login failed", except
/// [`AuthnError::OtpRequired`] which tells the client to prompt for a code.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AuthnError {
    #[error("empty username")]
    EmptyUser,

    #[error("empty password")]
    EmptyPassword,

    #[error("user not found")]
    UserNotFound,

    #[error("too many user entries returned")]
    TooManyEntries,

    #[error("bad password")]
    BadPassword,

    #[error("otp required but not provided")]
    OtpRequired,

    #[error("otp does not match")]
    OtpMismatch,

    /// The identity provider refused the grant.
    #[error("identity provider rejected login: {0}")]
    Rejected(String),

    #[error("identity provider returned an empty access token")]
    EmptyToken,

    /// Backend unreachable, timed out or answered something unusable.
    #[error("authentication backend error: {0}")]
    Backend(String),
}

impl AuthnError {
    pub(crate) fn backend(err: impl ToString) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<DirectoryError> for AuthnError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::UserNotFound,
            DirectoryError::TooManyEntries => Self::TooManyEntries,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Rejects a request with an empty user or password before any backend call.
pub(crate) fn require_credentials(request: &SignRequest) -> Result<(), AuthnError> {
    if request.user.is_empty() {
        return Err(AuthnError::EmptyUser);
    }
    if request.password.is_empty() {
        return Err(AuthnError::EmptyPassword);
    }
    Ok(())
}
