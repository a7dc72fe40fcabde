//! Short-lived SSH user certificate issuance.
//!
//! A request carrying a username, a password (plus an optional one-time
//! code) and an SSH public key goes through three pluggable stages:
//! authentication, principal resolution and signing. The [`issuer::Issuer`]
//! drives the stages in order and maps every failure onto a small error
//! taxonomy that the HTTP layer turns into status codes.
//!
//! # Components
//!
//! - [`otp`] - TOTP seeds, password-derived seed encryption and code checks
//! - [`request`] - Sign and certificate request types
//! - [`context`] - Request-scoped typed context passed between stages
//! - [`authn`] - Authenticator trait and the local, LDAP, OIDC and Vault variants
//! - [`principals`] - Principals resolver trait and its variants
//! - [`signer`] - Signer trait, local CA signer and Vault SSH signer
//! - [`directory`] - LDAP connection helpers shared by authn and principals
//! - [`vault`] - Vault endpoint settings shared by authn and signer
//! - [`config`] - Serde configuration for every backend
//! - [`registry`] - Builds trait objects from configuration
//! - [`issuer`] - The issuance pipeline

pub mod authn;
pub mod config;
pub mod context;
pub mod directory;
pub mod issuer;
pub mod otp;
pub mod principals;
pub mod registry;
pub mod request;
pub mod signer;
pub mod vault;

#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use authn::{Authenticated, AuthnError, Authenticator};
pub use config::ServiceConfig;
pub use context::{AuthContext, BearerToken};
pub use issuer::{IssueError, Issued, Issuer};
pub use principals::{PrincipalsError, PrincipalsResolver, Resolution};
pub use request::{CertRequest, RequestError, SignRequest};
pub use signer::{SignError, Signer};

/// Timeout applied to every call against a remote backend (LDAP, OIDC, Vault).
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised while turning configuration into live backends.
///
/// These are fatal at startup: a service must not start serving with a
/// half-configured pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required entry is absent or empty.
    #[error("config entry {0} missing")]
    Missing(&'static str),

    /// An entry is present but cannot be used.
    #[error("invalid config entry {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    /// A referenced file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The pipeline needs at least one principals resolver.
    #[error("no principals resolver configured")]
    NoResolvers,
}

impl ConfigError {
    pub(crate) fn invalid(key: &'static str, reason: impl ToString) -> Self {
        Self::Invalid {
            key,
            reason: reason.to_string(),
        }
    }
}

/// Returns `Err(ConfigError::Missing)` when `value` is empty.
pub(crate) fn require(key: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(key));
    }
    Ok(())
}

/// Seconds since the unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
