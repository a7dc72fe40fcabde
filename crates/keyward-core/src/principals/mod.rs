//! Principals resolver trait and implementations.
//!
//! A resolver maps an authenticated request to the principals (unix users
//! or roles) that the certificate will be valid for. Several resolvers can
//! be configured; the [`Issuer`](crate::issuer::Issuer) runs them in order
//! and concatenates what they find.
//!
//! - [`LocalResolver`] - comma-separated lists from configuration
//! - [`LdapResolver`] - group membership in a directory
//! - [`OidcResolver`] - group claims from the OIDC userinfo endpoint
//! - [`UserResolver`] - the submitted username itself
//!
//! A resolver that has nothing to say about a user returns
//! [`Resolution::NotFound`], which is not an error: the next resolver runs.
//! An `Err` aborts the whole resolution.

mod ldap;
mod local;
mod oidc;
mod user;

pub use self::ldap::{LdapResolver, LdapResolverConfig};
pub use self::local::{LocalResolver, LocalResolverConfig};
pub use self::oidc::{OidcResolver, OidcResolverConfig};
pub use self::user::UserResolver;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::context::AuthContext;
use crate::directory::DirectoryError;
use crate::request::SignRequest;

/// What a resolver found for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Principals in backend order.
    Found(Vec<String>),
    /// This backend knows nothing about the user.
    NotFound(String),
}

impl Resolution {
    /// `Found` unless `principals` is empty, in which case `NotFound(reason)`.
    pub fn from_list(principals: Vec<String>, reason: impl Into<String>) -> Self {
        if principals.is_empty() {
            Self::NotFound(reason.into())
        } else {
            Self::Found(principals)
        }
    }
}

/// Resolves the principals a user is entitled to.
#[async_trait]
pub trait PrincipalsResolver: Send + Sync {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Looks up principals for `request.user`.
    ///
    /// `ctx` carries whatever the authenticator stored, such as an OIDC
    /// access token.
    async fn resolve(
        &self,
        ctx: &AuthContext,
        request: &SignRequest,
    ) -> Result<Resolution, PrincipalsError>;
}

/// Hard failures that abort principal resolution.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PrincipalsError {
    #[error("user not found")]
    UserNotFound,

    #[error("too many user entries returned")]
    TooManyEntries,

    /// The OIDC resolver ran without a token from the OIDC authenticator.
    #[error("OIDC access token not available in request context")]
    MissingToken,

    #[error("principals backend error: {0}")]
    Backend(String),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl PrincipalsError {
    pub(crate) fn backend(err: impl ToString) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<DirectoryError> for PrincipalsError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::UserNotFound,
            DirectoryError::TooManyEntries => Self::TooManyEntries,
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Case applied to principals after filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseTransform {
    #[default]
    None,
    Lower,
    Upper,
}

impl CaseTransform {
    pub fn apply(self, principals: Vec<String>) -> Vec<String> {
        match self {
            Self::None => principals,
            Self::Lower => principals.into_iter().map(|p| p.to_lowercase()).collect(),
            Self::Upper => principals.into_iter().map(|p| p.to_uppercase()).collect(),
        }
    }
}

static CN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[cC][nN]=(.+?),.*$").expect("valid CN pattern"));

/// Extracts the leading CN of each DN.
///
/// DNs that do not start with a CN, or whose CN is empty, are dropped.
pub fn extract_cn<S: AsRef<str>>(dns: &[S]) -> Vec<String> {
    dns.iter()
        .filter_map(|dn| CN_PATTERN.captures(dn.as_ref()))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str())
        .filter(|cn| !cn.starts_with(','))
        .map(str::to_string)
        .collect()
}

/// Keeps entries starting with `prefix` and strips it. An empty prefix
/// keeps everything.
pub fn filter_by_prefix(prefix: &str, principals: Vec<String>) -> Vec<String> {
    principals
        .into_iter()
        .filter_map(|p| p.strip_prefix(prefix).map(str::to_string))
        .collect()
}
