//! Backend selection.
//!
//! Each stage is a table with a `type` key naming the backend; the rest of
//! the table is that backend's settings:
//!
//! ```toml
//! [authenticator]
//! type = "ldap"
//! addr = "ldap.example.com"
//! # ...
//!
//! [[principals]]
//! type = "user"
//!
//! [signer]
//! type = "local"
//! ca_key = "/etc/keyward/ca"
//! ca_cert = "/etc/keyward/ca.pub"
//! ttl = 28800
//! ```
//!
//! An unknown `type` fails deserialization.

use serde::Deserialize;

use crate::authn::{
    LdapAuthenticatorConfig, LocalAuthenticatorConfig, OidcAuthenticatorConfig,
    VaultAuthenticatorConfig,
};
use crate::principals::{LdapResolverConfig, LocalResolverConfig, OidcResolverConfig};
use crate::signer::{LocalSignerConfig, VaultSignerConfig};

/// The three pipeline stages.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub authenticator: AuthenticatorConfig,
    /// Resolvers run in this order.
    pub principals: Vec<PrincipalsConfig>,
    pub signer: SignerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AuthenticatorConfig {
    Local(LocalAuthenticatorConfig),
    Ldap(LdapAuthenticatorConfig),
    #[serde(alias = "oidcropc")]
    Oidc(OidcAuthenticatorConfig),
    Vault(VaultAuthenticatorConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PrincipalsConfig {
    Local(LocalResolverConfig),
    Ldap(LdapResolverConfig),
    Oidc(OidcResolverConfig),
    User,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignerConfig {
    Local(LocalSignerConfig),
    Vault(VaultSignerConfig),
}

impl AuthenticatorConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Ldap(_) => "ldap",
            Self::Oidc(_) => "oidc",
            Self::Vault(_) => "vault",
        }
    }
}
