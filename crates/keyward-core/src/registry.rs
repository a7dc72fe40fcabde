//! Turns configuration into live backends.

use std::sync::Arc;

use tracing::info;

use crate::authn::{
    Authenticator, LdapAuthenticator, LocalAuthenticator, OidcAuthenticator, VaultAuthenticator,
};
use crate::config::{AuthenticatorConfig, PrincipalsConfig, SignerConfig};
use crate::principals::{LdapResolver, LocalResolver, OidcResolver, PrincipalsResolver, UserResolver};
use crate::signer::{LocalSigner, Signer, VaultSigner};
use crate::ConfigError;

pub fn build_authenticator(
    config: &AuthenticatorConfig,
) -> Result<Arc<dyn Authenticator>, ConfigError> {
    let authenticator: Arc<dyn Authenticator> = match config.clone() {
        AuthenticatorConfig::Local(c) => Arc::new(LocalAuthenticator::from_config(c)?),
        AuthenticatorConfig::Ldap(c) => Arc::new(LdapAuthenticator::from_config(c)?),
        AuthenticatorConfig::Oidc(c) => Arc::new(OidcAuthenticator::from_config(c)?),
        AuthenticatorConfig::Vault(c) => Arc::new(VaultAuthenticator::from_config(c)?),
    };
    info!(authenticator = authenticator.name(), "authenticator ready");
    Ok(authenticator)
}

/// Builds resolvers in configuration order. An empty list is an error.
pub fn build_resolvers(
    configs: &[PrincipalsConfig],
) -> Result<Vec<Arc<dyn PrincipalsResolver>>, ConfigError> {
    if configs.is_empty() {
        return Err(ConfigError::NoResolvers);
    }
    configs
        .iter()
        .map(|config| {
            let resolver: Arc<dyn PrincipalsResolver> = match config.clone() {
                PrincipalsConfig::Local(c) => Arc::new(LocalResolver::from_config(c)?),
                PrincipalsConfig::Ldap(c) => Arc::new(LdapResolver::from_config(c)?),
                PrincipalsConfig::Oidc(c) => Arc::new(OidcResolver::from_config(c)?),
                PrincipalsConfig::User => Arc::new(UserResolver),
            };
            info!(resolver = resolver.name(), "principals resolver ready");
            Ok(resolver)
        })
        .collect()
}

pub fn build_signer(config: &SignerConfig) -> Result<Arc<dyn Signer>, ConfigError> {
    let signer: Arc<dyn Signer> = match config.clone() {
        SignerConfig::Local(c) => Arc::new(LocalSigner::from_config(c)?),
        SignerConfig::Vault(c) => Arc::new(VaultSigner::from_config(c)?),
    };
    info!(signer = signer.name(), "signer ready");
    Ok(signer)
}
