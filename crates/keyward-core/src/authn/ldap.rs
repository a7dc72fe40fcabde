use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{require_credentials, Authenticated, AuthnError, Authenticator};
use crate::directory::{self, render_filter, DirectoryConfig, DirectoryError};
use crate::request::SignRequest;
use crate::{require, ConfigError};

/// LDAP authenticator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LdapAuthenticatorConfig {
    #[serde(flatten)]
    pub directory: DirectoryConfig,
    /// Base DN for the user search.
    pub search_base: String,
    /// Filter with `%s` standing for the escaped username,
    /// e.g. `(&(objectClass=person)(uid=%s))`.
    pub search_filter: String,
}

/// Finds the user's entry with the service account, then binds as it.
pub struct LdapAuthenticator {
    config: LdapAuthenticatorConfig,
}

impl LdapAuthenticator {
    pub fn from_config(config: LdapAuthenticatorConfig) -> Result<Self, ConfigError> {
        config.directory.validate()?;
        require("search_base", &config.search_base)?;
        require("search_filter", &config.search_filter)?;
        Ok(Self { config })
    }
}

#[async_trait]
impl Authenticator for LdapAuthenticator {
    fn name(&self) -> &str {
        "ldap"
    }

    async fn authenticate(&self, request: &SignRequest) -> Result<Authenticated, AuthnError> {
        require_credentials(request)?;

        let filter = render_filter(&self.config.search_filter, &request.user);
        let base = self.config.search_base.as_str();
        let password = request.password.as_str();

        self.config
            .directory
            .with_session(|mut ldap| async move {
                let dn = directory::search_unique_dn(&mut ldap, base, &filter).await?;
                debug!(dn = %dn, "ldap user entry found");
                ldap.simple_bind(&dn, password).await?.success()?;
                Ok::<_, DirectoryError>(())
            })
            .await
            .map_err(|e| {
                if e.is_invalid_credentials() {
                    AuthnError::BadPassword
                } else {
                    AuthnError::from(e)
                }
            })?;

        Ok(Authenticated::new(format!("ldap-{}", request.user)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LdapAuthenticatorConfig {
        toml::from_str(
            r#"
            addr = "ldap.example.com"
            bind_user = "cn=svc,dc=example,dc=com"
            bind_password = "secret"
            search_base = "ou=people,dc=example,dc=com"
            search_filter = "(uid=%s)"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_config_from_toml() {
        let cfg = config();
        assert!(!cfg.directory.tls);
        assert!(cfg.directory.tls_verify);
        assert!(LdapAuthenticator::from_config(cfg).is_ok());
    }

    #[test]
    fn test_missing_search_filter() {
        let mut cfg = config();
        cfg.search_filter = String::new();
        assert!(matches!(
            LdapAuthenticator::from_config(cfg),
            Err(ConfigError::Missing("search_filter"))
        ));
    }

    #[tokio::test]
    async fn test_empty_credentials_rejected_before_connecting() {
        let authn = LdapAuthenticator::from_config(config()).unwrap();
        let err = authn
            .authenticate(&SignRequest::new("alice", "", "key"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::EmptyPassword));
    }

    #[tokio::test]
    async fn test_unreachable_directory_is_backend_error() {
        let mut cfg = config();
        cfg.directory.addr = "127.0.0.1".into();
        cfg.directory.port = Some(1);
        let authn = LdapAuthenticator::from_config(cfg).unwrap();
        let err = authn
            .authenticate(&SignRequest::new("alice", "pw", "key"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthnError::Backend(_)));
    }
}
