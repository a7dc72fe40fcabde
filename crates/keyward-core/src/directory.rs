//! LDAP plumbing shared by the LDAP authenticator and principals resolver.
//!
//! Every call opens its own connection, binds with the service account,
//! runs under [`BACKEND_TIMEOUT`](crate::BACKEND_TIMEOUT) and unbinds on
//! every exit path, including timeouts.

use std::fmt;
use std::future::Future;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Scope, SearchEntry};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{require, ConfigError, BACKEND_TIMEOUT};

/// LDAP result code for a failed simple bind.
pub const INVALID_CREDENTIALS: u32 = 49;

/// Connection settings for an LDAP directory.
#[derive(Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Hostname or IP address.
    pub addr: String,
    /// Defaults to 636 with TLS, 389 without.
    #[serde(default)]
    pub port: Option<u16>,
    /// Connect with `ldaps://`.
    #[serde(default)]
    pub tls: bool,
    /// Verify the server certificate when `tls` is set.
    #[serde(default = "default_tls_verify")]
    pub tls_verify: bool,
    /// Service account DN used for searches.
    pub bind_user: String,
    pub bind_password: String,
}

fn default_tls_verify() -> bool {
    true
}

impl fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("addr", &self.addr)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("tls_verify", &self.tls_verify)
            .field("bind_user", &self.bind_user)
            .field("bind_password", &"<redacted>")
            .finish()
    }
}

impl DirectoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("addr", &self.addr)?;
        require("bind_user", &self.bind_user)?;
        require("bind_password", &self.bind_password)?;
        Ok(())
    }

    pub fn url(&self) -> String {
        let (scheme, default_port) = if self.tls { ("ldaps", 636) } else { ("ldap", 389) };
        format!(
            "{scheme}://{}:{}",
            self.addr,
            self.port.unwrap_or(default_port)
        )
    }

    /// Connects, binds as the service account and runs `op` on the session.
    ///
    /// The whole exchange, bind included, is bounded by the backend timeout.
    pub(crate) async fn with_session<T, F, Fut>(&self, op: F) -> Result<T, DirectoryError>
    where
        F: FnOnce(Ldap) -> Fut,
        Fut: Future<Output = Result<T, DirectoryError>>,
    {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(BACKEND_TIMEOUT)
            .set_no_tls_verify(!self.tls_verify);
        let url = self.url();

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &url).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "ldap connection driver stopped");
            }
        });
        debug!(url = %url, "ldap connection established");

        let session = ldap.clone();
        let bind_user = self.bind_user.clone();
        let bind_password = self.bind_password.clone();
        let result = tokio::time::timeout(BACKEND_TIMEOUT, async move {
            let mut session = session;
            session
                .simple_bind(&bind_user, &bind_password)
                .await
                .and_then(|res| res.success())
                .map_err(DirectoryError::ServiceBind)?;
            op(session).await
        })
        .await
        .unwrap_or_else(|_| Err(DirectoryError::Timeout));

        if let Err(e) = ldap.unbind().await {
            debug!(error = %e, "ldap unbind failed");
        }
        result
    }
}

/// Errors from directory operations.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("ldap error: {0}")]
    Ldap(#[from] LdapError),

    /// The service account could not bind.
    #[error("ldap service bind failed: {0}")]
    ServiceBind(#[source] LdapError),

    #[error("ldap operation timed out")]
    Timeout,

    #[error("no entry matched")]
    NotFound,

    #[error("too many entries returned")]
    TooManyEntries,
}

impl DirectoryError {
    /// True when the server rejected a bind with invalid credentials.
    pub fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            Self::Ldap(LdapError::LdapResult { result }) if result.rc == INVALID_CREDENTIALS
        )
    }
}

/// Substitutes the escaped `value` for every `%s` in `template`.
pub fn render_filter(template: &str, value: &str) -> String {
    template.replace("%s", &ldap3::ldap_escape(value))
}

/// Subtree search returning the DN of every matching entry.
pub(crate) async fn search_dns(
    ldap: &mut Ldap,
    base: &str,
    filter: &str,
) -> Result<Vec<String>, DirectoryError> {
    let (entries, _) = ldap
        .search(base, Scope::Subtree, filter, vec!["dn"])
        .await?
        .success()?;
    Ok(entries
        .into_iter()
        .map(|entry| SearchEntry::construct(entry).dn)
        .collect())
}

/// Subtree search that must match exactly one entry.
pub(crate) async fn search_unique_dn(
    ldap: &mut Ldap,
    base: &str,
    filter: &str,
) -> Result<String, DirectoryError> {
    let mut dns = search_dns(ldap, base, filter).await?;
    match dns.len() {
        0 => Err(DirectoryError::NotFound),
        1 => Ok(dns.remove(0)),
        _ => Err(DirectoryError::TooManyEntries),
    }
}
