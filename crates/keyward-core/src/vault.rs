//! Vault endpoint settings shared by the Vault authenticator and signer.

use serde::Deserialize;

use crate::{require, ConfigError, BACKEND_TIMEOUT};

const DEFAULT_PORT: u16 = 8200;

/// Where a Vault server listens.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultEndpoint {
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub tls: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl VaultEndpoint {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require("addr", &self.addr)
    }

    /// `{scheme}://{addr}:{port}/v1`
    pub fn base_url(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/v1", self.addr, self.port)
    }

    pub(crate) fn client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::invalid("addr", e))
    }
}
