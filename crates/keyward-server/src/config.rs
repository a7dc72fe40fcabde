//! Server configuration file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use keyward_core::ServiceConfig;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/keyward/server.toml";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Everything in `server.toml`.
///
/// The listener settings sit at the top level; the `[authenticator]`,
/// `[[principals]]` and `[signer]` tables form the [`ServiceConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: SocketAddr,

    /// Serve plain HTTP. Only sensible behind a TLS-terminating proxy.
    #[serde(default)]
    pub tls_disable: bool,

    #[serde(default)]
    pub tls_cert: Option<PathBuf>,

    #[serde(default)]
    pub tls_key: Option<PathBuf>,

    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,

    #[serde(flatten)]
    pub service: ServiceConfig,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9600))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("tls_cert and tls_key are required unless tls_disable is set")]
    MissingTls,
}

impl ServerConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigFileError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigFileError> {
        if !self.tls_disable && (self.tls_cert.is_none() || self.tls_key.is_none()) {
            return Err(ConfigFileError::MissingTls);
        }
        Ok(())
    }

    /// Certificate and key paths when TLS is on.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        if self.tls_disable {
            return None;
        }
        Some((self.tls_cert.as_deref()?, self.tls_key.as_deref()?))
    }
}
